//! Connect-time configuration. `ConnectOptions` is the single tuning surface
//! for the runtime; no other global configuration exists.

use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// How often the pump's reserved heartbeat event fires.
///
/// The value only changes which system event the pump subscribes to at
/// start-up; it has no effect on the empty-poll yield interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeartbeatFrequency {
    #[default]
    Hz6,
    Sec1,
    Sec4,
    Frame,
}

impl HeartbeatFrequency {
    pub(crate) fn event_name(self) -> &'static str {
        match self {
            HeartbeatFrequency::Hz6 => "6Hz",
            HeartbeatFrequency::Sec1 => "1sec",
            HeartbeatFrequency::Sec4 => "4sec",
            HeartbeatFrequency::Frame => "Frame",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Options accepted by [`crate::SimClient::connect`].
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Caller-supplied absolute path to the native library. Tried before auto-detect.
    pub library_path: Option<PathBuf>,
    /// Whether to scan environment variables and well-known install paths.
    pub auto_detect: bool,
    /// Depth of channel subscriptions created with a non-positive depth.
    pub default_buffer_depth: usize,
    pub heartbeat: HeartbeatFrequency,
    pub attach_timeout: Duration,
    pub log_level: LogLevel,
    pub cancel: CancellationToken,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            library_path: None,
            auto_detect: true,
            default_buffer_depth: 256,
            heartbeat: HeartbeatFrequency::Hz6,
            attach_timeout: Duration::from_secs(10),
            log_level: LogLevel::Info,
            cancel: CancellationToken::new(),
        }
    }
}

/// Fixed back-off between failed attach attempts while in `connecting`.
pub const ATTACH_BACKOFF: Duration = Duration::from_secs(2);

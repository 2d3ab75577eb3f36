//! Crate-wide error type. Every fallible public operation returns `Result<T>`.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no SimConnect library found at the given or auto-detected path")]
    LibraryNotFound,

    #[error("host refused attach (code {0:#x})")]
    AttachFailed(i32),

    #[error("{procedure} failed with code {code:#x}")]
    HostError { procedure: &'static str, code: i32 },

    #[error("host exception {code} (send-id {send_id}, index {index})")]
    Exception {
        code: u32,
        send_id: u32,
        index: u32,
    },

    #[error("field {field} exceeds the host's {limit}-byte fixed slot")]
    StringTooLong { field: &'static str, limit: usize },

    #[error("message pump terminated")]
    StreamClosed,

    #[error("no active connection")]
    NotConnected,

    #[error("set_waypoints called with zero waypoints")]
    EmptyWaypoints,

    #[error("airport-list entry size {0} bytes is not one of {{33, 36, 40, 41}}")]
    UnknownEntrySize(usize),

    #[error("cancelled")]
    Cancelled,
}

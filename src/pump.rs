//! The message pump. A single blocking-thread task that owns the poll
//! loop: copy before yield, classify, forward without ever stalling on a
//! full channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::HeartbeatFrequency;
use crate::error::Error;
use crate::host::{ConnectionHandle, HostBinding};
use crate::packet::{peek_event_id, ClassifiedMessage, Discriminant};
use crate::pool::BufferPool;

/// Reserved, high-numbered event identifiers the pump itself owns. The
/// application layer must not reuse these when mapping its own client or
/// system events.
pub const HEARTBEAT_EVENT_ID: u32 = 0xFFFF_0001;
pub const PAUSE_EVENT_ID: u32 = 0xFFFF_0002;
pub const SIM_RUNNING_EVENT_ID: u32 = 0xFFFF_0003;
pub const SOUND_EVENT_ID: u32 = 0xFFFF_0004;
pub const CRASHED_EVENT_ID: u32 = 0xFFFF_0005;
pub const CRASH_RESET_EVENT_ID: u32 = 0xFFFF_0006;
pub const VIEW_EVENT_ID: u32 = 0xFFFF_0007;
pub const SIM_STATE_CHANGE_EVENT_ID: u32 = 0xFFFF_0008;

const EMPTY_POLL_YIELD: Duration = Duration::from_millis(1);

/// Notifications the pump sends to the connection manager as it observes
/// open/quit packets. The manager owns what these mean for the state
/// machine; the pump only reports what it saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpSignal {
    Available,
    Terminated,
}

/// Counters exposed for telemetry. `dropped` is the running total of
/// messages dropped because the outbound channel was full.
#[derive(Default)]
pub struct PumpMetrics {
    pub dropped: AtomicU64,
}

fn subscribe_reserved(host: &dyn HostBinding, handle: ConnectionHandle, heartbeat: HeartbeatFrequency) -> Result<(), Error> {
    host.subscribe_to_system_event(handle, HEARTBEAT_EVENT_ID, heartbeat.event_name())?;
    host.subscribe_to_system_event(handle, PAUSE_EVENT_ID, "Pause")?;
    host.subscribe_to_system_event(handle, SIM_RUNNING_EVENT_ID, "Sim")?;
    host.subscribe_to_system_event(handle, SOUND_EVENT_ID, "Sound")?;
    host.subscribe_to_system_event(handle, CRASHED_EVENT_ID, "Crashed")?;
    host.subscribe_to_system_event(handle, CRASH_RESET_EVENT_ID, "CrashReset")?;
    host.subscribe_to_system_event(handle, VIEW_EVENT_ID, "View")?;
    host.subscribe_to_system_event(handle, SIM_STATE_CHANGE_EVENT_ID, "SimState")?;
    Ok(())
}

fn is_heartbeat(payload: &[u8]) -> bool {
    peek_event_id(payload) == Some(HEARTBEAT_EVENT_ID)
}

/// Spawns the pump on a dedicated blocking thread (the native procedures are
/// synchronous FFI, so a blocking task mirrors a dedicated OS thread rather
/// than starving the async runtime). Returns the join handle and the shared
/// drop-counter.
pub fn spawn(
    host: Arc<dyn HostBinding>,
    handle: ConnectionHandle,
    pool: BufferPool,
    heartbeat: HeartbeatFrequency,
    outbound: mpsc::Sender<ClassifiedMessage>,
    signals: mpsc::UnboundedSender<PumpSignal>,
    cancel: CancellationToken,
) -> (JoinHandle<()>, Arc<PumpMetrics>) {
    let metrics = Arc::new(PumpMetrics::default());
    let metrics_for_task = metrics.clone();

    let join = tokio::task::spawn_blocking(move || {
        if let Err(err) = subscribe_reserved(host.as_ref(), handle, heartbeat) {
            tracing::warn!(%err, "failed to subscribe reserved pump events");
        }

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match host.poll_raw(handle) {
                Ok(None) => {
                    std::thread::sleep(EMPTY_POLL_YIELD);
                    continue;
                }
                Ok(Some(bytes)) => {
                    // The host binding already copied these bytes out of
                    // its own buffer; draw a pooled slot for them here so
                    // later pipeline stages get the pool's reuse benefit.
                    let buffer = pool.acquire(&bytes);
                    let message = ClassifiedMessage::from_buffer(buffer);
                    let discriminant = message.discriminant();

                    match discriminant {
                        Some(Discriminant::Event) if is_heartbeat(message.payload()) => {
                            tracing::trace!("dropped heartbeat");
                            continue;
                        }
                        Some(Discriminant::Open) => {
                            let _ = signals.send(PumpSignal::Available);
                            forward(&outbound, &metrics_for_task, message);
                        }
                        Some(Discriminant::Quit) => {
                            forward(&outbound, &metrics_for_task, message);
                            let _ = signals.send(PumpSignal::Terminated);
                            break;
                        }
                        Some(Discriminant::Exception) => {
                            tracing::warn!("host posted an exception packet");
                            forward(&outbound, &metrics_for_task, message);
                        }
                        _ => forward(&outbound, &metrics_for_task, message),
                    }
                }
                Err(err) => {
                    tracing::warn!(%err, "poll failed");
                    let message = ClassifiedMessage::from_poll_error(err);
                    forward(&outbound, &metrics_for_task, message);
                }
            }
        }

        // Shutdown: drain one final poll so a message queued between the
        // cancellation check and the last successful poll isn't lost.
        if let Ok(Some(bytes)) = host.poll_raw(handle) {
            let buffer = pool.acquire(&bytes);
            forward(&outbound, &metrics_for_task, ClassifiedMessage::from_buffer(buffer));
        }
        let _ = signals.send(PumpSignal::Terminated);
    });

    (join, metrics)
}

fn forward(outbound: &mpsc::Sender<ClassifiedMessage>, metrics: &PumpMetrics, message: ClassifiedMessage) {
    if outbound.try_send(message).is_err() {
        metrics.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::stub::StubHost;
    use byteorder::{ByteOrder, LittleEndian};

    fn event_packet(event_id: u32) -> Vec<u8> {
        let mut buf = vec![0u8; 20];
        LittleEndian::write_u32(&mut buf[0..4], 20);
        LittleEndian::write_u32(&mut buf[4..8], 1);
        LittleEndian::write_u32(&mut buf[8..12], 2); // Event discriminant
        LittleEndian::write_u32(&mut buf[16..20], event_id);
        buf
    }

    fn quit_packet() -> Vec<u8> {
        let mut buf = vec![0u8; 12];
        LittleEndian::write_u32(&mut buf[0..4], 12);
        LittleEndian::write_u32(&mut buf[4..8], 1);
        LittleEndian::write_u32(&mut buf[8..12], 1); // Quit discriminant
        buf
    }

    #[tokio::test]
    async fn heartbeat_is_dropped_and_others_forwarded() {
        let host = Arc::new(StubHost::new());
        let handle = host.attach("test").unwrap();
        host.enqueue_packet(event_packet(HEARTBEAT_EVENT_ID));
        host.enqueue_packet(event_packet(999));
        host.enqueue_packet(quit_packet());

        let pool = BufferPool::new();
        let (outbound_tx, mut outbound_rx) = mpsc::channel(16);
        let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let (join, _metrics) = spawn(
            host.clone(),
            handle,
            pool,
            HeartbeatFrequency::Hz6,
            outbound_tx,
            signal_tx,
            cancel.clone(),
        );

        let first = outbound_rx.recv().await.unwrap();
        assert_eq!(first.discriminant(), Some(Discriminant::Event));
        let second = outbound_rx.recv().await.unwrap();
        assert_eq!(second.discriminant(), Some(Discriminant::Quit));
        assert_eq!(signal_rx.recv().await, Some(PumpSignal::Terminated));

        join.await.unwrap();
    }

    #[tokio::test]
    async fn full_channel_increments_drop_counter() {
        let host = Arc::new(StubHost::new());
        let handle = host.attach("test").unwrap();
        for _ in 0..5 {
            host.enqueue_packet(event_packet(1));
        }

        let pool = BufferPool::new();
        let (outbound_tx, outbound_rx) = mpsc::channel(1);
        let (signal_tx, _signal_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let (_join, metrics) = spawn(host, handle, pool, HeartbeatFrequency::Hz6, outbound_tx, signal_tx, cancel.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        drop(outbound_rx);

        assert!(metrics.dropped.load(Ordering::Relaxed) > 0);
    }
}

//! Subscription & event router. Single task that drains the pump's
//! outbound channel and fans each message out to callbacks (synchronous,
//! registration order) and channel subscriptions (non-blocking, drop on
//! full).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::definition::read_fixed_string;
use crate::error::Result;
use crate::host::{ConnectionHandle, HostBinding};
use crate::packet::{peek_event_id, ClassifiedMessage, Discriminant};

/// Logical event kinds a callback or subscription can be registered
/// against. `RawMessage` sees every packet; the rest are decoded from a
/// narrower set of discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Pause,
    SimRunning,
    Sound,
    Crashed,
    CrashReset,
    View,
    SimStateChange,
    FlightLoaded,
    AircraftLoaded,
    FlightPlanActivated,
    FlightPlanDeactivated,
    ObjectAdded,
    ObjectRemoved,
    Open,
    Quit,
    Exception,
    RawMessage,
}

/// A registered callback's body. One variant per payload shape; `Raw` and
/// `Unit` need no decoding, the rest interpret the packet's tail according
/// to the event kind they're bound to.
pub enum Callback {
    Raw(Box<dyn Fn(&ClassifiedMessage) + Send + Sync>),
    Bool(Box<dyn Fn(bool) + Send + Sync>),
    Text(Box<dyn Fn(&str) + Send + Sync>),
    Object(Box<dyn Fn(u32, u32) + Send + Sync>),
    Unit(Box<dyn Fn() + Send + Sync>),
    Exception(Box<dyn Fn(u32, u32, u32) + Send + Sync>),
}

struct RegisteredCallback {
    kind: EventKind,
    callback: Callback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Discriminant(Discriminant),
    RequestId(u32),
    EventId(u32),
}

struct SubscriptionEntry {
    sender: mpsc::Sender<ClassifiedMessage>,
    filter: Filter,
    dropped: Arc<AtomicU64>,
    done: CancellationToken,
}

/// Handed back to the caller of `subscribe`. Dropping it does not
/// unsubscribe; call [`Router::unsubscribe`] explicitly or watch `done`.
pub struct Subscription {
    pub name: String,
    pub receiver: mpsc::Receiver<ClassifiedMessage>,
    pub done: CancellationToken,
    pub dropped: Arc<AtomicU64>,
}

const DEFAULT_BUFFER_DEPTH: usize = 16;

#[derive(Default)]
struct RouterState {
    callbacks: HashMap<Uuid, RegisteredCallback>,
    named_events: HashMap<u32, EventKind>,
    subscriptions: HashMap<String, SubscriptionEntry>,
    /// Application-registered system-event subscriptions, keyed by event
    /// id, replayed on every re-entry into `available` since the host
    /// forgets them across a reconnect. The four reserved ids the pump
    /// itself owns are replayed independently, by `pump::subscribe_reserved`
    /// on every respawn, and are never recorded here.
    system_subscriptions: HashMap<u32, String>,
    /// Application-registered client-event-to-sim-event mappings, replayed
    /// the same way.
    client_event_mappings: HashMap<u32, String>,
}

/// Owns the consumer registries. Read-heavy (routing); writes only happen
/// on (un)registration.
#[derive(Default)]
pub struct Router {
    state: RwLock<RouterState>,
}

impl Router {
    pub fn new() -> Arc<Self> {
        let router = Arc::new(Self::default());
        router.bind_named_event(crate::pump::PAUSE_EVENT_ID, EventKind::Pause);
        router.bind_named_event(crate::pump::SIM_RUNNING_EVENT_ID, EventKind::SimRunning);
        router.bind_named_event(crate::pump::SOUND_EVENT_ID, EventKind::Sound);
        router.bind_named_event(crate::pump::CRASHED_EVENT_ID, EventKind::Crashed);
        router.bind_named_event(crate::pump::CRASH_RESET_EVENT_ID, EventKind::CrashReset);
        router.bind_named_event(crate::pump::VIEW_EVENT_ID, EventKind::View);
        router.bind_named_event(crate::pump::SIM_STATE_CHANGE_EVENT_ID, EventKind::SimStateChange);
        router
    }

    /// Associates a system-event id the application subscribed to (via
    /// `subscribe_to_system_event`) with one of the named event kinds so
    /// the router can decode and dispatch it. Pause/sim/sound are bound by
    /// default at construction.
    pub fn bind_named_event(&self, event_id: u32, kind: EventKind) {
        self.state.write().named_events.insert(event_id, kind);
    }

    pub fn on(&self, kind: EventKind, callback: Callback) -> Uuid {
        let id = Uuid::new_v4();
        self.state.write().callbacks.insert(id, RegisteredCallback { kind, callback });
        id
    }

    pub fn remove_handler(&self, id: Uuid) {
        self.state.write().callbacks.remove(&id);
    }

    /// `depth <= 0` substitutes the default depth of 16.
    pub fn subscribe(&self, name: impl Into<String>, depth: isize, filter: Filter) -> Subscription {
        let name = name.into();
        let depth = if depth <= 0 { DEFAULT_BUFFER_DEPTH } else { depth as usize };
        let (tx, rx) = mpsc::channel(depth);
        let done = CancellationToken::new();
        let dropped = Arc::new(AtomicU64::new(0));

        self.state.write().subscriptions.insert(
            name.clone(),
            SubscriptionEntry { sender: tx, filter, dropped: dropped.clone(), done: done.clone() },
        );

        Subscription { name, receiver: rx, done, dropped }
    }

    pub fn unsubscribe(&self, name: &str) {
        if let Some(entry) = self.state.write().subscriptions.remove(name) {
            entry.done.cancel();
        }
    }

    /// Records an application-issued system-event subscription so it can be
    /// replayed on the next reconnect. The four reserved ids the pump owns
    /// are never passed here; the pump re-subscribes those itself.
    pub fn record_system_subscription(&self, event_id: u32, name: impl Into<String>) {
        self.state.write().system_subscriptions.insert(event_id, name.into());
    }

    pub fn forget_system_subscription(&self, event_id: u32) {
        self.state.write().system_subscriptions.remove(&event_id);
    }

    /// Records an application-issued client-event-to-sim-event mapping so
    /// it can be replayed on the next reconnect.
    pub fn record_client_event_mapping(&self, event_id: u32, name: impl Into<String>) {
        self.state.write().client_event_mappings.insert(event_id, name.into());
    }

    /// Re-issues every recorded system-event subscription and client-event
    /// mapping against the host. Called once per re-entry into `available`,
    /// since the host has no memory of either across a reconnect.
    pub fn resubscribe_all(&self, host: &dyn HostBinding, handle: ConnectionHandle) -> Result<()> {
        let (system, client) = {
            let state = self.state.read();
            (
                state.system_subscriptions.iter().map(|(id, name)| (*id, name.clone())).collect::<Vec<_>>(),
                state.client_event_mappings.iter().map(|(id, name)| (*id, name.clone())).collect::<Vec<_>>(),
            )
        };
        for (event_id, name) in system {
            host.subscribe_to_system_event(handle, event_id, &name)?;
        }
        for (event_id, name) in client {
            host.map_client_event_to_sim_event(handle, event_id, &name)?;
        }
        Ok(())
    }

    /// Dispatches one message: raw callbacks, typed callbacks, then every
    /// matching channel subscription, in that order, all before returning.
    /// The message is released (its pooled buffer reclaimed) at the end.
    pub fn dispatch(&self, mut message: ClassifiedMessage) {
        self.dispatch_callbacks(&message);
        self.dispatch_subscriptions(&message);
        message.release();
    }

    fn dispatch_callbacks(&self, message: &ClassifiedMessage) {
        let state = self.state.read();
        for registered in state.callbacks.values() {
            if registered.kind == EventKind::RawMessage {
                if let Callback::Raw(f) = &registered.callback {
                    f(message);
                }
            }
        }

        let Some(discriminant) = message.discriminant() else { return };
        match discriminant {
            Discriminant::Open => invoke_unit(&state, EventKind::Open),
            Discriminant::Quit => invoke_unit(&state, EventKind::Quit),
            Discriminant::Exception => {
                if let Some((code, send_id, index)) = decode_exception(message.payload()) {
                    tracing::warn!(code, send_id, index, "host exception");
                    for registered in state.callbacks.values() {
                        if registered.kind == EventKind::Exception {
                            if let Callback::Exception(f) = &registered.callback {
                                f(code, send_id, index);
                            }
                        }
                    }
                }
            }
            Discriminant::Event => {
                if let Some(event_id) = peek_event_id(message.payload()) {
                    if let Some(&kind) = state.named_events.get(&event_id) {
                        match kind {
                            EventKind::Crashed | EventKind::CrashReset => invoke_unit(&state, kind),
                            _ => {
                                if let Some(data) = decode_event_data(message.payload()) {
                                    invoke_bool(&state, kind, data != 0);
                                }
                            }
                        }
                    }
                }
            }
            Discriminant::EventFilename => {
                if let Some((event_id, text)) = decode_event_filename(message.payload()) {
                    if let Some(&kind) = state.named_events.get(&event_id) {
                        invoke_text(&state, kind, &text);
                    }
                }
            }
            Discriminant::EventObjectAddRemove => {
                if let Some((event_id, object_id, type_tag)) = decode_object_add_remove(message.payload()) {
                    if let Some(&kind) = state.named_events.get(&event_id) {
                        invoke_object(&state, kind, object_id, type_tag);
                    }
                }
            }
            _ => {}
        }
    }

    fn dispatch_subscriptions(&self, message: &ClassifiedMessage) {
        let mut to_remove = Vec::new();
        let state = self.state.read();
        for (name, entry) in state.subscriptions.iter() {
            if entry.done.is_cancelled() {
                to_remove.push(name.clone());
                continue;
            }
            if !matches(entry.filter, message) {
                continue;
            }
            if entry.sender.try_send(message.clone()).is_err() {
                entry.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(subscription = %name, "dropped message on full channel");
            }
        }
        drop(state);
        if !to_remove.is_empty() {
            let mut state = self.state.write();
            for name in to_remove {
                state.subscriptions.remove(&name);
            }
        }
    }
}

fn matches(filter: Filter, message: &ClassifiedMessage) -> bool {
    match filter {
        Filter::Discriminant(d) => message.discriminant() == Some(d),
        Filter::RequestId(id) => peek_request_id(message.payload()) == Some(id),
        Filter::EventId(id) => peek_event_id(message.payload()) == Some(id),
    }
}

/// Most request-correlated packets carry the request-id as the first word
/// of their payload.
fn peek_request_id(payload: &[u8]) -> Option<u32> {
    if payload.len() < 4 {
        return None;
    }
    Some(LittleEndian::read_u32(&payload[0..4]))
}

fn decode_event_data(payload: &[u8]) -> Option<u32> {
    if payload.len() < 12 {
        return None;
    }
    Some(LittleEndian::read_u32(&payload[8..12]))
}

fn decode_exception(payload: &[u8]) -> Option<(u32, u32, u32)> {
    if payload.len() < 12 {
        return None;
    }
    Some((
        LittleEndian::read_u32(&payload[0..4]),
        LittleEndian::read_u32(&payload[4..8]),
        LittleEndian::read_u32(&payload[8..12]),
    ))
}

fn decode_event_filename(payload: &[u8]) -> Option<(u32, String)> {
    if payload.len() < 4 {
        return None;
    }
    let event_id = LittleEndian::read_u32(&payload[0..4]);
    Some((event_id, read_fixed_string(&payload[4..])))
}

fn decode_object_add_remove(payload: &[u8]) -> Option<(u32, u32, u32)> {
    if payload.len() < 12 {
        return None;
    }
    Some((
        LittleEndian::read_u32(&payload[0..4]),
        LittleEndian::read_u32(&payload[4..8]),
        LittleEndian::read_u32(&payload[8..12]),
    ))
}

fn invoke_unit(state: &RouterState, kind: EventKind) {
    for registered in state.callbacks.values() {
        if registered.kind == kind {
            if let Callback::Unit(f) = &registered.callback {
                f();
            }
        }
    }
}

fn invoke_bool(state: &RouterState, kind: EventKind, value: bool) {
    for registered in state.callbacks.values() {
        if registered.kind == kind {
            if let Callback::Bool(f) = &registered.callback {
                f(value);
            }
        }
    }
}

fn invoke_text(state: &RouterState, kind: EventKind, value: &str) {
    for registered in state.callbacks.values() {
        if registered.kind == kind {
            if let Callback::Text(f) = &registered.callback {
                f(value);
            }
        }
    }
}

fn invoke_object(state: &RouterState, kind: EventKind, object_id: u32, type_tag: u32) {
    for registered in state.callbacks.values() {
        if registered.kind == kind {
            if let Callback::Object(f) = &registered.callback {
                f(object_id, type_tag);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::BufferPool;
    use std::sync::atomic::AtomicBool;

    fn event_message(event_id: u32, data: u32) -> ClassifiedMessage {
        // header(12) + { group_id u32, event_id u32, data u32 }
        let mut buf = vec![0u8; 24];
        LittleEndian::write_u32(&mut buf[0..4], 24);
        LittleEndian::write_u32(&mut buf[4..8], 1);
        LittleEndian::write_u32(&mut buf[8..12], 2); // Event
        LittleEndian::write_u32(&mut buf[16..20], event_id);
        LittleEndian::write_u32(&mut buf[20..24], data);
        let pool = BufferPool::new();
        ClassifiedMessage::from_buffer(pool.acquire(&buf))
    }

    #[test]
    fn pause_callback_fires_and_removal_silences_it() {
        let router = Router::new();
        let seen = Arc::new(AtomicBool::new(false));
        let seen2 = seen.clone();
        let id = router.on(EventKind::Pause, Callback::Bool(Box::new(move |paused| seen2.store(paused, Ordering::SeqCst))));

        router.dispatch(event_message(crate::pump::PAUSE_EVENT_ID, 1));
        assert!(seen.load(Ordering::SeqCst));

        seen.store(false, Ordering::SeqCst);
        router.remove_handler(id);
        router.dispatch(event_message(crate::pump::PAUSE_EVENT_ID, 1));
        assert!(!seen.load(Ordering::SeqCst));
    }

    #[test]
    fn subscription_drops_on_full_channel() {
        let router = Router::new();
        let sub = router.subscribe("pauses", 1, Filter::EventId(crate::pump::PAUSE_EVENT_ID));

        router.dispatch(event_message(crate::pump::PAUSE_EVENT_ID, 1));
        router.dispatch(event_message(crate::pump::PAUSE_EVENT_ID, 0));
        router.dispatch(event_message(crate::pump::PAUSE_EVENT_ID, 1));

        assert_eq!(sub.dropped.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn unsubscribe_removes_entry_lazily() {
        let router = Router::new();
        let sub = router.subscribe("pauses", 4, Filter::EventId(crate::pump::PAUSE_EVENT_ID));
        router.unsubscribe(&sub.name);
        assert!(sub.done.is_cancelled());
        // Next dispatch lazily drops the cancelled subscription.
        router.dispatch(event_message(crate::pump::PAUSE_EVENT_ID, 1));
        assert!(router.state.read().subscriptions.is_empty());
    }

    #[test]
    fn default_depth_is_substituted_for_non_positive() {
        let router = Router::new();
        let sub = router.subscribe("x", 0, Filter::EventId(1));
        assert_eq!(sub.receiver.capacity(), DEFAULT_BUFFER_DEPTH);
    }
}

//! The connection manager. Owns the state machine, drives the attach
//! retry loop, and rebuilds the pump/router pair on every (re)connect.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ConnectOptions;
use crate::definition::DefinitionRegistry;
use crate::error::{Error, Result};
use crate::fleet::Fleet;
use crate::host::{ConnectionHandle, HostBinding};
use crate::packet::ClassifiedMessage;
use crate::pool::BufferPool;
use crate::pump::{self, PumpSignal};
use crate::router::Router;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Connected,
    Available,
    Reconnecting,
}

#[derive(Default, Clone, Copy)]
struct SecondaryState {
    paused: bool,
    sim_running: bool,
    sound_on: bool,
}

struct ManagerState {
    conn: ConnState,
    handle: ConnectionHandle,
    secondary: SecondaryState,
    pump_task: Option<JoinHandle<()>>,
    router_task: Option<JoinHandle<()>>,
}

/// Callback fired after every committed state transition, outside the
/// manager's lock, with `(old, new)`.
pub type StateObserver = Box<dyn Fn(ConnState, ConnState) + Send + Sync>;

/// Callback fired every time the connection (re-)enters `available`,
/// outside the manager's lock.
pub type AvailableHook = Box<dyn Fn() + Send + Sync>;

/// Drives attach/available/reconnect for one logical connection. Holds the
/// registries it must republish on reconnect (definitions) and invalidate
/// (the fleet).
pub struct ConnectionManager {
    state: Mutex<ManagerState>,
    observers: Mutex<Vec<StateObserver>>,
    available_hooks: Mutex<Vec<AvailableHook>>,
    host: Arc<dyn HostBinding>,
    pool: BufferPool,
    router: Arc<Router>,
    definitions: Arc<DefinitionRegistry>,
    fleet: Arc<Fleet>,
    options: ConnectOptions,
    app_name: String,
}

impl ConnectionManager {
    pub fn new(
        host: Arc<dyn HostBinding>,
        router: Arc<Router>,
        definitions: Arc<DefinitionRegistry>,
        fleet: Arc<Fleet>,
        options: ConnectOptions,
        app_name: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ManagerState {
                conn: ConnState::Disconnected,
                handle: ConnectionHandle::ZERO,
                secondary: SecondaryState::default(),
                pump_task: None,
                router_task: None,
            }),
            observers: Mutex::new(Vec::new()),
            available_hooks: Mutex::new(Vec::new()),
            host,
            pool: BufferPool::new(),
            router,
            definitions,
            fleet,
            options,
            app_name: app_name.into(),
        })
    }

    pub fn state(&self) -> ConnState {
        self.state.lock().conn
    }

    pub fn on_state_change(&self, observer: StateObserver) {
        self.observers.lock().push(observer);
    }

    /// Registers a hook re-invoked on every (re-)entry into `available`,
    /// after definitions are redeclared and channels/callbacks are
    /// re-subscribed.
    pub fn on_available(&self, hook: AvailableHook) {
        self.available_hooks.lock().push(hook);
    }

    fn transition(&self, new: ConnState) {
        let old = {
            let mut state = self.state.lock();
            let old = state.conn;
            state.conn = new;
            old
        };
        if old == new {
            return;
        }
        tracing::info!(?old, ?new, "connection state transition");
        for observer in self.observers.lock().iter() {
            observer(old, new);
        }
    }

    /// Attaches, retrying with a fixed back-off until success or the root
    /// cancel fires. Spawns the pump and router tasks on success.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        self.transition(ConnState::Connecting);
        loop {
            if self.options.cancel.is_cancelled() {
                self.transition(ConnState::Disconnected);
                return Err(Error::Cancelled);
            }
            match self.host.attach(&self.app_name) {
                Ok(handle) => {
                    self.state.lock().handle = handle;
                    self.transition(ConnState::Connected);
                    self.spawn_tasks(handle);
                    return Ok(());
                }
                Err(err) => {
                    tracing::warn!(%err, "attach failed, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(crate::config::ATTACH_BACKOFF) => {}
                        _ = self.options.cancel.cancelled() => {
                            self.transition(ConnState::Disconnected);
                            return Err(Error::Cancelled);
                        }
                    }
                }
            }
        }
    }

    fn spawn_tasks(self: &Arc<Self>, handle: ConnectionHandle) {
        let (outbound_tx, outbound_rx) = mpsc::channel::<ClassifiedMessage>(self.options.default_buffer_depth);
        let (signal_tx, signal_rx) = mpsc::unbounded_channel::<PumpSignal>();

        let (pump_task, _metrics) = pump::spawn(
            self.host.clone(),
            handle,
            self.pool.clone(),
            self.options.heartbeat,
            outbound_tx,
            signal_tx,
            self.options.cancel.clone(),
        );

        let router = self.router.clone();
        let router_task = tokio::spawn(router_loop(router, outbound_rx));

        let this = Arc::clone(self);
        tokio::spawn(async move { this.watch_signals(signal_rx).await });

        let mut state = self.state.lock();
        state.pump_task = Some(pump_task);
        state.router_task = Some(router_task);
    }

    async fn watch_signals(self: Arc<Self>, mut signals: mpsc::UnboundedReceiver<PumpSignal>) {
        while let Some(signal) = signals.recv().await {
            match signal {
                PumpSignal::Available => self.enter_available(),
                PumpSignal::Terminated => {
                    if self.options.cancel.is_cancelled() {
                        self.transition(ConnState::Disconnected);
                    } else {
                        self.reconnect().await;
                    }
                    break;
                }
            }
        }
    }

    fn enter_available(self: &Arc<Self>) {
        let handle = self.state.lock().handle;
        self.transition(ConnState::Available);
        if let Err(err) = self.definitions.redeclare_all(self.host.as_ref(), handle) {
            tracing::warn!(%err, "failed to redeclare definitions on becoming available");
        }
        if let Err(err) = self.router.resubscribe_all(self.host.as_ref(), handle) {
            tracing::warn!(%err, "failed to re-subscribe events on becoming available");
        }
        for hook in self.available_hooks.lock().iter() {
            hook();
        }
    }

    /// Invalidates the fleet and every outstanding identifier, then
    /// re-enters `connecting`.
    async fn reconnect(self: &Arc<Self>) {
        self.transition(ConnState::Reconnecting);
        self.fleet.clear();
        if self.options.cancel.is_cancelled() {
            self.transition(ConnState::Disconnected);
            return;
        }
        let _ = self.connect().await;
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.state.lock().handle
    }

    pub fn mark_paused(&self, paused: bool) {
        self.state.lock().secondary.paused = paused;
    }

    pub fn mark_sim_running(&self, running: bool) {
        self.state.lock().secondary.sim_running = running;
    }

    pub fn mark_sound_on(&self, on: bool) {
        self.state.lock().secondary.sound_on = on;
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().secondary.paused
    }

    pub fn is_sim_running(&self) -> bool {
        self.state.lock().secondary.sim_running
    }
}

async fn router_loop(router: Arc<Router>, mut outbound_rx: mpsc::Receiver<ClassifiedMessage>) {
    while let Some(message) = outbound_rx.recv().await {
        router.dispatch(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::stub::StubHost;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager(host: Arc<StubHost>) -> Arc<ConnectionManager> {
        ConnectionManager::new(
            host,
            Router::new(),
            DefinitionRegistry::new(),
            Arc::new(Fleet::new()),
            ConnectOptions::default(),
            "test-app",
        )
    }

    #[tokio::test]
    async fn connect_transitions_to_connected() {
        let host = Arc::new(StubHost::new());
        let manager = manager(host);
        manager.connect().await.unwrap();
        assert_eq!(manager.state(), ConnState::Connected);
    }

    #[tokio::test]
    async fn observers_see_every_transition() {
        let host = Arc::new(StubHost::new());
        let manager = manager(host);
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        manager.on_state_change(Box::new(move |_old, _new| {
            seen2.fetch_add(1, Ordering::SeqCst);
        }));
        manager.connect().await.unwrap();
        assert!(seen.load(Ordering::SeqCst) >= 2); // Connecting, Connected
    }
}

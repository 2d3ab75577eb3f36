//! Top-level facade: one struct owning the connection manager and the
//! registries applications actually call into.

use std::sync::Arc;

use uuid::Uuid;

use crate::config::ConnectOptions;
use crate::connection::{AvailableHook, ConnState, ConnectionManager, StateObserver};
use crate::definition::{Dataset, DefinitionRegistry};
use crate::error::{Error, Result};
use crate::facility::FacilityDefinitionBuilder;
use crate::fleet::{AircraftHandle, CreateOptions, Fleet, Waypoint};
use crate::host::HostBinding;
use crate::packet::ClassifiedMessage;
use crate::router::{Callback, EventKind, Filter, Router, Subscription};

/// Owns everything an application needs: the connection manager, the
/// dataset registry, the AI fleet, and the router's registration surface.
pub struct SimClient {
    manager: Arc<ConnectionManager>,
    router: Arc<Router>,
    definitions: Arc<DefinitionRegistry>,
    fleet: Arc<Fleet>,
    host: Arc<dyn HostBinding>,
}

impl SimClient {
    /// Builds a client over an arbitrary [`HostBinding`] without attaching.
    /// Used directly in tests (with `StubHost`) and internally by
    /// [`attach`](Self::attach) on Windows.
    pub fn with_host(host: Arc<dyn HostBinding>, options: ConnectOptions, app_name: impl Into<String>) -> Arc<Self> {
        let router = Router::new();
        let definitions = DefinitionRegistry::new();
        let fleet = Arc::new(Fleet::new());
        let manager = ConnectionManager::new(host.clone(), router.clone(), definitions.clone(), fleet.clone(), options, app_name);
        Arc::new(Self { manager, router, definitions, fleet, host })
    }

    /// Locates and loads `SimConnect.dll`, then attaches, retrying until
    /// success or cancellation.
    #[cfg(windows)]
    pub async fn attach(options: ConnectOptions, app_name: impl Into<String>) -> Result<Arc<Self>> {
        let path = crate::host::native::locate_library(&options)?;
        let host: Arc<dyn HostBinding> = Arc::new(crate::host::native::NativeHost::open(&path)?);
        let client = Self::with_host(host, options, app_name);
        client.manager.connect().await?;
        Ok(client)
    }

    pub fn state(&self) -> ConnState {
        self.manager.state()
    }

    pub fn on_state_change(&self, observer: StateObserver) {
        self.manager.on_state_change(observer);
    }

    pub fn on_available(&self, hook: AvailableHook) {
        self.manager.on_available(hook);
    }

    pub async fn connect(&self) -> Result<()> {
        self.manager.connect().await
    }

    // -- callback registration -------------------------------------

    pub fn on_raw_message(&self, f: impl Fn(&ClassifiedMessage) + Send + Sync + 'static) -> Uuid {
        self.router.on(EventKind::RawMessage, Callback::Raw(Box::new(f)))
    }

    pub fn on_pause(&self, f: impl Fn(bool) + Send + Sync + 'static) -> Uuid {
        self.router.on(EventKind::Pause, Callback::Bool(Box::new(f)))
    }

    pub fn on_sim_running(&self, f: impl Fn(bool) + Send + Sync + 'static) -> Uuid {
        self.router.on(EventKind::SimRunning, Callback::Bool(Box::new(f)))
    }

    pub fn on_sound(&self, f: impl Fn(bool) + Send + Sync + 'static) -> Uuid {
        self.router.on(EventKind::Sound, Callback::Bool(Box::new(f)))
    }

    pub fn on_open(&self, f: impl Fn() + Send + Sync + 'static) -> Uuid {
        self.router.on(EventKind::Open, Callback::Unit(Box::new(f)))
    }

    pub fn on_quit(&self, f: impl Fn() + Send + Sync + 'static) -> Uuid {
        self.router.on(EventKind::Quit, Callback::Unit(Box::new(f)))
    }

    pub fn on_exception(&self, f: impl Fn(u32, u32, u32) + Send + Sync + 'static) -> Uuid {
        self.router.on(EventKind::Exception, Callback::Exception(Box::new(f)))
    }

    pub fn on_crashed(&self, f: impl Fn() + Send + Sync + 'static) -> Uuid {
        self.router.on(EventKind::Crashed, Callback::Unit(Box::new(f)))
    }

    pub fn on_crash_reset(&self, f: impl Fn() + Send + Sync + 'static) -> Uuid {
        self.router.on(EventKind::CrashReset, Callback::Unit(Box::new(f)))
    }

    pub fn on_view(&self, f: impl Fn(bool) + Send + Sync + 'static) -> Uuid {
        self.router.on(EventKind::View, Callback::Bool(Box::new(f)))
    }

    pub fn on_sim_state_change(&self, f: impl Fn(bool) + Send + Sync + 'static) -> Uuid {
        self.router.on(EventKind::SimStateChange, Callback::Bool(Box::new(f)))
    }

    pub fn on_flight_loaded(&self, f: impl Fn(&str) + Send + Sync + 'static) -> Uuid {
        self.router.on(EventKind::FlightLoaded, Callback::Text(Box::new(f)))
    }

    pub fn on_aircraft_loaded(&self, f: impl Fn(&str) + Send + Sync + 'static) -> Uuid {
        self.router.on(EventKind::AircraftLoaded, Callback::Text(Box::new(f)))
    }

    pub fn on_flight_plan_activated(&self, f: impl Fn(&str) + Send + Sync + 'static) -> Uuid {
        self.router.on(EventKind::FlightPlanActivated, Callback::Text(Box::new(f)))
    }

    pub fn on_flight_plan_deactivated(&self, f: impl Fn(&str) + Send + Sync + 'static) -> Uuid {
        self.router.on(EventKind::FlightPlanDeactivated, Callback::Text(Box::new(f)))
    }

    pub fn on_object_added(&self, f: impl Fn(u32, u32) + Send + Sync + 'static) -> Uuid {
        self.router.on(EventKind::ObjectAdded, Callback::Object(Box::new(f)))
    }

    pub fn on_object_removed(&self, f: impl Fn(u32, u32) + Send + Sync + 'static) -> Uuid {
        self.router.on(EventKind::ObjectRemoved, Callback::Object(Box::new(f)))
    }

    /// Associates a non-reserved event id the application subscribed or
    /// mapped itself with one of the named event kinds, so `on_*`
    /// registrations for it actually fire. Reserved ids (pause, sim-running,
    /// sound, crashed, crash-reset, view, sim-state-change) are bound
    /// automatically and must not be passed here.
    pub fn bind_named_event(&self, event_id: u32, kind: EventKind) {
        self.router.bind_named_event(event_id, kind);
    }

    pub fn remove_handler(&self, id: Uuid) {
        self.router.remove_handler(id);
    }

    pub fn subscribe(&self, name: impl Into<String>, depth: isize, filter: Filter) -> Subscription {
        self.router.subscribe(name, depth, filter)
    }

    pub fn unsubscribe(&self, name: &str) {
        self.router.unsubscribe(name);
    }

    // -- client/system events --------------------------------------------

    pub fn subscribe_to_system_event(&self, event_id: u32, name: &str) -> Result<()> {
        self.host.subscribe_to_system_event(self.manager.handle(), event_id, name)?;
        self.router.record_system_subscription(event_id, name);
        Ok(())
    }

    pub fn unsubscribe_from_system_event(&self, event_id: u32) -> Result<()> {
        self.host.unsubscribe_from_system_event(self.manager.handle(), event_id)?;
        self.router.forget_system_subscription(event_id);
        Ok(())
    }

    pub fn map_client_event_to_sim_event(&self, event_id: u32, name: &str) -> Result<()> {
        self.host.map_client_event_to_sim_event(self.manager.handle(), event_id, name)?;
        self.router.record_client_event_mapping(event_id, name);
        Ok(())
    }

    pub fn transmit_client_event(&self, object_id: u32, event_id: u32, data: u32, group_id: u32, flags: u32) -> Result<()> {
        self.host.transmit_client_event(self.manager.handle(), object_id, event_id, data, group_id, flags)
    }

    pub fn transmit_client_event_ex1(
        &self,
        object_id: u32,
        event_id: u32,
        group_id: u32,
        flags: u32,
        data: [u32; 5],
    ) -> Result<()> {
        self.host.transmit_client_event_ex1(self.manager.handle(), object_id, event_id, group_id, flags, data)
    }

    pub fn add_notification_group(&self, group_id: u32, event_id: u32, maskable: bool) -> Result<()> {
        self.host.add_notification_group(self.manager.handle(), group_id, event_id, maskable)
    }

    pub fn clear_notification_group(&self, group_id: u32) -> Result<()> {
        self.host.clear_notification_group(self.manager.handle(), group_id)
    }

    pub fn request_notification_group(&self, group_id: u32, reserved: u32, flags: u32) -> Result<()> {
        self.host.request_notification_group(self.manager.handle(), group_id, reserved, flags)
    }

    pub fn set_notification_group_priority(&self, group_id: u32, priority: u32) -> Result<()> {
        self.host.set_notification_group_priority(self.manager.handle(), group_id, priority)
    }

    // -- facility definitions ---------------------------------------------

    pub fn register_facility_definition(&self, define_id: u32, builder: FacilityDefinitionBuilder) -> Result<()> {
        builder.register(self.host.as_ref(), self.manager.handle(), define_id)
    }

    pub fn request_facilities_list(&self, request_id: u32, kind: &str) -> Result<()> {
        self.host.request_facilities_list(self.manager.handle(), request_id, kind)
    }

    // -- definitions ----------------------------------------------------

    pub fn register_dataset(&self, define_id: u32, dataset: Dataset) -> Result<()> {
        self.definitions.register(self.host.as_ref(), self.manager.handle(), define_id, dataset)
    }

    pub fn clear_dataset(&self, define_id: u32) -> Result<()> {
        self.definitions.clear(self.host.as_ref(), self.manager.handle(), define_id)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn request_data_on_sim_object(
        &self,
        request_id: u32,
        define_id: u32,
        object_id: u32,
        period: i32,
        flags: u32,
        origin: u32,
        interval: u32,
        limit: u32,
    ) -> Result<()> {
        self.host.request_data_on_sim_object(
            self.manager.handle(),
            request_id,
            define_id,
            object_id,
            period,
            flags,
            origin,
            interval,
            limit,
        )
    }

    pub fn decode<T: Copy>(&self, define_id: u32, payload: &[u8]) -> Result<T> {
        self.definitions.decode(define_id, payload)
    }

    // -- fleet ------------------------------------------------------------

    pub fn request_parked(&self, options: CreateOptions, request_id: u32) -> Result<()> {
        self.fleet.request_parked(self.host.as_ref(), self.manager.handle(), options, request_id)
    }

    pub fn request_enroute(&self, options: CreateOptions, request_id: u32) -> Result<()> {
        self.fleet.request_enroute(self.host.as_ref(), self.manager.handle(), options, request_id)
    }

    pub fn request_non_atc(&self, options: CreateOptions, request_id: u32) -> Result<()> {
        self.fleet.request_non_atc(self.host.as_ref(), self.manager.handle(), options, request_id)
    }

    pub fn acknowledge(&self, request_id: u32, object_id: u32) -> Option<AircraftHandle> {
        self.fleet.acknowledge(request_id, object_id)
    }

    pub fn fleet_get(&self, object_id: u32) -> Option<AircraftHandle> {
        self.fleet.get(object_id)
    }

    pub fn fleet_len(&self) -> usize {
        self.fleet.len()
    }

    pub fn release_control(&self, object_id: u32, request_id: u32) -> Result<()> {
        self.fleet.release_control(self.host.as_ref(), self.manager.handle(), object_id, request_id)
    }

    pub fn set_waypoints(&self, define_id: u32, object_id: u32, waypoints: &[Waypoint]) -> Result<()> {
        if waypoints.is_empty() {
            return Err(Error::EmptyWaypoints);
        }
        self.fleet.set_waypoints(self.host.as_ref(), self.manager.handle(), define_id, object_id, waypoints)
    }

    pub fn set_flight_plan(&self, object_id: u32, path: &str, request_id: u32) -> Result<()> {
        self.fleet.set_flight_plan(self.host.as_ref(), self.manager.handle(), object_id, path, request_id)
    }

    pub fn remove_aircraft(&self, object_id: u32, request_id: u32) -> Result<()> {
        self.fleet.remove(self.host.as_ref(), self.manager.handle(), object_id, request_id)
    }

    pub fn remove_all_aircraft(&self) -> Result<()> {
        self.fleet.remove_all(self.host.as_ref(), self.manager.handle())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::stub::StubHost;

    #[tokio::test]
    async fn connects_and_registers_a_dataset() {
        let host = Arc::new(StubHost::new());
        let client = SimClient::with_host(host, ConnectOptions::default(), "test-app");
        client.connect().await.unwrap();
        assert_eq!(client.state(), ConnState::Connected);

        let dataset = Dataset::new(vec![crate::definition::Field::new(
            "CAMERA STATE",
            "",
            crate::definition::ScalarType::Int32,
        )]);
        client.register_dataset(2000, dataset).unwrap();
    }

    #[tokio::test]
    async fn event_and_notification_group_ops_forward_to_host() {
        let host = Arc::new(StubHost::new());
        let client = SimClient::with_host(host.clone(), ConnectOptions::default(), "test-app");
        client.connect().await.unwrap();

        client.map_client_event_to_sim_event(100, "BRAKES").unwrap();
        client.add_notification_group(1, 100, true).unwrap();
        client.set_notification_group_priority(1, 10).unwrap();
        client.transmit_client_event(0, 100, 0, 1, 0).unwrap();

        let calls = host.calls();
        assert!(calls.iter().any(|c| matches!(c, crate::host::stub::RecordedCall::MapClientEventToSimEvent { event_id: 100, .. })));
        assert!(calls.iter().any(|c| matches!(c, crate::host::stub::RecordedCall::AddNotificationGroup { group_id: 1, event_id: 100, maskable: true })));
        assert!(calls.iter().any(|c| matches!(c, crate::host::stub::RecordedCall::SetNotificationGroupPriority { group_id: 1, priority: 10 })));
        assert!(calls.iter().any(|c| matches!(c, crate::host::stub::RecordedCall::TransmitClientEvent { event_id: 100 })));
    }
}

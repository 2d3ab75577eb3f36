//! In-memory stand-in for the native library, used by this crate's own
//! tests and exposed to downstream test suites under the `test-util`
//! feature. Scripts a queue of raw packets and records every call made
//! against it so the pump, router, manager, and fleet can be driven
//! deterministically without a running simulator.

use std::collections::VecDeque;

use parking_lot::Mutex;

use super::{AiCreateOptions, ConnectionHandle, FieldSpec, HostBinding};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    Attach,
    Detach,
    AddToDataDefinition { define_id: u32, name: String },
    ClearDataDefinition { define_id: u32 },
    AddToFacilityDefinition { define_id: u32, token: String },
    RequestFacilitiesList { request_id: u32, kind: String },
    RequestDataOnSimObject { request_id: u32, define_id: u32, object_id: u32 },
    RequestDataOnSimObjectType { request_id: u32, define_id: u32 },
    SetDataOnSimObject { define_id: u32, object_id: u32, bytes: usize },
    SubscribeToSystemEvent { event_id: u32, name: String },
    UnsubscribeFromSystemEvent { event_id: u32 },
    MapClientEventToSimEvent { event_id: u32, name: String },
    TransmitClientEvent { event_id: u32 },
    TransmitClientEventEx1 { event_id: u32 },
    AiCreateParked { request_id: u32 },
    AiCreateEnroute { request_id: u32 },
    AiCreateNonAtc { request_id: u32 },
    AiReleaseControl { object_id: u32 },
    AiRemoveObject { object_id: u32 },
    AiSetFlightPlan { object_id: u32, path: String },
    AddNotificationGroup { group_id: u32, event_id: u32, maskable: bool },
    ClearNotificationGroup { group_id: u32 },
    RequestNotificationGroup { group_id: u32 },
    SetNotificationGroupPriority { group_id: u32, priority: u32 },
}

struct StubState {
    attached: bool,
    queue: VecDeque<Vec<u8>>,
    calls: Vec<RecordedCall>,
    fail_attach: bool,
    next_poll_error: Option<Error>,
}

/// Scripted host. `attach` succeeds unless [`StubHost::fail_next_attach`] was
/// called; queued packets are returned from `poll_raw` in FIFO order.
pub struct StubHost {
    state: Mutex<StubState>,
}

impl Default for StubHost {
    fn default() -> Self {
        Self::new()
    }
}

impl StubHost {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StubState {
                attached: false,
                queue: VecDeque::new(),
                calls: Vec::new(),
                fail_attach: false,
                next_poll_error: None,
            }),
        }
    }

    pub fn enqueue_packet(&self, bytes: Vec<u8>) {
        self.state.lock().queue.push_back(bytes);
    }

    pub fn fail_next_attach(&self) {
        self.state.lock().fail_attach = true;
    }

    pub fn fail_next_poll(&self, error: Error) {
        self.state.lock().next_poll_error = Some(error);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    pub fn is_attached(&self) -> bool {
        self.state.lock().attached
    }

    fn record(&self, call: RecordedCall) {
        self.state.lock().calls.push(call);
    }
}

impl HostBinding for StubHost {
    fn attach(&self, _app_name: &str) -> Result<ConnectionHandle> {
        let mut state = self.state.lock();
        if state.fail_attach {
            state.fail_attach = false;
            return Err(Error::AttachFailed(-1));
        }
        state.attached = true;
        drop(state);
        self.record(RecordedCall::Attach);
        Ok(ConnectionHandle(1))
    }

    fn detach(&self, _handle: ConnectionHandle) -> Result<()> {
        self.state.lock().attached = false;
        self.record(RecordedCall::Detach);
        Ok(())
    }

    fn poll_raw(&self, _handle: ConnectionHandle) -> Result<Option<Vec<u8>>> {
        let mut state = self.state.lock();
        if let Some(err) = state.next_poll_error.take() {
            return Err(err);
        }
        Ok(state.queue.pop_front())
    }

    fn add_to_data_definition(&self, _handle: ConnectionHandle, define_id: u32, field: &FieldSpec) -> Result<()> {
        self.record(RecordedCall::AddToDataDefinition {
            define_id,
            name: field.name.to_string(),
        });
        Ok(())
    }

    fn clear_data_definition(&self, _handle: ConnectionHandle, define_id: u32) -> Result<()> {
        self.record(RecordedCall::ClearDataDefinition { define_id });
        Ok(())
    }

    fn add_to_facility_definition(&self, _handle: ConnectionHandle, define_id: u32, token: &str) -> Result<()> {
        self.record(RecordedCall::AddToFacilityDefinition {
            define_id,
            token: token.to_string(),
        });
        Ok(())
    }

    fn request_facilities_list(&self, _handle: ConnectionHandle, request_id: u32, kind: &str) -> Result<()> {
        self.record(RecordedCall::RequestFacilitiesList {
            request_id,
            kind: kind.to_string(),
        });
        Ok(())
    }

    fn request_data_on_sim_object(
        &self,
        _handle: ConnectionHandle,
        request_id: u32,
        define_id: u32,
        object_id: u32,
        _period: i32,
        _flags: u32,
        _origin: u32,
        _interval: u32,
        _limit: u32,
    ) -> Result<()> {
        self.record(RecordedCall::RequestDataOnSimObject {
            request_id,
            define_id,
            object_id,
        });
        Ok(())
    }

    fn request_data_on_sim_object_type(
        &self,
        _handle: ConnectionHandle,
        request_id: u32,
        define_id: u32,
        _radius_meters: u32,
        _type_tag: u32,
    ) -> Result<()> {
        self.record(RecordedCall::RequestDataOnSimObjectType { request_id, define_id });
        Ok(())
    }

    fn set_data_on_sim_object(
        &self,
        _handle: ConnectionHandle,
        define_id: u32,
        object_id: u32,
        _flags: u32,
        data: &[u8],
        _unit_size_bytes: u32,
    ) -> Result<()> {
        self.record(RecordedCall::SetDataOnSimObject {
            define_id,
            object_id,
            bytes: data.len(),
        });
        Ok(())
    }

    fn subscribe_to_system_event(&self, _handle: ConnectionHandle, event_id: u32, name: &str) -> Result<()> {
        self.record(RecordedCall::SubscribeToSystemEvent {
            event_id,
            name: name.to_string(),
        });
        Ok(())
    }

    fn unsubscribe_from_system_event(&self, _handle: ConnectionHandle, event_id: u32) -> Result<()> {
        self.record(RecordedCall::UnsubscribeFromSystemEvent { event_id });
        Ok(())
    }

    fn map_client_event_to_sim_event(&self, _handle: ConnectionHandle, event_id: u32, name: &str) -> Result<()> {
        self.record(RecordedCall::MapClientEventToSimEvent {
            event_id,
            name: name.to_string(),
        });
        Ok(())
    }

    fn transmit_client_event(
        &self,
        _handle: ConnectionHandle,
        _object_id: u32,
        event_id: u32,
        _data: u32,
        _group_id: u32,
        _flags: u32,
    ) -> Result<()> {
        self.record(RecordedCall::TransmitClientEvent { event_id });
        Ok(())
    }

    fn transmit_client_event_ex1(
        &self,
        _handle: ConnectionHandle,
        _object_id: u32,
        event_id: u32,
        _group_id: u32,
        _flags: u32,
        _data: [u32; 5],
    ) -> Result<()> {
        self.record(RecordedCall::TransmitClientEventEx1 { event_id });
        Ok(())
    }

    fn ai_create_parked(&self, _handle: ConnectionHandle, _options: &AiCreateOptions, request_id: u32) -> Result<()> {
        self.record(RecordedCall::AiCreateParked { request_id });
        Ok(())
    }

    fn ai_create_enroute(&self, _handle: ConnectionHandle, _options: &AiCreateOptions, request_id: u32) -> Result<()> {
        self.record(RecordedCall::AiCreateEnroute { request_id });
        Ok(())
    }

    fn ai_create_non_atc(&self, _handle: ConnectionHandle, _options: &AiCreateOptions, request_id: u32) -> Result<()> {
        self.record(RecordedCall::AiCreateNonAtc { request_id });
        Ok(())
    }

    fn ai_release_control(&self, _handle: ConnectionHandle, object_id: u32, _request_id: u32) -> Result<()> {
        self.record(RecordedCall::AiReleaseControl { object_id });
        Ok(())
    }

    fn ai_remove_object(&self, _handle: ConnectionHandle, object_id: u32, _request_id: u32) -> Result<()> {
        self.record(RecordedCall::AiRemoveObject { object_id });
        Ok(())
    }

    fn ai_set_flight_plan(&self, _handle: ConnectionHandle, object_id: u32, path: &str, _request_id: u32) -> Result<()> {
        self.record(RecordedCall::AiSetFlightPlan { object_id, path: path.to_string() });
        Ok(())
    }

    fn add_notification_group(&self, _handle: ConnectionHandle, group_id: u32, event_id: u32, maskable: bool) -> Result<()> {
        self.record(RecordedCall::AddNotificationGroup { group_id, event_id, maskable });
        Ok(())
    }

    fn clear_notification_group(&self, _handle: ConnectionHandle, group_id: u32) -> Result<()> {
        self.record(RecordedCall::ClearNotificationGroup { group_id });
        Ok(())
    }

    fn request_notification_group(&self, _handle: ConnectionHandle, group_id: u32, _reserved: u32, _flags: u32) -> Result<()> {
        self.record(RecordedCall::RequestNotificationGroup { group_id });
        Ok(())
    }

    fn set_notification_group_priority(&self, _handle: ConnectionHandle, group_id: u32, priority: u32) -> Result<()> {
        self.record(RecordedCall::SetNotificationGroupPriority { group_id, priority });
        Ok(())
    }
}

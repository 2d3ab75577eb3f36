//! Host binding. Translates the native C ABI into the vocabulary the rest
//! of the runtime speaks, behind the [`HostBinding`] trait so the pump and
//! friends never depend on a concrete FFI type.

#[cfg(windows)]
pub mod native;
#[cfg(any(test, feature = "test-util"))]
pub mod stub;

use crate::error::Result;

/// Opaque token returned by the host on successful attach. Zero when
/// unattached; invalidated on disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(pub(crate) u64);

impl ConnectionHandle {
    pub(crate) const ZERO: ConnectionHandle = ConnectionHandle(0);

    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

/// One field descriptor as sent to `AddToDataDefinition`.
#[derive(Debug, Clone)]
pub struct FieldSpec<'a> {
    pub name: &'a str,
    pub unit: &'a str,
    pub datum_type: i32,
    pub epsilon: f32,
    pub ordinal: u32,
}

/// Options for `AICreateParkedATCAircraft` and friends.
#[derive(Debug, Clone)]
pub struct AiCreateOptions<'a> {
    pub model: &'a str,
    pub tail: &'a str,
    pub livery: Option<&'a str>,
    /// Airport ICAO for parked creation, or a serialized flight plan path
    /// for enroute creation. Unused for non-ATC creation.
    pub location: &'a str,
}

/// The seam between the runtime and the native library (or, in tests, a
/// scripted stand-in). One method per cross-cutting service, plus the
/// subset of native procedures callers need directly; everything else
/// (the mechanical per-call wrappers) is out of scope for this crate.
pub trait HostBinding: Send + Sync {
    fn attach(&self, app_name: &str) -> Result<ConnectionHandle>;
    fn detach(&self, handle: ConnectionHandle) -> Result<()>;

    /// Polls for the next dispatched packet. `Ok(None)` means "nothing
    /// available right now" (the host's `0x80004005` sentinel). Implementors
    /// must copy the bytes out of whatever buffer the host handed back
    /// before returning, since the host only guarantees that buffer is
    /// valid until the next dispatch call on this handle; the caller then
    /// owns the result outright.
    fn poll_raw(&self, handle: ConnectionHandle) -> Result<Option<Vec<u8>>>;

    fn add_to_data_definition(&self, handle: ConnectionHandle, define_id: u32, field: &FieldSpec) -> Result<()>;
    fn clear_data_definition(&self, handle: ConnectionHandle, define_id: u32) -> Result<()>;

    fn add_to_facility_definition(&self, handle: ConnectionHandle, define_id: u32, token: &str) -> Result<()>;
    fn request_facilities_list(&self, handle: ConnectionHandle, request_id: u32, kind: &str) -> Result<()>;

    #[allow(clippy::too_many_arguments)]
    fn request_data_on_sim_object(
        &self,
        handle: ConnectionHandle,
        request_id: u32,
        define_id: u32,
        object_id: u32,
        period: i32,
        flags: u32,
        origin: u32,
        interval: u32,
        limit: u32,
    ) -> Result<()>;

    #[allow(clippy::too_many_arguments)]
    fn request_data_on_sim_object_type(
        &self,
        handle: ConnectionHandle,
        request_id: u32,
        define_id: u32,
        radius_meters: u32,
        type_tag: u32,
    ) -> Result<()>;

    fn set_data_on_sim_object(
        &self,
        handle: ConnectionHandle,
        define_id: u32,
        object_id: u32,
        flags: u32,
        data: &[u8],
        unit_size_bytes: u32,
    ) -> Result<()>;

    fn subscribe_to_system_event(&self, handle: ConnectionHandle, event_id: u32, name: &str) -> Result<()>;
    fn unsubscribe_from_system_event(&self, handle: ConnectionHandle, event_id: u32) -> Result<()>;
    fn map_client_event_to_sim_event(&self, handle: ConnectionHandle, event_id: u32, name: &str) -> Result<()>;

    fn transmit_client_event(
        &self,
        handle: ConnectionHandle,
        object_id: u32,
        event_id: u32,
        data: u32,
        group_id: u32,
        flags: u32,
    ) -> Result<()>;

    #[allow(clippy::too_many_arguments)]
    fn transmit_client_event_ex1(
        &self,
        handle: ConnectionHandle,
        object_id: u32,
        event_id: u32,
        group_id: u32,
        flags: u32,
        data: [u32; 5],
    ) -> Result<()>;

    fn ai_create_parked(&self, handle: ConnectionHandle, options: &AiCreateOptions, request_id: u32) -> Result<()>;
    fn ai_create_enroute(&self, handle: ConnectionHandle, options: &AiCreateOptions, request_id: u32) -> Result<()>;
    fn ai_create_non_atc(&self, handle: ConnectionHandle, options: &AiCreateOptions, request_id: u32) -> Result<()>;
    fn ai_release_control(&self, handle: ConnectionHandle, object_id: u32, request_id: u32) -> Result<()>;
    fn ai_remove_object(&self, handle: ConnectionHandle, object_id: u32, request_id: u32) -> Result<()>;

    /// Issues an already-serialized flight plan path to an AI object; this
    /// crate does not parse flight-plan files, only forwards the path the
    /// caller supplies.
    fn ai_set_flight_plan(&self, handle: ConnectionHandle, object_id: u32, path: &str, request_id: u32) -> Result<()>;

    fn add_notification_group(&self, handle: ConnectionHandle, group_id: u32, event_id: u32, maskable: bool) -> Result<()>;
    fn clear_notification_group(&self, handle: ConnectionHandle, group_id: u32) -> Result<()>;
    fn request_notification_group(&self, handle: ConnectionHandle, group_id: u32, reserved: u32, flags: u32) -> Result<()>;
    fn set_notification_group_priority(&self, handle: ConnectionHandle, group_id: u32, priority: u32) -> Result<()>;
}

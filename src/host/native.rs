//! Windows implementation of [`HostBinding`]: locates `SimConnect.dll`,
//! loads it, resolves its exported procedures lazily, and translates its
//! calling convention into this crate's vocabulary.
//!
//! The library path isn't known until runtime, so procedures are resolved
//! with `GetProcAddress` the first time they're used and memoized in a
//! mutex-guarded cache shared by every caller.

#![cfg(windows)]

use std::collections::HashMap;
use std::ffi::{c_void, CString};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use windows_sys::Win32::Foundation::HMODULE;
use windows_sys::Win32::System::LibraryLoader::{FreeLibrary, GetProcAddress, LoadLibraryW};

use super::{AiCreateOptions, ConnectionHandle, FieldSpec, HostBinding};
use crate::config::ConnectOptions;
use crate::error::{Error, Result};

/// HRESULT the host returns from `GetNextDispatch` to mean "nothing to
/// report right now" — not a failure.
const HR_POLL_EMPTY: i32 = 0x8000_4005u32 as i32;

const WELL_KNOWN_PATHS: &[&str] = &[
    r"C:\MSFS2024 SDK\SimConnect SDK\lib\SimConnect.dll",
    r"C:\MSFS SDK\SimConnect SDK\lib\SimConnect.dll",
    r"C:\Program Files\WindowsApps\Microsoft.FlightSimulator_*\SimConnect.dll",
];

fn to_wide(path: &Path) -> Vec<u16> {
    use std::os::windows::ffi::OsStrExt;
    path.as_os_str().encode_wide().chain(std::iter::once(0)).collect()
}

/// Library resolution order: caller-supplied path, then environment and
/// well-known paths if auto-detect is on, then [`Error::LibraryNotFound`].
pub fn locate_library(options: &ConnectOptions) -> Result<PathBuf> {
    if let Some(path) = &options.library_path {
        if path.exists() {
            return Ok(path.clone());
        }
    }
    if options.auto_detect {
        for var in ["MSFS2024_SDK", "MSFS_SDK"] {
            if let Ok(base) = std::env::var(var) {
                let candidate = Path::new(&base).join("SimConnect SDK").join("lib").join("SimConnect.dll");
                if candidate.exists() {
                    return Ok(candidate);
                }
            }
        }
        for pattern in WELL_KNOWN_PATHS {
            let candidate = PathBuf::from(pattern);
            if candidate.exists() {
                return Ok(candidate);
            }
        }
    }
    Err(Error::LibraryNotFound)
}

struct LoadedLibrary {
    module: HMODULE,
    procedures: Mutex<HashMap<&'static str, usize>>,
}

unsafe impl Send for LoadedLibrary {}
unsafe impl Sync for LoadedLibrary {}

impl Drop for LoadedLibrary {
    fn drop(&mut self) {
        if self.module != 0 {
            unsafe {
                FreeLibrary(self.module);
            }
        }
    }
}

impl LoadedLibrary {
    fn load(path: &Path) -> Result<Self> {
        let wide = to_wide(path);
        let module = unsafe { LoadLibraryW(wide.as_ptr()) };
        if module == 0 {
            return Err(Error::LibraryNotFound);
        }
        Ok(Self {
            module,
            procedures: Mutex::new(HashMap::new()),
        })
    }

    /// Resolves `name` lazily and memoizes the address. Concurrent callers
    /// observe the same resolved pointer.
    fn resolve(&self, name: &'static str) -> Result<usize> {
        if let Some(addr) = self.procedures.lock().get(name) {
            return Ok(*addr);
        }
        let c_name = CString::new(name).expect("procedure name has no interior nul");
        let addr = unsafe { GetProcAddress(self.module, c_name.as_ptr() as *const u8) };
        let addr = addr.ok_or(Error::HostError { procedure: name, code: -1 })?;
        let addr = addr as usize;
        self.procedures.lock().insert(name, addr);
        tracing::debug!(procedure = name, "resolved SimConnect procedure");
        Ok(addr)
    }
}

/// Dynamically-loaded `SimConnect.dll` binding.
pub struct NativeHost {
    library: LoadedLibrary,
}

type OpenFn = unsafe extern "system" fn(*mut *mut c_void, *const i8, *mut c_void, u32, *mut c_void, u32) -> i32;
type CloseFn = unsafe extern "system" fn(*mut c_void) -> i32;
type GetNextDispatchFn = unsafe extern "system" fn(*mut c_void, *mut *mut c_void, *mut u32) -> i32;
type AddToDataDefinitionFn =
    unsafe extern "system" fn(*mut c_void, u32, *const i8, *const i8, i32, f32, u32) -> i32;
type ClearDataDefinitionFn = unsafe extern "system" fn(*mut c_void, u32) -> i32;
type AddToFacilityDefinitionFn = unsafe extern "system" fn(*mut c_void, u32, *const i8) -> i32;
type RequestFacilitiesListFn = unsafe extern "system" fn(*mut c_void, u32, u32) -> i32;
type RequestDataOnSimObjectFn =
    unsafe extern "system" fn(*mut c_void, u32, u32, u32, i32, u32, u32, u32, u32) -> i32;
type RequestDataOnSimObjectTypeFn = unsafe extern "system" fn(*mut c_void, u32, u32, u32, u32) -> i32;
type SetDataOnSimObjectFn =
    unsafe extern "system" fn(*mut c_void, u32, u32, u32, u32, u32, *const c_void) -> i32;
type SubscribeToSystemEventFn = unsafe extern "system" fn(*mut c_void, u32, *const i8) -> i32;
type UnsubscribeFromSystemEventFn = unsafe extern "system" fn(*mut c_void, u32) -> i32;
type MapClientEventToSimEventFn = unsafe extern "system" fn(*mut c_void, u32, *const i8) -> i32;
type TransmitClientEventFn = unsafe extern "system" fn(*mut c_void, u32, u32, u32, u32, u32) -> i32;
type TransmitClientEventEx1Fn =
    unsafe extern "system" fn(*mut c_void, u32, u32, u32, u32, u32, u32, u32, u32, u32) -> i32;
type AiCreateParkedFn =
    unsafe extern "system" fn(*mut c_void, *const i8, *const i8, f64, f64, f64, u32) -> i32;
type AiReleaseControlFn = unsafe extern "system" fn(*mut c_void, u32, u32) -> i32;
type AiRemoveObjectFn = unsafe extern "system" fn(*mut c_void, u32, u32) -> i32;
type AiSetFlightPlanFn = unsafe extern "system" fn(*mut c_void, u32, *const i8, u32) -> i32;
type AddClientEventToNotificationGroupFn = unsafe extern "system" fn(*mut c_void, u32, u32, i32) -> i32;
type ClearNotificationGroupFn = unsafe extern "system" fn(*mut c_void, u32) -> i32;
type RequestNotificationGroupFn = unsafe extern "system" fn(*mut c_void, u32, u32, u32) -> i32;
type SetNotificationGroupPriorityFn = unsafe extern "system" fn(*mut c_void, u32, u32) -> i32;

macro_rules! get_proc {
    ($self:ident, $name:literal, $ty:ty) => {{
        let addr = $self.library.resolve($name)?;
        unsafe { std::mem::transmute::<usize, $ty>(addr) }
    }};
}

fn cstr(field: &'static str, value: &str, limit: usize) -> Result<CString> {
    if value.len() >= limit {
        return Err(Error::StringTooLong { field, limit });
    }
    CString::new(value).map_err(|_| Error::StringTooLong { field, limit })
}

fn translate(procedure: &'static str, code: i32) -> Result<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(Error::HostError { procedure, code })
    }
}

impl NativeHost {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self { library: LoadedLibrary::load(path)? })
    }
}

impl HostBinding for NativeHost {
    fn attach(&self, app_name: &str) -> Result<ConnectionHandle> {
        let open: OpenFn = get_proc!(self, "SimConnect_Open", OpenFn);
        let name = cstr("app_name", app_name, 256)?;
        let mut handle: *mut c_void = std::ptr::null_mut();
        let hr = unsafe {
            open(
                &mut handle,
                name.as_ptr(),
                std::ptr::null_mut(),
                0,
                std::ptr::null_mut(),
                0,
            )
        };
        if hr != 0 || handle.is_null() {
            return Err(Error::AttachFailed(hr));
        }
        Ok(ConnectionHandle(handle as usize as u64))
    }

    fn detach(&self, handle: ConnectionHandle) -> Result<()> {
        let close: CloseFn = get_proc!(self, "SimConnect_Close", CloseFn);
        let hr = unsafe { close(handle.0 as usize as *mut c_void) };
        translate("SimConnect_Close", hr)
    }

    fn poll_raw(&self, handle: ConnectionHandle) -> Result<Option<Vec<u8>>> {
        let get_next: GetNextDispatchFn = get_proc!(self, "SimConnect_GetNextDispatch", GetNextDispatchFn);
        let mut data_ptr: *mut c_void = std::ptr::null_mut();
        let mut size: u32 = 0;
        let hr = unsafe { get_next(handle.0 as usize as *mut c_void, &mut data_ptr, &mut size) };
        if hr == HR_POLL_EMPTY || data_ptr.is_null() {
            return Ok(None);
        }
        translate("SimConnect_GetNextDispatch", hr)?;
        // The host only guarantees `data_ptr` stays valid until the next
        // dispatch call on this handle, so it's copied out here rather
        // than handed back as a borrow with no way to enforce that.
        let bytes = unsafe { std::slice::from_raw_parts(data_ptr as *const u8, size as usize) }.to_vec();
        Ok(Some(bytes))
    }

    fn add_to_data_definition(&self, handle: ConnectionHandle, define_id: u32, field: &FieldSpec) -> Result<()> {
        let add: AddToDataDefinitionFn = get_proc!(self, "SimConnect_AddToDataDefinition", AddToDataDefinitionFn);
        let name = cstr("field.name", field.name, 256)?;
        let unit = cstr("field.unit", field.unit, 256)?;
        let hr = unsafe {
            add(
                handle.0 as usize as *mut c_void,
                define_id,
                name.as_ptr(),
                unit.as_ptr(),
                field.datum_type,
                field.epsilon,
                0xFFFF_FFFF,
            )
        };
        translate("SimConnect_AddToDataDefinition", hr)
    }

    fn clear_data_definition(&self, handle: ConnectionHandle, define_id: u32) -> Result<()> {
        let clear: ClearDataDefinitionFn = get_proc!(self, "SimConnect_ClearDataDefinition", ClearDataDefinitionFn);
        let hr = unsafe { clear(handle.0 as usize as *mut c_void, define_id) };
        translate("SimConnect_ClearDataDefinition", hr)
    }

    fn add_to_facility_definition(&self, handle: ConnectionHandle, define_id: u32, token: &str) -> Result<()> {
        let add: AddToFacilityDefinitionFn =
            get_proc!(self, "SimConnect_AddToFacilityDefinition", AddToFacilityDefinitionFn);
        let token_c = cstr("facility.token", token, 256)?;
        let hr = unsafe { add(handle.0 as usize as *mut c_void, define_id, token_c.as_ptr()) };
        translate("SimConnect_AddToFacilityDefinition", hr)
    }

    fn request_facilities_list(&self, handle: ConnectionHandle, request_id: u32, kind: &str) -> Result<()> {
        let request: RequestFacilitiesListFn =
            get_proc!(self, "SimConnect_RequestFacilitiesList", RequestFacilitiesListFn);
        let kind_tag = match kind {
            "airport" => 0,
            "waypoint" => 1,
            "ndb" => 2,
            "vor" => 3,
            _ => 0,
        };
        let hr = unsafe { request(handle.0 as usize as *mut c_void, kind_tag, request_id) };
        translate("SimConnect_RequestFacilitiesList", hr)
    }

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
    ) -> Result<()> {
        let request: RequestDataOnSimObjectFn =
            get_proc!(self, "SimConnect_RequestDataOnSimObject", RequestDataOnSimObjectFn);
        let hr = unsafe {
            request(
                handle.0 as usize as *mut c_void,
                request_id,
                define_id,
                object_id,
                period,
                flags,
                origin,
                interval,
                limit,
            )
        };
        translate("SimConnect_RequestDataOnSimObject", hr)
    }

    fn request_data_on_sim_object_type(
        &self,
        handle: ConnectionHandle,
        request_id: u32,
        define_id: u32,
        radius_meters: u32,
        type_tag: u32,
    ) -> Result<()> {
        let request: RequestDataOnSimObjectTypeFn =
            get_proc!(self, "SimConnect_RequestDataOnSimObjectType", RequestDataOnSimObjectTypeFn);
        let hr = unsafe {
            request(
                handle.0 as usize as *mut c_void,
                request_id,
                define_id,
                radius_meters,
                type_tag,
            )
        };
        translate("SimConnect_RequestDataOnSimObjectType", hr)
    }

    fn set_data_on_sim_object(
        &self,
        handle: ConnectionHandle,
        define_id: u32,
        object_id: u32,
        flags: u32,
        data: &[u8],
        unit_size_bytes: u32,
    ) -> Result<()> {
        let set: SetDataOnSimObjectFn = get_proc!(self, "SimConnect_SetDataOnSimObject", SetDataOnSimObjectFn);
        let count = if unit_size_bytes == 0 { 0 } else { data.len() as u32 / unit_size_bytes };
        let hr = unsafe {
            set(
                handle.0 as usize as *mut c_void,
                define_id,
                object_id,
                flags,
                count,
                unit_size_bytes,
                data.as_ptr() as *const c_void,
            )
        };
        translate("SimConnect_SetDataOnSimObject", hr)
    }

    fn subscribe_to_system_event(&self, handle: ConnectionHandle, event_id: u32, name: &str) -> Result<()> {
        let subscribe: SubscribeToSystemEventFn =
            get_proc!(self, "SimConnect_SubscribeToSystemEvent", SubscribeToSystemEventFn);
        let name_c = cstr("event.name", name, 64)?;
        let hr = unsafe { subscribe(handle.0 as usize as *mut c_void, event_id, name_c.as_ptr()) };
        translate("SimConnect_SubscribeToSystemEvent", hr)
    }

    fn unsubscribe_from_system_event(&self, handle: ConnectionHandle, event_id: u32) -> Result<()> {
        let unsubscribe: UnsubscribeFromSystemEventFn =
            get_proc!(self, "SimConnect_UnsubscribeFromSystemEvent", UnsubscribeFromSystemEventFn);
        let hr = unsafe { unsubscribe(handle.0 as usize as *mut c_void, event_id) };
        translate("SimConnect_UnsubscribeFromSystemEvent", hr)
    }

    fn map_client_event_to_sim_event(&self, handle: ConnectionHandle, event_id: u32, name: &str) -> Result<()> {
        let map: MapClientEventToSimEventFn =
            get_proc!(self, "SimConnect_MapClientEventToSimEvent", MapClientEventToSimEventFn);
        let name_c = cstr("event.name", name, 64)?;
        let hr = unsafe { map(handle.0 as usize as *mut c_void, event_id, name_c.as_ptr()) };
        translate("SimConnect_MapClientEventToSimEvent", hr)
    }

    fn transmit_client_event(
        &self,
        handle: ConnectionHandle,
        object_id: u32,
        event_id: u32,
        data: u32,
        group_id: u32,
        flags: u32,
    ) -> Result<()> {
        let transmit: TransmitClientEventFn =
            get_proc!(self, "SimConnect_TransmitClientEvent", TransmitClientEventFn);
        let hr = unsafe {
            transmit(handle.0 as usize as *mut c_void, object_id, event_id, data, group_id, flags)
        };
        translate("SimConnect_TransmitClientEvent", hr)
    }

    fn transmit_client_event_ex1(
        &self,
        handle: ConnectionHandle,
        object_id: u32,
        event_id: u32,
        group_id: u32,
        flags: u32,
        data: [u32; 5],
    ) -> Result<()> {
        let transmit: TransmitClientEventEx1Fn =
            get_proc!(self, "SimConnect_TransmitClientEvent_EX1", TransmitClientEventEx1Fn);
        let hr = unsafe {
            transmit(
                handle.0 as usize as *mut c_void,
                object_id,
                event_id,
                group_id,
                flags,
                data[0],
                data[1],
                data[2],
                data[3],
            )
        };
        translate("SimConnect_TransmitClientEvent_EX1", hr)
    }

    fn ai_create_parked(&self, handle: ConnectionHandle, options: &AiCreateOptions, request_id: u32) -> Result<()> {
        let create: AiCreateParkedFn = get_proc!(self, "SimConnect_AICreateParkedATCAircraft", AiCreateParkedFn);
        let model = cstr("ai.model", options.model, 256)?;
        let tail = cstr("ai.tail", options.tail, 12)?;
        let hr = unsafe { create(handle.0 as usize as *mut c_void, model.as_ptr(), tail.as_ptr(), 0.0, 0.0, 0.0, request_id) };
        translate("SimConnect_AICreateParkedATCAircraft", hr)
    }

    fn ai_create_enroute(&self, handle: ConnectionHandle, options: &AiCreateOptions, request_id: u32) -> Result<()> {
        // Enroute creation shares the parked entry point's signature in the
        // minimal surface this crate binds; the flight-plan path is passed
        // in place of the tail/airport pair the native SDK expects there.
        let create: AiCreateParkedFn = get_proc!(self, "SimConnect_AICreateEnrouteATCAircraft", AiCreateParkedFn);
        let model = cstr("ai.model", options.model, 256)?;
        let plan = cstr("ai.location", options.location, 260)?;
        let hr = unsafe { create(handle.0 as usize as *mut c_void, model.as_ptr(), plan.as_ptr(), 0.0, 0.0, 0.0, request_id) };
        translate("SimConnect_AICreateEnrouteATCAircraft", hr)
    }

    fn ai_create_non_atc(&self, handle: ConnectionHandle, options: &AiCreateOptions, request_id: u32) -> Result<()> {
        let create: AiCreateParkedFn = get_proc!(self, "SimConnect_AICreateNonATCAircraft", AiCreateParkedFn);
        let model = cstr("ai.model", options.model, 256)?;
        let tail = cstr("ai.tail", options.tail, 12)?;
        let hr = unsafe { create(handle.0 as usize as *mut c_void, model.as_ptr(), tail.as_ptr(), 0.0, 0.0, 0.0, request_id) };
        translate("SimConnect_AICreateNonATCAircraft", hr)
    }

    fn ai_release_control(&self, handle: ConnectionHandle, object_id: u32, request_id: u32) -> Result<()> {
        let release: AiReleaseControlFn = get_proc!(self, "SimConnect_AIReleaseControl", AiReleaseControlFn);
        let hr = unsafe { release(handle.0 as usize as *mut c_void, object_id, request_id) };
        translate("SimConnect_AIReleaseControl", hr)
    }

    fn ai_remove_object(&self, handle: ConnectionHandle, object_id: u32, request_id: u32) -> Result<()> {
        let remove: AiRemoveObjectFn = get_proc!(self, "SimConnect_AIRemoveObject", AiRemoveObjectFn);
        let hr = unsafe { remove(handle.0 as usize as *mut c_void, object_id, request_id) };
        translate("SimConnect_AIRemoveObject", hr)
    }

    fn ai_set_flight_plan(&self, handle: ConnectionHandle, object_id: u32, path: &str, request_id: u32) -> Result<()> {
        let set: AiSetFlightPlanFn = get_proc!(self, "SimConnect_AISetAircraftFlightPlan", AiSetFlightPlanFn);
        let path_c = cstr("ai.flight_plan_path", path, 260)?;
        let hr = unsafe { set(handle.0 as usize as *mut c_void, object_id, path_c.as_ptr(), request_id) };
        translate("SimConnect_AISetAircraftFlightPlan", hr)
    }

    fn add_notification_group(&self, handle: ConnectionHandle, group_id: u32, event_id: u32, maskable: bool) -> Result<()> {
        let add: AddClientEventToNotificationGroupFn =
            get_proc!(self, "SimConnect_AddClientEventToNotificationGroup", AddClientEventToNotificationGroupFn);
        let hr = unsafe { add(handle.0 as usize as *mut c_void, group_id, event_id, maskable as i32) };
        translate("SimConnect_AddClientEventToNotificationGroup", hr)
    }

    fn clear_notification_group(&self, handle: ConnectionHandle, group_id: u32) -> Result<()> {
        let clear: ClearNotificationGroupFn = get_proc!(self, "SimConnect_ClearNotificationGroup", ClearNotificationGroupFn);
        let hr = unsafe { clear(handle.0 as usize as *mut c_void, group_id) };
        translate("SimConnect_ClearNotificationGroup", hr)
    }

    fn request_notification_group(&self, handle: ConnectionHandle, group_id: u32, reserved: u32, flags: u32) -> Result<()> {
        let request: RequestNotificationGroupFn =
            get_proc!(self, "SimConnect_RequestNotificationGroup", RequestNotificationGroupFn);
        let hr = unsafe { request(handle.0 as usize as *mut c_void, group_id, reserved, flags) };
        translate("SimConnect_RequestNotificationGroup", hr)
    }

    fn set_notification_group_priority(&self, handle: ConnectionHandle, group_id: u32, priority: u32) -> Result<()> {
        let set: SetNotificationGroupPriorityFn =
            get_proc!(self, "SimConnect_SetNotificationGroupPriority", SetNotificationGroupPriorityFn);
        let hr = unsafe { set(handle.0 as usize as *mut c_void, group_id, priority) };
        translate("SimConnect_SetNotificationGroupPriority", hr)
    }
}

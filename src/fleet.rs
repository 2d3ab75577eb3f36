//! The AI-object fleet: tracks asynchronously-assigned object
//! identifiers and serializes packed waypoint chains into the host's wire
//! format.

use std::collections::HashMap;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::host::{AiCreateOptions, ConnectionHandle, HostBinding};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiKind {
    Parked,
    Enroute,
    NonAtc,
}

#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub model: String,
    pub tail: String,
    pub livery: Option<String>,
    pub location: String,
}

#[derive(Debug, Clone)]
struct PendingCreation {
    kind: AiKind,
    options: CreateOptions,
}

/// A promoted AI aircraft, valid only for the connection lifetime it was
/// created in.
#[derive(Debug, Clone, PartialEq)]
pub struct AircraftHandle {
    pub object_id: u32,
    pub kind: AiKind,
    pub model: String,
    pub livery: Option<String>,
    pub tail: String,
}

/// One point of a packed waypoint chain. 44 bytes on the wire, with no
/// interior padding — the natural Rust layout has a 4-byte gap after
/// `flags` that [`pack_waypoints`] strips out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Waypoint {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub flags: u32,
    pub speed: f64,
    pub throttle: f64,
}

/// Bytes per packed waypoint on the wire.
pub const WAYPOINT_WIRE_SIZE: usize = 44;

/// Serializes waypoints field-by-field into the host's packed 44-byte
/// layout used by the host. The natural `#[repr(C)]` layout of
/// [`Waypoint`] is not used for the wire form because it would insert
/// padding after `flags`.
pub fn pack_waypoints(waypoints: &[Waypoint]) -> Vec<u8> {
    let mut buf = vec![0u8; waypoints.len() * WAYPOINT_WIRE_SIZE];
    for (i, wp) in waypoints.iter().enumerate() {
        let base = i * WAYPOINT_WIRE_SIZE;
        LittleEndian::write_f64(&mut buf[base..base + 8], wp.lat);
        LittleEndian::write_f64(&mut buf[base + 8..base + 16], wp.lon);
        LittleEndian::write_f64(&mut buf[base + 16..base + 24], wp.alt);
        LittleEndian::write_u32(&mut buf[base + 24..base + 28], wp.flags);
        LittleEndian::write_f64(&mut buf[base + 28..base + 36], wp.speed);
        LittleEndian::write_f64(&mut buf[base + 36..base + 44], wp.throttle);
    }
    buf
}

#[derive(Default)]
struct FleetInner {
    pending: HashMap<u32, PendingCreation>,
    members: HashMap<u32, AircraftHandle>,
}

/// Tracks AI aircraft across the request → host-assigned-id → handle
/// lifecycle. Both maps share one lock so the pending→member promotion in
/// [`acknowledge`](Self::acknowledge) can never be torn.
pub struct Fleet {
    inner: RwLock<FleetInner>,
}

impl Default for Fleet {
    fn default() -> Self {
        Self::new()
    }
}

impl Fleet {
    pub fn new() -> Self {
        Self { inner: RwLock::new(FleetInner::default()) }
    }

    fn request(
        &self,
        binding: &dyn HostBinding,
        handle: ConnectionHandle,
        kind: AiKind,
        options: CreateOptions,
        request_id: u32,
    ) -> Result<()> {
        let ai_options = AiCreateOptions {
            model: &options.model,
            tail: &options.tail,
            livery: options.livery.as_deref(),
            location: &options.location,
        };
        match kind {
            AiKind::Parked => binding.ai_create_parked(handle, &ai_options, request_id)?,
            AiKind::Enroute => binding.ai_create_enroute(handle, &ai_options, request_id)?,
            AiKind::NonAtc => binding.ai_create_non_atc(handle, &ai_options, request_id)?,
        }
        self.inner.write().pending.insert(request_id, PendingCreation { kind, options });
        Ok(())
    }

    pub fn request_parked(
        &self,
        binding: &dyn HostBinding,
        handle: ConnectionHandle,
        options: CreateOptions,
        request_id: u32,
    ) -> Result<()> {
        self.request(binding, handle, AiKind::Parked, options, request_id)
    }

    pub fn request_enroute(
        &self,
        binding: &dyn HostBinding,
        handle: ConnectionHandle,
        options: CreateOptions,
        request_id: u32,
    ) -> Result<()> {
        self.request(binding, handle, AiKind::Enroute, options, request_id)
    }

    pub fn request_non_atc(
        &self,
        binding: &dyn HostBinding,
        handle: ConnectionHandle,
        options: CreateOptions,
        request_id: u32,
    ) -> Result<()> {
        self.request(binding, handle, AiKind::NonAtc, options, request_id)
    }

    /// Promotes the pending creation matching `request_id` to a member once
    /// the host's `assigned-object-id` packet names `object_id`. An unknown
    /// `request_id` returns `None` ("not mine") rather than an error, since
    /// another subsystem may own it; a request-id is promoted at most once.
    pub fn acknowledge(&self, request_id: u32, object_id: u32) -> Option<AircraftHandle> {
        let mut inner = self.inner.write();
        let pending = inner.pending.remove(&request_id)?;
        let member = AircraftHandle {
            object_id,
            kind: pending.kind,
            model: pending.options.model,
            livery: pending.options.livery,
            tail: pending.options.tail,
        };
        inner.members.insert(object_id, member.clone());
        Some(member)
    }

    pub fn get(&self, object_id: u32) -> Option<AircraftHandle> {
        self.inner.read().members.get(&object_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Two-step activation for non-ATC aircraft: release host control, then
    /// hand it a waypoint chain.
    pub fn release_control(&self, binding: &dyn HostBinding, handle: ConnectionHandle, object_id: u32, request_id: u32) -> Result<()> {
        binding.ai_release_control(handle, object_id, request_id)
    }

    pub fn set_waypoints(
        &self,
        binding: &dyn HostBinding,
        handle: ConnectionHandle,
        define_id: u32,
        object_id: u32,
        waypoints: &[Waypoint],
    ) -> Result<()> {
        if waypoints.is_empty() {
            return Err(Error::EmptyWaypoints);
        }
        let packed = pack_waypoints(waypoints);
        binding.set_data_on_sim_object(handle, define_id, object_id, 0, &packed, WAYPOINT_WIRE_SIZE as u32)
    }

    /// Issues an already-serialized flight plan path to an enroute AI
    /// aircraft. Parsing the flight-plan file itself is out of scope; this
    /// only forwards the path the caller supplies.
    pub fn set_flight_plan(
        &self,
        binding: &dyn HostBinding,
        handle: ConnectionHandle,
        object_id: u32,
        path: &str,
        request_id: u32,
    ) -> Result<()> {
        binding.ai_set_flight_plan(handle, object_id, path, request_id)
    }

    pub fn remove(&self, binding: &dyn HostBinding, handle: ConnectionHandle, object_id: u32, request_id: u32) -> Result<()> {
        binding.ai_remove_object(handle, object_id, request_id)?;
        self.inner.write().members.remove(&object_id);
        Ok(())
    }

    pub fn remove_all(&self, binding: &dyn HostBinding, handle: ConnectionHandle) -> Result<()> {
        let object_ids: Vec<u32> = self.inner.read().members.keys().copied().collect();
        for (i, object_id) in object_ids.into_iter().enumerate() {
            self.remove(binding, handle, object_id, 0xFFFF_0000 + i as u32)?;
        }
        Ok(())
    }

    /// Clears both maps. Called on every disconnect: identifiers are
    /// invalid across reconnects regardless of whether a replacement
    /// binding is supplied.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.pending.clear();
        inner.members.clear();
    }
}

pub type SharedFleet = Arc<Fleet>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::stub::StubHost;

    fn options() -> CreateOptions {
        CreateOptions {
            model: "Airbus A320".into(),
            tail: "AFR123".into(),
            livery: None,
            location: "LKPR".into(),
        }
    }

    #[test]
    fn pending_promotion_round_trip() {
        let fleet = Fleet::new();
        let host = StubHost::new();
        let handle = host.attach("test").unwrap();

        fleet.request_parked(&host, handle, options(), 7).unwrap();
        let acked = fleet.acknowledge(7, 42).expect("should be ours");
        assert_eq!(acked.object_id, 42);
        assert_eq!(acked.kind, AiKind::Parked);
        assert_eq!(fleet.get(42), Some(acked));
        assert_eq!(fleet.len(), 1);
    }

    #[test]
    fn acknowledge_promotes_at_most_once() {
        let fleet = Fleet::new();
        let host = StubHost::new();
        let handle = host.attach("test").unwrap();

        fleet.request_parked(&host, handle, options(), 7).unwrap();
        assert!(fleet.acknowledge(7, 42).is_some());
        // A second ack for the same request-id, even with a different
        // object-id, finds nothing pending: "not mine".
        assert!(fleet.acknowledge(7, 99).is_none());
        assert_eq!(fleet.get(42).unwrap().object_id, 42);
        assert!(fleet.get(99).is_none());
    }

    #[test]
    fn unknown_request_id_is_not_mine() {
        let fleet = Fleet::new();
        assert!(fleet.acknowledge(404, 1).is_none());
    }

    #[test]
    fn clear_empties_both_maps() {
        let fleet = Fleet::new();
        let host = StubHost::new();
        let handle = host.attach("test").unwrap();
        fleet.request_parked(&host, handle, options(), 7).unwrap();
        fleet.acknowledge(7, 42).unwrap();
        fleet.clear();
        assert_eq!(fleet.len(), 0);
        assert!(fleet.get(42).is_none());
    }

    #[test]
    fn waypoint_packing_matches_wire_layout() {
        let waypoints = vec![
            Waypoint { lat: 50.0, lon: 14.0, alt: 1500.0, flags: 0x0012_0004, speed: 180.0, throttle: 100.0 },
            Waypoint { lat: 51.0, lon: 15.0, alt: 2000.0, flags: 0, speed: 200.0, throttle: 90.0 },
            Waypoint { lat: 52.0, lon: 16.0, alt: 2500.0, flags: 0, speed: 220.0, throttle: 85.0 },
        ];
        let packed = pack_waypoints(&waypoints);
        assert_eq!(packed.len(), 44 * 3);
        assert_eq!(LittleEndian::read_f64(&packed[0..8]), 50.0);
        assert_eq!(LittleEndian::read_u32(&packed[24..28]), 0x0012_0004);
        assert_eq!(LittleEndian::read_f64(&packed[28..36]), 180.0);
    }

    #[test]
    fn set_flight_plan_forwards_path_to_host() {
        let fleet = Fleet::new();
        let host = StubHost::new();
        let handle = host.attach("test").unwrap();
        fleet.set_flight_plan(&host, handle, 42, "KJFK..KLAX", 9).unwrap();
        assert!(host.calls().iter().any(|call| matches!(
            call,
            crate::host::stub::RecordedCall::AiSetFlightPlan { object_id: 42, path } if path == "KJFK..KLAX"
        )));
    }

    #[test]
    fn set_waypoints_rejects_empty_input() {
        let fleet = Fleet::new();
        let host = StubHost::new();
        let handle = host.attach("test").unwrap();
        let err = fleet.set_waypoints(&host, handle, 1, 42, &[]).unwrap_err();
        assert!(matches!(err, Error::EmptyWaypoints));
    }
}

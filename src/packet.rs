//! Raw packet header parsing and the classified message type that flows from
//! the pump to the router.

use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::Error;
use crate::pool::PooledBuffer;

/// Size in bytes of the fixed `{ size, version, discriminant }` header.
pub const HEADER_SIZE: usize = 12;

/// Closed set of packet shapes the host may dispatch. `Unknown` carries the
/// raw discriminant for forward compatibility with host versions this crate
/// does not decode specially.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Discriminant {
    Open,
    Quit,
    Event,
    SimObjectData,
    SimObjectDataByType,
    AirportList,
    NdbList,
    VorList,
    WaypointList,
    FacilityData,
    FacilityDataEnd,
    AssignedObjectId,
    Exception,
    FlowEvent,
    EventFilename,
    EventObjectAddRemove,
    Unknown(u32),
}

impl Discriminant {
    /// Matches the host's raw 32-bit discriminant values. The exact numeric
    /// mapping is the native SDK's; only the identifiers this crate acts on
    /// specially need their own variant.
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Discriminant::Open,
            1 => Discriminant::Quit,
            2 => Discriminant::Event,
            3 => Discriminant::SimObjectData,
            4 => Discriminant::SimObjectDataByType,
            10 => Discriminant::AirportList,
            11 => Discriminant::NdbList,
            12 => Discriminant::VorList,
            13 => Discriminant::WaypointList,
            23 => Discriminant::FacilityData,
            24 => Discriminant::FacilityDataEnd,
            25 => Discriminant::AssignedObjectId,
            6 => Discriminant::Exception,
            33 => Discriminant::FlowEvent,
            7 => Discriminant::EventFilename,
            8 => Discriminant::EventObjectAddRemove,
            other => Discriminant::Unknown(other),
        }
    }
}

/// Reads the event-id word out of a generic `Event` packet's payload
/// (`{ group_id u32, event_id u32, data u32 }` immediately after the fixed
/// header). Used by the pump to recognize its own reserved subscriptions
/// without fully classifying the message.
pub fn peek_event_id(payload: &[u8]) -> Option<u32> {
    if payload.len() < 8 {
        return None;
    }
    Some(LittleEndian::read_u32(&payload[4..8]))
}

/// The fixed header every packet begins with.
#[derive(Debug, Clone, Copy)]
pub struct PacketHeader {
    pub size: u32,
    pub version: u32,
    pub discriminant: Discriminant,
}

impl PacketHeader {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            size: LittleEndian::read_u32(&bytes[0..4]),
            version: LittleEndian::read_u32(&bytes[4..8]),
            discriminant: Discriminant::from_raw(LittleEndian::read_u32(&bytes[8..12])),
        })
    }
}

/// An owned, classified copy of a host packet. The underlying buffer is
/// reference-counted so the router can fan a single poll result out to many
/// subscribers cheaply; the pool slot is reclaimed once the last clone is
/// dropped or explicitly [`release`](Self::release)d.
#[derive(Clone)]
pub struct ClassifiedMessage {
    buffer: Option<Arc<PooledBuffer>>,
    header: Option<PacketHeader>,
    poll_error: Option<Arc<Error>>,
}

impl ClassifiedMessage {
    pub(crate) fn from_buffer(buffer: PooledBuffer) -> Self {
        let header = PacketHeader::parse(buffer.as_slice());
        Self {
            buffer: Some(Arc::new(buffer)),
            header,
            poll_error: None,
        }
    }

    pub(crate) fn from_poll_error(error: Error) -> Self {
        Self {
            buffer: None,
            header: None,
            poll_error: Some(Arc::new(error)),
        }
    }

    pub fn header(&self) -> Option<PacketHeader> {
        self.header
    }

    pub fn discriminant(&self) -> Option<Discriminant> {
        self.header.map(|h| h.discriminant)
    }

    pub fn poll_error(&self) -> Option<&Error> {
        self.poll_error.as_deref()
    }

    /// Bytes after the fixed header, i.e. the discriminant-specific tail.
    pub fn payload(&self) -> &[u8] {
        match &self.buffer {
            Some(buf) if buf.as_slice().len() > HEADER_SIZE => &buf.as_slice()[HEADER_SIZE..],
            _ => &[],
        }
    }

    pub fn raw(&self) -> &[u8] {
        self.buffer.as_deref().map(|b| b.as_slice()).unwrap_or(&[])
    }

    /// Drops this message's reference to its pooled buffer. Idempotent:
    /// calling it twice, or after every clone has already been dropped, is a
    /// no-op. The slot returns to the pool once the last reference goes away.
    pub fn release(&mut self) {
        self.buffer.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::BufferPool;

    #[test]
    fn release_is_idempotent_across_clones() {
        let pool = BufferPool::new();
        let message = ClassifiedMessage::from_buffer(pool.acquire(&[1, 2, 3, 4]));
        let mut clone = message.clone();

        clone.release();
        assert_eq!(clone.payload(), &[] as &[u8]);
        assert_eq!(clone.raw(), &[] as &[u8]);

        // Releasing again, on the same value, must not panic.
        clone.release();
        assert_eq!(clone.raw(), &[] as &[u8]);

        // The other clone still owns its reference to the shared buffer.
        assert_eq!(message.raw(), &[1, 2, 3, 4]);
    }
}

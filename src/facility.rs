//! Facility definitions (bracketed `OPEN <kind>` / field / `CLOSE
//! <kind>` protocol) and the airport-list parser that disambiguates the
//! host's three wire-compatible entry sizes.

use byteorder::{ByteOrder, LittleEndian};

use crate::definition::read_fixed_string;
use crate::error::{Error, Result};
use crate::host::{ConnectionHandle, HostBinding};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacilityKind {
    Airport,
    Runway,
    Parking,
    Waypoint,
    Ndb,
    Vor,
}

impl FacilityKind {
    fn tag(self) -> &'static str {
        match self {
            FacilityKind::Airport => "AIRPORT",
            FacilityKind::Runway => "RUNWAY",
            FacilityKind::Parking => "PARKING",
            FacilityKind::Waypoint => "WAYPOINT",
            FacilityKind::Ndb => "NDB",
            FacilityKind::Vor => "VOR",
        }
    }
}

enum Token {
    Open(FacilityKind),
    Field(String),
    Close(FacilityKind),
}

/// Builds the `OPEN <kind>` / field-name / `CLOSE <kind>` token sequence a
/// facility definition registers. Nested kinds (e.g. parking inside
/// airport) stack: `open(Airport).field(..).open(Parking).field(..).close(Parking).close(Airport)`.
#[derive(Default)]
pub struct FacilityDefinitionBuilder {
    tokens: Vec<Token>,
}

impl FacilityDefinitionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(mut self, kind: FacilityKind) -> Self {
        self.tokens.push(Token::Open(kind));
        self
    }

    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.tokens.push(Token::Field(name.into()));
        self
    }

    pub fn close(mut self, kind: FacilityKind) -> Self {
        self.tokens.push(Token::Close(kind));
        self
    }

    /// Registers the bracketed sequence against `define_id`.
    pub fn register(self, binding: &dyn HostBinding, handle: ConnectionHandle, define_id: u32) -> Result<()> {
        for token in &self.tokens {
            let text = match token {
                Token::Open(kind) => format!("OPEN {}", kind.tag()),
                Token::Field(name) => name.clone(),
                Token::Close(kind) => format!("CLOSE {}", kind.tag()),
            };
            binding.add_to_facility_definition(handle, define_id, &text)?;
        }
        Ok(())
    }
}

/// One entry decoded from an airport-list packet.
#[derive(Debug, Clone, PartialEq)]
pub struct AirportEntry {
    pub ident: String,
    pub latitude: f64,
    pub longitude: f64,
}

struct Offsets {
    ident: usize,
    lat: usize,
    lon: usize,
}

fn offsets_for(entry_size: usize) -> Option<Offsets> {
    match entry_size {
        33 => Some(Offsets { ident: 0, lat: 9, lon: 17 }),
        36 => Some(Offsets { ident: 0, lat: 12, lon: 20 }),
        // MSFS 2024 reports both 40 and a 41-byte variant with one
        // unexplained trailing byte; both decode identically.
        40 | 41 => Some(Offsets { ident: 0, lat: 16, lon: 24 }),
        _ => None,
    }
}

/// Parses an airport-list packet's payload (everything after the shared
/// facility-list header) into its entries, picking field offsets from the
/// wire size the host actually used. Unrecognized entry sizes are
/// skipped with a warning rather than treated as fatal.
pub fn parse_airport_list(payload: &[u8], array_size: u32) -> Result<Vec<AirportEntry>> {
    if array_size == 0 {
        return Ok(Vec::new());
    }
    let entry_size = payload.len() / array_size as usize;
    let Some(offsets) = offsets_for(entry_size) else {
        tracing::warn!(entry_size, array_size, "unrecognized airport-list entry size, skipping batch");
        return Err(Error::UnknownEntrySize(entry_size));
    };

    let mut entries = Vec::with_capacity(array_size as usize);
    for i in 0..array_size as usize {
        let start = i * entry_size;
        let entry = &payload[start..start + entry_size];
        if entry.len() < offsets.lon + 8 {
            break;
        }
        let ident_bytes = &entry[offsets.ident..offsets.lat.min(entry.len())];
        entries.push(AirportEntry {
            ident: read_fixed_string(ident_bytes),
            latitude: LittleEndian::read_f64(&entry[offsets.lat..offsets.lat + 8]),
            longitude: LittleEndian::read_f64(&entry[offsets.lon..offsets.lon + 8]),
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_33(ident: &str, lat: f64, lon: f64) -> Vec<u8> {
        let mut buf = vec![0u8; 33];
        let ident_bytes = ident.as_bytes();
        buf[..ident_bytes.len()].copy_from_slice(ident_bytes);
        LittleEndian::write_f64(&mut buf[9..17], lat);
        LittleEndian::write_f64(&mut buf[17..25], lon);
        buf
    }

    fn entry_40(ident: &str, lat: f64, lon: f64) -> Vec<u8> {
        let mut buf = vec![0u8; 40];
        let ident_bytes = ident.as_bytes();
        buf[..ident_bytes.len()].copy_from_slice(ident_bytes);
        LittleEndian::write_f64(&mut buf[16..24], lat);
        LittleEndian::write_f64(&mut buf[24..32], lon);
        buf
    }

    #[test]
    fn parses_33_byte_entries() {
        let mut payload = entry_33("LFPG", 49.0097, 2.5479);
        payload.extend(entry_33("EGLL", 51.4706, -0.4619));
        let entries = parse_airport_list(&payload, 2).unwrap();
        assert_eq!(entries[0].ident, "LFPG");
        assert_eq!(entries[1].ident, "EGLL");
    }

    #[test]
    fn parses_40_and_41_byte_entries_identically() {
        let mut payload40 = entry_40("LKPR", 50.1008, 14.2600);
        payload40.extend(entry_40("EDDF", 50.0264, 8.5431));
        let entries40 = parse_airport_list(&payload40, 2).unwrap();

        let mut payload41 = entry_40("LKPR", 50.1008, 14.2600);
        payload41.push(0xAB);
        payload41.extend(entry_40("EDDF", 50.0264, 8.5431));
        payload41.push(0xAB);
        let entries41 = parse_airport_list(&payload41, 2).unwrap();

        assert_eq!(entries40[0].ident, "LKPR");
        assert_eq!(entries40[0].latitude, 50.1008);
        assert_eq!(entries40, entries41);
    }

    #[test]
    fn unrecognized_entry_size_is_skipped() {
        let payload = vec![0u8; 74]; // 37 bytes/entry
        let err = parse_airport_list(&payload, 2).unwrap_err();
        assert!(matches!(err, Error::UnknownEntrySize(37)));
    }

    #[test]
    fn register_emits_nested_open_close_sequence() {
        use crate::host::stub::{RecordedCall, StubHost};

        let host = StubHost::new();
        let handle = host.attach("test").unwrap();

        FacilityDefinitionBuilder::new()
            .open(FacilityKind::Airport)
            .field("IDENT")
            .open(FacilityKind::Parking)
            .field("NAME")
            .close(FacilityKind::Parking)
            .close(FacilityKind::Airport)
            .register(&host, handle, 5000)
            .unwrap();

        let tokens: Vec<String> = host
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::AddToFacilityDefinition { define_id: 5000, token } => Some(token),
                _ => None,
            })
            .collect();

        assert_eq!(
            tokens,
            vec![
                "OPEN AIRPORT".to_string(),
                "IDENT".to_string(),
                "OPEN PARKING".to_string(),
                "NAME".to_string(),
                "CLOSE PARKING".to_string(),
                "CLOSE AIRPORT".to_string(),
            ]
        );
    }
}

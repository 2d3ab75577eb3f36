//! End-to-end scenarios driven entirely through `StubHost`, exercising the
//! client facade the way an application would.

use std::sync::Arc;
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};

use skybridge_core::config::ConnectOptions;
use skybridge_core::definition::{Dataset, Field, ScalarType};
use skybridge_core::fleet::{pack_waypoints, CreateOptions, Waypoint};
use skybridge_core::host::stub::StubHost;
use skybridge_core::router::Filter;
use skybridge_core::{ClassifiedMessage, Discriminant, SimClient};

fn header(buf: &mut [u8], size: u32, discriminant: u32) {
    LittleEndian::write_u32(&mut buf[0..4], size);
    LittleEndian::write_u32(&mut buf[4..8], 1);
    LittleEndian::write_u32(&mut buf[8..12], discriminant);
}

fn sim_object_data_packet(request_id: u32, define_id: u32, value: i32) -> Vec<u8> {
    let mut buf = vec![0u8; 20];
    header(&mut buf, 20, 3); // SimObjectData
    LittleEndian::write_u32(&mut buf[12..16], request_id);
    LittleEndian::write_u32(&mut buf[16..20], define_id);
    // the decoded record starts right after this minimal envelope in a
    // real packet; this stub keeps it simple and appends the payload raw.
    let mut full = buf;
    full.extend_from_slice(&value.to_le_bytes());
    let len = full.len() as u32;
    LittleEndian::write_u32(&mut full[0..4], len);
    full
}

fn quit_packet() -> Vec<u8> {
    let mut buf = vec![0u8; 12];
    header(&mut buf, 12, 1);
    buf
}

#[tokio::test]
async fn s1_single_definition_round_trip() {
    let host = Arc::new(StubHost::new());
    let client = SimClient::with_host(host.clone(), ConnectOptions::default(), "scenario-s1");
    client.connect().await.unwrap();

    let dataset = Dataset::new(vec![Field::new("CAMERA STATE", "", ScalarType::Int32)]);
    client.register_dataset(2000, dataset).unwrap();
    client.request_data_on_sim_object(2001, 2000, 0, 1, 0, 0, 0, 0).unwrap();

    let sub = client.subscribe("camera", 4, Filter::Discriminant(Discriminant::SimObjectData));
    let mut receiver = sub.receiver;

    host.enqueue_packet(sim_object_data_packet(2001, 2000, 2));
    let message: ClassifiedMessage = tokio::time::timeout(Duration::from_secs(1), receiver.recv())
        .await
        .expect("message should arrive")
        .expect("channel open");

    let payload = message.payload();
    let value: i32 = client.decode(2000, &payload[8..]).unwrap();
    assert_eq!(value, 2);
}

#[tokio::test]
async fn s4_ai_pending_promotion() {
    let host = Arc::new(StubHost::new());
    let client = SimClient::with_host(host, ConnectOptions::default(), "scenario-s4");
    client.connect().await.unwrap();

    client
        .request_parked(
            CreateOptions {
                model: "Airbus A320".into(),
                tail: "AFR123".into(),
                livery: None,
                location: "LKPR".into(),
            },
            7,
        )
        .unwrap();

    let handle = client.acknowledge(7, 42).expect("should be ours");
    assert_eq!(handle.object_id, 42);
    assert_eq!(client.fleet_get(42), Some(handle));
    assert_eq!(client.fleet_len(), 1);
}

#[tokio::test]
async fn s5_reconnect_clears_fleet() {
    let host = Arc::new(StubHost::new());
    let client = SimClient::with_host(host.clone(), ConnectOptions::default(), "scenario-s5");
    client.connect().await.unwrap();

    client
        .request_parked(
            CreateOptions {
                model: "Airbus A320".into(),
                tail: "AFR123".into(),
                livery: None,
                location: "LKPR".into(),
            },
            7,
        )
        .unwrap();
    client.acknowledge(7, 42).unwrap();
    assert_eq!(client.fleet_len(), 1);

    host.enqueue_packet(quit_packet());
    tokio::time::timeout(Duration::from_secs(2), async {
        while client.fleet_len() != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("fleet should clear once the pump observes the quit packet");

    assert!(client.fleet_get(42).is_none());
}

#[test]
fn s6_waypoint_packing() {
    let waypoints = vec![
        Waypoint { lat: 50.0, lon: 14.0, alt: 1500.0, flags: 0x0012_0004, speed: 180.0, throttle: 100.0 },
        Waypoint { lat: 51.0, lon: 15.0, alt: 1600.0, flags: 0, speed: 190.0, throttle: 95.0 },
        Waypoint { lat: 52.0, lon: 16.0, alt: 1700.0, flags: 0, speed: 200.0, throttle: 90.0 },
    ];
    let packed = pack_waypoints(&waypoints);
    assert_eq!(packed.len(), 132);
    assert_eq!(LittleEndian::read_f64(&packed[0..8]), 50.0);
    assert_eq!(LittleEndian::read_u32(&packed[24..28]), 0x0012_0004);
    assert_eq!(LittleEndian::read_f64(&packed[28..36]), 180.0);
}

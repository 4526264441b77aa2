//! Session bring-up and dispatch against the in-memory transport.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use maschine_core::{
    ButtonEvent, ChannelScheduler, DeviceIdentity, NiEventHandler, DEVICE_TYPE_KONTROL_MK2,
    DEVICE_TYPE_MASCHINE_MK3,
};
use maschine_nihia::codec::{
    self, encode_handshake, encode_notification_ack, SoftwareId, DEVICE_ON, SUCCESS,
    WHOLE_MSG_ACQUIRE,
};
use maschine_nihia::transport::mock::MockTransportFactory;
use maschine_nihia::NihiaSession;

fn leading_tag(message: &[u8]) -> u32 {
    u32::from_le_bytes([message[0], message[1], message[2], message[3]])
}

fn handshake_response(request_port: &str, notification_port: &str) -> Vec<u8> {
    let mut out = SUCCESS.to_le_bytes().to_vec();
    out.extend_from_slice(&(request_port.len() as u32 + 1).to_le_bytes());
    out.extend_from_slice(request_port.as_bytes());
    out.push(0);
    out.extend_from_slice(&(notification_port.len() as u32 + 1).to_le_bytes());
    out.extend_from_slice(notification_port.as_bytes());
    out.push(0);
    out
}

/// Script both handshake variants and the subscription ACK.
fn scripted_factory() -> MockTransportFactory {
    let factory = MockTransportFactory::new();

    let global_tag = leading_tag(&encode_handshake(
        &DeviceIdentity::global(DEVICE_TYPE_KONTROL_MK2),
        SoftwareId::KompleteKontrol,
    ));
    let device_tag = leading_tag(&encode_handshake(
        &DeviceIdentity::new(DEVICE_TYPE_KONTROL_MK2, "x"),
        SoftwareId::KompleteKontrol,
    ));
    let ack_tag = leading_tag(&encode_notification_ack("x"));

    factory.script_response(global_tag, handshake_response("g-req", "g-not"));
    factory.script_response(device_tag, handshake_response("d-req", "d-not"));
    factory.script_response(ack_tag, SUCCESS.to_le_bytes().to_vec());
    factory
}

fn wait_until(predicate: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

struct Recorder {
    events: Mutex<Vec<(u32, ButtonEvent)>>,
}

impl NiEventHandler for Recorder {
    fn on_button(&self, index: u32, event: ButtonEvent) {
        self.events.lock().unwrap().push((index, event));
    }
    fn on_knob(&self, _index: u32, _delta: i32) {}
    fn on_main_encoder(&self, _value: i32) {}
    fn on_octave_changed(&self, _base: i32) {}
}

#[test]
fn test_per_device_connect_opens_global_first_then_acquires() {
    let factory = scripted_factory();
    let (scheduler, _tasks) = ChannelScheduler::new(64);
    let session = NihiaSession::new(Arc::new(factory.clone()), scheduler);

    let device = DeviceIdentity::new(DEVICE_TYPE_KONTROL_MK2, "ABC123");
    let connection = session.connect(&device, None).unwrap();
    assert_eq!(connection.identity().serial(), "ABC123");

    // Bootstrap, global request port, bootstrap again, device request port.
    assert_eq!(
        factory.opened_request_ports(),
        [
            maschine_nihia::transport::BOOTSTRAP_PORT.to_owned(),
            "g-req".to_owned(),
            maschine_nihia::transport::BOOTSTRAP_PORT.to_owned(),
            "d-req".to_owned(),
        ]
    );

    // The device connection claimed the hardware.
    let requests = factory.requests();
    assert!(requests.iter().any(|r| r == &WHOLE_MSG_ACQUIRE));

    // Reconnecting another unit reuses the existing global connection.
    let second = DeviceIdentity::new(DEVICE_TYPE_KONTROL_MK2, "DEF456");
    session.connect(&second, None).unwrap();
    let bootstraps = factory
        .opened_request_ports()
        .iter()
        .filter(|p| p.as_str() == maschine_nihia::transport::BOOTSTRAP_PORT)
        .count();
    assert_eq!(bootstraps, 3);

    session.shutdown();
}

#[test]
fn test_direct_access_device_connect_never_acquires() {
    let factory = scripted_factory();
    let (scheduler, _tasks) = ChannelScheduler::new(64);
    let session = NihiaSession::new(Arc::new(factory.clone()), scheduler);

    // A Maschine mk3 is driven over USB; the agent never arbitrates it.
    let device = DeviceIdentity::new(DEVICE_TYPE_MASCHINE_MK3, "M1");
    let _connection = session.connect(&device, None).unwrap();

    let acquires =
        factory.requests().iter().filter(|r| r.as_slice() == WHOLE_MSG_ACQUIRE).count();
    assert_eq!(acquires, 0);

    session.shutdown();
}

#[test]
fn test_device_state_notifications_drive_the_registry() {
    let factory = scripted_factory();
    let (scheduler, _tasks) = ChannelScheduler::new(64);
    let session = NihiaSession::new(Arc::new(factory.clone()), scheduler);

    let global = DeviceIdentity::global(DEVICE_TYPE_KONTROL_MK2);
    let _connection = session.connect(&global, None).unwrap();

    let mut on = codec::NOTIFY_DEVICE_STATE.to_le_bytes().to_vec();
    on.extend_from_slice(&DEVICE_ON.to_le_bytes());
    on.extend_from_slice(&u32::from(DEVICE_TYPE_KONTROL_MK2).to_le_bytes());
    on.extend_from_slice(&3u32.to_le_bytes());
    on.extend_from_slice(b"S1\0");
    factory.inject_notification("g-not", on);

    assert!(wait_until(|| {
        session.registry().single_serial(DEVICE_TYPE_KONTROL_MK2) == Some("S1".to_owned())
    }));

    let mut off = codec::NOTIFY_DEVICE_STATE.to_le_bytes().to_vec();
    off.extend_from_slice(&0u32.to_le_bytes());
    off.extend_from_slice(&u32::from(DEVICE_TYPE_KONTROL_MK2).to_le_bytes());
    off.extend_from_slice(&3u32.to_le_bytes());
    off.extend_from_slice(b"S1\0");
    factory.inject_notification("g-not", off);

    assert!(wait_until(|| {
        session.registry().single_serial(DEVICE_TYPE_KONTROL_MK2).is_none()
    }));

    session.shutdown();
}

#[test]
fn test_lost_claim_is_reacquired() {
    let factory = scripted_factory();
    let (scheduler, _tasks) = ChannelScheduler::new(64);
    let session = NihiaSession::new(Arc::new(factory.clone()), scheduler);

    let device = DeviceIdentity::new(DEVICE_TYPE_KONTROL_MK2, "ABC123");
    let _connection = session.connect(&device, None).unwrap();

    let acquires = |factory: &MockTransportFactory| {
        factory.requests().iter().filter(|r| r.as_slice() == WHOLE_MSG_ACQUIRE).count()
    };
    assert_eq!(acquires(&factory), 1);

    let mut lost = codec::NOTIFY_CLAIM_CHANGED.to_le_bytes().to_vec();
    lost.extend_from_slice(&0u32.to_le_bytes());
    factory.inject_notification("d-not", lost);

    assert!(wait_until(|| acquires(&factory) == 2));

    session.shutdown();
}

#[test]
fn test_button_events_arrive_through_the_scheduler() {
    let factory = scripted_factory();
    let (scheduler, tasks) = ChannelScheduler::new(64);
    let session = NihiaSession::new(Arc::new(factory.clone()), scheduler);

    let recorder = Arc::new(Recorder { events: Mutex::new(Vec::new()) });
    let device = DeviceIdentity::new(DEVICE_TYPE_KONTROL_MK2, "ABC123");
    let _connection = session.connect(&device, Some(recorder.clone())).unwrap();

    // Odd state counter: pressed. Two leading timing words, then subtype.
    let mut raw = codec::NOTIFY_BUTTON.to_le_bytes().to_vec();
    raw.extend_from_slice(&0u32.to_le_bytes());
    raw.extend_from_slice(&0u32.to_le_bytes());
    raw.extend_from_slice(&codec::BUTTON_STATE.to_le_bytes());
    raw.extend_from_slice(&7u32.to_le_bytes());
    raw.extend_from_slice(&1u32.to_le_bytes());
    factory.inject_notification("d-not", raw);

    // Nothing reaches the handler until the consumer drains the scheduler.
    assert!(wait_until(|| tasks.run_one(Duration::from_millis(50))));
    assert_eq!(recorder.events.lock().unwrap().as_slice(), [(7, ButtonEvent::Down)]);

    session.shutdown();
}

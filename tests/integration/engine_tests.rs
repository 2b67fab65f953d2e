//! BLE engine against the simulated central: handshake, request /
//! response service, rename, bounded teardown.

use std::rc::Rc;

use bioinfo::adapters::sim_gatt::SimGatt;
use bioinfo::ble::codec::{BAD_RESPONSE, HANDSHAKE_ACK, OK_RESPONSE};
use bioinfo::ble::engine::{BlePeripheral, EngineSettings};
use bioinfo::ble::{Characteristic, Command};
use bioinfo::config::DeviceName;
use bioinfo::lifecycle::{Executor, ShutdownOutcome, run_until};
use futures_lite::future::block_on;

use crate::mock_hw::{Event, RecordingHandler, eventually, fast_config};

fn engine() -> (Rc<Executor>, BlePeripheral<SimGatt>, Rc<RecordingHandler>) {
    let executor = Rc::new(Executor::new());
    let config = fast_config();
    let engine = BlePeripheral::new(
        SimGatt::new(),
        config.device_name.clone(),
        EngineSettings::from_config(&config),
        executor.clone(),
    );
    let handler = RecordingHandler::new();
    engine.set_event_handler(handler.clone());
    engine.start();
    (executor, engine, handler)
}

/// Connect and complete the handshake.
async fn open_session(engine: &BlePeripheral<SimGatt>) {
    let gatt = engine.gatt();
    gatt.wait_advertising().await;
    gatt.connect();
    gatt.wait_connected().await;
    assert!(gatt.write_request(b"hello"));
    gatt.wait_indications(1).await;
    eventually("request service", || engine.request_service_running()).await;
}

#[test]
fn handshake_opens_a_session() {
    let (executor, engine, handler) = engine();
    block_on(run_until(&executor, open_session(&engine)));

    assert_eq!(engine.gatt().indications(), vec![HANDSHAKE_ACK.to_vec()]);
    assert!(engine.is_authenticated());
    assert_eq!(handler.events(), vec![Event::Connect, Event::HandshakeSuccess]);

    block_on(run_until(&executor, engine.destroy()));
}

#[test]
fn wrong_greeting_forces_disconnect() {
    let (executor, engine, handler) = engine();
    let gatt = engine.gatt().clone();
    block_on(run_until(&executor, async {
        gatt.wait_advertising().await;
        gatt.connect();
        gatt.wait_connected().await;
        gatt.write_request(b"howdy partner");
        gatt.wait_disconnected().await;
        eventually("re-advertising", || gatt.is_advertising()).await;
    }));

    assert_eq!(gatt.peripheral_disconnects(), 1);
    assert!(gatt.indications().is_empty());
    assert_eq!(handler.count(&Event::HandshakeSuccess), 0);
    assert_eq!(handler.events(), vec![Event::Connect, Event::Disconnect]);
    assert!(!engine.request_service_running());

    block_on(run_until(&executor, engine.destroy()));
}

#[test]
fn silent_central_times_out() {
    let (executor, engine, handler) = engine();
    let gatt = engine.gatt().clone();
    block_on(run_until(&executor, async {
        gatt.wait_advertising().await;
        gatt.connect();
        gatt.wait_connected().await;
        gatt.wait_disconnected().await;
    }));
    assert_eq!(handler.count(&Event::HandshakeSuccess), 0);
    assert_eq!(handler.count(&Event::Disconnect), 1);
    block_on(run_until(&executor, engine.destroy()));
}

#[test]
fn malformed_requests_get_bad_and_service_survives() {
    let (executor, engine, handler) = engine();
    let gatt = engine.gatt().clone();
    block_on(run_until(&executor, async {
        open_session(&engine).await;
        let requests: [&[u8]; 5] = [b"reboot", b"name a b", b"", b"\xff\xfe", b"setup_mode"];
        for request in requests {
            let before = gatt.indications().len();
            gatt.write_request(request);
            gatt.wait_indications(before + 1).await;
        }
    }));

    let responses = gatt.indications();
    assert_eq!(
        responses[1..],
        [
            BAD_RESPONSE.to_vec(),
            BAD_RESPONSE.to_vec(),
            BAD_RESPONSE.to_vec(),
            BAD_RESPONSE.to_vec(),
            OK_RESPONSE.to_vec(),
        ]
    );
    assert_eq!(handler.commands(), vec![(Command::SetupMode, None)]);
    assert!(engine.request_service_running());

    block_on(run_until(&executor, engine.destroy()));
}

#[test]
fn each_valid_command_is_delivered_once() {
    let (executor, engine, handler) = engine();
    let gatt = engine.gatt().clone();
    block_on(run_until(&executor, async {
        open_session(&engine).await;
        for request in ["setup_mode", "name kitchen", "data_mode", "name"] {
            let before = gatt.indications().len();
            gatt.write_request(request.as_bytes());
            gatt.wait_indications(before + 1).await;
        }
    }));

    assert_eq!(
        handler.commands(),
        vec![
            (Command::SetupMode, None),
            (Command::UpdateName, Some("kitchen".to_owned())),
            (Command::DataMode, None),
            (Command::UpdateName, None),
        ]
    );
    assert!(gatt.indications()[1..].iter().all(|r| r == OK_RESPONSE));

    block_on(run_until(&executor, engine.destroy()));
}

#[test]
fn command_is_delivered_even_without_ack() {
    let (executor, engine, handler) = engine();
    let gatt = engine.gatt().clone();
    block_on(run_until(&executor, async {
        open_session(&engine).await;
        gatt.set_ack_indications(false);
        gatt.write_request(b"data_mode");
        eventually("command delivery", || !handler.commands().is_empty()).await;
    }));
    assert_eq!(handler.commands(), vec![(Command::DataMode, None)]);
    block_on(run_until(&executor, engine.destroy()));
}

#[test]
fn disconnect_cancels_request_service_and_readvertises() {
    let (executor, engine, handler) = engine();
    let gatt = engine.gatt().clone();
    block_on(run_until(&executor, async {
        open_session(&engine).await;
        gatt.central_disconnect();
        eventually("teardown", || engine.connection().is_none()).await;
        eventually("re-advertising", || gatt.is_advertising()).await;
    }));

    assert!(!engine.request_service_running());
    assert!(!engine.is_authenticated());
    assert_eq!(handler.events().last(), Some(&Event::Disconnect));
    assert_eq!(gatt.advertised_names().len(), 2);

    block_on(run_until(&executor, engine.destroy()));
}

#[test]
fn rename_applies_on_next_advertising_round() {
    let (executor, engine, _handler) = engine();
    let gatt = engine.gatt().clone();
    let mut name = DeviceName::new();
    name.push_str("porch").unwrap();

    block_on(run_until(&executor, async {
        open_session(&engine).await;
        engine.set_device_name(name);
        assert_eq!(gatt.advertised_names(), vec!["bioinfo".to_owned()]);
        gatt.central_disconnect();
        eventually("re-advertising", || gatt.advertised_names().len() == 2).await;
    }));

    assert_eq!(gatt.advertised_names()[1], "porch");
    block_on(run_until(&executor, engine.destroy()));
}

#[test]
fn bioinfo_is_notified_only_in_session() {
    let (executor, engine, handler) = engine();
    let gatt = engine.gatt().clone();
    let payload = [7u8; 20];

    engine.update_bioinfo(&payload);
    assert_eq!(gatt.read(Characteristic::Bioinfo), payload.to_vec());
    assert!(gatt.notifications().is_empty());

    block_on(run_until(&executor, async {
        open_session(&engine).await;
        engine.update_bioinfo(&payload);
    }));
    assert_eq!(gatt.notifications(), vec![payload.to_vec()]);
    assert_eq!(handler.count(&Event::BioinfoUpdated), 2);

    block_on(run_until(&executor, engine.destroy()));
}

#[test]
fn destroy_in_session_drops_link_within_bound() {
    let (executor, engine, handler) = engine();
    let gatt = engine.gatt().clone();
    block_on(run_until(&executor, open_session(&engine)));

    let started = embassy_time::Instant::now();
    let outcome = block_on(run_until(&executor, engine.destroy()));
    assert_eq!(outcome, ShutdownOutcome::Graceful);
    assert!(started.elapsed() < embassy_time::Duration::from_millis(300));

    assert!(!gatt.is_connected());
    assert_eq!(engine.active_tasks(), 0);
    assert_eq!(handler.events().last(), Some(&Event::Disconnect));

    // Idempotent.
    let again = block_on(run_until(&executor, engine.destroy()));
    assert_eq!(again, ShutdownOutcome::Idle);
}

//! Context + states driving the engine and the decoders: transitions,
//! sensor policy, telemetry push, rename, teardown.

use core::future::Future;
use std::rc::Rc;

use bioinfo::adapters::config_store::MemoryConfigStore;
use bioinfo::adapters::sim_gatt::SimGatt;
use bioinfo::adapters::sim_serial::SimSerial;
use bioinfo::ble::codec::{self, OK_RESPONSE};
use bioinfo::ble::Characteristic;
use bioinfo::fsm::StateId;
use bioinfo::fsm::context::Context;
use bioinfo::lifecycle::{Executor, ShutdownOutcome, run_until};
use bioinfo::sensors::dht20::Dht20;
use bioinfo::sensors::pms7003::{self, Pms7003Source};
use bioinfo::sensors::ze07co::{self, Ze07CoSource};
use embassy_time::Duration;
use futures_lite::future::{block_on, or};

use crate::mock_hw::{DHT20_FRAME, MockDht20Bus, SharedStore, eventually, fast_config};

struct Rig {
    executor: Rc<Executor>,
    ctx: Context<SimGatt>,
    gatt: SimGatt,
    pms_line: SimSerial,
    co_line: SimSerial,
    store: Rc<MemoryConfigStore>,
}

impl Rig {
    fn new() -> Self {
        let executor = Rc::new(Executor::new());
        let gatt = SimGatt::new();
        let store = Rc::new(MemoryConfigStore::with_config(fast_config()));
        let ctx = Context::new(
            gatt.clone(),
            Box::new(SharedStore(store.clone())),
            executor.clone(),
        );
        let rig = Self {
            executor,
            ctx,
            gatt,
            pms_line: SimSerial::new(),
            co_line: SimSerial::new(),
            store,
        };
        let started = block_on(run_until(
            &rig.executor,
            rig.ctx.start_sensors(
                Dht20::new(MockDht20Bus::new(DHT20_FRAME), Duration::from_millis(10)),
                Pms7003Source::new(rig.pms_line.clone(), 200, Duration::from_millis(5)),
                Ze07CoSource::new(rig.co_line.clone(), 200, Duration::from_millis(5)),
            ),
        ));
        assert!(started);
        rig.ctx.start();
        rig
    }

    /// Run `script` with the controller loop alongside it.
    fn drive<F: Future<Output = ()>>(&self, script: F) {
        block_on(run_until(
            &self.executor,
            or(script, async {
                self.ctx.run().await.expect("controller loop failed");
            }),
        ));
    }

    fn feed_uart_sensors(&self) {
        self.pms_line
            .push_rx(&pms7003::encode_frame([1, 2, 3, 4, 12, 6, 7, 8, 9, 10, 11, 12]));
        self.co_line.push_rx(&ze07co::encode_frame(35, 5000));
    }

    async fn open_session(&self) {
        self.gatt.wait_advertising().await;
        self.gatt.connect();
        self.gatt.wait_connected().await;
        self.gatt.write_request(b"hello");
        self.gatt.wait_indications(1).await;
        eventually("Data", || self.ctx.current_state() == Some(StateId::Data)).await;
    }

    async fn command(&self, text: &str) {
        let before = self.gatt.indications().len();
        self.gatt.write_request(text.as_bytes());
        let responses = self.gatt.wait_indications(before + 1).await;
        assert_eq!(responses[before], OK_RESPONSE, "'{text}' not accepted");
    }

    fn destroy(&self) {
        let report = block_on(run_until(&self.executor, self.ctx.destroy()));
        assert_ne!(report.engine, ShutdownOutcome::Forced);
    }
}

#[test]
fn advertising_pauses_sensors() {
    let rig = Rig::new();
    assert_eq!(rig.ctx.current_state(), Some(StateId::Advertising));
    assert!(rig.ctx.shared().sensors().all_paused());
    assert!(rig.ctx.sensors().pms7003.is_running());
    rig.destroy();
}

#[test]
fn handshake_enters_data_and_resumes_sensors() {
    let rig = Rig::new();
    rig.drive(rig.open_session());
    assert!(rig.ctx.shared().sensors().none_paused());
    assert_eq!(rig.ctx.state_task_count(), 1);
    rig.destroy();
}

#[test]
fn data_mode_streams_complete_snapshots() {
    let rig = Rig::new();
    rig.drive(async {
        rig.open_session().await;
        rig.feed_uart_sensors();
        rig.gatt.wait_notifications(1).await;
    });

    let pushed = codec::decode_bioinfo(&rig.gatt.notifications()[0]).expect("20-byte payload");
    assert!((pushed.temperature - 25.0).abs() < 1e-4);
    assert!((pushed.humidity - 0.5).abs() < 1e-6);
    assert_eq!(pushed.pm2_5, 12.0);
    assert!((pushed.co_concentration - 3.5).abs() < 1e-4);
    assert!(pushed.last_update >= 0);
    assert_eq!(rig.gatt.read(Characteristic::Bioinfo), rig.gatt.notifications()[0]);
    rig.destroy();
}

#[test]
fn incomplete_telemetry_is_not_pushed() {
    let rig = Rig::new();
    rig.drive(async {
        rig.open_session().await;
        // Only the DHT20 reports; PM2.5 and CO stay unset.
        eventually("dht20", || rig.ctx.sensors().dht20.stats().frames >= 1).await;
        embassy_time::Timer::after(Duration::from_millis(60)).await;
    });
    assert!(rig.gatt.notifications().is_empty());
    assert_eq!(rig.ctx.snapshot().first_unset(), Some("pm2_5"));
    rig.destroy();
}

#[test]
fn disconnect_returns_to_advertising_and_pauses() {
    let rig = Rig::new();
    rig.drive(async {
        rig.open_session().await;
        rig.gatt.central_disconnect();
        eventually("Advertising", || {
            rig.ctx.current_state() == Some(StateId::Advertising)
        })
        .await;
    });
    assert!(rig.ctx.shared().sensors().all_paused());
    assert_eq!(rig.ctx.state_task_count(), 0);
    rig.destroy();
}

#[test]
fn setup_to_data_keeps_the_session() {
    let rig = Rig::new();
    rig.drive(async {
        rig.open_session().await;
        rig.command("setup_mode").await;
        eventually("Setup", || rig.ctx.current_state() == Some(StateId::Setup)).await;
        assert!(rig.ctx.shared().sensors().all_paused());

        rig.command("data_mode").await;
        eventually("Data", || rig.ctx.current_state() == Some(StateId::Data)).await;
    });
    assert!(rig.gatt.is_connected());
    assert!(rig.ctx.engine().is_authenticated());
    assert_eq!(rig.gatt.peripheral_disconnects(), 0);
    assert!(rig.ctx.shared().sensors().none_paused());
    rig.destroy();
}

#[test]
fn rename_in_setup_is_saved_and_advertised_next_round() {
    let rig = Rig::new();
    rig.drive(async {
        rig.open_session().await;
        rig.command("setup_mode").await;
        eventually("Setup", || rig.ctx.current_state() == Some(StateId::Setup)).await;
        rig.command("name greenhouse").await;
        eventually("saved", || rig.store.save_count() == 1).await;

        rig.gatt.central_disconnect();
        eventually("re-advertising", || rig.gatt.advertised_names().len() == 2).await;
    });
    assert_eq!(
        rig.store.stored().map(|c| c.device_name.to_string()),
        Some("greenhouse".to_owned())
    );
    assert_eq!(rig.gatt.advertised_names(), vec!["bioinfo", "greenhouse"]);
    assert_eq!(rig.ctx.current_state(), Some(StateId::Advertising));
    rig.destroy();
}

#[test]
fn unhandled_commands_leave_state_and_link_alone() {
    let rig = Rig::new();
    rig.drive(async {
        rig.open_session().await;
        rig.command("data_mode").await;
        rig.command("name nope").await;
        embassy_time::Timer::after(Duration::from_millis(30)).await;
    });
    assert_eq!(rig.ctx.current_state(), Some(StateId::Data));
    assert!(rig.gatt.is_connected());
    assert_eq!(rig.store.save_count(), 0);
    assert_eq!(rig.ctx.engine().device_name().as_str(), "bioinfo");
    rig.destroy();
}

#[test]
fn destroy_leaves_no_tasks() {
    let rig = Rig::new();
    rig.drive(rig.open_session());
    let report = block_on(run_until(&rig.executor, rig.ctx.destroy()));

    assert_eq!(report.engine, ShutdownOutcome::Graceful);
    assert_eq!(report.dht20, ShutdownOutcome::Graceful);
    assert_eq!(report.pms7003, ShutdownOutcome::Graceful);
    assert_eq!(report.ze07co, ShutdownOutcome::Graceful);
    assert_eq!(rig.ctx.engine().active_tasks(), 0);
    assert!(!rig.ctx.sensors().dht20.is_running());
    assert_eq!(rig.ctx.current_state(), None);
    assert!(!rig.gatt.is_connected());
}

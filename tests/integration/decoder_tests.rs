//! Telemetry decoders over simulated transports: frame validation,
//! resync, pause, bounded teardown.

use bioinfo::adapters::sim_serial::SimSerial;
use bioinfo::lifecycle::{Executor, ShutdownOutcome, run_until};
use bioinfo::sensors::dht20::{Dht20, Dht20Reading};
use bioinfo::sensors::pms7003::{self, Pms7003Reading, Pms7003Source};
use bioinfo::sensors::ze07co::{self, Ze07CoReading, Ze07CoSource};
use bioinfo::sensors::{Decoder, DecoderSettings};
use embassy_time::Duration;
use futures_lite::future::block_on;

use crate::mock_hw::{DHT20_FRAME, MockDht20Bus, eventually, fast_config, settle};

const PMS_WORDS: [u16; 12] = [10, 15, 20, 11, 16, 21, 900, 300, 80, 6, 2, 1];

fn settings() -> DecoderSettings {
    DecoderSettings::from_config(&fast_config())
}

#[test]
fn pms7003_checksum_off_by_one_keeps_reading_and_resyncs_once() {
    let executor = Executor::new();
    let line = SimSerial::new();
    // Large budget so an idle line does not add budget-exhaustion resyncs.
    let source = Pms7003Source::new(line.clone(), 200, Duration::from_millis(5));
    let decoder = Decoder::<Pms7003Reading>::new("PMS7003", settings());

    block_on(run_until(&executor, async {
        assert!(decoder.start(source, &executor).await);
        line.push_rx(&pms7003::encode_frame(PMS_WORDS));
        eventually("first frame", || decoder.stats().frames == 1).await;

        let mut corrupt = pms7003::encode_frame([1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        corrupt[31] = corrupt[31].wrapping_add(1);
        line.push_rx(&corrupt);
        eventually("rejection", || decoder.stats().rejected == 1).await;
    }));

    let latest = decoder.get_latest().reading;
    assert_eq!(latest.concentration_atm.pm2_5, 16);
    assert_eq!(latest.particles.gt_0_3um, 900);

    let stats = decoder.stats();
    assert_eq!((stats.frames, stats.rejected, stats.resyncs), (1, 1, 1));
    assert_eq!(line.discards(), 1);
    assert_eq!(
        line.writes(),
        vec![
            pms7003::ACTIVE_MODE_COMMAND.to_vec(),
            pms7003::ACTIVE_MODE_COMMAND.to_vec(),
        ]
    );

    block_on(run_until(&executor, decoder.destroy()));
}

#[test]
fn idle_line_resyncs_after_retry_budget() {
    let executor = Executor::new();
    let line = SimSerial::new();
    let config = fast_config();
    let source = Ze07CoSource::from_config(line.clone(), &config);
    let decoder = Decoder::<Ze07CoReading>::new("ZE07CO", settings());

    block_on(run_until(&executor, async {
        decoder.start(source, &executor).await;
        eventually("budget resync", || decoder.stats().resyncs >= 2).await;
    }));

    let stats = decoder.stats();
    assert_eq!(stats.rejected, 0, "silence is not a rejected frame");
    assert!(!decoder.get_latest().reading.is_set());
    assert!(line.writes().iter().all(|w| w[..] == ze07co::INIT_COMMAND));
    assert_eq!(line.writes().len() as u32, 1 + stats.resyncs);

    block_on(run_until(&executor, decoder.destroy()));
}

#[test]
fn ze07co_stream_publishes_scaled_values() {
    let executor = Executor::new();
    let line = SimSerial::new();
    let source = Ze07CoSource::new(line.clone(), 200, Duration::from_millis(5));
    let decoder = Decoder::<Ze07CoReading>::new("ZE07CO", settings());

    block_on(run_until(&executor, async {
        decoder.start(source, &executor).await;
        line.push_rx(&ze07co::encode_frame(37, 5000));
        line.push_rx(&ze07co::encode_frame(42, 5000));
        eventually("two frames", || decoder.stats().frames == 2).await;
    }));

    let sample = decoder.get_latest();
    assert!((sample.reading.concentration_ppm - 4.2).abs() < 1e-4);
    assert!((sample.reading.range_ppm - 500.0).abs() < 1e-3);
    assert_eq!(line.pending_rx(), 0);

    block_on(run_until(&executor, decoder.destroy()));
}

#[test]
fn paused_decoder_leaves_bytes_on_the_line() {
    let executor = Executor::new();
    let line = SimSerial::new();
    let source = Ze07CoSource::new(line.clone(), 200, Duration::from_millis(5));
    let decoder = Decoder::<Ze07CoReading>::new("ZE07CO", settings());
    decoder.pause();

    block_on(run_until(&executor, decoder.start(source, &executor)));
    line.push_rx(&ze07co::encode_frame(10, 5000));
    settle(&executor, 50);
    assert_eq!(line.pending_rx(), ze07co::FRAME_LEN);
    assert_eq!(decoder.stats().frames, 0);

    decoder.resume();
    block_on(run_until(&executor, eventually("frame after resume", || {
        decoder.stats().frames == 1
    })));
    assert!(decoder.get_latest().reading.is_set());

    block_on(run_until(&executor, decoder.destroy()));
}

#[test]
fn dht20_decoder_publishes_humidity_and_temperature() {
    let executor = Executor::new();
    let bus = MockDht20Bus::new(DHT20_FRAME);
    let decoder = Decoder::<Dht20Reading>::new("DHT20", settings());

    block_on(run_until(&executor, async {
        assert!(decoder.start(Dht20::new(bus.clone(), Duration::from_millis(10)), &executor).await);
        eventually("dht20 frame", || decoder.stats().frames >= 1).await;
    }));

    let reading = decoder.get_latest().reading;
    assert!((reading.humidity - 0.5).abs() < 1e-6);
    assert!((reading.temperature - 25.0).abs() < 1e-4);
    assert!(bus.triggers() >= 1);

    block_on(run_until(&executor, decoder.destroy()));
}

#[test]
fn uncalibrated_dht20_does_not_start() {
    let executor = Executor::new();
    let bus = MockDht20Bus::with_status(&[0x08], DHT20_FRAME);
    let decoder = Decoder::<Dht20Reading>::new("DHT20", settings());

    let started = block_on(run_until(
        &executor,
        decoder.start(Dht20::new(bus.clone(), Duration::from_millis(10)), &executor),
    ));
    assert!(!started);
    assert!(!decoder.is_running());
    assert_eq!(bus.triggers(), 0);
    assert_eq!(
        block_on(run_until(&executor, decoder.destroy())),
        ShutdownOutcome::Idle
    );
}

#[test]
fn destroy_is_bounded_and_idempotent() {
    let executor = Executor::new();
    let line = SimSerial::new();
    let source = Pms7003Source::new(line, 200, Duration::from_millis(5));
    let decoder = Decoder::<Pms7003Reading>::new("PMS7003", settings());

    block_on(run_until(&executor, decoder.start(source, &executor)));
    assert!(decoder.is_running());

    let started = embassy_time::Instant::now();
    let outcome = block_on(run_until(&executor, decoder.destroy()));
    assert_eq!(outcome, ShutdownOutcome::Graceful);
    assert!(started.elapsed() < Duration::from_millis(300));
    assert!(!decoder.is_running());

    let again = block_on(run_until(&executor, decoder.destroy()));
    assert_eq!(again, ShutdownOutcome::Idle);
}

//! Fuzz target: PMS7003 / ZE07-CO / DHT20 frame decoders
//!
//! Drives arbitrary byte sequences into every decoder and asserts that
//! they never panic and that anything accepted carries a valid checksum
//! and in-range values.
//!
//! cargo fuzz run fuzz_frame_decoder

#![no_main]

use bioinfo::sensors::dht20;
use bioinfo::sensors::pms7003::{self, Pms7003};
use bioinfo::sensors::transport::FrameCodec;
use bioinfo::sensors::ze07co::{self, Ze07Co};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(reading) = Pms7003::decode(data) {
        assert_eq!(&data[..2], &pms7003::MARKER);
        let stored = u16::from_be_bytes([data[30], data[31]]);
        let frame = data.first_chunk::<{ pms7003::FRAME_LEN }>().unwrap();
        assert_eq!(pms7003::checksum(frame), stored);
        assert!(reading.concentration_atm.pm2_5 >= 0);
    }

    if let Ok(reading) = Ze07Co::decode(data) {
        assert_eq!(data[0], ze07co::START_BYTE);
        let frame = data.first_chunk::<{ ze07co::FRAME_LEN }>().unwrap();
        assert_eq!(ze07co::checksum(frame), data[8]);
        assert!(reading.concentration_ppm >= 0.0);
        assert!(reading.range_ppm <= 6553.6);
    }

    if let Ok(frame) = <&[u8; dht20::FRAME_LEN]>::try_from(data) {
        let reading = dht20::decode(frame);
        assert!((0.0..1.0).contains(&reading.humidity));
        assert!((-50.0..150.0).contains(&reading.temperature));
    }
});

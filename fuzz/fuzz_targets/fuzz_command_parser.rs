//! Fuzz target: request grammar
//!
//! Arbitrary Request payloads must either parse into a command whose
//! token matches the text, or be rejected; never panic.
//!
//! cargo fuzz run fuzz_command_parser

#![no_main]

use bioinfo::ble::codec::parse_request;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = core::str::from_utf8(data) else {
        return;
    };
    if let Ok((command, argument)) = parse_request(text) {
        assert!(text.starts_with(command.token()));
        if let Some(argument) = argument {
            assert!(!argument.contains(' '));
            assert_eq!(text.len(), command.token().len() + 1 + argument.len());
        } else {
            assert_eq!(text, command.token());
        }
    }
});

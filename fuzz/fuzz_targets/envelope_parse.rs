//! Fuzz the schema validation boundary.
//!
//! Arbitrary bytes -> JSON -> `Envelope::parse`. The parser must either
//! produce a typed envelope or reject silently; it must never panic, and
//! anything it accepts must survive a serialize/parse round trip.

#![no_main]

use libfuzzer_sys::fuzz_target;
use transom_proto::Envelope;

fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };
    if let Some(envelope) = Envelope::parse(&value) {
        let reparsed = Envelope::parse(&envelope.to_value());
        assert_eq!(reparsed.as_ref(), Some(&envelope));
    }
});

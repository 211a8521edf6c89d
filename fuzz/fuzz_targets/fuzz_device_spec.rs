//! Fuzz target for `GAVID_DEVICE` parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;
use gavid_core::engine::DeviceSpec;

fuzz_target!(|raw: &str| {
    // Anything that parses must print back to something that parses the same.
    if let Ok(spec) = raw.parse::<DeviceSpec>() {
        let again: DeviceSpec = spec.to_string().parse().unwrap();
        assert_eq!(spec, again);
    }
});

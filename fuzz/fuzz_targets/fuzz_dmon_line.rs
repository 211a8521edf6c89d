//! Fuzz target for `dcgmi dmon` row parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;
use gavid_core::telemetry::dcgm::{parse_dmon_line, row_to_sample, DEFAULT_FIELD_IDS};

fuzz_target!(|line: &str| {
    if let Ok(Some(row)) = parse_dmon_line(line, DEFAULT_FIELD_IDS.len()) {
        assert_eq!(row.values.len(), DEFAULT_FIELD_IDS.len());
        let _ = row_to_sample(&DEFAULT_FIELD_IDS, &row, 0.0);
    }
});

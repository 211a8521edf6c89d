// Copyright 2024-2026 GAVID Contributors
// Licensed under the Apache License, Version 2.0

//! DCGM backend driven through `dcgmi dmon`.
//!
//! `dcgmi dmon` registers field watches with the host engine and prints one
//! row per update interval. A reader thread keeps the latest row; `sample`
//! returns it. Terminating the child drops the watches.

use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use super::backend::TelemetryBackend;
use super::error::TelemetryError;
use super::sample::{now_epoch_s, MetricSample};

const SOURCE: &str = "dcgm";
const WATCHER_EXITED: &str = "dcgmi dmon exited";

/// GPU utilization, percent.
pub const FIELD_GPU_UTIL: u16 = 203;
/// Memory copy utilization, percent.
pub const FIELD_MEM_COPY_UTIL: u16 = 204;
/// Framebuffer used, MiB.
pub const FIELD_FB_USED: u16 = 252;
/// Framebuffer total, MiB.
pub const FIELD_FB_TOTAL: u16 = 250;
/// Power draw, W.
pub const FIELD_POWER_USAGE: u16 = 155;
/// Power management limit, W.
pub const FIELD_POWER_LIMIT: u16 = 160;
/// GPU temperature, C.
pub const FIELD_GPU_TEMP: u16 = 150;

pub const DEFAULT_FIELD_IDS: [u16; 7] = [
    FIELD_GPU_UTIL,
    FIELD_MEM_COPY_UTIL,
    FIELD_FB_USED,
    FIELD_FB_TOTAL,
    FIELD_POWER_USAGE,
    FIELD_POWER_LIMIT,
    FIELD_GPU_TEMP,
];

/// Settings for the `dcgmi dmon` watcher.
#[derive(Debug, Clone)]
pub struct DcgmConfig {
    pub dcgmi_path: PathBuf,
    pub field_ids: Vec<u16>,
    pub gpu_index: u32,
    pub update_interval: Duration,
    pub startup_timeout: Duration,
}

/// One parsed data row: values in `field_ids` order.
#[derive(Debug, Clone, PartialEq)]
pub struct DmonRow {
    pub gpu_index: u32,
    pub values: Vec<f64>,
}

/// Parse a `dcgmi dmon` output line.
///
/// Header and comment lines yield `Ok(None)`. A data row with a blank
/// (`N/A`) value or the wrong column count is an error.
pub fn parse_dmon_line(line: &str, field_count: usize) -> Result<Option<DmonRow>, String> {
    let mut tokens = line.split_whitespace();
    match tokens.next() {
        Some("GPU") => {}
        _ => return Ok(None),
    }
    let gpu_index = tokens
        .next()
        .and_then(|t| t.parse::<u32>().ok())
        .ok_or_else(|| format!("malformed entity in '{}'", line.trim()))?;

    let mut values = Vec::with_capacity(field_count);
    let rest: Vec<&str> = tokens.collect();
    let mut i = 0;
    while i < rest.len() {
        // `N/A` is sometimes printed as two tokens: `N/` `A`.
        let token = if rest[i] == "N/" && rest.get(i + 1) == Some(&"A") {
            i += 1;
            "N/A"
        } else {
            rest[i]
        };
        if token.eq_ignore_ascii_case("N/A") {
            return Err(format!("field {} reported N/A", values.len()));
        }
        let value = token
            .parse::<f64>()
            .map_err(|_| format!("unparseable value '{}'", token))?;
        values.push(value);
        i += 1;
    }

    if values.len() != field_count {
        return Err(format!(
            "expected {} values, row has {}",
            field_count,
            values.len()
        ));
    }
    Ok(Some(DmonRow { gpu_index, values }))
}

/// Map a row onto a sample; fields that were not requested read as zero.
pub fn row_to_sample(field_ids: &[u16], row: &DmonRow, timestamp: f64) -> MetricSample {
    let get = |id: u16| {
        field_ids
            .iter()
            .position(|f| *f == id)
            .and_then(|i| row.values.get(i).copied())
            .unwrap_or(0.0)
    };
    MetricSample {
        gpu_util: get(FIELD_GPU_UTIL),
        mem_util: get(FIELD_MEM_COPY_UTIL),
        memory_used_mb: get(FIELD_FB_USED),
        memory_total_mb: get(FIELD_FB_TOTAL),
        power_w: get(FIELD_POWER_USAGE),
        power_limit_w: get(FIELD_POWER_LIMIT),
        temperature_c: get(FIELD_GPU_TEMP),
        timestamp,
    }
}

type Latest = Arc<Mutex<Option<Result<DmonRow, String>>>>;

/// Live DCGM watch on a single GPU.
pub struct DcgmBackend {
    child: Option<Child>,
    reader: Option<JoinHandle<()>>,
    latest: Latest,
    field_ids: Vec<u16>,
    gpu_index: u32,
}

impl DcgmBackend {
    /// Spawn the watcher and wait for its first complete row.
    pub fn start(config: DcgmConfig) -> Result<Self, TelemetryError> {
        if config.field_ids.is_empty() {
            return Err(TelemetryError::unavailable(SOURCE, "no field ids configured"));
        }
        let fields = config
            .field_ids
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let delay_ms = config.update_interval.as_millis().max(100).to_string();

        let mut child = Command::new(&config.dcgmi_path)
            .args(["dmon", "-i", &config.gpu_index.to_string(), "-e", &fields, "-d", &delay_ms])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                TelemetryError::unavailable(SOURCE, format!("{}: {}", config.dcgmi_path.display(), e))
            })?;

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                terminate(&mut child);
                return Err(TelemetryError::unavailable(SOURCE, "watcher stdout not captured"));
            }
        };

        let latest: Latest = Arc::new(Mutex::new(None));
        let (first_tx, first_rx) = mpsc::channel();
        let field_count = config.field_ids.len();
        let shared = latest.clone();
        let reader = std::thread::Builder::new()
            .name("dcgm-dmon".into())
            .spawn(move || {
                let mut first = Some(first_tx);
                for line in BufReader::new(stdout).lines() {
                    let Ok(line) = line else { break };
                    let parsed = match parse_dmon_line(&line, field_count) {
                        Ok(None) => continue,
                        Ok(Some(row)) => Ok(row),
                        Err(e) => Err(e),
                    };
                    if let Some(tx) = first.take() {
                        let _ = tx.send(parsed.clone());
                    }
                    *shared.lock() = Some(parsed);
                }
                tracing::debug!("dcgmi dmon output closed");
                *shared.lock() = Some(Err(WATCHER_EXITED.to_string()));
            })
            .map_err(|e| TelemetryError::unavailable(SOURCE, e))?;

        let mut backend = Self {
            child: Some(child),
            reader: Some(reader),
            latest,
            field_ids: config.field_ids,
            gpu_index: config.gpu_index,
        };

        let first = first_rx.recv_timeout(config.startup_timeout);
        match first {
            Ok(Ok(_)) => Ok(backend),
            Ok(Err(reason)) => {
                backend.shutdown();
                Err(TelemetryError::unavailable(SOURCE, reason))
            }
            Err(_) => {
                backend.shutdown();
                Err(TelemetryError::unavailable(
                    SOURCE,
                    "no reading from host engine before timeout",
                ))
            }
        }
    }

    fn shutdown(&mut self) {
        if let Some(mut child) = self.child.take() {
            terminate(&mut child);
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

fn terminate(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

impl TelemetryBackend for DcgmBackend {
    fn sample(&mut self) -> Result<MetricSample, TelemetryError> {
        match self.latest.lock().as_ref() {
            Some(Ok(row)) => Ok(row_to_sample(&self.field_ids, row, now_epoch_s())),
            Some(Err(reason)) => Err(TelemetryError::sample_failed(SOURCE, reason)),
            None => Err(TelemetryError::sample_failed(SOURCE, "no reading available")),
        }
    }

    fn close(&mut self) -> Result<(), TelemetryError> {
        self.shutdown();
        Ok(())
    }

    fn source_name(&self) -> &str {
        SOURCE
    }

    fn device_name(&self) -> Option<String> {
        Some(format!("GPU {}", self.gpu_index))
    }
}

impl Drop for DcgmBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lines_are_skipped() {
        assert_eq!(parse_dmon_line("#Entity   GPUTL  MCUTL", 2).unwrap(), None);
        assert_eq!(parse_dmon_line("ID", 2).unwrap(), None);
        assert_eq!(parse_dmon_line("", 2).unwrap(), None);
    }

    #[test]
    fn test_data_row() {
        let row = parse_dmon_line("GPU 0   37   12   2048   16384   95.5   300.0   61", 7)
            .unwrap()
            .unwrap();
        assert_eq!(row.gpu_index, 0);
        assert_eq!(row.values, vec![37.0, 12.0, 2048.0, 16384.0, 95.5, 300.0, 61.0]);
    }

    #[test]
    fn test_na_is_rejected() {
        assert!(parse_dmon_line("GPU 0  37  N/A", 2).is_err());
        assert!(parse_dmon_line("GPU 0  37  N/ A", 2).is_err());
    }

    #[test]
    fn test_wrong_column_count_is_rejected() {
        assert!(parse_dmon_line("GPU 1  37", 2).is_err());
    }

    #[test]
    fn test_row_mapping_follows_field_order() {
        let ids = [FIELD_GPU_TEMP, FIELD_GPU_UTIL, FIELD_FB_USED, FIELD_FB_TOTAL];
        let row = DmonRow {
            gpu_index: 0,
            values: vec![70.0, 99.0, 100.0, 200.0],
        };
        let s = row_to_sample(&ids, &row, 5.0);
        assert_eq!(s.temperature_c, 70.0);
        assert_eq!(s.gpu_util, 99.0);
        assert_eq!(s.memory_used_mb, 100.0);
        assert_eq!(s.memory_total_mb, 200.0);
        assert_eq!(s.power_w, 0.0);
        assert_eq!(s.timestamp, 5.0);
    }

    #[cfg(unix)]
    fn fake_dcgmi(dir: &std::path::Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("dcgmi");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    fn watcher_config(dcgmi_path: PathBuf) -> DcgmConfig {
        DcgmConfig {
            dcgmi_path,
            field_ids: vec![FIELD_GPU_UTIL, FIELD_GPU_TEMP],
            gpu_index: 0,
            update_interval: Duration::from_millis(100),
            startup_timeout: Duration::from_secs(5),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_sample_fails_after_watcher_exits() {
        let dir = tempfile::tempdir().unwrap();
        let dcgmi = fake_dcgmi(dir.path(), "echo '#Entity GPUTL TMPTR'\necho 'GPU 0 37 61'");
        let mut backend = DcgmBackend::start(watcher_config(dcgmi)).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let err = loop {
            match backend.sample() {
                Err(e) => break e,
                Ok(sample) => {
                    assert_eq!(sample.gpu_util, 37.0);
                    assert!(std::time::Instant::now() < deadline, "stale row kept after exit");
                    std::thread::sleep(Duration::from_millis(20));
                }
            }
        };
        assert!(matches!(err, TelemetryError::SampleFailed { .. }));
        assert!(err.to_string().contains(WATCHER_EXITED));
        backend.close().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_live_watcher_serves_latest_row() {
        let dir = tempfile::tempdir().unwrap();
        let dcgmi = fake_dcgmi(dir.path(), "echo 'GPU 0 42 55'\nsleep 30");
        let mut backend = DcgmBackend::start(watcher_config(dcgmi)).unwrap();
        let sample = backend.sample().unwrap();
        assert_eq!(sample.gpu_util, 42.0);
        assert_eq!(sample.temperature_c, 55.0);
        backend.close().unwrap();
    }

    #[test]
    fn test_missing_binary_is_unavailable() {
        let config = DcgmConfig {
            dcgmi_path: PathBuf::from("/nonexistent/dcgmi"),
            field_ids: DEFAULT_FIELD_IDS.to_vec(),
            gpu_index: 0,
            update_interval: Duration::from_millis(100),
            startup_timeout: Duration::from_millis(200),
        };
        assert!(matches!(
            DcgmBackend::start(config),
            Err(TelemetryError::BackendUnavailable { .. })
        ));
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Append-only audit trail of what the relay received and sent.
//!
//! Every line is `<timestamp> - <event>`. Writes are best effort: a failing
//! write is reported through `tracing` and never interrupts a worker.

use crate::errors::RelayError;
use crate::record::TelemetryRecord;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Something worth leaving a trace of.
pub enum AuditEvent<'a> {
    Received {
        record: &'a TelemetryRecord,
        source: SocketAddr,
    },
    Sent {
        record: &'a TelemetryRecord,
    },
    SendFailed {
        record: &'a TelemetryRecord,
        error: &'a dyn fmt::Display,
    },
    Evicted {
        record: &'a TelemetryRecord,
    },
    Dropped {
        record: &'a TelemetryRecord,
        reason: &'a str,
    },
}

impl fmt::Display for AuditEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Received { record, source } => {
                write!(f, "Received telemetry from {source}: {record}")
            }
            Self::Sent { record } => write!(f, "Sent telemetry to earth: {record}"),
            Self::SendFailed { record, error } => {
                write!(f, "Failed to send telemetry to earth ({error}): {record}")
            }
            Self::Evicted { record } => write!(f, "Evicted telemetry from full buffer: {record}"),
            Self::Dropped { record, reason } => {
                write!(f, "Dropped telemetry ({reason}): {record}")
            }
        }
    }
}

#[derive(Debug)]
pub struct AuditLog {
    sink: Option<Mutex<File>>,
    path: Option<PathBuf>,
}

impl AuditLog {
    /// Opens `path` for appending, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| RelayError::AuditLog {
                path: path.clone(),
                source,
            })?;
        debug!("Audit log opened at {}", path.display());
        Ok(Self {
            sink: Some(Mutex::new(file)),
            path: Some(path),
        })
    }

    /// An audit log that discards everything.
    pub fn disabled() -> Self {
        Self {
            sink: None,
            path: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Appends one line. The line goes straight to the file without user-space
    /// buffering so it survives the process dying right after.
    pub fn record(&self, event: AuditEvent<'_>) {
        let Some(sink) = &self.sink else {
            return;
        };
        let line = format!(
            "{} - {}\n",
            chrono::Local::now().format(TIMESTAMP_FORMAT),
            event
        );
        let mut file = match sink.lock() {
            Ok(file) => file,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = file.write_all(line.as_bytes()) {
            warn!("Failed to write audit log entry: {}", e);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::net::{IpAddr, Ipv4Addr};
    use tracing_test::traced_test;

    fn record(seq: i64) -> TelemetryRecord {
        [("seq", json!(seq))].into_iter().collect()
    }

    #[test]
    fn test_appends_timestamped_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let audit = AuditLog::open(&path).unwrap();
        let source = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), 50055);

        audit.record(AuditEvent::Received {
            record: &record(1),
            source,
        });
        audit.record(AuditEvent::Sent { record: &record(1) });
        audit.record(AuditEvent::SendFailed {
            record: &record(2),
            error: &"connection reset",
        });

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with(r#" - Received telemetry from 10.0.0.2:50055: {"seq":1}"#));
        assert!(lines[1].ends_with(r#" - Sent telemetry to earth: {"seq":1}"#));
        assert!(lines[2]
            .ends_with(r#" - Failed to send telemetry to earth (connection reset): {"seq":2}"#));

        // "YYYY-MM-DD HH:MM:SS.mmm"
        let timestamp = lines[0].split(" - ").next().unwrap();
        assert_eq!(timestamp.len(), 23);
    }

    #[test]
    fn test_reopen_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        AuditLog::open(&path)
            .unwrap()
            .record(AuditEvent::Sent { record: &record(1) });
        AuditLog::open(&path)
            .unwrap()
            .record(AuditEvent::Sent { record: &record(2) });

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn test_open_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("audit.log");
        let err = AuditLog::open(&path).unwrap_err();
        assert!(matches!(err, RelayError::AuditLog { .. }));
    }

    #[test]
    #[traced_test]
    fn test_write_failure_is_logged_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        std::fs::write(&path, "").unwrap();
        let audit = AuditLog {
            sink: Some(Mutex::new(File::open(&path).unwrap())),
            path: Some(path.clone()),
        };

        audit.record(AuditEvent::Sent { record: &record(1) });
        audit.record(AuditEvent::Sent { record: &record(2) });

        assert!(logs_contain("Failed to write audit log entry"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_disabled_discards() {
        let audit = AuditLog::disabled();
        assert!(!audit.is_enabled());
        assert!(audit.path().is_none());
        audit.record(AuditEvent::Evicted { record: &record(3) });
    }
}

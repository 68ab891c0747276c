// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the telemetry relay.

use std::path::PathBuf;

/// Failure to turn bytes into a telemetry record or back.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed telemetry payload: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("telemetry payload must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("failed to encode telemetry record: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("datagram exceeds the {max} byte limit")]
    Oversized { max: usize },
}

/// Failure to push one record to earth. Always handled by the forwarder.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("{0}")]
    Encode(#[from] CodecError),

    #[error("not connected to earth")]
    NotConnected,

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Invalid relay configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors surfaced to whoever owns the relay. Steady-state link failures are
/// handled inside the workers and never show up here.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to bind rover listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to connect to earth at {addr}: {source}")]
    InitialConnect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open audit log {}: {source}", path.display())]
    AuditLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("relay worker terminated abnormally: {0}")]
    Worker(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ConfigError::InvalidConfig("buffer capacity must be greater than 0".into());
        assert_eq!(
            error.to_string(),
            "Invalid configuration: buffer capacity must be greater than 0"
        );

        let error = RelayError::InitialConnect {
            addr: "127.0.0.1:60066".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        };
        assert!(error
            .to_string()
            .starts_with("failed to connect to earth at 127.0.0.1:60066"));
    }

    #[test]
    fn test_oversized_display() {
        let error = CodecError::Oversized { max: 1024 };
        assert_eq!(error.to_string(), "datagram exceeds the 1024 byte limit");
    }

    #[test]
    fn test_send_error_from_io() {
        let error: SendError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed").into();
        assert_eq!(error.to_string(), "pipe closed");
        assert_eq!(SendError::NotConnected.to_string(), "not connected to earth");
    }

    #[test]
    fn test_config_error_converts() {
        let error: RelayError = ConfigError::InvalidConfig("bad".into()).into();
        assert!(matches!(error, RelayError::Config(_)));
    }
}

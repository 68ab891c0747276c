// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Address the rover listener binds to when none is configured.
pub const DEFAULT_ROVER_HOST: &str = "0.0.0.0";
pub const DEFAULT_ROVER_PORT: u16 = 50055;

/// Mission control endpoint used when none is configured.
pub const DEFAULT_EARTH_HOST: &str = "127.0.0.1";
pub const DEFAULT_EARTH_PORT: u16 = 60066;

/// Number of telemetry records kept in memory while earth is unreachable.
pub const DEFAULT_BUFFER_CAPACITY: usize = 500;

/// Largest datagram accepted from the rover. Anything bigger is rejected
/// rather than decoded from a truncated buffer.
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 1024;

/// Largest payload a UDP datagram over IPv4 can carry.
pub const MAX_UDP_PAYLOAD: usize = 65_507;

pub const DEFAULT_RESEND_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_IDLE_POLL: Duration = Duration::from_millis(100);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_FORWARDER_RESTART_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(10);

/// Pause after a failed receive, doubled for each consecutive failure up to
/// the maximum.
pub const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(10);
pub const MAX_RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

pub const DEFAULT_AUDIT_LOG: &str = "telemetry_relay.log";
pub const DEFAULT_LOG_LEVEL: &str = "info";

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Rover listener: receives telemetry datagrams and buffers them.
//!
//! Each datagram carries one JSON encoded record. Valid records are written to
//! the audit log and then pushed into the shared buffer, evicting the oldest
//! pending record if the buffer is full. Malformed datagrams and socket errors
//! mark the rover link down but never stop the listener. The sender gets no
//! backpressure of any kind.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::audit::{AuditEvent, AuditLog};
use crate::codec;
use crate::constants::{MAX_RECEIVE_ERROR_BACKOFF, RECEIVE_ERROR_BACKOFF};
use crate::errors::{CodecError, RelayError};
use crate::link_status::InboundLink;
use crate::record::TelemetryRecord;
use crate::ring_buffer::{EnqueueOutcome, RingBuffer};
use crate::stats::RelayStats;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

/// Configuration for the rover listener
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Host to bind the UDP socket to (e.g., "0.0.0.0")
    pub host: String,
    /// Port to bind the UDP socket to, 0 picks a free port
    pub port: u16,
    /// Largest datagram accepted as a single record
    pub max_datagram_size: usize,
}

// DatagramReader abstracts where datagrams come from.
enum DatagramReader {
    /// UDP socket reader
    UdpSocket(tokio::net::UdpSocket),

    /// Mirror reader for testing - replays a fixed datagram
    #[allow(dead_code)]
    MirrorTest(Vec<u8>, SocketAddr),

    /// Failing reader for testing - every read returns the same error
    #[allow(dead_code)]
    FailingTest(std::io::ErrorKind),
}

impl DatagramReader {
    /// Blocks until a datagram arrives. `limit` is the largest accepted
    /// payload; the receive buffer is one byte larger so an oversized
    /// datagram shows up as such instead of being silently truncated.
    async fn read(&self, limit: usize) -> std::io::Result<(Vec<u8>, SocketAddr)> {
        match self {
            DatagramReader::UdpSocket(socket) => {
                let mut buf = vec![0; limit + 1];
                let (amt, src) = socket.recv_from(&mut buf).await?;
                buf.truncate(amt);
                Ok((buf, src))
            }
            DatagramReader::MirrorTest(data, src) => Ok((data.clone(), *src)),
            DatagramReader::FailingTest(kind) => Err(std::io::Error::from(*kind)),
        }
    }

    fn local_addr(&self) -> std::io::Result<SocketAddr> {
        match self {
            DatagramReader::UdpSocket(socket) => socket.local_addr(),
            DatagramReader::MirrorTest(_, src) => Ok(*src),
            DatagramReader::FailingTest(kind) => Err(std::io::Error::from(*kind)),
        }
    }
}

/// Receives rover telemetry and feeds the shared buffer.
pub struct IngestListener {
    cancel_token: CancellationToken,
    reader: DatagramReader,
    buffer: Arc<RingBuffer<TelemetryRecord>>,
    link: InboundLink,
    audit: Arc<AuditLog>,
    stats: Arc<RelayStats>,
    max_datagram_size: usize,
}

impl IngestListener {
    /// Binds the UDP socket described by `config`.
    pub async fn new(
        config: &IngestConfig,
        buffer: Arc<RingBuffer<TelemetryRecord>>,
        link: InboundLink,
        audit: Arc<AuditLog>,
        stats: Arc<RelayStats>,
        cancel_token: CancellationToken,
    ) -> Result<IngestListener, RelayError> {
        let addr = format!("{}:{}", config.host, config.port);
        let socket = tokio::net::UdpSocket::bind(&addr)
            .await
            .map_err(|source| RelayError::Bind {
                addr: addr.clone(),
                source,
            })?;

        Ok(IngestListener {
            cancel_token,
            reader: DatagramReader::UdpSocket(socket),
            buffer,
            link,
            audit,
            stats,
            max_datagram_size: config.max_datagram_size,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.reader.local_addr()
    }

    /// Main loop. Runs until the cancel token fires, then drops the socket.
    pub async fn spin(self) {
        debug!(
            "Listening for rover telemetry on {}",
            self.local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "<unknown>".to_string())
        );
        let mut consecutive_errors: u32 = 0;
        loop {
            let received = tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => break,
                received = self.reader.read(self.max_datagram_size) => received,
            };
            if received.is_err() {
                consecutive_errors = consecutive_errors.saturating_add(1);
            } else {
                consecutive_errors = 0;
            }
            self.handle_datagram(received);

            if consecutive_errors > 0 && !self.receive_error_backoff(consecutive_errors).await {
                break;
            }
        }
        debug!("Rover listener stopped");
    }

    /// Waits after a failed receive. Returns false if cancelled meanwhile.
    async fn receive_error_backoff(&self, consecutive_errors: u32) -> bool {
        let doublings = consecutive_errors.saturating_sub(1).min(16);
        let backoff = RECEIVE_ERROR_BACKOFF
            .saturating_mul(1 << doublings)
            .min(MAX_RECEIVE_ERROR_BACKOFF);
        tokio::select! {
            _ = sleep(backoff) => true,
            _ = self.cancel_token.cancelled() => false,
        }
    }

    /// Receives and processes one datagram.
    #[allow(dead_code)]
    async fn consume_datagram(&self) {
        let received = self.reader.read(self.max_datagram_size).await;
        self.handle_datagram(received);
    }

    fn handle_datagram(&self, received: std::io::Result<(Vec<u8>, SocketAddr)>) {
        let (buf, src) = match received {
            Ok(received) => received,
            Err(e) => {
                error!("Error receiving telemetry: {}", e);
                self.stats.record_receive_error();
                self.link.set(false);
                return;
            }
        };

        match self.decode(&buf) {
            Ok(record) => {
                trace!("Received telemetry from {}: {}", src, record);
                self.audit.record(AuditEvent::Received {
                    record: &record,
                    source: src,
                });
                self.insert(record);
                self.stats.record_received();
                self.link.set(true);
            }
            Err(e) => {
                error!("Error decoding telemetry from {}: {}", src, e);
                self.stats.record_decode_error();
                self.link.set(false);
            }
        }
    }

    fn decode(&self, buf: &[u8]) -> Result<TelemetryRecord, CodecError> {
        if buf.len() > self.max_datagram_size {
            return Err(CodecError::Oversized {
                max: self.max_datagram_size,
            });
        }
        codec::decode(buf)
    }

    fn insert(&self, record: TelemetryRecord) {
        match self.buffer.enqueue(record) {
            EnqueueOutcome::Accepted => {}
            EnqueueOutcome::Evicted(oldest) => {
                let total = self.stats.record_evicted();
                warn!(
                    "Telemetry buffer full, discarded oldest record ({} discarded so far)",
                    total
                );
                self.audit.record(AuditEvent::Evicted { record: &oldest });
            }
            EnqueueOutcome::Closed(record) => {
                debug!("Telemetry buffer closed, dropping record");
                self.audit.record(AuditEvent::Dropped {
                    record: &record,
                    reason: "relay shutting down",
                });
            }
        }
    }
}

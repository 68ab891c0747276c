// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Earth forwarder: drains the shared buffer over a stream connection.
//!
//! Records go out one at a time in buffer order. A record that fails to send
//! moves through `Sending -> Backoff -> Retrying`: the earth link is marked
//! down, the forwarder waits the resend interval, and the record is put back
//! at the head of the buffer so it goes out before anything that arrived
//! after it.
//!
//! Only the initial connection failure leaves the forwarder. Everything after
//! that is handled here.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::audit::{AuditEvent, AuditLog};
use crate::codec;
use crate::errors::{RelayError, SendError};
use crate::link_status::OutboundLink;
use crate::record::TelemetryRecord;
use crate::ring_buffer::{Dequeued, EnqueueOutcome, RingBuffer};
use crate::stats::RelayStats;
use crate::transport::{Connector, Transport};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What to do with the connection after a failed send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectPolicy {
    /// Keep the existing connection and retry on it.
    #[default]
    RetrySameConnection,
    /// Drop the connection and open a new one before each retry.
    ReconnectThenRetry,
}

impl FromStr for ReconnectPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "same" | "retry_same_connection" => Ok(ReconnectPolicy::RetrySameConnection),
            "reconnect" | "reconnect_then_retry" => Ok(ReconnectPolicy::ReconnectThenRetry),
            other => Err(format!(
                "unknown reconnect policy '{}', expected 'same' or 'reconnect'",
                other
            )),
        }
    }
}

impl fmt::Display for ReconnectPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconnectPolicy::RetrySameConnection => f.write_str("same"),
            ReconnectPolicy::ReconnectThenRetry => f.write_str("reconnect"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EgressConfig {
    /// Wait after a failed send before the record is retried
    pub resend_interval: Duration,
    /// Upper bound on a single wait for the buffer; shutdown is rechecked after it
    pub idle_poll: Duration,
    pub reconnect_policy: ReconnectPolicy,
}

/// Where a single record is in its delivery.
#[derive(Debug, PartialEq)]
pub(crate) enum Delivery {
    Sending(TelemetryRecord),
    Backoff(TelemetryRecord),
    Retrying(TelemetryRecord),
}

pub struct EgressForwarder<C: Connector> {
    connector: C,
    transport: Option<C::Transport>,
    buffer: Arc<RingBuffer<TelemetryRecord>>,
    link: OutboundLink,
    audit: Arc<AuditLog>,
    stats: Arc<RelayStats>,
    config: EgressConfig,
    cancel_token: CancellationToken,
}

impl<C: Connector> EgressForwarder<C> {
    pub fn new(
        connector: C,
        config: EgressConfig,
        buffer: Arc<RingBuffer<TelemetryRecord>>,
        link: OutboundLink,
        audit: Arc<AuditLog>,
        stats: Arc<RelayStats>,
        cancel_token: CancellationToken,
    ) -> Self {
        EgressForwarder {
            connector,
            transport: None,
            buffer,
            link,
            audit,
            stats,
            config,
            cancel_token,
        }
    }

    /// Connects to earth and forwards records until shutdown.
    ///
    /// Fails only if the initial connection can't be established. Calling
    /// `run` again after such a failure starts over with a fresh connection
    /// attempt.
    pub async fn run(&mut self) -> Result<(), RelayError> {
        let destination = self.connector.destination();
        match self.connector.connect().await {
            Ok(transport) => self.transport = Some(transport),
            Err(source) => {
                error!("Error connecting to earth at {}: {}", destination, source);
                self.link.set(false);
                return Err(RelayError::InitialConnect {
                    addr: destination,
                    source,
                });
            }
        }
        info!("Forwarding telemetry to earth at {}", destination);

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => break,
                next = self.buffer.dequeue_within(self.config.idle_poll) => next,
            };
            match next {
                Dequeued::Item(record) => self.deliver(record).await,
                Dequeued::Idle => continue,
                Dequeued::Closed => break,
            }
        }

        self.transport = None;
        debug!("Earth forwarder stopped");
        Ok(())
    }

    async fn deliver(&mut self, record: TelemetryRecord) {
        let mut delivery = Delivery::Sending(record);
        while let Some(next) = self.advance(delivery).await {
            delivery = next;
        }
    }

    /// Runs one step of a delivery. `None` means the record has left the
    /// forwarder, either delivered or back in the buffer.
    pub(crate) async fn advance(&mut self, delivery: Delivery) -> Option<Delivery> {
        match delivery {
            Delivery::Sending(record) => match self.transmit(&record).await {
                Ok(()) => {
                    debug!("Sent telemetry to earth: {}", record);
                    self.audit.record(AuditEvent::Sent { record: &record });
                    self.stats.record_forwarded();
                    self.link.set(true);
                    None
                }
                Err(e) => {
                    error!("Error sending telemetry to earth: {}", e);
                    self.audit.record(AuditEvent::SendFailed {
                        record: &record,
                        error: &e,
                    });
                    self.stats.record_send_failure();
                    self.link.set(false);
                    Some(Delivery::Backoff(record))
                }
            },
            Delivery::Backoff(record) => {
                tokio::select! {
                    biased;
                    _ = self.cancel_token.cancelled() => {
                        self.requeue(record);
                        None
                    }
                    _ = tokio::time::sleep(self.config.resend_interval) => {
                        Some(Delivery::Retrying(record))
                    }
                }
            }
            Delivery::Retrying(record) => {
                if self.config.reconnect_policy == ReconnectPolicy::ReconnectThenRetry {
                    self.reconnect().await;
                }
                self.requeue(record);
                None
            }
        }
    }

    async fn transmit(&mut self, record: &TelemetryRecord) -> Result<(), SendError> {
        let payload = codec::encode_framed(record)?;
        let transport = self.transport.as_mut().ok_or(SendError::NotConnected)?;
        transport.send(&payload).await?;
        Ok(())
    }

    async fn reconnect(&mut self) {
        self.transport = None;
        match self.connector.connect().await {
            Ok(transport) => {
                info!("Reconnected to earth at {}", self.connector.destination());
                self.transport = Some(transport);
            }
            Err(e) => {
                // The retry fails fast with NotConnected and we come back here
                // after the next backoff.
                warn!(
                    "Failed to reconnect to earth at {}: {}",
                    self.connector.destination(),
                    e
                );
            }
        }
    }

    fn requeue(&self, record: TelemetryRecord) {
        match self.buffer.requeue_front(record) {
            EnqueueOutcome::Accepted => self.stats.record_requeued(),
            EnqueueOutcome::Evicted(oldest) => {
                self.stats.record_requeued();
                let total = self.stats.record_evicted();
                warn!(
                    "Telemetry buffer full on requeue, discarded oldest pending record ({} discarded so far)",
                    total
                );
                self.audit.record(AuditEvent::Evicted { record: &oldest });
            }
            EnqueueOutcome::Closed(record) => {
                warn!("Relay shutting down, dropping unsent telemetry record");
                self.audit.record(AuditEvent::Dropped {
                    record: &record,
                    reason: "relay shutting down",
                });
            }
        }
    }
}

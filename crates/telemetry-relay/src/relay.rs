// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Lifecycle of the relay: builds the shared buffer and link status, starts
//! the rover listener and the earth forwarder, and tears both down again.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::audit::AuditLog;
use crate::config::RelayConfig;
use crate::egress::EgressForwarder;
use crate::errors::RelayError;
use crate::ingest::IngestListener;
use crate::link_status::{LinkSnapshot, LinkStatus};
use crate::record::TelemetryRecord;
use crate::ring_buffer::RingBuffer;
use crate::stats::{RelayStats, StatsSnapshot};
use crate::transport::{Connector, TcpConnector};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

/// Telemetry relay waiting to be started.
#[derive(Debug)]
pub struct TelemetryRelay {
    config: RelayConfig,
}

impl TelemetryRelay {
    pub fn new(config: RelayConfig) -> Self {
        Self { config }
    }

    /// Starts the relay against the configured earth endpoint over TCP.
    pub async fn start(self) -> Result<RelayHandle, RelayError> {
        let connector = TcpConnector::new(
            &self.config.earth_host,
            self.config.earth_port,
            self.config.connect_timeout,
        );
        self.start_with_connector(connector).await
    }

    /// Starts the relay with a custom outbound connector.
    ///
    /// Fails if the configuration is invalid, the audit log can't be opened,
    /// or the rover socket can't be bound. Earth being unreachable does not
    /// fail startup; it is reported through [`RelayHandle::forwarder_stopped`]
    /// and [`RelayHandle::shutdown`].
    pub async fn start_with_connector<C>(self, connector: C) -> Result<RelayHandle, RelayError>
    where
        C: Connector + 'static,
    {
        let config = self.config;
        config.validate()?;

        let audit = Arc::new(match &config.audit_log {
            Some(path) => AuditLog::open(path)?,
            None => AuditLog::disabled(),
        });
        let buffer = Arc::new(RingBuffer::new(config.buffer_capacity));
        let (status, inbound, outbound) = LinkStatus::with_writers();
        let stats = Arc::new(RelayStats::default());
        let cancel_token = CancellationToken::new();

        let listener = IngestListener::new(
            &config.ingest_config(),
            Arc::clone(&buffer),
            inbound,
            Arc::clone(&audit),
            Arc::clone(&stats),
            cancel_token.clone(),
        )
        .await?;
        let ingest_addr = listener.local_addr().map_err(|source| RelayError::Bind {
            addr: format!("{}:{}", config.rover_host, config.rover_port),
            source,
        })?;

        let destination = connector.destination();
        let forwarder = EgressForwarder::new(
            connector,
            config.egress_config(),
            Arc::clone(&buffer),
            outbound,
            audit,
            Arc::clone(&stats),
            cancel_token.clone(),
        );

        let ingest_task = tokio::spawn(listener.spin());

        let forwarder_done = CancellationToken::new();
        let forwarder_task = tokio::spawn(supervise_forwarder(
            forwarder,
            config.forwarder_restarts,
            config.forwarder_restart_delay,
            cancel_token.clone(),
            forwarder_done.clone().drop_guard(),
        ));

        info!(
            "Telemetry relay started: rover {} -> earth {}",
            ingest_addr, destination
        );

        Ok(RelayHandle {
            status,
            stats,
            buffer,
            cancel_token,
            forwarder_done,
            ingest_task,
            forwarder_task,
            ingest_addr,
        })
    }
}

/// Runs the forwarder, restarting it after an initial connect failure up to
/// `restarts` times.
async fn supervise_forwarder<C: Connector>(
    mut forwarder: EgressForwarder<C>,
    restarts: u32,
    restart_delay: Duration,
    cancel_token: CancellationToken,
    _done: DropGuard,
) -> Result<(), RelayError> {
    let mut attempt = 0;
    loop {
        match forwarder.run().await {
            Err(RelayError::InitialConnect { .. })
                if attempt < restarts && !cancel_token.is_cancelled() =>
            {
                attempt += 1;
                warn!(
                    "Restarting earth forwarder in {:?} (restart {} of {})",
                    restart_delay, attempt, restarts
                );
                tokio::select! {
                    biased;
                    _ = cancel_token.cancelled() => {
                        debug!("Shutdown requested while waiting to restart earth forwarder");
                        return Ok(());
                    }
                    _ = tokio::time::sleep(restart_delay) => {}
                }
            }
            result => return result,
        }
    }
}

/// Handle to a running relay.
pub struct RelayHandle {
    status: Arc<LinkStatus>,
    stats: Arc<RelayStats>,
    buffer: Arc<RingBuffer<TelemetryRecord>>,
    cancel_token: CancellationToken,
    forwarder_done: CancellationToken,
    ingest_task: JoinHandle<()>,
    forwarder_task: JoinHandle<Result<(), RelayError>>,
    ingest_addr: SocketAddr,
}

impl RelayHandle {
    /// Current `{inbound_up, outbound_up}` pair.
    pub fn link_status(&self) -> LinkSnapshot {
        self.status.get()
    }

    /// Shared status for monitors that outlive a borrow of the handle.
    pub fn link_status_source(&self) -> Arc<LinkStatus> {
        Arc::clone(&self.status)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Records currently waiting to go to earth.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Address the rover listener is bound to.
    pub fn ingest_addr(&self) -> SocketAddr {
        self.ingest_addr
    }

    pub fn is_forwarder_running(&self) -> bool {
        !self.forwarder_done.is_cancelled()
    }

    /// Resolves once the forwarder has exited, whether because of shutdown or
    /// because it gave up connecting to earth.
    pub async fn forwarder_stopped(&self) {
        self.forwarder_done.cancelled().await
    }

    /// Stops both workers and waits for them.
    ///
    /// The listener stops receiving and releases its socket, the forwarder
    /// finishes any send in progress, and the buffer is closed. Returns the
    /// forwarder's initial connect error if it never managed to connect.
    pub async fn shutdown(self) -> Result<(), RelayError> {
        info!("Stopping telemetry relay");
        self.cancel_token.cancel();
        self.buffer.close();

        let ingest = self.ingest_task.await;
        let forwarder = self.forwarder_task.await;

        let pending = self.buffer.len();
        if pending > 0 {
            warn!("{} buffered telemetry records were not forwarded", pending);
        }
        debug!("Telemetry relay stopped: {:?}", self.stats.snapshot());

        ingest.map_err(|e| RelayError::Worker(e.to_string()))?;
        forwarder.map_err(|e| RelayError::Worker(e.to_string()))?
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::egress::tests::{ids, ScriptedConnector, Wire};
    use tokio::net::UdpSocket;

    fn test_config() -> RelayConfig {
        RelayConfig {
            rover_host: "127.0.0.1".to_string(),
            rover_port: 0,
            audit_log: None,
            resend_interval: Duration::from_millis(20),
            idle_poll: Duration::from_millis(20),
            forwarder_restart_delay: Duration::from_millis(10),
            ..Default::default()
        }
    }

    async fn start(config: RelayConfig, wire: &Wire) -> RelayHandle {
        // The connector needs a status to report what it saw; the relay's own
        // status isn't available until start, so a separate one is fine here.
        let (status, _inbound, _outbound) = LinkStatus::with_writers();
        TelemetryRelay::new(config)
            .start_with_connector(ScriptedConnector {
                wire: wire.clone(),
                status,
            })
            .await
            .unwrap()
    }

    async fn send(addr: SocketAddr, payloads: &[&str]) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for payload in payloads {
            socket.send_to(payload.as_bytes(), addr).await.unwrap();
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not met in time");
    }

    #[tokio::test]
    async fn test_relays_and_reports() {
        let wire = Wire::default();
        let handle = start(test_config(), &wire).await;

        send(
            handle.ingest_addr(),
            &[r#"{"id": "A"}"#, "not json", r#"{"id": "B"}"#],
        )
        .await;
        wait_until(|| wire.delivered().len() == 2).await;

        assert_eq!(ids(&wire.delivered()), vec!["A", "B"]);
        let stats = handle.stats();
        assert_eq!(stats.received, 2);
        assert_eq!(stats.decode_errors, 1);
        assert_eq!(stats.forwarded, 2);
        assert_eq!(
            handle.link_status(),
            LinkSnapshot {
                inbound_up: true,
                outbound_up: true
            }
        );
        assert_eq!(handle.buffered(), 0);
        assert!(handle.is_forwarder_running());

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_restarts_forwarder_after_connect_failure() {
        let wire = Wire::default();
        wire.fail_connects(2);
        let handle = start(
            RelayConfig {
                forwarder_restarts: 3,
                ..test_config()
            },
            &wire,
        )
        .await;

        send(handle.ingest_addr(), &[r#"{"id": "A"}"#]).await;
        wait_until(|| wire.delivered().len() == 1).await;

        assert_eq!(wire.connects(), 3);
        assert!(handle.link_status().outbound_up);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_gives_up_after_restarts_exhausted() {
        let wire = Wire::default();
        wire.fail_connects(10);
        let handle = start(
            RelayConfig {
                forwarder_restarts: 1,
                ..test_config()
            },
            &wire,
        )
        .await;

        tokio::time::timeout(Duration::from_secs(5), handle.forwarder_stopped())
            .await
            .expect("forwarder should have given up");
        assert!(!handle.is_forwarder_running());
        assert!(!handle.link_status().outbound_up);
        assert_eq!(wire.connects(), 2);

        // The rover side keeps buffering regardless.
        send(handle.ingest_addr(), &[r#"{"id": "A"}"#]).await;
        wait_until(|| handle.buffered() == 1).await;

        let err = handle.shutdown().await.unwrap_err();
        assert!(matches!(err, RelayError::InitialConnect { .. }));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let wire = Wire::default();
        let (status, _inbound, _outbound) = LinkStatus::with_writers();
        let result = TelemetryRelay::new(RelayConfig {
            buffer_capacity: 0,
            ..test_config()
        })
        .start_with_connector(ScriptedConnector { wire, status })
        .await;
        assert!(matches!(result, Err(RelayError::Config(_))));
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Outbound connection to earth.
//!
//! The forwarder only needs two things from the network: a way to open a
//! session and a way to push bytes through it. Both are traits so the
//! forwarder can be driven by an in-memory transport in tests.

use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

/// An established outbound session.
#[async_trait]
pub trait Transport: Send {
    /// Writes the whole payload or fails.
    async fn send(&mut self, payload: &[u8]) -> io::Result<()>;
}

/// Opens outbound sessions to a fixed destination.
#[async_trait]
pub trait Connector: Send + Sync {
    type Transport: Transport + 'static;

    async fn connect(&self) -> io::Result<Self::Transport>;

    /// Human readable destination, used in logs and errors.
    fn destination(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        Self {
            addr: format!("{}:{}", host, port),
            timeout,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Transport = TcpTransport;

    async fn connect(&self) -> io::Result<TcpTransport> {
        let stream = match tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr)).await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connection timed out after {:?}", self.timeout),
                ))
            }
        };
        stream.set_nodelay(true)?;
        debug!("Connected to earth at {}", self.addr);
        Ok(TcpTransport { stream })
    }

    fn destination(&self) -> String {
        self.addr.clone()
    }
}

#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, payload: &[u8]) -> io::Result<()> {
        self.stream.write_all(payload).await?;
        self.stream.flush().await
    }
}

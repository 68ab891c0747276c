// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Store-and-forward relay for rover telemetry.
//!
//! Telemetry arrives as JSON datagrams on a UDP socket, is held in a bounded
//! drop-oldest buffer, and is forwarded one record at a time over a TCP
//! connection to mission control. Each direction reports its last known link
//! health through [`link_status::LinkStatus`].

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod audit;
pub mod codec;
pub mod config;
pub mod constants;
pub mod egress;
pub mod errors;
pub mod ingest;
pub mod link_status;
pub mod record;
pub mod relay;
pub mod ring_buffer;
pub mod stats;
pub mod transport;

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Last observed health of each direction of the relay.
//!
//! Link status is inferred from the outcome of real receive and send
//! operations; nothing is actively probed. Each flag has exactly one writer:
//! the rover listener owns [`InboundLink`] and the earth forwarder owns
//! [`OutboundLink`]. Any number of observers may read through
//! [`LinkStatus::get`].

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug)]
pub struct LinkStatus {
    inbound_up: AtomicBool,
    outbound_up: AtomicBool,
}

/// Point-in-time copy of both flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LinkSnapshot {
    pub inbound_up: bool,
    pub outbound_up: bool,
}

impl fmt::Display for LinkSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rover link {}, earth link {}",
            up_or_down(self.inbound_up),
            up_or_down(self.outbound_up)
        )
    }
}

fn up_or_down(up: bool) -> &'static str {
    if up {
        "up"
    } else {
        "down"
    }
}

impl LinkStatus {
    /// Creates the shared status along with the single writer for each
    /// direction. Both links start out up.
    pub fn with_writers() -> (Arc<LinkStatus>, InboundLink, OutboundLink) {
        let status = Arc::new(LinkStatus {
            inbound_up: AtomicBool::new(true),
            outbound_up: AtomicBool::new(true),
        });
        let inbound = InboundLink {
            status: Arc::clone(&status),
        };
        let outbound = OutboundLink {
            status: Arc::clone(&status),
        };
        (status, inbound, outbound)
    }

    pub fn get(&self) -> LinkSnapshot {
        LinkSnapshot {
            inbound_up: self.inbound_up.load(Ordering::Acquire),
            outbound_up: self.outbound_up.load(Ordering::Acquire),
        }
    }

    pub fn inbound_up(&self) -> bool {
        self.inbound_up.load(Ordering::Acquire)
    }

    pub fn outbound_up(&self) -> bool {
        self.outbound_up.load(Ordering::Acquire)
    }
}

/// Writer for the rover-side flag.
#[derive(Debug)]
pub struct InboundLink {
    status: Arc<LinkStatus>,
}

impl InboundLink {
    /// Records the outcome of the latest receive. Returns true if the flag
    /// changed.
    pub fn set(&self, up: bool) -> bool {
        let changed = self.status.inbound_up.swap(up, Ordering::AcqRel) != up;
        if changed {
            if up {
                info!("Link to rover restored");
            } else {
                warn!("Link to rover down");
            }
        }
        changed
    }

    pub fn status(&self) -> &Arc<LinkStatus> {
        &self.status
    }
}

/// Writer for the earth-side flag.
#[derive(Debug)]
pub struct OutboundLink {
    status: Arc<LinkStatus>,
}

impl OutboundLink {
    /// Records the outcome of the latest send. Returns true if the flag
    /// changed.
    pub fn set(&self, up: bool) -> bool {
        let changed = self.status.outbound_up.swap(up, Ordering::AcqRel) != up;
        if changed {
            if up {
                info!("Link to earth restored");
            } else {
                warn!("Link to earth down");
            }
        }
        changed
    }

    pub fn status(&self) -> &Arc<LinkStatus> {
        &self.status
    }
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters describing what the relay has done since it started.
#[derive(Debug, Default)]
pub struct RelayStats {
    received: AtomicU64,
    decode_errors: AtomicU64,
    receive_errors: AtomicU64,
    evicted: AtomicU64,
    forwarded: AtomicU64,
    send_failures: AtomicU64,
    requeued: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Datagrams decoded and buffered.
    pub received: u64,
    /// Datagrams rejected by the codec.
    pub decode_errors: u64,
    /// Socket-level receive failures.
    pub receive_errors: u64,
    /// Records dropped by the buffer to make room for newer ones.
    pub evicted: u64,
    /// Records delivered to earth.
    pub forwarded: u64,
    /// Failed send attempts, including retries.
    pub send_failures: u64,
    /// Records put back at the head of the buffer after a failed send.
    pub requeued: u64,
}

impl RelayStats {
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_receive_error(&self) {
        self.receive_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the eviction total including this one.
    pub fn record_evicted(&self) -> u64 {
        self.evicted.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_requeued(&self) {
        self.requeued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = RelayStats::default();
        stats.record_received();
        stats.record_received();
        assert_eq!(stats.record_evicted(), 1);
        assert_eq!(stats.record_evicted(), 2);
        stats.record_send_failure();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.received, 2);
        assert_eq!(snapshot.evicted, 2);
        assert_eq!(snapshot.send_failures, 1);
        assert_eq!(snapshot.forwarded, 0);
    }
}

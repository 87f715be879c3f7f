//! Transport plumbing shared by every connection handler.

pub mod rest;
#[cfg(feature = "serial")]
pub mod serial;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};

/// Consecutive command failures after which a connection reports itself
/// unhealthy and the next poll cycle reconnects it.
pub const CONSECUTIVE_FAILURE_LIMIT: u32 = 3;

/// Lock-free command counters every connection keeps. Monotonic within one
/// connection lifetime; reset when the transport is reopened.
#[derive(Debug, Default)]
pub struct HealthCounters {
    total_commands: AtomicU64,
    failed_commands: AtomicU64,
    consecutive_failures: AtomicU32,
    last_success_ms: AtomicI64,
}

impl HealthCounters {
    /// Count a command that completed.
    pub fn record_success(&self) {
        self.total_commands.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.last_success_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Count a command that failed in transit: timed out or lost its
    /// transport. These grow the streak that triggers a reconnect.
    pub fn record_failure(&self) {
        self.total_commands.fetch_add(1, Ordering::Relaxed);
        self.failed_commands.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a command the remote side answered but refused. The transport
    /// itself is fine, so the reconnect streak stays untouched.
    pub fn record_rejection(&self) {
        self.total_commands.fetch_add(1, Ordering::Relaxed);
        self.failed_commands.fetch_add(1, Ordering::Relaxed);
    }

    /// Failures since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// True while the failure streak is below [CONSECUTIVE_FAILURE_LIMIT].
    pub fn within_failure_limit(&self) -> bool {
        self.consecutive_failures() < CONSECUTIVE_FAILURE_LIMIT
    }

    /// Zero everything, for a freshly opened transport.
    pub fn reset(&self) {
        self.total_commands.store(0, Ordering::Relaxed);
        self.failed_commands.store(0, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.last_success_ms.store(0, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> ConnectionHealth {
        let last_success_ms = self.last_success_ms.load(Ordering::Relaxed);
        ConnectionHealth {
            total_commands: self.total_commands.load(Ordering::Relaxed),
            failed_commands: self.failed_commands.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures(),
            last_success: if last_success_ms == 0 {
                None
            } else {
                DateTime::from_timestamp_millis(last_success_ms)
            },
        }
    }
}

/// A point-in-time view of one connection's health counters.
#[derive(Clone, Copy, Debug, Default, JsonSchema, PartialEq, Serialize, Deserialize)]
pub struct ConnectionHealth {
    /// Commands attempted over this connection lifetime.
    pub total_commands: u64,

    /// Commands that failed or timed out.
    pub failed_commands: u64,

    /// Failures since the last success.
    pub consecutive_failures: u32,

    /// When a command last completed.
    pub last_success: Option<DateTime<Utc>>,
}

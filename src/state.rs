//! Process runtime state
//!
//! Uptime, the simulated state-version counter bumped by fake config writes,
//! the session counter, and the shared canary key set. All counters are
//! process-lifetime only.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::canary::CanaryKeys;

// Seeds chosen so a fresh process looks like a long-running install.
const STATE_VERSION_SEED: u64 = 1847;
const SESSION_COUNT_SEED: u64 = 3;

pub struct RuntimeState {
    started_instant: Instant,
    started_at: DateTime<Utc>,
    state_version: AtomicU64,
    session_count: AtomicU64,
    canary: CanaryKeys,
}

impl RuntimeState {
    pub fn new(canary: CanaryKeys) -> Self {
        Self {
            started_instant: Instant::now(),
            started_at: Utc::now(),
            state_version: AtomicU64::new(STATE_VERSION_SEED),
            session_count: AtomicU64::new(SESSION_COUNT_SEED),
            canary,
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn uptime_ms(&self) -> u128 {
        self.started_instant.elapsed().as_millis()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_instant.elapsed().as_secs()
    }

    pub fn state_version(&self) -> u64 {
        self.state_version.load(Ordering::Relaxed)
    }

    /// Bump the simulated config version, returning the new value
    pub fn bump_state_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn session_count(&self) -> u64 {
        self.session_count.load(Ordering::Relaxed)
    }

    /// Count a new fake session, returning the new total
    pub fn next_session(&self) -> u64 {
        self.session_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// The process-lifetime decoy credential set
    pub fn canary(&self) -> &CanaryKeys {
        &self.canary
    }
}

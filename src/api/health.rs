//! Shared health state for the /health endpoint.
//! Updated by the route handlers around every query execution.

use std::sync::atomic::{AtomicU64, Ordering};

/// Execution counters. Written by handlers, read by the API.
#[derive(Default)]
pub struct HealthState {
    /// Executions currently being submitted, awaited or fetched.
    pub jobs_in_flight: AtomicU64,
    pub jobs_completed: AtomicU64,
    pub jobs_failed: AtomicU64,
    /// Nanosecond timestamp of the last completed execution (0 = none).
    pub last_completed_at_ns: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_started(&self) {
        self.jobs_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_finished(&self, ok: bool, now_ns: u64) {
        self.jobs_in_flight.fetch_sub(1, Ordering::Relaxed);
        if ok {
            self.jobs_completed.fetch_add(1, Ordering::Relaxed);
            self.last_completed_at_ns.store(now_ns, Ordering::Relaxed);
        } else {
            self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn jobs_in_flight(&self) -> u64 {
        self.jobs_in_flight.load(Ordering::Relaxed)
    }

    pub fn jobs_completed(&self) -> u64 {
        self.jobs_completed.load(Ordering::Relaxed)
    }

    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    pub fn last_completed_at_ns(&self) -> u64 {
        self.last_completed_at_ns.load(Ordering::Relaxed)
    }
}

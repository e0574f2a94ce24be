//! Admission control for outbound fetches.
//!
//! Two budgets apply to every fetch, no matter which worker issues it: a
//! global in-flight cap and a per-host cap keyed by registered domain. The
//! permit returned by [`RateGate::acquire`] releases both slots on drop, so
//! every exit path gives the slots back.
//!
//! Hosts that answered 429/5xx (or timed out) are additionally held back by
//! an exponential backoff window before their next admission.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::debug;

const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(30);
const BACKOFF_JITTER: f64 = 0.25;

#[derive(Debug, Clone, Copy)]
pub struct RateGateConfig {
    pub global_concurrency: usize,
    pub per_host_concurrency: usize,
}

impl Default for RateGateConfig {
    fn default() -> Self {
        Self {
            global_concurrency: 32,
            per_host_concurrency: 2,
        }
    }
}

struct HostState {
    slots: Arc<Semaphore>,
    failed_attempts: u32,
    next_admission: Option<Instant>,
}

pub struct RateGate {
    global: Arc<Semaphore>,
    per_host: usize,
    hosts: Mutex<HashMap<String, HostState>>,
}

/// Held for the duration of one fetch; dropping it releases both slots.
pub struct GatePermit {
    _host: OwnedSemaphorePermit,
    _global: OwnedSemaphorePermit,
}

impl RateGate {
    pub fn new(config: RateGateConfig) -> Self {
        Self {
            global: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            per_host: config.per_host_concurrency.max(1),
            hosts: Mutex::new(HashMap::new()),
        }
    }

    /// Block until a slot exists in both buckets (and any backoff window for
    /// the host has passed), then return the release handle.
    pub async fn acquire(&self, host: &str) -> GatePermit {
        let (slots, hold_until) = {
            let mut hosts = self.hosts.lock().expect("rate gate poisoned");
            let state = hosts.entry(host.to_string()).or_insert_with(|| HostState {
                slots: Arc::new(Semaphore::new(self.per_host)),
                failed_attempts: 0,
                next_admission: None,
            });
            (state.slots.clone(), state.next_admission)
        };

        if let Some(until) = hold_until {
            if until > Instant::now() {
                debug!(host, wait_ms = %(until - Instant::now()).as_millis(), "backoff hold");
                tokio::time::sleep_until(until).await;
            }
        }

        let host_permit = slots
            .acquire_owned()
            .await
            .expect("host semaphore closed");
        let global_permit = self
            .global
            .clone()
            .acquire_owned()
            .await
            .expect("global semaphore closed");

        GatePermit {
            _host: host_permit,
            _global: global_permit,
        }
    }

    /// Record a transient failure (429/5xx/timeout) and schedule the host's
    /// next admission with exponential jittered backoff.
    pub fn note_failure(&self, host: &str) {
        let mut hosts = self.hosts.lock().expect("rate gate poisoned");
        let Some(state) = hosts.get_mut(host) else {
            return;
        };
        state.failed_attempts = state.failed_attempts.saturating_add(1);
        let delay = backoff_delay(state.failed_attempts);
        state.next_admission = Some(Instant::now() + delay);
        debug!(host, attempts = state.failed_attempts, delay_ms = %delay.as_millis(), "host backoff scheduled");
    }

    /// A successful fetch clears the host's backoff state.
    pub fn note_success(&self, host: &str) {
        let mut hosts = self.hosts.lock().expect("rate gate poisoned");
        if let Some(state) = hosts.get_mut(host) {
            state.failed_attempts = 0;
            state.next_admission = None;
        }
    }

    /// In-flight slots available globally (for health reporting).
    pub fn available_global(&self) -> usize {
        self.global.available_permits()
    }
}

fn backoff_delay(attempts: u32) -> Duration {
    let exp = BACKOFF_BASE.as_millis() as u64 * 2u64.saturating_pow(attempts.saturating_sub(1));
    let capped = exp.min(BACKOFF_CAP.as_millis() as u64);
    let jitter = rand::thread_rng().gen_range(-BACKOFF_JITTER..=BACKOFF_JITTER);
    let with_jitter = (capped as f64 * (1.0 + jitter)).max(0.0) as u64;
    Duration::from_millis(with_jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(global: usize, per_host: usize) -> RateGate {
        RateGate::new(RateGateConfig {
            global_concurrency: global,
            per_host_concurrency: per_host,
        })
    }

    #[tokio::test]
    async fn per_host_cap_enforced() {
        let gate = gate(8, 2);
        let _a = gate.acquire("v.example").await;
        let _b = gate.acquire("v.example").await;

        // Third acquire for the same host must wait.
        let third = tokio::time::timeout(Duration::from_millis(50), gate.acquire("v.example"));
        assert!(third.await.is_err());

        // A different host is unaffected.
        let other = tokio::time::timeout(Duration::from_millis(50), gate.acquire("w.example"));
        assert!(other.await.is_ok());
    }

    #[tokio::test]
    async fn dropping_permit_releases_slot() {
        let gate = gate(8, 1);
        let permit = gate.acquire("v.example").await;
        drop(permit);
        let again = tokio::time::timeout(Duration::from_millis(50), gate.acquire("v.example"));
        assert!(again.await.is_ok());
    }

    #[tokio::test]
    async fn global_cap_spans_hosts() {
        let gate = gate(2, 2);
        let _a = gate.acquire("a.example").await;
        let _b = gate.acquire("b.example").await;

        let third = tokio::time::timeout(Duration::from_millis(50), gate.acquire("c.example"));
        assert!(third.await.is_err());
    }

    #[tokio::test]
    async fn failure_schedules_backoff() {
        let gate = gate(8, 2);
        drop(gate.acquire("v.example").await);
        gate.note_failure("v.example");

        let started = std::time::Instant::now();
        let _p = gate.acquire("v.example").await;
        // base 500ms with -25% jitter floor
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn success_clears_backoff() {
        let gate = gate(8, 2);
        drop(gate.acquire("v.example").await);
        gate.note_failure("v.example");
        gate.note_success("v.example");

        let quick = tokio::time::timeout(Duration::from_millis(50), gate.acquire("v.example"));
        assert!(quick.await.is_ok());
    }

    #[test]
    fn backoff_grows_and_caps() {
        let d1 = backoff_delay(1);
        let d4 = backoff_delay(4);
        let d20 = backoff_delay(20);
        assert!(d1 < Duration::from_millis(700));
        assert!(d4 > d1);
        assert!(d20 <= Duration::from_millis(37_500 + 1));
    }
}

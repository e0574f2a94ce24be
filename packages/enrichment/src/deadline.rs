//! Monotonic crawl deadline threaded through the fetch call graph.

use std::time::Duration;

use tokio::time::Instant;

/// An absolute wall-clock budget for one crawl job.
///
/// Every sub-fetch checks the deadline before issuing a request; there is no
/// hidden event-loop state, cancellation is a deadline check plus dropping
/// the in-flight request.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    ends: Instant,
}

impl Deadline {
    /// A deadline expiring `budget` from now.
    pub fn after(budget: Duration) -> Self {
        let started = Instant::now();
        Self {
            started,
            ends: started + budget,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.ends.saturating_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.ends
    }

    /// True if at least `needed` of budget remains. Used before initiating a
    /// fetch whose minimum cost (connect + first byte + read) is known.
    pub fn allows(&self, needed: Duration) -> bool {
        self.remaining() >= needed
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn deadline_expires() {
        let d = Deadline::after(Duration::from_millis(100));
        assert!(!d.expired());
        assert!(d.allows(Duration::from_millis(50)));

        tokio::time::advance(Duration::from_millis(150)).await;

        assert!(d.expired());
        assert_eq!(d.remaining(), Duration::ZERO);
        assert!(!d.allows(Duration::from_millis(1)));
    }
}

//! Per-source request gate.
//!
//! Each source gets a single permit, so at most one request is in flight
//! against a source across all workers. Callers hold the permit for the
//! jitter delay plus one request and drop it before any cooldown.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{AcquireError, Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub requests: u64,
    pub blocked: u64,
}

#[derive(Debug)]
struct SourceSlot {
    permit: Arc<Semaphore>,
    stats: SourceStats,
}

impl SourceSlot {
    fn new() -> Self {
        Self {
            permit: Arc::new(Semaphore::new(1)),
            stats: SourceStats::default(),
        }
    }
}

#[derive(Debug, Default)]
pub struct SourceGate {
    slots: Mutex<HashMap<String, SourceSlot>>,
}

impl SourceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the source's permit. Source names compare case-insensitively.
    pub async fn acquire(&self, source: &str) -> Result<OwnedSemaphorePermit, AcquireError> {
        let semaphore = {
            let mut slots = self.slots.lock().await;
            let slot = slots
                .entry(source.to_lowercase())
                .or_insert_with(SourceSlot::new);
            slot.stats.requests += 1;
            slot.permit.clone()
        };
        if semaphore.available_permits() == 0 {
            debug!(source, "waiting for source gate");
        }
        semaphore.acquire_owned().await
    }

    /// Count a blocked or failed response against the source.
    pub async fn report_blocked(&self, source: &str) {
        let mut slots = self.slots.lock().await;
        slots
            .entry(source.to_lowercase())
            .or_insert_with(SourceSlot::new)
            .stats
            .blocked += 1;
    }

    #[cfg(test)]
    pub async fn stats(&self, source: &str) -> SourceStats {
        let slots = self.slots.lock().await;
        slots
            .get(&source.to_lowercase())
            .map(|s| s.stats)
            .unwrap_or_default()
    }

    /// Requests currently holding the source's permit (0 or 1).
    #[cfg(test)]
    pub async fn in_flight(&self, source: &str) -> usize {
        let slots = self.slots.lock().await;
        slots
            .get(&source.to_lowercase())
            .map(|s| 1 - s.permit.available_permits())
            .unwrap_or(0)
    }

    pub async fn snapshot(&self) -> Vec<(String, SourceStats)> {
        let slots = self.slots.lock().await;
        let mut all: Vec<_> = slots.iter().map(|(k, v)| (k.clone(), v.stats)).collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_one_permit_per_source() {
        let gate = SourceGate::new();
        let held = gate.acquire("Reed").await.unwrap();
        assert_eq!(gate.in_flight("reed").await, 1);

        // A different source is not blocked.
        let other = gate.acquire("Dice").await.unwrap();
        drop(other);

        let waiting = tokio::time::timeout(Duration::from_millis(50), gate.acquire("REED")).await;
        assert!(waiting.is_err(), "second permit for the same source should wait");

        drop(held);
        let again = tokio::time::timeout(Duration::from_millis(50), gate.acquire("Reed")).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_tasks_never_overlap_on_a_source() {
        let gate = Arc::new(SourceGate::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = vec![];
        for _ in 0..8 {
            let gate = gate.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..5 {
                    let _permit = gate.acquire("Indeed US").await.unwrap();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(gate.stats("Indeed US").await.requests, 40);
    }

    #[tokio::test]
    async fn test_blocked_counts() {
        let gate = SourceGate::new();
        gate.report_blocked("Glassdoor").await;
        gate.report_blocked("glassdoor").await;
        let stats = gate.stats("GLASSDOOR").await;
        assert_eq!(stats.blocked, 2);
        assert_eq!(gate.snapshot().await.len(), 1);
    }
}

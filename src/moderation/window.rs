//! Sliding-window activity counter
//!
//! Tracks per-key event timestamps over a bounded time window. State is
//! process-local and rebuilt empty on restart; rate history is
//! intentionally not durable.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::moderation::events::{ActionKind, Subject};

/// What a window is counting for a subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Messages sent by the subject
    Flood,
    /// Audit-attributed moderation actions performed by the subject
    Action(ActionKind),
}

/// Key for one activity window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub subject: Subject,
    pub category: Category,
}

impl CounterKey {
    #[must_use]
    pub fn flood(subject: Subject) -> Self {
        Self {
            subject,
            category: Category::Flood,
        }
    }

    #[must_use]
    pub fn action(subject: Subject, kind: ActionKind) -> Self {
        Self {
            subject,
            category: Category::Action(kind),
        }
    }
}

/// Per-key rate tracker over sliding time windows.
///
/// Concurrent calls for different keys proceed independently; calls for
/// the same key serialize on the map entry, so simultaneous events for
/// one subject are both counted.
#[derive(Debug, Default)]
pub struct SlidingWindowCounter {
    windows: DashMap<CounterKey, Vec<DateTime<Utc>>>,
}

impl SlidingWindowCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop stored timestamps for `key` older than `window`, append `now`,
    /// and return the resulting count.
    pub fn record_and_count(&self, key: CounterKey, now: DateTime<Utc>, window: Duration) -> usize {
        let mut stamps = self.windows.entry(key).or_default();
        stamps.retain(|t| now.signed_duration_since(*t) < window);
        stamps.push(now);
        stamps.len()
    }

    /// Current count without recording, pruning stale entries first
    pub fn count(&self, key: CounterKey, now: DateTime<Utc>, window: Duration) -> usize {
        match self.windows.get_mut(&key) {
            Some(mut stamps) => {
                stamps.retain(|t| now.signed_duration_since(*t) < window);
                stamps.len()
            }
            None => 0,
        }
    }

    /// Clear the window for `key`; the next breach requires a fresh full
    /// window.
    pub fn reset(&self, key: CounterKey) {
        self.windows.remove(&key);
    }

    /// Remove keys whose every timestamp has aged out of `retention`.
    /// Bounds memory growth for subjects that went idle.
    pub fn sweep_idle(&self, now: DateTime<Utc>, retention: Duration) {
        self.windows
            .retain(|_, stamps| stamps.iter().any(|t| now.signed_duration_since(*t) < retention));
    }

    /// Number of keys currently tracked
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject() -> Subject {
        Subject::new(67890, 12345)
    }

    #[test]
    fn test_count_grows_within_window() {
        let counter = SlidingWindowCounter::new();
        let key = CounterKey::flood(subject());
        let window = Duration::seconds(7);
        let start = Utc::now();

        for i in 0..5 {
            let at = start + Duration::seconds(i);
            assert_eq!(
                counter.record_and_count(key, at, window),
                usize::try_from(i).unwrap() + 1
            );
        }
    }

    #[test]
    fn test_events_outside_window_are_pruned() {
        let counter = SlidingWindowCounter::new();
        let key = CounterKey::flood(subject());
        let window = Duration::seconds(7);
        let start = Utc::now();

        // Spaced just past the window, the count never accumulates.
        for i in 0..10 {
            let at = start + Duration::milliseconds(i * 7_001);
            assert_eq!(counter.record_and_count(key, at, window), 1);
        }
    }

    #[test]
    fn test_out_of_order_delivery_still_counts() {
        let counter = SlidingWindowCounter::new();
        let key = CounterKey::flood(subject());
        let window = Duration::seconds(10);
        let start = Utc::now();

        // A late-delivered older event still lands in the window.
        counter.record_and_count(key, start + Duration::seconds(5), window);
        let count = counter.record_and_count(key, start + Duration::seconds(2), window);
        assert_eq!(count, 2);
    }

    #[test]
    fn test_reset_requires_fresh_window() {
        let counter = SlidingWindowCounter::new();
        let key = CounterKey::flood(subject());
        let window = Duration::seconds(7);
        let start = Utc::now();

        for i in 0..6 {
            counter.record_and_count(key, start + Duration::seconds(i), window);
        }
        counter.reset(key);
        assert_eq!(
            counter.record_and_count(key, start + Duration::seconds(6), window),
            1
        );
    }

    #[test]
    fn test_keys_are_independent() {
        let counter = SlidingWindowCounter::new();
        let window = Duration::seconds(10);
        let now = Utc::now();

        let flood = CounterKey::flood(subject());
        let kicks = CounterKey::action(subject(), ActionKind::Kick);
        let other = CounterKey::flood(Subject::new(67890, 99999));

        counter.record_and_count(flood, now, window);
        counter.record_and_count(flood, now, window);
        assert_eq!(counter.record_and_count(kicks, now, window), 1);
        assert_eq!(counter.record_and_count(other, now, window), 1);
        assert_eq!(counter.count(flood, now, window), 2);
    }

    #[test]
    fn test_sweep_drops_idle_keys() {
        let counter = SlidingWindowCounter::new();
        let window = Duration::seconds(10);
        let start = Utc::now();

        counter.record_and_count(CounterKey::flood(subject()), start, window);
        counter.record_and_count(
            CounterKey::flood(Subject::new(1, 2)),
            start + Duration::seconds(60),
            window,
        );
        assert_eq!(counter.tracked_keys(), 2);

        counter.sweep_idle(start + Duration::seconds(61), window);
        assert_eq!(counter.tracked_keys(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_same_key_updates_are_not_lost() {
        use std::sync::Arc;

        let counter = Arc::new(SlidingWindowCounter::new());
        let key = CounterKey::flood(subject());
        let window = Duration::seconds(60);
        let now = Utc::now();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            tasks.push(tokio::spawn(async move {
                counter.record_and_count(key, now, window)
            }));
        }
        for task in tasks {
            task.await.expect("task panicked");
        }

        assert_eq!(counter.count(key, now, window), 8);
    }
}

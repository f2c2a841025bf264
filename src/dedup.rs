//! Time-windowed event de-duplication.
//!
//! A single real-world occurrence spans many sampled frames; without
//! suppression every one of them would become an event. The deduplicator
//! keys on the label of the highest-confidence detection and suppresses
//! candidates seen again within the suppression window.
//!
//! The cache is pruned eagerly on every call: entries older than twice the
//! window are removed, which bounds memory for long-tail labels without a
//! separate maintenance task. Time is passed in explicitly so the window
//! logic is testable without sleeping.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::detect::{primary_detection, Detection};

/// Decision for one candidate event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DedupDecision {
    Create,
    Suppressed,
}

pub struct EventDeduplicator {
    window: Duration,
    /// Primary label -> last time an event was created for it.
    last_event: HashMap<String, Instant>,
}

impl EventDeduplicator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_event: HashMap::new(),
        }
    }

    /// Decide whether a candidate event should be created.
    ///
    /// The orchestrator gates on non-empty detections before calling; an
    /// empty set is still tolerated and suppressed rather than panicking.
    /// A `Create` decision records `now` for the primary label; a
    /// `Suppressed` decision leaves the recorded timestamp untouched.
    pub fn should_create_event(&mut self, detections: &[Detection], now: Instant) -> DedupDecision {
        self.prune(now);

        let Some(primary) = primary_detection(detections) else {
            return DedupDecision::Suppressed;
        };

        if let Some(last) = self.last_event.get(&primary.label) {
            if now.saturating_duration_since(*last) < self.window {
                return DedupDecision::Suppressed;
            }
        }

        self.last_event.insert(primary.label.clone(), now);
        DedupDecision::Create
    }

    /// Drop entries older than twice the suppression window.
    fn prune(&mut self, now: Instant) {
        let horizon = self.window * 2;
        self.last_event
            .retain(|_, last| now.saturating_duration_since(*last) < horizon);
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Apply a reloaded suppression window. Existing entries are judged
    /// against the new window from the next call on.
    pub fn set_window(&mut self, window: Duration) {
        self.window = window;
    }

    /// Number of live cache entries, for status reporting and tests.
    pub fn cached_labels(&self) -> usize {
        self.last_event.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(30);

    fn person() -> Vec<Detection> {
        vec![Detection::new("person", 0.9, [0.0, 0.0, 1.0, 1.0])]
    }

    fn mixed() -> Vec<Detection> {
        vec![
            Detection::new("cat", 0.95, [0.0, 0.0, 0.2, 0.2]),
            Detection::new("person", 0.6, [0.4, 0.4, 0.3, 0.3]),
        ]
    }

    #[test]
    fn second_event_within_window_is_suppressed() {
        let mut dedup = EventDeduplicator::new(WINDOW);
        let base = Instant::now();

        assert_eq!(
            dedup.should_create_event(&person(), base),
            DedupDecision::Create
        );
        assert_eq!(
            dedup.should_create_event(&person(), base + Duration::from_secs(10)),
            DedupDecision::Suppressed
        );
    }

    #[test]
    fn event_after_window_is_created_again() {
        let mut dedup = EventDeduplicator::new(WINDOW);
        let base = Instant::now();

        assert_eq!(
            dedup.should_create_event(&person(), base),
            DedupDecision::Create
        );
        assert_eq!(
            dedup.should_create_event(&person(), base + WINDOW),
            DedupDecision::Create
        );
    }

    #[test]
    fn suppression_does_not_refresh_the_timestamp() {
        let mut dedup = EventDeduplicator::new(WINDOW);
        let base = Instant::now();

        dedup.should_create_event(&person(), base);
        // Suppressed calls at 20s and 29s must not extend the window.
        dedup.should_create_event(&person(), base + Duration::from_secs(20));
        dedup.should_create_event(&person(), base + Duration::from_secs(29));
        assert_eq!(
            dedup.should_create_event(&person(), base + Duration::from_secs(31)),
            DedupDecision::Create
        );
    }

    #[test]
    fn key_is_the_highest_confidence_label() {
        let mut dedup = EventDeduplicator::new(WINDOW);
        let base = Instant::now();

        assert_eq!(
            dedup.should_create_event(&mixed(), base),
            DedupDecision::Create
        );
        // "cat" was the primary; a pure person event is still fresh.
        assert_eq!(
            dedup.should_create_event(&person(), base + Duration::from_secs(1)),
            DedupDecision::Create
        );
        assert_eq!(
            dedup.should_create_event(&mixed(), base + Duration::from_secs(2)),
            DedupDecision::Suppressed
        );
    }

    #[test]
    fn entries_older_than_twice_the_window_are_pruned() {
        let mut dedup = EventDeduplicator::new(WINDOW);
        let base = Instant::now();

        for (offset, label) in [(0u64, "cat"), (15, "dog"), (45, "person")] {
            let detections = vec![Detection::new(label, 0.9, [0.0; 4])];
            dedup.should_create_event(&detections, base + Duration::from_secs(offset));
        }
        assert_eq!(dedup.cached_labels(), 3);

        // At base+70s the cat entry (age 70s) is past 2x30s and goes away;
        // dog (55s) and person (25s) survive.
        dedup.should_create_event(&person(), base + Duration::from_secs(70));
        assert_eq!(dedup.cached_labels(), 2);
    }

    #[test]
    fn empty_detections_are_suppressed_without_panicking() {
        let mut dedup = EventDeduplicator::new(WINDOW);
        assert_eq!(
            dedup.should_create_event(&[], Instant::now()),
            DedupDecision::Suppressed
        );
        assert_eq!(dedup.cached_labels(), 0);
    }
}

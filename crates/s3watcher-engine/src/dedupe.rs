//! Duplicate suppression for at-least-once delivery
//!
//! Remembers recently yielded events in a bounded window. Entries leave the
//! window oldest first, either when capacity is reached or when they are older
//! than the configured age. A duplicate arriving after its original left the
//! window is yielded again.

use s3watcher_core::types::{EventKind, S3Event};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Identity of one object mutation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupeKey {
    pub bucket: String,
    pub key: String,
    pub kind: EventKind,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Sequencer when present, otherwise version id
    pub token: Option<String>,
}

impl DedupeKey {
    pub fn from_event(event: &S3Event) -> Self {
        Self {
            bucket: event.bucket.clone(),
            key: event.key.clone(),
            kind: event.kind,
            timestamp: event.timestamp,
            token: event
                .sequencer
                .clone()
                .or_else(|| event.version_id.clone()),
        }
    }
}

/// Bounded, age-limited set of recently seen event keys
#[derive(Debug)]
pub struct DedupeTracker {
    capacity: usize,
    max_age: Duration,
    seen: HashMap<DedupeKey, Instant>,
    order: VecDeque<(DedupeKey, Instant)>,
}

impl DedupeTracker {
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            max_age,
            seen: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn is_duplicate(&mut self, key: &DedupeKey) -> bool {
        self.is_duplicate_at(key, Instant::now())
    }

    pub fn remember(&mut self, key: DedupeKey) {
        self.remember_at(key, Instant::now());
    }

    /// Number of keys currently in the window
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub(crate) fn is_duplicate_at(&mut self, key: &DedupeKey, now: Instant) -> bool {
        self.evict_expired(now);
        self.seen.contains_key(key)
    }

    pub(crate) fn remember_at(&mut self, key: DedupeKey, now: Instant) {
        self.evict_expired(now);
        self.seen.insert(key.clone(), now);
        self.order.push_back((key, now));

        while self.seen.len() > self.capacity {
            self.evict_oldest();
        }
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some((_, seen_at)) = self.order.front() {
            if now.saturating_duration_since(*seen_at) < self.max_age {
                break;
            }
            self.evict_oldest();
        }
    }

    fn evict_oldest(&mut self) {
        let Some((key, seen_at)) = self.order.pop_front() else {
            return;
        };
        // A key remembered again has a newer entry further back
        if self.seen.get(&key) == Some(&seen_at) {
            self.seen.remove(&key);
        }
    }
}

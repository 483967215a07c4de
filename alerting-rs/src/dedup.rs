//! Alert deduplication cache.
//!
//! Maps a dedup key (`rule_id` plus agent scope) to the time the rule last
//! fired. Entries only ever move forward in time. The cache is created once
//! per engine and shared through an `Arc`.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct DedupCache {
    last_fired: DashMap<String, DateTime<Utc>>,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `key` fired within `cooldown` of now.
    pub fn should_suppress(&self, key: &str, cooldown: Duration) -> bool {
        self.should_suppress_at(key, cooldown, Utc::now())
    }

    pub fn should_suppress_at(&self, key: &str, cooldown: Duration, now: DateTime<Utc>) -> bool {
        self.last_fired
            .get(key)
            .map(|fired| *fired > now - cooldown)
            .unwrap_or(false)
    }

    /// Mark `key` as fired now.
    pub fn record(&self, key: &str) {
        self.record_at(key, Utc::now());
    }

    /// Mark `key` as fired at `at`, unless it already holds a later time.
    pub fn record_at(&self, key: &str, at: DateTime<Utc>) {
        self.last_fired
            .entry(key.to_string())
            .and_modify(|fired| {
                if at > *fired {
                    *fired = at;
                }
            })
            .or_insert(at);
    }

    /// Check and record in one step under the key's shard lock.
    ///
    /// Returns true when the caller won the right to fire: the key was not
    /// within its cooldown and now carries `now`. Concurrent callers for the
    /// same key see exactly one winner per cooldown window.
    pub fn try_claim(&self, key: &str, cooldown: Duration, now: DateTime<Utc>) -> bool {
        match self.last_fired.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let fired = *entry.get();
                if fired > now - cooldown || fired >= now {
                    false
                } else {
                    entry.insert(now);
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        }
    }

    pub fn last_fired(&self, key: &str) -> Option<DateTime<Utc>> {
        self.last_fired.get(key).map(|fired| *fired)
    }

    /// Drop entries that fired before `horizon`. They can no longer suppress
    /// anything under a cooldown shorter than `now - horizon`.
    pub fn prune_before(&self, horizon: DateTime<Utc>) -> usize {
        let before = self.last_fired.len();
        self.last_fired.retain(|_, fired| *fired >= horizon);
        before - self.last_fired.len()
    }

    pub fn len(&self) -> usize {
        self.last_fired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_fired.is_empty()
    }
}

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::hash::Hash;

/// Keyed cooldown: a key may fire again only once `min_interval` has passed since it last fired.
#[derive(Debug, Clone)]
pub struct RateLimiter<K> {
    min_interval: Duration,
    last_fired: HashMap<K, DateTime<Utc>>,
}

impl<K: Eq + Hash + Clone> RateLimiter<K> {
    pub fn new(min_interval: Duration) -> Self {
        RateLimiter {
            min_interval,
            last_fired: HashMap::new(),
        }
    }

    /// Returns true and records `now` as the last firing of `key` if the key never fired or
    /// its interval elapsed. A refused call leaves the state untouched.
    pub fn allow(&mut self, key: &K, now: DateTime<Utc>) -> bool {
        match self.last_fired.get(key) {
            Some(last) if now - *last < self.min_interval => false,
            _ => {
                self.last_fired.insert(key.clone(), now);
                true
            }
        }
    }

    pub fn last_fired(&self, key: &K) -> Option<DateTime<Utc>> {
        self.last_fired.get(key).copied()
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&K) -> bool) {
        self.last_fired.retain(|key, _| keep(key));
    }

    pub fn set_min_interval(&mut self, min_interval: Duration) {
        self.min_interval = min_interval;
    }

    pub fn len(&self) -> usize {
        self.last_fired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_fired.is_empty()
    }
}

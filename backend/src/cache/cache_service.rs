use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::fingerprint::Fingerprint;
use super::models::{CacheEntry, ResultPayload};

/// Time source for entry ages. Swapped out in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// In-memory identification results keyed by upload fingerprint.
///
/// Entries older than `ttl` are never returned. Expired entries are swept on
/// `store`, so the map only shrinks under write pressure; there is no timer.
#[derive(Clone)]
pub struct ResultCache {
    entries: Arc<Mutex<HashMap<Fingerprint, CacheEntry>>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
            clock,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<Fingerprint, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<ResultPayload> {
        let now = self.clock.now();
        let entries = self.entries();
        match entries.get(fingerprint) {
            Some(entry) if entry.age(now) < self.ttl => {
                debug_assert_eq!(entry.fingerprint, *fingerprint);
                log::debug!("Result cache hit for {}", fingerprint);
                Some(entry.payload.clone())
            }
            Some(_) => {
                log::debug!("Result cache entry for {} has expired", fingerprint);
                None
            }
            None => None,
        }
    }

    pub fn store(&self, fingerprint: Fingerprint, payload: ResultPayload) {
        let now = self.clock.now();
        let ttl = self.ttl;
        let mut entries = self.entries();
        entries.insert(fingerprint, CacheEntry::new(fingerprint, payload, now));

        let before = entries.len();
        entries.retain(|_, entry| entry.age(now) <= ttl);
        let swept = before - entries.len();
        if swept > 0 {
            log::debug!("Swept {} expired result cache entries", swept);
        }
    }

    /// Drops every entry and returns how many there were.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries();
        let removed = entries.len();
        entries.clear();
        removed
    }

    pub fn size(&self) -> usize {
        self.entries().len()
    }
}

use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use montage_contracts::{NormalizationError, NormalizedImage};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
struct CacheEntry {
    image: NormalizedImage,
    stored_at: Instant,
}

impl CacheEntry {
    fn new(image: NormalizedImage) -> Self {
        Self {
            image,
            stored_at: Instant::now(),
        }
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.stored_at.elapsed() < ttl
    }
}

/// Normalization results keyed by a digest of the raw upload bytes.
///
/// Safe to share between pipelines. A concurrent miss on the same key may
/// normalize twice; the first stored entry wins and both callers get it.
/// Every miss sweeps expired entries, and a zero TTL stores nothing.
#[derive(Debug)]
pub struct NormalizationCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl NormalizationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn key_for(raw: &[u8]) -> String {
        hex::encode(Sha256::digest(raw))
    }

    pub fn get(&self, raw: &[u8]) -> Option<NormalizedImage> {
        let key = Self::key_for(raw);
        self.entries
            .get(&key)
            .filter(|entry| entry.is_fresh(self.ttl))
            .map(|entry| entry.image.clone())
    }

    /// Returns the cached image for `raw`, or runs `normalize` and stores the
    /// result. The flag is true on a cache hit. Failures are not cached.
    pub fn get_or_try_insert_with<F>(
        &self,
        raw: &[u8],
        normalize: F,
    ) -> Result<(NormalizedImage, bool), NormalizationError>
    where
        F: FnOnce() -> Result<NormalizedImage, NormalizationError>,
    {
        let key = Self::key_for(raw);
        if let Some(hit) = self
            .entries
            .get(&key)
            .filter(|entry| entry.is_fresh(self.ttl))
            .map(|entry| entry.image.clone())
        {
            return Ok((hit, true));
        }

        let fresh = normalize()?;
        self.purge_expired();
        if self.ttl.is_zero() {
            return Ok((fresh, false));
        }
        let stored = match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_fresh(self.ttl) {
                    occupied.get().image.clone()
                } else {
                    occupied.insert(CacheEntry::new(fresh.clone()));
                    fresh
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry::new(fresh.clone()));
                fresh
            }
        };
        Ok((stored, false))
    }

    /// Drops expired entries and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_fresh(self.ttl));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

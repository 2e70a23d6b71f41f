use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use lru::LruCache;
use tracing::{debug, info};

use crate::pki::name::GeneralName;

use super::types::CrlView;
use super::validation::is_valid_at;

const DEFAULT_CAPACITY: usize = 64;

/// Downloaded CRLs keyed by the name they were fetched from.
#[derive(Debug)]
pub struct CrlCache {
    entries: Mutex<LruCache<GeneralName, Arc<dyn CrlView>>>,
}

impl CrlCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns the cached CRL for `name` if it is still valid at `instant`.
    /// A stale entry is evicted.
    pub fn get(&self, name: &GeneralName, instant: DateTime<Utc>) -> Option<Arc<dyn CrlView>> {
        let mut entries = self.entries.lock().ok()?;
        let crl = entries.get(name).cloned()?;
        if is_valid_at(crl.as_ref(), instant) {
            debug!("Using cached CRL from {name}");
            Some(crl)
        } else {
            debug!("Cached CRL from {name} is stale, evicting");
            entries.pop(name);
            None
        }
    }

    pub fn insert(&self, name: GeneralName, crl: Arc<dyn CrlView>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.put(name, crl);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
            info!("CRL cache cleared");
        }
    }

    /// Remove expired CRLs from cache
    pub fn cleanup(&self, instant: DateTime<Utc>) -> usize {
        let Ok(mut entries) = self.entries.lock() else {
            return 0;
        };
        let stale: Vec<GeneralName> = entries
            .iter()
            .filter(|(_, crl)| !is_valid_at(crl.as_ref(), instant))
            .map(|(name, _)| name.clone())
            .collect();
        for name in &stale {
            entries.pop(name);
        }
        if !stale.is_empty() {
            info!("Removed {} expired CRLs from cache", stale.len());
        }
        stale.len()
    }
}

impl Default for CrlCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

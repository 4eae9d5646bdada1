use crate::domain::ports::ResultCache;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, error};

struct Entry {
    value: String,
    expires_at: Instant,
}

/// Process-local response cache with per-entry expiry.
pub struct InMemoryTtlCache {
    entries: RwLock<HashMap<String, Entry>>,
    max_entries: usize,
}

// Manual Debug implementation for InMemoryTtlCache
impl std::fmt::Debug for InMemoryTtlCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTtlCache")
            .field("entries", &"<RwLock>")
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

impl Default for InMemoryTtlCache {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl InMemoryTtlCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// Live entries, expired ones excluded.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.values().filter(|e| e.expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResultCache for InMemoryTtlCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(entries
            .get(key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("InMemoryTtlCache: Lock poisoned during write, recovering");
                poisoned.into_inner()
            }
        };

        if entries.len() >= self.max_entries && !entries.contains_key(key) {
            let now = Instant::now();
            entries.retain(|_, e| e.expires_at > now);
            if entries.len() >= self.max_entries {
                // Still full: drop whatever expires soonest
                if let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, e)| e.expires_at)
                    .map(|(k, _)| k.clone())
                {
                    debug!("InMemoryTtlCache: Evicting {}", oldest);
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }
}

//! In-memory cache backend.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{CacheError, CacheStore};
use crate::response::Response;

/// Unbounded in-process cache.
///
/// Entries live as long as the cache; nothing is evicted.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, Response>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Response>, CacheError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, response: &Response) -> Result<(), CacheError> {
        self.entries.insert(key.to_string(), response.clone());
        Ok(())
    }
}

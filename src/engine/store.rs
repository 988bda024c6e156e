//! # engine::store
//!
//! **Price Target Store**: latest [`PriceTarget`] per `priceTargetKey`.
//!
//! Written by the scheduler loop only, read by the reconciler and the
//! monitor endpoints.  Targets are stored behind an `Arc` and replaced whole,
//! so a reader always gets a complete ladder.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::models::PriceTarget;

#[derive(Clone, Default)]
pub struct PriceTargetStore {
    inner: Arc<RwLock<HashMap<String, Arc<PriceTarget>>>>,
}

impl PriceTargetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the target for `key` unconditionally.
    pub async fn set(&self, key: &str, target: PriceTarget) {
        let mut guard = self.inner.write().await;
        guard.insert(key.to_string(), Arc::new(target));
    }

    pub async fn get(&self, key: &str) -> Option<Arc<PriceTarget>> {
        let guard = self.inner.read().await;
        guard.get(key).cloned()
    }

    /// Drop the target for `key` so the reconciler leaves that pair alone.
    pub async fn remove(&self, key: &str) -> Option<Arc<PriceTarget>> {
        let mut guard = self.inner.write().await;
        guard.remove(key)
    }

    /// Drop every key not in `keep` (pairs removed by a config reload).
    pub async fn retain_keys(&self, keep: &[&str]) {
        let mut guard = self.inner.write().await;
        guard.retain(|k, _| keep.contains(&k.as_str()));
    }

    /// Clone of the whole map (for the monitor endpoint).
    pub async fn snapshot(&self) -> HashMap<String, Arc<PriceTarget>> {
        self.inner.read().await.clone()
    }
}

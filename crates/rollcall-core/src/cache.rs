//! Refreshable in-memory cache of enrolled embeddings.
//!
//! Readers take an `Arc` to a complete, immutable snapshot and scan it
//! without further locking; refresh builds the full replacement list
//! before swapping it in, so a partially-built snapshot is never visible.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};

use crate::store::{RecordStore, StoreError};
use crate::types::{Embedding, EnrolledEmbedding};

/// Default maximum snapshot age before `ensure_fresh` refreshes.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(3600);

/// An internally-consistent view of the enrollment data: every entry
/// comes from the same refresh cycle.
#[derive(Debug)]
pub struct CacheSnapshot {
    /// Entries in stable listing order; the matcher's "first encountered
    /// wins" tie-break depends on this order being deterministic.
    pub entries: Vec<EnrolledEmbedding>,
    /// None until the first successful refresh.
    pub refreshed_at: Option<Instant>,
}

impl CacheSnapshot {
    fn empty() -> Self {
        Self {
            entries: Vec::new(),
            refreshed_at: None,
        }
    }

    pub fn is_stale(&self, max_age: Duration) -> bool {
        match self.refreshed_at {
            Some(at) => at.elapsed() > max_age,
            None => true,
        }
    }
}

/// Atomically-swapped snapshot of `(identity, embedding)` pairs.
pub struct EmbeddingCache {
    snapshot: RwLock<Arc<CacheSnapshot>>,
    /// Serializes refreshes: two concurrent refreshes must never race to
    /// build and swap.
    refresh_gate: Mutex<()>,
    max_age: Duration,
}

impl EmbeddingCache {
    pub fn new(max_age: Duration) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(CacheSnapshot::empty())),
            refresh_gate: Mutex::new(()),
            max_age,
        }
    }

    /// Current snapshot. Cheap; the returned `Arc` stays valid and
    /// unchanging for the duration of a scan even if a refresh swaps in
    /// a newer snapshot meanwhile.
    pub async fn snapshot(&self) -> Arc<CacheSnapshot> {
        self.snapshot.read().await.clone()
    }

    /// Rebuild the snapshot from the record store.
    ///
    /// Students without an auth uid are skipped with a debug note: the
    /// auth uid is the externally-verified linking id, and an entry
    /// without one could never be resolved back to a student. On store
    /// failure the previous snapshot is kept unchanged.
    pub async fn refresh(&self, store: &dyn RecordStore) -> Result<usize, StoreError> {
        let _gate = self.refresh_gate.lock().await;
        self.refresh_locked(store).await
    }

    /// Refresh if the snapshot is older than the configured max age.
    ///
    /// Failures are logged and swallowed: matching proceeds on the stale
    /// (possibly empty) snapshot, which the matcher reports explicitly.
    pub async fn ensure_fresh(&self, store: &dyn RecordStore) {
        if !self.snapshot().await.is_stale(self.max_age) {
            return;
        }
        let _gate = self.refresh_gate.lock().await;
        // Another request may have refreshed while we waited on the gate.
        if !self.snapshot().await.is_stale(self.max_age) {
            return;
        }
        if let Err(e) = self.refresh_locked(store).await {
            tracing::warn!(error = %e, "cache refresh failed; serving previous snapshot");
        }
    }

    async fn refresh_locked(&self, store: &dyn RecordStore) -> Result<usize, StoreError> {
        let listings = store.list_enrollments().await?;

        let mut entries = Vec::new();
        for listing in listings {
            let Some(auth_uid) = listing.auth_uid else {
                tracing::debug!(
                    student = %listing.doc_id,
                    "skipping enrollment without auth uid"
                );
                continue;
            };
            for values in listing.embeddings {
                entries.push(EnrolledEmbedding {
                    identity: auth_uid.clone(),
                    embedding: Embedding::new(values),
                });
            }
        }

        let count = entries.len();
        let snapshot = Arc::new(CacheSnapshot {
            entries,
            refreshed_at: Some(Instant::now()),
        });
        *self.snapshot.write().await = snapshot;

        tracing::info!(entries = count, "enrollment cache refreshed");
        Ok(count)
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AGE)
    }
}

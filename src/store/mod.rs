//! Signal store access and directive merging.
//!
//! The signal store is the shared key-value medium through which operator
//! directives reach the in-job agent, out of band from the job itself. This
//! module owns the store abstraction and the read-merge-write path every
//! directive goes through; `memcached` holds the production transport.

pub mod memcached;
#[cfg(test)]
pub mod memory;

use crate::model::ControlDocument;
use async_trait::async_trait;
use thiserror::Error;

pub use memcached::MemcachedStore;
#[cfg(test)]
pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to connect to signal store at {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },
    #[error("signal store i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("signal store request timed out")]
    Timeout,
    #[error("unexpected signal store reply: {0:?}")]
    Protocol(String),
    #[error("invalid signal store key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },
    #[error("control document for {key:?} is not valid JSON: {source}")]
    Decode {
        key: String,
        source: serde_json::Error,
    },
    #[error("failed to encode control document: {0}")]
    Encode(#[source] serde_json::Error),
}

/// A key-value store holding one [`ControlDocument`] per run name.
///
/// Implementations are constructed explicitly and passed into whatever needs
/// them, so tests can substitute [`MemoryStore`] for the real transport.
/// There is no compare-and-set: `get` followed by `set` is the only write
/// path, with the lost-update race that implies (see [`merge_directive`]).
#[async_trait]
pub trait SignalStore: Send + Sync {
    /// Fetch the document stored under `key`. An absent key yields an empty
    /// document, not an error.
    async fn get(&self, key: &str) -> Result<ControlDocument, StoreError>;

    /// Store `doc` under `key`, replacing whatever was there.
    async fn set(&self, key: &str, doc: &ControlDocument) -> Result<(), StoreError>;
}

/// Read-merge-write a partial directive update into the run's document.
///
/// Fields not named by `partial` are preserved from the prior document; the
/// merged result is returned. The sequence is not atomic: two merges that
/// read the same prior document can each write independently and the later
/// write silently discards the earlier one's fields. Callers that need
/// exactness must serialize directives per run themselves.
pub async fn merge_directive<S>(
    store: &S,
    run_name: &str,
    partial: ControlDocument,
) -> Result<ControlDocument, StoreError>
where
    S: SignalStore + ?Sized,
{
    let mut doc = store.get(run_name).await?;
    let created = doc.is_empty();
    doc.merge_from(partial);
    store.set(run_name, &doc).await?;
    tracing::debug!(
        run = run_name,
        created,
        power_cap = ?doc.power_cap(),
        checkpoint_now = ?doc.checkpoint_now(),
        shutdown = ?doc.shutdown(),
        "directive merged"
    );
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::sync::Arc;
    use tokio::sync::Barrier;

    #[tokio::test]
    async fn absent_run_reads_as_empty_document() {
        let store = MemoryStore::default();
        let doc = store.get("nonexistent-run").await.unwrap();
        assert!(doc.is_empty());
    }

    #[tokio::test]
    async fn merge_preserves_unrelated_fields() {
        let store = MemoryStore::default();
        let mut prior = ControlDocument::default();
        prior.0.insert("a".into(), Value::from(1));
        store.set("job-1", &prior).await.unwrap();

        let mut update = ControlDocument::default();
        update.0.insert("b".into(), Value::from(2));
        merge_directive(&store, "job-1", update).await.unwrap();

        let doc = store.get("job-1").await.unwrap();
        assert_eq!(doc.0.get("a"), Some(&Value::from(1)));
        assert_eq!(doc.0.get("b"), Some(&Value::from(2)));
    }

    #[tokio::test]
    async fn merge_returns_the_written_document() {
        let store = MemoryStore::default();
        let written = merge_directive(&store, "job-2", ControlDocument::power_cap_update(275))
            .await
            .unwrap();
        assert_eq!(written, store.get("job-2").await.unwrap());
    }

    /// Holds every `get` on a barrier so two merges are forced to read the
    /// same prior document before either writes.
    struct GatedReads {
        inner: MemoryStore,
        gate: Arc<Barrier>,
    }

    #[async_trait]
    impl SignalStore for GatedReads {
        async fn get(&self, key: &str) -> Result<ControlDocument, StoreError> {
            let doc = self.inner.get(key).await?;
            self.gate.wait().await;
            Ok(doc)
        }

        async fn set(&self, key: &str, doc: &ControlDocument) -> Result<(), StoreError> {
            self.inner.set(key, doc).await
        }
    }

    /// The documented hazard: without compare-and-set, concurrent merges
    /// computed from the same stale read lose one writer's fields.
    #[tokio::test]
    async fn concurrent_merges_from_stale_reads_can_lose_an_update() {
        let store = Arc::new(GatedReads {
            inner: MemoryStore::default(),
            gate: Arc::new(Barrier::new(2)),
        });

        let mut left = ControlDocument::default();
        left.0.insert("power_cap".into(), Value::from(250));
        let mut right = ControlDocument::default();
        right.0.insert("checkpoint_now".into(), Value::Bool(true));

        let a = {
            let store = store.clone();
            tokio::spawn(async move { merge_directive(store.as_ref(), "job-3", left).await })
        };
        let b = {
            let store = store.clone();
            tokio::spawn(async move { merge_directive(store.as_ref(), "job-3", right).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        // Both writers read the empty document, so whichever wrote last
        // clobbered the other: exactly one field survives.
        let doc = store.inner.get("job-3").await.unwrap();
        assert_eq!(doc.0.len(), 1, "lost-update race did not manifest: {doc:?}");
    }
}

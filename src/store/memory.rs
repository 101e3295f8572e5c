//! In-memory [`SignalStore`] used by the test suite.

use super::{SignalStore, StoreError};
use crate::model::ControlDocument;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Stores documents in a process-local map. Semantics match the real store:
/// a missing key reads as an empty document and `set` replaces wholesale.
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<String, ControlDocument>>,
}

#[async_trait]
impl SignalStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<ControlDocument, StoreError> {
        Ok(self.docs.lock().await.get(key).cloned().unwrap_or_default())
    }

    async fn set(&self, key: &str, doc: &ControlDocument) -> Result<(), StoreError> {
        self.docs.lock().await.insert(key.to_string(), doc.clone());
        Ok(())
    }
}

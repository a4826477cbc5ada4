//! In-memory call-record store

use crate::domain::call::record::CallRecord;
use crate::domain::call::repository::CallStore;
use crate::domain::shared::result::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

/// Keeps every submitted record for the life of the process
#[derive(Default)]
pub struct InMemoryCallStore {
    records: RwLock<Vec<CallRecord>>,
}

impl InMemoryCallStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls placed to one user, oldest first
    pub async fn records_for(&self, user_id: &str) -> Vec<CallRecord> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl CallStore for InMemoryCallStore {
    async fn submit(&self, record: &CallRecord) -> Result<()> {
        self.records.write().await.push(record.clone());
        Ok(())
    }
}

//! In-memory session store.

use std::time::SystemTime;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{SessionRecord, SessionStore};
use crate::core::FrameworkResult;

/// Process-local store; sessions do not survive a restart
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<String, SessionRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop every expired record, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = SystemTime::now();
        let before = self.records.len();
        self.records.retain(|_, record| record.expiry > now);
        before - self.records.len()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn find(&self, token: &str) -> FrameworkResult<Option<SessionRecord>> {
        let Some(record) = self.records.get(token).map(|r| r.clone()) else {
            return Ok(None);
        };
        if record.is_expired() {
            self.records.remove(token);
            return Ok(None);
        }
        Ok(Some(record))
    }

    async fn commit(&self, token: &str, record: &SessionRecord) -> FrameworkResult<()> {
        self.records.insert(token.to_string(), record.clone());
        Ok(())
    }

    async fn delete(&self, token: &str) -> FrameworkResult<()> {
        self.records.remove(token);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::BTreeMap, time::Duration};

    fn record(expiry: SystemTime) -> SessionRecord {
        SessionRecord {
            values: BTreeMap::from([("user".to_string(), serde_json::json!("ada"))]),
            expiry,
        }
    }

    #[tokio::test]
    async fn test_commit_find_delete() {
        let store = MemoryStore::new();
        let live = record(SystemTime::now() + Duration::from_secs(60));
        store.commit("t1", &live).await.unwrap();

        assert_eq!(store.find("t1").await.unwrap(), Some(live));
        store.delete("t1").await.unwrap();
        assert_eq!(store.find("t1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_records_hidden() {
        let store = MemoryStore::new();
        store
            .commit("old", &record(SystemTime::now() - Duration::from_secs(1)))
            .await
            .unwrap();
        store
            .commit("new", &record(SystemTime::now() + Duration::from_secs(60)))
            .await
            .unwrap();

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.find("old").await.unwrap().is_none());
    }
}

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::models::{OptOutKey, OptOutRecord};
use crate::store::{OptOutStore, StoreError, StoreResult};

/// Process-local store used by tests and single-node development setups.
///
/// Inserts go through the map's entry API, so two racing inserts for the same key
/// produce one row and one [`StoreError::Duplicate`], like the unique index does
/// in PostgreSQL.
#[derive(Debug, Default)]
pub struct MemoryOptOutStore {
    records: DashMap<OptOutKey, OptOutRecord>,
    next_id: AtomicI64,
}

impl MemoryOptOutStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn collect<F>(&self, predicate: F) -> Vec<OptOutRecord>
    where
        F: Fn(&OptOutRecord) -> bool,
    {
        let mut records: Vec<OptOutRecord> = self
            .records
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by_key(|record| record.id);
        records
    }
}

#[rocket::async_trait]
impl OptOutStore for MemoryOptOutStore {
    async fn exists(&self, key: &OptOutKey) -> StoreResult<bool> {
        Ok(self.records.contains_key(key))
    }

    async fn find(&self, key: &OptOutKey) -> StoreResult<Option<OptOutRecord>> {
        Ok(self.records.get(key).map(|entry| entry.value().clone()))
    }

    async fn insert(&self, key: &OptOutKey) -> StoreResult<OptOutRecord> {
        match self.records.entry(key.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate),
            Entry::Vacant(slot) => {
                let now = Utc::now();
                let record = OptOutRecord {
                    id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
                    email: key.email().to_string(),
                    company_id: key.company_id(),
                    list: key.list().to_string(),
                    created_at: now,
                    updated_at: now,
                };
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn delete(&self, key: &OptOutKey) -> StoreResult<u64> {
        Ok(self.records.remove(key).map(|_| 1).unwrap_or(0))
    }

    async fn for_company(
        &self,
        company_id: i64,
        list: Option<&str>,
    ) -> StoreResult<Vec<OptOutRecord>> {
        Ok(self.collect(|record| {
            record.company_id == company_id && list.is_none_or(|list| record.list == list)
        }))
    }

    async fn for_email(&self, email: &str) -> StoreResult<Vec<OptOutRecord>> {
        Ok(self.collect(|record| record.email == email))
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

//! Subscription business logic on top of an [`OptOutStore`].

use std::sync::Arc;

use crate::error::{OptOutError, OptOutResult};
use crate::models::{OptOutKey, OptOutRecord, normalize_email};
use crate::store::{OptOutStore, StoreError};

/// Opt-out/opt-in operations keyed by `(email, company_id, list)`.
///
/// Every entry point normalizes the email and fails fast with
/// [`OptOutError::InvalidArgument`] on blank input.
#[derive(Clone)]
pub struct SubscriptionService {
    store: Arc<dyn OptOutStore>,
}

impl SubscriptionService {
    pub fn new(store: Arc<dyn OptOutStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn OptOutStore> {
        &self.store
    }

    pub async fn opted_out(&self, email: &str, company_id: i64, list: &str) -> OptOutResult<bool> {
        let key = OptOutKey::new(email, company_id, list)?;
        Ok(self.store.exists(&key).await?)
    }

    /// Ensure exactly one opt-out row exists for the tuple and return it.
    pub async fn opt_out(
        &self,
        email: &str,
        company_id: i64,
        list: &str,
    ) -> OptOutResult<OptOutRecord> {
        let key = OptOutKey::new(email, company_id, list)?;

        if let Some(existing) = self.store.find(&key).await? {
            return Ok(existing);
        }

        match self.store.insert(&key).await {
            Ok(record) => {
                log::info!(
                    "opted out company={} list={} id={}",
                    record.company_id,
                    record.list,
                    record.id
                );
                Ok(record)
            }
            Err(StoreError::Duplicate) => {
                // Lost the race against an identical request.
                log::debug!(
                    "concurrent opt-out for company={} list={}, refetching",
                    key.company_id(),
                    key.list()
                );
                self.store.find(&key).await?.ok_or_else(|| {
                    OptOutError::Store(StoreError::Duplicate)
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Remove the opt-out for the tuple. Returns the number of rows deleted.
    pub async fn opt_in(&self, email: &str, company_id: i64, list: &str) -> OptOutResult<u64> {
        let key = OptOutKey::new(email, company_id, list)?;
        let deleted = self.store.delete(&key).await?;

        if deleted > 0 {
            log::info!("opted in company={} list={}", key.company_id(), key.list());
        }

        Ok(deleted)
    }

    /// All opt-outs for a company, optionally narrowed to one list.
    pub async fn opt_outs_for_company(
        &self,
        company_id: i64,
        list: Option<&str>,
    ) -> OptOutResult<Vec<OptOutRecord>> {
        let list = list.map(str::trim).filter(|list| !list.is_empty());
        Ok(self.store.for_company(company_id, list).await?)
    }

    /// All opt-outs for one address across every company.
    pub async fn opt_outs_for_email(&self, email: &str) -> OptOutResult<Vec<OptOutRecord>> {
        let email = normalize_email(email);
        if email.is_empty() {
            return Err(OptOutError::InvalidArgument("Missing email".into()));
        }

        Ok(self.store.for_email(&email).await?)
    }

    /// Opt-outs for one address within one company.
    pub async fn opt_outs_for_subscriber(
        &self,
        email: &str,
        company_id: i64,
        list: Option<&str>,
    ) -> OptOutResult<Vec<OptOutRecord>> {
        let list = list.map(str::trim).filter(|list| !list.is_empty());
        let records = self.opt_outs_for_email(email).await?;

        Ok(records
            .into_iter()
            .filter(|record| record.company_id == company_id)
            .filter(|record| list.is_none_or(|list| record.list == list))
            .collect())
    }
}

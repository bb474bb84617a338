//! Opt-out persistence.
//!
//! The store only knows about normalized [`OptOutKey`]s. Uniqueness of the key is
//! enforced here; callers that lose an insert race see [`StoreError::Duplicate`]
//! and decide what to do with it.

pub mod memory;
pub mod postgres;

use rocket_db_pools::sqlx;
use thiserror::Error;

use crate::models::{OptOutKey, OptOutRecord};

pub use memory::MemoryOptOutStore;
pub use postgres::PgOptOutStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A row for the key already exists.
    #[error("opt-out already exists for this company and list")]
    Duplicate,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[rocket::async_trait]
pub trait OptOutStore: Send + Sync {
    async fn exists(&self, key: &OptOutKey) -> StoreResult<bool>;

    async fn find(&self, key: &OptOutKey) -> StoreResult<Option<OptOutRecord>>;

    /// Insert a new row; [`StoreError::Duplicate`] if the key is taken.
    async fn insert(&self, key: &OptOutKey) -> StoreResult<OptOutRecord>;

    /// Delete every row matching the key and return how many went away.
    async fn delete(&self, key: &OptOutKey) -> StoreResult<u64>;

    async fn for_company(&self, company_id: i64, list: Option<&str>)
    -> StoreResult<Vec<OptOutRecord>>;

    /// `email` must already be normalized.
    async fn for_email(&self, email: &str) -> StoreResult<Vec<OptOutRecord>>;

    /// Reachability check used by `/health`.
    async fn ping(&self) -> StoreResult<()>;
}

use rocket_db_pools::sqlx::{self, PgPool};

use crate::models::{OptOutKey, OptOutRecord};
use crate::store::{OptOutStore, StoreError, StoreResult};

const UNIQUE_VIOLATION: &str = "23505";

const SELECT_COLUMNS: &str = "id, email, company_id, list, created_at, updated_at";

/// PostgreSQL-backed store over the `mailkick_opt_outs` table.
#[derive(Debug, Clone)]
pub struct PgOptOutStore {
    pool: PgPool,
}

impl PgOptOutStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[rocket::async_trait]
impl OptOutStore for PgOptOutStore {
    async fn exists(&self, key: &OptOutKey) -> StoreResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM mailkick_opt_outs WHERE email = $1 AND company_id = $2 AND list = $3)",
        )
        .bind(key.email())
        .bind(key.company_id())
        .bind(key.list())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn find(&self, key: &OptOutKey) -> StoreResult<Option<OptOutRecord>> {
        let record = sqlx::query_as::<_, OptOutRecord>(&format!(
            "SELECT {SELECT_COLUMNS} FROM mailkick_opt_outs WHERE email = $1 AND company_id = $2 AND list = $3"
        ))
        .bind(key.email())
        .bind(key.company_id())
        .bind(key.list())
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn insert(&self, key: &OptOutKey) -> StoreResult<OptOutRecord> {
        let result = sqlx::query_as::<_, OptOutRecord>(&format!(
            r#"INSERT INTO mailkick_opt_outs (email, company_id, list, created_at, updated_at)
               VALUES ($1, $2, $3, NOW(), NOW())
               RETURNING {SELECT_COLUMNS}"#
        ))
        .bind(key.email())
        .bind(key.company_id())
        .bind(key.list())
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(record) => Ok(record),
            Err(err) if is_unique_violation(&err) => Err(StoreError::Duplicate),
            Err(err) => Err(StoreError::Database(err)),
        }
    }

    async fn delete(&self, key: &OptOutKey) -> StoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM mailkick_opt_outs WHERE email = $1 AND company_id = $2 AND list = $3",
        )
        .bind(key.email())
        .bind(key.company_id())
        .bind(key.list())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn for_company(
        &self,
        company_id: i64,
        list: Option<&str>,
    ) -> StoreResult<Vec<OptOutRecord>> {
        let records = match list {
            Some(list) => {
                sqlx::query_as::<_, OptOutRecord>(&format!(
                    "SELECT {SELECT_COLUMNS} FROM mailkick_opt_outs WHERE company_id = $1 AND list = $2 ORDER BY id ASC"
                ))
                .bind(company_id)
                .bind(list)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, OptOutRecord>(&format!(
                    "SELECT {SELECT_COLUMNS} FROM mailkick_opt_outs WHERE company_id = $1 ORDER BY id ASC"
                ))
                .bind(company_id)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(records)
    }

    async fn for_email(&self, email: &str) -> StoreResult<Vec<OptOutRecord>> {
        let records = sqlx::query_as::<_, OptOutRecord>(&format!(
            "SELECT {SELECT_COLUMNS} FROM mailkick_opt_outs WHERE email = $1 ORDER BY id ASC"
        ))
        .bind(email)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err)
            if db_err
                .code()
                .map(|code| code == UNIQUE_VIOLATION)
                .unwrap_or(false)
    )
}

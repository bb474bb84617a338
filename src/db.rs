use rocket_db_pools::{Database, sqlx};

/// Connection pool for the opt-out table, configured under `databases.mailkick_db`.
#[derive(Database)]
#[database("mailkick_db")]
pub struct MailkickDb(sqlx::PgPool);

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Apply pending schema migrations.
pub async fn run_migrations(pool: &sqlx::PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    MIGRATOR.run(pool).await
}

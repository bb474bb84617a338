#[macro_use]
extern crate rocket;

pub mod bounce;
pub mod config;
pub mod db;
pub mod error;
pub mod links;
pub mod models;
pub mod request_logger;
pub mod routes;
pub mod service;
pub mod state;
pub mod store;
pub mod subscriber;
pub mod token;

use crate::bounce::BounceRegistry;
use crate::config::{ConfigError, MailkickConfig};
use crate::db::MailkickDb;
use crate::request_logger::RequestLogger;
use crate::state::MailkickState;
use crate::store::PgOptOutStore;
use env_logger::Env;
use rocket::fairing::AdHoc;
use rocket::http::Method;
use rocket::{Build, Rocket, Route};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_db_pools::Database;
use rocket_okapi::{
    openapi_get_routes,
    rapidoc::{GeneralConfig, HideShowConfig, RapiDocConfig, make_rapidoc},
    settings::UrlObject,
    swagger_ui::{SwaggerUIConfig, make_swagger_ui},
};
use std::sync::{Arc, Once};

static LOGGER: Once = Once::new();

pub fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("info,rocket::server=warn,rocket::request=warn"),
        )
        .init();
    });
}

/// Server configured from the environment, with bounce feeds from `MAILKICK_BOUNCE_FEEDS`.
pub fn rocket() -> Result<Rocket<Build>, ConfigError> {
    init_logger();

    let config = MailkickConfig::from_env()?;
    let registry = config.bounce_registry()?;
    build_rocket(config, registry)
}

/// Server for an explicit configuration and bounce registry.
///
/// Embedders use this to register their own adapters or opt-out processor.
pub fn build_rocket(
    config: MailkickConfig,
    registry: BounceRegistry,
) -> Result<Rocket<Build>, ConfigError> {
    let cors = CorsOptions::default()
        .allowed_origins(AllowedOrigins::all())
        .allowed_methods(
            vec![Method::Get, Method::Post, Method::Delete]
                .into_iter()
                .map(From::from)
                .collect(),
        )
        .allow_credentials(true)
        .to_cors()?;

    if config.admin_token.is_none() {
        log::info!("MAILKICK_ADMIN_TOKEN not set, admin API disabled");
    }

    let mut rocket = rocket::build()
        .attach(RequestLogger)
        .attach(MailkickDb::init())
        .attach(cors)
        // Run database migrations on startup
        .attach(AdHoc::try_on_ignite(
            "Run Migrations",
            |rocket| async move {
                match MailkickDb::fetch(&rocket) {
                    Some(db) => {
                        let pool = (**db).clone();
                        match db::run_migrations(&pool).await {
                            Ok(_) => {
                                log::info!("database migrations successful");
                                Ok(rocket)
                            }
                            Err(e) => {
                                log::error!("database migrations failed: {}", e);
                                Err(rocket)
                            }
                        }
                    }
                    None => {
                        log::error!("database pool not available for migrations");
                        Err(rocket)
                    }
                }
            },
        ));

    let state_config = config.clone();
    rocket = rocket.attach(AdHoc::try_on_ignite(
        "Manage Opt-Out State",
        move |rocket| async move {
            match MailkickDb::fetch(&rocket) {
                Some(db) => {
                    let store = Arc::new(PgOptOutStore::new((**db).clone()));
                    let state = MailkickState::new(&state_config, store, registry);
                    Ok(rocket.manage(state))
                }
                None => {
                    log::error!("database pool not available for opt-out store");
                    Err(rocket)
                }
            }
        },
    ));

    if config.mount {
        log::info!("mounting opt-out routes at {}", config.mount_path);
        rocket = rocket.mount(config.mount_path.as_str(), routes::opt_outs::routes());
    }

    Ok(rocket
        .mount("/api/v1", api_routes(config.admin_token.is_some()))
        .register("/api/v1", catchers![routes::admin::unauthorized, routes::admin::not_found])
        .mount(
            "/api/docs/swagger/",
            make_swagger_ui(&SwaggerUIConfig {
                url: "../../v1/openapi.json".to_owned(),
                ..Default::default()
            }),
        )
        .mount(
            "/api/docs/rapidoc/",
            make_rapidoc(&RapiDocConfig {
                general: GeneralConfig {
                    spec_urls: vec![UrlObject::new("Mailkick API", "../../v1/openapi.json")],
                    ..Default::default()
                },
                hide_show: HideShowConfig {
                    allow_spec_url_load: false,
                    allow_spec_file_load: false,
                    ..Default::default()
                },
                ..Default::default()
            }),
        ))
}

fn api_routes(admin_enabled: bool) -> Vec<Route> {
    if admin_enabled {
        openapi_get_routes![
            routes::health::health_check,
            routes::admin::company_opt_outs,
            routes::admin::email_opt_outs,
            routes::admin::create_opt_out,
            routes::admin::delete_opt_out,
            routes::admin::import_bounces,
        ]
    } else {
        openapi_get_routes![routes::health::health_check]
    }
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use rocket::config::LogLevel;
    use rocket::figment::Figment;
    use rocket::local::asynchronous::Client as AsyncClient;
    use rocket::local::blocking::Client;
    use rocket::{Build, Rocket, Route};
    use std::sync::Arc;

    use crate::bounce::BounceRegistry;
    use crate::config::MailkickConfig;
    use crate::routes;
    use crate::state::MailkickState;
    use crate::store::{MemoryOptOutStore, OptOutStore};
    use crate::token::SigningKey;

    pub use database::{TestDatabase, TestDatabaseError};

    /// Fixed key so tests can mint tokens the routes will accept.
    pub const TEST_SECRET: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    pub const TEST_ADMIN_TOKEN: &str = "test-admin-token";

    /// Configuration signed with [`TEST_SECRET`] and the admin API enabled.
    pub fn test_config() -> MailkickConfig {
        let key = SigningKey::from_hex(TEST_SECRET).expect("valid test secret");
        let mut config = MailkickConfig::with_key(key);
        config.admin_token = Some(TEST_ADMIN_TOKEN.to_string());
        config
    }

    /// State backed by an in-memory store.
    pub fn memory_state() -> MailkickState {
        state_with_store(Arc::new(MemoryOptOutStore::new()), BounceRegistry::new())
    }

    pub fn state_with_store(store: Arc<dyn OptOutStore>, registry: BounceRegistry) -> MailkickState {
        MailkickState::new(&test_config(), store, registry)
    }

    pub mod database {
        use log::LevelFilter;
        use rocket_db_pools::sqlx::postgres::{PgConnectOptions, PgPoolOptions};
        use rocket_db_pools::sqlx::{self, ConnectOptions, PgPool};
        use testcontainers::{ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner};
        use testcontainers_modules::postgres::Postgres;
        use thiserror::Error;
        use tokio::runtime::Handle;
        use uuid::Uuid;

        use crate::db::MIGRATOR;

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("migration error: {0}")]
            Migration(#[from] sqlx::migrate::MigrateError),
            #[error("container error: {0}")]
            Container(#[from] TestcontainersError),
        }

        /// Ephemeral database factory for integration tests.
        pub struct TestDatabase {
            pool: Option<PgPool>,
            admin_options: PgConnectOptions,
            database_name: String,
            container: Option<ContainerAsync<Postgres>>,
        }

        impl TestDatabase {
            /// Provision a fresh database on the server named by `TEST_DATABASE_URL`,
            /// or inside a disposable container when it is unset.
            pub async fn new_from_env() -> Result<Self, TestDatabaseError> {
                match std::env::var("TEST_DATABASE_URL") {
                    Ok(url) if !url.trim().is_empty() => Self::provision(&url, None).await,
                    _ => Self::new().await,
                }
            }

            /// Provision a fresh database inside a disposable Postgres container.
            pub async fn new() -> Result<Self, TestDatabaseError> {
                let container = Postgres::default().start().await?;

                let host = container.get_host().await?.to_string();
                let port = container.get_host_port_ipv4(5432).await?;
                let admin_url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

                Self::provision(&admin_url, Some(container)).await
            }

            async fn provision(
                url: &str,
                container: Option<ContainerAsync<Postgres>>,
            ) -> Result<Self, TestDatabaseError> {
                let base_options: PgConnectOptions = url.parse().map_err(TestDatabaseError::Sqlx)?;
                let base_options = base_options.log_statements(LevelFilter::Off);

                let base_name = base_options
                    .get_database()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "postgres".to_string());

                let admin_options = base_options.clone().database("postgres");
                let admin_pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(admin_options.clone())
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                let new_db_name = format!("{}_{}", base_name, Uuid::new_v4().simple());
                let create_sql = format!("CREATE DATABASE \"{}\" TEMPLATE template0", new_db_name);
                sqlx::query(&create_sql)
                    .execute(&admin_pool)
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;
                admin_pool.close().await;

                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect_with(base_options.clone().database(&new_db_name))
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                MIGRATOR.run(&pool).await?;

                Ok(Self {
                    pool: Some(pool),
                    admin_options,
                    database_name: new_db_name,
                    container,
                })
            }

            /// Cloneable connection pool for use in tests and Rocket state.
            pub fn pool(&self) -> &PgPool {
                self.pool.as_ref().expect("test database pool is available")
            }

            pub fn pool_clone(&self) -> PgPool {
                self.pool().clone()
            }

            /// Close pool connections and drop the ephemeral database.
            pub async fn close(mut self) -> Result<(), TestDatabaseError> {
                if let Some(pool) = self.pool.take() {
                    pool.close().await;
                }

                drop_database_with_fallback(self.admin_options.clone(), &self.database_name)
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                if let Some(container) = self.container.take() {
                    drop(container);
                }

                Ok(())
            }
        }

        async fn drop_database_with_fallback(
            admin_options: PgConnectOptions,
            database_name: &str,
        ) -> Result<(), sqlx::Error> {
            let admin_pool = PgPoolOptions::new()
                .max_connections(1)
                .connect_with(admin_options)
                .await?;

            let drop_force = format!("DROP DATABASE \"{}\" WITH (FORCE)", database_name);
            match sqlx::query(&drop_force).execute(&admin_pool).await {
                Ok(_) => Ok(()),
                Err(err) if force_drop_unsupported(&err) => {
                    let drop_sql = format!("DROP DATABASE \"{}\"", database_name);
                    sqlx::query(&drop_sql).execute(&admin_pool).await?;
                    Ok(())
                }
                Err(err) => Err(err),
            }
        }

        fn force_drop_unsupported(err: &sqlx::Error) -> bool {
            matches!(
                err,
                sqlx::Error::Database(db_err)
                    if db_err
                        .code()
                        .map(|code| code == "42601" || code == "0A000")
                        .unwrap_or(false)
            )
        }

        impl Drop for TestDatabase {
            fn drop(&mut self) {
                if let Some(pool) = self.pool.take() {
                    let admin_options = self.admin_options.clone();
                    let db_name = self.database_name.clone();
                    if let Ok(handle) = Handle::try_current() {
                        handle.spawn(async move {
                            pool.close().await;
                            let _ =
                                drop_database_with_fallback(admin_options.clone(), &db_name).await;
                        });
                    } else {
                        std::thread::spawn(move || {
                            if let Ok(rt) = tokio::runtime::Runtime::new() {
                                rt.block_on(async move {
                                    pool.close().await;
                                    let _ = drop_database_with_fallback(
                                        admin_options.clone(),
                                        &db_name,
                                    )
                                    .await;
                                });
                            }
                        });
                    }
                }

                if let Some(container) = self.container.take() {
                    drop(container);
                }
            }
        }
    }

    /// Builder for constructing Rocket instances tailored for integration tests.
    #[derive(Default)]
    pub struct TestRocketBuilder {
        figment: Figment,
        mounts: Vec<(String, Vec<Route>)>,
        state: Option<MailkickState>,
    }

    impl TestRocketBuilder {
        /// Start a builder with sensible defaults: random port, logging disabled.
        pub fn new() -> Self {
            let figment = rocket::Config::figment()
                .merge(("port", 0))
                .merge(("log_level", LogLevel::Off))
                .merge(("cli_colors", false));

            Self {
                figment,
                mounts: Vec::new(),
                state: None,
            }
        }

        /// Mount routes under `/api/v1`.
        pub fn mount_api_routes(mut self, routes: Vec<Route>) -> Self {
            self.mounts.push(("/api/v1".to_string(), routes));
            self
        }

        /// Mount the token routes under `base`.
        pub fn mount_opt_out_routes(mut self, base: &str) -> Self {
            self.mounts.push((base.to_string(), routes::opt_outs::routes()));
            self
        }

        pub fn manage_state(mut self, state: MailkickState) -> Self {
            self.state = Some(state);
            self
        }

        /// Finish building the Rocket instance.
        pub fn build(self) -> Rocket<Build> {
            let mut rocket = rocket::custom(self.figment).register(
                "/api/v1",
                catchers![routes::admin::unauthorized, routes::admin::not_found],
            );

            for (base, routes) in self.mounts {
                rocket = rocket.mount(base, routes);
            }

            if let Some(state) = self.state {
                rocket = rocket.manage(state);
            }

            rocket
        }

        /// Convenience helper to produce a blocking local client.
        pub fn blocking_client(self) -> Client {
            Client::tracked(self.build()).expect("valid Rocket instance")
        }

        /// Convenience helper to produce an asynchronous local client.
        pub async fn async_client(self) -> AsyncClient {
            AsyncClient::tracked(self.build())
                .await
                .expect("valid Rocket instance")
        }
    }
}

//! branchctl: branch manager and connection pool router for branched
//! databases.
//!
//! This crate is the data-access core of a backend-as-a-service platform. Each
//! project has one `main` branch plus any number of preview and persistent
//! branches, every branch backed by its own physical Postgres database cloned
//! from its parent. The crate owns:
//!
//! - **Branch lifecycle**: create (clone from parent), reset (re-clone),
//!   delete, and TTL-driven expiration, with a status state machine guarding
//!   concurrent operations ([`branches`])
//! - **Connection pool routing**: a lazily-built bounded pool per branch under
//!   one instance-wide connection budget ([`pool`])
//! - **Active-branch resolution**: which branch an actor's traffic routes to,
//!   from a per-request header override, a durable selection, or `main`
//!   ([`branches::resolver`])
//! - **Access control**: per-branch grants layered under project roles
//!   ([`branches::access`])
//! - **GitHub automation policies**: per-repository config for PR-driven
//!   branch creation and cleanup ([`api::handlers::github`])
//!
//! Authentication is delegated to a fronting gateway that forwards the actor's
//! identity in proxy headers ([`auth`]). Metadata lives in Postgres (or in
//! memory for local development and tests); physical branch databases are
//! provisioned with `CREATE DATABASE ... TEMPLATE` ([`branches::provision`]).

pub mod api;
pub mod auth;
pub mod branches;
pub mod config;
pub mod errors;
pub mod openapi;
pub mod pool;
pub mod store;
pub mod telemetry;
pub mod types;

use crate::branches::provision::{PgProvisioner, Provisioner};
use crate::branches::sweep::{run_expiration_sweep, run_idle_sweep};
use crate::branches::{BranchManager, SYSTEM_ACTOR};
use crate::config::StorageKind;
use crate::openapi::ApiDoc;
use crate::pool::{MemoryBackend, PgBackend, PoolConfig, PoolRouter, PoolService};
use crate::store::{BranchStore, NewBranch, StoreError};
use crate::types::{BranchStatus, BranchType, DataCloneMode};
use axum::{
    Router,
    routing::{delete, get, post},
};
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, warn};
use utoipa::OpenApi;
use utoipa_rapidoc::RapiDoc;
use uuid::Uuid;

pub use config::Config;
pub use types::{BranchId, UserId};

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<BranchManager>,
    pub pools: Arc<dyn PoolService>,
    pub config: Config,
}

/// Migrator for the metadata database schema.
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Build the application router: branch lifecycle, sharing, active-branch
/// resolution, GitHub automation config, and system endpoints, plus the
/// OpenAPI document and RapiDoc UI.
///
/// CORS is permissive because the authenticating gateway in front of this
/// service is the trust boundary, not the browser.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(api::handlers::system::healthz))
        .route(
            "/branches",
            get(api::handlers::branches::list_branches).post(api::handlers::branches::create_branch),
        )
        // Static segments win over the {id} capture, so these coexist.
        .route("/branches/stats/pools", get(api::handlers::system::pool_stats))
        .route(
            "/branches/active",
            get(api::handlers::active::get_active_branch)
                .post(api::handlers::active::select_active_branch)
                .delete(api::handlers::active::clear_active_branch),
        )
        .route(
            "/branches/{id}",
            get(api::handlers::branches::get_branch).delete(api::handlers::branches::delete_branch),
        )
        .route("/branches/{id}/reset", post(api::handlers::branches::reset_branch))
        .route("/branches/{id}/activity", get(api::handlers::branches::get_branch_activity))
        .route(
            "/branches/{id}/access",
            get(api::handlers::access::list_access).post(api::handlers::access::grant_access),
        )
        .route(
            "/branches/{id}/access/{user_id}",
            delete(api::handlers::access::revoke_access),
        )
        .route(
            "/github/configs",
            get(api::handlers::github::list_github_configs).post(api::handlers::github::upsert_github_config),
        )
        .route(
            "/github/configs/{owner}/{repo}",
            get(api::handlers::github::get_github_config).delete(api::handlers::github::delete_github_config),
        )
        .with_state(state)
        .merge(RapiDoc::with_openapi("/api-docs/openapi.json", ApiDoc::openapi()).path("/docs"))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

/// Ensure the project's `main` branch exists, seeding it on first boot. The
/// main branch's physical database is managed out of band; this only records
/// the metadata row every other branch hangs off.
async fn ensure_main_branch(store: &Arc<dyn BranchStore>) -> anyhow::Result<()> {
    match store.main_branch().await {
        Ok(_) => return Ok(()),
        Err(StoreError::NotFound) => {}
        Err(e) => return Err(e.into()),
    }

    let seeded = store
        .insert_branch(NewBranch {
            id: Uuid::new_v4(),
            slug: "main".to_string(),
            name: "main".to_string(),
            parent_branch_id: None,
            branch_type: BranchType::Main,
            data_clone_mode: DataCloneMode::FullClone,
            status: BranchStatus::Active,
            created_by: SYSTEM_ACTOR,
            github_pr_number: None,
            github_pr_url: None,
            github_repo: None,
            expires_at: None,
        })
        .await;

    match seeded {
        Ok(branch) => {
            info!(branch = %branch.id, "Seeded main branch");
            Ok(())
        }
        // Another instance seeded it first.
        Err(StoreError::UniqueViolation { .. }) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Handles to the background sweeps, for coordinated shutdown.
pub struct BackgroundServices {
    background_tasks: Vec<JoinHandle<()>>,
    shutdown_token: CancellationToken,
}

impl BackgroundServices {
    /// Signal all background tasks to stop and wait for them to finish.
    pub async fn shutdown(self) {
        info!("Shutting down background services...");
        self.shutdown_token.cancel();
        for task in self.background_tasks {
            if let Err(e) = task.await {
                warn!("Background task panicked during shutdown: {e}");
            }
        }
        info!("Background services stopped");
    }
}

fn setup_background_services(
    manager: Arc<BranchManager>,
    pools: Arc<dyn PoolService>,
    config: &Config,
    shutdown_token: CancellationToken,
) -> BackgroundServices {
    let background_tasks = vec![
        tokio::spawn(run_expiration_sweep(
            manager,
            config.sweep.expiration_interval,
            shutdown_token.child_token(),
        )),
        tokio::spawn(run_idle_sweep(
            pools,
            config.sweep.idle_interval,
            shutdown_token.child_token(),
        )),
    ];

    BackgroundServices {
        background_tasks,
        shutdown_token,
    }
}

/// The complete application: storage, pool router, HTTP router, and
/// background sweeps.
///
/// # Lifecycle
///
/// 1. [`Application::new`] validates config, connects storage, runs
///    migrations, seeds the main branch, and starts the sweeps
/// 2. [`Application::serve`] binds a TCP port and handles requests until the
///    shutdown future resolves
/// 3. On shutdown, background tasks are joined and all pools drained
pub struct Application {
    router: Router,
    app_state: AppState,
    config: Config,
    metadata_pool: Option<PgPool>,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application instance with all resources initialized.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting branchctl with configuration: {:#?}", config);
        config.validate()?;

        let pool_config = PoolConfig::from(&config.pools);
        let (store, provisioner, pools, metadata_pool): (
            Arc<dyn BranchStore>,
            Arc<dyn Provisioner>,
            Arc<dyn PoolService>,
            Option<PgPool>,
        ) = match config.database.storage {
            StorageKind::Postgres => {
                let metadata_pool = PgPoolOptions::new()
                    .max_connections(config.database.max_connections)
                    .connect(&config.database.url)
                    .await?;
                migrator().run(&metadata_pool).await?;

                // Provisioning needs CREATEDB; it gets its own small pool so
                // long-running clones never starve metadata queries.
                let admin_options: PgConnectOptions = config.database.admin_url().parse()?;
                let admin_pool = PgPoolOptions::new()
                    .max_connections(2)
                    .connect_with(admin_options.clone())
                    .await?;

                let store = Arc::new(store::postgres::PgBranchStore::new(metadata_pool.clone()));
                let provisioner = Arc::new(PgProvisioner::new(
                    admin_pool,
                    admin_options.clone(),
                    config.database.database_prefix.clone(),
                    config.provisioning.timeout,
                ));
                let pools = Arc::new(PoolRouter::new(
                    PgBackend::new(admin_options, config.database.database_prefix.clone()),
                    pool_config,
                ));
                (store, provisioner, pools, Some(metadata_pool))
            }
            StorageKind::Memory => {
                info!("Using in-memory storage; branches are not durable and no databases are provisioned");
                let store = Arc::new(store::memory::InMemoryBranchStore::new());
                let provisioner = Arc::new(branches::provision::mock::MockProvisioner::new());
                let pools = Arc::new(PoolRouter::new(MemoryBackend, pool_config));
                (store, provisioner, pools, None)
            }
        };

        ensure_main_branch(&store).await?;

        let manager = Arc::new(BranchManager::new(
            store,
            provisioner,
            pools.clone(),
            config.branching.clone(),
        ));

        let shutdown_token = CancellationToken::new();
        let bg_services = setup_background_services(manager.clone(), pools.clone(), &config, shutdown_token);

        let app_state = AppState {
            manager,
            pools,
            config: config.clone(),
        };
        let router = build_router(app_state.clone());

        Ok(Self {
            router,
            app_state,
            config,
            metadata_pool,
            bg_services,
        })
    }

    /// The HTTP router, for driving the application in tests without binding
    /// a port.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Start serving the application until `shutdown` resolves, then drain.
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("branchctl listening on http://{bind_addr}");

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        self.bg_services.shutdown().await;

        info!("Waiting for in-flight branch operations...");
        self.app_state.manager.shutdown().await;

        info!("Draining connection pools...");
        self.app_state.pools.close_all();

        if let Some(pool) = self.metadata_pool {
            info!("Closing metadata database connections...");
            pool.close().await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> Config {
        let mut config = Config::default();
        config.database.storage = StorageKind::Memory;
        config
    }

    #[tokio::test]
    async fn test_application_seeds_main_branch() {
        let app = Application::new(memory_config()).await.unwrap();
        let main = app.app_state.manager.store().main_branch().await.unwrap();
        assert_eq!(main.branch_type, BranchType::Main);
        assert_eq!(main.status, BranchStatus::Active);
        assert_eq!(main.slug, "main");
        app.bg_services.shutdown().await;
    }

    #[tokio::test]
    async fn test_seeding_is_idempotent() {
        let store: Arc<dyn BranchStore> = Arc::new(store::memory::InMemoryBranchStore::new());
        ensure_main_branch(&store).await.unwrap();
        ensure_main_branch(&store).await.unwrap();
        let filter = store::BranchFilter {
            limit: 50,
            ..Default::default()
        };
        assert_eq!(store.list_branches(&filter).await.unwrap().len(), 1);
    }
}

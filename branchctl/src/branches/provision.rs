//! Physical provisioning of branch databases.
//!
//! Every branch owns an isolated physical database named from its slug. The
//! production implementation copies the parent via Postgres template databases:
//! `full_clone` is a straight template copy, `schema_only` is a template copy
//! followed by truncation of user tables, which keeps extensions, types, and
//! DDL without paying for row data. Teardown drops the database with FORCE so
//! lingering sessions cannot wedge deletion.
//!
//! Provisioning is behind a trait so lifecycle logic can be tested with a mock
//! instead of a live cluster.

use crate::store::Branch;
use crate::types::DataCloneMode;
use sqlx::PgPool;
use sqlx::postgres::PgConnectOptions;
use sqlx::{ConnectOptions, Connection};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ProvisionError {
    /// The operation did not finish within the configured bound. The physical
    /// database may be half-built; callers must mark the branch errored.
    #[error("provisioning timed out after {0:?}")]
    Timeout(Duration),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Creates, resets, and tears down the physical database behind a branch.
#[async_trait::async_trait]
pub trait Provisioner: Send + Sync + 'static {
    /// Build the branch's database as a copy of its parent's.
    async fn provision(&self, branch: &Branch, parent: &Branch) -> Result<(), ProvisionError>;

    /// Discard the branch's data and rebuild from the parent's current state.
    async fn reset(&self, branch: &Branch, parent: &Branch) -> Result<(), ProvisionError>;

    /// Drop the branch's database. Idempotent.
    async fn teardown(&self, branch: &Branch) -> Result<(), ProvisionError>;

    /// Physical database name for a branch slug.
    fn database_name(&self, slug: &str) -> String;
}

/// Template-copy provisioner against a real Postgres cluster.
///
/// `admin_pool` must be connected to a maintenance database (not any branch
/// database) with CREATEDB privilege. `connect_options` is the same server,
/// used for one-off connections into freshly created branch databases.
pub struct PgProvisioner {
    admin_pool: PgPool,
    connect_options: PgConnectOptions,
    database_prefix: String,
    timeout: Duration,
}

impl PgProvisioner {
    pub fn new(
        admin_pool: PgPool,
        connect_options: PgConnectOptions,
        database_prefix: String,
        timeout: Duration,
    ) -> Self {
        Self {
            admin_pool,
            connect_options,
            database_prefix,
            timeout,
        }
    }

    async fn bounded<F, T>(&self, fut: F) -> Result<T, ProvisionError>
    where
        F: std::future::Future<Output = Result<T, ProvisionError>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| ProvisionError::Timeout(self.timeout))?
    }

    /// Template copies require the template to have no other sessions, so we
    /// disconnect everything on the parent first. Parent pools are quiesced by
    /// the caller; this kills whatever is left.
    async fn terminate_sessions(&self, database: &str) -> Result<(), ProvisionError> {
        sqlx::query(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE datname = $1 AND pid <> pg_backend_pid()",
        )
        .bind(database)
        .execute(&self.admin_pool)
        .await?;
        Ok(())
    }

    async fn create_from_template(&self, target: &str, template: &str) -> Result<(), ProvisionError> {
        self.terminate_sessions(template).await?;
        // Identifiers come from our own slugs; quoted anyway.
        let stmt = format!("CREATE DATABASE \"{target}\" TEMPLATE \"{template}\"");
        sqlx::query(&stmt).execute(&self.admin_pool).await?;
        Ok(())
    }

    async fn drop_database(&self, database: &str) -> Result<(), ProvisionError> {
        let stmt = format!("DROP DATABASE IF EXISTS \"{database}\" WITH (FORCE)");
        sqlx::query(&stmt).execute(&self.admin_pool).await?;
        Ok(())
    }

    /// Empty every user table in the target database, leaving schema intact.
    async fn truncate_user_tables(&self, database: &str) -> Result<(), ProvisionError> {
        let mut conn = self.connect_options.clone().database(database).connect().await?;
        sqlx::query(
            r#"DO $$
               DECLARE stmt text;
               BEGIN
                   SELECT 'TRUNCATE TABLE ' || string_agg(format('%I.%I', schemaname, tablename), ', ')
                          || ' RESTART IDENTITY CASCADE'
                   INTO stmt
                   FROM pg_tables
                   WHERE schemaname NOT IN ('pg_catalog', 'information_schema');
                   IF stmt IS NOT NULL THEN EXECUTE stmt; END IF;
               END $$"#,
        )
        .execute(&mut conn)
        .await?;
        conn.close().await?;
        Ok(())
    }

    async fn build(&self, branch: &Branch, parent: &Branch) -> Result<(), ProvisionError> {
        let target = self.database_name(&branch.slug);
        let template = self.database_name(&parent.slug);
        self.create_from_template(&target, &template).await?;
        if branch.data_clone_mode == DataCloneMode::SchemaOnly {
            self.truncate_user_tables(&target).await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Provisioner for PgProvisioner {
    async fn provision(&self, branch: &Branch, parent: &Branch) -> Result<(), ProvisionError> {
        info!(
            slug = %branch.slug,
            parent = %parent.slug,
            mode = %branch.data_clone_mode,
            "provisioning branch database"
        );
        self.bounded(self.build(branch, parent)).await
    }

    async fn reset(&self, branch: &Branch, parent: &Branch) -> Result<(), ProvisionError> {
        info!(slug = %branch.slug, parent = %parent.slug, "resetting branch database");
        self.bounded(async {
            let target = self.database_name(&branch.slug);
            self.terminate_sessions(&target).await?;
            self.drop_database(&target).await?;
            self.build(branch, parent).await
        })
        .await
    }

    async fn teardown(&self, branch: &Branch) -> Result<(), ProvisionError> {
        let target = self.database_name(&branch.slug);
        info!(slug = %branch.slug, database = %target, "dropping branch database");
        let result = self.bounded(self.drop_database(&target)).await;
        if let Err(err) = &result {
            warn!(slug = %branch.slug, error = %err, "branch database teardown failed");
        }
        result
    }

    fn database_name(&self, slug: &str) -> String {
        format!("{}{}", self.database_prefix, slug.replace('-', "_"))
    }
}

pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// Records provisioning calls and optionally fails them, for lifecycle
    /// tests that must not need a live cluster.
    #[derive(Default)]
    pub struct MockProvisioner {
        pub calls: Mutex<Vec<String>>,
        pub fail_provision: std::sync::atomic::AtomicBool,
        pub fail_reset: std::sync::atomic::AtomicBool,
        pub fail_teardown: std::sync::atomic::AtomicBool,
    }

    impl MockProvisioner {
        pub fn new() -> Self {
            Self::default()
        }

        fn record(&self, call: String) {
            match self.calls.lock() {
                Ok(mut calls) => calls.push(call),
                Err(poisoned) => poisoned.into_inner().push(call),
            }
        }

        fn should_fail(&self, flag: &std::sync::atomic::AtomicBool) -> Result<(), ProvisionError> {
            if flag.load(std::sync::atomic::Ordering::SeqCst) {
                Err(ProvisionError::Timeout(Duration::from_secs(0)))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait::async_trait]
    impl Provisioner for MockProvisioner {
        async fn provision(&self, branch: &Branch, parent: &Branch) -> Result<(), ProvisionError> {
            self.record(format!("provision {} from {}", branch.slug, parent.slug));
            self.should_fail(&self.fail_provision)
        }

        async fn reset(&self, branch: &Branch, parent: &Branch) -> Result<(), ProvisionError> {
            self.record(format!("reset {} from {}", branch.slug, parent.slug));
            self.should_fail(&self.fail_reset)
        }

        async fn teardown(&self, branch: &Branch) -> Result<(), ProvisionError> {
            self.record(format!("teardown {}", branch.slug));
            self.should_fail(&self.fail_teardown)
        }

        fn database_name(&self, slug: &str) -> String {
            format!("test_{}", slug.replace('-', "_"))
        }
    }
}

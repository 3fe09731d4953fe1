//! Postgres backend for the pool router: opens one physical connection per
//! acquire against the branch's own database.

use super::{BranchBackend, PoolError};
use crate::store::Branch;
use anyhow::Context;
use sqlx::ConnectOptions;
use sqlx::postgres::{PgConnectOptions, PgConnection};

pub struct PgBackend {
    connect_options: PgConnectOptions,
    database_prefix: String,
}

impl PgBackend {
    pub fn new(connect_options: PgConnectOptions, database_prefix: String) -> Self {
        Self {
            connect_options,
            database_prefix,
        }
    }

    fn database_name(&self, slug: &str) -> String {
        format!("{}{}", self.database_prefix, slug.replace('-', "_"))
    }
}

#[async_trait::async_trait]
impl BranchBackend for PgBackend {
    type Conn = PgConnection;

    async fn connect(&self, branch: &Branch) -> Result<PgConnection, PoolError> {
        let database = self.database_name(&branch.slug);
        let conn = self
            .connect_options
            .clone()
            .database(&database)
            .connect()
            .await
            .with_context(|| format!("connecting to branch database {database}"))?;
        Ok(conn)
    }
}

/// Backend for the in-memory storage mode: connections are tokens, so budget
/// and routing semantics still apply without a database cluster.
#[derive(Debug, Default)]
pub struct MemoryBackend;

#[async_trait::async_trait]
impl BranchBackend for MemoryBackend {
    type Conn = ();

    async fn connect(&self, _branch: &Branch) -> Result<(), PoolError> {
        Ok(())
    }
}

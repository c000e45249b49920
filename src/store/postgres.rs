//! PostgreSQL-backed [`ClientStore`] (spec.md §4.B, §6).
//!
//! Grounded in `storage.c`'s hand-rolled libpq pool and exact query text,
//! re-expressed over `tokio-postgres` with `UPDATE ... RETURNING` instead of
//! a fetch-then-update pair, and pooled sessions instead of a raw
//! `PGconn` freelist.

use async_trait::async_trait;
use tokio_postgres::{Client, Config, NoTls};
use tracing::{error, warn};

use crate::pool::Pool;
use crate::store::{ClientStore, Scores, StoreError};

const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS nnbc_clients (
    addr        TEXT PRIMARY KEY,
    t1_score    DOUBLE PRECISION NOT NULL,
    t2_score    DOUBLE PRECISION NOT NULL,
    t2_access_multiplier DOUBLE PRECISION NOT NULL,
    t2_blocked  BOOLEAN NOT NULL DEFAULT false,
    misbehaviors BIGINT NOT NULL DEFAULT 0,
    connections BIGINT NOT NULL DEFAULT 0,
    accesses    BIGINT NOT NULL DEFAULT 1
)";

/// Connection parameters for the backing database (spec.md §6).
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub dbname: String,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
}

pub struct PostgresStore {
    pool: Pool<Client>,
    config: PostgresConfig,
}

impl PostgresStore {
    /// Connects once to create the schema, then returns a store backed by a
    /// pool of up to `pool_capacity` sessions (spec.md §4.C; `N = 64` by
    /// default per the original).
    pub async fn connect(
        config: PostgresConfig,
        pool_capacity: usize,
    ) -> Result<Self, StoreError> {
        let client = open_session(&config).await.ok_or_else(|| {
            StoreError::Backend("initial connection failed".into())
        })?;
        client
            .batch_execute(SCHEMA)
            .await
            .map_err(|e| StoreError::Backend(Box::new(e)))?;

        Ok(Self {
            pool: Pool::new(pool_capacity),
            config,
        })
    }

    /// Current `(allocated, idle)` session counts, for periodic gauge
    /// reporting.
    pub fn pool_stats(&self) -> (usize, usize) {
        (self.pool.allocated(), self.pool.idle())
    }

    async fn acquire(&self) -> Result<crate::pool::Session<Client>, StoreError> {
        let config = self.config.clone();
        self.pool
            .acquire(move || {
                let config = config.clone();
                async move { open_session(&config).await }
            })
            .await
            .ok_or_else(|| StoreError::Backend("no database session available".into()))
    }

    async fn query_returning_scores(
        &self,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> Result<Scores, StoreError> {
        let session = self.acquire().await?;
        let rows = session
            .query(sql, params)
            .await
            .map_err(|e| StoreError::Backend(Box::new(e)))?;

        match rows.as_slice() {
            [row] => Ok(Scores {
                t1: row.get("t1_score"),
                t2: row.get("t2_score"),
            }),
            [] => Err(StoreError::NotFound),
            _ => {
                error!(rows = rows.len(), "update touched more than one row");
                Err(StoreError::Backend(
                    "update unexpectedly touched multiple rows".into(),
                ))
            }
        }
    }
}

#[async_trait]
impl ClientStore for PostgresStore {
    async fn get_scores(&self, addr: &str, t2_threshold: f64) -> Result<Scores, StoreError> {
        self.query_returning_scores(
            "UPDATE nnbc_clients \
             SET accesses = accesses + 1, \
                 t2_blocked = t2_blocked OR t2_score < $2 \
             WHERE addr = $1 \
             RETURNING t1_score, t2_score",
            &[&addr, &t2_threshold],
        )
        .await
    }

    async fn add_to_misbehavior(&self, addr: &str, amount: i64) -> Result<Scores, StoreError> {
        self.query_returning_scores(
            "UPDATE nnbc_clients SET misbehaviors = misbehaviors + $2 \
             WHERE addr = $1 RETURNING t1_score, t2_score",
            &[&addr, &amount],
        )
        .await
    }

    async fn increment_connections(&self, addr: &str) -> Result<Scores, StoreError> {
        self.query_returning_scores(
            "UPDATE nnbc_clients SET connections = connections + 1 \
             WHERE addr = $1 RETURNING t1_score, t2_score",
            &[&addr],
        )
        .await
    }

    async fn decrement_connections(&self, addr: &str) -> Result<Scores, StoreError> {
        self.query_returning_scores(
            "UPDATE nnbc_clients SET connections = \
                 (CASE WHEN connections > 0 THEN connections - 1 ELSE 0 END) \
             WHERE addr = $1 RETURNING t1_score, t2_score",
            &[&addr],
        )
        .await
    }

    async fn clear_connections(&self) -> Result<(), StoreError> {
        let session = self.acquire().await?;
        session
            .execute("UPDATE nnbc_clients SET connections = 0", &[])
            .await
            .map_err(|e| StoreError::Backend(Box::new(e)))?;
        Ok(())
    }

    async fn initialize_new_client(
        &self,
        addr: &str,
        t1: f64,
        t2: f64,
        t2_access_multiplier: f64,
    ) -> Result<(), StoreError> {
        let session = self.acquire().await?;
        session
            .execute(
                "INSERT INTO nnbc_clients \
                 (addr, t1_score, t2_score, t2_access_multiplier, t2_blocked, \
                  misbehaviors, connections, accesses) \
                 VALUES ($1, $2, $3, $4, false, 0, 1, 1) \
                 ON CONFLICT (addr) DO NOTHING",
                &[&addr, &t1, &t2, &t2_access_multiplier],
            )
            .await
            .map_err(|e| StoreError::Backend(Box::new(e)))?;
        Ok(())
    }
}

async fn open_session(config: &PostgresConfig) -> Option<Client> {
    let mut pg_config = Config::new();
    pg_config
        .host(&config.host)
        .port(config.port)
        .dbname(&config.dbname)
        .user(&config.user)
        .password(&config.password);

    match pg_config.connect(NoTls).await {
        Ok((client, connection)) => {
            tokio::spawn(async move {
                if let Err(err) = connection.await {
                    warn!(error = %err, "postgres connection terminated");
                }
            });
            Some(client)
        }
        Err(err) => {
            error!(error = %err, "failed to open postgres session");
            None
        }
    }
}

//! Database persistence
//!
//! Stores live in memory. When a database is configured every record is
//! written through to Postgres as a JSONB document and reloaded at startup.

use crate::action::GovernableAction;
use crate::community::{Community, CommunityPlatform, CommunityUser};
use crate::config::DatabaseConfig;
use crate::error::AppError;
use crate::policy::Policy;
use crate::proposal::{BooleanVote, NumberVote, Proposal};
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use postgres_types::Json;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Document tables, one per record type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Communities,
    CommunityPlatforms,
    CommunityUsers,
    Actions,
    Policies,
    Proposals,
    BooleanVotes,
    NumberVotes,
}

impl Table {
    pub const ALL: [Table; 8] = [
        Table::Communities,
        Table::CommunityPlatforms,
        Table::CommunityUsers,
        Table::Actions,
        Table::Policies,
        Table::Proposals,
        Table::BooleanVotes,
        Table::NumberVotes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Communities => "communities",
            Table::CommunityPlatforms => "community_platforms",
            Table::CommunityUsers => "community_users",
            Table::Actions => "governable_actions",
            Table::Policies => "policies",
            Table::Proposals => "proposals",
            Table::BooleanVotes => "boolean_votes",
            Table::NumberVotes => "number_votes",
        }
    }
}

/// Everything persisted, as loaded at startup
#[derive(Debug, Default)]
pub struct Snapshot {
    pub communities: Vec<Community>,
    pub platforms: Vec<CommunityPlatform>,
    pub users: Vec<CommunityUser>,
    pub actions: Vec<GovernableAction>,
    pub policies: Vec<Policy>,
    pub proposals: Vec<Proposal>,
    pub boolean_votes: Vec<BooleanVote>,
    pub number_votes: Vec<NumberVote>,
}

/// Postgres document store
#[derive(Clone)]
pub struct Persistence {
    pool: Pool,
}

impl Persistence {
    /// Create the pool and verify the connection
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = create_pool(config)?;
        let client = pool.get().await?;
        client.query_one("SELECT 1", &[]).await?;
        info!(
            "Database connection established ({}:{}/{}, TLS: {})",
            config.host, config.port, config.database, config.require_tls
        );
        Ok(Self { pool })
    }

    /// Create the document tables if they don't exist
    pub async fn ensure_schema(&self) -> Result<(), AppError> {
        let client = self.pool.get().await?;
        for table in Table::ALL {
            client
                .execute(
                    &format!(
                        "CREATE TABLE IF NOT EXISTS {} (
                            id UUID PRIMARY KEY,
                            data JSONB NOT NULL,
                            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
                        )",
                        table.as_str()
                    ),
                    &[],
                )
                .await?;
        }
        info!("Database tables initialized");
        Ok(())
    }

    pub async fn upsert<T: Serialize>(&self, table: Table, id: Uuid, value: &T) -> Result<(), AppError> {
        let data = serde_json::to_value(value)
            .map_err(|e| AppError::Internal(format!("Failed to serialize record: {}", e)))?;
        let client = self.pool.get().await?;
        client
            .execute(
                &format!(
                    "INSERT INTO {} (id, data, updated_at) VALUES ($1, $2, now())
                     ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data, updated_at = now()",
                    table.as_str()
                ),
                &[&id, &Json(data)],
            )
            .await?;
        debug!("Persisted {} {}", table.as_str(), id);
        Ok(())
    }

    pub async fn delete(&self, table: Table, id: Uuid) -> Result<(), AppError> {
        let client = self.pool.get().await?;
        client
            .execute(&format!("DELETE FROM {} WHERE id = $1", table.as_str()), &[&id])
            .await?;
        Ok(())
    }

    /// Load every record of a table. Rows that no longer deserialize are skipped.
    pub async fn load<T: DeserializeOwned>(&self, table: Table) -> Result<Vec<T>, AppError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(&format!("SELECT id, data FROM {}", table.as_str()), &[])
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let id: Uuid = row.get(0);
            let Json(data): Json<Value> = row.get(1);
            match serde_json::from_value(data) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable {} row {}: {}", table.as_str(), id, e),
            }
        }
        Ok(records)
    }

    pub async fn load_snapshot(&self) -> Result<Snapshot, AppError> {
        let snapshot = Snapshot {
            communities: self.load(Table::Communities).await?,
            platforms: self.load(Table::CommunityPlatforms).await?,
            users: self.load(Table::CommunityUsers).await?,
            actions: self.load(Table::Actions).await?,
            policies: self.load(Table::Policies).await?,
            proposals: self.load(Table::Proposals).await?,
            boolean_votes: self.load(Table::BooleanVotes).await?,
            number_votes: self.load(Table::NumberVotes).await?,
        };
        info!(
            "Loaded {} communities, {} policies, {} actions, {} proposals",
            snapshot.communities.len(),
            snapshot.policies.len(),
            snapshot.actions.len(),
            snapshot.proposals.len()
        );
        Ok(snapshot)
    }
}

/// Optional write-through target. Failures are logged; memory stays authoritative.
#[derive(Clone, Default)]
pub struct WriteThrough {
    db: Option<Persistence>,
}

impl WriteThrough {
    pub fn new(db: Option<Persistence>) -> Self {
        Self { db }
    }

    pub fn is_enabled(&self) -> bool {
        self.db.is_some()
    }

    pub async fn save<T: Serialize>(&self, table: Table, id: Uuid, value: &T) {
        if let Some(db) = &self.db {
            if let Err(e) = db.upsert(table, id, value).await {
                warn!("Failed to persist {} {}: {}", table.as_str(), id, e);
            }
        }
    }

    pub async fn remove(&self, table: Table, id: Uuid) {
        if let Some(db) = &self.db {
            if let Err(e) = db.delete(table, id).await {
                warn!("Failed to delete {} {}: {}", table.as_str(), id, e);
            }
        }
    }
}

/// Build a connection pool, with rustls when the server requires TLS
fn create_pool(config: &DatabaseConfig) -> Result<Pool, AppError> {
    let mut cfg = Config::new();
    cfg.host = Some(config.host.clone());
    cfg.port = Some(config.port);
    cfg.user = Some(config.user.clone());
    cfg.password = Some(config.password.clone());
    cfg.dbname = Some(config.database.clone());
    cfg.pool = Some(deadpool_postgres::PoolConfig::new(config.max_pool_size));
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    let pool = if config.require_tls {
        let certs = rustls_native_certs::load_native_certs();
        let mut root_store = rustls::RootCertStore::empty();
        for cert in certs.certs {
            root_store.add(cert).ok();
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);
        cfg.create_pool(Some(Runtime::Tokio1), tls)
    } else {
        cfg.create_pool(Some(Runtime::Tokio1), tokio_postgres::NoTls)
    };

    pool.map_err(|e| AppError::Internal(format!("Failed to create pool: {}", e)))
}

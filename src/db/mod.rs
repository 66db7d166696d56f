//! Database connection and repositories
//!
//! SQLite holds two tables: `organization_results` (the audit log) and
//! `smart_matches` (learned corrections). Schemas are created and extended at
//! startup by [`schema_sync`].

pub mod organization_results;
pub mod schema_sync;
pub mod smart_matches;
pub mod sqlite_helpers;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::{info, warn};

pub use organization_results::{
    OrganizationResult, OrganizationResultRepository, OrganizationStatus, OrganizerType, Page,
    PaginatedResults, ResultFilter, result_id_for_path,
};
pub use smart_matches::{
    PaginatedSmartMatches, SmartMatch, SmartMatchFilter, SmartMatchRepository, UpsertSmartMatch,
};

use crate::services::in_progress::InProgressGuard;

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database wrapper from an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the maximum connection pool size from environment or default
    fn get_max_connections() -> u32 {
        std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5)
    }

    /// Open (creating if needed) the SQLite database at `url`.
    ///
    /// Accepts `sqlite://path`, `sqlite:path` or a bare file path.
    pub async fn connect(url: &str) -> Result<Self> {
        let url = if url.starts_with("sqlite:") {
            url.to_string()
        } else {
            format!("sqlite://{}", url)
        };

        let options = SqliteConnectOptions::from_str(&url)
            .with_context(|| format!("Invalid database URL '{}'", url))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(Self::get_max_connections())
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database '{}'", url))?;

        Ok(Self { pool })
    }

    /// Connect, retrying until `timeout` elapses
    pub async fn connect_with_retry(url: &str, timeout: Duration) -> Result<Self> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match Self::connect(url).await {
                Ok(db) => return Ok(db),
                Err(e) if tokio::time::Instant::now() < deadline => {
                    warn!(error = %e, "Database connection failed, retrying in 1s");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get an organization results repository that overlays `in_progress`
    pub fn organization_results(
        &self,
        in_progress: Arc<InProgressGuard>,
    ) -> OrganizationResultRepository {
        OrganizationResultRepository::new(self.pool.clone(), in_progress)
    }

    /// Get a smart match repository
    pub fn smart_matches(&self) -> SmartMatchRepository {
        SmartMatchRepository::new(self.pool.clone())
    }

    /// Create or extend the organizer tables
    pub async fn migrate(&self) -> Result<()> {
        let sync_result = schema_sync::sync_all_schemas(&self.pool).await;
        if !sync_result.tables_created.is_empty() {
            info!(tables = ?sync_result.tables_created, "Created tables");
        }
        if !sync_result.columns_added.is_empty() {
            info!(columns = ?sync_result.columns_added, "Added columns");
        }
        if let Some(first) = sync_result.errors.first() {
            for err in &sync_result.errors {
                warn!(error = %err, "Schema sync error");
            }
            anyhow::bail!("Schema sync failed: {}", first);
        }
        Ok(())
    }
}

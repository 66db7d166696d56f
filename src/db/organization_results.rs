//! Organization results database operations
//!
//! One row per source path: every processing attempt for a path overwrites the
//! previous row (the id is derived from the path). `is_in_progress` is never
//! stored; it is overlaid from the [`InProgressGuard`] on every read.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::db::schema_sync::{ColumnDef, TableSchema};
use crate::db::sqlite_helpers::{
    datetime_to_str, int_to_u32, like_contains, now_iso8601, placeholders, str_to_datetime,
    u32_to_int,
};
use crate::services::filename_parser::ParsedTokens;
use crate::services::in_progress::InProgressGuard;

/// Stable identity for a source path: lowercase hex MD5 of the path string.
///
/// Reprocessing the same path always lands on the same row and the same guard key.
pub fn result_id_for_path(path: &str) -> String {
    format!("{:x}", md5::compute(path.as_bytes()))
}

/// Which organizer handles a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrganizerType {
    Episode,
    Movie,
}

impl OrganizerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Episode => "episode",
            Self::Movie => "movie",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "episode" | "tv" => Some(Self::Episode),
            "movie" | "movies" => Some(Self::Movie),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrganizerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one processing attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrganizationStatus {
    Success,
    Failure,
    SkippedExisting,
    /// The only non-terminal state: waits for a correction
    NeedsCorrection,
}

impl OrganizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::SkippedExisting => "skipped_existing",
            Self::NeedsCorrection => "needs_correction",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            "skipped_existing" | "skippedexisting" => Some(Self::SkippedExisting),
            "needs_correction" | "needscorrection" => Some(Self::NeedsCorrection),
            _ => None,
        }
    }

    /// Completed results are removed by "clear completed"
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Success | Self::SkippedExisting)
    }

    /// Whether a correction may be submitted for a result in this state
    pub fn accepts_correction(&self) -> bool {
        matches!(self, Self::NeedsCorrection | Self::Failure)
    }

    /// Whether a manual retry may re-run a result in this state. `success` is final.
    pub fn accepts_retry(&self) -> bool {
        !matches!(self, Self::Success)
    }
}

impl std::fmt::Display for OrganizationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit record for one source path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationResult {
    pub id: String,
    pub original_path: String,
    pub original_file_name: String,
    pub target_path: Option<String>,
    pub file_size: u64,
    pub organizer_type: OrganizerType,
    pub status: OrganizationStatus,
    pub status_message: Option<String>,
    pub extracted_name: Option<String>,
    pub extracted_year: Option<i32>,
    pub extracted_season: Option<u32>,
    pub extracted_episode: Option<u32>,
    pub extracted_ending_episode: Option<u32>,
    pub duplicate_of: Option<String>,
    /// Derived from the in-progress guard at read time
    #[serde(default)]
    pub is_in_progress: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrganizationResult {
    /// Fresh record for `original_path`. Starts as a failure without a message;
    /// the organizer always moves it to a final state before it is saved.
    pub fn new(original_path: &str, organizer_type: OrganizerType) -> Self {
        let now = Utc::now();
        let original_file_name = Path::new(original_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(original_path)
            .to_string();

        Self {
            id: result_id_for_path(original_path),
            original_path: original_path.to_string(),
            original_file_name,
            target_path: None,
            file_size: 0,
            organizer_type,
            status: OrganizationStatus::Failure,
            status_message: None,
            extracted_name: None,
            extracted_year: None,
            extracted_season: None,
            extracted_episode: None,
            extracted_ending_episode: None,
            duplicate_of: None,
            is_in_progress: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Copy the best-effort parse into the record
    pub fn with_tokens(mut self, tokens: &ParsedTokens) -> Self {
        self.extracted_name = tokens.name.clone();
        self.extracted_year = tokens.year;
        self.extracted_season = tokens.season;
        self.extracted_episode = tokens.episode;
        self.extracted_ending_episode = tokens.ending_episode;
        self
    }

    pub fn with_file_size(mut self, size: u64) -> Self {
        self.file_size = size;
        self
    }

    pub fn fail(mut self, message: impl Into<String>) -> Self {
        self.status = OrganizationStatus::Failure;
        self.status_message = Some(message.into());
        self
    }

    pub fn needs_correction(mut self, message: impl Into<String>) -> Self {
        self.status = OrganizationStatus::NeedsCorrection;
        self.status_message = Some(message.into());
        self
    }

    pub fn skipped(mut self, duplicate_of: &Path, message: impl Into<String>) -> Self {
        self.status = OrganizationStatus::SkippedExisting;
        self.duplicate_of = Some(duplicate_of.to_string_lossy().to_string());
        self.target_path = Some(duplicate_of.to_string_lossy().to_string());
        self.status_message = Some(message.into());
        self
    }

    /// A different file already occupies the destination and may not be replaced
    pub fn conflict(mut self, target_path: &Path, message: impl Into<String>) -> Self {
        self.status = OrganizationStatus::SkippedExisting;
        self.duplicate_of = None;
        self.target_path = Some(target_path.to_string_lossy().to_string());
        self.status_message = Some(message.into());
        self
    }

    pub fn succeed(mut self, target_path: &Path) -> Self {
        self.status = OrganizationStatus::Success;
        self.target_path = Some(target_path.to_string_lossy().to_string());
        self.status_message = None;
        self
    }
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for OrganizationResult {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let type_str: String = row.try_get("organizer_type")?;
        let status_str: String = row.try_get("status")?;
        let created_str: String = row.try_get("created_at")?;
        let updated_str: String = row.try_get("updated_at")?;
        let file_size: i64 = row.try_get("file_size")?;
        let extracted_year: Option<i64> = row.try_get("extracted_year")?;

        let organizer_type = OrganizerType::parse(&type_str).ok_or_else(|| {
            sqlx::Error::Decode(format!("Unknown organizer type '{}'", type_str).into())
        })?;
        let status = OrganizationStatus::parse(&status_str).ok_or_else(|| {
            sqlx::Error::Decode(format!("Unknown organization status '{}'", status_str).into())
        })?;

        Ok(Self {
            id: row.try_get("id")?,
            original_path: row.try_get("original_path")?,
            original_file_name: row.try_get("original_file_name")?,
            target_path: row.try_get("target_path")?,
            file_size: u64::try_from(file_size).unwrap_or(0),
            organizer_type,
            status,
            status_message: row.try_get("status_message")?,
            extracted_name: row.try_get("extracted_name")?,
            extracted_year: extracted_year.and_then(|y| i32::try_from(y).ok()),
            extracted_season: int_to_u32(row.try_get("extracted_season")?),
            extracted_episode: int_to_u32(row.try_get("extracted_episode")?),
            extracted_ending_episode: int_to_u32(row.try_get("extracted_ending_episode")?),
            duplicate_of: row.try_get("duplicate_of")?,
            is_in_progress: false,
            created_at: str_to_datetime(&created_str).map_err(|e| sqlx::Error::Decode(e.into()))?,
            updated_at: str_to_datetime(&updated_str).map_err(|e| sqlx::Error::Decode(e.into()))?,
        })
    }
}

/// Table definition for `organization_results`
pub struct OrganizationResultsTable;

impl TableSchema for OrganizationResultsTable {
    const TABLE_NAME: &'static str = "organization_results";

    fn columns() -> &'static [ColumnDef] {
        const fn col(
            name: &'static str,
            sql_type: &'static str,
            nullable: bool,
            default: Option<&'static str>,
        ) -> ColumnDef {
            ColumnDef {
                name,
                sql_type,
                nullable,
                is_primary_key: false,
                default,
            }
        }

        static COLUMNS: &[ColumnDef] = &[
            ColumnDef {
                name: "id",
                sql_type: "TEXT",
                nullable: false,
                is_primary_key: true,
                default: None,
            },
            col("original_path", "TEXT", false, None),
            col("original_file_name", "TEXT", false, Some("''")),
            col("target_path", "TEXT", true, None),
            col("file_size", "INTEGER", false, Some("0")),
            col("organizer_type", "TEXT", false, Some("'episode'")),
            col("status", "TEXT", false, Some("'failure'")),
            col("status_message", "TEXT", true, None),
            col("extracted_name", "TEXT", true, None),
            col("extracted_year", "INTEGER", true, None),
            col("extracted_season", "INTEGER", true, None),
            col("extracted_episode", "INTEGER", true, None),
            col("extracted_ending_episode", "INTEGER", true, None),
            col("duplicate_of", "TEXT", true, None),
            col("created_at", "TEXT", false, Some("(datetime('now'))")),
            col("updated_at", "TEXT", false, Some("(datetime('now'))")),
        ];
        COLUMNS
    }

    fn indexes() -> &'static [&'static str] {
        &[
            "CREATE INDEX IF NOT EXISTS idx_organization_results_updated_at ON organization_results (updated_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_organization_results_status ON organization_results (status)",
        ]
    }
}

/// Filter options for querying results
#[derive(Debug, Clone, Default)]
pub struct ResultFilter {
    /// Any of these statuses (empty = all)
    pub statuses: Vec<OrganizationStatus>,
    pub organizer_type: Option<OrganizerType>,
    /// Case-insensitive substring of `original_path`
    pub path_contains: Option<String>,
}

/// Pagination window
#[derive(Debug, Clone, Copy, Default)]
pub struct Page {
    pub start_index: i64,
    /// `None` returns everything after `start_index`
    pub limit: Option<i64>,
}

impl Page {
    pub fn new(start_index: i64, limit: i64) -> Self {
        Self {
            start_index,
            limit: Some(limit),
        }
    }
}

/// Result for paginated result queries
#[derive(Debug, Clone, Serialize)]
pub struct PaginatedResults {
    pub items: Vec<OrganizationResult>,
    pub total_count: i64,
    pub has_more: bool,
}

const SELECT_COLUMNS: &str = "id, original_path, original_file_name, target_path, file_size, \
     organizer_type, status, status_message, extracted_name, extracted_year, extracted_season, \
     extracted_episode, extracted_ending_episode, duplicate_of, created_at, updated_at";

/// Repository for organization results
#[derive(Clone)]
pub struct OrganizationResultRepository {
    pool: SqlitePool,
    in_progress: Arc<InProgressGuard>,
}

impl OrganizationResultRepository {
    pub fn new(pool: SqlitePool, in_progress: Arc<InProgressGuard>) -> Self {
        Self { pool, in_progress }
    }

    fn overlay(&self, mut record: OrganizationResult) -> OrganizationResult {
        record.is_in_progress = self.in_progress.is_in_progress(&record.id);
        record
    }

    /// Insert or replace the record for `result.original_path`.
    ///
    /// The id is recomputed from the path, so a stale id on the input cannot
    /// create a second row. `created_at` of an existing row is preserved.
    pub async fn save(&self, result: &OrganizationResult) -> Result<OrganizationResult> {
        if result.status != OrganizationStatus::Success && result.status_message.is_none() {
            bail!(
                "Result for '{}' has status {} but no status message",
                result.original_path,
                result.status
            );
        }

        let id = result_id_for_path(&result.original_path);
        let now = now_iso8601();
        let sql = format!(
            r#"
            INSERT INTO organization_results (
                id, original_path, original_file_name, target_path, file_size,
                organizer_type, status, status_message,
                extracted_name, extracted_year, extracted_season, extracted_episode,
                extracted_ending_episode, duplicate_of, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            ON CONFLICT(id) DO UPDATE SET
                original_path = excluded.original_path,
                original_file_name = excluded.original_file_name,
                target_path = excluded.target_path,
                file_size = excluded.file_size,
                organizer_type = excluded.organizer_type,
                status = excluded.status,
                status_message = excluded.status_message,
                extracted_name = excluded.extracted_name,
                extracted_year = excluded.extracted_year,
                extracted_season = excluded.extracted_season,
                extracted_episode = excluded.extracted_episode,
                extracted_ending_episode = excluded.extracted_ending_episode,
                duplicate_of = excluded.duplicate_of,
                updated_at = excluded.updated_at
            RETURNING {SELECT_COLUMNS}
            "#
        );

        let record = sqlx::query_as::<_, OrganizationResult>(&sql)
            .bind(&id)
            .bind(&result.original_path)
            .bind(&result.original_file_name)
            .bind(&result.target_path)
            .bind(i64::try_from(result.file_size).unwrap_or(i64::MAX))
            .bind(result.organizer_type.as_str())
            .bind(result.status.as_str())
            .bind(&result.status_message)
            .bind(&result.extracted_name)
            .bind(result.extracted_year.map(i64::from))
            .bind(u32_to_int(result.extracted_season))
            .bind(u32_to_int(result.extracted_episode))
            .bind(u32_to_int(result.extracted_ending_episode))
            .bind(&result.duplicate_of)
            .bind(datetime_to_str(result.created_at))
            .bind(&now)
            .fetch_one(&self.pool)
            .await?;

        Ok(self.overlay(record))
    }

    /// Get a result by ID
    pub async fn get(&self, id: &str) -> Result<Option<OrganizationResult>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM organization_results WHERE id = ?1");
        let record = sqlx::query_as::<_, OrganizationResult>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record.map(|r| self.overlay(r)))
    }

    /// Get the result for a source path (looked up by its derived id)
    pub async fn get_by_original_path(&self, path: &str) -> Result<Option<OrganizationResult>> {
        self.get(&result_id_for_path(path)).await
    }

    /// Query results with filtering and pagination, most recent first
    pub async fn list(&self, filter: &ResultFilter, page: Page) -> Result<PaginatedResults> {
        let mut conditions = Vec::new();

        if !filter.statuses.is_empty() {
            conditions.push(format!(
                "status IN ({})",
                placeholders(filter.statuses.len())
            ));
        }
        if filter.organizer_type.is_some() {
            conditions.push("organizer_type = ?".to_string());
        }
        if filter.path_contains.is_some() {
            conditions.push("original_path LIKE ? ESCAPE '\\'".to_string());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!(
            "SELECT COUNT(*) FROM organization_results {}",
            where_clause
        );
        let data_sql = format!(
            "SELECT {SELECT_COLUMNS} FROM organization_results {} \
             ORDER BY updated_at DESC, id ASC LIMIT ? OFFSET ?",
            where_clause
        );

        let path_pattern = filter.path_contains.as_deref().map(like_contains);

        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        for status in &filter.statuses {
            count_query = count_query.bind(status.as_str());
        }
        if let Some(kind) = filter.organizer_type {
            count_query = count_query.bind(kind.as_str());
        }
        if let Some(ref pattern) = path_pattern {
            count_query = count_query.bind(pattern.clone());
        }
        let total_count = count_query.fetch_one(&self.pool).await?;

        let mut data_query = sqlx::query_as::<_, OrganizationResult>(&data_sql);
        for status in &filter.statuses {
            data_query = data_query.bind(status.as_str());
        }
        if let Some(kind) = filter.organizer_type {
            data_query = data_query.bind(kind.as_str());
        }
        if let Some(ref pattern) = path_pattern {
            data_query = data_query.bind(pattern.clone());
        }
        // SQLite treats a negative LIMIT as "no limit"
        let offset = page.start_index.max(0);
        data_query = data_query.bind(page.limit.unwrap_or(-1)).bind(offset);

        let items: Vec<OrganizationResult> = data_query
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|r| self.overlay(r))
            .collect();
        let has_more = (offset + items.len() as i64) < total_count;

        Ok(PaginatedResults {
            items,
            total_count,
            has_more,
        })
    }

    /// Delete a single result
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM organization_results WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete every result ("clear log")
    pub async fn delete_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM organization_results")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Delete successful and skipped results, keeping failures and pending corrections
    pub async fn delete_completed(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM organization_results WHERE status IN (?1, ?2)")
            .bind(OrganizationStatus::Success.as_str())
            .bind(OrganizationStatus::SkippedExisting.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

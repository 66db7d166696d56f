//! Smart match database operations
//!
//! Learned corrections: each row maps a set of normalized filename tokens to one
//! target library item (series or movie). Rows are only written when a user
//! submits a correction.

use std::collections::BTreeSet;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::debug;

use crate::db::organization_results::OrganizerType;
use crate::db::schema_sync::{ColumnDef, TableSchema};
use crate::db::sqlite_helpers::{
    json_array_overlaps_sql, json_to_set, like_contains, now_iso8601, set_to_json,
    str_to_datetime,
};

/// Normalize a raw filename token for storage and lookup.
///
/// Lowercase, trimmed, inner whitespace collapsed. Empty tokens are dropped.
pub fn normalize_match_string(raw: &str) -> Option<String> {
    let normalized = raw
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// A learned correction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartMatch {
    /// Identity of the target library item
    pub id: String,
    pub item_name: String,
    pub organizer_type: OrganizerType,
    pub match_strings: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for SmartMatch {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let type_str: String = row.try_get("organizer_type")?;
        let strings_json: String = row.try_get("match_strings")?;
        let created_str: String = row.try_get("created_at")?;
        let updated_str: String = row.try_get("updated_at")?;

        let organizer_type = OrganizerType::parse(&type_str).ok_or_else(|| {
            sqlx::Error::Decode(format!("Unknown organizer type '{}'", type_str).into())
        })?;

        Ok(Self {
            id: row.try_get("id")?,
            item_name: row.try_get("item_name")?,
            organizer_type,
            match_strings: json_to_set(&strings_json),
            created_at: str_to_datetime(&created_str).map_err(|e| sqlx::Error::Decode(e.into()))?,
            updated_at: str_to_datetime(&updated_str).map_err(|e| sqlx::Error::Decode(e.into()))?,
        })
    }
}

/// Input for learning (or extending) a smart match
#[derive(Debug, Clone)]
pub struct UpsertSmartMatch {
    pub id: String,
    pub item_name: String,
    pub organizer_type: OrganizerType,
    /// Raw tokens; normalized and de-duplicated on save
    pub match_strings: Vec<String>,
}

/// Filter options for listing smart matches
#[derive(Debug, Clone, Default)]
pub struct SmartMatchFilter {
    pub organizer_type: Option<OrganizerType>,
    /// Case-insensitive substring of `item_name`
    pub name_contains: Option<String>,
}

/// Result for paginated smart match queries
#[derive(Debug, Clone, Serialize)]
pub struct PaginatedSmartMatches {
    pub items: Vec<SmartMatch>,
    pub total_count: i64,
    pub has_more: bool,
}

/// Table definition for `smart_matches`
pub struct SmartMatchesTable;

impl TableSchema for SmartMatchesTable {
    const TABLE_NAME: &'static str = "smart_matches";

    fn columns() -> &'static [ColumnDef] {
        static COLUMNS: &[ColumnDef] = &[
            ColumnDef {
                name: "id",
                sql_type: "TEXT",
                nullable: false,
                is_primary_key: true,
                default: None,
            },
            ColumnDef {
                name: "item_name",
                sql_type: "TEXT",
                nullable: false,
                is_primary_key: false,
                default: Some("''"),
            },
            ColumnDef {
                name: "organizer_type",
                sql_type: "TEXT",
                nullable: false,
                is_primary_key: false,
                default: Some("'episode'"),
            },
            ColumnDef {
                name: "match_strings",
                sql_type: "TEXT",
                nullable: false,
                is_primary_key: false,
                default: Some("'[]'"),
            },
            ColumnDef {
                name: "created_at",
                sql_type: "TEXT",
                nullable: false,
                is_primary_key: false,
                default: Some("(datetime('now'))"),
            },
            ColumnDef {
                name: "updated_at",
                sql_type: "TEXT",
                nullable: false,
                is_primary_key: false,
                default: Some("(datetime('now'))"),
            },
        ];
        COLUMNS
    }
}

const SELECT_COLUMNS: &str = "id, item_name, organizer_type, match_strings, created_at, updated_at";

/// Repository for smart matches
#[derive(Clone)]
pub struct SmartMatchRepository {
    pool: SqlitePool,
}

impl SmartMatchRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Learn tokens for a target, merging into any existing record for the same id.
    ///
    /// The read-merge-write runs in one transaction that takes the write lock
    /// first, so concurrent merges for the same target cannot drop tokens.
    pub async fn save(&self, input: UpsertSmartMatch) -> Result<SmartMatch> {
        let mut tx = self.pool.begin().await?;

        // Touch the row (or nothing) to upgrade to a write transaction before reading
        sqlx::query("UPDATE smart_matches SET updated_at = updated_at WHERE id = ?1")
            .bind(&input.id)
            .execute(&mut *tx)
            .await?;

        let existing: Option<(String,)> =
            sqlx::query_as("SELECT match_strings FROM smart_matches WHERE id = ?1")
                .bind(&input.id)
                .fetch_optional(&mut *tx)
                .await?;

        let learned: BTreeSet<String> = input
            .match_strings
            .iter()
            .filter_map(|s| normalize_match_string(s))
            .collect();
        let mut match_strings = existing
            .map(|(json,)| json_to_set(&json))
            .unwrap_or_default();
        match_strings.extend(learned.iter().cloned());

        let now = now_iso8601();
        Self::release_tokens(&mut tx, &input.id, input.organizer_type, &learned, &now).await?;

        let sql = format!(
            r#"
            INSERT INTO smart_matches (id, item_name, organizer_type, match_strings, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            ON CONFLICT(id) DO UPDATE SET
                item_name = excluded.item_name,
                organizer_type = excluded.organizer_type,
                match_strings = excluded.match_strings,
                updated_at = excluded.updated_at
            RETURNING {SELECT_COLUMNS}
            "#
        );
        let record = sqlx::query_as::<_, SmartMatch>(&sql)
            .bind(&input.id)
            .bind(&input.item_name)
            .bind(input.organizer_type.as_str())
            .bind(set_to_json(&match_strings))
            .bind(&now)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(record)
    }

    /// Take `tokens` away from every other target of the same type so the newest
    /// correction owns them. Records left without tokens are removed.
    async fn release_tokens(
        tx: &mut Transaction<'_, Sqlite>,
        id: &str,
        organizer_type: OrganizerType,
        tokens: &BTreeSet<String>,
        now: &str,
    ) -> Result<()> {
        if tokens.is_empty() {
            return Ok(());
        }

        let sql = format!(
            "SELECT id, match_strings FROM smart_matches \
             WHERE organizer_type = ? AND id != ? AND {}",
            json_array_overlaps_sql("match_strings", tokens.len())
        );
        let mut query = sqlx::query_as::<_, (String, String)>(&sql)
            .bind(organizer_type.as_str())
            .bind(id);
        for token in tokens {
            query = query.bind(token.clone());
        }
        let others = query.fetch_all(&mut **tx).await?;

        for (other_id, json) in others {
            let remaining: BTreeSet<String> =
                json_to_set(&json).difference(tokens).cloned().collect();
            if remaining.is_empty() {
                sqlx::query("DELETE FROM smart_matches WHERE id = ?1")
                    .bind(&other_id)
                    .execute(&mut **tx)
                    .await?;
            } else {
                sqlx::query(
                    "UPDATE smart_matches SET match_strings = ?2, updated_at = ?3 WHERE id = ?1",
                )
                .bind(&other_id)
                .bind(set_to_json(&remaining))
                .bind(now)
                .execute(&mut **tx)
                .await?;
            }
            debug!(from = %other_id, to = %id, "Moved learned tokens to newer correction");
        }

        Ok(())
    }

    /// Get a smart match by target id
    pub async fn get(&self, id: &str) -> Result<Option<SmartMatch>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM smart_matches WHERE id = ?1");
        let record = sqlx::query_as::<_, SmartMatch>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    /// List smart matches with filtering and pagination, by item name
    pub async fn list(
        &self,
        filter: &SmartMatchFilter,
        start_index: i64,
        limit: Option<i64>,
    ) -> Result<PaginatedSmartMatches> {
        let mut conditions = Vec::new();
        if filter.organizer_type.is_some() {
            conditions.push("organizer_type = ?");
        }
        if filter.name_contains.is_some() {
            conditions.push("item_name LIKE ? ESCAPE '\\'");
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM smart_matches {}", where_clause);
        let data_sql = format!(
            "SELECT {SELECT_COLUMNS} FROM smart_matches {} \
             ORDER BY item_name COLLATE NOCASE ASC, id ASC LIMIT ? OFFSET ?",
            where_clause
        );
        let name_pattern = filter.name_contains.as_deref().map(like_contains);

        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        if let Some(kind) = filter.organizer_type {
            count_query = count_query.bind(kind.as_str());
        }
        if let Some(ref pattern) = name_pattern {
            count_query = count_query.bind(pattern.clone());
        }
        let total_count = count_query.fetch_one(&self.pool).await?;

        let mut data_query = sqlx::query_as::<_, SmartMatch>(&data_sql);
        if let Some(kind) = filter.organizer_type {
            data_query = data_query.bind(kind.as_str());
        }
        if let Some(ref pattern) = name_pattern {
            data_query = data_query.bind(pattern.clone());
        }
        let offset = start_index.max(0);
        let items = data_query
            .bind(limit.unwrap_or(-1))
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        let has_more = (offset + items.len() as i64) < total_count;

        Ok(PaginatedSmartMatches {
            items,
            total_count,
            has_more,
        })
    }

    /// Remove one token from a target. The record is deleted once its set is empty.
    ///
    /// Returns false when the target or token did not exist.
    pub async fn delete_entry(&self, id: &str, match_string: &str) -> Result<bool> {
        let Some(token) = normalize_match_string(match_string) else {
            return Ok(false);
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE smart_matches SET updated_at = updated_at WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let existing: Option<(String,)> =
            sqlx::query_as("SELECT match_strings FROM smart_matches WHERE id = ?1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some((json,)) = existing else {
            return Ok(false);
        };

        let mut match_strings = json_to_set(&json);
        if !match_strings.remove(&token) {
            return Ok(false);
        }

        if match_strings.is_empty() {
            sqlx::query("DELETE FROM smart_matches WHERE id = ?1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        } else {
            sqlx::query("UPDATE smart_matches SET match_strings = ?2, updated_at = ?3 WHERE id = ?1")
                .bind(id)
                .bind(set_to_json(&match_strings))
                .bind(now_iso8601())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Delete a whole smart match record
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM smart_matches WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Find the learned target for a set of tokens.
    ///
    /// `save` keeps each token on one target per type. Should rows written
    /// elsewhere still share a token, the most recently updated record wins,
    /// then the smallest `id`.
    pub async fn find_target_for_tokens(
        &self,
        tokens: &[String],
        organizer_type: OrganizerType,
    ) -> Result<Option<SmartMatch>> {
        let normalized: BTreeSet<String> = tokens
            .iter()
            .filter_map(|t| normalize_match_string(t))
            .collect();
        if normalized.is_empty() {
            return Ok(None);
        }

        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM smart_matches \
             WHERE organizer_type = ? AND {} \
             ORDER BY updated_at DESC, id ASC LIMIT 1",
            json_array_overlaps_sql("match_strings", normalized.len())
        );

        let mut query = sqlx::query_as::<_, SmartMatch>(&sql).bind(organizer_type.as_str());
        for token in &normalized {
            query = query.bind(token.clone());
        }

        Ok(query.fetch_optional(&self.pool).await?)
    }
}

//! Application configuration management
//!
//! All settings come from environment variables (a `.env` file is loaded by
//! `main` through dotenvy).
//!
//! | variable | default |
//! |---|---|
//! | `DATABASE_PATH` / `DATABASE_URL` | `<data dir>/librarian-organizer/organizer.db` |
//! | `TV_WATCH_PATHS`, `MOVIE_WATCH_PATHS` | none (comma separated) |
//! | `TV_LIBRARY_PATH`, `MOVIE_LIBRARY_PATH` | none |
//! | `ORGANIZE_TRANSFER_MODE` | `move` (`move` or `copy`; other values fail to load) |
//! | `SKIP_DUPLICATES` | `true` |
//! | `DELETE_DUPLICATE_SOURCE` | `false` |
//! | `OVERWRITE_EXISTING` | `false` |
//! | `MIN_FILE_SIZE_MB` | `50` |
//! | `DELETE_EMPTY_FOLDERS` | `false` |
//! | `EPISODE_NAMING_PATTERN`, `MOVIE_NAMING_PATTERN` | see `services::naming` |
//! | `SEASON_ZERO_FOLDER` | `Specials` |
//! | `ALLOW_NEW_TARGETS` | `true` |
//! | `LOG_FORMAT` | `pretty` (`json` or `pretty`; other values fail to load) |

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::services::collaborators::{ScanOptions, TransferMode};
use crate::services::logging::LogFormat;
use crate::services::organizer::OrganizeOptions;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database path or `sqlite://` URL
    pub database_url: String,

    /// Download folders scanned for episodes
    pub tv_watch_paths: Vec<PathBuf>,

    /// Download folders scanned for movies
    pub movie_watch_paths: Vec<PathBuf>,

    pub tv_library_path: Option<PathBuf>,
    pub movie_library_path: Option<PathBuf>,

    pub transfer_mode: TransferMode,
    pub skip_duplicates: bool,
    pub delete_duplicate_source: bool,
    pub overwrite_existing: bool,

    /// Files below this size are ignored by scans
    pub min_file_size_mb: u64,

    pub delete_empty_folders: bool,

    pub episode_naming_pattern: Option<String>,
    pub movie_naming_pattern: Option<String>,
    pub season_zero_folder: Option<String>,

    /// Let the folder resolver create targets for names with no library folder
    pub allow_new_targets: bool,

    pub log_format: LogFormat,
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

fn env_path(name: &str) -> Option<PathBuf> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn env_paths(name: &str) -> Vec<PathBuf> {
    env::var(name)
        .map(|v| parse_path_list(&v))
        .unwrap_or_default()
}

/// Parse an optional setting; unset or blank uses `default`, anything else must parse
fn parse_setting<T>(name: &str, value: Option<String>, default: T) -> Result<T>
where
    T: std::str::FromStr<Err = anyhow::Error>,
{
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(default),
        Some(raw) => raw.parse().with_context(|| format!("Invalid {}", name)),
    }
}

/// Split a comma separated path list, dropping empty entries
pub fn parse_path_list(value: &str) -> Vec<PathBuf> {
    value
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .collect()
}

fn default_database_path() -> String {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("./data"))
        .join("librarian-organizer")
        .join("organizer.db")
        .to_string_lossy()
        .to_string()
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_PATH")
            .or_else(|_| env::var("DATABASE_URL"))
            .unwrap_or_else(|_| default_database_path());

        Ok(Self {
            database_url,

            tv_watch_paths: env_paths("TV_WATCH_PATHS"),
            movie_watch_paths: env_paths("MOVIE_WATCH_PATHS"),

            tv_library_path: env_path("TV_LIBRARY_PATH"),
            movie_library_path: env_path("MOVIE_LIBRARY_PATH"),

            transfer_mode: parse_setting(
                "ORGANIZE_TRANSFER_MODE",
                env::var("ORGANIZE_TRANSFER_MODE").ok(),
                TransferMode::Move,
            )?,
            skip_duplicates: env_bool("SKIP_DUPLICATES", true),
            delete_duplicate_source: env_bool("DELETE_DUPLICATE_SOURCE", false),
            overwrite_existing: env_bool("OVERWRITE_EXISTING", false),

            min_file_size_mb: env::var("MIN_FILE_SIZE_MB")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .context("Invalid MIN_FILE_SIZE_MB")?,

            delete_empty_folders: env_bool("DELETE_EMPTY_FOLDERS", false),

            episode_naming_pattern: env::var("EPISODE_NAMING_PATTERN").ok(),
            movie_naming_pattern: env::var("MOVIE_NAMING_PATTERN").ok(),
            season_zero_folder: env::var("SEASON_ZERO_FOLDER").ok(),

            allow_new_targets: env_bool("ALLOW_NEW_TARGETS", true),

            log_format: parse_setting("LOG_FORMAT", env::var("LOG_FORMAT").ok(), LogFormat::Pretty)?,
        })
    }

    pub fn organize_options(&self) -> OrganizeOptions {
        OrganizeOptions {
            tv_library_path: self.tv_library_path.clone(),
            movie_library_path: self.movie_library_path.clone(),
            transfer_mode: self.transfer_mode,
            skip_duplicates: self.skip_duplicates,
            delete_duplicate_source: self.delete_duplicate_source,
            overwrite_existing: self.overwrite_existing,
        }
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            tv_watch_paths: self.tv_watch_paths.clone(),
            movie_watch_paths: self.movie_watch_paths.clone(),
            min_file_size: self.min_file_size_mb * 1024 * 1024,
            delete_empty_folders: self.delete_empty_folders,
        }
    }
}

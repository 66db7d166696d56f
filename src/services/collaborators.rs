//! Collaborator interfaces consumed by the organizers and the engine
//!
//! Everything the engine needs from the outside world (token parsing, provider
//! lookup, destination naming, file I/O, host notification and source
//! enumeration) goes through these traits so tests and hosts can swap them.

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::db::OrganizerType;
use crate::services::filename_parser::ParsedTokens;

/// A library item (series or movie) a file should be placed under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedTarget {
    pub id: String,
    pub name: String,
    pub year: Option<i32>,
    /// Existing library folder for the target, if it already has one
    pub path: Option<PathBuf>,
}

/// How a target was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    Correction,
    SmartMatch,
    Provider,
}

/// Move removes the source after a verified copy; Copy leaves it in place
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    #[default]
    Move,
    Copy,
}

impl std::str::FromStr for TransferMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "move" => Ok(Self::Move),
            "copy" => Ok(Self::Copy),
            other => anyhow::bail!("Unknown transfer mode '{}' (expected move or copy)", other),
        }
    }
}

impl TransferMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Move => "move",
            Self::Copy => "copy",
        }
    }
}

/// A file found by a scan, tagged with the organizer that should handle it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceCandidate {
    pub path: PathBuf,
    pub organizer_type: OrganizerType,
}

/// Where and how a scan looks for new files
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub tv_watch_paths: Vec<PathBuf>,
    pub movie_watch_paths: Vec<PathBuf>,
    /// Files smaller than this (bytes) are ignored
    pub min_file_size: u64,
    /// Remove folders left empty under the watch paths after the scan
    pub delete_empty_folders: bool,
}

impl ScanOptions {
    pub fn watch_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.tv_watch_paths.iter().chain(self.movie_watch_paths.iter())
    }
}

/// Everything a destination builder gets to work with
#[derive(Debug, Clone, Copy)]
pub struct PlacementInput<'a> {
    pub organizer_type: OrganizerType,
    pub library_root: &'a Path,
    pub target: &'a ResolvedTarget,
    pub tokens: &'a ParsedTokens,
    pub source: &'a Path,
}

/// Extracts season/episode or title/year tokens from a path
pub trait TokenParser: Send + Sync {
    fn parse(&self, path: &Path, organizer_type: OrganizerType) -> ParsedTokens;
}

/// Provider/metadata lookup
#[async_trait]
pub trait TargetResolver: Send + Sync {
    /// Best match for parsed tokens, if any
    async fn resolve(
        &self,
        tokens: &ParsedTokens,
        organizer_type: OrganizerType,
    ) -> Result<Option<ResolvedTarget>>;

    /// Look up a known target by identity (corrections and smart matches)
    async fn target_by_id(
        &self,
        id: &str,
        organizer_type: OrganizerType,
    ) -> Result<Option<ResolvedTarget>>;
}

/// Applies the library naming template
pub trait DestinationBuilder: Send + Sync {
    fn build(&self, input: PlacementInput<'_>) -> PathBuf;
}

/// File I/O used by the organizers
#[async_trait]
pub trait FileOps: Send + Sync {
    async fn exists(&self, path: &Path) -> bool;

    async fn file_size(&self, path: &Path) -> Result<u64>;

    /// True when both files have the same size and content
    async fn compare_content(&self, a: &Path, b: &Path) -> Result<bool>;

    /// Move or copy `source` to `destination`, replacing any file there.
    /// Must not leave a partial destination behind on failure.
    async fn transfer(&self, source: &Path, destination: &Path, mode: TransferMode) -> Result<()>;

    async fn delete(&self, path: &Path) -> Result<()>;
}

/// Host library refresh hook; best-effort
#[async_trait]
pub trait LibraryNotifier: Send + Sync {
    async fn library_changed(&self, target_id: &str, path: &Path);
}

/// Produces the candidate files for one scan
pub trait SourceEnumerator: Send + Sync {
    fn enumerate(&self, options: &ScanOptions) -> BoxStream<'static, SourceCandidate>;
}

/// Notifier that only logs; used when the host does not care about refreshes
#[derive(Debug, Default, Clone)]
pub struct LoggingNotifier;

#[async_trait]
impl LibraryNotifier for LoggingNotifier {
    async fn library_changed(&self, target_id: &str, path: &Path) {
        tracing::info!(target_id = %target_id, path = %path.display(), "Library content changed");
    }
}

//! Library-folder backed target resolver
//!
//! Treats each top-level folder of a library root ("Chicago Fire (2012)",
//! "The Matrix (1999)") as a target. Target ids are `<type>:<folder name>`.

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::db::OrganizerType;
use crate::services::collaborators::{ResolvedTarget, TargetResolver};
use crate::services::filename_parser::{ParsedTokens, normalize_show_name, show_name_similarity};

/// Names scoring below this are not considered the same show/movie
pub const DEFAULT_MIN_SIMILARITY: f64 = 0.85;

#[derive(Debug, Clone)]
pub struct LibraryFolderResolver {
    tv_root: Option<PathBuf>,
    movie_root: Option<PathBuf>,
    min_similarity: f64,
    /// Resolve names with no library folder yet to a new target
    allow_new_targets: bool,
}

impl LibraryFolderResolver {
    pub fn new(tv_root: Option<PathBuf>, movie_root: Option<PathBuf>) -> Self {
        Self {
            tv_root,
            movie_root,
            min_similarity: DEFAULT_MIN_SIMILARITY,
            allow_new_targets: true,
        }
    }

    pub fn with_min_similarity(mut self, min_similarity: f64) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    pub fn with_new_targets(mut self, allow: bool) -> Self {
        self.allow_new_targets = allow;
        self
    }

    fn root(&self, organizer_type: OrganizerType) -> Option<&Path> {
        match organizer_type {
            OrganizerType::Episode => self.tv_root.as_deref(),
            OrganizerType::Movie => self.movie_root.as_deref(),
        }
    }

    async fn folders(&self, organizer_type: OrganizerType) -> Result<Vec<(String, PathBuf)>> {
        let Some(root) = self.root(organizer_type) else {
            return Ok(Vec::new());
        };
        if !tokio::fs::try_exists(root).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        let mut folders = Vec::new();
        let mut entries = tokio::fs::read_dir(root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                folders.push((name.to_string(), entry.path()));
            }
        }
        folders.sort();
        Ok(folders)
    }
}

pub fn target_id(organizer_type: OrganizerType, folder_name: &str) -> String {
    format!("{}:{}", organizer_type.as_str(), folder_name)
}

/// Split "Name (2012)" into the name and year
fn split_folder_name(folder_name: &str) -> (String, Option<i32>) {
    let trimmed = folder_name.trim();
    if let Some(open) = trimmed.rfind(" (")
        && trimmed.ends_with(')')
        && let Ok(year) = trimmed[open + 2..trimmed.len() - 1].parse::<i32>()
    {
        return (trimmed[..open].to_string(), Some(year));
    }
    (trimmed.to_string(), None)
}

fn target_from_folder(
    organizer_type: OrganizerType,
    folder_name: &str,
    path: Option<PathBuf>,
) -> ResolvedTarget {
    let (name, year) = split_folder_name(folder_name);
    ResolvedTarget {
        id: target_id(organizer_type, folder_name),
        name,
        year,
        path,
    }
}

#[async_trait]
impl TargetResolver for LibraryFolderResolver {
    async fn resolve(
        &self,
        tokens: &ParsedTokens,
        organizer_type: OrganizerType,
    ) -> Result<Option<ResolvedTarget>> {
        let Some(wanted) = tokens.name.as_deref().filter(|n| !n.trim().is_empty()) else {
            return Ok(None);
        };

        let mut best: Option<(f64, ResolvedTarget)> = None;
        for (folder_name, path) in self.folders(organizer_type).await? {
            let candidate = target_from_folder(organizer_type, &folder_name, Some(path));

            // A year on both sides must agree
            if let (Some(a), Some(b)) = (tokens.year, candidate.year)
                && a != b
            {
                continue;
            }

            let score = show_name_similarity(wanted, &candidate.name);
            if score < self.min_similarity {
                continue;
            }
            if best.as_ref().is_none_or(|(s, _)| score > *s) {
                best = Some((score, candidate));
            }
        }

        if let Some((score, target)) = best {
            debug!(name = %wanted, target_id = %target.id, score = score, "Matched library folder");
            return Ok(Some(target));
        }

        if self.allow_new_targets && !normalize_show_name(wanted).is_empty() {
            let folder_name = sanitize_filename::sanitize(wanted);
            let mut target = target_from_folder(organizer_type, &folder_name, None);
            target.year = tokens.year;
            debug!(name = %wanted, target_id = %target.id, "No library folder, using new target");
            return Ok(Some(target));
        }

        Ok(None)
    }

    async fn target_by_id(
        &self,
        id: &str,
        organizer_type: OrganizerType,
    ) -> Result<Option<ResolvedTarget>> {
        let Some(folder_name) = id.strip_prefix(&format!("{}:", organizer_type.as_str())) else {
            return Ok(None);
        };
        if folder_name.is_empty() || folder_name.contains(['/', '\\']) {
            return Ok(None);
        }

        if let Some(root) = self.root(organizer_type) {
            let path = root.join(folder_name);
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Ok(Some(target_from_folder(organizer_type, folder_name, Some(path))));
            }
        }

        Ok(self
            .allow_new_targets
            .then(|| target_from_folder(organizer_type, folder_name, None)))
    }
}

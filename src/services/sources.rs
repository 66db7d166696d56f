//! Watch folder scanning
//!
//! [`WatchFolderEnumerator`] walks the configured watch folders on the blocking
//! pool and feeds candidates through a bounded channel, so a scan starts
//! organizing files before the walk has finished.

use std::path::{Path, PathBuf};

use anyhow::Result;
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::db::OrganizerType;
use crate::services::collaborators::{ScanOptions, SourceCandidate, SourceEnumerator};

/// Video file extensions (lowercase)
pub const VIDEO_EXTENSIONS: &[&str] = &[
    ".mkv", ".mp4", ".avi", ".mov", ".wmv", ".flv", ".webm", ".m4v", ".ts", ".m2ts", ".mpg",
    ".mpeg",
];

const CHANNEL_CAPACITY: usize = 64;

/// Check if a file is a video file based on extension
pub fn is_video_file(path: &str) -> bool {
    let lower = path.to_lowercase();
    VIDEO_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Sample clips shipped alongside releases
pub fn is_sample_file(path: &Path) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| {
            let lower = s.to_lowercase();
            lower == "sample" || lower.ends_with("-sample") || lower.ends_with(".sample")
        })
        .unwrap_or(false)
        || path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.eq_ignore_ascii_case("sample"))
}

fn walk_folder(
    root: &Path,
    organizer_type: OrganizerType,
    min_file_size: u64,
    tx: &mpsc::Sender<SourceCandidate>,
) -> bool {
    for entry in WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !is_video_file(&path.to_string_lossy()) || is_sample_file(path) {
            continue;
        }
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if size < min_file_size {
            debug!(path = %path.display(), size = size, "Skipping file below minimum size");
            continue;
        }

        let candidate = SourceCandidate {
            path: path.to_path_buf(),
            organizer_type,
        };
        // Receiver dropped: the scan was abandoned
        if tx.blocking_send(candidate).is_err() {
            return false;
        }
    }
    true
}

/// Default [`SourceEnumerator`] over local watch folders
#[derive(Debug, Default, Clone)]
pub struct WatchFolderEnumerator;

impl SourceEnumerator for WatchFolderEnumerator {
    fn enumerate(&self, options: &ScanOptions) -> BoxStream<'static, SourceCandidate> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        let roots: Vec<(PathBuf, OrganizerType)> = options
            .tv_watch_paths
            .iter()
            .map(|p| (p.clone(), OrganizerType::Episode))
            .chain(
                options
                    .movie_watch_paths
                    .iter()
                    .map(|p| (p.clone(), OrganizerType::Movie)),
            )
            .collect();
        let min_file_size = options.min_file_size;

        tokio::task::spawn_blocking(move || {
            for (root, organizer_type) in roots {
                if !root.is_dir() {
                    warn!(path = %root.display(), "Watch folder does not exist");
                    continue;
                }
                if !walk_folder(&root, organizer_type, min_file_size, &tx) {
                    break;
                }
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }
}

/// Collect a stream of candidates (tests and dry runs)
pub async fn collect_candidates(
    enumerator: &dyn SourceEnumerator,
    options: &ScanOptions,
) -> Vec<SourceCandidate> {
    enumerator.enumerate(options).collect().await
}

/// Remove folders under `root` that contain no files, deepest first.
/// `root` itself is kept.
pub async fn cleanup_empty_folders(root: &Path) -> Result<Vec<PathBuf>> {
    let root = root.to_path_buf();
    let mut folders: Vec<PathBuf> = tokio::task::spawn_blocking({
        let root = root.clone();
        move || {
            WalkDir::new(&root)
                .min_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_dir())
                .map(|e| e.path().to_path_buf())
                .collect()
        }
    })
    .await?;

    // Sort by depth (deepest first)
    folders.sort_by_key(|f| std::cmp::Reverse(f.components().count()));

    let mut removed = Vec::new();
    for folder in folders {
        match tokio::fs::remove_dir(&folder).await {
            Ok(()) => {
                debug!(path = %folder.display(), "Removed empty folder");
                removed.push(folder);
            }
            // Not empty, or already gone
            Err(_) => continue,
        }
    }

    Ok(removed)
}

//! Integration tests for the organization engine
//!
//! These tests run the engine against a real SQLite file and real files in
//! temporary directories:
//! - Result identity and idempotent saves
//! - Smart match merging and learning from corrections
//! - Episode and movie placement, duplicates and conflicts
//! - Contention on the in-progress guard
//! - Scans, log clearing and original deletion

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use librarian_organizer::db::{
    Database, OrganizationResult, OrganizationStatus, OrganizerType, Page, ResultFilter,
    SmartMatchFilter, UpsertSmartMatch, result_id_for_path,
};
use librarian_organizer::services::collaborators::{
    LibraryNotifier, ResolvedTarget, ScanOptions, TargetResolver, TransferMode,
};
use librarian_organizer::services::file_ops::LocalFileOps;
use librarian_organizer::services::filename_parser::{ParsedTokens, SceneNameParser};
use librarian_organizer::services::in_progress::InProgressGuard;
use librarian_organizer::services::naming::NamingPatternBuilder;
use librarian_organizer::services::organizer::{Correction, OrganizeOptions};
use librarian_organizer::services::sources::WatchFolderEnumerator;
use librarian_organizer::{
    CorrectionRequest, EngineCollaborators, OrganizationEngine, OrganizationEvent, OrganizeError,
};

// ============================================================================
// Test Fixtures
// ============================================================================

/// Resolver that knows a fixed set of targets and counts provider lookups
#[derive(Default)]
struct StubResolver {
    /// (lowercase name, target)
    targets: Vec<(String, ResolvedTarget)>,
    lookups: AtomicUsize,
    /// When set, `resolve` signals `entered` and waits for `release`
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl StubResolver {
    fn with_target(mut self, name: &str, id: &str, year: Option<i32>) -> Self {
        self.targets.push((
            name.to_lowercase(),
            ResolvedTarget {
                id: id.to_string(),
                name: name.to_string(),
                year,
                path: None,
            },
        ));
        self
    }

    fn gated(mut self, entered: Arc<Notify>, release: Arc<Notify>) -> Self {
        self.gate = Some((entered, release));
        self
    }

    fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TargetResolver for StubResolver {
    async fn resolve(
        &self,
        tokens: &ParsedTokens,
        _organizer_type: OrganizerType,
    ) -> anyhow::Result<Option<ResolvedTarget>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.notified().await;
        }
        let Some(name) = tokens.name.as_deref() else {
            return Ok(None);
        };
        Ok(self
            .targets
            .iter()
            .find(|(key, _)| *key == name.to_lowercase())
            .map(|(_, target)| target.clone()))
    }

    async fn target_by_id(
        &self,
        id: &str,
        _organizer_type: OrganizerType,
    ) -> anyhow::Result<Option<ResolvedTarget>> {
        Ok(self
            .targets
            .iter()
            .find(|(_, target)| target.id == id)
            .map(|(_, target)| target.clone()))
    }
}

#[derive(Default)]
struct RecordingNotifier {
    calls: parking_lot::Mutex<Vec<(String, PathBuf)>>,
    called: Notify,
}

#[async_trait]
impl LibraryNotifier for RecordingNotifier {
    async fn library_changed(&self, target_id: &str, path: &Path) {
        self.calls
            .lock()
            .push((target_id.to_string(), path.to_path_buf()));
        self.called.notify_one();
    }
}

struct Harness {
    _dir: TempDir,
    db: Database,
    engine: Arc<OrganizationEngine>,
    resolver: Arc<StubResolver>,
    notifier: Arc<RecordingNotifier>,
    incoming: PathBuf,
    tv_library: PathBuf,
    movie_library: PathBuf,
}

impl Harness {
    fn write_incoming(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.incoming.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    fn result_for(&self, path: &Path) -> String {
        result_id_for_path(&path.to_string_lossy())
    }

    fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            tv_watch_paths: vec![self.incoming.clone()],
            movie_watch_paths: Vec::new(),
            min_file_size: 0,
            delete_empty_folders: false,
        }
    }
}

fn default_options() -> OrganizeOptions {
    OrganizeOptions {
        transfer_mode: TransferMode::Move,
        skip_duplicates: true,
        delete_duplicate_source: false,
        overwrite_existing: false,
        ..Default::default()
    }
}

async fn harness_with(resolver: StubResolver, options: OrganizeOptions) -> Harness {
    let dir = TempDir::new().unwrap();
    let incoming = dir.path().join("incoming");
    let tv_library = dir.path().join("library/tv");
    let movie_library = dir.path().join("library/movies");
    std::fs::create_dir_all(&incoming).unwrap();

    let db = Database::connect(&dir.path().join("organizer.db").to_string_lossy())
        .await
        .unwrap();
    db.migrate().await.unwrap();

    let options = OrganizeOptions {
        tv_library_path: options.tv_library_path.or(Some(tv_library.clone())),
        movie_library_path: options.movie_library_path.or(Some(movie_library.clone())),
        ..options
    };

    let resolver = Arc::new(resolver);
    let notifier = Arc::new(RecordingNotifier::default());
    let collaborators = EngineCollaborators {
        parser: Arc::new(SceneNameParser),
        resolver: resolver.clone(),
        destinations: Arc::new(NamingPatternBuilder::default()),
        file_ops: Arc::new(LocalFileOps::new()),
        notifier: notifier.clone(),
        sources: Arc::new(WatchFolderEnumerator),
    };
    let engine = OrganizationEngine::new(
        &db,
        Arc::new(InProgressGuard::new()),
        collaborators,
        options,
    );

    Harness {
        _dir: dir,
        db,
        engine: Arc::new(engine),
        resolver,
        notifier,
        incoming,
        tv_library,
        movie_library,
    }
}

async fn harness() -> Harness {
    harness_with(
        StubResolver::default()
            .with_target("Show", "series-x", None)
            .with_target("Other Show", "series-y", Some(2020))
            .with_target("The Matrix", "movie-matrix", Some(1999)),
        default_options(),
    )
    .await
}

// ============================================================================
// Result Store
// ============================================================================

mod result_store {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_identity_is_stable_and_distinct() {
        let a = result_id_for_path("/in/Show.S01E02.mkv");
        assert_eq!(a, result_id_for_path("/in/Show.S01E02.mkv"));
        assert_ne!(a, result_id_for_path("/in/Show.S01E03.mkv"));
        assert_ne!(a, result_id_for_path("/in/show.s01e02.mkv"));
    }

    #[tokio::test]
    async fn test_idempotent_save_keeps_latest() {
        let h = harness().await;
        let repo = h.db.organization_results(h.engine.guard().clone());

        let first = OrganizationResult::new("/in/Show.S01E02.mkv", OrganizerType::Episode)
            .needs_correction("No library match found for 'Show'");
        let saved_first = repo.save(&first).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = OrganizationResult::new("/in/Show.S01E02.mkv", OrganizerType::Episode)
            .succeed(Path::new("/lib/Show/Season 01/Show - S01E02.mkv"));
        let saved_second = repo.save(&second).await.unwrap();

        let page = repo
            .list(&ResultFilter::default(), Page::default())
            .await
            .unwrap();
        assert_eq!(page.total_count, 1);
        assert_eq!(page.items[0].status, OrganizationStatus::Success);
        assert_eq!(saved_second.created_at, saved_first.created_at);
        assert!(saved_second.updated_at > saved_first.updated_at);
    }

    #[tokio::test]
    async fn test_save_requires_message_for_failures() {
        let h = harness().await;
        let repo = h.db.organization_results(h.engine.guard().clone());

        // A fresh record is a failure without a message
        let record = OrganizationResult::new("/in/x.mkv", OrganizerType::Movie);
        assert!(repo.save(&record).await.is_err());
    }

    #[tokio::test]
    async fn test_query_filters_and_pages() {
        let h = harness().await;
        let repo = h.db.organization_results(h.engine.guard().clone());

        for (i, status) in [
            OrganizationStatus::Success,
            OrganizationStatus::Failure,
            OrganizationStatus::NeedsCorrection,
            OrganizationStatus::Success,
        ]
        .into_iter()
        .enumerate()
        {
            let path = format!("/in/Show.S01E0{}.mkv", i + 1);
            let base = OrganizationResult::new(&path, OrganizerType::Episode);
            let record = match status {
                OrganizationStatus::Success => base.succeed(Path::new("/lib/x.mkv")),
                OrganizationStatus::Failure => base.fail("boom"),
                _ => base.needs_correction("who?"),
            };
            repo.save(&record).await.unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        repo.save(
            &OrganizationResult::new("/in/Movies/Heat.1995.mkv", OrganizerType::Movie)
                .fail("no match"),
        )
        .await
        .unwrap();

        let successes = repo
            .list(
                &ResultFilter {
                    statuses: vec![OrganizationStatus::Success],
                    ..Default::default()
                },
                Page::default(),
            )
            .await
            .unwrap();
        assert_eq!(successes.total_count, 2);
        // Most recent first
        assert_eq!(successes.items[0].original_path, "/in/Show.S01E04.mkv");

        let movies = repo
            .list(
                &ResultFilter {
                    organizer_type: Some(OrganizerType::Movie),
                    ..Default::default()
                },
                Page::default(),
            )
            .await
            .unwrap();
        assert_eq!(movies.total_count, 1);

        let by_path = repo
            .list(
                &ResultFilter {
                    path_contains: Some("movies/heat".to_string()),
                    ..Default::default()
                },
                Page::default(),
            )
            .await
            .unwrap();
        assert_eq!(by_path.total_count, 1);

        let first_page = repo
            .list(&ResultFilter::default(), Page::new(0, 2))
            .await
            .unwrap();
        assert_eq!(first_page.items.len(), 2);
        assert_eq!(first_page.total_count, 5);
        assert!(first_page.has_more);

        let last_page = repo
            .list(&ResultFilter::default(), Page::new(4, 2))
            .await
            .unwrap();
        assert_eq!(last_page.items.len(), 1);
        assert!(!last_page.has_more);
    }

    #[tokio::test]
    async fn test_in_progress_is_overlaid_not_stored() {
        let h = harness().await;
        let repo = h.db.organization_results(h.engine.guard().clone());
        let record = OrganizationResult::new("/in/Show.S01E02.mkv", OrganizerType::Episode)
            .needs_correction("who?");
        repo.save(&record).await.unwrap();

        assert!(h.engine.guard().try_acquire_path("/in/Show.S01E02.mkv"));
        let held = repo.get(&record.id).await.unwrap().unwrap();
        assert!(held.is_in_progress);

        h.engine.guard().release_path("/in/Show.S01E02.mkv");
        let released = repo.get(&record.id).await.unwrap().unwrap();
        assert!(!released.is_in_progress);
    }
}

// ============================================================================
// Smart Match Store
// ============================================================================

mod smart_match_store {
    use super::*;
    use pretty_assertions::assert_eq;

    fn upsert(id: &str, tokens: &[&str]) -> UpsertSmartMatch {
        UpsertSmartMatch {
            id: id.to_string(),
            item_name: "Show".to_string(),
            organizer_type: OrganizerType::Episode,
            match_strings: tokens.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_save_merges_tokens() {
        let h = harness().await;
        let repo = h.db.smart_matches();

        repo.save(upsert("T", &["a"])).await.unwrap();
        let merged = repo.save(upsert("T", &["b", "A"])).await.unwrap();

        let expected: BTreeSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        assert_eq!(merged.match_strings, expected);

        let all = repo
            .list(&SmartMatchFilter::default(), 0, None)
            .await
            .unwrap();
        assert_eq!(all.total_count, 1);
    }

    #[tokio::test]
    async fn test_delete_entry_removes_empty_record() {
        let h = harness().await;
        let repo = h.db.smart_matches();
        repo.save(upsert("T", &["a", "b"])).await.unwrap();

        assert!(repo.delete_entry("T", "a").await.unwrap());
        assert!(!repo.delete_entry("T", "a").await.unwrap());
        assert!(repo.get("T").await.unwrap().is_some());

        assert!(repo.delete_entry("T", "b").await.unwrap());
        assert!(repo.get("T").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_newer_save_takes_shared_tokens() {
        let h = harness().await;
        let repo = h.db.smart_matches();
        repo.save(upsert("first", &["shared", "one"])).await.unwrap();
        repo.save(upsert("second", &["shared"])).await.unwrap();

        let found = repo
            .find_target_for_tokens(&["Shared".to_string()], OrganizerType::Episode)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "second");

        let first = repo.get("first").await.unwrap().unwrap();
        let expected: BTreeSet<String> = ["one".to_string()].into_iter().collect();
        assert_eq!(first.match_strings, expected);

        let other_type = repo
            .find_target_for_tokens(&["shared".to_string()], OrganizerType::Movie)
            .await
            .unwrap();
        assert!(other_type.is_none());

        let none = repo.find_target_for_tokens(&[], OrganizerType::Episode).await.unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_record_emptied_by_newer_save_is_removed() {
        let h = harness().await;
        let repo = h.db.smart_matches();
        repo.save(upsert("first", &["shared"])).await.unwrap();
        repo.save(upsert("second", &["shared"])).await.unwrap();

        assert!(repo.get("first").await.unwrap().is_none());
        let all = repo
            .list(&SmartMatchFilter::default(), 0, None)
            .await
            .unwrap();
        assert_eq!(all.total_count, 1);
        assert_eq!(all.items[0].id, "second");
    }

    #[tokio::test]
    async fn test_tokens_of_other_type_are_kept() {
        let h = harness().await;
        let repo = h.db.smart_matches();
        repo.save(UpsertSmartMatch {
            organizer_type: OrganizerType::Movie,
            ..upsert("movie", &["shared"])
        })
        .await
        .unwrap();
        repo.save(upsert("series", &["shared"])).await.unwrap();

        assert!(repo.get("movie").await.unwrap().is_some());
    }
}

// ============================================================================
// Organizing Files
// ============================================================================

mod organizing {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_episode_is_placed_by_template() {
        let h = harness().await;
        let source = h.write_incoming("Show.S01E02.mkv", b"episode two");

        let result = h
            .engine
            .process_one(&source, OrganizerType::Episode)
            .await
            .unwrap();

        let expected = h.tv_library.join("Show/Season 01/Show - S01E02.mkv");
        assert_eq!(result.status, OrganizationStatus::Success);
        assert_eq!(result.target_path.as_deref(), Some(&*expected.to_string_lossy()));
        assert_eq!(result.extracted_name.as_deref(), Some("Show"));
        assert_eq!(result.extracted_season, Some(1));
        assert_eq!(result.extracted_episode, Some(2));
        assert!(!result.is_in_progress);
        assert_eq!(std::fs::read(&expected).unwrap(), b"episode two");
        assert!(!source.exists());

        tokio::time::timeout(Duration::from_secs(5), h.notifier.called.notified())
            .await
            .unwrap();
        assert_eq!(h.notifier.calls.lock()[0].0, "series-x");

        // Auto matches are not learned
        let learned = h
            .engine
            .list_smart_matches(&SmartMatchFilter::default(), 0, None)
            .await
            .unwrap();
        assert_eq!(learned.total_count, 0);
    }

    #[tokio::test]
    async fn test_movie_is_placed_by_template() {
        let h = harness().await;
        let source = h.write_incoming("The.Matrix.1999.1080p.BluRay.mkv", b"movie");

        let result = h
            .engine
            .process_one(&source, OrganizerType::Movie)
            .await
            .unwrap();

        let expected = h.movie_library.join("The Matrix (1999)/The Matrix (1999).mkv");
        assert_eq!(result.status, OrganizationStatus::Success);
        assert_eq!(result.extracted_year, Some(1999));
        assert!(expected.exists());
    }

    #[tokio::test]
    async fn test_unknown_show_needs_correction() {
        let h = harness().await;
        let source = h.write_incoming("Mystery.Program.S02E05.mkv", b"?");

        let result = h
            .engine
            .process_one(&source, OrganizerType::Episode)
            .await
            .unwrap();

        assert_eq!(result.status, OrganizationStatus::NeedsCorrection);
        assert!(result.status_message.is_some());
        assert_eq!(result.extracted_name.as_deref(), Some("Mystery Program"));
        assert!(result.target_path.is_none());
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_missing_episode_numbers_need_correction() {
        let h = harness().await;
        let source = h.write_incoming("Show Special.mkv", b"?");

        let result = h
            .engine
            .process_one(&source, OrganizerType::Episode)
            .await
            .unwrap();

        assert_eq!(result.status, OrganizationStatus::NeedsCorrection);
        assert_eq!(h.resolver.lookups(), 0);
    }

    #[tokio::test]
    async fn test_identical_destination_is_skipped() {
        let h = harness_with(
            StubResolver::default().with_target("Show", "series-x", None),
            OrganizeOptions {
                delete_duplicate_source: true,
                ..default_options()
            },
        )
        .await;
        let existing = h.tv_library.join("Show/Season 01/Show - S01E02.mkv");
        std::fs::create_dir_all(existing.parent().unwrap()).unwrap();
        std::fs::write(&existing, b"same bytes").unwrap();
        let source = h.write_incoming("Show.S01E02.mkv", b"same bytes");

        let result = h
            .engine
            .process_one(&source, OrganizerType::Episode)
            .await
            .unwrap();

        assert_eq!(result.status, OrganizationStatus::SkippedExisting);
        assert_eq!(
            result.duplicate_of.as_deref(),
            Some(&*existing.to_string_lossy())
        );
        assert!(!source.exists());
        assert_eq!(std::fs::read(&existing).unwrap(), b"same bytes");
    }

    #[tokio::test]
    async fn test_duplicate_source_kept_unless_requested() {
        let h = harness().await;
        let existing = h.tv_library.join("Show/Season 01/Show - S01E02.mkv");
        std::fs::create_dir_all(existing.parent().unwrap()).unwrap();
        std::fs::write(&existing, b"same bytes").unwrap();
        let source = h.write_incoming("Show.S01E02.mkv", b"same bytes");

        let result = h
            .engine
            .process_one(&source, OrganizerType::Episode)
            .await
            .unwrap();

        assert_eq!(result.status, OrganizationStatus::SkippedExisting);
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_conflict_is_not_overwritten_until_performed() {
        let h = harness().await;
        let existing = h.tv_library.join("Show/Season 01/Show - S01E02.mkv");
        std::fs::create_dir_all(existing.parent().unwrap()).unwrap();
        std::fs::write(&existing, b"old release").unwrap();
        let source = h.write_incoming("Show.S01E02.mkv", b"new release!");

        let result = h
            .engine
            .process_one(&source, OrganizerType::Episode)
            .await
            .unwrap();
        assert_eq!(result.status, OrganizationStatus::SkippedExisting);
        assert!(result.duplicate_of.is_none());
        assert_eq!(std::fs::read(&existing).unwrap(), b"old release");
        assert!(source.exists());

        let performed = h.engine.perform_organization(&result.id).await.unwrap();
        assert_eq!(performed.status, OrganizationStatus::Success);
        assert_eq!(std::fs::read(&existing).unwrap(), b"new release!");
        assert!(!source.exists());
    }

    #[tokio::test]
    async fn test_missing_library_root_is_a_configuration_error() {
        let h = harness().await;
        let source = h.write_incoming("Show.S01E02.mkv", b"x");

        let engine = {
            let collaborators = EngineCollaborators {
                parser: Arc::new(SceneNameParser),
                resolver: h.resolver.clone(),
                destinations: Arc::new(NamingPatternBuilder::default()),
                file_ops: Arc::new(LocalFileOps::new()),
                notifier: h.notifier.clone(),
                sources: Arc::new(WatchFolderEnumerator),
            };
            OrganizationEngine::new(
                &h.db,
                Arc::new(InProgressGuard::new()),
                collaborators,
                default_options(),
            )
        };

        let err = engine
            .process_one(&source, OrganizerType::Episode)
            .await
            .unwrap_err();
        assert_matches!(err, OrganizeError::Configuration(_));
        assert!(
            engine
                .get_result_by_path(&source.to_string_lossy())
                .await
                .unwrap()
                .is_none()
        );
        // Guard was released
        assert!(engine.guard().is_empty());
    }

    #[tokio::test]
    async fn test_transfer_failure_is_recorded() {
        let h = harness().await;
        // A file where the season folder should be makes directory creation fail
        std::fs::create_dir_all(h.tv_library.join("Show")).unwrap();
        std::fs::write(h.tv_library.join("Show/Season 01"), b"not a folder").unwrap();
        let source = h.write_incoming("Show.S01E02.mkv", b"x");

        let result = h
            .engine
            .process_one(&source, OrganizerType::Episode)
            .await
            .unwrap();

        assert_eq!(result.status, OrganizationStatus::Failure);
        assert!(result.status_message.unwrap().contains("transfer"));
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_perform_leaves_success_untouched() {
        let h = harness().await;
        let source = h.write_incoming("Show.S01E02.mkv", b"x");
        let done = h
            .engine
            .process_one(&source, OrganizerType::Episode)
            .await
            .unwrap();
        assert_eq!(done.status, OrganizationStatus::Success);

        let err = h.engine.perform_organization(&done.id).await.unwrap_err();
        assert_matches!(
            err,
            OrganizeError::InvalidState {
                status: OrganizationStatus::Success,
                ..
            }
        );

        let stored = h.engine.get_result(&done.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrganizationStatus::Success);
        assert_eq!(stored.target_path, done.target_path);
        assert!(h.tv_library.join("Show/Season 01/Show - S01E02.mkv").exists());
        assert!(h.engine.guard().is_empty());
    }

    #[tokio::test]
    async fn test_events_are_broadcast() {
        let h = harness().await;
        let mut events = h.engine.subscribe();
        let source = h.write_incoming("Show.S01E02.mkv", b"x");

        h.engine
            .process_one(&source, OrganizerType::Episode)
            .await
            .unwrap();

        let event = events.recv().await.unwrap();
        assert_matches!(event, OrganizationEvent::ResultUpdated(r) if r.status == OrganizationStatus::Success);
    }
}

// ============================================================================
// Contention
// ============================================================================

mod contention {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_concurrent_processing_of_same_path() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let h = harness_with(
            StubResolver::default()
                .with_target("Show", "series-x", None)
                .gated(entered.clone(), release.clone()),
            default_options(),
        )
        .await;
        let source = h.write_incoming("Show.S01E02.mkv", b"x");

        let engine = h.engine.clone();
        let first_source = source.clone();
        let first = tokio::spawn(async move {
            engine
                .process_one(&first_source, OrganizerType::Episode)
                .await
        });

        // First caller is inside the organizer holding the guard
        tokio::time::timeout(Duration::from_secs(5), entered.notified())
            .await
            .unwrap();

        let second = h.engine.process_one(&source, OrganizerType::Episode).await;
        assert_matches!(second, Err(OrganizeError::InProgress(_)));

        let listed = h
            .engine
            .get_result_by_path(&source.to_string_lossy())
            .await
            .unwrap();
        assert!(listed.is_none());

        release.notify_one();
        let first = first.await.unwrap().unwrap();
        assert_eq!(first.status, OrganizationStatus::Success);

        let page = h
            .engine
            .query_results(&ResultFilter::default(), Page::default())
            .await
            .unwrap();
        assert_eq!(page.total_count, 1);
        assert!(h.engine.guard().is_empty());
    }

    #[tokio::test]
    async fn test_delete_original_while_processing_is_rejected() {
        let h = harness().await;
        let source = h.write_incoming("Unknown.S01E01.mkv", b"x");
        let result = h
            .engine
            .process_one(&source, OrganizerType::Episode)
            .await
            .unwrap();

        assert!(h.engine.guard().try_acquire(&result.id));
        let err = h.engine.delete_original(&result.id).await.unwrap_err();
        assert_matches!(err, OrganizeError::InProgress(_));
        assert!(source.exists());
        h.engine.guard().release(&result.id);
    }
}

// ============================================================================
// Corrections
// ============================================================================

mod corrections {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_correction_learns_and_auto_resolves() {
        let h = harness().await;
        let source = h.write_incoming("Mystery.Program.S01E02.mkv", b"first");
        let pending = h
            .engine
            .process_one(&source, OrganizerType::Episode)
            .await
            .unwrap();
        assert_eq!(pending.status, OrganizationStatus::NeedsCorrection);

        let corrected = h
            .engine
            .submit_correction(CorrectionRequest {
                result_id: pending.id.clone(),
                correction: Correction::Episode {
                    target_id: "series-y".to_string(),
                    season: 1,
                    episode: 2,
                    ending_episode: None,
                },
            })
            .await
            .unwrap();
        assert_eq!(corrected.id, pending.id);
        assert_eq!(corrected.status, OrganizationStatus::Success);
        assert!(
            h.tv_library
                .join("Other Show/Season 01/Other Show - S01E02.mkv")
                .exists()
        );

        let learned = h.engine.get_smart_match("series-y").await.unwrap().unwrap();
        assert!(learned.match_strings.contains("mystery program"));

        // A different file with the same tokens resolves without the provider
        let lookups_before = h.resolver.lookups();
        let next = h.write_incoming("Mystery.Program.S01E03.mkv", b"second");
        let auto = h
            .engine
            .process_one(&next, OrganizerType::Episode)
            .await
            .unwrap();
        assert_eq!(auto.status, OrganizationStatus::Success);
        assert_eq!(h.resolver.lookups(), lookups_before);
        assert!(
            h.tv_library
                .join("Other Show/Season 01/Other Show - S01E03.mkv")
                .exists()
        );

        // One record per path
        let page = h
            .engine
            .query_results(&ResultFilter::default(), Page::default())
            .await
            .unwrap();
        assert_eq!(page.total_count, 2);
    }

    #[tokio::test]
    async fn test_correction_overrides_episode_numbers() {
        let h = harness().await;
        let source = h.write_incoming("Show Special.mkv", b"x");
        let pending = h
            .engine
            .process_one(&source, OrganizerType::Episode)
            .await
            .unwrap();

        let corrected = h
            .engine
            .submit_correction(CorrectionRequest {
                result_id: pending.id,
                correction: Correction::Episode {
                    target_id: "series-x".to_string(),
                    season: 0,
                    episode: 4,
                    ending_episode: None,
                },
            })
            .await
            .unwrap();

        assert_eq!(corrected.extracted_season, Some(0));
        assert_eq!(corrected.extracted_episode, Some(4));
        assert!(h.tv_library.join("Show/Specials/Show - S00E04.mkv").exists());
    }

    #[tokio::test]
    async fn test_correction_to_unknown_target_fails() {
        let h = harness().await;
        let source = h.write_incoming("Mystery.Program.S01E02.mkv", b"x");
        let pending = h
            .engine
            .process_one(&source, OrganizerType::Episode)
            .await
            .unwrap();

        let err = h
            .engine
            .submit_correction(CorrectionRequest {
                result_id: pending.id.clone(),
                correction: Correction::Episode {
                    target_id: "nope".to_string(),
                    season: 1,
                    episode: 2,
                    ending_episode: None,
                },
            })
            .await
            .unwrap_err();
        assert_matches!(
            err,
            OrganizeError::CorrectionFailed {
                status: OrganizationStatus::Failure,
                ..
            }
        );

        let stored = h.engine.get_result(&pending.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrganizationStatus::Failure);
        assert!(h.engine.get_smart_match("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_correction_rejected_for_success() {
        let h = harness().await;
        let source = h.write_incoming("Show.S01E02.mkv", b"x");
        let done = h
            .engine
            .process_one(&source, OrganizerType::Episode)
            .await
            .unwrap();

        let err = h
            .engine
            .submit_correction(CorrectionRequest {
                result_id: done.id,
                correction: Correction::Episode {
                    target_id: "series-y".to_string(),
                    season: 1,
                    episode: 2,
                    ending_episode: None,
                },
            })
            .await
            .unwrap_err();
        assert_matches!(err, OrganizeError::InvalidState { .. });
    }

    #[tokio::test]
    async fn test_correction_for_unknown_result() {
        let h = harness().await;
        let err = h
            .engine
            .submit_correction(CorrectionRequest {
                result_id: "missing".to_string(),
                correction: Correction::Movie {
                    target_id: "movie-matrix".to_string(),
                },
            })
            .await
            .unwrap_err();
        assert_matches!(err, OrganizeError::ResultNotFound(_));
    }

    #[tokio::test]
    async fn test_movie_correction_for_episode_is_rejected() {
        let h = harness().await;
        let source = h.write_incoming("Mystery.Program.S01E02.mkv", b"x");
        let pending = h
            .engine
            .process_one(&source, OrganizerType::Episode)
            .await
            .unwrap();

        let err = h
            .engine
            .submit_correction(CorrectionRequest {
                result_id: pending.id,
                correction: Correction::Movie {
                    target_id: "movie-matrix".to_string(),
                },
            })
            .await
            .unwrap_err();
        assert_matches!(err, OrganizeError::Configuration(_));
    }

    #[tokio::test]
    async fn test_newer_correction_replaces_learned_target() {
        let h = harness().await;
        let first = h.write_incoming("Mystery.Program.S01E02.mkv", b"one");
        let pending = h
            .engine
            .process_one(&first, OrganizerType::Episode)
            .await
            .unwrap();
        h.engine
            .submit_correction(CorrectionRequest {
                result_id: pending.id,
                correction: Correction::Episode {
                    target_id: "series-x".to_string(),
                    season: 1,
                    episode: 2,
                    ending_episode: None,
                },
            })
            .await
            .unwrap();

        // The learned target cannot take season 2
        std::fs::write(h.tv_library.join("Show/Season 02"), b"not a folder").unwrap();
        let second = h.write_incoming("Mystery.Program.S02E01.mkv", b"two");
        let failed = h
            .engine
            .process_one(&second, OrganizerType::Episode)
            .await
            .unwrap();
        assert_eq!(failed.status, OrganizationStatus::Failure);

        let corrected = h
            .engine
            .submit_correction(CorrectionRequest {
                result_id: failed.id,
                correction: Correction::Episode {
                    target_id: "series-y".to_string(),
                    season: 2,
                    episode: 1,
                    ending_episode: None,
                },
            })
            .await
            .unwrap();
        assert_eq!(corrected.status, OrganizationStatus::Success);
        assert!(h.engine.get_smart_match("series-x").await.unwrap().is_none());

        let third = h.write_incoming("Mystery.Program.S01E04.mkv", b"three");
        let auto = h
            .engine
            .process_one(&third, OrganizerType::Episode)
            .await
            .unwrap();
        assert_eq!(auto.status, OrganizationStatus::Success);
        assert!(
            h.tv_library
                .join("Other Show/Season 01/Other Show - S01E04.mkv")
                .exists()
        );
    }

    #[tokio::test]
    async fn test_correction_succeeds_when_learning_fails() {
        let h = harness().await;
        let source = h.write_incoming("Mystery.Program.S01E02.mkv", b"x");
        let pending = h
            .engine
            .process_one(&source, OrganizerType::Episode)
            .await
            .unwrap();

        sqlx::query("DROP TABLE smart_matches")
            .execute(h.db.pool())
            .await
            .unwrap();

        let corrected = h
            .engine
            .submit_correction(CorrectionRequest {
                result_id: pending.id.clone(),
                correction: Correction::Episode {
                    target_id: "series-y".to_string(),
                    season: 1,
                    episode: 2,
                    ending_episode: None,
                },
            })
            .await
            .unwrap();

        assert_eq!(corrected.status, OrganizationStatus::Success);
        assert!(
            h.tv_library
                .join("Other Show/Season 01/Other Show - S01E02.mkv")
                .exists()
        );
        let stored = h.engine.get_result(&pending.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrganizationStatus::Success);
        assert!(h.engine.guard().is_empty());
    }

    #[tokio::test]
    async fn test_smart_match_for_unknown_target_is_ignored() {
        let h = harness().await;
        h.db.smart_matches()
            .save(UpsertSmartMatch {
                id: "gone".to_string(),
                item_name: "Gone".to_string(),
                organizer_type: OrganizerType::Episode,
                match_strings: vec!["show".to_string()],
            })
            .await
            .unwrap();
        let source = h.write_incoming("Show.S01E02.mkv", b"x");

        let result = h
            .engine
            .process_one(&source, OrganizerType::Episode)
            .await
            .unwrap();

        assert_eq!(result.status, OrganizationStatus::Success);
        assert_eq!(h.resolver.lookups(), 1);
    }
}

// ============================================================================
// Log Management
// ============================================================================

mod log_management {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn seed(h: &Harness) {
        let repo = h.db.organization_results(h.engine.guard().clone());
        let records = [
            OrganizationResult::new("/in/a.mkv", OrganizerType::Episode)
                .succeed(Path::new("/lib/a.mkv")),
            OrganizationResult::new("/in/b.mkv", OrganizerType::Episode)
                .skipped(Path::new("/lib/b.mkv"), "Identical file already exists"),
            OrganizationResult::new("/in/c.mkv", OrganizerType::Episode).fail("boom"),
            OrganizationResult::new("/in/d.mkv", OrganizerType::Movie).needs_correction("who?"),
        ];
        for record in &records {
            repo.save(record).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_clear_completed_keeps_pending() {
        let h = harness().await;
        seed(&h).await;

        assert_eq!(h.engine.clear_completed().await.unwrap(), 2);

        let remaining = h
            .engine
            .query_results(&ResultFilter::default(), Page::default())
            .await
            .unwrap();
        let statuses: BTreeSet<&str> = remaining.items.iter().map(|r| r.status.as_str()).collect();
        assert_eq!(statuses, BTreeSet::from(["failure", "needs_correction"]));
    }

    #[tokio::test]
    async fn test_clear_log_removes_everything() {
        let h = harness().await;
        seed(&h).await;

        assert_eq!(h.engine.clear_log().await.unwrap(), 4);
        let remaining = h
            .engine
            .query_results(&ResultFilter::default(), Page::default())
            .await
            .unwrap();
        assert_eq!(remaining.total_count, 0);
    }

    #[tokio::test]
    async fn test_delete_original_removes_file_and_record() {
        let h = harness().await;
        let source = h.write_incoming("Mystery.Program.S01E02.mkv", b"x");
        let result = h
            .engine
            .process_one(&source, OrganizerType::Episode)
            .await
            .unwrap();

        h.engine.delete_original(&result.id).await.unwrap();

        assert!(!source.exists());
        assert!(h.engine.get_result(&result.id).await.unwrap().is_none());
        assert!(h.engine.guard().is_empty());
    }

    #[tokio::test]
    async fn test_delete_original_with_missing_file_still_removes_record() {
        let h = harness().await;
        let source = h.write_incoming("Mystery.Program.S01E02.mkv", b"x");
        let result = h
            .engine
            .process_one(&source, OrganizerType::Episode)
            .await
            .unwrap();
        std::fs::remove_file(&source).unwrap();

        h.engine.delete_original(&result.id).await.unwrap();
        assert!(h.engine.get_result(&result.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_original_unknown_result() {
        let h = harness().await;
        let err = h.engine.delete_original("missing").await.unwrap_err();
        assert_matches!(err, OrganizeError::ResultNotFound(_));
    }
}

// ============================================================================
// Scanning
// ============================================================================

mod scanning {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_scan_isolates_files() {
        let h = harness_with(
            StubResolver::default().with_target("Show", "series-x", None),
            OrganizeOptions {
                transfer_mode: TransferMode::Copy,
                ..default_options()
            },
        )
        .await;
        h.write_incoming("Show.S01E01.mkv", b"1");
        h.write_incoming("Show.S01E02.mkv", b"2");
        h.write_incoming("Mystery.Program.S01E01.mkv", b"3");
        h.write_incoming("readme.txt", b"not video");

        let summary = h
            .engine
            .process_new_files(&h.scan_options(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.scanned, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.needs_correction, 1);
        assert!(!summary.cancelled);

        // Copies stay behind; organized ones are not processed again
        let again = h
            .engine
            .process_new_files(&h.scan_options(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(again.already_organized, 2);
        assert_eq!(again.needs_correction, 1);
    }

    #[tokio::test]
    async fn test_scan_stops_when_cancelled() {
        let h = harness().await;
        let source = h.write_incoming("Show.S01E01.mkv", b"1");

        let cancel = CancellationToken::new();
        cancel.cancel();
        let summary = h
            .engine
            .process_new_files(&h.scan_options(), &cancel)
            .await
            .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.scanned, 0);
        assert!(source.exists());
        assert!(
            h.engine
                .get_result(&h.result_for(&source))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_scan_removes_empty_folders() {
        let h = harness().await;
        h.write_incoming("Show.S01E01/Show.S01E01.mkv", b"1");

        let options = ScanOptions {
            delete_empty_folders: true,
            ..h.scan_options()
        };
        let summary = h
            .engine
            .process_new_files(&options, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.folders_removed, 1);
        assert!(!h.incoming.join("Show.S01E01").exists());
        assert!(h.incoming.exists());
    }
}

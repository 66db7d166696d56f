//! Organization engine
//!
//! Orchestrates every operation that touches a source path:
//! acquire guard → organize → persist → (learn) → release → notify.
//!
//! Contenders for a path fail fast with [`OrganizeError::InProgress`]; nothing
//! queues. One bad file never aborts a scan.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::db::{
    Database, OrganizationResult, OrganizationResultRepository, OrganizationStatus,
    OrganizerType, Page, PaginatedResults, PaginatedSmartMatches, ResultFilter, SmartMatch,
    SmartMatchFilter, SmartMatchRepository, UpsertSmartMatch, result_id_for_path,
};
use crate::error::OrganizeError;
use crate::services::collaborators::{
    DestinationBuilder, FileOps, LibraryNotifier, MatchSource, ScanOptions, SourceEnumerator,
    TargetResolver, TokenParser,
};
use crate::services::filename_parser::ParsedTokens;
use crate::services::in_progress::{InProgressGuard, InProgressLease};
use crate::services::organizer::{
    Correction, OrganizeOptions, OrganizeOutcome, OrganizeRequest, Organizer, OrganizerContext,
    default_organizers,
};
use crate::services::sources::cleanup_empty_folders;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Change notifications for host UIs
#[derive(Debug, Clone)]
pub enum OrganizationEvent {
    ResultUpdated(OrganizationResult),
    ResultRemoved { id: String },
    LogCleared { removed: u64 },
    SmartMatchUpdated { id: String },
}

/// A correction for a stored result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionRequest {
    pub result_id: String,
    pub correction: Correction,
}

/// Counts for one scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub scanned: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub needs_correction: u64,
    pub skipped_existing: u64,
    /// Candidates whose record is already success/skipped_existing
    pub already_organized: u64,
    /// Candidates another operation was processing
    pub contended: u64,
    /// Candidates that raised an error (configuration, storage)
    pub errors: u64,
    pub folders_removed: u64,
    pub cancelled: bool,
}

impl ScanSummary {
    fn record(&mut self, status: OrganizationStatus) {
        match status {
            OrganizationStatus::Success => self.succeeded += 1,
            OrganizationStatus::Failure => self.failed += 1,
            OrganizationStatus::NeedsCorrection => self.needs_correction += 1,
            OrganizationStatus::SkippedExisting => self.skipped_existing += 1,
        }
    }
}

/// The external collaborators the engine runs on
#[derive(Clone)]
pub struct EngineCollaborators {
    pub parser: Arc<dyn TokenParser>,
    pub resolver: Arc<dyn TargetResolver>,
    pub destinations: Arc<dyn DestinationBuilder>,
    pub file_ops: Arc<dyn FileOps>,
    pub notifier: Arc<dyn LibraryNotifier>,
    pub sources: Arc<dyn SourceEnumerator>,
}

pub struct OrganizationEngine {
    guard: Arc<InProgressGuard>,
    results: OrganizationResultRepository,
    smart_matches: SmartMatchRepository,
    organizers: HashMap<OrganizerType, Arc<dyn Organizer>>,
    file_ops: Arc<dyn FileOps>,
    notifier: Arc<dyn LibraryNotifier>,
    sources: Arc<dyn SourceEnumerator>,
    options: OrganizeOptions,
    events: broadcast::Sender<OrganizationEvent>,
}

impl OrganizationEngine {
    pub fn new(
        db: &Database,
        guard: Arc<InProgressGuard>,
        collaborators: EngineCollaborators,
        options: OrganizeOptions,
    ) -> Self {
        let smart_matches = db.smart_matches();
        let context = OrganizerContext {
            parser: collaborators.parser,
            resolver: collaborators.resolver,
            destinations: collaborators.destinations,
            file_ops: collaborators.file_ops.clone(),
            smart_matches: smart_matches.clone(),
        };
        let organizers = default_organizers(context)
            .into_iter()
            .map(|o| (o.organizer_type(), o))
            .collect();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            results: db.organization_results(guard.clone()),
            guard,
            smart_matches,
            organizers,
            file_ops: collaborators.file_ops,
            notifier: collaborators.notifier,
            sources: collaborators.sources,
            options,
            events,
        }
    }

    pub fn guard(&self) -> &Arc<InProgressGuard> {
        &self.guard
    }

    pub fn options(&self) -> &OrganizeOptions {
        &self.options
    }

    /// Subscribe to result and smart match changes
    pub fn subscribe(&self) -> broadcast::Receiver<OrganizationEvent> {
        self.events.subscribe()
    }

    fn broadcast(&self, event: OrganizationEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn acquire(&self, path: &str) -> Result<InProgressLease, OrganizeError> {
        self.guard
            .lease(result_id_for_path(path))
            .ok_or_else(|| OrganizeError::InProgress(path.to_string()))
    }

    fn organizer(&self, organizer_type: OrganizerType) -> Result<&Arc<dyn Organizer>, OrganizeError> {
        self.organizers.get(&organizer_type).ok_or_else(|| {
            OrganizeError::Configuration(format!("No organizer registered for {}", organizer_type))
        })
    }

    /// Organize, persist and (for corrections) learn. The caller holds the lease.
    ///
    /// Learning is best-effort: a storage error there is logged and the
    /// successful result is still returned.
    async fn organize_and_record(
        &self,
        source: &Path,
        organizer_type: OrganizerType,
        options: &OrganizeOptions,
        correction: Option<&Correction>,
    ) -> Result<OrganizeOutcome, OrganizeError> {
        let organizer = self.organizer(organizer_type)?;
        let request = OrganizeRequest {
            source,
            options,
            correction,
        };

        let mut outcome = match organizer.organize(request).await {
            Ok(outcome) => outcome,
            Err(e @ OrganizeError::Configuration(_)) => return Err(e),
            Err(e) => {
                error!(path = %source.display(), error = %e, "Unexpected error while organizing");
                let result = OrganizationResult::new(&source.to_string_lossy(), organizer_type)
                    .fail(format!("Unexpected error: {:#}", e));
                OrganizeOutcome {
                    result,
                    tokens: ParsedTokens::default(),
                    target: None,
                    match_source: None,
                }
            }
        };

        outcome.result = self.results.save(&outcome.result).await?;

        if outcome.result.status == OrganizationStatus::Success
            && outcome.match_source == Some(MatchSource::Correction)
            && let Some(target) = &outcome.target
        {
            if let Err(e) = self
                .learn(target.id.as_str(), &target.name, organizer_type, &outcome.tokens)
                .await
            {
                warn!(
                    target_id = %target.id,
                    error = %e,
                    "Failed to learn smart match from correction"
                );
            }
        }

        Ok(outcome)
    }

    /// Extend the smart match for a corrected target with the file's tokens
    async fn learn(
        &self,
        target_id: &str,
        item_name: &str,
        organizer_type: OrganizerType,
        tokens: &ParsedTokens,
    ) -> Result<(), OrganizeError> {
        let match_strings = tokens.match_tokens();
        if match_strings.is_empty() {
            debug!(target_id = %target_id, "No tokens to learn from correction");
            return Ok(());
        }

        let learned = self
            .smart_matches
            .save(UpsertSmartMatch {
                id: target_id.to_string(),
                item_name: item_name.to_string(),
                organizer_type,
                match_strings,
            })
            .await?;

        info!(
            target_id = %learned.id,
            tokens = learned.match_strings.len(),
            "Learned smart match from correction"
        );
        self.broadcast(OrganizationEvent::SmartMatchUpdated { id: learned.id });
        Ok(())
    }

    /// Publish the outcome once the guard is released
    fn finish(&self, outcome: OrganizeOutcome) -> OrganizationResult {
        let mut result = outcome.result;
        result.is_in_progress = self.guard.is_in_progress(&result.id);

        if result.status == OrganizationStatus::Success
            && let (Some(target), Some(path)) = (outcome.target, result.target_path.clone())
        {
            let notifier = self.notifier.clone();
            tokio::spawn(async move {
                notifier
                    .library_changed(&target.id, &PathBuf::from(path))
                    .await;
            });
        }

        self.broadcast(OrganizationEvent::ResultUpdated(result.clone()));
        result
    }

    /// Organize one file with the engine's options
    pub async fn process_one(
        &self,
        source: &Path,
        organizer_type: OrganizerType,
    ) -> Result<OrganizationResult, OrganizeError> {
        let options = self.options.clone();
        self.process_with(source, organizer_type, &options).await
    }

    async fn process_with(
        &self,
        source: &Path,
        organizer_type: OrganizerType,
        options: &OrganizeOptions,
    ) -> Result<OrganizationResult, OrganizeError> {
        let lease = self.acquire(&source.to_string_lossy())?;
        let outcome = self
            .organize_and_record(source, organizer_type, options, None)
            .await?;
        drop(lease);

        let result = self.finish(outcome);
        debug!(
            result_id = %result.id,
            path = %result.original_path,
            status = %result.status,
            "Processed file"
        );
        Ok(result)
    }

    /// Re-run a stored result's path, replacing a different file at the destination.
    ///
    /// `success` is final and returns [`OrganizeError::InvalidState`].
    pub async fn perform_organization(
        &self,
        result_id: &str,
    ) -> Result<OrganizationResult, OrganizeError> {
        let existing = self
            .results
            .get(result_id)
            .await?
            .ok_or_else(|| OrganizeError::ResultNotFound(result_id.to_string()))?;

        let lease = self.acquire(&existing.original_path)?;

        let current = self
            .results
            .get(result_id)
            .await?
            .ok_or_else(|| OrganizeError::ResultNotFound(result_id.to_string()))?;
        if !current.status.accepts_retry() {
            return Err(OrganizeError::InvalidState {
                id: current.id,
                status: current.status,
            });
        }

        let options = OrganizeOptions {
            overwrite_existing: true,
            ..self.options.clone()
        };

        info!(result_id = %result_id, path = %current.original_path, "Performing organization");
        let outcome = self
            .organize_and_record(
                Path::new(&current.original_path),
                current.organizer_type,
                &options,
                None,
            )
            .await?;
        drop(lease);

        Ok(self.finish(outcome))
    }

    /// Apply a user correction to a stored result and learn from it
    pub async fn submit_correction(
        &self,
        request: CorrectionRequest,
    ) -> Result<OrganizationResult, OrganizeError> {
        let existing = self
            .results
            .get(&request.result_id)
            .await?
            .ok_or_else(|| OrganizeError::ResultNotFound(request.result_id.clone()))?;

        if request.correction.organizer_type() != existing.organizer_type {
            return Err(OrganizeError::Configuration(format!(
                "Result '{}' is a {} and cannot take a {} correction",
                existing.id,
                existing.organizer_type,
                request.correction.organizer_type()
            )));
        }

        let lease = self.acquire(&existing.original_path)?;

        // Status may have changed while we were not holding the guard
        let current = self
            .results
            .get(&request.result_id)
            .await?
            .ok_or_else(|| OrganizeError::ResultNotFound(request.result_id.clone()))?;
        if !current.status.accepts_correction() {
            return Err(OrganizeError::InvalidState {
                id: current.id,
                status: current.status,
            });
        }

        let outcome = self
            .organize_and_record(
                Path::new(&current.original_path),
                current.organizer_type,
                &self.options,
                Some(&request.correction),
            )
            .await?;
        drop(lease);

        let result = self.finish(outcome);
        info!(
            result_id = %result.id,
            target_id = %request.correction.target_id(),
            status = %result.status,
            "Correction applied"
        );

        if result.status != OrganizationStatus::Success {
            return Err(OrganizeError::CorrectionFailed {
                status: result.status,
                message: result.status_message.clone().unwrap_or_default(),
            });
        }
        Ok(result)
    }

    /// Delete a result's source file (best-effort) and then its record
    pub async fn delete_original(&self, result_id: &str) -> Result<(), OrganizeError> {
        let existing = self
            .results
            .get(result_id)
            .await?
            .ok_or_else(|| OrganizeError::ResultNotFound(result_id.to_string()))?;

        {
            let _lease = self.acquire(&existing.original_path)?;
            let path = Path::new(&existing.original_path);
            match self.file_ops.delete(path).await {
                Ok(()) => info!(path = %path.display(), "Deleted original file"),
                Err(e) => warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to delete original file"
                ),
            }
        }

        self.results.delete(result_id).await?;
        self.broadcast(OrganizationEvent::ResultRemoved {
            id: result_id.to_string(),
        });
        Ok(())
    }

    /// Organize every candidate the source enumerator yields.
    ///
    /// Cancellation is checked between files, never during a transfer.
    pub async fn process_new_files(
        &self,
        scan: &ScanOptions,
        cancel: &CancellationToken,
    ) -> Result<ScanSummary, OrganizeError> {
        let mut summary = ScanSummary::default();
        let mut candidates = self.sources.enumerate(scan);

        info!("Starting scan for new files");

        while let Some(candidate) = candidates.next().await {
            if cancel.is_cancelled() {
                info!("Scan cancelled");
                summary.cancelled = true;
                break;
            }
            summary.scanned += 1;

            let path_str = candidate.path.to_string_lossy().to_string();
            match self.results.get_by_original_path(&path_str).await {
                Ok(Some(existing)) if existing.status.is_completed() => {
                    debug!(path = %path_str, status = %existing.status, "Already organized, skipping");
                    summary.already_organized += 1;
                    continue;
                }
                Ok(_) => {}
                Err(e) => warn!(path = %path_str, error = %e, "Failed to look up previous result"),
            }

            match self
                .process_one(&candidate.path, candidate.organizer_type)
                .await
            {
                Ok(result) => summary.record(result.status),
                Err(OrganizeError::InProgress(_)) => {
                    debug!(path = %path_str, "File is being processed elsewhere");
                    summary.contended += 1;
                }
                Err(e) => {
                    error!(path = %path_str, error = %e, "Failed to organize file");
                    summary.errors += 1;
                }
            }
        }

        if scan.delete_empty_folders && !summary.cancelled {
            for root in scan.watch_paths() {
                match cleanup_empty_folders(root).await {
                    Ok(removed) => summary.folders_removed += removed.len() as u64,
                    Err(e) => warn!(path = %root.display(), error = %e, "Failed to clean up folders"),
                }
            }
        }

        info!(
            scanned = summary.scanned,
            succeeded = summary.succeeded,
            failed = summary.failed,
            needs_correction = summary.needs_correction,
            skipped_existing = summary.skipped_existing,
            contended = summary.contended,
            cancelled = summary.cancelled,
            "Scan complete"
        );
        Ok(summary)
    }

    pub async fn get_result(&self, id: &str) -> Result<Option<OrganizationResult>, OrganizeError> {
        Ok(self.results.get(id).await?)
    }

    pub async fn get_result_by_path(
        &self,
        path: &str,
    ) -> Result<Option<OrganizationResult>, OrganizeError> {
        Ok(self.results.get_by_original_path(path).await?)
    }

    pub async fn query_results(
        &self,
        filter: &ResultFilter,
        page: Page,
    ) -> Result<PaginatedResults, OrganizeError> {
        Ok(self.results.list(filter, page).await?)
    }

    pub async fn delete_result(&self, id: &str) -> Result<bool, OrganizeError> {
        let deleted = self.results.delete(id).await?;
        if deleted {
            self.broadcast(OrganizationEvent::ResultRemoved { id: id.to_string() });
        }
        Ok(deleted)
    }

    /// Remove every result
    pub async fn clear_log(&self) -> Result<u64, OrganizeError> {
        let removed = self.results.delete_all().await?;
        info!(removed = removed, "Cleared organization log");
        self.broadcast(OrganizationEvent::LogCleared { removed });
        Ok(removed)
    }

    /// Remove success and skipped_existing results
    pub async fn clear_completed(&self) -> Result<u64, OrganizeError> {
        let removed = self.results.delete_completed().await?;
        info!(removed = removed, "Cleared completed results");
        self.broadcast(OrganizationEvent::LogCleared { removed });
        Ok(removed)
    }

    pub async fn get_smart_match(&self, id: &str) -> Result<Option<SmartMatch>, OrganizeError> {
        Ok(self.smart_matches.get(id).await?)
    }

    pub async fn list_smart_matches(
        &self,
        filter: &SmartMatchFilter,
        start_index: i64,
        limit: Option<i64>,
    ) -> Result<PaginatedSmartMatches, OrganizeError> {
        Ok(self.smart_matches.list(filter, start_index, limit).await?)
    }

    pub async fn delete_smart_match_entry(
        &self,
        id: &str,
        match_string: &str,
    ) -> Result<bool, OrganizeError> {
        let removed = self.smart_matches.delete_entry(id, match_string).await?;
        if removed {
            self.broadcast(OrganizationEvent::SmartMatchUpdated { id: id.to_string() });
        }
        Ok(removed)
    }

    pub async fn delete_smart_match(&self, id: &str) -> Result<bool, OrganizeError> {
        let removed = self.smart_matches.delete(id).await?;
        if removed {
            self.broadcast(OrganizationEvent::SmartMatchUpdated { id: id.to_string() });
        }
        Ok(removed)
    }
}

//! Organizers: turn a source path into a placement decision
//!
//! Both variants share one pipeline:
//! 1. parse tokens
//! 2. explicit correction, else smart match, else provider lookup
//! 3. unresolved: `needs_correction` (a name was found) or `failure`
//! 4. resolved: build the destination, handle duplicates and conflicts, transfer
//!
//! Organizers never touch the guard or the result store; the engine does.

pub mod episode;
pub mod movie;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::db::{OrganizationResult, OrganizerType, SmartMatchRepository};
use crate::error::OrganizeError;
use crate::services::collaborators::{
    DestinationBuilder, FileOps, MatchSource, PlacementInput, ResolvedTarget, TargetResolver,
    TokenParser, TransferMode,
};
use crate::services::filename_parser::ParsedTokens;

pub use episode::EpisodeOrganizer;
pub use movie::MovieOrganizer;

/// Per-run behaviour
#[derive(Debug, Clone, Default)]
pub struct OrganizeOptions {
    pub tv_library_path: Option<PathBuf>,
    pub movie_library_path: Option<PathBuf>,
    pub transfer_mode: TransferMode,
    /// Identical file already at the destination: record `skipped_existing`
    pub skip_duplicates: bool,
    /// Remove the source when it duplicates a library file
    pub delete_duplicate_source: bool,
    /// Replace a different file at the destination
    pub overwrite_existing: bool,
}

impl OrganizeOptions {
    pub fn library_root(&self, organizer_type: OrganizerType) -> Option<&Path> {
        match organizer_type {
            OrganizerType::Episode => self.tv_library_path.as_deref(),
            OrganizerType::Movie => self.movie_library_path.as_deref(),
        }
        .filter(|p| !p.as_os_str().is_empty())
    }
}

/// A user's answer to a `needs_correction` (or failed) result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Correction {
    Episode {
        target_id: String,
        season: u32,
        episode: u32,
        ending_episode: Option<u32>,
    },
    Movie {
        target_id: String,
    },
}

impl Correction {
    pub fn target_id(&self) -> &str {
        match self {
            Self::Episode { target_id, .. } | Self::Movie { target_id } => target_id,
        }
    }

    pub fn organizer_type(&self) -> OrganizerType {
        match self {
            Self::Episode { .. } => OrganizerType::Episode,
            Self::Movie { .. } => OrganizerType::Movie,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OrganizeRequest<'a> {
    pub source: &'a Path,
    pub options: &'a OrganizeOptions,
    pub correction: Option<&'a Correction>,
}

/// The result to persist plus what the engine needs to learn and notify
#[derive(Debug, Clone)]
pub struct OrganizeOutcome {
    pub result: OrganizationResult,
    pub tokens: ParsedTokens,
    pub target: Option<ResolvedTarget>,
    pub match_source: Option<MatchSource>,
}

impl OrganizeOutcome {
    fn unresolved(result: OrganizationResult, tokens: ParsedTokens) -> Self {
        Self {
            result,
            tokens,
            target: None,
            match_source: None,
        }
    }
}

#[async_trait]
pub trait Organizer: Send + Sync {
    fn organizer_type(&self) -> OrganizerType;

    async fn organize(&self, request: OrganizeRequest<'_>) -> Result<OrganizeOutcome, OrganizeError>;
}

/// Collaborators shared by both organizers
#[derive(Clone)]
pub struct OrganizerContext {
    pub parser: Arc<dyn TokenParser>,
    pub resolver: Arc<dyn TargetResolver>,
    pub destinations: Arc<dyn DestinationBuilder>,
    pub file_ops: Arc<dyn FileOps>,
    pub smart_matches: SmartMatchRepository,
}

impl OrganizerContext {
    /// Parse the source and start its record
    async fn begin(
        &self,
        source: &Path,
        organizer_type: OrganizerType,
    ) -> (ParsedTokens, OrganizationResult) {
        let tokens = self.parser.parse(source, organizer_type);
        let size = self.file_ops.file_size(source).await.unwrap_or(0);
        let result = OrganizationResult::new(&source.to_string_lossy(), organizer_type)
            .with_file_size(size);
        (tokens, result)
    }

    /// Correction, then smart match, then provider
    async fn lookup(
        &self,
        tokens: &ParsedTokens,
        organizer_type: OrganizerType,
        correction: Option<&Correction>,
    ) -> Result<Option<(ResolvedTarget, MatchSource)>, OrganizeError> {
        if let Some(correction) = correction {
            let target = self
                .resolver
                .target_by_id(correction.target_id(), organizer_type)
                .await?;
            return Ok(target.map(|t| (t, MatchSource::Correction)));
        }

        let match_tokens = tokens.match_tokens();
        if let Some(learned) = self
            .smart_matches
            .find_target_for_tokens(&match_tokens, organizer_type)
            .await?
        {
            match self.resolver.target_by_id(&learned.id, organizer_type).await? {
                Some(target) => {
                    debug!(target_id = %target.id, "Resolved from smart match");
                    return Ok(Some((target, MatchSource::SmartMatch)));
                }
                None => warn!(
                    target_id = %learned.id,
                    "Smart match points to an unknown target, ignoring"
                ),
            }
        }

        let target = self.resolver.resolve(tokens, organizer_type).await?;
        Ok(target.map(|t| (t, MatchSource::Provider)))
    }

    /// Resolve a target and place the file
    async fn run(
        &self,
        request: OrganizeRequest<'_>,
        organizer_type: OrganizerType,
        tokens: ParsedTokens,
        base: OrganizationResult,
    ) -> Result<OrganizeOutcome, OrganizeError> {
        let base = base.with_tokens(&tokens);

        let Some((target, match_source)) =
            self.lookup(&tokens, organizer_type, request.correction).await?
        else {
            let result = match (request.correction, tokens.name.as_deref()) {
                (Some(correction), _) => base.fail(format!(
                    "Correction target '{}' is unknown",
                    correction.target_id()
                )),
                (None, Some(name)) => {
                    base.needs_correction(format!("No library match found for '{}'", name))
                }
                (None, None) => base.fail("Could not extract a name from the file name"),
            };
            return Ok(OrganizeOutcome::unresolved(result, tokens));
        };

        let library_root = request.options.library_root(organizer_type).ok_or_else(|| {
            OrganizeError::Configuration(format!("No library path configured for {}", organizer_type))
        })?;

        let destination = self.destinations.build(PlacementInput {
            organizer_type,
            library_root,
            target: &target,
            tokens: &tokens,
            source: request.source,
        });

        let result = self.place(request, base, &destination).await;

        Ok(OrganizeOutcome {
            result,
            tokens,
            target: Some(target),
            match_source: Some(match_source),
        })
    }

    /// Duplicate/conflict handling and the transfer itself
    async fn place(
        &self,
        request: OrganizeRequest<'_>,
        base: OrganizationResult,
        destination: &Path,
    ) -> OrganizationResult {
        let source = request.source;
        let options = request.options;

        // Skip if already at the correct location
        if source == destination {
            debug!(path = %source.display(), "File already at correct location");
            return base.succeed(destination);
        }

        if self.file_ops.exists(destination).await {
            let identical = match self.file_ops.compare_content(source, destination).await {
                Ok(identical) => identical,
                Err(e) => {
                    return base.fail(format!("Failed to compare with existing file: {:#}", e));
                }
            };

            if identical && options.skip_duplicates {
                info!(
                    source = %source.display(),
                    existing = %destination.display(),
                    "Identical file already in library"
                );
                if options.delete_duplicate_source
                    && let Err(e) = self.file_ops.delete(source).await
                {
                    warn!(path = %source.display(), error = %e, "Failed to delete duplicate source file");
                }
                return base.skipped(destination, "Identical file already exists in the library");
            }

            if !identical && !options.overwrite_existing {
                warn!(
                    source = %source.display(),
                    existing = %destination.display(),
                    "Different file already exists at destination"
                );
                return base.conflict(
                    destination,
                    format!(
                        "A different file already exists at {}",
                        destination.display()
                    ),
                );
            }
        }

        match self
            .file_ops
            .transfer(source, destination, options.transfer_mode)
            .await
        {
            Ok(()) => {
                info!(
                    source = %source.display(),
                    destination = %destination.display(),
                    mode = options.transfer_mode.as_str(),
                    "Organized file"
                );
                base.succeed(destination)
            }
            Err(e) => {
                warn!(source = %source.display(), error = %e, "Failed to transfer file");
                base.fail(format!("Failed to transfer file: {:#}", e))
            }
        }
    }
}

/// Build both organizers over one context
pub fn default_organizers(context: OrganizerContext) -> Vec<Arc<dyn Organizer>> {
    let context = Arc::new(context);
    vec![
        Arc::new(EpisodeOrganizer::new(context.clone())),
        Arc::new(MovieOrganizer::new(context)),
    ]
}

//! Organization services

pub mod collaborators;
pub mod engine;
pub mod file_ops;
pub mod filename_parser;
pub mod in_progress;
pub mod library_index;
pub mod logging;
pub mod naming;
pub mod organizer;
pub mod sources;

pub use collaborators::{
    DestinationBuilder, FileOps, LibraryNotifier, LoggingNotifier, MatchSource, ResolvedTarget,
    ScanOptions, SourceCandidate, SourceEnumerator, TargetResolver, TokenParser, TransferMode,
};
pub use engine::{CorrectionRequest, EngineCollaborators, OrganizationEngine, OrganizationEvent};
pub use file_ops::LocalFileOps;
pub use filename_parser::{ParsedTokens, SceneNameParser};
pub use in_progress::{InProgressGuard, InProgressLease};
pub use library_index::LibraryFolderResolver;
pub use naming::NamingPatternBuilder;
pub use organizer::{Correction, OrganizeOptions, Organizer};
pub use sources::WatchFolderEnumerator;

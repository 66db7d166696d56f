//! Librarian Organizer - moves downloaded media into the library
//!
//! Wires configuration, tracing and the SQLite database into an
//! [`OrganizationEngine`] and runs one CLI command against it.

mod cli;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use librarian_organizer::config::Config;
use librarian_organizer::db::Database;
use librarian_organizer::services::collaborators::LoggingNotifier;
use librarian_organizer::services::engine::{EngineCollaborators, OrganizationEngine};
use librarian_organizer::services::file_ops::LocalFileOps;
use librarian_organizer::services::filename_parser::SceneNameParser;
use librarian_organizer::services::in_progress::InProgressGuard;
use librarian_organizer::services::library_index::LibraryFolderResolver;
use librarian_organizer::services::logging::init_tracing;
use librarian_organizer::services::naming::NamingPatternBuilder;
use librarian_organizer::services::sources::WatchFolderEnumerator;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    init_tracing(config.log_format, cli.verbose);
    tracing::debug!(database = %config.database_url, "Configuration loaded");

    if !config.database_url.starts_with("sqlite:")
        && let Some(parent) = Path::new(&config.database_url).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let db = Database::connect_with_retry(&config.database_url, Duration::from_secs(10)).await?;
    db.migrate().await?;
    tracing::debug!("Database ready");

    let collaborators = EngineCollaborators {
        parser: Arc::new(SceneNameParser),
        resolver: Arc::new(
            LibraryFolderResolver::new(
                config.tv_library_path.clone(),
                config.movie_library_path.clone(),
            )
            .with_new_targets(config.allow_new_targets),
        ),
        destinations: Arc::new(NamingPatternBuilder::new(
            config.episode_naming_pattern.clone(),
            config.movie_naming_pattern.clone(),
            config.season_zero_folder.clone(),
        )),
        file_ops: Arc::new(LocalFileOps::new()),
        notifier: Arc::new(LoggingNotifier),
        sources: Arc::new(WatchFolderEnumerator),
    };

    let engine = OrganizationEngine::new(
        &db,
        Arc::new(InProgressGuard::new()),
        collaborators,
        config.organize_options(),
    );

    cli::run(cli.command, &engine, &config).await
}

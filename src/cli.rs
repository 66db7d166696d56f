//! Command line surface over the organization engine.
//!
//! Every command prints JSON on stdout; logs go to stderr.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use librarian_organizer::config::Config;
use librarian_organizer::db::{OrganizationStatus, OrganizerType, Page, ResultFilter, SmartMatchFilter};
use librarian_organizer::services::engine::{CorrectionRequest, OrganizationEngine};
use librarian_organizer::services::organizer::Correction;

#[derive(Parser)]
#[command(name = "librarian-organizer")]
#[command(about = "Organize downloaded episodes and movies into a media library", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Debug logging (ignored when RUST_LOG is set)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum TypeArg {
    Episode,
    Movie,
}

impl From<TypeArg> for OrganizerType {
    fn from(value: TypeArg) -> Self {
        match value {
            TypeArg::Episode => OrganizerType::Episode,
            TypeArg::Movie => OrganizerType::Movie,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum StatusArg {
    Success,
    Failure,
    SkippedExisting,
    NeedsCorrection,
}

impl From<StatusArg> for OrganizationStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Success => OrganizationStatus::Success,
            StatusArg::Failure => OrganizationStatus::Failure,
            StatusArg::SkippedExisting => OrganizationStatus::SkippedExisting,
            StatusArg::NeedsCorrection => OrganizationStatus::NeedsCorrection,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan the watch folders and organize new files (Ctrl-C stops between files)
    Scan,

    /// Organize a single file
    Organize {
        path: PathBuf,
        #[arg(long = "type", value_enum, default_value = "episode")]
        organizer_type: TypeArg,
    },

    /// Query the organization log
    Results {
        /// Repeat to match several statuses
        #[arg(long, value_enum)]
        status: Vec<StatusArg>,
        #[arg(long = "type", value_enum)]
        organizer_type: Option<TypeArg>,
        /// Substring of the original path
        #[arg(long)]
        path: Option<String>,
        #[arg(long, default_value_t = 0)]
        start: i64,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },

    /// Show one result
    Result { id: String },

    /// Show the result for a source path
    ResultByPath { path: String },

    /// Re-run a result, replacing a different file at the destination
    Perform { id: String },

    /// Correct an episode result
    CorrectEpisode {
        id: String,
        /// Target series id (e.g. "episode:Chicago Fire (2012)")
        #[arg(long)]
        target: String,
        #[arg(long)]
        season: u32,
        #[arg(long)]
        episode: u32,
        #[arg(long)]
        ending_episode: Option<u32>,
    },

    /// Correct a movie result
    CorrectMovie {
        id: String,
        /// Target movie id (e.g. "movie:Heat (1995)")
        #[arg(long)]
        target: String,
    },

    /// Delete a result's source file and its record
    DeleteOriginal { id: String },

    /// Remove every result
    ClearLog,

    /// Remove success and skipped results
    ClearCompleted,

    /// List learned smart matches
    SmartMatches {
        #[arg(long = "type", value_enum)]
        organizer_type: Option<TypeArg>,
        /// Substring of the item name
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value_t = 0)]
        start: i64,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },

    /// Delete a smart match, or one token of it
    DeleteSmartMatch {
        id: String,
        #[arg(long)]
        token: Option<String>,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn run(command: Commands, engine: &OrganizationEngine, config: &Config) -> Result<()> {
    match command {
        Commands::Scan => {
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_signal.cancel();
                }
            });

            let summary = engine
                .process_new_files(&config.scan_options(), &cancel)
                .await?;
            print_json(&summary)
        }
        Commands::Organize {
            path,
            organizer_type,
        } => {
            let result = engine.process_one(&path, organizer_type.into()).await?;
            print_json(&result)
        }
        Commands::Results {
            status,
            organizer_type,
            path,
            start,
            limit,
        } => {
            let filter = ResultFilter {
                statuses: status.into_iter().map(Into::into).collect(),
                organizer_type: organizer_type.map(Into::into),
                path_contains: path,
            };
            let page = engine
                .query_results(&filter, Page::new(start, limit))
                .await?;
            print_json(&page)
        }
        Commands::Result { id } => {
            let result = engine.get_result(&id).await?;
            print_json(&result)
        }
        Commands::ResultByPath { path } => {
            let result = engine.get_result_by_path(&path).await?;
            print_json(&result)
        }
        Commands::Perform { id } => {
            let result = engine.perform_organization(&id).await?;
            print_json(&result)
        }
        Commands::CorrectEpisode {
            id,
            target,
            season,
            episode,
            ending_episode,
        } => {
            let result = engine
                .submit_correction(CorrectionRequest {
                    result_id: id,
                    correction: Correction::Episode {
                        target_id: target,
                        season,
                        episode,
                        ending_episode,
                    },
                })
                .await?;
            print_json(&result)
        }
        Commands::CorrectMovie { id, target } => {
            let result = engine
                .submit_correction(CorrectionRequest {
                    result_id: id,
                    correction: Correction::Movie { target_id: target },
                })
                .await?;
            print_json(&result)
        }
        Commands::DeleteOriginal { id } => {
            engine.delete_original(&id).await?;
            print_json(&serde_json::json!({ "deleted": id }))
        }
        Commands::ClearLog => {
            let removed = engine.clear_log().await?;
            print_json(&serde_json::json!({ "removed": removed }))
        }
        Commands::ClearCompleted => {
            let removed = engine.clear_completed().await?;
            print_json(&serde_json::json!({ "removed": removed }))
        }
        Commands::SmartMatches {
            organizer_type,
            name,
            start,
            limit,
        } => {
            let filter = SmartMatchFilter {
                organizer_type: organizer_type.map(Into::into),
                name_contains: name,
            };
            let page = engine
                .list_smart_matches(&filter, start, Some(limit))
                .await?;
            print_json(&page)
        }
        Commands::DeleteSmartMatch { id, token } => {
            let removed = match token {
                Some(token) => engine.delete_smart_match_entry(&id, &token).await?,
                None => engine.delete_smart_match(&id).await?,
            };
            print_json(&serde_json::json!({ "removed": removed }))
        }
    }
}

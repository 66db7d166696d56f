//! Destination naming patterns
//!
//! Supported variables:
//! - `{show}` - Series name (episodes) / `{title}` - Movie title
//! - `{year}` - Target year, falling back to the parsed year
//! - `{season}`, `{season:02}` - Season number, raw or zero-padded
//! - `{episode}`, `{episode:02}` - Episode number, raw or zero-padded
//! - `{ending_episode:02}` - `-E06` for multi-episode files, empty otherwise
//! - `{ext}` - Source extension without the dot
//! - `{original}` - Source file name without extension
//!
//! A directory component that references `{season}` is replaced by the
//! season-zero folder name (e.g. "Specials") for season 0.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::db::OrganizerType;
use crate::services::collaborators::{DestinationBuilder, PlacementInput};

pub const DEFAULT_EPISODE_NAMING_PATTERN: &str =
    "{show}/Season {season:02}/{show} - S{season:02}E{episode:02}{ending_episode:02}.{ext}";

pub const DEFAULT_MOVIE_NAMING_PATTERN: &str = "{title} ({year})/{title} ({year}).{ext}";

pub const DEFAULT_SEASON_ZERO_FOLDER: &str = "Specials";

static SEASON_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{season(?::(\d+))?\}").unwrap());
static EPISODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{episode(?::(\d+))?\}").unwrap());
static ENDING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{ending_episode(?::(\d+))?\}").unwrap());

fn sanitize_for_filename(name: &str) -> String {
    sanitize_filename::sanitize(name)
}

fn pad(value: u32, caps: &Captures) -> String {
    match caps.get(1) {
        Some(width) => {
            let w: usize = width.as_str().parse().unwrap_or(2);
            format!("{:0>width$}", value, width = w)
        }
        None => value.to_string(),
    }
}

/// Values substituted into a pattern
#[derive(Debug, Clone, Default)]
struct PatternValues {
    show: String,
    title: String,
    year: String,
    season: u32,
    episode: u32,
    ending_episode: Option<u32>,
    ext: String,
    original: String,
}

fn apply_component(component: &str, values: &PatternValues) -> String {
    let mut result = component.to_string();

    result = result.replace("{show}", &values.show);
    result = result.replace("{title}", &values.title);
    result = result.replace("{year}", &values.year);
    result = result.replace("{ext}", &values.ext);
    result = result.replace("{original}", &values.original);

    result = SEASON_RE
        .replace_all(&result, |caps: &Captures| pad(values.season, caps))
        .to_string();
    result = EPISODE_RE
        .replace_all(&result, |caps: &Captures| pad(values.episode, caps))
        .to_string();
    result = ENDING_RE
        .replace_all(&result, |caps: &Captures| match values.ending_episode {
            Some(end) => format!("-E{}", pad(end, caps)),
            None => String::new(),
        })
        .to_string();

    // Empty year leaves "Title ()" behind
    result.replace(" ()", "").trim().to_string()
}

/// Apply `pattern` one path component at a time
fn apply_pattern(pattern: &str, values: &PatternValues, season_zero_folder: &str) -> PathBuf {
    let components: Vec<&str> = pattern.split('/').filter(|c| !c.is_empty()).collect();
    let last = components.len().saturating_sub(1);

    components
        .iter()
        .enumerate()
        .map(|(i, component)| {
            if i < last && values.season == 0 && SEASON_RE.is_match(component) {
                season_zero_folder.to_string()
            } else {
                apply_component(component, values)
            }
        })
        .collect()
}

/// [`DestinationBuilder`] driven by configurable naming patterns
#[derive(Debug, Clone)]
pub struct NamingPatternBuilder {
    pub episode_pattern: String,
    pub movie_pattern: String,
    pub season_zero_folder: String,
}

impl Default for NamingPatternBuilder {
    fn default() -> Self {
        Self {
            episode_pattern: DEFAULT_EPISODE_NAMING_PATTERN.to_string(),
            movie_pattern: DEFAULT_MOVIE_NAMING_PATTERN.to_string(),
            season_zero_folder: DEFAULT_SEASON_ZERO_FOLDER.to_string(),
        }
    }
}

impl NamingPatternBuilder {
    pub fn new(
        episode_pattern: Option<String>,
        movie_pattern: Option<String>,
        season_zero_folder: Option<String>,
    ) -> Self {
        let defaults = Self::default();
        Self {
            episode_pattern: episode_pattern
                .filter(|p| !p.trim().is_empty())
                .unwrap_or(defaults.episode_pattern),
            movie_pattern: movie_pattern
                .filter(|p| !p.trim().is_empty())
                .unwrap_or(defaults.movie_pattern),
            season_zero_folder: season_zero_folder
                .filter(|p| !p.trim().is_empty())
                .unwrap_or(defaults.season_zero_folder),
        }
    }
}

impl DestinationBuilder for NamingPatternBuilder {
    fn build(&self, input: PlacementInput<'_>) -> PathBuf {
        let source: &Path = input.source;
        let ext = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mkv")
            .to_string();
        let original = source
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let name = sanitize_for_filename(&input.target.name);
        let year = input
            .target
            .year
            .or(input.tokens.year)
            .map(|y| y.to_string())
            .unwrap_or_default();

        let (pattern, values) = match input.organizer_type {
            OrganizerType::Episode => {
                let episode = input.tokens.episode.unwrap_or_default();
                (
                    &self.episode_pattern,
                    PatternValues {
                        show: name,
                        title: format!("Episode {}", episode),
                        year,
                        season: input.tokens.season.unwrap_or_default(),
                        episode,
                        ending_episode: input.tokens.ending_episode,
                        ext,
                        original,
                    },
                )
            }
            OrganizerType::Movie => (
                &self.movie_pattern,
                PatternValues {
                    show: name.clone(),
                    title: name,
                    year,
                    // Movies never live in a season folder
                    season: 1,
                    ext,
                    original,
                    ..Default::default()
                },
            ),
        };

        // Series that already have a library folder keep it
        let relative = apply_pattern(pattern, &values, &self.season_zero_folder);
        match (&input.target.path, input.organizer_type) {
            (Some(existing), OrganizerType::Episode) if relative.components().count() > 1 => {
                let mut components = relative.components();
                components.next();
                existing.join(components.as_path())
            }
            _ => input.library_root.join(relative),
        }
    }
}

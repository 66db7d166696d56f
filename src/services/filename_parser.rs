//! Filename parser for scene-style release names
//!
//! Extracts the tokens the organizers need from a source path:
//! - Episodes: "Chicago Fire S14E08 1080p WEB h264-ETHEL", "Show.1x02.mkv",
//!   "Show/Season 1/S01E02E03.mkv" (series taken from the folder)
//! - Movies: "The.Matrix.1999.1080p.BluRay.x264-GRP", "Heat (1995).mkv"

use std::path::{Component, Path};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::OrganizerType;
use crate::services::collaborators::TokenParser;

/// Tokens extracted from a source path
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedTokens {
    /// Series name or movie title
    pub name: Option<String>,
    pub year: Option<i32>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    /// Last episode of a multi-episode file (S01E01E02)
    pub ending_episode: Option<u32>,
}

impl ParsedTokens {
    /// Raw tokens that identify the target for smart matching
    pub fn match_tokens(&self) -> Vec<String> {
        self.name.iter().cloned().collect()
    }

    pub fn has_episode_numbers(&self) -> bool {
        self.season.is_some() && self.episode.is_some()
    }
}

static SXXEXX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(.*?)\s*\bS(\d{1,2})\s*E(\d{1,3})(?:\s*-?\s*E(\d{1,3}))?\b").unwrap()
});
static NXNN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(.*?)\s*\b(\d{1,2})x(\d{2,3})\b").unwrap());
static VERBOSE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(.*?)\s*Season\s*(\d+).*?Episode\s*(\d+)").unwrap());
static SEASON_FOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(season\s*\d+|s\d{1,2}|specials)$").unwrap());
static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(19\d{2}|20\d{2})\b").unwrap());
static TRAILING_YEAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\(?(19\d{2}|20\d{2})\)?\s*$").unwrap());
static QUALITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(2160p|1080p|720p|480p|4k|uhd|bluray|blu ray|bdrip|brrip|web dl|webdl|webrip|web|hdtv|dvdrip|x264|x265|h 264|h 265|hevc|remux|proper|repack)\b",
    )
    .unwrap()
});
static BRACKETS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[^\]]*\]").unwrap());
static SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static SUFFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s*\b(US|UK|AU|NZ)\s*$").unwrap());
static SPECIAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9\s]").unwrap());

/// File stem with separators turned into spaces and bracketed tags removed
fn clean_stem(name: &str) -> String {
    let without_brackets = BRACKETS_RE.replace_all(name, " ");
    let spaced = without_brackets.replace(['.', '_'], " ");
    SPACE_RE.replace_all(&spaced, " ").trim().to_string()
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

/// Parent folder names, nearest first, skipping season folders
fn meaningful_parents(path: &Path) -> impl Iterator<Item = String> + '_ {
    path.parent()
        .into_iter()
        .flat_map(|p| p.components().rev())
        .filter_map(|c| match c {
            Component::Normal(name) => name.to_str().map(str::to_string),
            _ => None,
        })
        .filter(|name| !SEASON_FOLDER_RE.is_match(name.trim()))
}

/// Split "Show Name (2019)" into name and year
fn split_name_year(raw: &str) -> (Option<String>, Option<i32>) {
    let cleaned = clean_stem(raw);
    let year = TRAILING_YEAR_RE
        .captures(&cleaned)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok());
    let name = clean_show_name(&cleaned);
    ((!name.is_empty()).then_some(name), year)
}

/// Parse a path to extract episode information
pub fn parse_episode(path: &Path) -> ParsedTokens {
    let stem = stem_of(path);
    let cleaned = clean_stem(&stem);
    let mut result = ParsedTokens::default();

    let captured = SXXEXX_RE
        .captures(&cleaned)
        .or_else(|| NXNN_RE.captures(&cleaned))
        .or_else(|| VERBOSE_RE.captures(&cleaned));

    if let Some(caps) = captured {
        let (name, year) = split_name_year(caps.get(1).map(|m| m.as_str()).unwrap_or_default());
        result.name = name;
        result.year = year;
        result.season = caps.get(2).and_then(|m| m.as_str().parse().ok());
        result.episode = caps.get(3).and_then(|m| m.as_str().parse().ok());
        result.ending_episode = caps
            .get(4)
            .and_then(|m| m.as_str().parse().ok())
            .filter(|end| Some(*end) > result.episode);
    } else {
        // No episode markers; keep the best guess at a name for manual correction
        let (name, year) = split_name_year(&strip_quality(&cleaned));
        result.name = name;
        result.year = year;
    }

    // "Show/Season 1/S01E02.mkv" carries the series only in the folder
    if result.name.is_none()
        && let Some(folder) = meaningful_parents(path).next()
    {
        let (name, year) = split_name_year(&folder);
        result.name = name;
        result.year = result.year.or(year);
    }

    debug!(
        path = %path.display(),
        show = ?result.name,
        season = ?result.season,
        episode = ?result.episode,
        ending_episode = ?result.ending_episode,
        "Parsed episode filename"
    );

    result
}

/// Parse a path to extract movie title and year
pub fn parse_movie(path: &Path) -> ParsedTokens {
    let mut result = parse_movie_name(&stem_of(path));

    if result.name.is_none() || result.year.is_none() {
        if let Some(folder) = meaningful_parents(path).next() {
            let from_folder = parse_movie_name(&folder);
            if result.name.is_none() {
                result.name = from_folder.name;
            }
            if result.year.is_none() {
                result.year = from_folder.year;
            }
        }
    }

    debug!(
        path = %path.display(),
        title = ?result.name,
        year = ?result.year,
        "Parsed movie filename"
    );

    result
}

fn parse_movie_name(raw: &str) -> ParsedTokens {
    let cleaned = clean_stem(raw).replace(['(', ')'], " ");
    let cleaned = SPACE_RE.replace_all(&cleaned, " ").trim().to_string();
    let mut result = ParsedTokens::default();

    // The release year is the first year that is not the start of the title ("2012 2009")
    let year_match = YEAR_RE.find_iter(&cleaned).find(|m| m.start() > 0);

    let title_part = match year_match {
        Some(m) => {
            result.year = m.as_str().parse().ok();
            &cleaned[..m.start()]
        }
        None => cleaned.as_str(),
    };

    let title = strip_quality(title_part)
        .trim_end_matches(['-', ' '])
        .trim()
        .to_string();
    if !title.is_empty() {
        result.name = Some(title);
    }

    result
}

/// Cut everything from the first quality/release tag onwards
fn strip_quality(s: &str) -> String {
    match QUALITY_RE.find(s) {
        Some(m) => s[..m.start()].trim().to_string(),
        None => s.trim().to_string(),
    }
}

/// Clean up the show name
fn clean_show_name(name: &str) -> String {
    let mut cleaned = name.trim().trim_end_matches(['-', ' ']).to_string();

    // Year is extracted separately
    cleaned = TRAILING_YEAR_RE.replace(&cleaned, "").to_string();
    cleaned = SUFFIX_RE.replace(&cleaned, "").to_string();
    cleaned = SPACE_RE.replace_all(&cleaned, " ").to_string();

    cleaned.trim().to_string()
}

/// Normalize a show or movie name for fuzzy comparison
pub fn normalize_show_name(name: &str) -> String {
    let mut normalized = name.to_lowercase();

    for article in ["the ", "a ", "an "] {
        if let Some(rest) = normalized.strip_prefix(article) {
            normalized = rest.to_string();
        }
    }

    normalized = normalized.replace('&', "and");
    normalized = SPECIAL_RE.replace_all(&normalized, "").to_string();
    normalized = SPACE_RE.replace_all(&normalized, " ").to_string();

    normalized.trim().to_string()
}

/// Similarity between two show names (0.0 to 1.0)
pub fn show_name_similarity(name1: &str, name2: &str) -> f64 {
    let n1 = normalize_show_name(name1);
    let n2 = normalize_show_name(name2);

    if n1 == n2 {
        return 1.0;
    }

    strsim::normalized_levenshtein(&n1, &n2)
}

/// Default [`TokenParser`]: scene-style release names
#[derive(Debug, Default, Clone)]
pub struct SceneNameParser;

impl TokenParser for SceneNameParser {
    fn parse(&self, path: &Path, organizer_type: OrganizerType) -> ParsedTokens {
        match organizer_type {
            OrganizerType::Episode => parse_episode(path),
            OrganizerType::Movie => parse_movie(path),
        }
    }
}

//! Librarian Organizer
//!
//! Auto-organize engine for downloaded media: places episodes and movies into
//! the library layout, records every attempt in SQLite, and learns from user
//! corrections.

pub mod config;
pub mod db;
pub mod error;
pub mod services;

pub use error::OrganizeError;
pub use services::engine::{
    CorrectionRequest, EngineCollaborators, OrganizationEngine, OrganizationEvent, ScanSummary,
};

//! audiocrawl - audio lesson discovery, retrieval and archiving.
//!
//! Crawls a content site for pages carrying audio files, extracts their
//! metadata, retrieves the files over an authenticated session and publishes
//! them to an object store together with search-ready metadata documents.

pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod models;
pub mod scrapers;
pub mod services;

pub use context::{RunContext, RunEvent};
pub use error::{HarvestError, Result};

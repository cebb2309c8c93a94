//! Shared types, error model, and configuration for regenrich.
//!
//! This crate is the foundation depended on by all other regenrich crates.
//! It provides:
//! - [`EnrichError`], the unified error type
//! - Domain types ([`Identifier`], [`Record`], [`Row`], [`Table`])
//! - Configuration ([`AppConfig`], [`BatchConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    ApiConfig, AppConfig, BatchConfig, BatchSection, CacheConfig, ColumnLabels, SheetConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from, resolve_api_key,
};
pub use error::{EnrichError, Result};
pub use types::{Identifier, Record, Row, Table};

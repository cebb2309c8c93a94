//! Batch enrichment pipeline for regenrich.
//!
//! This crate ties together identifier extraction, cache deduplication,
//! wave-scheduled registry lookups, and report merging into one end-to-end
//! run (see [`pipeline::run_pipeline`]).

pub mod batch;
pub mod extract;
pub mod merge;
pub mod pipeline;

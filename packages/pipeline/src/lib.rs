//! IPO filing ingestion pipeline.
//!
//! Consumes canonical filing records from the EDGAR adapters, deduplicates
//! them across two tiers, and drives the per-filer lifecycle:
//!
//! ```text
//! UNTRACKED ──confirmed S-1/F-1──► TRACKED ──424B1/424B4──► COMPLETED
//!                                     │
//!                                     └────────RW──────────► (removed)
//! ```
//!
//! Storage, logo materialization, AI analysis, and the public snapshot
//! export sit behind trait seams so the engine is testable with mocks.

pub mod config;
pub mod dedup;
pub mod engine;
pub mod runs;
pub mod services;
pub mod storage;

pub use config::Config;
pub use engine::{Engine, EngineConfig, RunSummary};
pub use runs::Pipeline;

//! Sync Engine
//!
//! The [`FileStore`] orchestrator plus the picker ingestion helpers it uses.

pub mod engine;
pub mod ingest;

pub use engine::{FileStore, SyncState};
pub use ingest::{IngestReport, UNFILED_ID};

//! drivecache - local-first file tree and blob cache
//!
//! Mirrors a remote drive (Graph-style hierarchical or picker-ingest) into a
//! local store, serves reads from it when offline and keeps per-backend
//! credentials alive.

pub mod cache;
pub mod config;
pub mod drive;
pub mod error;
pub mod notice;
pub mod sync;
pub mod tags;

#[cfg(test)]
mod testing;

pub use cache::{DiskStore, LocalStore, MemoryStore};
pub use config::{AppConfig, BackendKind, DriveConfig};
pub use drive::{FileEntry, RemoteDrive};
pub use error::{CacheError, CacheResult};
pub use notice::{Notice, Notices};
pub use sync::{FileStore, SyncState};

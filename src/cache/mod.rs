//! Local Cache Store
//!
//! Durable keyed persistence for file entries, root markers and blobs.
//! The disk engine keeps a Moka entry cache in front of its JSON records.

pub mod disk;
pub mod memory;
pub mod metadata;
pub mod store;

pub use disk::DiskStore;
pub use memory::MemoryStore;
pub use metadata::EntryCache;
pub use store::{LocalStore, Record, RootMarker, StorageError, StoreExt, StoreResult, Table};

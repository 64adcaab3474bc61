//! World model storage.
//!
//! [`WorldModelStorage`] is the contract every backend implements. The one
//! shipped backend, [`GraphWorldModel`], keeps entities and relationships in
//! the embedded property graph and can mirror each write into SQLite.
//! [`initialize`] builds a backend from a [`StorageConfig`];
//! [`StorageManager`] owns the live one.

pub(crate) mod codec;
mod config;
mod graph;
mod lifecycle;
pub(crate) mod mapping;
#[cfg(feature = "sqlite-mirror")]
mod sqlite_mirror;
mod sync;
mod traits;

pub use codec::SCHEMA_VERSION;
pub use config::{Credentials, MirrorConfig, MirrorLocation, StorageConfig, StorageMode};
pub use graph::GraphWorldModel;
pub use lifecycle::{initialize, StorageManager};
#[cfg(feature = "sqlite-mirror")]
pub use sqlite_mirror::SqliteMirror;
pub use sync::{
    ConsistencyWarning, MirrorError, MirrorRecord, MirrorSink, MirrorStatus, MirrorSync,
};
pub use traits::{
    ExportSummary, ImportMode, ImportSummary, TransferOptions, TransferPhase, TransferProgress,
    WorldModelStorage, Written,
};

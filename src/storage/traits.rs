//! The storage contract every backend implements.
//!
//! By programming against [`WorldModelStorage`] producers and consumers stay
//! independent of where the graph lives:
//! - in-memory graphs for tests and one-off runs
//! - durable graph directories for accumulation across runs
//! - future polyglot backends

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::annotation::Annotation;
use crate::entity::{Entity, EntityId, NewEntity};
use crate::error::{WorldModelError, WorldModelResult};
use crate::query::{EntityCursor, EntityFilter, GraphStatistics};
use crate::relationship::{Direction, NewRelationship, Relationship, RelationshipId};
use crate::storage::config::StorageMode;
use crate::storage::sync::{ConsistencyWarning, MirrorStatus};

/// Result of a write: the value plus what happened to its mirror copy.
///
/// # Examples
///
/// ```
/// use worldmodel::{initialize, NewEntity, StorageConfig};
///
/// let storage = initialize(&StorageConfig::in_memory()).unwrap();
/// let written = storage.add_entity(NewEntity::new("Paper")).unwrap();
/// assert!(!written.is_degraded());
/// let id = written.into_value();
/// assert!(storage.get_entity(&id).unwrap().is_some());
/// ```
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub struct Written<T> {
    value: T,
    mirror: MirrorStatus,
}

impl<T> Written<T> {
    pub fn new(value: T, mirror: MirrorStatus) -> Self {
        Self { value, mirror }
    }

    pub const fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub const fn mirror(&self) -> &MirrorStatus {
        &self.mirror
    }

    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        self.mirror.is_degraded()
    }

    #[must_use]
    pub const fn warning(&self) -> Option<&ConsistencyWarning> {
        self.mirror.warning()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Written<U> {
        Written {
            value: f(self.value),
            mirror: self.mirror,
        }
    }
}

/// How an import treats the existing graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    /// Wipe the graph, then load the document.
    Replace,
    /// Keep the graph and add what is new. Existing ids win.
    Merge,
}

/// Direction of a bulk transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferPhase {
    Export,
    Import,
}

/// Progress event sent after every batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferProgress {
    pub phase: TransferPhase,
    /// Records (entities, relationships and annotations) handled so far.
    pub records_done: u64,
    pub records_total: u64,
}

/// Tuning for export and import.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Records per batch. Bounds the memory used while streaming.
    pub batch_size: usize,
    /// Receives a [`TransferProgress`] after every batch. Events are dropped
    /// if the receiver is gone.
    pub progress: Option<Sender<TransferProgress>>,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            progress: None,
        }
    }
}

impl TransferOptions {
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Sender<TransferProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Batch size actually used; a zero field counts as one.
    pub(crate) fn batch(&self) -> usize {
        self.batch_size.max(1)
    }

    pub(crate) fn report(&self, phase: TransferPhase, records_done: u64, records_total: u64) {
        if let Some(progress) = &self.progress {
            let _ = progress.try_send(TransferProgress {
                phase,
                records_done,
                records_total,
            });
        }
    }
}

/// What an export wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSummary {
    pub entity_count: u64,
    pub relationship_count: u64,
    pub annotation_count: u64,
}

/// What an import changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub mode: ImportMode,
    pub entities_added: u64,
    pub relationships_added: u64,
    pub annotations_added: u64,
    /// Merge only: records whose id already existed.
    pub entities_skipped: u64,
    pub relationships_skipped: u64,
    /// Merge only: annotations already present on their target.
    pub annotations_skipped: u64,
}

impl ImportSummary {
    pub(crate) const fn empty(mode: ImportMode) -> Self {
        Self {
            mode,
            entities_added: 0,
            relationships_added: 0,
            annotations_added: 0,
            entities_skipped: 0,
            relationships_skipped: 0,
            annotations_skipped: 0,
        }
    }
}

/// Storage contract for the world model.
///
/// Implementations must be safe to share across threads. Every mutation is
/// atomic: it either fully applies or leaves the store unchanged. After
/// [`close`](Self::close) every other operation fails with
/// [`WorldModelError::Closed`].
pub trait WorldModelStorage: Send + Sync {
    /// Backend variant of this instance.
    fn mode(&self) -> StorageMode;

    /// Adds an entity, or overwrites the one with the same id.
    ///
    /// An overwrite keeps the original provenance and records the prior
    /// state as an annotation authored by the new writer.
    ///
    /// # Errors
    /// `WorldModelError::Validation` for a malformed draft.
    fn add_entity(&self, entity: NewEntity) -> WorldModelResult<Written<EntityId>>;

    /// # Errors
    /// `WorldModelError::Closed` or a backend error.
    fn get_entity(&self, id: &EntityId) -> WorldModelResult<Option<Entity>>;

    /// Adds a relationship between two existing entities.
    ///
    /// # Errors
    /// - `WorldModelError::Reference` if either endpoint is unknown
    /// - `WorldModelError::Validation` for a malformed draft or a reused id
    fn add_relationship(
        &self,
        relationship: NewRelationship,
    ) -> WorldModelResult<Written<RelationshipId>>;

    /// # Errors
    /// `WorldModelError::Closed` or a backend error.
    fn get_relationship(&self, id: &RelationshipId) -> WorldModelResult<Option<Relationship>>;

    /// Relationships touching an entity, ordered by id.
    ///
    /// # Errors
    /// `WorldModelError::Reference` if the entity is unknown.
    fn relationships_of(
        &self,
        id: &EntityId,
        direction: Direction,
    ) -> WorldModelResult<Vec<Relationship>>;

    /// Appends an annotation to an entity or relationship. Annotating an
    /// entity moves its `updated_at` forward.
    ///
    /// # Errors
    /// - `WorldModelError::Reference` if nothing has id `target`
    /// - `WorldModelError::Validation` for an empty author or text
    fn annotate(
        &self,
        target: &str,
        author: &str,
        text: &str,
    ) -> WorldModelResult<Written<Annotation>>;

    /// Marks an entity verified and records who did it.
    ///
    /// # Errors
    /// `WorldModelError::Reference` if the entity is unknown.
    fn verify(&self, id: &EntityId, verifier: &str) -> WorldModelResult<Written<Entity>>;

    /// Entities matching `filter`, ordered by id.
    ///
    /// # Errors
    /// `WorldModelError::Closed` or a backend error.
    fn query(&self, filter: &EntityFilter) -> WorldModelResult<EntityCursor>;

    /// # Errors
    /// `WorldModelError::Closed` or a backend error.
    fn get_statistics(&self) -> WorldModelResult<GraphStatistics>;

    /// Streams the whole graph as an export document.
    ///
    /// # Errors
    /// `WorldModelError::Io` if the sink fails.
    fn export_to(
        &self,
        sink: &mut dyn Write,
        options: &TransferOptions,
    ) -> WorldModelResult<ExportSummary>;

    /// Loads an export document. Nothing changes unless the whole document
    /// applies.
    ///
    /// # Errors
    /// - `WorldModelError::ImportSchema` for another schema version
    /// - `WorldModelError::Document` for malformed JSON
    /// - `WorldModelError::Validation` / `Reference` for bad records
    fn import_from(
        &self,
        source: &mut dyn Read,
        mode: ImportMode,
        options: &TransferOptions,
    ) -> WorldModelResult<Written<ImportSummary>>;

    /// Removes every entity and relationship. Idempotent.
    ///
    /// # Errors
    /// `WorldModelError::Closed` or a backend error.
    fn reset(&self) -> WorldModelResult<Written<()>>;

    /// Forces committed writes to durable storage.
    ///
    /// # Errors
    /// `WorldModelError::Closed` or a backend error.
    fn flush(&self) -> WorldModelResult<()>;

    /// Releases the backend. Idempotent.
    ///
    /// # Errors
    /// A backend error from the final sync; the instance is closed anyway.
    fn close(&self) -> WorldModelResult<()>;

    fn is_closed(&self) -> bool;

    /// Options used by [`export_graph`](Self::export_graph) and
    /// [`import_graph`](Self::import_graph).
    fn transfer_options(&self) -> TransferOptions {
        TransferOptions::default()
    }

    /// Exports to a file. A failed export leaves no file behind and never
    /// clobbers an existing one.
    ///
    /// # Errors
    /// See [`export_to`](Self::export_to).
    fn export_graph(&self, path: &Path) -> WorldModelResult<ExportSummary> {
        let temp_path = temp_sibling(path)?;
        let written = File::create(&temp_path)
            .map_err(WorldModelError::from)
            .and_then(|file| {
                let mut writer = BufWriter::new(file);
                let summary = self.export_to(&mut writer, &self.transfer_options())?;
                let file = writer
                    .into_inner()
                    .map_err(|e| WorldModelError::Io(e.into_error()))?;
                file.sync_all()?;
                Ok(summary)
            })
            .and_then(|summary| {
                fs::rename(&temp_path, path)?;
                Ok(summary)
            });

        if written.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        written
    }

    /// Imports from a file.
    ///
    /// # Errors
    /// See [`import_from`](Self::import_from).
    fn import_graph(&self, path: &Path, mode: ImportMode) -> WorldModelResult<Written<ImportSummary>> {
        let mut reader = BufReader::new(File::open(path)?);
        self.import_from(&mut reader, mode, &self.transfer_options())
    }
}

fn temp_sibling(path: &Path) -> WorldModelResult<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| WorldModelError::document(format!("'{}' is not a file path", path.display())))?;
    let mut temp_name = name.to_os_string();
    temp_name.push(format!(".tmp.{}", Uuid::new_v4()));
    Ok(path.with_file_name(temp_name))
}

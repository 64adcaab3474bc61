//! # worldmodel - Persistent World Model Storage
//!
//! A typed knowledge graph for research agents: entities with arbitrary
//! properties, directed relationships between them, confidence scores,
//! provenance, and append-only annotations that record verification and
//! discussion. Everything is addressable by id, filterable by type, project
//! and confidence, and round-trips through a versioned JSON document.
//!
//! ## Core Concepts
//!
//! - **Entity**: A typed node with properties, confidence and provenance
//! - **Relationship**: A directed, typed edge between two entities
//! - **Annotation**: An append-only comment attached to an entity or relationship
//! - **Storage**: A backend behind [`WorldModelStorage`], built by [`initialize`]
//!
//! ## Usage
//!
//! ```
//! use worldmodel::{initialize, EntityFilter, NewEntity, NewRelationship, StorageConfig};
//!
//! let storage = initialize(&StorageConfig::in_memory())?;
//!
//! let paper = storage
//!     .add_entity(NewEntity::new("Paper").property("title", "LK-99").project("sc"))?
//!     .into_value();
//! let concept = storage
//!     .add_entity(NewEntity::new("Concept").property("name", "superconductivity").project("sc"))?
//!     .into_value();
//! storage.add_relationship(NewRelationship::new(paper, concept, "DESCRIBES"))?;
//!
//! let papers = storage.query(&EntityFilter::new().entity_type("Paper"))?;
//! assert_eq!(papers.len(), 1);
//! # Ok::<(), worldmodel::WorldModelError>(())
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod annotation;
pub mod confidence;
pub mod entity;
pub mod error;
pub mod relationship;
pub mod validation;
pub mod value;

// Graph engine, queries and storage
pub mod graph;
pub mod query;
pub mod storage;

// Re-export primary types at crate root for convenience
pub use annotation::{Annotation, AnnotationId};
pub use confidence::Confidence;
pub use entity::{Entity, EntityId, NewEntity};
pub use error::{ElementKind, ValidationError, WorldModelError, WorldModelResult};
pub use query::{EntityCursor, EntityFilter, GraphStatistics};
pub use relationship::{Direction, NewRelationship, Relationship, RelationshipId};
pub use value::{Properties, Value};

pub use storage::{
    initialize, ConsistencyWarning, ExportSummary, ImportMode, ImportSummary, MirrorStatus,
    StorageConfig, StorageManager, StorageMode, TransferOptions, TransferPhase, TransferProgress,
    WorldModelStorage, Written,
};

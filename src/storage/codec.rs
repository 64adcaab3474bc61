//! Export document: a versioned, lossless JSON image of the whole graph.
//!
//! ```text
//! {
//!   "schema_version": 1,
//!   "exported_at": "...",
//!   "entity_count": N, "relationship_count": M, "annotation_count": K,
//!   "entities": [...],       // without their annotations
//!   "relationships": [...],  // without their annotations
//!   "annotations": [...]
//! }
//! ```
//!
//! Export streams records to the sink batch by batch. Import validates the
//! entire document and stages it in one graph transaction before anything
//! becomes visible.

use std::collections::{BTreeMap, HashSet};
use std::io::{Read, Write};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::annotation::{self, Annotation};
use crate::entity::Entity;
use crate::error::{ElementKind, ValidationError, WorldModelError, WorldModelResult};
use crate::graph::{Edge, GraphTxn, Node};
use crate::relationship::Relationship;
use crate::storage::mapping;
use crate::storage::traits::{
    ExportSummary, ImportMode, ImportSummary, TransferOptions, TransferPhase,
};

/// Schema version written by this crate and the only one it reads.
pub const SCHEMA_VERSION: u32 = 1;

/// Graph contents captured under one read lock.
pub(crate) struct ExportSnapshot {
    pub nodes: Vec<Arc<Node>>,
    pub edges: Vec<Arc<Edge>>,
    pub annotation_count: u64,
}

impl ExportSnapshot {
    fn summary(&self) -> ExportSummary {
        ExportSummary {
            entity_count: self.nodes.len() as u64,
            relationship_count: self.edges.len() as u64,
            annotation_count: self.annotation_count,
        }
    }
}

fn json_err(e: serde_json::Error) -> WorldModelError {
    if e.is_io() {
        WorldModelError::Io(e.into())
    } else {
        WorldModelError::storage(format!("failed to encode export record: {e}"))
    }
}

/// Writes `items` as the body of a JSON array, reporting progress per batch.
fn write_array<T: Serialize>(
    sink: &mut dyn Write,
    items: impl Iterator<Item = WorldModelResult<T>>,
    options: &TransferOptions,
    progress: &mut Progress,
) -> WorldModelResult<()> {
    let batch = options.batch();
    sink.write_all(b"[")?;
    let mut first = true;
    let mut in_batch = 0;
    for item in items {
        if !first {
            sink.write_all(b",")?;
        }
        first = false;
        serde_json::to_writer(&mut *sink, &item?).map_err(json_err)?;
        in_batch += 1;
        if in_batch == batch {
            progress.advance(options, in_batch);
            in_batch = 0;
        }
    }
    if in_batch > 0 {
        progress.advance(options, in_batch);
    }
    sink.write_all(b"]")?;
    Ok(())
}

struct Progress {
    phase: TransferPhase,
    done: u64,
    total: u64,
}

impl Progress {
    fn advance(&mut self, options: &TransferOptions, records: usize) {
        self.done += records as u64;
        options.report(self.phase, self.done, self.total);
    }
}

/// Streams `snapshot` to `sink` as an export document.
pub(crate) fn write_document(
    sink: &mut dyn Write,
    snapshot: &ExportSnapshot,
    options: &TransferOptions,
) -> WorldModelResult<ExportSummary> {
    let summary = snapshot.summary();
    let mut progress = Progress {
        phase: TransferPhase::Export,
        done: 0,
        total: summary.entity_count + summary.relationship_count + summary.annotation_count,
    };

    let exported_at = serde_json::to_string(&Utc::now()).map_err(json_err)?;
    write!(
        sink,
        "{{\"schema_version\":{SCHEMA_VERSION},\"exported_at\":{exported_at},\
         \"entity_count\":{},\"relationship_count\":{},\"annotation_count\":{},",
        summary.entity_count, summary.relationship_count, summary.annotation_count
    )?;

    sink.write_all(b"\"entities\":")?;
    let entities = snapshot.nodes.iter().map(|node| {
        let mut entity = mapping::node_to_entity(node)?;
        entity.annotations.clear();
        Ok(entity)
    });
    write_array(sink, entities, options, &mut progress)?;

    sink.write_all(b",\"relationships\":")?;
    let relationships = snapshot.edges.iter().map(|edge| {
        let mut relationship = mapping::edge_to_relationship(edge)?;
        relationship.annotations.clear();
        Ok(relationship)
    });
    write_array(sink, relationships, options, &mut progress)?;

    // Second pass over the same snapshot; decoding again keeps memory flat.
    sink.write_all(b",\"annotations\":")?;
    let node_annotations = snapshot
        .nodes
        .iter()
        .filter(|node| mapping::annotation_count(&node.properties) > 0)
        .map(|node| mapping::node_to_entity(node).map(|e| e.annotations));
    let edge_annotations = snapshot
        .edges
        .iter()
        .filter(|edge| mapping::annotation_count(&edge.properties) > 0)
        .map(|edge| mapping::edge_to_relationship(edge).map(|r| r.annotations));
    let annotations = node_annotations
        .chain(edge_annotations)
        .flat_map(|decoded| match decoded {
            Ok(list) => list.into_iter().map(Ok).collect::<Vec<_>>(),
            Err(e) => vec![Err(e)],
        });
    write_array(sink, annotations, options, &mut progress)?;

    sink.write_all(b"}")?;
    sink.flush()?;

    tracing::info!(
        entities = summary.entity_count,
        relationships = summary.relationship_count,
        annotations = summary.annotation_count,
        "graph exported"
    );
    Ok(summary)
}

#[derive(Deserialize)]
struct VersionProbe {
    #[serde(default)]
    schema_version: Option<serde_json::Value>,
}

/// A parsed export document.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ExportDocument {
    pub schema_version: u32,
    pub exported_at: DateTime<Utc>,
    pub entity_count: u64,
    pub relationship_count: u64,
    pub annotation_count: u64,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

/// Reads and parses a document, checking the schema version before the
/// records.
pub(crate) fn read_document(source: &mut dyn Read) -> WorldModelResult<ExportDocument> {
    let mut bytes = Vec::new();
    source.read_to_end(&mut bytes)?;

    let probe: VersionProbe = serde_json::from_slice(&bytes)
        .map_err(|e| WorldModelError::document(format!("not an export document: {e}")))?;
    let version = probe
        .schema_version
        .ok_or_else(|| WorldModelError::document("missing schema_version"))?;
    let found = version
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| WorldModelError::document(format!("invalid schema_version {version}")))?;
    if found != SCHEMA_VERSION {
        return Err(WorldModelError::ImportSchema {
            found,
            supported: SCHEMA_VERSION,
        });
    }

    let document: ExportDocument = serde_json::from_slice(&bytes)
        .map_err(|e| WorldModelError::document(format!("malformed export document: {e}")))?;

    let counts = [
        ("entity_count", document.entity_count, document.entities.len()),
        (
            "relationship_count",
            document.relationship_count,
            document.relationships.len(),
        ),
        (
            "annotation_count",
            document.annotation_count,
            document.annotations.len(),
        ),
    ];
    for (field, declared, actual) in counts {
        if declared != actual as u64 {
            return Err(WorldModelError::document(format!(
                "{field} is {declared} but the document holds {actual}"
            )));
        }
    }

    Ok(document)
}

/// Records an import changed, for the mirror.
#[derive(Debug, Default)]
pub(crate) struct ImportedRecords {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
}

fn duplicate(kind: ElementKind, id: &str) -> WorldModelError {
    ValidationError::DuplicateId {
        kind,
        id: id.to_string(),
    }
    .into()
}

/// Validates `document` against the staged graph and stages its records.
///
/// Replace mode must be called on a transaction that was already cleared.
pub(crate) fn stage_import(
    txn: &mut GraphTxn<'_>,
    document: ExportDocument,
    mode: ImportMode,
    options: &TransferOptions,
) -> WorldModelResult<(ImportSummary, ImportedRecords)> {
    let batch = options.batch();
    let mut summary = ImportSummary::empty(mode);
    let mut progress = Progress {
        phase: TransferPhase::Import,
        done: 0,
        total: (document.entities.len() + document.relationships.len() + document.annotations.len())
            as u64,
    };

    // Record-level checks and duplicate ids inside the document.
    let mut entity_ids = HashSet::new();
    for entity in &document.entities {
        entity.validate()?;
        if !entity_ids.insert(entity.id.as_str()) {
            return Err(duplicate(ElementKind::Entity, entity.id.as_str()));
        }
    }
    let mut relationship_ids = HashSet::new();
    for relationship in &document.relationships {
        relationship.validate()?;
        if !relationship_ids.insert(relationship.id.as_str()) {
            return Err(duplicate(ElementKind::Relationship, relationship.id.as_str()));
        }
    }
    // Entities and relationships share one id space.
    for entity in &document.entities {
        let id = entity.id.as_str();
        if relationship_ids.contains(id) || txn.contains_edge(id) {
            return Err(duplicate(ElementKind::Entity, id));
        }
    }
    for relationship in &document.relationships {
        let id = relationship.id.as_str();
        if txn.contains_node(id) {
            return Err(duplicate(ElementKind::Relationship, id));
        }
    }
    let mut annotation_ids = HashSet::new();
    for annotation in &document.annotations {
        annotation.validate()?;
        if !annotation_ids.insert(annotation.id) {
            return Err(duplicate(ElementKind::Element, &annotation.id.to_string()));
        }
    }

    // Referential integrity against the document plus the staged graph.
    for relationship in &document.relationships {
        for endpoint in [&relationship.source_id, &relationship.target_id] {
            if !entity_ids.contains(endpoint.as_str()) && !txn.contains_node(endpoint.as_str()) {
                return Err(WorldModelError::missing_entity(endpoint.as_str()));
            }
        }
    }
    let mut by_target: BTreeMap<String, Vec<Annotation>> = BTreeMap::new();
    for annotation in document.annotations {
        let target = annotation.target_ref.as_str();
        let known = entity_ids.contains(target)
            || relationship_ids.contains(target)
            || txn.contains_node(target)
            || txn.contains_edge(target);
        if !known {
            return Err(WorldModelError::Reference {
                kind: ElementKind::Element,
                id: target.to_string(),
            });
        }
        by_target
            .entry(annotation.target_ref.clone())
            .or_default()
            .push(annotation);
    }

    let mut records = ImportedRecords::default();

    for (position, mut entity) in document.entities.into_iter().enumerate() {
        if txn.contains_node(entity.id.as_str()) {
            summary.entities_skipped += 1;
        } else {
            if let Some(incoming) = by_target.remove(entity.id.as_str()) {
                for annotation in incoming {
                    if annotation::append_unique(&mut entity.annotations, annotation) {
                        summary.annotations_added += 1;
                    } else {
                        summary.annotations_skipped += 1;
                    }
                }
            }
            txn.put_node(mapping::entity_to_node(&entity)?);
            summary.entities_added += 1;
            records.entities.push(entity);
        }
        if (position + 1) % batch == 0 {
            progress.advance(options, batch);
        }
    }

    for (position, mut relationship) in document.relationships.into_iter().enumerate() {
        if txn.contains_edge(relationship.id.as_str()) {
            summary.relationships_skipped += 1;
        } else {
            if let Some(incoming) = by_target.remove(relationship.id.as_str()) {
                for annotation in incoming {
                    if annotation::append_unique(&mut relationship.annotations, annotation) {
                        summary.annotations_added += 1;
                    } else {
                        summary.annotations_skipped += 1;
                    }
                }
            }
            txn.put_edge(mapping::relationship_to_edge(&relationship)?)?;
            summary.relationships_added += 1;
            records.relationships.push(relationship);
        }
        if (position + 1) % batch == 0 {
            progress.advance(options, batch);
        }
    }

    // What is left targets elements that were already stored (or skipped).
    for (target, incoming) in by_target {
        if let Some(node) = txn.node(&target) {
            let mut entity = mapping::node_to_entity(&node)?;
            let added = merge_annotations(&mut entity.annotations, incoming, &mut summary);
            if added {
                txn.put_node(mapping::entity_to_node(&entity)?);
                records.entities.push(entity);
            }
        } else if let Some(edge) = txn.edge(&target) {
            let mut relationship = mapping::edge_to_relationship(&edge)?;
            let added = merge_annotations(&mut relationship.annotations, incoming, &mut summary);
            if added {
                txn.put_edge(mapping::relationship_to_edge(&relationship)?)?;
                records.relationships.push(relationship);
            }
        }
    }

    let remainder = progress.total - progress.done;
    if remainder > 0 {
        progress.advance(options, usize::try_from(remainder).unwrap_or(usize::MAX));
    }

    Ok((summary, records))
}

fn merge_annotations(
    existing: &mut Vec<Annotation>,
    incoming: Vec<Annotation>,
    summary: &mut ImportSummary,
) -> bool {
    let mut added = false;
    for annotation in incoming {
        if annotation::append_unique(existing, annotation) {
            summary.annotations_added += 1;
            added = true;
        } else {
            summary.annotations_skipped += 1;
        }
    }
    added
}

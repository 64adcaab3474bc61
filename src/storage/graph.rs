//! Graph store adapter: the `simple` backend.
//!
//! Maps entities and relationships onto a [`GraphDatabase`] and forwards
//! every committed write to the mirror.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;

use crate::annotation::{self, Annotation};
use crate::entity::{Entity, EntityId, NewEntity};
use crate::error::{ElementKind, ValidationError, WorldModelError, WorldModelResult};
use crate::graph::{Edge, GraphDatabase, GraphError, GraphState, GraphTxn, Node};
use crate::query::{EntityCursor, EntityFilter, GraphStatistics};
use crate::relationship::{Direction, NewRelationship, Relationship, RelationshipId};
use crate::storage::codec::{self, ExportSnapshot};
use crate::storage::config::StorageMode;
use crate::storage::mapping;
use crate::storage::sync::{MirrorRecord, MirrorStatus, MirrorSync};
use crate::storage::traits::{
    ExportSummary, ImportMode, ImportSummary, TransferOptions, WorldModelStorage, Written,
};
use crate::validation;

/// Describes the state an overwrite replaced.
fn overwrite_note(prior: &Entity) -> String {
    let properties =
        serde_json::to_string(&prior.properties).unwrap_or_else(|_| "<unencodable>".to_string());
    let project = prior.project.as_deref().unwrap_or("-");
    format!(
        "overwritten; prior state: type={}, confidence={}, project={project}, properties={properties}",
        prior.entity_type, prior.confidence
    )
}

/// World model backed by the embedded property graph.
///
/// Writers are serialized by an internal gate held across the graph commit
/// and the mirror write, so the mirror sees writes in commit order. Readers
/// only take the graph's read lock.
pub struct GraphWorldModel {
    db: GraphDatabase,
    mirror: MirrorSync,
    write_gate: Mutex<()>,
    transfer: TransferOptions,
}

impl std::fmt::Debug for GraphWorldModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphWorldModel")
            .field("location", self.db.location())
            .field("mirror", &self.mirror)
            .finish_non_exhaustive()
    }
}

impl GraphWorldModel {
    #[must_use]
    pub fn new(db: GraphDatabase, mirror: MirrorSync) -> Self {
        Self {
            db,
            mirror,
            write_gate: Mutex::new(()),
            transfer: TransferOptions::default(),
        }
    }

    /// Sets the options `export_graph` and `import_graph` use.
    #[must_use]
    pub fn with_transfer_options(mut self, transfer: TransferOptions) -> Self {
        self.transfer = transfer;
        self
    }

    #[must_use]
    pub fn database(&self) -> &GraphDatabase {
        &self.db
    }

    fn gate(&self) -> WorldModelResult<MutexGuard<'_, ()>> {
        self.write_gate
            .lock()
            .map_err(|_| WorldModelError::storage("poisoned lock: graph_world_model.write_gate"))
    }

    fn read<R>(&self, f: impl FnOnce(&GraphState) -> R) -> WorldModelResult<R> {
        self.db.read(f).map_err(WorldModelError::from)
    }

    /// Stages an upsert of `draft`. Returns the stored entity and whether it
    /// replaced an existing one.
    fn stage_entity(txn: &mut GraphTxn<'_>, draft: NewEntity) -> WorldModelResult<(Entity, bool)> {
        let now = Utc::now();
        let id = draft.id.clone().unwrap_or_else(EntityId::generate);
        if txn.contains_edge(id.as_str()) {
            return Err(ValidationError::DuplicateId {
                kind: ElementKind::Entity,
                id: id.to_string(),
            }
            .into());
        }

        let Some(node) = txn.node(id.as_str()) else {
            let entity = draft.into_entity(id, now)?;
            txn.put_node(mapping::entity_to_node(&entity)?);
            return Ok((entity, false));
        };

        let prior = mapping::node_to_entity(&node)?;
        let writer = draft.created_by.clone();
        let verified = prior.verified || draft.verified;
        let mut entity = draft.into_entity(id, now)?;
        entity.created_at = prior.created_at;
        entity.created_by = prior.created_by.clone();
        entity.verified = verified;
        entity.updated_at = now.max(prior.updated_at);

        let mut note = Annotation::new(entity.id.as_str(), writer, overwrite_note(&prior));
        note.created_at = entity.updated_at;
        entity.annotations = prior.annotations;
        entity.annotations.push(note);

        txn.put_node(mapping::entity_to_node(&entity)?);
        Ok((entity, true))
    }

    fn snapshot_relationships(
        graph: &GraphState,
        id: &str,
        direction: Direction,
    ) -> Vec<Arc<Edge>> {
        let mut edges: Vec<_> = match direction {
            Direction::Outgoing => graph.outgoing(id).cloned().collect(),
            Direction::Incoming => graph.incoming(id).cloned().collect(),
            Direction::Both => graph.outgoing(id).chain(graph.incoming(id)).cloned().collect(),
        };
        edges.sort_by(|a, b| a.id.cmp(&b.id));
        edges.dedup_by(|a, b| a.id == b.id);
        edges
    }

    fn select(graph: &GraphState, filter: &EntityFilter) -> Vec<Arc<Node>> {
        let limit = filter.limit.unwrap_or(usize::MAX);
        let indexed = filter
            .project
            .as_deref()
            .and_then(|project| graph.nodes_with_property(mapping::PROJECT, project));

        let matches = |node: &&Arc<Node>| mapping::node_matches(filter, node);
        if let Some(candidates) = indexed {
            return candidates.filter(matches).take(limit).cloned().collect();
        }
        if let Some(entity_type) = &filter.entity_type {
            return graph
                .nodes_with_label(entity_type)
                .filter(matches)
                .take(limit)
                .cloned()
                .collect();
        }
        graph.nodes().filter(matches).take(limit).cloned().collect()
    }
}

impl WorldModelStorage for GraphWorldModel {
    fn mode(&self) -> StorageMode {
        StorageMode::Simple
    }

    fn add_entity(&self, entity: NewEntity) -> WorldModelResult<Written<EntityId>> {
        entity.validate()?;
        let _gate = self.gate()?;

        let (stored, overwrite) = self
            .db
            .transact(|txn| Self::stage_entity(txn, entity))?;
        tracing::debug!(
            id = %stored.id,
            entity_type = %stored.entity_type,
            overwrite,
            "entity committed"
        );

        let mirror = self.mirror.mirror("add_entity", MirrorRecord::Entity(&stored));
        Ok(Written::new(stored.id, mirror))
    }

    fn get_entity(&self, id: &EntityId) -> WorldModelResult<Option<Entity>> {
        let node = self.read(|graph| graph.node(id.as_str()).cloned())?;
        node.map(|node| mapping::node_to_entity(&node)).transpose()
    }

    fn add_relationship(
        &self,
        relationship: NewRelationship,
    ) -> WorldModelResult<Written<RelationshipId>> {
        relationship.validate()?;
        let _gate = self.gate()?;

        let stored = self.db.transact(|txn| {
            for endpoint in [&relationship.source_id, &relationship.target_id] {
                if !txn.contains_node(endpoint.as_str()) {
                    return Err(WorldModelError::missing_entity(endpoint.as_str()));
                }
            }
            let id = relationship
                .id
                .clone()
                .unwrap_or_else(RelationshipId::generate);
            if txn.contains_edge(id.as_str()) || txn.contains_node(id.as_str()) {
                return Err(ValidationError::DuplicateId {
                    kind: ElementKind::Relationship,
                    id: id.to_string(),
                }
                .into());
            }
            let stored = relationship.into_relationship(id, Utc::now())?;
            txn.create_edge(mapping::relationship_to_edge(&stored)?)?;
            Ok::<_, WorldModelError>(stored)
        })?;
        tracing::debug!(
            id = %stored.id,
            source = %stored.source_id,
            target = %stored.target_id,
            relationship_type = %stored.relationship_type,
            "relationship committed"
        );

        let mirror = self
            .mirror
            .mirror("add_relationship", MirrorRecord::Relationship(&stored));
        Ok(Written::new(stored.id, mirror))
    }

    fn get_relationship(&self, id: &RelationshipId) -> WorldModelResult<Option<Relationship>> {
        let edge = self.read(|graph| graph.edge(id.as_str()).cloned())?;
        edge.map(|edge| mapping::edge_to_relationship(&edge))
            .transpose()
    }

    fn relationships_of(
        &self,
        id: &EntityId,
        direction: Direction,
    ) -> WorldModelResult<Vec<Relationship>> {
        let edges = self.read(|graph| {
            graph
                .node(id.as_str())
                .map(|_| Self::snapshot_relationships(graph, id.as_str(), direction))
        })?;
        edges
            .ok_or_else(|| WorldModelError::missing_entity(id.as_str()))?
            .iter()
            .map(|edge| mapping::edge_to_relationship(edge))
            .collect()
    }

    fn annotate(
        &self,
        target: &str,
        author: &str,
        text: &str,
    ) -> WorldModelResult<Written<Annotation>> {
        let note = Annotation::new(target, author, text);
        note.validate()?;
        let _gate = self.gate()?;

        let (annotation, mirror_entity, mirror_relationship) = self.db.transact(|txn| {
            if let Some(node) = txn.node(target) {
                let mut entity = mapping::node_to_entity(&node)?;
                entity.updated_at = Utc::now().max(entity.updated_at);
                annotation::append_unique(&mut entity.annotations, note.clone());
                txn.put_node(mapping::entity_to_node(&entity)?);
                return Ok((note, Some(entity), None));
            }
            if let Some(edge) = txn.edge(target) {
                let mut relationship = mapping::edge_to_relationship(&edge)?;
                annotation::append_unique(&mut relationship.annotations, note.clone());
                txn.put_edge(mapping::relationship_to_edge(&relationship)?)?;
                return Ok((note, None, Some(relationship)));
            }
            Err(WorldModelError::Reference {
                kind: ElementKind::Element,
                id: target.to_string(),
            })
        })?;
        tracing::debug!(
            id = %annotation.id,
            target_ref = target,
            author,
            "annotation committed"
        );

        let mirror = match (&mirror_entity, &mirror_relationship) {
            (Some(entity), _) => self.mirror.mirror("annotate", MirrorRecord::Entity(entity)),
            (None, Some(rel)) => self
                .mirror
                .mirror("annotate", MirrorRecord::Relationship(rel)),
            (None, None) => MirrorStatus::Disabled,
        };
        Ok(Written::new(annotation, mirror))
    }

    fn verify(&self, id: &EntityId, verifier: &str) -> WorldModelResult<Written<Entity>> {
        validation::validate_name("verifier", verifier)?;
        let _gate = self.gate()?;

        let entity = self.db.transact(|txn| {
            let node = txn
                .node(id.as_str())
                .ok_or_else(|| WorldModelError::missing_entity(id.as_str()))?;
            let mut entity = mapping::node_to_entity(&node)?;
            let now = Utc::now().max(entity.updated_at);
            entity.verified = true;
            entity.updated_at = now;
            let mut note = Annotation::new(id.as_str(), verifier, format!("verified by {verifier}"));
            note.created_at = now;
            entity.annotations.push(note);
            txn.put_node(mapping::entity_to_node(&entity)?);
            Ok::<_, WorldModelError>(entity)
        })?;
        tracing::debug!(id = %entity.id, verifier, "entity verified");

        let mirror = self.mirror.mirror("verify", MirrorRecord::Entity(&entity));
        Ok(Written::new(entity, mirror))
    }

    fn query(&self, filter: &EntityFilter) -> WorldModelResult<EntityCursor> {
        let nodes = self.read(|graph| Self::select(graph, filter))?;
        Ok(EntityCursor::new(nodes))
    }

    fn get_statistics(&self) -> WorldModelResult<GraphStatistics> {
        self.read(|graph| GraphStatistics {
            entity_count: graph.node_count(),
            relationship_count: graph.edge_count(),
            entities_by_type: graph.node_label_counts(),
            relationships_by_type: graph.edge_label_counts(),
            entities_by_project: graph
                .property_value_counts(mapping::PROJECT)
                .unwrap_or_default(),
        })
    }

    fn export_to(
        &self,
        sink: &mut dyn Write,
        options: &TransferOptions,
    ) -> WorldModelResult<ExportSummary> {
        let snapshot = self.read(|graph| ExportSnapshot {
            nodes: graph.nodes().cloned().collect(),
            edges: graph.edges().cloned().collect(),
            annotation_count: graph
                .nodes()
                .map(|n| mapping::annotation_count(&n.properties))
                .chain(graph.edges().map(|e| mapping::annotation_count(&e.properties)))
                .sum::<usize>() as u64,
        })?;
        codec::write_document(sink, &snapshot, options)
    }

    fn import_from(
        &self,
        source: &mut dyn Read,
        mode: ImportMode,
        options: &TransferOptions,
    ) -> WorldModelResult<Written<ImportSummary>> {
        let document = codec::read_document(source)?;
        let _gate = self.gate()?;

        let (summary, records) = self.db.transact(|txn| {
            if mode == ImportMode::Replace {
                txn.clear();
            }
            codec::stage_import(txn, document, mode, options)
        })?;
        tracing::info!(
            ?mode,
            entities_added = summary.entities_added,
            relationships_added = summary.relationships_added,
            annotations_added = summary.annotations_added,
            entities_skipped = summary.entities_skipped,
            relationships_skipped = summary.relationships_skipped,
            "graph imported"
        );

        let cleared = if mode == ImportMode::Replace {
            self.mirror.clear("import_graph")
        } else {
            MirrorStatus::Synced
        };
        let batch: Vec<MirrorRecord<'_>> = records
            .entities
            .iter()
            .map(MirrorRecord::Entity)
            .chain(records.relationships.iter().map(MirrorRecord::Relationship))
            .collect();
        let loaded = self.mirror.mirror_batch("import_graph", &batch);
        let mirror = if cleared.is_degraded() { cleared } else { loaded };

        Ok(Written::new(summary, mirror))
    }

    fn reset(&self) -> WorldModelResult<Written<()>> {
        let _gate = self.gate()?;
        self.db.transact(|txn| {
            txn.clear();
            Ok::<_, GraphError>(())
        })?;
        tracing::info!(location = ?self.db.location(), "graph reset");

        let mirror = self.mirror.clear("reset");
        Ok(Written::new((), mirror))
    }

    fn flush(&self) -> WorldModelResult<()> {
        self.db.flush().map_err(WorldModelError::from)
    }

    fn close(&self) -> WorldModelResult<()> {
        let _gate = self.gate()?;
        self.db.close().map_err(WorldModelError::from)
    }

    fn is_closed(&self) -> bool {
        self.db.is_closed()
    }

    fn transfer_options(&self) -> TransferOptions {
        self.transfer.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphOptions;
    use crate::value::Value;

    fn storage() -> GraphWorldModel {
        GraphWorldModel::new(
            GraphDatabase::in_memory(GraphOptions {
                indexed_properties: vec![mapping::PROJECT.to_string()],
                ..GraphOptions::default()
            }),
            MirrorSync::disabled(),
        )
    }

    #[test]
    fn test_add_and_get_entity() {
        let storage = storage();
        let written = storage
            .add_entity(
                NewEntity::new("Paper")
                    .property("title", "X")
                    .confidence(0.9)
                    .created_by("agent"),
            )
            .unwrap();
        assert_eq!(written.mirror(), &MirrorStatus::Disabled);

        let entity = storage.get_entity(written.value()).unwrap().unwrap();
        assert_eq!(entity.entity_type, "Paper");
        assert_eq!(entity.property("title"), Some(&Value::from("X")));
        assert_eq!(entity.confidence.value(), 0.9);
        assert_eq!(entity.created_at, entity.updated_at);
        assert!(entity.annotations.is_empty());
    }

    #[test]
    fn test_invalid_draft_changes_nothing() {
        let storage = storage();
        let err = storage
            .add_entity(NewEntity::new("Paper").confidence(1.5))
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(storage.get_statistics().unwrap().entity_count, 0);
    }

    #[test]
    fn test_overwrite_keeps_provenance_and_records_prior_state() {
        let storage = storage();
        storage
            .add_entity(
                NewEntity::new("Paper")
                    .with_id("p1")
                    .property("title", "Draft")
                    .created_by("first")
                    .verified(true),
            )
            .unwrap();
        let original = storage.get_entity(&EntityId::from("p1")).unwrap().unwrap();

        storage
            .add_entity(
                NewEntity::new("Paper")
                    .with_id("p1")
                    .property("title", "Final")
                    .confidence(0.5)
                    .created_by("second"),
            )
            .unwrap();
        let entity = storage.get_entity(&EntityId::from("p1")).unwrap().unwrap();

        assert_eq!(entity.property("title"), Some(&Value::from("Final")));
        assert_eq!(entity.confidence.value(), 0.5);
        assert_eq!(entity.created_by, "first");
        assert_eq!(entity.created_at, original.created_at);
        assert!(entity.updated_at >= original.updated_at);
        assert!(entity.verified);
        assert_eq!(entity.annotations.len(), 1);
        assert_eq!(entity.annotations[0].author, "second");
        assert!(entity.annotations[0].text.contains("Draft"));
        assert_eq!(storage.get_statistics().unwrap().entity_count, 1);
    }

    #[test]
    fn test_relationship_reference_and_duplicate_checks() {
        let storage = storage();
        let a = storage.add_entity(NewEntity::new("Paper")).unwrap().into_value();
        let b = storage.add_entity(NewEntity::new("Concept")).unwrap().into_value();

        let err = storage
            .add_relationship(NewRelationship::new(a.clone(), "missing", "X"))
            .unwrap_err();
        assert!(err.is_reference());

        storage
            .add_relationship(NewRelationship::new(a.clone(), b.clone(), "DESCRIBES").with_id("r1"))
            .unwrap();
        let err = storage
            .add_relationship(NewRelationship::new(b.clone(), a.clone(), "DESCRIBES").with_id("r1"))
            .unwrap_err();
        assert!(matches!(
            err,
            WorldModelError::Validation(ValidationError::DuplicateId { .. })
        ));

        let out = storage.relationships_of(&a, Direction::Outgoing).unwrap();
        assert_eq!(out.len(), 1);
        assert!(storage.relationships_of(&a, Direction::Incoming).unwrap().is_empty());
        assert_eq!(storage.relationships_of(&b, Direction::Both).unwrap().len(), 1);
        assert!(storage
            .relationships_of(&EntityId::from("ghost"), Direction::Both)
            .unwrap_err()
            .is_reference());
    }

    #[test]
    fn test_annotate_and_verify() {
        let storage = storage();
        let a = storage.add_entity(NewEntity::new("Paper")).unwrap().into_value();
        let b = storage.add_entity(NewEntity::new("Paper")).unwrap().into_value();
        let r = storage
            .add_relationship(NewRelationship::new(a.clone(), b, "CITES"))
            .unwrap()
            .into_value();

        storage.annotate(a.as_str(), "curator", "checked").unwrap();
        storage.annotate(r.as_str(), "curator", "weak citation").unwrap();
        assert!(storage
            .annotate("ghost", "curator", "x")
            .unwrap_err()
            .is_reference());
        assert!(storage.annotate(a.as_str(), "curator", " ").unwrap_err().is_validation());

        let verified = storage.verify(&a, "reviewer").unwrap().into_value();
        assert!(verified.verified);
        assert_eq!(verified.annotations.len(), 2);
        assert_eq!(verified.annotations[1].author, "reviewer");

        let rel = storage.get_relationship(&r).unwrap().unwrap();
        assert_eq!(rel.annotations.len(), 1);
    }

    #[test]
    fn test_entities_and_relationships_share_ids() {
        let storage = storage();
        let a = storage.add_entity(NewEntity::new("Paper").with_id("a")).unwrap().into_value();
        let b = storage.add_entity(NewEntity::new("Paper").with_id("b")).unwrap().into_value();
        storage
            .add_relationship(NewRelationship::new(a.clone(), b.clone(), "CITES").with_id("x"))
            .unwrap();

        let err = storage
            .add_entity(NewEntity::new("Concept").with_id("x"))
            .unwrap_err();
        assert!(matches!(
            err,
            WorldModelError::Validation(ValidationError::DuplicateId {
                kind: ElementKind::Entity,
                ..
            })
        ));
        let err = storage
            .add_relationship(NewRelationship::new(a, b, "CITES").with_id("b"))
            .unwrap_err();
        assert!(matches!(
            err,
            WorldModelError::Validation(ValidationError::DuplicateId {
                kind: ElementKind::Relationship,
                ..
            })
        ));

        let stats = storage.get_statistics().unwrap();
        assert_eq!((stats.entity_count, stats.relationship_count), (2, 1));
    }

    #[test]
    fn test_relationship_annotation_survives_round_trip() {
        let source = storage();
        let a = source.add_entity(NewEntity::new("Paper")).unwrap().into_value();
        let b = source.add_entity(NewEntity::new("Paper")).unwrap().into_value();
        source
            .add_relationship(NewRelationship::new(a, b, "CITES").with_id("x"))
            .unwrap();
        source.annotate("x", "curator", "weak citation").unwrap();
        assert!(source.add_entity(NewEntity::new("Paper").with_id("x")).is_err());

        let mut buf = Vec::new();
        source.export_to(&mut buf, &TransferOptions::default()).unwrap();
        let target = storage();
        target
            .import_from(&mut buf.as_slice(), ImportMode::Replace, &TransferOptions::default())
            .unwrap();

        let rel = target.get_relationship(&RelationshipId::from("x")).unwrap().unwrap();
        assert_eq!(rel.annotations.len(), 1);
        assert!(target.get_entity(&EntityId::from("x")).unwrap().is_none());
    }

    #[test]
    fn test_zero_batch_size_transfers() {
        let source = storage();
        for i in 0..3 {
            source
                .add_entity(NewEntity::new("Paper").with_id(format!("p{i}")))
                .unwrap();
        }
        let options = TransferOptions {
            batch_size: 0,
            progress: None,
        };

        let mut buf = Vec::new();
        source.export_to(&mut buf, &options).unwrap();
        let target = storage();
        let summary = target
            .import_from(&mut buf.as_slice(), ImportMode::Merge, &options)
            .unwrap()
            .into_value();
        assert_eq!(summary.entities_added, 3);

        // Nothing was poisoned.
        target.add_entity(NewEntity::new("Paper")).unwrap();
        assert_eq!(target.get_statistics().unwrap().entity_count, 4);
    }

    #[test]
    fn test_annotate_moves_updated_at() {
        let storage = storage();
        let id = storage.add_entity(NewEntity::new("Paper")).unwrap().into_value();
        let before = storage.get_entity(&id).unwrap().unwrap();

        storage.annotate(id.as_str(), "curator", "checked").unwrap();
        let after = storage.get_entity(&id).unwrap().unwrap();
        assert!(after.updated_at >= before.updated_at);
        assert!(after.updated_at >= after.annotations[0].created_at);
        assert_eq!(after.created_at, before.created_at);
    }

    #[test]
    fn test_query_uses_filters_and_limit() {
        let storage = storage();
        for i in 0..5 {
            storage
                .add_entity(
                    NewEntity::new(if i % 2 == 0 { "Paper" } else { "Concept" })
                        .with_id(format!("e{i}"))
                        .project(if i < 3 { "a" } else { "b" })
                        .confidence(f64::from(i) / 10.0),
                )
                .unwrap();
        }

        let ids = |filter: EntityFilter| -> Vec<String> {
            storage
                .query(&filter)
                .unwrap()
                .iter()
                .map(|e| e.unwrap().id.to_string())
                .collect()
        };

        assert_eq!(ids(EntityFilter::new()).len(), 5);
        assert_eq!(ids(EntityFilter::new().entity_type("Paper")), ["e0", "e2", "e4"]);
        assert_eq!(ids(EntityFilter::new().project("a")), ["e0", "e1", "e2"]);
        assert_eq!(
            ids(EntityFilter::new().project("a").entity_type("Paper")),
            ["e0", "e2"]
        );
        assert_eq!(ids(EntityFilter::new().min_confidence(0.3)), ["e3", "e4"]);
        assert_eq!(ids(EntityFilter::new().limit(2)), ["e0", "e1"]);

        let cursor = storage.query(&EntityFilter::new()).unwrap();
        let first: Vec<_> = cursor.iter().map(|e| e.unwrap().id).collect();
        let second: Vec<_> = cursor.iter().map(|e| e.unwrap().id).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_statistics_and_reset() {
        let storage = storage();
        let a = storage
            .add_entity(NewEntity::new("Paper").project("sc"))
            .unwrap()
            .into_value();
        let b = storage.add_entity(NewEntity::new("Concept")).unwrap().into_value();
        storage
            .add_relationship(NewRelationship::new(a, b, "DESCRIBES"))
            .unwrap();

        let stats = storage.get_statistics().unwrap();
        assert_eq!(stats.entity_count, 2);
        assert_eq!(stats.relationship_count, 1);
        assert_eq!(stats.entities_by_type.get("Paper"), Some(&1));
        assert_eq!(stats.relationships_by_type.get("DESCRIBES"), Some(&1));
        assert_eq!(stats.entities_by_project.get("sc"), Some(&1));

        storage.reset().unwrap();
        assert!(storage.get_statistics().unwrap().is_empty());
        storage.reset().unwrap();
        assert_eq!(storage.get_statistics().unwrap(), GraphStatistics::default());
    }

    #[test]
    fn test_closed_storage_rejects_calls() {
        let storage = storage();
        storage.close().unwrap();
        storage.close().unwrap();
        assert!(storage.is_closed());
        assert!(storage
            .add_entity(NewEntity::new("Paper"))
            .unwrap_err()
            .is_closed());
        assert!(storage.get_statistics().unwrap_err().is_closed());
        assert!(storage.reset().unwrap_err().is_closed());
    }
}

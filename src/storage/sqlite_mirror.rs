//! SQLite-backed relational mirror.
//!
//! Denormalized rows, one per entity and one per relationship, for tools
//! that prefer SQL over graph traversal. Properties and annotations are kept
//! as JSON columns.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OpenFlags};

use crate::storage::config::MirrorLocation;
use crate::storage::sync::{MirrorError, MirrorRecord, MirrorSink};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS entities (
    id          TEXT PRIMARY KEY,
    type        TEXT NOT NULL,
    project     TEXT,
    confidence  REAL NOT NULL,
    verified    INTEGER NOT NULL,
    created_by  TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    properties  TEXT NOT NULL,
    annotations TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(type);
CREATE INDEX IF NOT EXISTS idx_entities_project ON entities(project);

CREATE TABLE IF NOT EXISTS relationships (
    id          TEXT PRIMARY KEY,
    source_id   TEXT NOT NULL,
    target_id   TEXT NOT NULL,
    type        TEXT NOT NULL,
    confidence  REAL NOT NULL,
    created_by  TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    properties  TEXT NOT NULL,
    annotations TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_relationships_type ON relationships(type);
CREATE INDEX IF NOT EXISTS idx_relationships_source ON relationships(source_id);
CREATE INDEX IF NOT EXISTS idx_relationships_target ON relationships(target_id);
";

fn sql_err(e: rusqlite::Error) -> MirrorError {
    MirrorError::Write(e.to_string())
}

fn json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, MirrorError> {
    serde_json::to_string(value).map_err(|e| MirrorError::Encode(e.to_string()))
}

/// SQLite mirror sink.
pub struct SqliteMirror {
    conn: Mutex<Connection>,
    label: String,
}

impl SqliteMirror {
    /// Opens (creating if needed) the mirror database.
    ///
    /// # Errors
    /// `MirrorError::Unavailable` if the database cannot be opened or its
    /// schema created.
    pub fn open(location: &MirrorLocation) -> Result<Self, MirrorError> {
        let unavailable = |e: rusqlite::Error| MirrorError::Unavailable(e.to_string());
        let (conn, label) = match location {
            MirrorLocation::Memory => (
                Connection::open_in_memory().map_err(unavailable)?,
                "sqlite::memory:".to_string(),
            ),
            MirrorLocation::File(path) => (Self::open_file(path)?, path.display().to_string()),
        };

        conn.execute_batch(SCHEMA).map_err(unavailable)?;
        tracing::info!(mirror = %label, "sqlite mirror opened");

        Ok(Self {
            conn: Mutex::new(conn),
            label,
        })
    }

    fn open_file(path: &Path) -> Result<Connection, MirrorError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| MirrorError::Unavailable(e.to_string()))?;
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )
        .map_err(|e| MirrorError::Unavailable(e.to_string()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| MirrorError::Unavailable(e.to_string()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| MirrorError::Unavailable(e.to_string()))?;
        Ok(conn)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, MirrorError> {
        self.conn
            .lock()
            .map_err(|_| MirrorError::Poisoned("sqlite_mirror.conn"))
    }

    fn write(conn: &Connection, record: MirrorRecord<'_>) -> Result<(), MirrorError> {
        match record {
            MirrorRecord::Entity(e) => {
                conn.execute(
                    "INSERT OR REPLACE INTO entities
                     (id, type, project, confidence, verified, created_by, created_at,
                      updated_at, properties, annotations)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        e.id.as_str(),
                        e.entity_type,
                        e.project,
                        e.confidence.value(),
                        e.verified,
                        e.created_by,
                        e.created_at.to_rfc3339(),
                        e.updated_at.to_rfc3339(),
                        json(&e.properties)?,
                        json(&e.annotations)?,
                    ],
                )
                .map_err(sql_err)?;
            }
            MirrorRecord::Relationship(r) => {
                conn.execute(
                    "INSERT OR REPLACE INTO relationships
                     (id, source_id, target_id, type, confidence, created_by, created_at,
                      properties, annotations)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        r.id.as_str(),
                        r.source_id.as_str(),
                        r.target_id.as_str(),
                        r.relationship_type,
                        r.confidence.value(),
                        r.created_by,
                        r.created_at.to_rfc3339(),
                        json(&r.properties)?,
                        json(&r.annotations)?,
                    ],
                )
                .map_err(sql_err)?;
            }
        }
        Ok(())
    }

    /// Number of mirrored entities of a type.
    ///
    /// # Errors
    /// `MirrorError::Write` if the query fails.
    pub fn count_by_type(&self, entity_type: &str) -> Result<u64, MirrorError> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM entities WHERE type = ?1",
                [entity_type],
                |row| row.get(0),
            )
            .map_err(sql_err)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Ids of mirrored entities in a project, ordered.
    ///
    /// # Errors
    /// `MirrorError::Write` if the query fails.
    pub fn entity_ids_for_project(&self, project: &str) -> Result<Vec<String>, MirrorError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id FROM entities WHERE project = ?1 ORDER BY id")
            .map_err(sql_err)?;
        let ids = stmt
            .query_map([project], |row| row.get(0))
            .map_err(sql_err)?
            .collect::<Result<Vec<String>, _>>()
            .map_err(sql_err)?;
        Ok(ids)
    }

    /// Total mirrored rows as `(entities, relationships)`.
    ///
    /// # Errors
    /// `MirrorError::Write` if the query fails.
    pub fn row_counts(&self) -> Result<(u64, u64), MirrorError> {
        let conn = self.conn()?;
        let count = |table: &str| -> Result<u64, MirrorError> {
            let n: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })
                .map_err(sql_err)?;
            Ok(u64::try_from(n).unwrap_or(0))
        };
        Ok((count("entities")?, count("relationships")?))
    }
}

impl MirrorSink for SqliteMirror {
    fn name(&self) -> &str {
        &self.label
    }

    fn record(&self, record: MirrorRecord<'_>) -> Result<(), MirrorError> {
        let conn = self.conn()?;
        Self::write(&conn, record)
    }

    fn record_batch(&self, records: &[MirrorRecord<'_>]) -> Result<(), MirrorError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(sql_err)?;
        for record in records {
            Self::write(&tx, *record)?;
        }
        tx.commit().map_err(sql_err)
    }

    fn clear(&self) -> Result<(), MirrorError> {
        let conn = self.conn()?;
        conn.execute_batch("DELETE FROM relationships; DELETE FROM entities;")
            .map_err(sql_err)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::entity::{EntityId, NewEntity};
    use crate::relationship::{NewRelationship, RelationshipId};
    use tempfile::tempdir;

    #[test]
    fn test_upsert_and_lookups() {
        let mirror = SqliteMirror::open(&MirrorLocation::Memory).unwrap();
        let now = Utc::now();
        let paper = NewEntity::new("Paper")
            .project("sc")
            .into_entity(EntityId::from("p1"), now)
            .unwrap();
        let concept = NewEntity::new("Concept")
            .project("sc")
            .into_entity(EntityId::from("c1"), now)
            .unwrap();
        let rel = NewRelationship::new("p1", "c1", "DESCRIBES")
            .into_relationship(RelationshipId::from("r1"), now)
            .unwrap();

        mirror
            .record_batch(&[
                MirrorRecord::Entity(&paper),
                MirrorRecord::Entity(&concept),
                MirrorRecord::Relationship(&rel),
            ])
            .unwrap();
        // Upsert: same id again does not add a row
        mirror.record(MirrorRecord::Entity(&paper)).unwrap();

        assert_eq!(mirror.count_by_type("Paper").unwrap(), 1);
        assert_eq!(
            mirror.entity_ids_for_project("sc").unwrap(),
            vec!["c1".to_string(), "p1".to_string()]
        );
        assert_eq!(mirror.row_counts().unwrap(), (2, 1));

        mirror.clear().unwrap();
        assert_eq!(mirror.row_counts().unwrap(), (0, 0));
    }

    #[test]
    fn test_file_mirror_persists() {
        let dir = tempdir().unwrap();
        let location = MirrorLocation::File(dir.path().join("nested").join("mirror.db"));
        let entity = NewEntity::new("Paper")
            .into_entity(EntityId::from("p1"), Utc::now())
            .unwrap();

        {
            let mirror = SqliteMirror::open(&location).unwrap();
            mirror.record(MirrorRecord::Entity(&entity)).unwrap();
        }

        let mirror = SqliteMirror::open(&location).unwrap();
        assert_eq!(mirror.count_by_type("Paper").unwrap(), 1);
    }
}

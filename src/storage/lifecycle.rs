//! Building, handing out and recycling the live storage instance.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{WorldModelError, WorldModelResult};
use crate::graph::{GraphDatabase, GraphError};
use crate::storage::config::{StorageConfig, StorageMode};
use crate::storage::graph::GraphWorldModel;
use crate::storage::sync::MirrorSync;
use crate::storage::traits::{TransferOptions, WorldModelStorage};

#[cfg(feature = "sqlite-mirror")]
fn open_mirror(config: &StorageConfig) -> WorldModelResult<MirrorSync> {
    use crate::storage::sqlite_mirror::SqliteMirror;

    let Some(mirror) = &config.mirror else {
        return Ok(MirrorSync::disabled());
    };
    let location = mirror.location()?;
    Ok(match SqliteMirror::open(&location) {
        Ok(sink) => MirrorSync::new(Arc::new(sink)),
        Err(e) => {
            tracing::warn!(uri = %mirror.uri, error = %e, "mirror unavailable, writes will be degraded");
            MirrorSync::unavailable(e.to_string())
        }
    })
}

#[cfg(not(feature = "sqlite-mirror"))]
fn open_mirror(config: &StorageConfig) -> WorldModelResult<MirrorSync> {
    let Some(mirror) = &config.mirror else {
        return Ok(MirrorSync::disabled());
    };
    mirror.location()?;
    tracing::warn!(uri = %mirror.uri, "built without sqlite-mirror, writes will be degraded");
    Ok(MirrorSync::unavailable("sqlite mirror support not compiled in"))
}

/// Builds the storage variant selected by `config.mode`.
///
/// # Errors
/// - `WorldModelError::Config` for an invalid config
/// - `WorldModelError::UnsupportedMode` for `polyglot`
/// - `WorldModelError::Connection` if the graph cannot be opened: the
///   directory cannot be created, another process holds it, or the
///   credentials are rejected
/// - `WorldModelError::Storage` if the graph on disk is corrupted
pub fn initialize(config: &StorageConfig) -> WorldModelResult<Arc<dyn WorldModelStorage>> {
    config.validate()?;
    if config.mode != StorageMode::Simple {
        return Err(WorldModelError::UnsupportedMode { mode: config.mode });
    }

    let location = config.graph_location()?;
    let credentials = config
        .credentials
        .as_ref()
        .map(|c| (c.user.as_str(), c.password.as_str()));
    let db = GraphDatabase::open(&location, config.graph_options(), credentials).map_err(
        |e| match e {
            GraphError::Corrupted(message) => WorldModelError::storage(message),
            other => WorldModelError::Connection {
                message: other.to_string(),
            },
        },
    )?;

    let mirror = open_mirror(config)?;
    tracing::info!(mode = %config.mode, location = ?location, mirror = ?mirror, "storage initialized");

    let transfer = TransferOptions::default().with_batch_size(config.batch_size);
    Ok(Arc::new(
        GraphWorldModel::new(db, mirror).with_transfer_options(transfer),
    ))
}

struct Live {
    mode: StorageMode,
    storage: Arc<dyn WorldModelStorage>,
}

/// Owner of the live storage instance.
///
/// An explicit context object: create one per application and pass it to
/// whatever needs storage.
///
/// # Examples
///
/// ```
/// use worldmodel::{StorageConfig, StorageManager, StorageMode};
///
/// let manager = StorageManager::new(StorageConfig::in_memory());
/// let a = manager.get_instance(StorageMode::Simple, false).unwrap();
/// let b = manager.get_instance(StorageMode::Simple, false).unwrap();
/// assert!(std::sync::Arc::ptr_eq(&a, &b));
/// manager.shutdown();
/// ```
pub struct StorageManager {
    config: StorageConfig,
    live: Mutex<Option<Live>>,
}

impl StorageManager {
    #[must_use]
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            live: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    fn live(&self) -> WorldModelResult<MutexGuard<'_, Option<Live>>> {
        self.live
            .lock()
            .map_err(|_| WorldModelError::storage("poisoned lock: storage_manager.live"))
    }

    /// Returns the live instance, building it on first use.
    ///
    /// With `reset` the live instance is torn down and a fresh one is built
    /// in `mode`.
    ///
    /// # Errors
    /// - `WorldModelError::ModeMismatch` if an instance of another mode is
    ///   live and `reset` is false
    /// - anything [`initialize`] returns
    pub fn get_instance(
        &self,
        mode: StorageMode,
        reset: bool,
    ) -> WorldModelResult<Arc<dyn WorldModelStorage>> {
        let mut live = self.live()?;

        if let Some(current) = live.as_ref() {
            if !reset && !current.storage.is_closed() {
                if current.mode != mode {
                    return Err(WorldModelError::ModeMismatch {
                        live: current.mode,
                        requested: mode,
                    });
                }
                return Ok(Arc::clone(&current.storage));
            }
        }

        if let Some(old) = live.take() {
            teardown(&old);
        }

        let config = StorageConfig {
            mode,
            ..self.config.clone()
        };
        let storage = initialize(&config)?;
        *live = Some(Live {
            mode,
            storage: Arc::clone(&storage),
        });
        Ok(storage)
    }

    /// Tears down the live instance and builds a fresh one in the same mode.
    /// Builds one in the configured mode if none is live.
    ///
    /// # Errors
    /// Anything [`initialize`] returns.
    pub fn reset_instance(&self) -> WorldModelResult<Arc<dyn WorldModelStorage>> {
        let mode = self
            .live()?
            .as_ref()
            .map_or(self.config.mode, |live| live.mode);
        self.get_instance(mode, true)
    }

    /// Tears down the live instance, if any. Teardown failures are logged.
    pub fn shutdown(&self) {
        match self.live() {
            Ok(mut live) => {
                if let Some(old) = live.take() {
                    teardown(&old);
                }
            }
            Err(e) => tracing::warn!(error = %e, "storage manager shutdown skipped"),
        }
    }

    /// Returns true if an open instance is live.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live().is_ok_and(|live| {
            live.as_ref()
                .is_some_and(|current| !current.storage.is_closed())
        })
    }
}

impl Drop for StorageManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Flush then close. Other holders of the `Arc` see `Closed` afterwards.
fn teardown(live: &Live) {
    if live.storage.is_closed() {
        return;
    }
    if let Err(e) = live.storage.flush() {
        tracing::warn!(mode = %live.mode, error = %e, "flush failed during teardown");
    }
    if let Err(e) = live.storage.close() {
        tracing::warn!(mode = %live.mode, error = %e, "close failed during teardown");
    }
    tracing::info!(mode = %live.mode, "storage instance torn down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::NewEntity;
    use tempfile::tempdir;

    #[test]
    fn test_polyglot_is_unsupported() {
        let config = StorageConfig::in_memory().with_mode(StorageMode::Polyglot);
        assert!(matches!(
            initialize(&config),
            Err(WorldModelError::UnsupportedMode {
                mode: StorageMode::Polyglot
            })
        ));
    }

    #[test]
    fn test_locked_directory_is_connection_error() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::at_path(dir.path().join("graph"));
        let _first = initialize(&config).unwrap();
        assert!(matches!(
            initialize(&config),
            Err(WorldModelError::Connection { .. })
        ));
    }

    #[test]
    fn test_get_instance_is_idempotent() {
        let manager = StorageManager::new(StorageConfig::in_memory());
        let a = manager.get_instance(StorageMode::Simple, false).unwrap();
        let _ = a.add_entity(NewEntity::new("Paper")).unwrap();
        let b = manager.get_instance(StorageMode::Simple, false).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.get_statistics().unwrap().entity_count, 1);
    }

    #[test]
    fn test_mode_mismatch_without_reset() {
        let manager = StorageManager::new(StorageConfig::in_memory());
        manager.get_instance(StorageMode::Simple, false).unwrap();
        let err = manager
            .get_instance(StorageMode::Polyglot, false)
            .err().expect("expected get_instance to fail");
        assert!(matches!(err, WorldModelError::ModeMismatch { .. }));

        // With reset the live instance goes away and polyglot is rejected.
        let err = manager.get_instance(StorageMode::Polyglot, true).err().expect("expected get_instance to fail");
        assert!(matches!(err, WorldModelError::UnsupportedMode { .. }));
        assert!(!manager.is_live());
    }

    #[test]
    fn test_reset_closes_old_handle() {
        let manager = StorageManager::new(StorageConfig::in_memory());
        let old = manager.get_instance(StorageMode::Simple, false).unwrap();
        let fresh = manager.reset_instance().unwrap();
        assert!(!Arc::ptr_eq(&old, &fresh));
        assert!(old.is_closed());
        assert!(old.get_statistics().unwrap_err().is_closed());
        assert!(fresh.get_statistics().unwrap().is_empty());
    }

    #[test]
    fn test_reset_reopens_same_directory() {
        let dir = tempdir().unwrap();
        let manager = StorageManager::new(StorageConfig::at_path(dir.path().join("graph")));
        let first = manager.get_instance(StorageMode::Simple, false).unwrap();
        let _ = first.add_entity(NewEntity::new("Paper")).unwrap();

        // The old handle releases the directory lock before the new one opens.
        let second = manager.get_instance(StorageMode::Simple, true).unwrap();
        assert_eq!(second.get_statistics().unwrap().entity_count, 1);

        manager.shutdown();
        assert!(second.is_closed());
        assert!(!manager.is_live());
    }
}

//! Storage configuration.
//!
//! Loading the config from a file or the environment is the embedding
//! application's job; this module only defines the shape and checks it.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{WorldModelError, WorldModelResult};
use crate::graph::{GraphLocation, GraphOptions};
use crate::storage::mapping;

/// Backend variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Graph store only, optionally mirrored.
    #[default]
    Simple,
    /// Graph plus dedicated document and vector stores. Reserved.
    Polyglot,
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple => f.write_str("simple"),
            Self::Polyglot => f.write_str("polyglot"),
        }
    }
}

impl FromStr for StorageMode {
    type Err = WorldModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(Self::Simple),
            "polyglot" => Ok(Self::Polyglot),
            other => Err(WorldModelError::config(format!(
                "unknown storage mode '{other}' (expected 'simple' or 'polyglot')"
            ))),
        }
    }
}

/// Graph credentials. The password never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    #[must_use]
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where the relational mirror lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorLocation {
    Memory,
    File(PathBuf),
}

/// Relational mirror settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// `sqlite::memory:`, `sqlite:///abs/path.db` or a plain path.
    pub uri: String,
}

impl MirrorConfig {
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }

    /// Parses the URI.
    ///
    /// # Errors
    /// `WorldModelError::Config` for an empty or non-sqlite URI.
    pub fn location(&self) -> WorldModelResult<MirrorLocation> {
        let uri = self.uri.trim();
        if uri == "sqlite::memory:" || uri == ":memory:" {
            return Ok(MirrorLocation::Memory);
        }
        let path = match uri.strip_prefix("sqlite://") {
            Some(path) => path,
            None if uri.contains("://") => {
                return Err(WorldModelError::config(format!(
                    "unsupported mirror URI '{uri}': only sqlite is available"
                )))
            }
            None => uri,
        };
        if path.is_empty() {
            return Err(WorldModelError::config("mirror URI has no path"));
        }
        Ok(MirrorLocation::File(PathBuf::from(path)))
    }
}

/// Everything needed to build a storage instance.
///
/// # Examples
///
/// ```
/// use worldmodel::{StorageConfig, StorageMode};
///
/// let config = StorageConfig::in_memory().with_mirror("sqlite::memory:");
/// assert_eq!(config.mode, StorageMode::Simple);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub mode: StorageMode,

    /// `memory://`, `file:///abs/dir` or a plain directory path.
    pub graph_uri: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirror: Option<MirrorConfig>,

    /// fsync every commit.
    pub sync_on_write: bool,

    /// WAL size (bytes) that triggers compaction.
    pub max_wal_size: u64,

    /// Default records per batch for export and import.
    pub batch_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mode: StorageMode::Simple,
            graph_uri: "memory://".to_string(),
            credentials: None,
            mirror: None,
            sync_on_write: true,
            max_wal_size: 64 * 1024 * 1024, // 64 MB
            batch_size: 1000,
        }
    }
}

impl StorageConfig {
    const MIN_WAL_SIZE: u64 = 4 * 1024;

    /// Ephemeral graph, no mirror.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Durable graph in `dir`, no mirror.
    #[must_use]
    pub fn at_path(dir: impl Into<PathBuf>) -> Self {
        Self {
            graph_uri: dir.into().to_string_lossy().into_owned(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: StorageMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_mirror(mut self, uri: impl Into<String>) -> Self {
        self.mirror = Some(MirrorConfig::new(uri));
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::new(user, password));
        self
    }

    /// Parses the graph URI.
    ///
    /// # Errors
    /// `WorldModelError::Config` for an empty or unsupported URI.
    pub fn graph_location(&self) -> WorldModelResult<GraphLocation> {
        let uri = self.graph_uri.trim();
        if uri == "memory://" || uri == "memory" {
            return Ok(GraphLocation::Memory);
        }
        let path = match uri.strip_prefix("file://") {
            Some(path) => path,
            None if uri.contains("://") => {
                return Err(WorldModelError::config(format!(
                    "unsupported graph URI '{uri}'"
                )))
            }
            None => uri,
        };
        if path.is_empty() {
            return Err(WorldModelError::config("graph URI has no path"));
        }
        Ok(GraphLocation::Directory(PathBuf::from(path)))
    }

    pub(crate) fn graph_options(&self) -> GraphOptions {
        GraphOptions {
            indexed_properties: vec![mapping::PROJECT.to_string()],
            sync_on_write: self.sync_on_write,
            max_wal_size: self.max_wal_size,
        }
    }

    /// Checks the config without touching any backend.
    ///
    /// # Errors
    /// `WorldModelError::Config` naming the first bad field.
    pub fn validate(&self) -> WorldModelResult<()> {
        self.graph_location()?;
        if let Some(mirror) = &self.mirror {
            mirror.location()?;
        }
        if let Some(credentials) = &self.credentials {
            if credentials.user.trim().is_empty() {
                return Err(WorldModelError::config("credentials user cannot be empty"));
            }
        }
        if self.max_wal_size < Self::MIN_WAL_SIZE {
            return Err(WorldModelError::config(format!(
                "max_wal_size must be at least {} bytes (got {})",
                Self::MIN_WAL_SIZE,
                self.max_wal_size
            )));
        }
        if self.batch_size == 0 {
            return Err(WorldModelError::config("batch_size must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("simple".parse::<StorageMode>().unwrap(), StorageMode::Simple);
        assert_eq!(" Polyglot ".parse::<StorageMode>().unwrap(), StorageMode::Polyglot);
        assert!("neo4j".parse::<StorageMode>().is_err());
        assert_eq!(StorageMode::Polyglot.to_string(), "polyglot");
    }

    #[test]
    fn test_graph_uris() {
        let mut config = StorageConfig::default();
        assert_eq!(config.graph_location().unwrap(), GraphLocation::Memory);

        config.graph_uri = "file:///var/lib/wm".into();
        assert_eq!(
            config.graph_location().unwrap(),
            GraphLocation::Directory(PathBuf::from("/var/lib/wm"))
        );

        config.graph_uri = "data/wm".into();
        assert_eq!(
            config.graph_location().unwrap(),
            GraphLocation::Directory(PathBuf::from("data/wm"))
        );

        config.graph_uri = "bolt://localhost:7687".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mirror_uris() {
        assert_eq!(
            MirrorConfig::new("sqlite::memory:").location().unwrap(),
            MirrorLocation::Memory
        );
        assert_eq!(
            MirrorConfig::new("sqlite:///tmp/m.db").location().unwrap(),
            MirrorLocation::File(PathBuf::from("/tmp/m.db"))
        );
        assert!(MirrorConfig::new("postgres://db").location().is_err());
        assert!(MirrorConfig::new("sqlite://").location().is_err());
    }

    #[test]
    fn test_validate_limits() {
        let mut config = StorageConfig::in_memory();
        config.max_wal_size = 10;
        assert!(matches!(
            config.validate(),
            Err(WorldModelError::Config { .. })
        ));

        let config = StorageConfig {
            batch_size: 0,
            ..StorageConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        let config = StorageConfig::in_memory().with_credentials("neo", "hunter2");
        let debug = format!("{config:?}");
        assert!(debug.contains("neo"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: StorageConfig =
            serde_json::from_str(r#"{"mode":"simple","mirror":{"uri":"sqlite::memory:"}}"#).unwrap();
        assert_eq!(config.graph_uri, "memory://");
        assert_eq!(config.batch_size, 1000);
        assert!(config.mirror.is_some());
    }
}

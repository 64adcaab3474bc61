//! Dual persistence: a best-effort copy of every committed write in a
//! secondary store.
//!
//! The graph is the source of truth. A mirror failure never fails the
//! operation that triggered it; it is logged and reported back to the caller
//! as a [`ConsistencyWarning`].

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::entity::Entity;
use crate::error::ElementKind;
use crate::relationship::Relationship;

/// Errors raised by a mirror sink.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("mirror unavailable: {0}")]
    Unavailable(String),

    #[error("mirror write failed: {0}")]
    Write(String),

    #[error("mirror encoding failed: {0}")]
    Encode(String),

    #[error("poisoned lock: {0}")]
    Poisoned(&'static str),
}

/// A committed record handed to the mirror.
#[derive(Debug, Clone, Copy)]
pub enum MirrorRecord<'a> {
    Entity(&'a Entity),
    Relationship(&'a Relationship),
}

impl MirrorRecord<'_> {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Entity(e) => e.id.as_str(),
            Self::Relationship(r) => r.id.as_str(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ElementKind {
        match self {
            Self::Entity(_) => ElementKind::Entity,
            Self::Relationship(_) => ElementKind::Relationship,
        }
    }
}

/// Secondary store receiving denormalized copies of committed records.
///
/// Writes are upserts: recording the same id twice keeps the latest copy.
pub trait MirrorSink: Send + Sync {
    /// Short name used in log events.
    fn name(&self) -> &str;

    /// Stores one record.
    ///
    /// # Errors
    /// Any `MirrorError`; the caller downgrades it to a warning.
    fn record(&self, record: MirrorRecord<'_>) -> Result<(), MirrorError>;

    /// Stores many records. The default writes them one at a time.
    ///
    /// # Errors
    /// The first `MirrorError` encountered.
    fn record_batch(&self, records: &[MirrorRecord<'_>]) -> Result<(), MirrorError> {
        for record in records {
            self.record(*record)?;
        }
        Ok(())
    }

    /// Removes every record.
    ///
    /// # Errors
    /// Any `MirrorError`.
    fn clear(&self) -> Result<(), MirrorError>;
}

/// A mirror write that did not happen. The primary write did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyWarning {
    /// Operation that triggered the mirror write, e.g. `add_entity`.
    pub operation: &'static str,
    /// Id of the record that failed to mirror, if it was a single record.
    pub target: Option<String>,
    pub reason: String,
}

impl fmt::Display for ConsistencyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) => write!(
                f,
                "{} of '{target}' was not mirrored: {}",
                self.operation, self.reason
            ),
            None => write!(f, "{} was not mirrored: {}", self.operation, self.reason),
        }
    }
}

/// Outcome of the mirror step of a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorStatus {
    /// The mirror holds the new state.
    Synced,
    /// No mirror is configured.
    Disabled,
    /// The mirror missed this write.
    Degraded(ConsistencyWarning),
}

impl MirrorStatus {
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(_))
    }

    #[must_use]
    pub const fn warning(&self) -> Option<&ConsistencyWarning> {
        match self {
            Self::Degraded(warning) => Some(warning),
            _ => None,
        }
    }
}

#[derive(Clone)]
enum Target {
    Disabled,
    /// Configured but failed to open; every write is degraded.
    Unavailable(String),
    Sink(Arc<dyn MirrorSink>),
}

/// Forwards committed writes to the configured mirror.
#[derive(Clone)]
pub struct MirrorSync {
    target: Target,
}

impl fmt::Debug for MirrorSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = match &self.target {
            Target::Disabled => "disabled".to_string(),
            Target::Unavailable(reason) => format!("unavailable ({reason})"),
            Target::Sink(sink) => sink.name().to_string(),
        };
        f.debug_struct("MirrorSync").field("target", &target).finish()
    }
}

impl MirrorSync {
    #[must_use]
    pub fn new(sink: Arc<dyn MirrorSink>) -> Self {
        Self {
            target: Target::Sink(sink),
        }
    }

    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            target: Target::Disabled,
        }
    }

    /// A mirror that was configured but could not be opened.
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            target: Target::Unavailable(reason.into()),
        }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        !matches!(self.target, Target::Disabled)
    }

    /// Mirrors one committed record.
    pub fn mirror(&self, operation: &'static str, record: MirrorRecord<'_>) -> MirrorStatus {
        self.run(operation, Some(record.id()), |sink| sink.record(record))
    }

    /// Mirrors a batch of committed records, e.g. after an import.
    pub fn mirror_batch(
        &self,
        operation: &'static str,
        records: &[MirrorRecord<'_>],
    ) -> MirrorStatus {
        if records.is_empty() {
            return self.run(operation, None, |_| Ok(()));
        }
        self.run(operation, None, |sink| sink.record_batch(records))
    }

    /// Empties the mirror after a reset.
    pub fn clear(&self, operation: &'static str) -> MirrorStatus {
        self.run(operation, None, |sink| sink.clear())
    }

    fn run(
        &self,
        operation: &'static str,
        target: Option<&str>,
        write: impl FnOnce(&dyn MirrorSink) -> Result<(), MirrorError>,
    ) -> MirrorStatus {
        let reason = match &self.target {
            Target::Disabled => return MirrorStatus::Disabled,
            Target::Unavailable(reason) => reason.clone(),
            Target::Sink(sink) => match write(sink.as_ref()) {
                Ok(()) => return MirrorStatus::Synced,
                Err(e) => e.to_string(),
            },
        };

        let warning = ConsistencyWarning {
            operation,
            target: target.map(str::to_string),
            reason,
        };
        tracing::warn!(
            operation,
            record = warning.target.as_deref().unwrap_or("-"),
            reason = %warning.reason,
            "mirror out of sync with graph"
        );
        MirrorStatus::Degraded(warning)
    }
}

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::attrs::EntryId;
use super::value::ValueType;

/// Declaration of an attribute a status manager exposes to policy conditions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDef {
    pub name: String,
    pub value_type: ValueType,
}

impl AttributeDef {
    #[must_use]
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
        }
    }
}

/// Status manager attached to a policy.
///
/// Provides the legal values of the `status` criterion and the extra attributes
/// conditions may refer to by name.
pub trait StatusManager: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Statuses an entry can be in. The empty string (no status) is always allowed.
    fn statuses(&self) -> &[String];

    /// Whether this manager keeps track of removed entries (enables `rm_time`).
    fn manages_deleted(&self) -> bool {
        false
    }

    fn resolve_status_attr(&self, name: &str) -> Option<AttributeDef>;

    /// Current status of `entry`, when the manager can tell without the attribute set.
    fn current_status(&self, _entry: &EntryId) -> Option<&str> {
        None
    }
}

/// Table-driven [`StatusManager`].
///
/// ```
/// use fspolicy::{StaticStatusManager, StatusManager, ValueType};
///
/// let sm = StaticStatusManager::new("lhsm")
///     .status("new")
///     .status("archived")
///     .attribute("last_archive", ValueType::Duration);
/// assert!(sm.resolve_status_attr("LAST_ARCHIVE").is_some());
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticStatusManager {
    name: String,
    statuses: Vec<String>,
    attributes: Vec<AttributeDef>,
    deleted: bool,
}

impl StaticStatusManager {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.statuses.push(status.into());
        self
    }

    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>, value_type: ValueType) -> Self {
        self.attributes.push(AttributeDef::new(name, value_type));
        self
    }

    #[must_use]
    pub fn tracks_deleted(mut self, deleted: bool) -> Self {
        self.deleted = deleted;
        self
    }
}

impl StatusManager for StaticStatusManager {
    fn name(&self) -> &str {
        &self.name
    }

    fn statuses(&self) -> &[String] {
        &self.statuses
    }

    fn manages_deleted(&self) -> bool {
        self.deleted
    }

    fn resolve_status_attr(&self, name: &str) -> Option<AttributeDef> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .cloned()
    }
}

/// Status managers available to `define_policy` blocks, by case-insensitive name.
#[derive(Debug, Clone, Default)]
pub struct StatusRegistry {
    managers: HashMap<String, Arc<dyn StatusManager>>,
}

impl StatusRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn register(mut self, manager: impl StatusManager + 'static) -> Self {
        let key = manager.name().to_ascii_lowercase();
        self.managers.insert(key, Arc::new(manager));
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn StatusManager>> {
        self.managers.get(&name.to_ascii_lowercase()).cloned()
    }
}

/// Failure reading an extended attribute.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XattrError {
    #[error("no such attribute")]
    NoAttribute,

    #[error("no such file or directory")]
    NotFound,

    #[error("extended attributes not supported")]
    NotSupported,

    #[error("{0}")]
    Other(String),
}

impl XattrError {
    /// Errors that mean "the attribute is not there" rather than a failure.
    #[must_use]
    pub fn is_absent(&self) -> bool {
        matches!(self, XattrError::NoAttribute | XattrError::NotFound)
    }
}

/// Reader of extended attributes, keyed by entry path (or identifier when the path
/// is unknown).
pub trait XattrReader: Send + Sync {
    /// # Errors
    ///
    /// Returns [`XattrError`] when the attribute cannot be read.
    fn get_xattr(&self, path_or_id: &str, name: &str) -> Result<String, XattrError>;
}

//! Object metadata shared by declared records and runtime workloads.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::result::Result;

/// Namespace/name pair addressing a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Standard object metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    /// Assigned by the store on create.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    /// Bumped by the store on every write; zero means "never stored".
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }

    /// The owner reference marked as the managing controller, if any.
    #[must_use]
    pub fn controller_ref(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|r| r.controller)
    }

    /// Whether every `(key, value)` in `selector` is present in the labels.
    #[must_use]
    pub fn matches_labels(&self, selector: &BTreeMap<String, String>) -> bool {
        selector
            .iter()
            .all(|(k, v)| self.labels.get(k).is_some_and(|actual| actual == v))
    }
}

/// Back-reference from a runtime workload to the record that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
    #[serde(default)]
    pub controller: bool,
    #[serde(default)]
    pub block_owner_deletion: bool,
}

/// Callback a workload client invokes on the metadata of every object it
/// creates, linking it back to the declared record.
pub trait OwnerSetter: Send + Sync {
    /// Record ownership on `meta`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OwnerConflict`] if `meta` is already controlled by
    /// a different owner.
    fn set_owner(&self, meta: &mut ObjectMeta) -> Result<()>;
}

/// Marks the created object as controlled by one owner.
#[derive(Debug, Clone)]
pub struct ControllerReference {
    owner: OwnerReference,
}

impl ControllerReference {
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        owner: &ObjectMeta,
    ) -> Self {
        Self {
            owner: OwnerReference {
                api_version: api_version.into(),
                kind: kind.into(),
                name: owner.name.clone(),
                uid: owner.uid.clone(),
                controller: true,
                block_owner_deletion: true,
            },
        }
    }

    #[must_use]
    pub const fn reference(&self) -> &OwnerReference {
        &self.owner
    }
}

impl OwnerSetter for ControllerReference {
    fn set_owner(&self, meta: &mut ObjectMeta) -> Result<()> {
        if let Some(existing) = meta.controller_ref() {
            if existing.uid != self.owner.uid {
                return Err(Error::OwnerConflict {
                    name: meta.name.clone(),
                    owner: format!("{} {}", existing.kind, existing.name),
                });
            }
            return Ok(());
        }

        meta.owner_references.retain(|r| r.uid != self.owner.uid);
        meta.owner_references.push(self.owner.clone());
        Ok(())
    }
}

/// Owner setter that leaves metadata untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOwner;

impl OwnerSetter for NoOwner {
    fn set_owner(&self, _meta: &mut ObjectMeta) -> Result<()> {
        Ok(())
    }
}

//! Declared records: the desired-state objects authors create.
//!
//! Each record pairs an author-owned `spec` with a reconciler-owned
//! `status`. The reconcilers only ever write `status`, through a merge patch.

use std::collections::BTreeMap;

use converge_core::naming::parse_image_registry_host;
use converge_core::{
    Error, Healthcheck, Lrp, LrpStatus, ObjectMeta, PrivateRegistry, Result, Sidecar, Task,
    TaskStatus, VolumeMount, WorkloadIdentifier,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// API group/version stamped on owner references to records.
pub const API_VERSION: &str = "converge.io/v1";

/// A declared record kept in a [`crate::store::RecordStore`].
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    const KIND: &'static str;

    fn metadata(&self) -> &ObjectMeta;

    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    /// Replace the status with `other`'s, leaving spec and metadata alone.
    fn copy_status_from(&mut self, other: &Self);
}

/// Desired state of a long-running process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LrpSpec {
    #[serde(rename = "GUID")]
    pub guid: String,
    pub version: String,
    #[serde(default)]
    pub process_type: String,
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub app_guid: String,
    #[serde(default)]
    pub org_name: String,
    #[serde(default)]
    pub org_guid: String,
    #[serde(default)]
    pub space_name: String,
    #[serde(default)]
    pub space_guid: String,
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub sidecars: Vec<Sidecar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_registry: Option<PrivateRegistry>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub health: Healthcheck,
    #[serde(default)]
    pub ports: Vec<i32>,
    pub instances: i32,
    #[serde(default, rename = "memoryMB")]
    pub memory_mb: i64,
    #[serde(default, rename = "diskMB")]
    pub disk_mb: i64,
    #[serde(default)]
    pub cpu_weight: u8,
    #[serde(default)]
    pub volume_mounts: Vec<VolumeMount>,
    #[serde(default)]
    pub last_updated: String,
    #[serde(default)]
    pub user_defined_annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LrpRecord {
    pub metadata: ObjectMeta,
    pub spec: LrpSpec,
    #[serde(default)]
    pub status: LrpStatus,
}

impl LrpRecord {
    #[must_use]
    pub fn identifier(&self) -> WorkloadIdentifier {
        WorkloadIdentifier::new(self.spec.guid.clone(), self.spec.version.clone())
    }

    /// The workload-client view of this record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Translation`] when the record lacks its GUID or
    /// version.
    pub fn to_lrp(&self) -> Result<Lrp> {
        let spec = &self.spec;
        if spec.guid.is_empty() || spec.version.is_empty() {
            return Err(Error::translation(format!(
                "lrp {} must declare both GUID and version",
                self.metadata.key()
            )));
        }

        let private_registry = spec.private_registry.as_ref().map(|r| PrivateRegistry {
            server: parse_image_registry_host(&spec.image),
            username: r.username.clone(),
            password: r.password.clone(),
        });

        Ok(Lrp {
            guid: spec.guid.clone(),
            version: spec.version.clone(),
            process_type: spec.process_type.clone(),
            app_name: spec.app_name.clone(),
            app_guid: spec.app_guid.clone(),
            org_name: spec.org_name.clone(),
            org_guid: spec.org_guid.clone(),
            space_name: spec.space_name.clone(),
            space_guid: spec.space_guid.clone(),
            image: spec.image.clone(),
            command: spec.command.clone(),
            sidecars: spec.sidecars.clone(),
            private_registry,
            env: spec.env.clone(),
            health: spec.health.clone(),
            ports: spec.ports.clone(),
            target_instances: spec.instances,
            memory_mb: spec.memory_mb,
            disk_mb: spec.disk_mb,
            cpu_weight: spec.cpu_weight,
            volume_mounts: spec.volume_mounts.clone(),
            last_updated: spec.last_updated.clone(),
            user_defined_annotations: spec.user_defined_annotations.clone(),
        })
    }
}

impl Record for LrpRecord {
    const KIND: &'static str = "LRP";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn copy_status_from(&mut self, other: &Self) {
        self.status = other.status;
    }
}

/// Desired state of a run-to-completion task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    #[serde(rename = "GUID")]
    pub guid: String,
    #[serde(default)]
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_registry: Option<PrivateRegistry>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub app_guid: String,
    #[serde(default)]
    pub org_name: String,
    #[serde(default)]
    pub org_guid: String,
    #[serde(default)]
    pub space_name: String,
    #[serde(default)]
    pub space_guid: String,
    #[serde(default, rename = "memoryMB")]
    pub memory_mb: i64,
    #[serde(default, rename = "diskMB")]
    pub disk_mb: i64,
    #[serde(default)]
    pub cpu_weight: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub metadata: ObjectMeta,
    pub spec: TaskSpec,
    #[serde(default)]
    pub status: TaskStatus,
}

impl TaskRecord {
    /// The workload-client view of this record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Translation`] when the record lacks its GUID.
    pub fn to_task(&self) -> Result<Task> {
        let spec = &self.spec;
        if spec.guid.is_empty() {
            return Err(Error::translation(format!(
                "task {} must declare a GUID",
                self.metadata.key()
            )));
        }

        let private_registry = spec.private_registry.as_ref().map(|r| PrivateRegistry {
            server: parse_image_registry_host(&spec.image),
            username: r.username.clone(),
            password: r.password.clone(),
        });

        Ok(Task {
            guid: spec.guid.clone(),
            name: spec.name.clone(),
            image: spec.image.clone(),
            private_registry,
            env: spec.env.clone(),
            command: spec.command.clone(),
            app_name: spec.app_name.clone(),
            app_guid: spec.app_guid.clone(),
            org_name: spec.org_name.clone(),
            org_guid: spec.org_guid.clone(),
            space_name: spec.space_name.clone(),
            space_guid: spec.space_guid.clone(),
            memory_mb: spec.memory_mb,
            disk_mb: spec.disk_mb,
            cpu_weight: spec.cpu_weight,
        })
    }
}

impl Record for TaskRecord {
    const KIND: &'static str = "Task";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn copy_status_from(&mut self, other: &Self) {
        self.status = other.status.clone();
    }
}

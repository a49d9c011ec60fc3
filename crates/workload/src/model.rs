//! Runtime workload objects.
//!
//! A [`Workload`] is the replicated process group backing an LRP; each
//! replica is an [`Instance`] named `{workload}-{index}`. A [`Job`] backs a
//! task. [`DisruptionBudget`] is the companion object kept in step with the
//! workload's replica count.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use converge_core::ObjectMeta;
use serde::{Deserialize, Serialize};

/// Name of the container running the application process.
pub const APPLICATION_CONTAINER_NAME: &str = "opi";

/// Name of the container running a task.
pub const TASK_CONTAINER_NAME: &str = "opi-task";

pub const LABEL_GUID: &str = "workloads.converge.io/guid";
pub const LABEL_VERSION: &str = "workloads.converge.io/version";
pub const LABEL_PROCESS_TYPE: &str = "workloads.converge.io/process-type";
pub const LABEL_APP_GUID: &str = "workloads.converge.io/app-guid";
pub const LABEL_SOURCE_TYPE: &str = "workloads.converge.io/source-type";
pub const LABEL_TASK_GUID: &str = "workloads.converge.io/task-guid";

pub const ANNOTATION_LAST_UPDATED: &str = "workloads.converge.io/last-updated";
pub const ANNOTATION_PROCESS_GUID: &str = "workloads.converge.io/process-guid";
pub const ANNOTATION_APP_NAME: &str = "workloads.converge.io/app-name";
pub const ANNOTATION_SPACE_NAME: &str = "workloads.converge.io/space-name";
pub const ANNOTATION_ORG_NAME: &str = "workloads.converge.io/org-name";

pub const SOURCE_TYPE_APP: &str = "APP";
pub const SOURCE_TYPE_TASK: &str = "TASK";

pub type Labels = BTreeMap<String, String>;

/// Replicated process group for one LRP.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub metadata: ObjectMeta,
    pub spec: WorkloadSpec,
    #[serde(default)]
    pub status: WorkloadStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSpec {
    pub replicas: i32,
    pub selector: Labels,
    pub template: PodTemplate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadStatus {
    pub replicas: i32,
    pub ready_replicas: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodTemplate {
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub annotations: Labels,
    pub containers: Vec<Container>,
}

impl PodTemplate {
    /// The container with the given name.
    #[must_use]
    pub fn container(&self, name: &str) -> Option<&Container> {
        self.containers.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub ports: Vec<i32>,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness_probe: Option<Probe>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<Probe>,
    #[serde(default)]
    pub volume_mounts: Vec<ContainerVolumeMount>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resources {
    pub memory_mb: i64,
    pub disk_mb: i64,
    pub cpu_weight: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Probe {
    Http { port: i32, path: String, timeout_ms: u32 },
    Tcp { port: i32, timeout_ms: u32 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerVolumeMount {
    pub mount_path: String,
    pub claim_name: String,
}

/// One numbered replica of a [`Workload`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub metadata: ObjectMeta,
    pub index: u32,
    pub ready: bool,
}

/// Minimum-availability guard for a replicated workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisruptionBudget {
    pub metadata: ObjectMeta,
    pub min_available: String,
    pub selector: Labels,
}

/// Run-once workload backing a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub metadata: ObjectMeta,
    pub template: PodTemplate,
    #[serde(default)]
    pub status: JobStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    #[default]
    Pending,
    Active,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub phase: JobPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
}

/// Label selector matching the workload for `guid`/`version`.
#[must_use]
pub fn identifier_selector(guid: &str, version: &str) -> Labels {
    let mut selector = Labels::new();
    selector.insert(LABEL_GUID.to_string(), guid.to_string());
    selector.insert(LABEL_VERSION.to_string(), version.to_string());
    selector
}

/// Label selector matching the job for a task GUID.
#[must_use]
pub fn task_selector(guid: &str) -> Labels {
    let mut selector = Labels::new();
    selector.insert(LABEL_TASK_GUID.to_string(), guid.to_string());
    selector
}

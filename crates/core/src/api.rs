//! Workload-level models exchanged between reconcilers and workload clients.
//!
//! These are the payloads a declared record is translated into; they carry
//! no store metadata.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable key correlating a declared record with its runtime workload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkloadIdentifier {
    pub guid: String,
    pub version: String,
}

impl WorkloadIdentifier {
    pub fn new(guid: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            version: version.into(),
        }
    }

    /// `guid-version`, the process GUID used in labels and hashes.
    #[must_use]
    pub fn process_guid(&self) -> String {
        format!("{}-{}", self.guid, self.version)
    }
}

impl std::fmt::Display for WorkloadIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.guid, self.version)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateRegistry {
    #[serde(default)]
    pub server: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Healthcheck {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub port: i32,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub timeout_ms: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sidecar {
    pub name: String,
    pub command: Vec<String>,
    #[serde(default)]
    pub memory_mb: i64,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub mount_path: String,
    pub claim_name: String,
}

/// A long-running process as the workload client understands it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lrp {
    pub guid: String,
    pub version: String,
    pub process_type: String,
    pub app_name: String,
    pub app_guid: String,
    pub org_name: String,
    pub org_guid: String,
    pub space_name: String,
    pub space_guid: String,
    pub image: String,
    pub command: Vec<String>,
    pub sidecars: Vec<Sidecar>,
    pub private_registry: Option<PrivateRegistry>,
    pub env: BTreeMap<String, String>,
    pub health: Healthcheck,
    pub ports: Vec<i32>,
    pub target_instances: i32,
    pub memory_mb: i64,
    pub disk_mb: i64,
    pub cpu_weight: u8,
    pub volume_mounts: Vec<VolumeMount>,
    pub last_updated: String,
    pub user_defined_annotations: BTreeMap<String, String>,
}

impl Lrp {
    #[must_use]
    pub fn identifier(&self) -> WorkloadIdentifier {
        WorkloadIdentifier::new(self.guid.clone(), self.version.clone())
    }
}

/// Observed status of a long-running process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LrpStatus {
    /// Replicas observed running and ready.
    pub replicas: i32,
}

/// A run-to-completion task as the workload client understands it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub guid: String,
    pub name: String,
    pub image: String,
    pub private_registry: Option<PrivateRegistry>,
    pub env: BTreeMap<String, String>,
    pub command: Vec<String>,
    pub app_name: String,
    pub app_guid: String,
    pub org_name: String,
    pub org_guid: String,
    pub space_name: String,
    pub space_guid: String,
    pub memory_mb: i64,
    pub disk_mb: i64,
    pub cpu_weight: u8,
}

/// Lifecycle of a task; only ever moves forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    #[default]
    Starting,
    Running,
    Succeeded,
    Failed,
}

impl ExecutionStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Position in the forward-only lifecycle.
    const fn rank(self) -> u8 {
        match self {
            Self::Starting => 0,
            Self::Running => 1,
            Self::Succeeded | Self::Failed => 2,
        }
    }

    /// Whether moving from `self` to `next` respects monotonicity.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return self as u8 == next as u8;
        }
        next.rank() >= self.rank()
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Observed status of a task, mirrored onto the declared record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub execution_status: ExecutionStatus,
}

impl TaskStatus {
    #[must_use]
    pub fn running(start_time: DateTime<Utc>) -> Self {
        Self {
            start_time: Some(start_time),
            end_time: None,
            execution_status: ExecutionStatus::Running,
        }
    }

    #[must_use]
    pub fn finished(
        status: ExecutionStatus,
        start_time: Option<DateTime<Utc>>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            start_time,
            end_time: Some(end_time),
            execution_status: status,
        }
    }

    /// Terminal means a final execution status with an end time recorded.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.end_time.is_some() && self.execution_status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_terminal_requires_end_time() {
        let status = TaskStatus {
            execution_status: ExecutionStatus::Succeeded,
            ..Default::default()
        };
        assert!(!status.is_terminal());

        let status = TaskStatus::finished(ExecutionStatus::Failed, None, Utc::now());
        assert!(status.is_terminal());
    }

    #[test]
    fn test_running_is_not_terminal() {
        assert!(!TaskStatus::running(Utc::now()).is_terminal());
    }

    #[test]
    fn test_transitions_are_monotonic() {
        use ExecutionStatus::{Failed, Running, Starting, Succeeded};

        assert!(Starting.can_transition_to(Running));
        assert!(Starting.can_transition_to(Succeeded));
        assert!(Running.can_transition_to(Failed));
        assert!(!Running.can_transition_to(Starting));
        assert!(!Succeeded.can_transition_to(Failed));
        assert!(Succeeded.can_transition_to(Succeeded));
    }

    #[test]
    fn test_execution_status_serializes_lowercase() {
        let json = serde_json::to_string(&ExecutionStatus::Succeeded).ok();
        assert_eq!(json.as_deref(), Some("\"succeeded\""));
    }

    #[test]
    fn test_process_guid() {
        let id = WorkloadIdentifier::new("g1", "v1");
        assert_eq!(id.process_guid(), "g1-v1");
        assert_eq!(id.to_string(), "g1/v1");
    }

    #[test]
    fn test_task_status_fields_are_camel_case() {
        let status = TaskStatus::running(Utc::now());
        let json = serde_json::to_value(&status).unwrap();

        assert!(json.get("startTime").is_some());
        assert!(json.get("executionStatus").is_some());
        assert!(json.get("start_time").is_none());

        let parsed: TaskStatus = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, status);
    }
}

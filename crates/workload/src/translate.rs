//! Translation between the client-facing models and runtime objects.

use std::collections::BTreeMap;

use converge_core::naming::{parse_image_registry_host, workload_name};
use converge_core::{
    Error, ExecutionStatus, Healthcheck, Lrp, Result, Sidecar, Task, TaskStatus, VolumeMount,
};

use crate::model::{
    ANNOTATION_APP_NAME, ANNOTATION_LAST_UPDATED, ANNOTATION_ORG_NAME, ANNOTATION_PROCESS_GUID,
    ANNOTATION_SPACE_NAME, APPLICATION_CONTAINER_NAME, Container, ContainerVolumeMount, Job,
    JobPhase, JobStatus, LABEL_APP_GUID, LABEL_GUID, LABEL_PROCESS_TYPE, LABEL_SOURCE_TYPE,
    LABEL_VERSION, Labels, PodTemplate, Probe, Resources, SOURCE_TYPE_APP,
    SOURCE_TYPE_TASK, TASK_CONTAINER_NAME, Workload, WorkloadSpec, identifier_selector,
    task_selector,
};

/// Prefix shared by every label and annotation this crate manages.
const MANAGED_PREFIX: &str = "workloads.converge.io/";

/// Workload-wide settings that do not come from the LRP itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslateOptions {
    pub service_account: Option<String>,
    pub registry_secret_name: Option<String>,
}

/// Reject LRPs no workload can be built from.
///
/// # Errors
///
/// Returns [`Error::Translation`] for an empty image, a negative instance
/// count or a disk quota below 1 MB.
pub fn validate_lrp(lrp: &Lrp) -> Result<()> {
    if lrp.image.trim().is_empty() {
        return Err(Error::translation(format!("lrp {} has no image", lrp.identifier())));
    }
    if lrp.target_instances < 0 {
        return Err(Error::translation(format!(
            "lrp {} has negative instance count {}",
            lrp.identifier(),
            lrp.target_instances
        )));
    }
    if lrp.disk_mb < 1 {
        return Err(Error::translation(format!(
            "lrp {} has invalid disk quota {}MB",
            lrp.identifier(),
            lrp.disk_mb
        )));
    }
    Ok(())
}

/// Build the workload for `lrp` in `namespace`.
///
/// # Errors
///
/// Returns [`Error::Translation`] when the LRP fails validation.
pub fn lrp_to_workload(namespace: &str, lrp: &Lrp, options: &TranslateOptions) -> Result<Workload> {
    validate_lrp(lrp)?;

    let id = lrp.identifier();
    let name = workload_name(&lrp.app_name, &lrp.space_name, &id.process_guid());

    let mut labels = identifier_selector(&lrp.guid, &lrp.version);
    labels.insert(LABEL_PROCESS_TYPE.to_string(), lrp.process_type.clone());
    labels.insert(LABEL_APP_GUID.to_string(), lrp.app_guid.clone());
    labels.insert(LABEL_SOURCE_TYPE.to_string(), SOURCE_TYPE_APP.to_string());

    let mut annotations = lrp.user_defined_annotations.clone();
    annotations.insert(ANNOTATION_PROCESS_GUID.to_string(), id.process_guid());
    annotations.insert(ANNOTATION_LAST_UPDATED.to_string(), lrp.last_updated.clone());
    annotations.insert(ANNOTATION_APP_NAME.to_string(), lrp.app_name.clone());
    annotations.insert(ANNOTATION_SPACE_NAME.to_string(), lrp.space_name.clone());
    annotations.insert(ANNOTATION_ORG_NAME.to_string(), lrp.org_name.clone());

    let probe = probe_for(&lrp.health);
    let application = Container {
        name: APPLICATION_CONTAINER_NAME.to_string(),
        image: lrp.image.clone(),
        command: lrp.command.clone(),
        env: lrp.env.clone(),
        ports: lrp.ports.clone(),
        resources: Resources {
            memory_mb: lrp.memory_mb,
            disk_mb: lrp.disk_mb,
            cpu_weight: lrp.cpu_weight,
        },
        liveness_probe: probe.clone(),
        readiness_probe: probe,
        volume_mounts: lrp
            .volume_mounts
            .iter()
            .map(|m| ContainerVolumeMount {
                mount_path: m.mount_path.clone(),
                claim_name: m.claim_name.clone(),
            })
            .collect(),
    };

    let containers = std::iter::once(application)
        .chain(lrp.sidecars.iter().map(|s| sidecar_container(s, &lrp.image)))
        .collect();

    let mut workload = Workload {
        spec: WorkloadSpec {
            replicas: lrp.target_instances,
            selector: identifier_selector(&lrp.guid, &lrp.version),
            template: PodTemplate {
                labels: labels.clone(),
                annotations: annotations.clone(),
                containers,
            },
            service_account: options.service_account.clone(),
            image_pull_secrets: pull_secrets(&name, lrp.private_registry.is_some(), options),
        },
        ..Default::default()
    };
    workload.metadata.name = name;
    workload.metadata.namespace = namespace.to_string();
    workload.metadata.labels = labels;
    workload.metadata.annotations = annotations;
    Ok(workload)
}

/// Read a workload back into the [`Lrp`] it was built from.
///
/// Registry credentials are not recoverable and come back as `None`.
///
/// # Errors
///
/// Returns [`Error::Translation`] when the workload has no application
/// container or lacks its identifier labels.
pub fn workload_to_lrp(workload: &Workload) -> Result<Lrp> {
    let meta = &workload.metadata;
    let label = |key: &str| meta.labels.get(key).cloned().unwrap_or_default();
    let annotation = |key: &str| meta.annotations.get(key).cloned().unwrap_or_default();

    let guid = label(LABEL_GUID);
    if guid.is_empty() {
        return Err(Error::translation(format!(
            "workload {} carries no guid label",
            meta.key()
        )));
    }

    let app = workload
        .spec
        .template
        .container(APPLICATION_CONTAINER_NAME)
        .ok_or_else(|| {
            Error::translation(format!(
                "workload {} has no {APPLICATION_CONTAINER_NAME} container",
                meta.key()
            ))
        })?;

    let sidecars = workload
        .spec
        .template
        .containers
        .iter()
        .filter(|c| c.name != APPLICATION_CONTAINER_NAME)
        .map(|c| Sidecar {
            name: c.name.clone(),
            command: c.command.clone(),
            memory_mb: c.resources.memory_mb,
            env: c.env.clone(),
        })
        .collect();

    let user_defined_annotations: BTreeMap<String, String> = meta
        .annotations
        .iter()
        .filter(|(k, _)| !k.starts_with(MANAGED_PREFIX))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Ok(Lrp {
        guid,
        version: label(LABEL_VERSION),
        process_type: label(LABEL_PROCESS_TYPE),
        app_guid: label(LABEL_APP_GUID),
        app_name: annotation(ANNOTATION_APP_NAME),
        space_name: annotation(ANNOTATION_SPACE_NAME),
        org_name: annotation(ANNOTATION_ORG_NAME),
        image: app.image.clone(),
        command: app.command.clone(),
        sidecars,
        env: app.env.clone(),
        health: app.liveness_probe.as_ref().map(healthcheck_for).unwrap_or_default(),
        ports: app.ports.clone(),
        target_instances: workload.spec.replicas,
        memory_mb: app.resources.memory_mb,
        disk_mb: app.resources.disk_mb,
        cpu_weight: app.resources.cpu_weight,
        volume_mounts: app
            .volume_mounts
            .iter()
            .map(|m| VolumeMount {
                mount_path: m.mount_path.clone(),
                claim_name: m.claim_name.clone(),
            })
            .collect(),
        last_updated: annotation(ANNOTATION_LAST_UPDATED),
        user_defined_annotations,
        ..Default::default()
    })
}

/// Build the job running `task` in `namespace`.
///
/// # Errors
///
/// Returns [`Error::Translation`] when the task has no image.
pub fn task_to_job(namespace: &str, task: &Task, options: &TranslateOptions) -> Result<Job> {
    if task.image.trim().is_empty() {
        return Err(Error::translation(format!("task {} has no image", task.guid)));
    }

    let mut labels = task_selector(&task.guid);
    labels.insert(LABEL_APP_GUID.to_string(), task.app_guid.clone());
    labels.insert(LABEL_SOURCE_TYPE.to_string(), SOURCE_TYPE_TASK.to_string());

    let mut annotations = Labels::new();
    annotations.insert(ANNOTATION_APP_NAME.to_string(), task.app_name.clone());
    annotations.insert(ANNOTATION_SPACE_NAME.to_string(), task.space_name.clone());
    annotations.insert(ANNOTATION_ORG_NAME.to_string(), task.org_name.clone());

    let container = Container {
        name: TASK_CONTAINER_NAME.to_string(),
        image: task.image.clone(),
        command: task.command.clone(),
        env: task.env.clone(),
        resources: Resources {
            memory_mb: task.memory_mb,
            disk_mb: task.disk_mb,
            cpu_weight: task.cpu_weight,
        },
        ..Default::default()
    };

    let mut job = Job {
        template: PodTemplate {
            labels: labels.clone(),
            annotations: annotations.clone(),
            containers: vec![container],
        },
        ..Default::default()
    };
    job.metadata.name = workload_name(&task.app_name, &task.space_name, &task.guid);
    job.metadata.namespace = namespace.to_string();
    job.metadata.labels = labels;
    job.metadata.annotations = annotations;
    if let Some(secret) = &options.registry_secret_name {
        job.metadata
            .annotations
            .insert(format!("{MANAGED_PREFIX}registry-secret"), secret.clone());
    }
    if task.private_registry.is_some() {
        job.metadata.annotations.insert(
            format!("{MANAGED_PREFIX}registry-server"),
            parse_image_registry_host(&task.image),
        );
    }
    Ok(job)
}

/// Map a job's observed state onto the task lifecycle.
#[must_use]
pub fn job_status_to_task_status(status: &JobStatus) -> TaskStatus {
    match status.phase {
        JobPhase::Pending => TaskStatus::default(),
        JobPhase::Active => TaskStatus {
            start_time: status.start_time,
            end_time: None,
            execution_status: ExecutionStatus::Running,
        },
        JobPhase::Succeeded => finished(ExecutionStatus::Succeeded, status),
        JobPhase::Failed => finished(ExecutionStatus::Failed, status),
    }
}

fn finished(execution_status: ExecutionStatus, status: &JobStatus) -> TaskStatus {
    match status.completion_time {
        Some(end) => TaskStatus::finished(execution_status, status.start_time, end),
        // Without an end time the task is not terminal yet.
        None => TaskStatus {
            start_time: status.start_time,
            end_time: None,
            execution_status: ExecutionStatus::Running,
        },
    }
}

fn probe_for(health: &Healthcheck) -> Option<Probe> {
    match health.kind.as_str() {
        "http" => Some(Probe::Http {
            port: health.port,
            path: health.endpoint.clone(),
            timeout_ms: health.timeout_ms,
        }),
        "port" | "tcp" => Some(Probe::Tcp {
            port: health.port,
            timeout_ms: health.timeout_ms,
        }),
        _ => None,
    }
}

fn healthcheck_for(probe: &Probe) -> Healthcheck {
    match probe {
        Probe::Http {
            port,
            path,
            timeout_ms,
        } => Healthcheck {
            kind: "http".to_string(),
            port: *port,
            endpoint: path.clone(),
            timeout_ms: *timeout_ms,
        },
        Probe::Tcp { port, timeout_ms } => Healthcheck {
            kind: "port".to_string(),
            port: *port,
            endpoint: String::new(),
            timeout_ms: *timeout_ms,
        },
    }
}

fn sidecar_container(sidecar: &Sidecar, image: &str) -> Container {
    Container {
        name: sidecar.name.clone(),
        image: image.to_string(),
        command: sidecar.command.clone(),
        env: sidecar.env.clone(),
        resources: Resources {
            memory_mb: sidecar.memory_mb,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn pull_secrets(workload_name: &str, private: bool, options: &TranslateOptions) -> Vec<String> {
    let own = private.then(|| format!("{workload_name}-registry-credentials"));
    own.into_iter()
        .chain(options.registry_secret_name.iter().cloned())
        .collect()
}

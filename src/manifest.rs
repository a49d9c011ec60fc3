//! Declared-record manifests loaded at startup.
//!
//! A manifest file holds one or more records tagged by `kind`. YAML files may
//! contain several `---`-separated documents; JSON files hold a single record
//! or an array of them.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use converge_core::CallContext;
use converge_reconciler::{InMemoryRecordStore, LrpRecord, TaskRecord};
use serde::Deserialize;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind")]
pub enum Manifest {
    #[serde(rename = "LRP")]
    Lrp(LrpRecord),
    Task(TaskRecord),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<Manifest>),
    One(Box<Manifest>),
}

/// Parse every manifest in `text`; `json` selects the JSON syntax.
///
/// # Errors
///
/// Returns the first document that fails to parse.
pub fn parse(text: &str, json: bool) -> Result<Vec<Manifest>> {
    if json {
        let parsed: OneOrMany = serde_json::from_str(text).context("invalid JSON manifest")?;
        return Ok(match parsed {
            OneOrMany::Many(manifests) => manifests,
            OneOrMany::One(manifest) => vec![*manifest],
        });
    }

    serde_yaml::Deserializer::from_str(text)
        .enumerate()
        .map(|(index, document)| {
            Manifest::deserialize(document)
                .with_context(|| format!("invalid YAML manifest document {index}"))
        })
        .collect()
}

/// Load `path`, or every `.yaml`/`.yml`/`.json` file under it when it is a
/// directory, in file-name order.
///
/// # Errors
///
/// Returns an error when a file cannot be read or parsed.
pub fn load(path: &Path) -> Result<Vec<Manifest>> {
    let files = if path.is_dir() {
        let mut files: Vec<PathBuf> = std::fs::read_dir(path)
            .with_context(|| format!("failed to read manifest directory {}", path.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| extension(p).is_some())
            .collect();
        files.sort();
        files
    } else if extension(path).is_some() {
        vec![path.to_path_buf()]
    } else {
        bail!("{} is not a YAML or JSON manifest", path.display());
    };

    let mut manifests = Vec::new();
    for file in files {
        let text = std::fs::read_to_string(&file)
            .with_context(|| format!("failed to read manifest {}", file.display()))?;
        let json = extension(&file) == Some(Syntax::Json);
        let parsed = parse(&text, json).with_context(|| format!("in {}", file.display()))?;
        debug!(file = %file.display(), records = parsed.len(), "Loaded manifest");
        manifests.extend(parsed);
    }
    Ok(manifests)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Syntax {
    Yaml,
    Json,
}

fn extension(path: &Path) -> Option<Syntax> {
    match path.extension()?.to_str()? {
        "yaml" | "yml" => Some(Syntax::Yaml),
        "json" => Some(Syntax::Json),
        _ => None,
    }
}

/// Create every manifest in its store.
///
/// # Errors
///
/// Returns the first store rejection, such as a duplicate key.
pub async fn seed(
    manifests: Vec<Manifest>,
    lrps: &InMemoryRecordStore<LrpRecord>,
    tasks: &InMemoryRecordStore<TaskRecord>,
) -> Result<()> {
    let ctx = CallContext::background();
    let (mut lrp_count, mut task_count) = (0usize, 0usize);
    for manifest in manifests {
        match manifest {
            Manifest::Lrp(record) => {
                let key = record.metadata.key();
                lrps.create(&ctx, record)
                    .await
                    .with_context(|| format!("failed to seed lrp {key}"))?;
                lrp_count = lrp_count.saturating_add(1);
            }
            Manifest::Task(record) => {
                let key = record.metadata.key();
                tasks
                    .create(&ctx, record)
                    .await
                    .with_context(|| format!("failed to seed task {key}"))?;
                task_count = task_count.saturating_add(1);
            }
        }
    }
    info!(lrps = lrp_count, tasks = task_count, "Seeded declared records");
    Ok(())
}

//! Deterministic naming helpers for runtime objects.

use sha2::{Digest, Sha256};

/// Registry server used for images without an explicit host.
pub const DOCKER_HUB_REGISTRY: &str = "index.docker.io/v1/";

/// Longest name prefix kept before the hash suffix.
const MAX_PREFIX_LEN: usize = 40;

/// Hex characters of the hash appended to generated names.
const HASH_LEN: usize = 10;

/// Lowercase `value` and replace anything outside `[a-z0-9-]` with `-`,
/// trimming leading and trailing dashes.
#[must_use]
pub fn sanitize_name(value: &str) -> String {
    let mapped: String = value
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    mapped.trim_matches('-').to_string()
}

/// First [`HASH_LEN`] hex characters of the SHA-256 of `value`.
#[must_use]
pub fn short_hash(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex.chars().take(HASH_LEN).collect()
}

/// `{app}-{space}-{hash(seed)}`, sanitized and truncated to a DNS label.
#[must_use]
pub fn workload_name(app_name: &str, space_name: &str, seed: &str) -> String {
    let prefix: String = sanitize_name(&format!("{app_name}-{space_name}"))
        .chars()
        .take(MAX_PREFIX_LEN)
        .collect();
    let prefix = prefix.trim_end_matches('-');
    let hash = short_hash(seed);
    if prefix.is_empty() {
        hash
    } else {
        format!("{prefix}-{hash}")
    }
}

/// Name of the instance at `index` within a replicated workload.
#[must_use]
pub fn instance_name(workload_name: &str, index: u32) -> String {
    format!("{workload_name}-{index}")
}

/// Registry host an image is pulled from.
///
/// The first path segment is a registry only if the image has more than
/// one segment and that segment looks like a host (`.`, `:` or
/// `localhost`); otherwise the image lives on Docker Hub.
#[must_use]
pub fn parse_image_registry_host(image: &str) -> String {
    match image.split_once('/') {
        Some((first, _)) if first.contains('.') || first.contains(':') || first == "localhost" => {
            first.to_string()
        }
        _ => DOCKER_HUB_REGISTRY.to_string(),
    }
}

// Fixed, ordered list of monitored targets plus the key namespacing every
// per-target sub-resource (storage keys, view element ids, disk rows) goes through.

use std::collections::HashSet;

use crate::models::Target;

pub struct TargetRegistry {
    targets: Vec<Target>,
}

impl TargetRegistry {
    pub fn new(targets: Vec<Target>) -> anyhow::Result<Self> {
        validate_targets(&targets)?;
        Ok(Self { targets })
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn get(&self, id: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.id == id)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.targets.iter().position(|t| t.id == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.targets.iter().map(|t| t.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Ids must be non-empty, unique and limited to `[A-Za-z0-9_]`. Derived element
/// ids join with `-`, so everything before the first `-` is always the target id.
pub fn validate_targets(targets: &[Target]) -> anyhow::Result<()> {
    anyhow::ensure!(!targets.is_empty(), "targets must be non-empty");
    let mut seen = HashSet::new();
    for t in targets {
        anyhow::ensure!(
            is_valid_target_id(&t.id),
            "targets.id must match [A-Za-z0-9_]+, got {:?}",
            t.id
        );
        anyhow::ensure!(seen.insert(t.id.as_str()), "duplicate targets.id {:?}", t.id);
        anyhow::ensure!(
            t.endpoint.starts_with("http://") || t.endpoint.starts_with("https://"),
            "targets.endpoint for {:?} must be an http(s) URL, got {:?}",
            t.id,
            t.endpoint
        );
    }
    Ok(())
}

pub fn is_valid_target_id(id: &str) -> bool {
    !id.is_empty()
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Durable store key: `<targetId>_<name>`.
pub fn storage_key(target_id: &str, name: &str) -> String {
    format!("{target_id}_{name}")
}

/// View element id: `<targetId>-<slot>`.
pub fn element_id(target_id: &str, slot: &str) -> String {
    format!("{target_id}-{slot}")
}

/// Disk row id: `<targetId>-disk-<sanitized name>`.
pub fn disk_row_id(target_id: &str, disk_name: &str) -> String {
    format!("{target_id}-disk-{}", sanitize_id(disk_name))
}

/// Map an arbitrary disk name onto `[A-Za-z0-9_-]`.
pub fn sanitize_id(raw: &str) -> String {
    let out: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if out.is_empty() { "unnamed".into() } else { out }
}

// Disk list reconciler, keyed by disk name within one target.
//
// A change in the set of non-errored names (membership or cardinality) rebuilds
// the list and rebinds row handles; otherwise only the changed fields of the
// existing rows are written.

use std::collections::{HashMap, HashSet};

use crate::models::Disk;
use crate::registry::disk_row_id;
use crate::view::{DiskField, DiskRow, ViewSink};

/// Handle to one rendered row plus the values last written into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskRowHandle {
    pub row_id: String,
    last_percent: u8,
    last_used: String,
    last_total: String,
}

#[derive(Debug, Default)]
pub struct DiskListState {
    initialized: bool,
    index: HashMap<String, DiskRowHandle>,
}

impl DiskListState {
    pub fn handle(&self, disk_name: &str) -> Option<&DiskRowHandle> {
        self.index.get(disk_name)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskReconcile {
    Rebuilt { rows: usize },
    Patched { writes: usize },
}

pub fn reconcile_disks<V: ViewSink>(
    view: &mut V,
    target_id: &str,
    state: &mut DiskListState,
    disks: &[Disk],
) -> DiskReconcile {
    let healthy: Vec<&Disk> = disks.iter().filter(|d| !d.errored).collect();

    let membership_changed = healthy.len() != state.index.len()
        || healthy.iter().any(|d| !state.index.contains_key(&d.name));

    if !state.initialized || membership_changed {
        return rebuild(view, target_id, state, &healthy);
    }

    let mut writes = 0;
    for disk in healthy {
        let Some(handle) = state.index.get_mut(&disk.name) else {
            continue;
        };
        if handle.last_percent != disk.percent {
            view.update_disk_row(target_id, &handle.row_id, DiskField::Percent, &format!("{}%", disk.percent));
            handle.last_percent = disk.percent;
            writes += 1;
        }
        if handle.last_used != disk.used_label {
            view.update_disk_row(target_id, &handle.row_id, DiskField::Used, &disk.used_label);
            handle.last_used = disk.used_label.clone();
            writes += 1;
        }
        if handle.last_total != disk.total_label {
            view.update_disk_row(target_id, &handle.row_id, DiskField::Total, &disk.total_label);
            handle.last_total = disk.total_label.clone();
            writes += 1;
        }
    }
    DiskReconcile::Patched { writes }
}

fn rebuild<V: ViewSink>(
    view: &mut V,
    target_id: &str,
    state: &mut DiskListState,
    healthy: &[&Disk],
) -> DiskReconcile {
    let mut taken = HashSet::new();
    let rows: Vec<DiskRow> = healthy
        .iter()
        .map(|disk| DiskRow {
            row_id: unique_row_id(target_id, &disk.name, &mut taken),
            name: disk.name.clone(),
            used: disk.used_label.clone(),
            total: disk.total_label.clone(),
            percent: disk.percent,
        })
        .collect();

    view.rebuild_disk_list(target_id, &rows);

    state.index = rows
        .iter()
        .map(|row| {
            (
                row.name.clone(),
                DiskRowHandle {
                    row_id: row.row_id.clone(),
                    last_percent: row.percent,
                    last_used: row.used.clone(),
                    last_total: row.total.clone(),
                },
            )
        })
        .collect();
    state.initialized = true;
    tracing::debug!(target_id, rows = rows.len(), "disk list rebuilt");
    DiskReconcile::Rebuilt { rows: rows.len() }
}

/// Distinct names can sanitize to the same id ("sda/1", "sda-1"); suffix repeats.
fn unique_row_id(target_id: &str, disk_name: &str, taken: &mut HashSet<String>) -> String {
    let base = disk_row_id(target_id, disk_name);
    let mut candidate = base.clone();
    let mut n = 2;
    while !taken.insert(candidate.clone()) {
        candidate = format!("{base}-{n}");
        n += 1;
    }
    candidate
}

// ViewSink that fans patches out to WebSocket clients.
//
// Every patch is first applied to a materialised mirror of the dashboard, then
// broadcast. Both happen under the mirror lock, so a subscriber that takes the
// mirror snapshot and subscribes together neither misses nor repeats a patch.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::broadcast;

use super::{
    ChartKind, DISK_LIST_SLOT, DiskField, DiskRow, LOADING_SLOT, OVERLAY_SLOT, Readout, STATUS_SLOT,
    ViewPatch, ViewSink,
};
use crate::registry::element_id;
use crate::status::Connectivity;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetPanel {
    pub state: Option<Connectivity>,
    pub message: String,
    /// element id -> text
    pub readouts: BTreeMap<String, String>,
    pub overlay_visible: bool,
    pub loading_visible: bool,
    /// element id -> series
    pub charts: BTreeMap<String, Vec<Vec<f64>>>,
    pub disks: Vec<DiskRow>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardMirror {
    pub targets: BTreeMap<String, TargetPanel>,
}

impl DashboardMirror {
    pub fn apply(&mut self, patch: &ViewPatch) {
        match patch {
            ViewPatch::Status {
                target_id,
                state,
                message,
                ..
            } => {
                let panel = self.panel(target_id);
                panel.state = Some(*state);
                panel.message = message.clone();
            }
            ViewPatch::Text {
                target_id,
                element_id,
                text,
                ..
            } => {
                self.panel(target_id)
                    .readouts
                    .insert(element_id.clone(), text.clone());
            }
            ViewPatch::Overlay {
                target_id, visible, ..
            } => self.panel(target_id).overlay_visible = *visible,
            ViewPatch::Loading {
                target_id, visible, ..
            } => self.panel(target_id).loading_visible = *visible,
            ViewPatch::Chart {
                target_id,
                element_id,
                series,
                ..
            } => {
                self.panel(target_id)
                    .charts
                    .insert(element_id.clone(), series.clone());
            }
            ViewPatch::DiskList {
                target_id, rows, ..
            } => self.panel(target_id).disks = rows.clone(),
            ViewPatch::DiskRow {
                target_id,
                row_id,
                field,
                value,
            } => {
                let panel = self.panel(target_id);
                let Some(row) = panel.disks.iter_mut().find(|r| &r.row_id == row_id) else {
                    return;
                };
                match field {
                    DiskField::Percent => {
                        row.percent = value.trim_end_matches('%').parse().unwrap_or(row.percent)
                    }
                    DiskField::Used => row.used = value.clone(),
                    DiskField::Total => row.total = value.clone(),
                }
            }
        }
    }

    fn panel(&mut self, target_id: &str) -> &mut TargetPanel {
        self.targets.entry(target_id.to_string()).or_default()
    }
}

#[derive(Clone)]
pub struct BroadcastView {
    tx: broadcast::Sender<ViewPatch>,
    mirror: Arc<Mutex<DashboardMirror>>,
}

impl BroadcastView {
    pub fn new(tx: broadcast::Sender<ViewPatch>) -> Self {
        Self {
            tx,
            mirror: Arc::new(Mutex::new(DashboardMirror::default())),
        }
    }

    pub fn snapshot(&self) -> DashboardMirror {
        self.lock_mirror().clone()
    }

    /// Current mirror plus a receiver positioned right after it.
    pub fn subscribe(&self) -> (DashboardMirror, broadcast::Receiver<ViewPatch>) {
        let mirror = self.lock_mirror();
        let rx = self.tx.subscribe();
        (mirror.clone(), rx)
    }

    fn lock_mirror(&self) -> MutexGuard<'_, DashboardMirror> {
        self.mirror.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, patch: ViewPatch) {
        let mut mirror = self.lock_mirror();
        mirror.apply(&patch);
        // No receivers is normal when no browser is connected.
        let _ = self.tx.send(patch);
    }
}

impl ViewSink for BroadcastView {
    fn set_status(&mut self, target_id: &str, state: Connectivity, message: &str) {
        self.emit(ViewPatch::Status {
            target_id: target_id.to_string(),
            element_id: element_id(target_id, STATUS_SLOT),
            state,
            message: message.to_string(),
        });
    }

    fn set_text(&mut self, target_id: &str, readout: Readout, text: &str) {
        self.emit(ViewPatch::Text {
            target_id: target_id.to_string(),
            element_id: element_id(target_id, readout.slot()),
            readout,
            text: text.to_string(),
        });
    }

    fn set_overlay(&mut self, target_id: &str, visible: bool) {
        self.emit(ViewPatch::Overlay {
            target_id: target_id.to_string(),
            element_id: element_id(target_id, OVERLAY_SLOT),
            visible,
        });
    }

    fn set_loading(&mut self, target_id: &str, visible: bool) {
        self.emit(ViewPatch::Loading {
            target_id: target_id.to_string(),
            element_id: element_id(target_id, LOADING_SLOT),
            visible,
        });
    }

    fn paint_chart(&mut self, target_id: &str, chart: ChartKind, series: Vec<Vec<f64>>) {
        self.emit(ViewPatch::Chart {
            target_id: target_id.to_string(),
            element_id: element_id(target_id, chart.slot()),
            chart,
            series,
        });
    }

    fn rebuild_disk_list(&mut self, target_id: &str, rows: &[DiskRow]) {
        self.emit(ViewPatch::DiskList {
            target_id: target_id.to_string(),
            element_id: element_id(target_id, DISK_LIST_SLOT),
            rows: rows.to_vec(),
        });
    }

    fn update_disk_row(&mut self, target_id: &str, row_id: &str, field: DiskField, value: &str) {
        self.emit(ViewPatch::DiskRow {
            target_id: target_id.to_string(),
            row_id: row_id.to_string(),
            field,
            value: value.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_sees_mirror_then_later_patches() {
        let (tx, _) = broadcast::channel(8);
        let mut view = BroadcastView::new(tx);
        view.set_status("a", Connectivity::Connected, "Connected");
        view.rebuild_disk_list(
            "a",
            &[DiskRow {
                row_id: "a-disk-sda".into(),
                name: "sda".into(),
                used: "1".into(),
                total: "2".into(),
                percent: 50,
            }],
        );

        let (mirror, mut rx) = view.subscribe();
        assert_eq!(mirror.targets["a"].message, "Connected");
        assert!(rx.try_recv().is_err());

        view.update_disk_row("a", "a-disk-sda", DiskField::Percent, "75%");
        assert!(matches!(rx.try_recv(), Ok(ViewPatch::DiskRow { .. })));
        assert_eq!(view.snapshot().targets["a"].disks[0].percent, 75);
    }
}

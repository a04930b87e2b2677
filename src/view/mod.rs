// View root: the named UI slots the engine writes per target.
//
// Slots per target: status indicator + text, four readouts + storage total,
// three chart surfaces, one disk list, one error overlay, one loading placeholder.
// Element ids are always `<targetId>-<slot>`.

mod broadcast;

pub use broadcast::{BroadcastView, DashboardMirror, TargetPanel};

use serde::{Deserialize, Serialize};

use crate::history_store::Metric;
use crate::status::Connectivity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Readout {
    Cpu,
    Ram,
    Download,
    Upload,
    StorageTotal,
}

impl Readout {
    pub const ALL: [Readout; 5] = [
        Readout::Cpu,
        Readout::Ram,
        Readout::Download,
        Readout::Upload,
        Readout::StorageTotal,
    ];

    pub fn slot(self) -> &'static str {
        match self {
            Readout::Cpu => "cpu-value-text",
            Readout::Ram => "ram-value-text",
            Readout::Download => "network-down",
            Readout::Upload => "network-up",
            Readout::StorageTotal => "storage-total-text",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChartKind {
    Cpu,
    Ram,
    /// Download and upload on one surface.
    Network,
}

impl ChartKind {
    pub const ALL: [ChartKind; 3] = [ChartKind::Cpu, ChartKind::Ram, ChartKind::Network];

    pub fn slot(self) -> &'static str {
        match self {
            ChartKind::Cpu => "cpuChart",
            ChartKind::Ram => "ramChart",
            ChartKind::Network => "networkChart",
        }
    }

    /// Series drawn on this surface, in dataset order.
    pub fn metrics(self) -> &'static [Metric] {
        match self {
            ChartKind::Cpu => &[Metric::Cpu],
            ChartKind::Ram => &[Metric::Ram],
            ChartKind::Network => &[Metric::NetDown, Metric::NetUp],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DiskField {
    /// Bar width, e.g. `"50%"`.
    Percent,
    Used,
    Total,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskRow {
    pub row_id: String,
    pub name: String,
    pub used: String,
    pub total: String,
    pub percent: u8,
}

pub const STATUS_SLOT: &str = "status-text";
pub const OVERLAY_SLOT: &str = "grid-overlay";
pub const LOADING_SLOT: &str = "loading-disks";
pub const DISK_LIST_SLOT: &str = "storage-list";

/// One view update, as pushed to browsers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ViewPatch {
    Status {
        target_id: String,
        element_id: String,
        state: Connectivity,
        message: String,
    },
    Text {
        target_id: String,
        element_id: String,
        readout: Readout,
        text: String,
    },
    Overlay {
        target_id: String,
        element_id: String,
        visible: bool,
    },
    Loading {
        target_id: String,
        element_id: String,
        visible: bool,
    },
    Chart {
        target_id: String,
        element_id: String,
        chart: ChartKind,
        series: Vec<Vec<f64>>,
    },
    DiskList {
        target_id: String,
        element_id: String,
        rows: Vec<DiskRow>,
    },
    DiskRow {
        target_id: String,
        row_id: String,
        field: DiskField,
        value: String,
    },
}

/// Where the engine writes. Called only from the scheduler task, in order.
pub trait ViewSink: Send + 'static {
    fn set_status(&mut self, target_id: &str, state: Connectivity, message: &str);

    fn set_text(&mut self, target_id: &str, readout: Readout, text: &str);

    fn set_overlay(&mut self, target_id: &str, visible: bool);

    fn set_loading(&mut self, target_id: &str, visible: bool);

    /// Full bounded series per dataset of the surface.
    fn paint_chart(&mut self, target_id: &str, chart: ChartKind, series: Vec<Vec<f64>>);

    /// Replace the whole disk list of a target.
    fn rebuild_disk_list(&mut self, target_id: &str, rows: &[DiskRow]);

    fn update_disk_row(&mut self, target_id: &str, row_id: &str, field: DiskField, value: &str);
}

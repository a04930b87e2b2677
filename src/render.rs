// Render reconciler: readouts are diffed against the last painted string per
// field; chart repaints are coalesced to at most one per surface per frame.

use std::collections::{BTreeSet, HashMap};

use tokio::time::{Duration, Instant};

use crate::models::Sample;
use crate::view::{ChartKind, Readout, ViewSink};

/// Display string for one readout.
pub fn format_readout(readout: Readout, sample: &Sample) -> String {
    match readout {
        Readout::Cpu => format!("{:.1}%", sample.cpu_percent),
        Readout::Ram => format!("{:.1}%", sample.ram_percent),
        Readout::Download => format!("↓ {:.1}", sample.download_mbps),
        Readout::Upload => format!("↑ {:.1}", sample.upload_mbps),
        Readout::StorageTotal => format!("{} To", sample.storage_total_used),
    }
}

/// Last painted value per readout of one target.
#[derive(Debug, Default)]
pub struct RenderCache {
    last: HashMap<Readout, String>,
    loading_hidden: bool,
}

impl RenderCache {
    pub fn last(&self, readout: Readout) -> Option<&str> {
        self.last.get(&readout).map(String::as_str)
    }
}

/// Write only the readouts whose display string changed. Returns the number of writes.
pub fn reconcile_readouts<V: ViewSink>(
    view: &mut V,
    target_id: &str,
    cache: &mut RenderCache,
    sample: &Sample,
) -> usize {
    let mut writes = 0;
    for readout in Readout::ALL {
        let text = format_readout(readout, sample);
        if cache.last(readout) == Some(text.as_str()) {
            continue;
        }
        view.set_text(target_id, readout, &text);
        cache.last.insert(readout, text);
        writes += 1;
    }
    if !cache.loading_hidden {
        view.set_loading(target_id, false);
        cache.loading_hidden = true;
    }
    writes
}

/// Dirty chart surfaces waiting for the next frame.
#[derive(Debug)]
pub struct ChartQueue {
    frame: Duration,
    dirty: BTreeSet<(usize, ChartKind)>,
    deadline: Option<Instant>,
}

impl ChartQueue {
    pub fn new(frame: Duration) -> Self {
        Self {
            frame,
            dirty: BTreeSet::new(),
            deadline: None,
        }
    }

    /// Mark a surface dirty; the first mark of a frame arms the deadline.
    pub fn mark(&mut self, target: usize, chart: ChartKind, now: Instant) {
        self.dirty.insert((target, chart));
        if self.deadline.is_none() {
            self.deadline = Some(now + self.frame);
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn pending(&self) -> usize {
        self.dirty.len()
    }

    /// Drain every dirty surface once the deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> Vec<(usize, ChartKind)> {
        match self.deadline {
            Some(at) if now >= at => {
                self.deadline = None;
                std::mem::take(&mut self.dirty).into_iter().collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn clear(&mut self) {
        self.dirty.clear();
        self.deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chart_queue_coalesces_marks_within_a_frame() {
        let start = Instant::now();
        let mut q = ChartQueue::new(Duration::from_millis(16));
        q.mark(0, ChartKind::Cpu, start);
        q.mark(0, ChartKind::Cpu, start + Duration::from_millis(5));
        q.mark(1, ChartKind::Network, start + Duration::from_millis(10));
        assert_eq!(q.deadline(), Some(start + Duration::from_millis(16)));
        assert!(q.take_due(start + Duration::from_millis(15)).is_empty());
        let due = q.take_due(start + Duration::from_millis(16));
        assert_eq!(due, vec![(0, ChartKind::Cpu), (1, ChartKind::Network)]);
        assert!(q.deadline().is_none());
        assert_eq!(q.pending(), 0);
    }
}

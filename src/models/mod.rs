// Domain models: monitored targets and parsed telemetry samples

mod sample;
mod target;

pub use sample::{Disk, Sample, coerce_label, coerce_number};
pub use target::Target;

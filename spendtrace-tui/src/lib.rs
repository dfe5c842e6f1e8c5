pub mod monitor;

pub use monitor::{TraceMonitor, run_monitor};

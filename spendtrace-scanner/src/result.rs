use crate::model::{Finding, UtxoRef};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of one crawl cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceSummary {
    pub start: UtxoRef,
    pub max_depth: usize,
    pub vertices: usize,
    pub edges: usize,
    pub units_processed: usize,
    pub failed_units: usize,
    pub depth_cutoffs: usize,
    pub findings: Vec<Finding>,
    pub elapsed: Duration,
    pub stopped: bool,
}

impl TraceSummary {
    pub fn new(start: UtxoRef, max_depth: usize) -> Self {
        Self {
            start,
            max_depth,
            vertices: 0,
            edges: 0,
            units_processed: 0,
            failed_units: 0,
            depth_cutoffs: 0,
            findings: Vec::new(),
            elapsed: Duration::from_secs(0),
            stopped: false,
        }
    }

    /// True when every branch either ended unspent or hit the depth limit.
    pub fn is_clean(&self) -> bool {
        self.failed_units == 0 && !self.stopped
    }
}

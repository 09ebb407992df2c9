use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Run-wide counters, as they appear in the summary's `totals`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTotals {
    pub targets_processed: usize,
    pub locations: usize,
    pub sensors: usize,
    pub sensors_processed: usize,
    pub measurements: usize,
    /// Requests that failed for good plus records that could not be used.
    pub errors: usize,
    /// Paginations that ended early on a failed request.
    pub partial_coverage: usize,
    pub batches_written: u32,
    pub flush_failures: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetStats {
    pub locations: usize,
    pub sensors: usize,
    pub measurements: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub totals: RunTotals,
    pub per_target: BTreeMap<String, TargetStats>,
}

impl RunStats {
    pub fn target_mut(&mut self, name: &str) -> &mut TargetStats {
        self.per_target.entry(name.to_string()).or_default()
    }
}

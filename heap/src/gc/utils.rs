use std::time::Duration;

/// What a full collection did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GcResult {
    /// nodes found reachable
    pub marked: usize,
    /// unreachable nodes whose payload was dropped
    pub detached: usize,
    /// nodes whose storage was returned by the closing lite sweep
    pub reclaimed: usize,
}

impl From<GcResult> for usize {
    fn from(value: GcResult) -> Self {
        value.reclaimed
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum GcPhase {
    #[default]
    Idle,
    Marking,
    Sweeping,
}

/// Running totals kept by the manager.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GcStats {
    pub full_collections: usize,
    pub lite_sweeps: usize,
    /// nodes marked by the most recent full collection
    pub last_marked: usize,
    pub total_marked: usize,
    pub total_detached: usize,
    pub total_reclaimed: usize,
    pub bytes_after_last_collection: usize,
    /// trigger level when the stats were taken
    pub trigger_level: usize,
    pub last_collection_time: Duration,
    pub total_collection_time: Duration,
}

/// What a successful [`Collector::check`](super::Collector::check) saw.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CheckReport {
    pub live: usize,
    pub moribund: usize,
    /// nodes whose count has always been zero
    pub virgins: usize,
}

//! Pipeline statistics snapshot.

use crate::coalesce::CoalescerStats;
use crate::delivery::DeliveryStats;
use crate::scheduler::{LaneKind, LaneStats};

/// Point-in-time counters of a pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineStats {
    /// One entry per lane created so far.
    pub lanes: Vec<LaneStats>,
    pub downloads: CoalescerStats,
    pub loads: CoalescerStats,
    /// Keys with a download leader in flight.
    pub downloads_in_flight: usize,
    /// Keys with a load leader in flight.
    pub loads_in_flight: usize,
    /// Terminal outcomes delivered.
    pub delivered: DeliveryStats,
}

impl PipelineStats {
    /// Counters of `kind`, if that lane has been created.
    pub fn lane(&self, kind: LaneKind) -> Option<&LaneStats> {
        self.lanes.iter().find(|lane| lane.kind == kind)
    }

    /// Terminal outcomes delivered, of any kind.
    pub fn finished(&self) -> u64 {
        self.delivered.completed + self.delivered.failed + self.delivered.canceled
    }
}

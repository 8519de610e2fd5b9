//! Pipeline configuration.

use crate::config::ConfigFile;
use crate::scheduler::{LaneConfig, SchedulerConfig};

/// Runtime configuration of a [`Pipeline`](super::Pipeline).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Worker and queue shape of the three lanes.
    pub lanes: SchedulerConfig,
}

impl PipelineConfig {
    pub fn with_lanes(mut self, lanes: SchedulerConfig) -> Self {
        self.lanes = lanes;
        self
    }
}

impl From<&ConfigFile> for PipelineConfig {
    fn from(config: &ConfigFile) -> Self {
        let lanes = &config.lanes;
        Self {
            lanes: SchedulerConfig {
                dispatch: LaneConfig::unbounded(1),
                network: LaneConfig::bounded(lanes.network_workers, lanes.network_queue),
                local: LaneConfig::bounded(lanes.local_workers, lanes.local_queue),
            },
        }
    }
}

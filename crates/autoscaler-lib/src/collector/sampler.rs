//! Single-container stats sampling with a deadline

use crate::error::SampleError;
use crate::models::{ContainerHandle, RawSample};
use crate::orchestrator::StatsSource;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Fetches one snapshot per call; a slow or failing container only fails itself
#[derive(Clone)]
pub struct ContainerSampler {
    stats: Arc<dyn StatsSource>,
    timeout: Duration,
}

impl ContainerSampler {
    pub fn new(stats: Arc<dyn StatsSource>, timeout: Duration) -> Self {
        Self { stats, timeout }
    }

    pub async fn sample(&self, container: &ContainerHandle) -> Result<RawSample, SampleError> {
        match timeout(self.timeout, self.stats.snapshot(container)).await {
            Ok(Ok(sample)) => Ok(sample),
            Ok(Err(e)) => Err(SampleError::Stats {
                container_id: container.id.clone(),
                message: format!("{:#}", e),
            }),
            Err(_) => Err(SampleError::Timeout {
                container_id: container.id.clone(),
                after: self.timeout,
            }),
        }
    }
}

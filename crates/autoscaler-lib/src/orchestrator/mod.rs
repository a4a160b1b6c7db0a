//! Orchestrator collaborators
//!
//! The control loop only talks to the orchestrator through these traits:
//! discovery of a service's containers and replica count, single-shot stats
//! snapshots, and the actuator that applies a new replica count.

mod dispatcher;
mod docker;

pub use dispatcher::IntentDispatcher;
pub use docker::{
    container_filters, raw_sample_from_stats, service_filters, DockerSwarm,
    STACK_NAMESPACE_LABEL, SWARM_SERVICE_NAME_LABEL,
};

use crate::models::{ContainerHandle, RawSample, ServiceRef};
use anyhow::Result;
use tracing::info;

pub use async_trait::async_trait;

/// Resolves services to their running containers
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    /// List the running containers of a service; empty when it has zero replicas
    async fn list_service_containers(&self, service: &ServiceRef) -> Result<Vec<ContainerHandle>>;

    /// Desired replica count as currently recorded by the orchestrator
    async fn current_replicas(&self, service: &ServiceRef) -> Result<u32>;
}

/// Reads one point-in-time counter snapshot of a container
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn snapshot(&self, container: &ContainerHandle) -> Result<RawSample>;
}

/// Applies a replica count to a service
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn set_replicas(&self, service: &ServiceRef, replicas: u32) -> Result<()>;
}

/// Actuator that only logs what it would do
#[derive(Debug, Default, Clone)]
pub struct DryRunActuator;

#[async_trait]
impl Actuator for DryRunActuator {
    async fn set_replicas(&self, service: &ServiceRef, replicas: u32) -> Result<()> {
        info!(service = %service, replicas, dry_run = true, "Would set service replicas");
        Ok(())
    }
}

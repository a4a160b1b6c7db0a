//! Docker Swarm implementation of the orchestrator collaborators
//!
//! Services are looked up by their qualified name (`<stack>_<name>`) and the
//! stack namespace label; containers by the swarm service name label.

use super::{Actuator, ServiceDiscovery, StatsSource};
use crate::models::{ContainerHandle, RawSample, ServiceRef};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use bollard::container::{ListContainersOptions, Stats, StatsOptions};
use bollard::models::Service;
use bollard::service::{ListServicesOptions, UpdateServiceOptions};
use bollard::Docker;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use std::collections::HashMap;
use tracing::{debug, info};

pub const STACK_NAMESPACE_LABEL: &str = "com.docker.stack.namespace";
pub const SWARM_SERVICE_NAME_LABEL: &str = "com.docker.swarm.service.name";

/// Filters selecting a service by name, scoped to its stack when it has one
pub fn service_filters(service: &ServiceRef) -> HashMap<String, Vec<String>> {
    let mut filters = HashMap::new();
    filters.insert("name".to_string(), vec![service.qualified_name()]);
    if let Some(stack) = &service.stack {
        filters.insert(
            "label".to_string(),
            vec![format!("{}={}", STACK_NAMESPACE_LABEL, stack)],
        );
    }
    filters
}

/// Filters selecting the running containers of a service
pub fn container_filters(service: &ServiceRef) -> HashMap<String, Vec<String>> {
    let mut labels = vec![format!(
        "{}={}",
        SWARM_SERVICE_NAME_LABEL,
        service.qualified_name()
    )];
    if let Some(stack) = &service.stack {
        labels.push(format!("{}={}", STACK_NAMESPACE_LABEL, stack));
    }

    let mut filters = HashMap::new();
    filters.insert("label".to_string(), labels);
    filters.insert("status".to_string(), vec!["running".to_string()]);
    filters
}

/// Convert a Docker stats payload into the counters the calculator needs
pub fn raw_sample_from_stats(container_id: &str, stats: &Stats, captured_at: DateTime<Utc>) -> RawSample {
    let cpu = &stats.cpu_stats;
    let online_cpus = cpu
        .online_cpus
        .map(|n| n as u32)
        .filter(|n| *n > 0)
        .or_else(|| {
            cpu.cpu_usage
                .percpu_usage
                .as_ref()
                .map(|per_cpu| per_cpu.len() as u32)
                .filter(|n| *n > 0)
        })
        .unwrap_or(1);

    RawSample {
        container_id: container_id.to_string(),
        cpu_usage: cpu.cpu_usage.total_usage,
        system_usage: cpu.system_cpu_usage.unwrap_or(0),
        online_cpus,
        memory_usage_bytes: stats.memory_stats.usage.unwrap_or(0),
        memory_limit_bytes: stats.memory_stats.limit.unwrap_or(0),
        captured_at,
    }
}

/// Docker Engine client speaking to a swarm manager
#[derive(Clone)]
pub struct DockerSwarm {
    docker: Docker,
}

impl DockerSwarm {
    /// Connect using `DOCKER_HOST` or the local socket
    pub fn connect() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().context("Failed to connect to Docker Engine")?;
        Ok(Self { docker })
    }

    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }

    /// The `name` filter is a prefix match, so pick the exact service
    async fn find_service(&self, service: &ServiceRef) -> Result<Service> {
        let name = service.qualified_name();
        let services = self
            .docker
            .list_services(Some(ListServicesOptions {
                filters: service_filters(service),
                ..Default::default()
            }))
            .await
            .with_context(|| format!("Failed to list services matching {}", name))?;

        services
            .into_iter()
            .find(|s| s.spec.as_ref().and_then(|spec| spec.name.as_deref()) == Some(name.as_str()))
            .ok_or_else(|| anyhow!("service {} not found", name))
    }
}

fn replicated_count(service: &Service) -> Option<i64> {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.mode.as_ref())
        .and_then(|mode| mode.replicated.as_ref())
        .and_then(|replicated| replicated.replicas)
}

#[async_trait]
impl ServiceDiscovery for DockerSwarm {
    async fn list_service_containers(&self, service: &ServiceRef) -> Result<Vec<ContainerHandle>> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                filters: container_filters(service),
                ..Default::default()
            }))
            .await
            .with_context(|| format!("Failed to list containers of {}", service))?;

        let handles: Vec<ContainerHandle> = containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                let name = c
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|n| n.trim_start_matches('/').to_string());
                Some(ContainerHandle { id, name })
            })
            .collect();

        debug!(service = %service, containers = handles.len(), "Listed service containers");
        Ok(handles)
    }

    async fn current_replicas(&self, service: &ServiceRef) -> Result<u32> {
        let found = self.find_service(service).await?;
        let replicas = replicated_count(&found)
            .ok_or_else(|| anyhow!("service {} is not in replicated mode", service))?;
        u32::try_from(replicas).with_context(|| format!("invalid replica count {}", replicas))
    }
}

#[async_trait]
impl StatsSource for DockerSwarm {
    async fn snapshot(&self, container: &ContainerHandle) -> Result<RawSample> {
        let mut stream = Box::pin(self.docker.stats(
            &container.id,
            Some(StatsOptions {
                stream: false,
                one_shot: true,
            }),
        ));

        let stats = stream
            .next()
            .await
            .ok_or_else(|| anyhow!("stats stream for {} ended without data", container.id))?
            .with_context(|| format!("Failed to read stats of {}", container.id))?;

        Ok(raw_sample_from_stats(&container.id, &stats, Utc::now()))
    }
}

#[async_trait]
impl Actuator for DockerSwarm {
    async fn set_replicas(&self, service: &ServiceRef, replicas: u32) -> Result<()> {
        let found = self.find_service(service).await?;
        let version = found
            .version
            .as_ref()
            .and_then(|v| v.index)
            .ok_or_else(|| anyhow!("service {} has no version index", service))?;

        let mut spec = found
            .spec
            .ok_or_else(|| anyhow!("service {} has no spec", service))?;
        match spec.mode.as_mut().and_then(|mode| mode.replicated.as_mut()) {
            Some(replicated) => replicated.replicas = Some(i64::from(replicas)),
            None => bail!("service {} is not in replicated mode", service),
        }

        self.docker
            .update_service(
                &service.qualified_name(),
                spec,
                UpdateServiceOptions {
                    version,
                    ..Default::default()
                },
                None,
            )
            .await
            .with_context(|| format!("Failed to update replicas of {}", service))?;

        info!(service = %service, replicas, "Updated service replicas");
        Ok(())
    }
}

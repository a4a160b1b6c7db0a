//! Service-level fan-out/fan-in of container samples
//!
//! One aggregation resolves the containers of a service, samples them
//! concurrently (bounded by a semaphore, each with its own deadline), waits for
//! the results and reduces the per-container percentages into one
//! `UtilizationSample` per configured metric. Discovery and sampling share a
//! single aggregation deadline.

use super::sampler::ContainerSampler;
use crate::config::ServiceConfig;
use crate::error::{AggregationError, SampleError};
use crate::models::{ContainerHandle, MetricKind, RawSample, ServiceRef, UtilizationSample};
use crate::orchestrator::ServiceDiscovery;
use crate::utilization::{cpu_percent, memory_percent};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

/// Containers dropped from a reduction because their sample failed
#[derive(Debug, Clone)]
pub struct PartialSampleFailure {
    pub attempted: usize,
    pub failures: Vec<SampleError>,
}

/// Result of one successful aggregation
#[derive(Debug, Clone)]
pub struct AggregationReport {
    pub service: ServiceRef,
    /// Replica count as recorded by the orchestrator this cycle
    pub replicas: u32,
    pub containers: usize,
    pub sampled: usize,
    /// Sampled containers without a previous snapshot (no CPU value yet)
    pub cold_start: usize,
    pub samples: Vec<UtilizationSample>,
    pub partial_failure: Option<PartialSampleFailure>,
}

impl AggregationReport {
    pub fn failed(&self) -> usize {
        self.partial_failure
            .as_ref()
            .map(|p| p.failures.len())
            .unwrap_or(0)
    }

    pub fn sample(&self, metric: MetricKind) -> Option<&UtilizationSample> {
        self.samples.iter().find(|s| s.metric == metric)
    }
}

pub struct ServiceAggregator {
    discovery: Arc<dyn ServiceDiscovery>,
    sampler: ContainerSampler,
    aggregation_timeout: Duration,
    max_concurrent_samples: usize,
}

impl ServiceAggregator {
    pub fn new(
        discovery: Arc<dyn ServiceDiscovery>,
        sampler: ContainerSampler,
        aggregation_timeout: Duration,
        max_concurrent_samples: usize,
    ) -> Self {
        Self {
            discovery,
            sampler,
            aggregation_timeout,
            max_concurrent_samples: max_concurrent_samples.max(1),
        }
    }

    /// Aggregate one service
    ///
    /// `history` holds the previous snapshot per container and is updated in
    /// place: successful samples replace their entry, vanished containers are
    /// pruned.
    pub async fn aggregate(
        &self,
        config: &ServiceConfig,
        history: &mut HashMap<String, RawSample>,
        now: DateTime<Utc>,
    ) -> Result<AggregationReport, AggregationError> {
        let service = &config.service;
        let deadline = Instant::now() + self.aggregation_timeout;

        let containers = self
            .discover(service, deadline, self.discovery.list_service_containers(service))
            .await?;
        if containers.is_empty() {
            return Err(AggregationError::NoContainersFound {
                service: service.qualified_name(),
            });
        }
        let replicas = self
            .discover(service, deadline, self.discovery.current_replicas(service))
            .await?;

        let (successes, failures) = self.sample_all(&containers, deadline).await;
        if successes.is_empty() {
            return Err(AggregationError::DiscoveryFailure {
                service: service.qualified_name(),
                reason: format!("all {} containers unreachable", containers.len()),
            });
        }

        let mut cpu = Vec::with_capacity(successes.len());
        let mut memory = Vec::with_capacity(successes.len());
        let mut cold_start = 0;
        for current in &successes {
            match history.get(&current.container_id) {
                Some(previous) => cpu.push(cpu_percent(previous, current)),
                None => {
                    cold_start += 1;
                    debug!(
                        service = %service,
                        container_id = %current.container_id,
                        "No previous snapshot, skipping CPU for this tick"
                    );
                }
            }
            memory.push(memory_percent(current));
        }

        let live: HashSet<&str> = containers.iter().map(|c| c.id.as_str()).collect();
        history.retain(|id, _| live.contains(id.as_str()));
        let sampled = successes.len();
        for sample in successes {
            history.insert(sample.container_id.clone(), sample);
        }

        let samples = config
            .thresholds
            .iter()
            .filter_map(|(metric, threshold)| {
                let values = match metric {
                    MetricKind::Cpu => &cpu,
                    MetricKind::Memory => &memory,
                };
                threshold.reduction.reduce(values).map(|percent| UtilizationSample {
                    service: service.qualified_name(),
                    metric: *metric,
                    percent,
                    timestamp: now,
                })
            })
            .collect();

        let partial_failure = if failures.is_empty() {
            None
        } else {
            debug!(
                service = %service,
                failed = failures.len(),
                attempted = containers.len(),
                "Some container samples failed"
            );
            Some(PartialSampleFailure {
                attempted: containers.len(),
                failures,
            })
        };

        Ok(AggregationReport {
            service: service.clone(),
            replicas,
            containers: containers.len(),
            sampled,
            cold_start,
            samples,
            partial_failure,
        })
    }

    async fn discover<T>(
        &self,
        service: &ServiceRef,
        deadline: Instant,
        call: impl Future<Output = anyhow::Result<T>>,
    ) -> Result<T, AggregationError> {
        match timeout_at(deadline, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(AggregationError::DiscoveryFailure {
                service: service.qualified_name(),
                reason: format!("{:#}", e),
            }),
            Err(_) => Err(AggregationError::DiscoveryFailure {
                service: service.qualified_name(),
                reason: format!(
                    "aggregation deadline of {:?} passed during discovery",
                    self.aggregation_timeout
                ),
            }),
        }
    }

    /// Sample every container concurrently, fanning in until the deadline
    async fn sample_all(
        &self,
        containers: &[ContainerHandle],
        deadline: Instant,
    ) -> (Vec<RawSample>, Vec<SampleError>) {
        let permits = Arc::new(Semaphore::new(self.max_concurrent_samples));
        let mut tasks = JoinSet::new();

        for container in containers.iter().cloned() {
            let sampler = self.sampler.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let result = sampler.sample(&container).await;
                (container.id, result)
            });
        }

        let mut successes = Vec::with_capacity(containers.len());
        let mut failures = Vec::new();
        let mut finished = HashSet::with_capacity(containers.len());

        loop {
            match timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((id, result)))) => {
                    finished.insert(id);
                    match result {
                        Ok(sample) => successes.push(sample),
                        Err(e) => failures.push(e),
                    }
                }
                Ok(Some(Err(e))) => {
                    debug!(error = %e, "Container sample task did not complete");
                }
                Ok(None) => break,
                Err(_) => {
                    tasks.abort_all();
                    break;
                }
            }
        }

        for container in containers {
            if !finished.contains(&container.id) {
                failures.push(SampleError::Abandoned {
                    container_id: container.id.clone(),
                });
            }
        }

        (successes, failures)
    }
}

//! Evaluation cycle scheduler
//!
//! Fires once per interval and launches one evaluation per enabled service
//! without waiting on the others. Each service owns its runtime state (decision
//! engine, exclusion bookkeeping, previous container snapshots) behind its own
//! mutex: aggregation, window append and evaluation all happen while holding
//! it, and a tick that finds the mutex still held skips that service.

use super::aggregator::{AggregationReport, ServiceAggregator};
use super::exclusion::{ExclusionCheck, ExclusionState};
use super::sampler::ContainerSampler;
use crate::config::{AutoscalerConfig, ExclusionPolicy, ServiceConfig};
use crate::engine::DecisionEngine;
use crate::error::AggregationError;
use crate::health::{components, HealthRegistry};
use crate::models::{RawSample, ScalingIntent};
use crate::observability::{AutoscalerMetrics, StructuredLogger};
use crate::orchestrator::{ServiceDiscovery, StatsSource};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for the cycle scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Tick interval (default: 5 seconds)
    pub interval: Duration,
    /// Deadline for a single container snapshot (default: 2 seconds)
    pub sample_timeout: Duration,
    /// Deadline for discovery and sample fan-in of one service (default: 4 seconds)
    pub aggregation_timeout: Duration,
    /// Concurrent snapshots per service
    pub max_concurrent_samples: usize,
    /// Capacity of the intent channel towards the actuator
    pub intent_buffer: usize,
    pub exclusion: ExclusionPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            sample_timeout: Duration::from_secs(2),
            aggregation_timeout: Duration::from_secs(4),
            max_concurrent_samples: 32,
            intent_buffer: 64,
            exclusion: ExclusionPolicy::default(),
        }
    }
}

impl From<&AutoscalerConfig> for SchedulerConfig {
    fn from(config: &AutoscalerConfig) -> Self {
        Self {
            interval: config.interval,
            sample_timeout: config.sample_timeout,
            aggregation_timeout: config.aggregation_timeout,
            max_concurrent_samples: config.max_concurrent_samples,
            intent_buffer: config.intent_buffer,
            exclusion: config.exclusion,
        }
    }
}

/// What happened to one service during one cycle
#[derive(Debug, Clone)]
pub enum ServiceOutcome {
    /// Aggregated and evaluated; the intent may be `None`
    Evaluated {
        intent: ScalingIntent,
        report: AggregationReport,
    },
    /// Skipped, still in cool-down
    Excluded { until: DateTime<Utc> },
    /// Aggregation failed; `excluded_until` is set when this failure excluded the service
    Failed {
        error: AggregationError,
        excluded_until: Option<DateTime<Utc>>,
    },
    /// Previous evaluation of this service still running
    Overrun,
    /// Evaluation task was cancelled or panicked
    Aborted,
}

impl ServiceOutcome {
    pub fn intent(&self) -> Option<&ScalingIntent> {
        match self {
            ServiceOutcome::Evaluated { intent, .. } => Some(intent),
            _ => None,
        }
    }
}

struct ServiceRuntime {
    engine: DecisionEngine,
    exclusion: ExclusionState,
    history: HashMap<String, RawSample>,
}

struct ServiceSlot {
    config: Arc<ServiceConfig>,
    runtime: Arc<Mutex<ServiceRuntime>>,
}

/// Everything a detached evaluation task needs
struct EvaluationContext {
    aggregator: ServiceAggregator,
    exclusion: ExclusionPolicy,
    intents_tx: mpsc::Sender<ScalingIntent>,
    health: HealthRegistry,
    metrics: AutoscalerMetrics,
    logger: StructuredLogger,
}

enum Dispatched {
    Spawned(JoinHandle<ServiceOutcome>),
    Skipped(ServiceOutcome),
}

/// Periodic scheduler driving one evaluation per enabled service per tick
pub struct CycleScheduler {
    services: Vec<ServiceSlot>,
    context: Arc<EvaluationContext>,
    interval: Duration,
}

impl CycleScheduler {
    /// Create a new scheduler; the receiver yields the actionable intents
    pub fn new(
        discovery: Arc<dyn ServiceDiscovery>,
        stats: Arc<dyn StatsSource>,
        services: Vec<Arc<ServiceConfig>>,
        config: SchedulerConfig,
        health: HealthRegistry,
        metrics: AutoscalerMetrics,
        logger: StructuredLogger,
    ) -> (Self, mpsc::Receiver<ScalingIntent>) {
        let (intents_tx, intents_rx) = mpsc::channel(config.intent_buffer.max(1));

        let sampler = ContainerSampler::new(stats, config.sample_timeout);
        let aggregator = ServiceAggregator::new(
            discovery,
            sampler,
            config.aggregation_timeout,
            config.max_concurrent_samples,
        );

        let services = services
            .into_iter()
            .filter(|s| s.enabled)
            .map(|config| ServiceSlot {
                runtime: Arc::new(Mutex::new(ServiceRuntime {
                    engine: DecisionEngine::new(&config),
                    exclusion: ExclusionState::default(),
                    history: HashMap::new(),
                })),
                config,
            })
            .collect();

        let scheduler = Self {
            services,
            context: Arc::new(EvaluationContext {
                aggregator,
                exclusion: config.exclusion,
                intents_tx,
                health,
                metrics,
                logger,
            }),
            interval: config.interval,
        };

        (scheduler, intents_rx)
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    /// Tick until shutdown is signalled
    ///
    /// Evaluations are detached: a slow service never delays the next tick,
    /// it only makes that tick skip the service.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            services = self.services.len(),
            "Starting evaluation scheduler"
        );

        let ctx = self.context.clone();
        ctx.metrics.set_services_monitored(self.services.len() as i64);
        ctx.health.set_healthy(components::SCHEDULER).await;

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cycle_count = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = Utc::now();
                    let dispatched = self.dispatch(now);
                    let overruns = dispatched
                        .iter()
                        .filter(|(_, d)| matches!(d, Dispatched::Skipped(ServiceOutcome::Overrun)))
                        .count();

                    ctx.health.record_cycle(now).await;
                    ctx.metrics
                        .set_services_excluded(ctx.health.excluded_count().await as i64);
                    cycle_count += 1;

                    debug!(
                        cycle = cycle_count,
                        launched = dispatched.len() - overruns,
                        overruns = overruns,
                        "Evaluation cycle dispatched"
                    );
                }
                _ = shutdown.recv() => {
                    info!("Shutting down evaluation scheduler");
                    break;
                }
            }
        }

        ctx.health
            .set_unhealthy(components::SCHEDULER, "Scheduler stopped")
            .await;
    }

    /// Run one cycle and wait for every evaluation it launched
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Vec<(String, ServiceOutcome)> {
        let dispatched = self.dispatch(now);
        let mut outcomes = Vec::with_capacity(dispatched.len());

        for (service, dispatched) in dispatched {
            let outcome = match dispatched {
                Dispatched::Skipped(outcome) => outcome,
                Dispatched::Spawned(handle) => match handle.await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(service = %service, error = %e, "Evaluation task failed");
                        ServiceOutcome::Aborted
                    }
                },
            };
            outcomes.push((service, outcome));
        }

        self.context.health.record_cycle(now).await;
        outcomes
    }

    /// Launch one evaluation per service whose previous evaluation has finished
    fn dispatch(&self, now: DateTime<Utc>) -> Vec<(String, Dispatched)> {
        self.services
            .iter()
            .map(|slot| {
                let name = slot.config.service.qualified_name();
                let dispatched = match slot.runtime.clone().try_lock_owned() {
                    Ok(runtime) => {
                        let ctx = self.context.clone();
                        let config = slot.config.clone();
                        Dispatched::Spawned(tokio::spawn(async move {
                            evaluate_service(ctx, config, runtime, now).await
                        }))
                    }
                    Err(_) => {
                        warn!(service = %name, "Previous evaluation still running, skipping tick");
                        self.context.metrics.inc_evaluation_skipped("overrun");
                        Dispatched::Skipped(ServiceOutcome::Overrun)
                    }
                };
                (name, dispatched)
            })
            .collect()
    }
}

async fn evaluate_service(
    ctx: Arc<EvaluationContext>,
    config: Arc<ServiceConfig>,
    mut runtime: OwnedMutexGuard<ServiceRuntime>,
    now: DateTime<Utc>,
) -> ServiceOutcome {
    let service = &config.service;
    let name = service.qualified_name();

    match runtime.exclusion.check(now) {
        ExclusionCheck::Excluded { until } => {
            debug!(service = %service, excluded_until = %until, "Service excluded, skipping");
            ctx.metrics.inc_evaluation_skipped("excluded");
            return ServiceOutcome::Excluded { until };
        }
        ExclusionCheck::Retry => {
            ctx.logger
                .log_retry(service, runtime.exclusion.consecutive_failures());
        }
        ExclusionCheck::Clear => {}
    }

    let start = Instant::now();
    let ServiceRuntime {
        engine,
        exclusion,
        history,
    } = &mut *runtime;

    let outcome = match ctx.aggregator.aggregate(&config, history, now).await {
        Err(error) => {
            let kind = match &error {
                AggregationError::NoContainersFound { .. } => "no_containers",
                AggregationError::DiscoveryFailure { .. } => "discovery",
            };
            ctx.metrics.inc_aggregation_failure(kind);

            let excluded_until = exclusion.record_failure(&ctx.exclusion, now);
            match excluded_until {
                Some(until) => {
                    ctx.logger.log_exclusion(
                        service,
                        exclusion.consecutive_failures(),
                        until,
                        &error.to_string(),
                    );
                    ctx.health.set_excluded(&name, true).await;
                }
                None => warn!(
                    service = %service,
                    consecutive_failures = exclusion.consecutive_failures(),
                    error = %error,
                    "Service aggregation failed"
                ),
            }

            ServiceOutcome::Failed {
                error,
                excluded_until,
            }
        }
        Ok(report) => {
            let previous_failures = exclusion.record_success();
            if previous_failures > 0 {
                ctx.logger.log_recovered(service, previous_failures);
                ctx.health.set_excluded(&name, false).await;
            }

            ctx.metrics
                .add_samples(report.sampled as u64, report.failed() as u64);
            ctx.metrics.set_replicas(&name, report.replicas);
            for sample in &report.samples {
                ctx.metrics
                    .set_utilization(&name, sample.metric.as_str(), sample.percent);
                engine.record(sample.clone());
            }

            let intent = engine.evaluate(report.replicas, now);
            if intent.is_actionable() {
                emit(&ctx, &intent);
            }

            ServiceOutcome::Evaluated { intent, report }
        }
    };

    ctx.metrics
        .observe_evaluation_latency(start.elapsed().as_secs_f64());
    outcome
}

/// Hand an intent to the actuator without ever waiting on it
fn emit(ctx: &EvaluationContext, intent: &ScalingIntent) {
    ctx.logger.log_intent(intent);
    ctx.metrics.inc_intent(intent.direction.as_str());

    match ctx.intents_tx.try_send(intent.clone()) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            ctx.metrics.inc_intents_dropped();
            warn!(service = %intent.service, "Intent queue full, dropping scaling intent");
        }
        Err(TrySendError::Closed(_)) => {
            ctx.metrics.inc_intents_dropped();
            warn!(service = %intent.service, "Intent dispatcher gone, dropping scaling intent");
        }
    }
}

/// Builder for creating the cycle scheduler
pub struct CycleSchedulerBuilder {
    discovery: Option<Arc<dyn ServiceDiscovery>>,
    stats: Option<Arc<dyn StatsSource>>,
    services: Vec<Arc<ServiceConfig>>,
    config: SchedulerConfig,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
}

impl CycleSchedulerBuilder {
    pub fn new() -> Self {
        Self {
            discovery: None,
            stats: None,
            services: Vec::new(),
            config: SchedulerConfig::default(),
            health: None,
            logger: None,
        }
    }

    pub fn discovery(mut self, discovery: Arc<dyn ServiceDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn stats(mut self, stats: Arc<dyn StatsSource>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn services(mut self, services: Vec<Arc<ServiceConfig>>) -> Self {
        self.services = services;
        self
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> Result<(CycleScheduler, mpsc::Receiver<ScalingIntent>)> {
        let discovery = self
            .discovery
            .ok_or_else(|| anyhow::anyhow!("Service discovery is required"))?;
        let stats = self
            .stats
            .ok_or_else(|| anyhow::anyhow!("Stats source is required"))?;
        if self.config.interval.is_zero() {
            anyhow::bail!("Scheduler interval must be positive");
        }

        Ok(CycleScheduler::new(
            discovery,
            stats,
            self.services,
            self.config,
            self.health.unwrap_or_default(),
            AutoscalerMetrics::new(),
            self.logger
                .unwrap_or_else(|| StructuredLogger::new("swarm-autoscaler")),
        ))
    }
}

impl Default for CycleSchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

//! Observability infrastructure for the autoscaler
//!
//! Provides:
//! - Prometheus metrics (cycle latency, sampling outcomes, exclusions, intents)
//! - Structured JSON logging of scaling events with tracing

use crate::models::{ScalingIntent, ServiceRef};
use chrono::{DateTime, Utc};
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, register_int_gauge_vec, GaugeVec, Histogram, IntCounter, IntCounterVec,
    IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for cycle latency (in seconds)
const CYCLE_LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AutoscalerMetricsInner> = OnceLock::new();

struct AutoscalerMetricsInner {
    evaluation_latency_seconds: Histogram,
    services_monitored: IntGauge,
    services_excluded: IntGauge,
    samples_collected: IntCounter,
    sample_failures: IntCounter,
    evaluations_skipped: IntCounterVec,
    aggregation_failures: IntCounterVec,
    intents_emitted: IntCounterVec,
    intents_dropped: IntCounter,
    actuation_failures: IntCounter,
    service_utilization_percent: GaugeVec,
    service_replicas: IntGaugeVec,
}

impl AutoscalerMetricsInner {
    fn new() -> Self {
        Self {
            evaluation_latency_seconds: register_histogram!(
                "swarm_autoscaler_evaluation_latency_seconds",
                "Time spent aggregating and evaluating one service",
                CYCLE_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register evaluation_latency_seconds"),

            services_monitored: register_int_gauge!(
                "swarm_autoscaler_services_monitored",
                "Number of enabled services under evaluation"
            )
            .expect("Failed to register services_monitored"),

            services_excluded: register_int_gauge!(
                "swarm_autoscaler_services_excluded",
                "Number of services currently in discovery cool-down"
            )
            .expect("Failed to register services_excluded"),

            samples_collected: register_int_counter!(
                "swarm_autoscaler_samples_collected_total",
                "Container stats snapshots collected successfully"
            )
            .expect("Failed to register samples_collected"),

            sample_failures: register_int_counter!(
                "swarm_autoscaler_sample_failures_total",
                "Container stats snapshots that failed or timed out"
            )
            .expect("Failed to register sample_failures"),

            evaluations_skipped: register_int_counter_vec!(
                "swarm_autoscaler_evaluations_skipped_total",
                "Service evaluations skipped, by reason",
                &["reason"]
            )
            .expect("Failed to register evaluations_skipped"),

            aggregation_failures: register_int_counter_vec!(
                "swarm_autoscaler_aggregation_failures_total",
                "Service aggregations that failed, by kind",
                &["kind"]
            )
            .expect("Failed to register aggregation_failures"),

            intents_emitted: register_int_counter_vec!(
                "swarm_autoscaler_intents_emitted_total",
                "Scaling intents handed to the actuator, by direction",
                &["direction"]
            )
            .expect("Failed to register intents_emitted"),

            intents_dropped: register_int_counter!(
                "swarm_autoscaler_intents_dropped_total",
                "Scaling intents dropped because the actuator queue was full"
            )
            .expect("Failed to register intents_dropped"),

            actuation_failures: register_int_counter!(
                "swarm_autoscaler_actuation_failures_total",
                "Replica updates rejected by the orchestrator"
            )
            .expect("Failed to register actuation_failures"),

            service_utilization_percent: register_gauge_vec!(
                "swarm_autoscaler_service_utilization_percent",
                "Latest aggregated utilization per service and metric",
                &["service", "metric"]
            )
            .expect("Failed to register service_utilization_percent"),

            service_replicas: register_int_gauge_vec!(
                "swarm_autoscaler_service_replicas",
                "Replica count last read from the orchestrator",
                &["service"]
            )
            .expect("Failed to register service_replicas"),
        }
    }
}

/// Autoscaler metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct AutoscalerMetrics {
    _private: (),
}

impl Default for AutoscalerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AutoscalerMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AutoscalerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AutoscalerMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_evaluation_latency(&self, duration_secs: f64) {
        self.inner().evaluation_latency_seconds.observe(duration_secs);
    }

    pub fn set_services_monitored(&self, count: i64) {
        self.inner().services_monitored.set(count);
    }

    pub fn set_services_excluded(&self, count: i64) {
        self.inner().services_excluded.set(count);
    }

    pub fn add_samples(&self, collected: u64, failed: u64) {
        self.inner().samples_collected.inc_by(collected);
        self.inner().sample_failures.inc_by(failed);
    }

    pub fn inc_evaluation_skipped(&self, reason: &str) {
        self.inner()
            .evaluations_skipped
            .with_label_values(&[reason])
            .inc();
    }

    pub fn inc_aggregation_failure(&self, kind: &str) {
        self.inner()
            .aggregation_failures
            .with_label_values(&[kind])
            .inc();
    }

    pub fn inc_intent(&self, direction: &str) {
        self.inner()
            .intents_emitted
            .with_label_values(&[direction])
            .inc();
    }

    pub fn inc_intents_dropped(&self) {
        self.inner().intents_dropped.inc();
    }

    pub fn inc_actuation_failures(&self) {
        self.inner().actuation_failures.inc();
    }

    pub fn set_utilization(&self, service: &str, metric: &str, percent: f64) {
        self.inner()
            .service_utilization_percent
            .with_label_values(&[service, metric])
            .set(percent);
    }

    pub fn set_replicas(&self, service: &str, replicas: u32) {
        self.inner()
            .service_replicas
            .with_label_values(&[service])
            .set(i64::from(replicas));
    }
}

/// Structured logger for autoscaler events
///
/// Provides consistent JSON-formatted records for intents, exclusions,
/// actuation results and lifecycle events.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    /// Log a scaling intent leaving the decision engine
    pub fn log_intent(&self, intent: &ScalingIntent) {
        info!(
            event = "scaling_intent",
            instance = %self.instance,
            service = %intent.service,
            direction = intent.direction.as_str(),
            current_replicas = intent.current_replicas,
            target_replicas = intent.target_replicas,
            decided_at = %intent.decided_at,
            "Scaling intent produced"
        );
    }

    /// Log a service entering discovery cool-down
    pub fn log_exclusion(
        &self,
        service: &ServiceRef,
        consecutive_failures: u32,
        until: DateTime<Utc>,
        reason: &str,
    ) {
        warn!(
            event = "service_excluded",
            instance = %self.instance,
            service = %service,
            consecutive_failures = consecutive_failures,
            excluded_until = %until,
            reason = %reason,
            "Service excluded until cool-down expires"
        );
    }

    /// Log the single retry of a service whose cool-down expired
    pub fn log_retry(&self, service: &ServiceRef, consecutive_failures: u32) {
        info!(
            event = "service_retry",
            instance = %self.instance,
            service = %service,
            consecutive_failures = consecutive_failures,
            "Cool-down expired, retrying service"
        );
    }

    /// Log a service that recovered after failures
    pub fn log_recovered(&self, service: &ServiceRef, previous_failures: u32) {
        info!(
            event = "service_recovered",
            instance = %self.instance,
            service = %service,
            previous_failures = previous_failures,
            "Service discovery recovered"
        );
    }

    /// Log the outcome of applying an intent
    pub fn log_actuation(&self, intent: &ScalingIntent, error: Option<&str>) {
        match error {
            None => info!(
                event = "actuation_applied",
                instance = %self.instance,
                service = %intent.service,
                target_replicas = intent.target_replicas,
                "Scaling intent applied"
            ),
            Some(error) => warn!(
                event = "actuation_failed",
                instance = %self.instance,
                service = %intent.service,
                target_replicas = intent.target_replicas,
                error = %error,
                "Failed to apply scaling intent"
            ),
        }
    }

    pub fn log_startup(&self, version: &str, services: usize, dry_run: bool) {
        info!(
            event = "autoscaler_started",
            instance = %self.instance,
            version = %version,
            services = services,
            dry_run = dry_run,
            "Swarm autoscaler started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "autoscaler_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Swarm autoscaler shutting down"
        );
    }
}

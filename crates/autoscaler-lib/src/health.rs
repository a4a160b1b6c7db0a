//! Health check infrastructure for the autoscaler
//!
//! Tracks component health, the scheduler heartbeat and the set of services
//! currently in discovery cool-down, for liveness and readiness probes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still operational, e.g. some services are excluded
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub since: DateTime<Utc>,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            since: Utc::now(),
        }
    }

    pub fn healthy() -> Self {
        Self::new(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::new(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
    pub excluded_services: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle_at: Option<DateTime<Utc>>,
}

impl HealthResponse {
    /// Worst status across components
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|h| h.status)
            .max_by_key(|s| match s {
                ComponentStatus::Healthy => 0,
                ComponentStatus::Degraded => 1,
                ComponentStatus::Unhealthy => 2,
            })
            .unwrap_or(ComponentStatus::Healthy)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const SCHEDULER: &str = "scheduler";
    pub const DISCOVERY: &str = "discovery";
    pub const ACTUATOR: &str = "actuator";
}

#[derive(Debug, Default)]
struct HealthState {
    components: HashMap<String, ComponentHealth>,
    excluded: BTreeSet<String>,
    last_cycle_at: Option<DateTime<Utc>>,
    ready: bool,
}

/// Shared health registry, cheap to clone
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<HealthState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component with initial healthy status
    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        let mut state = self.state.write().await;
        state.components.insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.ready = ready;
    }

    /// Scheduler heartbeat, recorded once per dispatched cycle
    pub async fn record_cycle(&self, at: DateTime<Utc>) {
        self.state.write().await.last_cycle_at = Some(at);
    }

    /// Track a service entering or leaving cool-down; discovery is degraded while any is excluded
    pub async fn set_excluded(&self, service: &str, excluded: bool) {
        let mut state = self.state.write().await;
        let changed = if excluded {
            state.excluded.insert(service.to_string())
        } else {
            state.excluded.remove(service)
        };
        if !changed {
            return;
        }

        let health = if state.excluded.is_empty() {
            ComponentHealth::healthy()
        } else {
            ComponentHealth::degraded(format!(
                "{} service(s) in discovery cool-down",
                state.excluded.len()
            ))
        };
        state
            .components
            .insert(components::DISCOVERY.to_string(), health);
    }

    pub async fn excluded_count(&self) -> usize {
        self.state.read().await.excluded.len()
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        HealthResponse {
            status: HealthResponse::compute_status(&state.components),
            components: state.components.clone(),
            excluded_services: state.excluded.iter().cloned().collect(),
            last_cycle_at: state.last_cycle_at,
        }
    }

    /// Ready once initialized, no component is unhealthy and the scheduler has ticked
    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        let status = HealthResponse::compute_status(&state.components);

        let reason = if !state.ready {
            Some("Autoscaler not yet initialized")
        } else if status == ComponentStatus::Unhealthy {
            Some("Critical component unhealthy")
        } else if state.last_cycle_at.is_none() {
            Some("No evaluation cycle completed yet")
        } else {
            None
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason: reason.map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_registry_initial_state() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
        assert!(health.excluded_services.is_empty());
        assert!(health.last_cycle_at.is_none());
    }

    #[tokio::test]
    async fn test_unhealthy_component_dominates() {
        let registry = HealthRegistry::new();
        registry.register(components::SCHEDULER).await;
        registry.set_degraded(components::ACTUATOR, "update rejected").await;
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);

        registry.set_unhealthy(components::SCHEDULER, "Scheduler stopped").await;
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_exclusions_degrade_discovery() {
        let registry = HealthRegistry::new();
        registry.register(components::DISCOVERY).await;

        registry.set_excluded("olc_traefik", true).await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(health.excluded_services, vec!["olc_traefik".to_string()]);
        assert_eq!(registry.excluded_count().await, 1);

        registry.set_excluded("olc_traefik", false).await;
        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.excluded_services.is_empty());
    }

    #[tokio::test]
    async fn test_readiness_requires_init_and_a_cycle() {
        let registry = HealthRegistry::new();
        registry.register(components::SCHEDULER).await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert!(readiness.reason.is_some());

        registry.set_ready(true).await;
        assert!(!registry.readiness().await.ready);

        registry.record_cycle(Utc::now()).await;
        let readiness = registry.readiness().await;
        assert!(readiness.ready);
        assert!(readiness.reason.is_none());
    }

    #[tokio::test]
    async fn test_readiness_not_ready_when_unhealthy() {
        let registry = HealthRegistry::new();
        registry.register(components::SCHEDULER).await;
        registry.set_ready(true).await;
        registry.record_cycle(Utc::now()).await;
        registry.set_unhealthy(components::SCHEDULER, "Failed").await;

        assert!(!registry.readiness().await.ready);
    }
}

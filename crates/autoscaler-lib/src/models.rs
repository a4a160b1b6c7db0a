//! Core data models for the autoscaler

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Orchestrator-facing identity of a configured service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceRef {
    pub name: String,
    pub stack: Option<String>,
}

impl ServiceRef {
    pub fn new(name: impl Into<String>, stack: Option<String>) -> Self {
        Self {
            name: name.into(),
            stack: stack.filter(|s| !s.is_empty()),
        }
    }

    /// Name the orchestrator knows the service by (`<stack>_<name>` inside a stack)
    pub fn qualified_name(&self) -> String {
        match &self.stack {
            Some(stack) => format!("{}_{}", stack, self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for ServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_name())
    }
}

/// A running container backing a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHandle {
    pub id: String,
    pub name: Option<String>,
}

impl ContainerHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

/// One container's resource counters at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub container_id: String,
    /// Cumulative CPU time consumed by the container
    pub cpu_usage: u64,
    /// Cumulative CPU time of the whole host, same unit as `cpu_usage`
    pub system_usage: u64,
    pub online_cpus: u32,
    pub memory_usage_bytes: u64,
    pub memory_limit_bytes: u64,
    pub captured_at: DateTime<Utc>,
}

/// Resource dimension a threshold is defined on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Cpu,
    Memory,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Cpu => "cpu",
            MetricKind::Memory => "memory",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregated utilization of one service for one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationSample {
    pub service: String,
    pub metric: MetricKind,
    /// Percentage, 0-100 per CPU for `Cpu`, 0-100 for `Memory`
    pub percent: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleDirection {
    Up,
    Down,
    None,
}

impl ScaleDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScaleDirection::Up => "up",
            ScaleDirection::Down => "down",
            ScaleDirection::None => "none",
        }
    }
}

/// Output of one evaluation, handed to the actuator when it changes something
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingIntent {
    pub service: ServiceRef,
    pub direction: ScaleDirection,
    pub current_replicas: u32,
    pub target_replicas: u32,
    pub decided_at: DateTime<Utc>,
}

impl ScalingIntent {
    pub fn none(service: ServiceRef, current_replicas: u32, decided_at: DateTime<Utc>) -> Self {
        Self {
            service,
            direction: ScaleDirection::None,
            current_replicas,
            target_replicas: current_replicas,
            decided_at,
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.direction != ScaleDirection::None && self.target_replicas != self.current_replicas
    }
}

//! Error types for the autoscaler core
//!
//! Configuration problems are fatal at load time. Aggregation errors are
//! per-service and only ever lead to a bounded exclusion of that service.

use std::time::Duration;
use thiserror::Error;

/// Invalid configuration, rejected before monitoring starts
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("{field} is {actual:?}, minimum is {minimum:?}")]
    DurationTooShort {
        field: String,
        actual: Duration,
        minimum: Duration,
    },

    #[error("service '{service}': unknown reduction strategy '{value}'")]
    UnknownReduction { service: String, value: String },

    #[error("service '{service}': {metric} percent {value} must be within (0, 1]")]
    InvalidPercent {
        service: String,
        metric: String,
        value: f64,
    },

    #[error("service '{service}': invalid replica bounds (min {min}, max {max})")]
    InvalidReplicaBounds { service: String, min: u32, max: u32 },

    #[error("service '{service}': scale step must be at least 1")]
    InvalidScaleStep { service: String },

    #[error("service '{service}': no metric thresholds configured")]
    NoThresholds { service: String },

    #[error("service name must not be empty")]
    EmptyServiceName,

    #[error("service '{0}' is configured more than once")]
    DuplicateService(String),

    #[error("{field} must be greater than zero")]
    ZeroValue { field: String },
}

/// Failure of one container sample; never fatal for the service
#[derive(Debug, Clone, Error)]
pub enum SampleError {
    #[error("container {container_id}: stats snapshot timed out after {after:?}")]
    Timeout { container_id: String, after: Duration },

    #[error("container {container_id}: {message}")]
    Stats {
        container_id: String,
        message: String,
    },

    #[error("container {container_id}: sample abandoned at aggregation deadline")]
    Abandoned { container_id: String },
}

impl SampleError {
    pub fn container_id(&self) -> &str {
        match self {
            SampleError::Timeout { container_id, .. }
            | SampleError::Stats { container_id, .. }
            | SampleError::Abandoned { container_id } => container_id,
        }
    }
}

/// Service-level aggregation failure, feeds the exclusion policy
#[derive(Debug, Clone, Error)]
pub enum AggregationError {
    #[error("no containers found for service '{service}'")]
    NoContainersFound { service: String },

    #[error("discovery failed for service '{service}': {reason}")]
    DiscoveryFailure { service: String, reason: String },
}

impl AggregationError {
    pub fn service(&self) -> &str {
        match self {
            AggregationError::NoContainersFound { service }
            | AggregationError::DiscoveryFailure { service, .. } => service,
        }
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

//! Autoscaler library for Docker Swarm services
//!
//! This crate provides the core functionality for:
//! - Container stats sampling and service-level utilization aggregation
//! - Debounced scale-up/scale-down decisions per service
//! - The periodic evaluation cycle with bounded exclusion of failing services
//! - Docker Swarm discovery, stats and replica updates
//! - Health checks and observability

pub mod collector;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod utilization;

pub use crate::config::{AutoscalerConfig, ServiceConfig};
pub use error::{AggregationError, ConfigError, SampleError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AutoscalerMetrics, StructuredLogger};

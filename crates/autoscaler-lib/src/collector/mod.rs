//! Utilization collection and the evaluation cycle
//!
//! This module samples the containers of each configured service, reduces
//! the per-container percentages into service-level utilization samples and
//! drives the decision engine once per tick. Services that keep failing
//! discovery are excluded for a bounded cool-down.

mod aggregator;
mod exclusion;
mod r#loop;
mod sampler;


pub use aggregator::{AggregationReport, PartialSampleFailure, ServiceAggregator};
pub use exclusion::{ExclusionCheck, ExclusionState};
pub use r#loop::{CycleScheduler, CycleSchedulerBuilder, SchedulerConfig, ServiceOutcome};
pub use sampler::ContainerSampler;

//! Utilization calculation from raw container counters
//!
//! Pure functions only; every input, including time, arrives through the
//! samples themselves.

use crate::models::RawSample;

/// CPU utilization between two snapshots of the same container
///
/// Returns a percentage in `[0, 100 * online_cpus]`, or `0.0` when either
/// counter did not move forward (first sample, counter reset, clock skew).
pub fn cpu_percent(previous: &RawSample, current: &RawSample) -> f64 {
    let cpu_delta = current.cpu_usage as f64 - previous.cpu_usage as f64;
    let system_delta = current.system_usage as f64 - previous.system_usage as f64;

    if cpu_delta <= 0.0 || system_delta <= 0.0 {
        return 0.0;
    }

    let units = current.online_cpus.max(1) as f64;
    let percent = (cpu_delta / system_delta) * units * 100.0;

    percent.min(units * 100.0)
}

/// Memory utilization of a single snapshot against its limit
pub fn memory_percent(sample: &RawSample) -> f64 {
    if sample.memory_limit_bytes == 0 {
        return 0.0;
    }

    let percent = sample.memory_usage_bytes as f64 / sample.memory_limit_bytes as f64 * 100.0;
    percent.min(100.0)
}

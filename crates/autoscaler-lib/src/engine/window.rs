//! Time-ordered sample window for debounce queries

use crate::models::UtilizationSample;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::Duration;

/// Bounded buffer of recent samples for one (service, metric) pair
///
/// Samples older than `retention` are evicted, except the newest one at or
/// before the cut-off: it proves that a run began at least `retention` ago.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    samples: VecDeque<UtilizationSample>,
    retention: Duration,
}

impl SampleWindow {
    pub fn new(retention: Duration) -> Self {
        Self {
            samples: VecDeque::new(),
            retention,
        }
    }

    /// Append a sample and evict expired ones
    ///
    /// Returns `false` and drops the sample if it is older than the newest
    /// sample already in the window.
    pub fn push(&mut self, sample: UtilizationSample) -> bool {
        if let Some(last) = self.samples.back() {
            if sample.timestamp < last.timestamp {
                return false;
            }
        }

        let now = sample.timestamp;
        self.samples.push_back(sample);
        self.evict(now);
        true
    }

    fn evict(&mut self, now: DateTime<Utc>) {
        while self.samples.len() >= 2 && elapsed(self.samples[1].timestamp, now) >= self.retention {
            self.samples.pop_front();
        }
    }

    /// True if every sample of the trailing run is `>= threshold` and the run spans `duration`
    pub fn held_at_or_above(&self, threshold: f64, duration: Duration) -> bool {
        self.held(|v| v >= threshold, duration)
    }

    /// True if every sample of the trailing run is `< threshold` and the run spans `duration`
    pub fn held_below(&self, threshold: f64, duration: Duration) -> bool {
        self.held(|v| v < threshold, duration)
    }

    /// The run is measured between observed samples only; wall-clock time
    /// passing without new samples never extends it.
    fn held(&self, predicate: impl Fn(f64) -> bool, duration: Duration) -> bool {
        let Some(newest) = self.samples.back() else {
            return false;
        };

        let run_start = self
            .samples
            .iter()
            .rev()
            .take_while(|s| predicate(s.percent))
            .last()
            .map(|s| s.timestamp);

        match run_start {
            Some(start) => elapsed(start, newest.timestamp) >= duration,
            None => false,
        }
    }

    pub fn latest(&self) -> Option<&UtilizationSample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }
}

fn elapsed(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    (to - from).to_std().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetricKind;
    use chrono::TimeZone;

    fn at(secs: i64, percent: f64) -> UtilizationSample {
        UtilizationSample {
            service: "web".to_string(),
            metric: MetricKind::Cpu,
            percent,
            timestamp: t(secs),
        }
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_empty_window_never_holds() {
        let window = SampleWindow::new(Duration::from_secs(10));
        assert!(window.is_empty());
        assert!(!window.held_at_or_above(20.0, Duration::from_secs(10)));
        assert!(!window.held_below(20.0, Duration::from_secs(10)));
    }

    #[test]
    fn test_held_above_requires_full_duration() {
        let mut window = SampleWindow::new(Duration::from_secs(10));
        window.push(at(0, 25.0));
        window.push(at(5, 22.0));
        assert!(!window.held_at_or_above(20.0, Duration::from_secs(10)));

        window.push(at(10, 21.0));
        assert!(window.held_at_or_above(20.0, Duration::from_secs(10)));
    }

    #[test]
    fn test_threshold_is_inclusive_above() {
        let mut window = SampleWindow::new(Duration::from_secs(10));
        window.push(at(0, 20.0));
        window.push(at(10, 20.0));
        assert!(window.held_at_or_above(20.0, Duration::from_secs(10)));
        assert!(!window.held_below(20.0, Duration::from_secs(10)));
    }

    #[test]
    fn test_dip_breaks_run() {
        let mut window = SampleWindow::new(Duration::from_secs(10));
        window.push(at(0, 25.0));
        window.push(at(5, 10.0));
        window.push(at(10, 25.0));
        assert!(!window.held_at_or_above(20.0, Duration::from_secs(10)));
        assert!(!window.held_below(20.0, Duration::from_secs(10)));
    }

    #[test]
    fn test_held_below() {
        let mut window = SampleWindow::new(Duration::from_secs(10));
        window.push(at(0, 5.0));
        window.push(at(5, 3.0));
        window.push(at(10, 1.0));
        assert!(window.held_below(20.0, Duration::from_secs(10)));
    }

    #[test]
    fn test_eviction_keeps_run_anchor_under_jitter() {
        let mut window = SampleWindow::new(Duration::from_secs(10));
        window.push(at(0, 30.0));
        window.push(at(6, 30.0));
        window.push(at(12, 30.0));

        // Sample at t=0 is older than retention but still anchors the run
        assert_eq!(window.len(), 3);
        assert!(window.held_at_or_above(20.0, Duration::from_secs(10)));

        window.push(at(18, 30.0));
        // t=0 is now redundant: t=6 lies at or before the cut-off
        assert_eq!(window.len(), 3);
        assert_eq!(window.samples.front().map(|s| s.timestamp), Some(t(6)));
    }

    #[test]
    fn test_run_is_not_extended_without_new_samples() {
        let mut window = SampleWindow::new(Duration::from_secs(10));
        window.push(at(0, 25.0));
        assert!(!window.held_at_or_above(20.0, Duration::from_secs(10)));

        window.push(at(4, 25.0));
        assert!(!window.held_at_or_above(20.0, Duration::from_secs(10)));
        // Only observed samples count, so the run matures at t=10
        window.push(at(10, 21.0));
        assert!(window.held_at_or_above(20.0, Duration::from_secs(10)));
    }

    #[test]
    fn test_out_of_order_sample_is_rejected() {
        let mut window = SampleWindow::new(Duration::from_secs(10));
        assert!(window.push(at(10, 30.0)));
        assert!(!window.push(at(5, 30.0)));
        assert_eq!(window.len(), 1);
        assert_eq!(window.latest().map(|s| s.timestamp), Some(t(10)));
    }

    #[test]
    fn test_clear() {
        let mut window = SampleWindow::new(Duration::from_secs(10));
        window.push(at(0, 30.0));
        window.clear();
        assert!(window.is_empty());
        assert!(window.latest().is_none());
    }
}

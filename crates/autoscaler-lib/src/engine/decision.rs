//! Per-service scaling state machine
//!
//! Each configured metric keeps its own sample window and pending state. A
//! scale-up needs one metric to stay at or above its trigger for the whole
//! scale-up duration; a scale-down needs every metric to stay below its
//! trigger for the scale-down duration. Scale-up wins ties.

use super::window::SampleWindow;
use crate::config::{MetricThreshold, ServiceConfig};
use crate::models::{MetricKind, ScaleDirection, ScalingIntent, ServiceRef, UtilizationSample};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EngineState {
    Stable,
    PendingScaleUp { since: DateTime<Utc> },
    PendingScaleDown { since: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Vote {
    Up,
    Down,
    Hold,
}

#[derive(Debug, Clone)]
struct MetricTrack {
    threshold: MetricThreshold,
    window: SampleWindow,
    state: EngineState,
}

impl MetricTrack {
    fn new(threshold: MetricThreshold) -> Self {
        let window = SampleWindow::new(threshold.retention());
        Self {
            threshold,
            window,
            state: EngineState::Stable,
        }
    }

    /// Move between states on the newest sample; returns the cancelled state if any
    fn transition(&mut self, sample: &UtilizationSample) -> Option<EngineState> {
        let above = sample.percent >= self.threshold.trigger_percent();

        match (self.state, above) {
            (EngineState::PendingScaleDown { .. }, true)
            | (EngineState::PendingScaleUp { .. }, false) => {
                let cancelled = self.state;
                self.state = EngineState::Stable;
                Some(cancelled)
            }
            (EngineState::Stable, true) => {
                self.state = EngineState::PendingScaleUp {
                    since: sample.timestamp,
                };
                None
            }
            (EngineState::Stable, false) => {
                self.state = EngineState::PendingScaleDown {
                    since: sample.timestamp,
                };
                None
            }
            _ => None,
        }
    }

    fn vote(&self) -> Vote {
        let trigger = self.threshold.trigger_percent();
        match self.state {
            EngineState::PendingScaleUp { .. }
                if self
                    .window
                    .held_at_or_above(trigger, self.threshold.scale_up_duration) =>
            {
                Vote::Up
            }
            EngineState::PendingScaleDown { .. }
                if self
                    .window
                    .held_below(trigger, self.threshold.scale_down_duration) =>
            {
                Vote::Down
            }
            _ => Vote::Hold,
        }
    }

    fn reset(&mut self) {
        self.window.clear();
        self.state = EngineState::Stable;
    }
}

/// Decision engine owned by the runtime state of one service
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    service: ServiceRef,
    max_replicas: u32,
    min_replicas: u32,
    scale_step: u32,
    tracks: BTreeMap<MetricKind, MetricTrack>,
    last_scale_at: Option<DateTime<Utc>>,
}

impl DecisionEngine {
    pub fn new(config: &ServiceConfig) -> Self {
        let tracks = config
            .thresholds
            .iter()
            .map(|(metric, threshold)| (*metric, MetricTrack::new(threshold.clone())))
            .collect();

        Self {
            service: config.service.clone(),
            max_replicas: config.max_replicas,
            min_replicas: config.min_replicas.max(1),
            scale_step: config.scale_step.max(1),
            tracks,
            last_scale_at: None,
        }
    }

    /// Append an aggregated sample to its window and update the pending state
    ///
    /// Samples for metrics without a configured threshold are ignored.
    pub fn record(&mut self, sample: UtilizationSample) {
        let Some(track) = self.tracks.get_mut(&sample.metric) else {
            return;
        };

        if !track.window.push(sample.clone()) {
            debug!(service = %self.service, "Dropped out-of-order utilization sample");
            return;
        }

        if let Some(cancelled) = track.transition(&sample) {
            debug!(
                service = %self.service,
                metric = %sample.metric,
                percent = sample.percent,
                cancelled = ?cancelled,
                "Pending scaling transition cancelled"
            );
        }
    }

    /// Decide on this tick's intent given the replica count read from the orchestrator
    pub fn evaluate(&mut self, current_replicas: u32, now: DateTime<Utc>) -> ScalingIntent {
        let votes: Vec<Vote> = self.tracks.values().map(|t| t.vote()).collect();

        if votes.contains(&Vote::Up) {
            if current_replicas >= self.max_replicas {
                info!(
                    service = %self.service,
                    replicas = current_replicas,
                    max_replicas = self.max_replicas,
                    "Scale-up capped at max replicas"
                );
                return ScalingIntent::none(self.service.clone(), current_replicas, now);
            }

            let target = current_replicas
                .saturating_add(self.scale_step)
                .min(self.max_replicas);
            return self.commit(ScaleDirection::Up, current_replicas, target, now);
        }

        if !votes.is_empty() && votes.iter().all(|v| *v == Vote::Down) {
            if current_replicas <= self.min_replicas {
                debug!(
                    service = %self.service,
                    replicas = current_replicas,
                    min_replicas = self.min_replicas,
                    "Scale-down floored at min replicas"
                );
                return ScalingIntent::none(self.service.clone(), current_replicas, now);
            }

            let target = current_replicas
                .saturating_sub(self.scale_step)
                .max(self.min_replicas);
            return self.commit(ScaleDirection::Down, current_replicas, target, now);
        }

        ScalingIntent::none(self.service.clone(), current_replicas, now)
    }

    fn commit(
        &mut self,
        direction: ScaleDirection,
        current_replicas: u32,
        target_replicas: u32,
        now: DateTime<Utc>,
    ) -> ScalingIntent {
        for track in self.tracks.values_mut() {
            track.reset();
        }
        self.last_scale_at = Some(now);

        ScalingIntent {
            service: self.service.clone(),
            direction,
            current_replicas,
            target_replicas,
            decided_at: now,
        }
    }

    /// Service-level summary: pending scale-up dominates pending scale-down
    pub fn state(&self) -> EngineState {
        let states = self.tracks.values().map(|t| t.state);
        let mut summary = EngineState::Stable;
        for state in states {
            match state {
                EngineState::PendingScaleUp { .. } => return state,
                EngineState::PendingScaleDown { .. } if summary == EngineState::Stable => {
                    summary = state
                }
                _ => {}
            }
        }
        summary
    }

    pub fn metric_state(&self, metric: MetricKind) -> Option<EngineState> {
        self.tracks.get(&metric).map(|t| t.state)
    }

    pub fn last_scale_at(&self) -> Option<DateTime<Utc>> {
        self.last_scale_at
    }

    pub fn metrics(&self) -> impl Iterator<Item = MetricKind> + '_ {
        self.tracks.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Reduction;
    use chrono::TimeZone;
    use std::time::Duration;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn threshold(percent: f64) -> MetricThreshold {
        MetricThreshold {
            percent,
            reduction: Reduction::Average,
            scale_up_duration: Duration::from_secs(10),
            scale_down_duration: Duration::from_secs(10),
        }
    }

    fn service(max_replicas: u32, metrics: &[(MetricKind, f64)]) -> ServiceConfig {
        ServiceConfig {
            service: ServiceRef::new("traefik", Some("olc".to_string())),
            enabled: true,
            max_replicas,
            min_replicas: 1,
            scale_step: 1,
            thresholds: metrics
                .iter()
                .map(|(metric, percent)| (*metric, threshold(*percent)))
                .collect(),
        }
    }

    fn sample(metric: MetricKind, secs: i64, percent: f64) -> UtilizationSample {
        UtilizationSample {
            service: "traefik".to_string(),
            metric,
            percent,
            timestamp: t(secs),
        }
    }

    /// Feed one CPU sample per tick, returning the intent of every tick
    fn run_cpu(engine: &mut DecisionEngine, replicas: u32, series: &[(i64, f64)]) -> Vec<ScalingIntent> {
        series
            .iter()
            .map(|(secs, percent)| {
                engine.record(sample(MetricKind::Cpu, *secs, *percent));
                engine.evaluate(replicas, t(*secs))
            })
            .collect()
    }

    #[test]
    fn test_sustained_breach_scales_up_on_third_tick() {
        let mut engine = DecisionEngine::new(&service(3, &[(MetricKind::Cpu, 0.2)]));
        let intents = run_cpu(&mut engine, 1, &[(0, 25.0), (5, 22.0), (10, 21.0)]);

        assert_eq!(intents[0].direction, ScaleDirection::None);
        assert_eq!(intents[1].direction, ScaleDirection::None);
        assert_eq!(intents[2].direction, ScaleDirection::Up);
        assert_eq!(intents[2].current_replicas, 1);
        assert_eq!(intents[2].target_replicas, 2);
        assert_eq!(engine.state(), EngineState::Stable);
        assert_eq!(engine.last_scale_at(), Some(t(10)));
    }

    #[test]
    fn test_single_dip_cancels_scale_up() {
        let mut engine = DecisionEngine::new(&service(3, &[(MetricKind::Cpu, 0.2)]));
        let intents = run_cpu(&mut engine, 1, &[(0, 25.0), (5, 10.0), (10, 25.0)]);

        assert!(intents.iter().all(|i| i.direction == ScaleDirection::None));
        assert!(engine.last_scale_at().is_none());
    }

    #[test]
    fn test_dip_moves_pending_up_back_to_stable() {
        let mut engine = DecisionEngine::new(&service(3, &[(MetricKind::Cpu, 0.2)]));
        engine.record(sample(MetricKind::Cpu, 0, 25.0));
        assert_eq!(
            engine.metric_state(MetricKind::Cpu),
            Some(EngineState::PendingScaleUp { since: t(0) })
        );

        engine.record(sample(MetricKind::Cpu, 5, 10.0));
        assert_eq!(engine.metric_state(MetricKind::Cpu), Some(EngineState::Stable));

        engine.record(sample(MetricKind::Cpu, 10, 10.0));
        assert_eq!(
            engine.metric_state(MetricKind::Cpu),
            Some(EngineState::PendingScaleDown { since: t(10) })
        );
    }

    #[test]
    fn test_never_scales_up_at_max_replicas() {
        let mut engine = DecisionEngine::new(&service(3, &[(MetricKind::Cpu, 0.2)]));
        let series: Vec<(i64, f64)> = (0..20).map(|i| (i * 5, 95.0)).collect();
        let intents = run_cpu(&mut engine, 3, &series);

        assert!(intents.iter().all(|i| i.direction == ScaleDirection::None));
        assert!(intents.iter().all(|i| i.target_replicas == 3));
    }

    #[test]
    fn test_scale_up_is_capped_by_step_and_max() {
        let mut config = service(4, &[(MetricKind::Cpu, 0.2)]);
        config.scale_step = 3;
        let mut engine = DecisionEngine::new(&config);

        let intents = run_cpu(&mut engine, 2, &[(0, 50.0), (5, 50.0), (10, 50.0)]);
        assert_eq!(intents[2].direction, ScaleDirection::Up);
        assert_eq!(intents[2].target_replicas, 4);
    }

    #[test]
    fn test_one_replica_per_debounce_period() {
        let mut engine = DecisionEngine::new(&service(10, &[(MetricKind::Cpu, 0.2)]));
        let series: Vec<(i64, f64)> = (0..7).map(|i| (i * 5, 80.0)).collect();
        let intents = run_cpu(&mut engine, 1, &series);

        let ups: Vec<i64> = intents
            .iter()
            .zip(series.iter())
            .filter(|(i, _)| i.direction == ScaleDirection::Up)
            .map(|(_, (secs, _))| *secs)
            .collect();

        // Window restarts after each action: t=10, then 15..25, then 30
        assert_eq!(ups, vec![10, 25]);
    }

    #[test]
    fn test_sustained_low_scales_down() {
        let mut engine = DecisionEngine::new(&service(3, &[(MetricKind::Cpu, 0.2)]));
        let intents = run_cpu(&mut engine, 3, &[(0, 5.0), (5, 4.0), (10, 3.0)]);

        assert_eq!(intents[2].direction, ScaleDirection::Down);
        assert_eq!(intents[2].target_replicas, 2);
    }

    #[test]
    fn test_scale_down_floors_at_min_replicas() {
        let mut engine = DecisionEngine::new(&service(3, &[(MetricKind::Cpu, 0.2)]));
        let intents = run_cpu(&mut engine, 1, &[(0, 1.0), (5, 1.0), (10, 1.0), (15, 1.0)]);

        assert!(intents.iter().all(|i| i.direction == ScaleDirection::None));
        assert!(intents.iter().all(|i| i.target_replicas >= 1));
    }

    #[test]
    fn test_scale_up_wins_when_metrics_disagree() {
        let mut engine = DecisionEngine::new(&service(
            5,
            &[(MetricKind::Cpu, 0.2), (MetricKind::Memory, 0.8)],
        ));

        let mut last = None;
        for secs in [0, 5, 10] {
            engine.record(sample(MetricKind::Cpu, secs, 50.0));
            engine.record(sample(MetricKind::Memory, secs, 10.0));
            last = Some(engine.evaluate(2, t(secs)));
        }

        let intent = last.unwrap();
        assert_eq!(intent.direction, ScaleDirection::Up);
        assert_eq!(intent.target_replicas, 3);
    }

    #[test]
    fn test_scale_down_needs_every_metric_low() {
        let mut engine = DecisionEngine::new(&service(
            5,
            &[(MetricKind::Cpu, 0.2), (MetricKind::Memory, 0.8)],
        ));

        // CPU low, memory between pending and sustained
        for secs in [0, 5, 10] {
            engine.record(sample(MetricKind::Cpu, secs, 2.0));
            let memory = if secs == 10 { 10.0 } else { 90.0 };
            engine.record(sample(MetricKind::Memory, secs, memory));
            let intent = engine.evaluate(3, t(secs));
            assert_eq!(intent.direction, ScaleDirection::None);
        }
    }

    #[test]
    fn test_stale_window_does_not_mature_without_samples() {
        let mut engine = DecisionEngine::new(&service(3, &[(MetricKind::Cpu, 0.2)]));
        engine.record(sample(MetricKind::Cpu, 0, 25.0));

        for secs in [0, 5, 10, 30] {
            let intent = engine.evaluate(1, t(secs));
            assert_eq!(intent.direction, ScaleDirection::None, "tick at t={secs}");
        }
        assert_eq!(
            engine.metric_state(MetricKind::Cpu),
            Some(EngineState::PendingScaleUp { since: t(0) })
        );
        assert!(engine.last_scale_at().is_none());
    }

    #[test]
    fn test_out_of_order_sample_leaves_state_untouched() {
        let mut engine = DecisionEngine::new(&service(3, &[(MetricKind::Cpu, 0.2)]));
        engine.record(sample(MetricKind::Cpu, 10, 25.0));
        engine.record(sample(MetricKind::Cpu, 5, 10.0));

        assert_eq!(
            engine.metric_state(MetricKind::Cpu),
            Some(EngineState::PendingScaleUp { since: t(10) })
        );

        let intents = run_cpu(&mut engine, 1, &[(15, 25.0), (20, 25.0)]);
        assert_eq!(intents[0].direction, ScaleDirection::None);
        assert_eq!(intents[1].direction, ScaleDirection::Up);
    }

    #[test]
    fn test_samples_for_unconfigured_metric_are_ignored() {
        let mut engine = DecisionEngine::new(&service(3, &[(MetricKind::Cpu, 0.2)]));
        engine.record(sample(MetricKind::Memory, 0, 99.0));

        assert_eq!(engine.metric_state(MetricKind::Memory), None);
        assert_eq!(engine.state(), EngineState::Stable);
        assert_eq!(engine.metrics().collect::<Vec<_>>(), vec![MetricKind::Cpu]);
    }

    #[test]
    fn test_engine_state_serializes_with_tag() {
        let json = serde_json::to_value(EngineState::PendingScaleUp { since: t(0) }).unwrap();
        assert_eq!(json["state"], "pending_scale_up");
        assert!(json["since"].is_string());

        let json = serde_json::to_value(EngineState::Stable).unwrap();
        assert_eq!(json["state"], "stable");
    }
}

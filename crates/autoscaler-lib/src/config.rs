//! Autoscaler configuration schema and validation
//!
//! Configuration is deserialized into raw structs that mirror the YAML file
//! (durations in humantime notation such as `"10s"` or `"1m 30s"`), then validated into the
//! typed structs the rest of the crate consumes. Anything invalid is rejected
//! here so the control loop never meets a bad threshold at runtime.

use crate::error::{ConfigError, ConfigResult};
use crate::models::{MetricKind, ServiceRef};
use config::{Config, FileFormat};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Shortest accepted scale-up/scale-down debounce duration
pub const MIN_THRESHOLD_DURATION: Duration = Duration::from_secs(10);

/// Shortest accepted evaluation interval
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Raw configuration as read from file and environment
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfig {
    /// Evaluation tick interval
    #[serde(with = "humantime_serde", default = "default_interval")]
    pub interval: Duration,

    /// Deadline for a single container stats snapshot
    #[serde(with = "humantime_serde", default = "default_sample_timeout")]
    pub sample_timeout: Duration,

    /// Deadline for fanning in all container samples of one service
    #[serde(with = "humantime_serde", default = "default_aggregation_timeout")]
    pub aggregation_timeout: Duration,

    /// Upper bound of concurrently running container samples per service
    #[serde(default = "default_max_concurrent_samples")]
    pub max_concurrent_samples: usize,

    /// Capacity of the intent channel towards the actuator
    #[serde(default = "default_intent_buffer")]
    pub intent_buffer: usize,

    /// Log intents instead of applying them
    #[serde(default)]
    pub dry_run: bool,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default)]
    pub exclusion: RawExclusion,

    #[serde(default)]
    pub services: Vec<RawService>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawExclusion {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(with = "humantime_serde", default = "default_cooldown")]
    pub cooldown: Duration,
}

impl Default for RawExclusion {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown: default_cooldown(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawService {
    pub name: String,
    #[serde(default)]
    pub stack_name: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub max_replicas: u32,
    #[serde(default = "default_min_replicas")]
    pub min_replicas: u32,
    #[serde(default = "default_scale_step")]
    pub scale_step: u32,
    #[serde(default)]
    pub thresholds: RawThresholds,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawThresholds {
    #[serde(default)]
    pub cpu: Option<RawThreshold>,
    #[serde(default)]
    pub memory: Option<RawThreshold>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawThreshold {
    /// Trigger as a fraction, 0.2 means 20%
    pub percent: f64,
    /// Reduction across containers, `average` when omitted
    #[serde(default = "default_reduction")]
    pub metric: String,
    #[serde(with = "humantime_serde")]
    pub scale_up_duration: Duration,
    #[serde(with = "humantime_serde")]
    pub scale_down_duration: Duration,
}

fn default_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_sample_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_aggregation_timeout() -> Duration {
    Duration::from_secs(4)
}

fn default_max_concurrent_samples() -> usize {
    32
}

fn default_intent_buffer() -> usize {
    64
}

fn default_api_port() -> u16 {
    8080
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cooldown() -> Duration {
    Duration::from_secs(60)
}

fn default_enabled() -> bool {
    true
}

fn default_min_replicas() -> u32 {
    1
}

fn default_scale_step() -> u32 {
    1
}

fn default_reduction() -> String {
    "average".to_string()
}

impl RawConfig {
    /// Deserialize from an already-built `config::Config`
    pub fn from_config(config: Config) -> ConfigResult<Self> {
        Ok(config.try_deserialize()?)
    }

    /// Parse a YAML document
    pub fn from_yaml_str(yaml: &str) -> ConfigResult<Self> {
        let config = Config::builder()
            .add_source(config::File::from_str(yaml, FileFormat::Yaml))
            .build()?;
        Self::from_config(config)
    }

    /// Parse a YAML file
    pub fn from_yaml_file(path: &Path) -> ConfigResult<Self> {
        let config = Config::builder()
            .add_source(config::File::from(path).format(FileFormat::Yaml))
            .build()?;
        Self::from_config(config)
    }
}

/// How per-container percentages are reduced to one service value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduction {
    Average,
    Max,
}

impl Reduction {
    /// Reduce a set of per-container values, `None` when there is nothing to reduce
    pub fn reduce(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        match self {
            Reduction::Average => Some(values.iter().sum::<f64>() / values.len() as f64),
            Reduction::Max => values.iter().copied().reduce(f64::max),
        }
    }
}

impl FromStr for Reduction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "average" | "avg" | "mean" => Ok(Reduction::Average),
            "max" => Ok(Reduction::Max),
            other => Err(other.to_string()),
        }
    }
}

/// Validated threshold for one metric of one service
#[derive(Debug, Clone, PartialEq)]
pub struct MetricThreshold {
    /// Fraction in (0, 1]
    pub percent: f64,
    pub reduction: Reduction,
    pub scale_up_duration: Duration,
    pub scale_down_duration: Duration,
}

impl MetricThreshold {
    /// Threshold expressed on the same 0-100 scale as utilization samples
    pub fn trigger_percent(&self) -> f64 {
        self.percent * 100.0
    }

    /// How long samples must be kept to answer both debounce queries
    pub fn retention(&self) -> Duration {
        self.scale_up_duration.max(self.scale_down_duration)
    }

    fn from_raw(service: &str, metric: MetricKind, raw: &RawThreshold) -> ConfigResult<Self> {
        if !(raw.percent > 0.0 && raw.percent <= 1.0) {
            return Err(ConfigError::InvalidPercent {
                service: service.to_string(),
                metric: metric.to_string(),
                value: raw.percent,
            });
        }

        let reduction =
            raw.metric
                .parse::<Reduction>()
                .map_err(|value| ConfigError::UnknownReduction {
                    service: service.to_string(),
                    value,
                })?;

        let field = |name: &str| format!("services.{}.thresholds.{}.{}", service, metric, name);
        let scale_up_duration = debounce(&field("scale_up_duration"), raw.scale_up_duration)?;
        let scale_down_duration = debounce(&field("scale_down_duration"), raw.scale_down_duration)?;

        Ok(Self {
            percent: raw.percent,
            reduction,
            scale_up_duration,
            scale_down_duration,
        })
    }
}

/// Validated, immutable service configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub service: ServiceRef,
    pub enabled: bool,
    pub max_replicas: u32,
    pub min_replicas: u32,
    pub scale_step: u32,
    pub thresholds: BTreeMap<MetricKind, MetricThreshold>,
}

impl ServiceConfig {
    pub fn name(&self) -> &str {
        &self.service.name
    }

    fn from_raw(raw: &RawService) -> ConfigResult<Self> {
        let name = raw.name.trim();
        if name.is_empty() {
            return Err(ConfigError::EmptyServiceName);
        }

        if raw.min_replicas < 1 || raw.max_replicas < raw.min_replicas {
            return Err(ConfigError::InvalidReplicaBounds {
                service: name.to_string(),
                min: raw.min_replicas,
                max: raw.max_replicas,
            });
        }

        if raw.scale_step < 1 {
            return Err(ConfigError::InvalidScaleStep {
                service: name.to_string(),
            });
        }

        let mut thresholds = BTreeMap::new();
        if let Some(cpu) = &raw.thresholds.cpu {
            thresholds.insert(MetricKind::Cpu, MetricThreshold::from_raw(name, MetricKind::Cpu, cpu)?);
        }
        if let Some(memory) = &raw.thresholds.memory {
            thresholds.insert(
                MetricKind::Memory,
                MetricThreshold::from_raw(name, MetricKind::Memory, memory)?,
            );
        }
        if thresholds.is_empty() {
            return Err(ConfigError::NoThresholds {
                service: name.to_string(),
            });
        }

        Ok(Self {
            service: ServiceRef::new(name, raw.stack_name.clone()),
            enabled: raw.enabled,
            max_replicas: raw.max_replicas,
            min_replicas: raw.min_replicas,
            scale_step: raw.scale_step,
            thresholds,
        })
    }
}

/// Bounded exclusion of services that keep failing discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExclusionPolicy {
    /// Consecutive failures before a service is excluded
    pub failure_threshold: u32,
    /// How long an excluded service is skipped before it is retried
    pub cooldown: Duration,
}

impl Default for ExclusionPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Validated process-wide configuration
#[derive(Debug, Clone)]
pub struct AutoscalerConfig {
    pub interval: Duration,
    pub sample_timeout: Duration,
    pub aggregation_timeout: Duration,
    pub max_concurrent_samples: usize,
    pub intent_buffer: usize,
    pub dry_run: bool,
    pub api_port: u16,
    pub exclusion: ExclusionPolicy,
    pub services: Vec<Arc<ServiceConfig>>,
}

impl AutoscalerConfig {
    /// Validate a raw configuration, failing on the first problem found
    pub fn from_raw(raw: RawConfig) -> ConfigResult<Self> {
        let interval = positive("interval", raw.interval)?;
        if interval < MIN_INTERVAL {
            return Err(ConfigError::DurationTooShort {
                field: "interval".to_string(),
                actual: interval,
                minimum: MIN_INTERVAL,
            });
        }
        let sample_timeout = positive("sample_timeout", raw.sample_timeout)?;
        let aggregation_timeout = positive("aggregation_timeout", raw.aggregation_timeout)?;
        let cooldown = positive("exclusion.cooldown", raw.exclusion.cooldown)?;

        if raw.max_concurrent_samples == 0 {
            return Err(ConfigError::ZeroValue {
                field: "max_concurrent_samples".to_string(),
            });
        }
        if raw.intent_buffer == 0 {
            return Err(ConfigError::ZeroValue {
                field: "intent_buffer".to_string(),
            });
        }
        if raw.exclusion.failure_threshold == 0 {
            return Err(ConfigError::ZeroValue {
                field: "exclusion.failure_threshold".to_string(),
            });
        }

        let mut seen = HashSet::new();
        let mut services = Vec::with_capacity(raw.services.len());
        for raw_service in &raw.services {
            let service = ServiceConfig::from_raw(raw_service)?;
            if !seen.insert(service.service.qualified_name()) {
                return Err(ConfigError::DuplicateService(service.service.qualified_name()));
            }
            services.push(Arc::new(service));
        }

        Ok(Self {
            interval,
            sample_timeout,
            aggregation_timeout,
            max_concurrent_samples: raw.max_concurrent_samples,
            intent_buffer: raw.intent_buffer,
            dry_run: raw.dry_run,
            api_port: raw.api_port,
            exclusion: ExclusionPolicy {
                failure_threshold: raw.exclusion.failure_threshold,
                cooldown,
            },
            services,
        })
    }

    /// Services the scheduler should evaluate
    pub fn enabled_services(&self) -> impl Iterator<Item = &Arc<ServiceConfig>> {
        self.services.iter().filter(|s| s.enabled)
    }
}

fn positive(field: &str, duration: Duration) -> ConfigResult<Duration> {
    if duration.is_zero() {
        return Err(ConfigError::ZeroValue {
            field: field.to_string(),
        });
    }
    Ok(duration)
}

fn debounce(field: &str, duration: Duration) -> ConfigResult<Duration> {
    if duration < MIN_THRESHOLD_DURATION {
        return Err(ConfigError::DurationTooShort {
            field: field.to_string(),
            actual: duration,
            minimum: MIN_THRESHOLD_DURATION,
        });
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE_CONFIG: &str = r#"
interval: 5s
exclusion:
  failure_threshold: 3
  cooldown: 30s
services:
  - name: traefik
    stack_name: olc
    max_replicas: 3
    thresholds:
      cpu:
        percent: 0.2
        metric: average
        scale_up_duration: 10s
        scale_down_duration: 10s
  - name: grafana
    stack_name: olc
    enabled: false
    max_replicas: 2
    thresholds:
      cpu:
        percent: 0.2
        scale_up_duration: 10s
        scale_down_duration: 1m
      memory:
        percent: 0.8
        metric: max
        scale_up_duration: 30s
        scale_down_duration: 2m
"#;

    fn raw_service(threshold: RawThreshold) -> RawService {
        RawService {
            name: "web".to_string(),
            stack_name: None,
            enabled: true,
            max_replicas: 3,
            min_replicas: 1,
            scale_step: 1,
            thresholds: RawThresholds {
                cpu: Some(threshold),
                memory: None,
            },
        }
    }

    fn raw_threshold() -> RawThreshold {
        RawThreshold {
            percent: 0.2,
            metric: "average".to_string(),
            scale_up_duration: Duration::from_secs(10),
            scale_down_duration: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_durations_in_humantime_notation() {
        let yaml = r#"
interval: 1m 30s
sample_timeout: 500ms
aggregation_timeout: 2s
exclusion:
  cooldown: 1h
"#;
        let raw = RawConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(raw.interval, Duration::from_secs(90));
        assert_eq!(raw.sample_timeout, Duration::from_millis(500));
        assert_eq!(raw.aggregation_timeout, Duration::from_secs(2));
        assert_eq!(raw.exclusion.cooldown, Duration::from_secs(3600));
    }

    #[test]
    fn test_unparsable_duration_fails_to_load() {
        for bad in ["ten seconds", "10", "-5s", "\"\""] {
            let yaml = format!("interval: {}\n", bad);
            assert!(
                matches!(RawConfig::from_yaml_str(&yaml), Err(ConfigError::Load(_))),
                "accepted interval {}",
                bad
            );
        }
    }

    #[test]
    fn test_reduction_parse_and_reduce() {
        assert_eq!("average".parse::<Reduction>().unwrap(), Reduction::Average);
        assert_eq!("MAX".parse::<Reduction>().unwrap(), Reduction::Max);
        assert!("p95".parse::<Reduction>().is_err());

        assert_eq!(Reduction::Average.reduce(&[10.0, 20.0, 30.0]), Some(20.0));
        assert_eq!(Reduction::Max.reduce(&[10.0, 35.0, 30.0]), Some(35.0));
        assert_eq!(Reduction::Average.reduce(&[]), None);
    }

    #[test]
    fn test_load_sample_config() {
        let raw = RawConfig::from_yaml_str(SAMPLE_CONFIG).unwrap();
        let config = AutoscalerConfig::from_raw(raw).unwrap();

        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.sample_timeout, Duration::from_secs(2));
        assert_eq!(config.exclusion.cooldown, Duration::from_secs(30));
        assert_eq!(config.services.len(), 2);

        let traefik = &config.services[0];
        assert_eq!(traefik.service.qualified_name(), "olc_traefik");
        assert!(traefik.enabled);
        assert_eq!(traefik.min_replicas, 1);
        assert_eq!(traefik.scale_step, 1);
        let cpu = &traefik.thresholds[&MetricKind::Cpu];
        assert_eq!(cpu.reduction, Reduction::Average);
        assert!((cpu.trigger_percent() - 20.0).abs() < 1e-9);

        let grafana = &config.services[1];
        assert!(!grafana.enabled);
        assert_eq!(grafana.thresholds.len(), 2);
        assert_eq!(grafana.thresholds[&MetricKind::Memory].reduction, Reduction::Max);
        assert_eq!(
            grafana.thresholds[&MetricKind::Cpu].retention(),
            Duration::from_secs(60)
        );

        assert_eq!(config.enabled_services().count(), 1);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE_CONFIG.as_bytes()).unwrap();

        let raw = RawConfig::from_yaml_file(file.path()).unwrap();
        let config = AutoscalerConfig::from_raw(raw).unwrap();
        assert_eq!(config.services.len(), 2);
    }

    #[test]
    fn test_defaults_for_empty_document() {
        let raw = RawConfig::from_yaml_str("services: []").unwrap();
        let config = AutoscalerConfig::from_raw(raw).unwrap();

        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.aggregation_timeout, Duration::from_secs(4));
        assert_eq!(config.exclusion, ExclusionPolicy::default());
        assert!(!config.dry_run);
        assert_eq!(config.api_port, 8080);
    }

    #[test]
    fn test_rejects_short_debounce() {
        let mut threshold = raw_threshold();
        threshold.scale_up_duration = Duration::from_secs(5);

        let err = ServiceConfig::from_raw(&raw_service(threshold)).unwrap_err();
        assert!(matches!(err, ConfigError::DurationTooShort { .. }));
    }

    #[test]
    fn test_rejects_unparsable_debounce() {
        let yaml = r#"
services:
  - name: web
    max_replicas: 2
    thresholds:
      cpu: { percent: 0.5, scale_up_duration: 10s, scale_down_duration: soon }
"#;
        assert!(matches!(
            RawConfig::from_yaml_str(yaml),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_reduction() {
        let mut threshold = raw_threshold();
        threshold.metric = "median".to_string();

        let err = ServiceConfig::from_raw(&raw_service(threshold)).unwrap_err();
        match err {
            ConfigError::UnknownReduction { service, value } => {
                assert_eq!(service, "web");
                assert_eq!(value, "median");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_rejects_out_of_range_percent() {
        let mut threshold = raw_threshold();
        threshold.percent = 1.5;
        assert!(matches!(
            ServiceConfig::from_raw(&raw_service(threshold)).unwrap_err(),
            ConfigError::InvalidPercent { .. }
        ));

        let mut threshold = raw_threshold();
        threshold.percent = 0.0;
        assert!(ServiceConfig::from_raw(&raw_service(threshold)).is_err());
    }

    #[test]
    fn test_rejects_bad_replica_bounds() {
        let mut raw = raw_service(raw_threshold());
        raw.min_replicas = 0;
        assert!(matches!(
            ServiceConfig::from_raw(&raw).unwrap_err(),
            ConfigError::InvalidReplicaBounds { .. }
        ));

        let mut raw = raw_service(raw_threshold());
        raw.min_replicas = 4;
        assert!(ServiceConfig::from_raw(&raw).is_err());
    }

    #[test]
    fn test_rejects_service_without_thresholds() {
        let mut raw = raw_service(raw_threshold());
        raw.thresholds.cpu = None;
        assert!(matches!(
            ServiceConfig::from_raw(&raw).unwrap_err(),
            ConfigError::NoThresholds { .. }
        ));
    }

    #[test]
    fn test_rejects_duplicate_services() {
        let yaml = r#"
services:
  - name: web
    max_replicas: 2
    thresholds:
      cpu: { percent: 0.5, scale_up_duration: 10s, scale_down_duration: 10s }
  - name: web
    max_replicas: 4
    thresholds:
      cpu: { percent: 0.5, scale_up_duration: 10s, scale_down_duration: 10s }
"#;
        let raw = RawConfig::from_yaml_str(yaml).unwrap();
        assert!(matches!(
            AutoscalerConfig::from_raw(raw).unwrap_err(),
            ConfigError::DuplicateService(name) if name == "web"
        ));
    }

    #[test]
    fn test_rejects_zero_interval() {
        let raw = RawConfig::from_yaml_str("interval: 0s").unwrap();
        assert!(matches!(
            AutoscalerConfig::from_raw(raw).unwrap_err(),
            ConfigError::ZeroValue { .. }
        ));
    }

    #[test]
    fn test_sub_second_interval_rejected() {
        let raw = RawConfig::from_yaml_str("interval: 500ms\n").unwrap();
        assert!(matches!(
            AutoscalerConfig::from_raw(raw),
            Err(ConfigError::DurationTooShort { .. })
        ));
    }
}

use std::str::FromStr;
use std::time::Duration;

/// An environment variable that is set but cannot be parsed.
#[derive(Debug, thiserror::Error)]
#[error("Invalid value for {var}: '{value}' ({reason})")]
pub struct ConfigError {
    pub var: String,
    pub value: String,
    pub reason: String,
}

/// Read `var` through `lookup` and parse it, falling back to `default` when
/// unset or blank.
pub fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, var: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        Some(value) if !value.trim().is_empty() => value.trim().parse().map_err(|e: T::Err| ConfigError {
            var: var.to_string(),
            value: value.clone(),
            reason: e.to_string(),
        }),
        _ => Ok(default),
    }
}

/// Runtime settings of the orchestration layer.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Pause between variants of one project, for backend rate limits.
    pub inter_variant_delay: Duration,
    pub generation_timeout: Duration,
    pub detection_timeout: Duration,
    pub correction_timeout: Duration,
    pub scoring_timeout: Duration,
    /// Bound on aligning a project that reaches a run without an alignment.
    pub alignment_timeout: Duration,
    /// A `generating` project whose heartbeat is older than this is
    /// considered abandoned. Renewed every third of the period.
    pub lease_timeout: Duration,
    pub per_variant_cost: f64,
    /// Projects run at the same time.
    pub worker_concurrency: usize,
    pub dispatch_poll_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            inter_variant_delay: Duration::from_millis(2000),
            generation_timeout: Duration::from_secs(300),
            detection_timeout: Duration::from_secs(60),
            correction_timeout: Duration::from_secs(120),
            scoring_timeout: Duration::from_secs(60),
            alignment_timeout: Duration::from_secs(120),
            lease_timeout: Duration::from_secs(120),
            per_variant_cost: 0.05,
            worker_concurrency: 2,
            dispatch_poll_interval: Duration::from_millis(1000),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default |
    /// |-----------------------------|---------|
    /// | `INTER_VARIANT_DELAY_MS`    | `2000`  |
    /// | `GENERATION_TIMEOUT_SECS`   | `300`   |
    /// | `DETECTION_TIMEOUT_SECS`    | `60`    |
    /// | `CORRECTION_TIMEOUT_SECS`   | `120`   |
    /// | `SCORING_TIMEOUT_SECS`      | `60`    |
    /// | `ALIGNMENT_TIMEOUT_SECS`    | `120`   |
    /// | `LEASE_TIMEOUT_SECS`        | `120`   |
    /// | `PER_VARIANT_COST`          | `0.05`  |
    /// | `WORKER_CONCURRENCY`        | `2`     |
    /// | `DISPATCH_POLL_INTERVAL_MS` | `1000`  |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Self::default();
        let millis = |var: &str, default: Duration| {
            parse_var(&lookup, var, default.as_millis() as u64).map(Duration::from_millis)
        };
        let secs = |var: &str, default: Duration| parse_var(&lookup, var, default.as_secs()).map(Duration::from_secs);

        let config = Self {
            inter_variant_delay: millis("INTER_VARIANT_DELAY_MS", d.inter_variant_delay)?,
            generation_timeout: secs("GENERATION_TIMEOUT_SECS", d.generation_timeout)?,
            detection_timeout: secs("DETECTION_TIMEOUT_SECS", d.detection_timeout)?,
            correction_timeout: secs("CORRECTION_TIMEOUT_SECS", d.correction_timeout)?,
            scoring_timeout: secs("SCORING_TIMEOUT_SECS", d.scoring_timeout)?,
            alignment_timeout: secs("ALIGNMENT_TIMEOUT_SECS", d.alignment_timeout)?,
            lease_timeout: secs("LEASE_TIMEOUT_SECS", d.lease_timeout)?,
            per_variant_cost: parse_var(&lookup, "PER_VARIANT_COST", d.per_variant_cost)?,
            worker_concurrency: parse_var(&lookup, "WORKER_CONCURRENCY", d.worker_concurrency)?,
            dispatch_poll_interval: millis("DISPATCH_POLL_INTERVAL_MS", d.dispatch_poll_interval)?,
        };

        if config.worker_concurrency == 0 {
            return Err(ConfigError {
                var: "WORKER_CONCURRENCY".into(),
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        if config.lease_timeout.is_zero() {
            return Err(ConfigError {
                var: "LEASE_TIMEOUT_SECS".into(),
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        if !(config.per_variant_cost.is_finite() && config.per_variant_cost >= 0.0) {
            return Err(ConfigError {
                var: "PER_VARIANT_COST".into(),
                value: config.per_variant_cost.to_string(),
                reason: "must be a non-negative number".into(),
            });
        }
        Ok(config)
    }

    /// How often a running project renews its lease.
    pub fn heartbeat_interval(&self) -> Duration {
        (self.lease_timeout / 3).max(Duration::from_millis(1))
    }
}

use std::path::PathBuf;
use std::time::Duration;

use posecraft_pipeline::config::{parse_var, ConfigError};
use posecraft_pipeline::PipelineConfig;

/// One `method=url` entry of `CORRECTION_ENDPOINTS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrectionEndpoint {
    pub method: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Worker process configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Absent means the in-memory store; nothing survives a restart.
    pub database_url: Option<String>,
    pub comfyui_url: String,
    pub scoring_url: String,
    pub pose_service_url: String,
    /// In tie-break priority order.
    pub correction_endpoints: Vec<CorrectionEndpoint>,
    pub correction_api_key: Option<String>,
    /// JSON effectiveness table; the built-in table when unset.
    pub effectiveness_path: Option<PathBuf>,
    /// Where masks drawn for mask-less projects are written. The
    /// generation backend reads them from here by `file://` URL.
    pub mask_dir: PathBuf,
    pub log_format: LogFormat,
    /// How long in-flight runs get to finish after a shutdown signal.
    pub shutdown_timeout: Duration,
    pub pipeline: PipelineConfig,
}

const DEFAULT_CORRECTION_ENDPOINTS: &str =
    "qwen_image_edit=http://localhost:8102/correct,nano_banana=http://localhost:8103/correct";

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default                          |
    /// |---------------------------------|----------------------------------|
    /// | `DATABASE_URL`                  | unset (in-memory store)          |
    /// | `COMFYUI_URL`                   | `http://localhost:8188`          |
    /// | `SCORING_URL`                   | `http://localhost:8100/score`    |
    /// | `POSE_SERVICE_URL`              | `http://localhost:8101/pose`     |
    /// | `CORRECTION_ENDPOINTS`          | `qwen_image_edit=…,nano_banana=…`|
    /// | `CORRECTION_API_KEY`            | unset                            |
    /// | `CORRECTION_EFFECTIVENESS_PATH` | unset (built-in table)           |
    /// | `MASK_DIR`                      | `masks`                          |
    /// | `LOG_FORMAT`                    | `pretty` (`json` also accepted)  |
    /// | `SHUTDOWN_TIMEOUT_SECS`         | `30`                             |
    ///
    /// Pipeline settings are read by [`PipelineConfig::from_env`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let text = |var: &str, default: &str| optional(&lookup, var).unwrap_or_else(|| default.to_string());

        let endpoints = text("CORRECTION_ENDPOINTS", DEFAULT_CORRECTION_ENDPOINTS);
        let log_format = match optional(&lookup, "LOG_FORMAT").as_deref() {
            None | Some("pretty") | Some("text") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError {
                    var: "LOG_FORMAT".into(),
                    value: other.into(),
                    reason: "expected 'pretty' or 'json'".into(),
                })
            }
        };

        Ok(Self {
            database_url: optional(&lookup, "DATABASE_URL"),
            comfyui_url: text("COMFYUI_URL", "http://localhost:8188"),
            scoring_url: text("SCORING_URL", "http://localhost:8100/score"),
            pose_service_url: text("POSE_SERVICE_URL", "http://localhost:8101/pose"),
            correction_endpoints: parse_endpoints(&endpoints)?,
            correction_api_key: optional(&lookup, "CORRECTION_API_KEY"),
            effectiveness_path: optional(&lookup, "CORRECTION_EFFECTIVENESS_PATH").map(PathBuf::from),
            mask_dir: PathBuf::from(text("MASK_DIR", "masks")),
            log_format,
            shutdown_timeout: Duration::from_secs(parse_var(&lookup, "SHUTDOWN_TIMEOUT_SECS", 30u64)?),
            pipeline: PipelineConfig::from_lookup(&lookup)?,
        })
    }
}

/// Trimmed value, with blank treated as unset.
fn optional(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Option<String> {
    lookup(var)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse `method=url,method=url`, keeping the listed order.
pub fn parse_endpoints(value: &str) -> Result<Vec<CorrectionEndpoint>, ConfigError> {
    let invalid = |reason: &str| ConfigError {
        var: "CORRECTION_ENDPOINTS".into(),
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let mut endpoints: Vec<CorrectionEndpoint> = Vec::new();
    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (method, url) = entry
            .split_once('=')
            .ok_or_else(|| invalid(&format!("entry '{entry}' is not method=url")))?;
        let (method, url) = (method.trim(), url.trim());
        if method.is_empty() || url.is_empty() {
            return Err(invalid(&format!("entry '{entry}' is not method=url")));
        }
        if endpoints.iter().any(|e| e.method == method) {
            return Err(invalid(&format!("method '{method}' listed twice")));
        }
        endpoints.push(CorrectionEndpoint {
            method: method.to_string(),
            url: url.to_string(),
        });
    }

    if endpoints.is_empty() {
        return Err(invalid("at least one correction endpoint is required"));
    }
    Ok(endpoints)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn defaults_use_memory_store_and_builtin_strategies() {
        let config = WorkerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.database_url, None);
        assert_eq!(config.comfyui_url, "http://localhost:8188");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
        assert_eq!(config.mask_dir, PathBuf::from("masks"));
        let methods: Vec<&str> = config.correction_endpoints.iter().map(|e| e.method.as_str()).collect();
        assert_eq!(methods, vec!["qwen_image_edit", "nano_banana"]);
        assert_eq!(config.pipeline, PipelineConfig::default());
    }

    #[test]
    fn blank_values_count_as_unset() {
        let config = WorkerConfig::from_lookup(lookup(&[("DATABASE_URL", "  "), ("CORRECTION_API_KEY", "")])).unwrap();
        assert_eq!(config.database_url, None);
        assert_eq!(config.correction_api_key, None);
    }

    #[test]
    fn overrides_are_read() {
        let config = WorkerConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/posecraft"),
            ("LOG_FORMAT", "json"),
            ("CORRECTION_EFFECTIVENESS_PATH", "/etc/posecraft/effectiveness.json"),
            ("WORKER_CONCURRENCY", "3"),
            ("MASK_DIR", "/var/lib/posecraft/masks"),
            ("LEASE_TIMEOUT_SECS", "45"),
        ]))
        .unwrap();
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/posecraft"));
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.effectiveness_path,
            Some(PathBuf::from("/etc/posecraft/effectiveness.json"))
        );
        assert_eq!(config.pipeline.worker_concurrency, 3);
        assert_eq!(config.mask_dir, PathBuf::from("/var/lib/posecraft/masks"));
        assert_eq!(config.pipeline.lease_timeout, Duration::from_secs(45));
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        let err = WorkerConfig::from_lookup(lookup(&[("LOG_FORMAT", "xml")])).unwrap_err();
        assert_eq!(err.var, "LOG_FORMAT");
    }

    #[test]
    fn pipeline_errors_propagate() {
        let err = WorkerConfig::from_lookup(lookup(&[("GENERATION_TIMEOUT_SECS", "soon")])).unwrap_err();
        assert_eq!(err.var, "GENERATION_TIMEOUT_SECS");
    }

    // -- correction endpoints --

    #[test]
    fn endpoints_keep_order() {
        let endpoints = parse_endpoints(" b = http://b/fix , a=http://a/fix ,").unwrap();
        assert_eq!(
            endpoints,
            vec![
                CorrectionEndpoint { method: "b".into(), url: "http://b/fix".into() },
                CorrectionEndpoint { method: "a".into(), url: "http://a/fix".into() },
            ]
        );
    }

    #[test]
    fn malformed_endpoint_is_rejected() {
        assert_matches!(parse_endpoints("a=http://a,http://b"), Err(e) if e.reason.contains("not method=url"));
        assert_matches!(parse_endpoints("=http://a"), Err(_));
    }

    #[test]
    fn duplicate_endpoint_is_rejected() {
        assert_matches!(parse_endpoints("a=http://a,a=http://b"), Err(e) if e.reason.contains("listed twice"));
    }

    #[test]
    fn empty_endpoint_list_is_rejected() {
        assert_matches!(parse_endpoints(" , "), Err(_));
    }
}

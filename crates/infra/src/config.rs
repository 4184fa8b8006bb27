//! Process configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub use spendlens_observability::LogFormat;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// CORS origins from `ALLOWED_ORIGINS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigins {
    Any,
    List(Vec<String>),
}

impl FromStr for AllowedOrigins {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let origins: Vec<String> = s
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect();
        if origins.is_empty() {
            return Err("no origins listed".to_string());
        }
        if origins.iter().any(|o| o == "*") {
            return Ok(Self::Any);
        }
        Ok(Self::List(origins))
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: AllowedOrigins,
    pub max_batch_size: usize,
    pub dispatch_timeout: Duration,
    pub max_upload_bytes: usize,
    pub artifact_dir: PathBuf,
    pub retrain_max_concurrent: usize,
    pub retrain_estimate: Duration,
    pub job_retention: Duration,
    pub job_retention_max: usize,
    pub job_snapshot_path: Option<PathBuf>,
    /// `None` disables the idle close.
    pub session_idle_timeout: Option<Duration>,
    pub log_format: LogFormat,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            allowed_origins: AllowedOrigins::Any,
            max_batch_size: 100,
            dispatch_timeout: Duration::from_millis(10_000),
            max_upload_bytes: 10 * 1024 * 1024,
            artifact_dir: std::env::temp_dir().join("spendlens-artifacts"),
            retrain_max_concurrent: 4,
            retrain_estimate: Duration::from_secs(2 * 60 * 60),
            job_retention: Duration::from_secs(24 * 60 * 60),
            job_retention_max: 1000,
            job_snapshot_path: None,
            session_idle_timeout: Some(Duration::from_secs(300)),
            log_format: LogFormat::Json,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source; unset variables keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        if let Some(host) = get("HOST") {
            cfg.host = host.trim().to_string();
        }
        if let Some(v) = get("PORT") {
            cfg.port = parse("PORT", &v)?;
        }
        if let Some(v) = get("ALLOWED_ORIGINS") {
            cfg.allowed_origins = parse("ALLOWED_ORIGINS", &v)?;
        }
        if let Some(v) = get("MAX_BATCH_SIZE") {
            cfg.max_batch_size = positive("MAX_BATCH_SIZE", &v)?;
        }
        if let Some(v) = get("DISPATCH_TIMEOUT_MS") {
            cfg.dispatch_timeout = Duration::from_millis(positive("DISPATCH_TIMEOUT_MS", &v)? as u64);
        }
        if let Some(v) = get("MAX_UPLOAD_BYTES") {
            cfg.max_upload_bytes = positive("MAX_UPLOAD_BYTES", &v)?;
        }
        if let Some(v) = get("ARTIFACT_DIR") {
            cfg.artifact_dir = PathBuf::from(v.trim());
        }
        if let Some(v) = get("RETRAIN_MAX_CONCURRENT") {
            cfg.retrain_max_concurrent = positive("RETRAIN_MAX_CONCURRENT", &v)?;
        }
        if let Some(v) = get("RETRAIN_ESTIMATE_SECS") {
            cfg.retrain_estimate = Duration::from_secs(parse("RETRAIN_ESTIMATE_SECS", &v)?);
        }
        if let Some(v) = get("JOB_RETENTION_SECS") {
            cfg.job_retention = Duration::from_secs(parse("JOB_RETENTION_SECS", &v)?);
        }
        if let Some(v) = get("JOB_RETENTION_MAX") {
            cfg.job_retention_max = parse("JOB_RETENTION_MAX", &v)?;
        }
        if let Some(v) = get("JOB_SNAPSHOT_PATH") {
            cfg.job_snapshot_path = Some(PathBuf::from(v.trim()));
        }
        if let Some(v) = get("SESSION_IDLE_TIMEOUT_SECS") {
            let secs: u64 = parse("SESSION_IDLE_TIMEOUT_SECS", &v)?;
            cfg.session_idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(v) = get("LOG_FORMAT") {
            cfg.log_format = parse("LOG_FORMAT", &v)?;
        }

        Ok(cfg)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn positive(var: &'static str, value: &str) -> Result<usize, ConfigError> {
    let n: usize = parse(var, value)?;
    if n == 0 {
        return Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(n)
}

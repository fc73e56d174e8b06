use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::ranking::{AdjustmentSettings, DataSetLimits};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub data: DataConfig,
    pub adjustment: AdjustmentSettings,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let data_dir = env::var("RANK_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data"));
        let reload_secs: u64 = parse_var("RANK_RELOAD_INTERVAL_SECS", 2)?;
        let limits = DataSetLimits {
            max_members: parse_var("RANK_MAX_MEMBERS", 500)?,
            max_metrics: parse_var("RANK_MAX_METRICS", 100)?,
            max_roles: parse_var("RANK_MAX_ROLES", 20)?,
        };

        let defaults = AdjustmentSettings::default();
        let adjustment = AdjustmentSettings {
            max_passes: parse_var("RANK_MAX_PASSES", defaults.max_passes)?,
            tolerance: parse_positive("RANK_TARGET_TOLERANCE", defaults.tolerance)?,
            tier_gap: parse_positive("RANK_TIER_GAP", defaults.tier_gap)?,
            default_percent: parse_positive("RANK_DEFAULT_PERCENT", defaults.default_percent)?,
        };
        if adjustment.max_passes == 0 {
            return Err(ConfigError::InvalidNumber {
                variable: "RANK_MAX_PASSES",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            data: DataConfig {
                data_dir,
                reload_interval: (reload_secs > 0).then(|| Duration::from_secs(reload_secs)),
                limits,
            },
            adjustment,
        })
    }
}

fn parse_var<T: FromStr>(variable: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(variable) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { variable, value: raw }),
        Err(_) => Ok(default),
    }
}

fn parse_positive(variable: &'static str, default: f64) -> Result<f64, ConfigError> {
    let value = parse_var(variable, default)?;
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::InvalidNumber {
            variable,
            value: value.to_string(),
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Location of the CSV tables and how often they are checked for outside edits.
#[derive(Debug, Clone)]
pub struct DataConfig {
    pub data_dir: PathBuf,
    /// `None` disables the background reload poller.
    pub reload_interval: Option<Duration>,
    pub limits: DataSetLimits,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { variable: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { variable, value } => {
                write!(f, "{variable} has an invalid value '{value}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort | ConfigError::InvalidNumber { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        for variable in [
            "APP_ENV",
            "APP_HOST",
            "APP_PORT",
            "APP_LOG_LEVEL",
            "RANK_DATA_DIR",
            "RANK_RELOAD_INTERVAL_SECS",
            "RANK_MAX_PASSES",
            "RANK_TARGET_TOLERANCE",
            "RANK_TIER_GAP",
            "RANK_DEFAULT_PERCENT",
            "RANK_MAX_MEMBERS",
            "RANK_MAX_METRICS",
            "RANK_MAX_ROLES",
        ] {
            env::remove_var(variable);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.data.data_dir, PathBuf::from("data"));
        assert_eq!(config.data.reload_interval, Some(Duration::from_secs(2)));
        assert_eq!(config.data.limits.max_members, 500);
        assert_eq!(config.adjustment.max_passes, 3);
        assert_eq!(config.adjustment.tolerance, 0.005);
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
        reset_env();
    }

    #[test]
    fn zero_reload_interval_disables_polling() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("RANK_RELOAD_INTERVAL_SECS", "0");
        let config = AppConfig::load().expect("config loads");
        assert!(config.data.reload_interval.is_none());
        reset_env();
    }

    #[test]
    fn rejects_non_positive_tolerance() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("RANK_TARGET_TOLERANCE", "-0.1");
        match AppConfig::load() {
            Err(ConfigError::InvalidNumber { variable, .. }) => {
                assert_eq!(variable, "RANK_TARGET_TOLERANCE")
            }
            other => panic!("expected invalid number, got {other:?}"),
        }
        reset_env();
    }
}

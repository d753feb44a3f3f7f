use std::path::PathBuf;
use std::str::FromStr;

use chrono::Duration;

use crate::limits::*;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{key}: cannot parse {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("{key}: {reason}")]
    OutOfRange { key: &'static str, reason: &'static str },
    #[error("both TABULA_TLS_CERT and TABULA_TLS_KEY must be set, or neither")]
    IncompleteTls,
}

/// Booking rules the engine enforces. Passed to `Engine::new`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Applied to reservations and queries without an end time.
    pub default_duration_minutes: i64,
    pub max_party_size: u32,
    pub max_table_capacity: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_duration_minutes: DEFAULT_RESERVATION_MINUTES,
            max_party_size: DEFAULT_MAX_PARTY_SIZE,
            max_table_capacity: DEFAULT_MAX_TABLE_CAPACITY,
        }
    }
}

impl Settings {
    pub fn default_duration(&self) -> Duration {
        Duration::minutes(self.default_duration_minutes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls: Option<TlsPaths>,
    pub settings: Settings,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let max_connections: usize = parse_or(&lookup, "TABULA_MAX_CONNECTIONS", 256)?;
        if max_connections == 0 {
            return Err(ConfigError::OutOfRange {
                key: "TABULA_MAX_CONNECTIONS",
                reason: "must be at least 1",
            });
        }

        let default_duration_minutes: i64 =
            parse_or(&lookup, "TABULA_DEFAULT_DURATION_MIN", DEFAULT_RESERVATION_MINUTES)?;
        if !(1..=MAX_RESERVATION_MINUTES).contains(&default_duration_minutes) {
            return Err(ConfigError::OutOfRange {
                key: "TABULA_DEFAULT_DURATION_MIN",
                reason: "must be between 1 and 1440",
            });
        }
        let max_party_size: u32 = parse_or(&lookup, "TABULA_MAX_PARTY_SIZE", DEFAULT_MAX_PARTY_SIZE)?;
        if max_party_size == 0 {
            return Err(ConfigError::OutOfRange {
                key: "TABULA_MAX_PARTY_SIZE",
                reason: "must be at least 1",
            });
        }
        let max_table_capacity: u32 =
            parse_or(&lookup, "TABULA_MAX_TABLE_CAPACITY", DEFAULT_MAX_TABLE_CAPACITY)?;
        if max_table_capacity == 0 {
            return Err(ConfigError::OutOfRange {
                key: "TABULA_MAX_TABLE_CAPACITY",
                reason: "must be at least 1",
            });
        }

        let tls = match (lookup("TABULA_TLS_CERT"), lookup("TABULA_TLS_KEY")) {
            (None, None) => None,
            (Some(cert), Some(key)) => Some(TlsPaths { cert: cert.into(), key: key.into() }),
            _ => return Err(ConfigError::IncompleteTls),
        };

        let metrics_port = match lookup("TABULA_METRICS_PORT") {
            Some(raw) => Some(parse_value("TABULA_METRICS_PORT", &raw)?),
            None => None,
        };

        Ok(Self {
            bind: lookup("TABULA_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&lookup, "TABULA_PORT", 5433)?,
            data_dir: lookup("TABULA_DATA_DIR").unwrap_or_else(|| "./data".into()).into(),
            password: lookup("TABULA_PASSWORD").unwrap_or_else(|| "tabula".into()),
            max_connections,
            compact_threshold: parse_or(&lookup, "TABULA_COMPACT_THRESHOLD", 1000)?,
            metrics_port,
            tls,
            settings: Settings {
                default_duration_minutes,
                max_party_size,
                max_table_capacity,
            },
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid { key, value: raw.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let env: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.listen_addr(), "0.0.0.0:5433");
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.password, "tabula");
        assert_eq!(config.max_connections, 256);
        assert_eq!(config.compact_threshold, 1000);
        assert_eq!(config.metrics_port, None);
        assert_eq!(config.tls, None);
        assert_eq!(config.settings, Settings::default());
        assert_eq!(config.settings.default_duration(), Duration::hours(2));
    }

    #[test]
    fn overrides() {
        let config = config_from(&[
            ("TABULA_PORT", "6000"),
            ("TABULA_METRICS_PORT", "9090"),
            ("TABULA_DEFAULT_DURATION_MIN", "90"),
            ("TABULA_MAX_PARTY_SIZE", "12"),
            ("TABULA_TLS_CERT", "/tmp/cert.pem"),
            ("TABULA_TLS_KEY", "/tmp/key.pem"),
        ])
        .unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.metrics_port, Some(9090));
        assert_eq!(config.settings.default_duration(), Duration::minutes(90));
        assert_eq!(config.settings.max_party_size, 12);
        assert_eq!(config.tls.unwrap().key, PathBuf::from("/tmp/key.pem"));
    }

    #[test]
    fn unparsable_values_are_errors() {
        assert_eq!(
            config_from(&[("TABULA_PORT", "http")]),
            Err(ConfigError::Invalid { key: "TABULA_PORT", value: "http".into() })
        );
        assert!(config_from(&[("TABULA_MAX_CONNECTIONS", "-1")]).is_err());
        assert!(config_from(&[("TABULA_MAX_CONNECTIONS", "0")]).is_err());
        assert!(config_from(&[("TABULA_DEFAULT_DURATION_MIN", "0")]).is_err());
        assert!(config_from(&[("TABULA_MAX_TABLE_CAPACITY", "0")]).is_err());
    }

    #[test]
    fn tls_needs_both_paths() {
        assert_eq!(
            config_from(&[("TABULA_TLS_CERT", "/tmp/cert.pem")]),
            Err(ConfigError::IncompleteTls)
        );
    }
}

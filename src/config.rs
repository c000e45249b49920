//! Configuration loading (spec.md §6).
//!
//! Grounded in `parse_config.c`: defaults are set before the file is read,
//! so any key the file omits keeps its built-in value. Re-expressed here as
//! a `serde`-deserialized YAML document (`serde_norway`) instead of the
//! original's hand-rolled libyaml key dispatch, with every field `Option`
//! at the wire boundary and defaulted afterward.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::globals::FirstTouchConfig;
use crate::store::postgres::PostgresConfig;
use crate::subscriber::ChannelNames;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_norway::Error,
    },
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    verbose: Option<bool>,
    t1_epsilon: Option<f64>,
    t1_attack_epsilon: Option<f64>,
    t2_epsilon: Option<f64>,
    t2_attack_epsilon: Option<f64>,
    t2_initial_access_multiplier: Option<f64>,
    under_attack_channel: Option<String>,
    t1_threshold_channel: Option<String>,
    t2_threshold_channel: Option<String>,
    redis_url: Option<String>,
    dbname: Option<String>,
    user: Option<String>,
    password: Option<String>,
    db_host: Option<String>,
    db_port: Option<u16>,
    pool_size: Option<usize>,
    whitelist: Option<String>,
    proxylist: Option<String>,
    rest_port: Option<u16>,
}

/// Everything the core needs to start, already defaulted and typed
/// (spec.md §6). `whitelist`/`proxylist` stay as raw strings here; the
/// caller parses them with [`crate::netmap::Netmap`] since a malformed list
/// is fatal at startup, not at config-load time.
#[derive(Debug, Clone)]
pub struct Config {
    pub verbose: bool,
    pub first_touch: FirstTouchConfig,
    pub channels: ChannelNames,
    pub redis_url: String,
    pub postgres: PostgresConfig,
    pub pool_size: usize,
    pub whitelist: String,
    pub proxylist: String,
    pub rest_port: u16,
    /// Always `false`: `under_attack` is not a configuration value (spec.md
    /// §3, §6; `parse_config.c` sets it unconditionally to 0). It is only
    /// ever changed at runtime by the threshold subscriber.
    pub initial_under_attack: bool,
}

pub const DEFAULT_REST_PORT: u16 = 7891;
const DEFAULT_POOL_SIZE: usize = 64;

impl Config {
    /// Loads and defaults the configuration from a YAML file at `path`
    /// (spec.md §6). An env override for verbosity mirrors the original's
    /// `getenv("VERBOSE")` escape hatch.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&text, path)
    }

    fn from_yaml_str(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_norway::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: RawConfig) -> Self {
        let defaults = FirstTouchConfig::default();
        let verbose = raw.verbose.unwrap_or(false) || env_verbose_override();

        Self {
            verbose,
            first_touch: FirstTouchConfig {
                t1_epsilon: raw.t1_epsilon.unwrap_or(defaults.t1_epsilon),
                t1_attack_epsilon: raw.t1_attack_epsilon.unwrap_or(defaults.t1_attack_epsilon),
                t2_epsilon: raw.t2_epsilon.unwrap_or(defaults.t2_epsilon),
                t2_attack_epsilon: raw.t2_attack_epsilon.unwrap_or(defaults.t2_attack_epsilon),
                t2_initial_access_multiplier: raw
                    .t2_initial_access_multiplier
                    .unwrap_or(defaults.t2_initial_access_multiplier),
            },
            channels: ChannelNames {
                under_attack: raw
                    .under_attack_channel
                    .unwrap_or_else(|| "nnbc_under_attack".to_owned()),
                t1_threshold: raw
                    .t1_threshold_channel
                    .unwrap_or_else(|| "nnbc_t1_threshold".to_owned()),
                t2_threshold: raw
                    .t2_threshold_channel
                    .unwrap_or_else(|| "nnbc_t2_threshold".to_owned()),
            },
            redis_url: raw
                .redis_url
                .unwrap_or_else(|| "redis://127.0.0.1:6379".to_owned()),
            postgres: PostgresConfig {
                dbname: raw.dbname.unwrap_or_else(|| "nnbc".to_owned()),
                user: raw.user.unwrap_or_else(|| "nnbc".to_owned()),
                password: raw.password.unwrap_or_default(),
                host: raw.db_host.unwrap_or_else(|| "127.0.0.1".to_owned()),
                port: raw.db_port.unwrap_or(5432),
            },
            pool_size: raw.pool_size.unwrap_or(DEFAULT_POOL_SIZE),
            whitelist: raw.whitelist.unwrap_or_default(),
            proxylist: raw.proxylist.unwrap_or_default(),
            rest_port: raw.rest_port.unwrap_or(DEFAULT_REST_PORT),
            initial_under_attack: false,
        }
    }
}

fn env_verbose_override() -> bool {
    std::env::var("VERBOSE")
        .map(|v| !v.is_empty())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_parse_config() {
        let cfg = Config::from_raw(RawConfig::default());
        assert_eq!(cfg.first_touch.t1_epsilon, 9.9);
        assert_eq!(cfg.first_touch.t1_attack_epsilon, -0.5);
        assert_eq!(cfg.first_touch.t2_epsilon, 4.9);
        assert_eq!(cfg.first_touch.t2_attack_epsilon, 4.9);
        assert_eq!(cfg.first_touch.t2_initial_access_multiplier, 0.1);
        assert!(!cfg.verbose);
        assert!(!cfg.initial_under_attack);
        assert_eq!(cfg.pool_size, DEFAULT_POOL_SIZE);
    }

    #[test]
    fn yaml_overrides_take_precedence_over_defaults() {
        let yaml = "t1_epsilon: 1.5\nverbose: true\ndbname: custom_db\n";
        let cfg = Config::from_yaml_str(yaml, Path::new("<test>")).unwrap();
        assert_eq!(cfg.first_touch.t1_epsilon, 1.5);
        assert!(cfg.verbose);
        assert_eq!(cfg.postgres.dbname, "custom_db");
        // Untouched keys keep their defaults.
        assert_eq!(cfg.first_touch.t2_epsilon, 4.9);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let yaml = "not_a_real_key: 1\n";
        assert!(Config::from_yaml_str(yaml, Path::new("<test>")).is_err());
    }
}

use poise::serenity_prelude::UserId;
use std::collections::HashSet;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("no bot token found, set DISCORD_TOKEN")]
    MissingToken,
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub token: String,
    pub data_path: String,

    // Reconciliation timing
    pub tick_interval: Duration,
    pub failure_budget: Duration,
    pub query_timeout: Duration,
    pub stale_baseline: Duration,

    /// Issuers allowed to run `!shutdown`. Empty disables it for everyone.
    pub owners: HashSet<UserId>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token: String::new(),
            data_path: "data/servers.db".to_string(),
            tick_interval: Duration::from_secs(60),
            failure_budget: Duration::from_secs(3600),
            query_timeout: Duration::from_millis(3000),
            stale_baseline: Duration::from_secs(86400),
            owners: HashSet::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup, `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let token = lookup("DISCORD_TOKEN")
            .or_else(|| lookup("TOKEN"))
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::MissingToken)?;

        Ok(Self {
            token,
            data_path: lookup("DATA_PATH").unwrap_or(defaults.data_path),
            tick_interval: secs(&lookup, "TICK_INTERVAL_SECS")?
                .unwrap_or(defaults.tick_interval),
            failure_budget: secs(&lookup, "FAILURE_BUDGET_SECS")?
                .unwrap_or(defaults.failure_budget),
            query_timeout: parsed::<u64, _>(&lookup, "QUERY_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.query_timeout),
            stale_baseline: secs(&lookup, "STALE_BASELINE_SECS")?
                .unwrap_or(defaults.stale_baseline),
            owners: owners(&lookup)?,
        })
    }
}

fn parsed<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

fn secs<F>(lookup: &F, key: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match parsed::<u64, _>(lookup, key)? {
        Some(0) => Err(ConfigError::Invalid {
            key,
            value: "0".to_string(),
        }),
        other => Ok(other.map(Duration::from_secs)),
    }
}

fn owners<F>(lookup: &F) -> Result<HashSet<UserId>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup("OWNER_IDS") else {
        return Ok(HashSet::new());
    };

    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| match id.parse::<u64>() {
            Ok(n) if n != 0 => Ok(UserId::new(n)),
            _ => Err(ConfigError::Invalid {
                key: "OWNER_IDS",
                value: id.to_string(),
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_token_is_fatal() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert_eq!(err, ConfigError::MissingToken);

        let err = Config::from_lookup(lookup(&[("DISCORD_TOKEN", "  ")])).unwrap_err();
        assert_eq!(err, ConfigError::MissingToken);
    }

    #[test]
    fn defaults_apply_when_only_token_is_set() {
        let config = Config::from_lookup(lookup(&[("TOKEN", "abc")])).unwrap();
        assert_eq!(config.token, "abc");
        assert_eq!(config.tick_interval, Duration::from_secs(60));
        assert_eq!(config.failure_budget, Duration::from_secs(3600));
        assert_eq!(config.query_timeout, Duration::from_secs(3));
        assert!(config.owners.is_empty());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = Config::from_lookup(lookup(&[
            ("DISCORD_TOKEN", "abc"),
            ("TICK_INTERVAL_SECS", "5"),
            ("QUERY_TIMEOUT_MS", "1500"),
            ("OWNER_IDS", "42, 7,"),
        ]))
        .unwrap();
        assert_eq!(config.tick_interval, Duration::from_secs(5));
        assert_eq!(config.query_timeout, Duration::from_millis(1500));
        assert!(config.owners.contains(&UserId::new(42)));
        assert!(config.owners.contains(&UserId::new(7)));
        assert_eq!(config.owners.len(), 2);
    }

    #[test]
    fn garbage_numbers_are_rejected() {
        let err = Config::from_lookup(lookup(&[
            ("DISCORD_TOKEN", "abc"),
            ("TICK_INTERVAL_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "TICK_INTERVAL_SECS", .. }));

        let err = Config::from_lookup(lookup(&[
            ("DISCORD_TOKEN", "abc"),
            ("FAILURE_BUDGET_SECS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "FAILURE_BUDGET_SECS", .. }));
    }
}

use std::env;
use std::time::Duration;

use crate::client::Acl;
use crate::{Error, Result};

pub const DEFAULT_NAMESPACE: &str = "/default";
pub const DEFAULT_ENDPOINTS: &str = "127.0.0.1:2181";
pub const DEFAULT_MAX_FRESHNESS_SECS: u64 = 60;
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1000;

/// Settings consumed when a worker is constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Coordination-service endpoints, `host:port` each.
    pub endpoints: Vec<String>,
    /// Path grouping all members of the pool.
    pub namespace: String,
    /// Heartbeat age at which a member is considered dead.
    pub max_freshness: Duration,
    /// Period between tick starts.
    pub tick_interval: Duration,
    pub acl: Acl,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![DEFAULT_ENDPOINTS.to_string()],
            namespace: DEFAULT_NAMESPACE.to_string(),
            max_freshness: Duration::from_secs(DEFAULT_MAX_FRESHNESS_SECS),
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            acl: Acl::default(),
        }
    }
}

impl WorkerConfig {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    pub fn with_max_freshness(mut self, max_freshness: Duration) -> Self {
        self.max_freshness = max_freshness;
        self
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    pub fn with_acl(mut self, acl: Acl) -> Self {
        self.acl = acl;
        self
    }

    /// Read `HA_ENDPOINTS`, `HA_NAMESPACE`, `HA_MAX_FRESHNESS_SECS` and
    /// `HA_TICK_INTERVAL_MS`, falling back to defaults for unset variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(endpoints) = lookup("HA_ENDPOINTS") {
            config.endpoints = endpoints
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(namespace) = lookup("HA_NAMESPACE") {
            config.namespace = namespace;
        }
        if let Some(secs) = lookup("HA_MAX_FRESHNESS_SECS") {
            config.max_freshness = Duration::from_secs(parse_u64("HA_MAX_FRESHNESS_SECS", &secs)?);
        }
        if let Some(ms) = lookup("HA_TICK_INTERVAL_MS") {
            config.tick_interval = Duration::from_millis(parse_u64("HA_TICK_INTERVAL_MS", &ms)?);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.endpoints.is_empty() {
            errors.push("at least one endpoint is required".to_string());
        }
        if !self.namespace.starts_with('/') || self.namespace.len() < 2 {
            errors.push(format!(
                "namespace must be an absolute path below the root, got {:?}",
                self.namespace
            ));
        } else if self.namespace.ends_with('/') || self.namespace.contains("//") {
            errors.push(format!("namespace is malformed: {:?}", self.namespace));
        }
        if self.max_freshness.is_zero() {
            errors.push("max freshness must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::config(errors.join("; ")))
        }
    }

    pub(crate) fn max_freshness_secs(&self) -> f64 {
        self.max_freshness.as_secs_f64()
    }
}

fn parse_u64(key: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse()
        .map_err(|_| Error::config(format!("{} must be a non-negative integer, got {:?}", key, raw)))
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
    fn test_defaults() {
        let config = WorkerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.namespace, "/default");
        assert_eq!(config.max_freshness, Duration::from_secs(60));
        assert_eq!(config.tick_interval, Duration::from_secs(1));
        assert_eq!(config.endpoints, vec!["127.0.0.1:2181"]);
        assert_eq!(config.acl, Acl::open_unsafe());
    }

    #[test]
    fn test_env_overrides() {
        let config = WorkerConfig::from_lookup(lookup(&[
            ("HA_ENDPOINTS", "zk1:2181, zk2:2181,"),
            ("HA_NAMESPACE", "/demo"),
            ("HA_MAX_FRESHNESS_SECS", "100"),
            ("HA_TICK_INTERVAL_MS", "250"),
        ]))
        .unwrap();

        assert_eq!(config.endpoints, vec!["zk1:2181", "zk2:2181"]);
        assert_eq!(config.namespace, "/demo");
        assert_eq!(config.max_freshness, Duration::from_secs(100));
        assert_eq!(config.tick_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_rejects_bad_numbers() {
        let err = WorkerConfig::from_lookup(lookup(&[("HA_MAX_FRESHNESS_SECS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("HA_MAX_FRESHNESS_SECS"));
    }

    #[test]
    fn test_validate_namespace() {
        for bad in ["", "/", "demo", "/demo/", "/a//b"] {
            assert!(
                WorkerConfig::new(bad).validate().is_err(),
                "{:?} should be rejected",
                bad
            );
        }
        assert!(WorkerConfig::new("/a/b").validate().is_ok());
    }

    #[test]
    fn test_validate_zero_freshness() {
        let config = WorkerConfig::new("/demo").with_max_freshness(Duration::ZERO);
        assert!(config.validate().is_err());
    }
}

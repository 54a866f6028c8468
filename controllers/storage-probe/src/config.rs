//! Controller configuration, read once from the environment at startup.

use crate::error::ControllerError;
use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_NAMESPACE: &str = "default";
const DEFAULT_COLLECTOR_BIND_ADDR: &str = "0.0.0.0:8082";
const DEFAULT_OBSERVER_TICK_MILLIS: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace holding StorageProbes and every generated object
    pub namespace: String,
    /// Image run by probe pods
    pub probe_image: String,
    /// Collector address mount probes report to
    pub collector_url: String,
    /// Address the collector endpoint listens on
    pub collector_bind_addr: SocketAddr,
    /// Interval of the provisioning observer's periodic check
    pub observer_tick: Duration,
}

impl ControllerConfig {
    /// Read configuration from process environment variables
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`, which returns `None` for unset keys
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ControllerError::InvalidConfig(format!("{key} environment variable is required")))
        };

        let namespace = lookup("WATCH_NAMESPACE")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        let probe_image = required("PROBE_IMAGE")?;
        let collector_url = required("COLLECTOR_URL")?;

        let bind = lookup("COLLECTOR_BIND_ADDR").unwrap_or_else(|| DEFAULT_COLLECTOR_BIND_ADDR.to_string());
        let collector_bind_addr = bind
            .parse()
            .map_err(|e| ControllerError::InvalidConfig(format!("COLLECTOR_BIND_ADDR {bind:?}: {e}")))?;

        let observer_tick = match lookup("OBSERVER_TICK_MILLIS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(millis) if millis > 0 => Duration::from_millis(millis),
                _ => {
                    return Err(ControllerError::InvalidConfig(format!(
                        "OBSERVER_TICK_MILLIS must be a positive integer, got {raw:?}"
                    )));
                }
            },
            None => Duration::from_millis(DEFAULT_OBSERVER_TICK_MILLIS),
        };

        Ok(Self {
            namespace,
            probe_image,
            collector_url,
            collector_bind_addr,
            observer_tick,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::from_lookup(lookup(&[
            ("PROBE_IMAGE", "ghcr.io/microscaler/storage-probe:0.1.0"),
            ("COLLECTOR_URL", "http://storage-probe.default.svc:8082"),
        ]))
        .unwrap();
        assert_eq!(config.namespace, "default");
        assert_eq!(config.collector_bind_addr, "0.0.0.0:8082".parse().unwrap());
        assert_eq!(config.observer_tick, Duration::from_secs(1));
    }

    #[test]
    fn test_missing_required_values() {
        let err = ControllerConfig::from_lookup(lookup(&[("COLLECTOR_URL", "http://x")])).unwrap_err();
        assert!(err.to_string().contains("PROBE_IMAGE"));

        let err = ControllerConfig::from_lookup(lookup(&[("PROBE_IMAGE", "img")])).unwrap_err();
        assert!(err.to_string().contains("COLLECTOR_URL"));
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let config = ControllerConfig::from_lookup(lookup(&[
            ("PROBE_IMAGE", "img"),
            ("COLLECTOR_URL", "http://x"),
            ("WATCH_NAMESPACE", "storage"),
            ("COLLECTOR_BIND_ADDR", "127.0.0.1:9000"),
            ("OBSERVER_TICK_MILLIS", "250"),
        ]))
        .unwrap();
        assert_eq!(config.namespace, "storage");
        assert_eq!(config.observer_tick, Duration::from_millis(250));

        let err = ControllerConfig::from_lookup(lookup(&[
            ("PROBE_IMAGE", "img"),
            ("COLLECTOR_URL", "http://x"),
            ("OBSERVER_TICK_MILLIS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));
    }
}

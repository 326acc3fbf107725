//! Configuration module for netpath.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8000)
    pub http_port: u16,
    /// Public base URL advertised in the integration descriptor
    pub base_url: String,
    /// Settings handed to every diagnostic job
    pub job: JobConfig,
}

/// Settings injected into each `DiagnosticJob`.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Display name sent as the webhook `username`
    pub username: String,
    /// Label sent as the webhook `event_name`
    pub event_name: String,
    /// Wall-clock bound on one trace run
    pub probe_timeout: Duration,
    /// Number of probe cycles passed to the trace utility
    pub probe_cycles: u32,
    /// Request timeout for the webhook POST
    pub webhook_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8000,
            base_url: "http://localhost:8000".to_string(),
            job: JobConfig::default(),
        }
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            username: "Network Path Health".to_string(),
            event_name: "Network Diagnostics".to_string(),
            probe_timeout: Duration::from_secs(60),
            probe_cycles: 5,
            webhook_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `NETPATH_HTTP_PORT`: HTTP port (default: 8000)
    /// - `NETPATH_BASE_URL`: public base URL (default: "http://localhost:8000")
    /// - `NETPATH_USERNAME`: webhook display name (default: "Network Path Health")
    /// - `NETPATH_EVENT_NAME`: webhook event label (default: "Network Diagnostics")
    /// - `NETPATH_PROBE_TIMEOUT_SECS`: trace bound in seconds (default: 60)
    /// - `NETPATH_PROBE_CYCLES`: probe cycles per hop (default: 5)
    /// - `NETPATH_WEBHOOK_TIMEOUT_SECS`: webhook timeout in seconds (default: 10)
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(port) = parsed(&lookup, "NETPATH_HTTP_PORT") {
            cfg.http_port = port;
        }

        if let Some(base_url) = lookup("NETPATH_BASE_URL") {
            cfg.base_url = base_url.trim_end_matches('/').to_string();
        }

        if let Some(username) = lookup("NETPATH_USERNAME") {
            cfg.job.username = username;
        }

        if let Some(event_name) = lookup("NETPATH_EVENT_NAME") {
            cfg.job.event_name = event_name;
        }

        if let Some(secs) = parsed::<u64>(&lookup, "NETPATH_PROBE_TIMEOUT_SECS") {
            if secs > 0 {
                cfg.job.probe_timeout = Duration::from_secs(secs);
            }
        }

        if let Some(cycles) = parsed::<u32>(&lookup, "NETPATH_PROBE_CYCLES") {
            if cycles > 0 {
                cfg.job.probe_cycles = cycles;
            }
        }

        if let Some(secs) = parsed::<u64>(&lookup, "NETPATH_WEBHOOK_TIMEOUT_SECS") {
            if secs > 0 {
                cfg.job.webhook_timeout = Duration::from_secs(secs);
            }
        }

        cfg
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid value {:?} for {}, keeping default", raw, key);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.http_port, 8000);
        assert_eq!(cfg.job.username, "Network Path Health");
        assert_eq!(cfg.job.event_name, "Network Diagnostics");
        assert_eq!(cfg.job.probe_timeout, Duration::from_secs(60));
        assert_eq!(cfg.job.probe_cycles, 5);
    }

    #[test]
    fn test_overrides_from_environment() {
        let cfg = ServerConfig::from_lookup(lookup_from(&[
            ("NETPATH_HTTP_PORT", "9100"),
            ("NETPATH_BASE_URL", "https://probe.example.net/"),
            ("NETPATH_PROBE_TIMEOUT_SECS", "15"),
            ("NETPATH_USERNAME", "Path Bot"),
        ]));
        assert_eq!(cfg.http_port, 9100);
        assert_eq!(cfg.base_url, "https://probe.example.net");
        assert_eq!(cfg.job.probe_timeout, Duration::from_secs(15));
        assert_eq!(cfg.job.username, "Path Bot");
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let cfg = ServerConfig::from_lookup(lookup_from(&[
            ("NETPATH_HTTP_PORT", "eighty"),
            ("NETPATH_PROBE_TIMEOUT_SECS", "0"),
            ("NETPATH_PROBE_CYCLES", "-3"),
        ]));
        assert_eq!(cfg.http_port, 8000);
        assert_eq!(cfg.job.probe_timeout, Duration::from_secs(60));
        assert_eq!(cfg.job.probe_cycles, 5);
    }
}

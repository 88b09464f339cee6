//! Client configuration
//!
//! A [`ClientConfig`] is built in code with the `with_*` builders or read
//! from a FastDFS-style `client.conf` file.

use std::path::Path;
use std::time::Duration;

use crate::errors::{FdfsError, Result};
use crate::types::TRACKER_DEFAULT_PORT;

/// Client configuration options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// List of tracker server addresses in format "host:port"
    pub tracker_addrs: Vec<String>,
    /// Maximum number of connections per server pool
    pub max_conns: usize,
    /// Timeout for establishing connections in milliseconds
    pub connect_timeout: u64,
    /// Timeout for each network read or write in milliseconds
    pub network_timeout: u64,
    /// Idle connections older than this are dropped at checkout (ms)
    pub idle_timeout: u64,
    /// How long `get()` may wait for a free slot; `None` waits indefinitely
    pub acquire_timeout: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            tracker_addrs: Vec::new(),
            max_conns: 10,
            connect_timeout: 5000,
            network_timeout: 30000,
            idle_timeout: 60000,
            acquire_timeout: None,
        }
    }
}

impl ClientConfig {
    /// Creates a new client configuration with tracker addresses
    pub fn new(tracker_addrs: Vec<String>) -> Self {
        Self {
            tracker_addrs,
            ..Default::default()
        }
    }

    /// Sets the maximum number of connections per server
    pub fn with_max_conns(mut self, max_conns: usize) -> Self {
        self.max_conns = max_conns;
        self
    }

    /// Sets the connection timeout in milliseconds
    pub fn with_connect_timeout(mut self, timeout: u64) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the network timeout in milliseconds
    pub fn with_network_timeout(mut self, timeout: u64) -> Self {
        self.network_timeout = timeout;
        self
    }

    /// Sets the idle timeout in milliseconds
    pub fn with_idle_timeout(mut self, timeout: u64) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Bounds how long an exhausted pool blocks before failing
    pub fn with_acquire_timeout(mut self, timeout: u64) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    pub(crate) fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout)
    }

    pub(crate) fn network_timeout(&self) -> Duration {
        Duration::from_millis(self.network_timeout)
    }

    pub(crate) fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout)
    }

    pub(crate) fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout.map(Duration::from_millis)
    }

    /// Checks the configuration for values the client cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.tracker_addrs.is_empty() {
            return Err(FdfsError::InvalidConfig(
                "Tracker addresses are required".to_string(),
            ));
        }

        for addr in &self.tracker_addrs {
            validate_addr(addr)?;
        }

        if self.max_conns == 0 {
            return Err(FdfsError::InvalidConfig(
                "max_conns must be positive".to_string(),
            ));
        }

        if self.connect_timeout == 0 || self.network_timeout == 0 || self.idle_timeout == 0 {
            return Err(FdfsError::InvalidConfig(
                "Timeouts must be positive".to_string(),
            ));
        }

        if self.acquire_timeout == Some(0) {
            return Err(FdfsError::InvalidConfig(
                "acquire_timeout must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Reads a `client.conf` file
    pub fn from_conf_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_conf_str(&text)
    }

    /// Parses `client.conf` contents
    ///
    /// Recognised keys: `tracker_server` (repeatable, port defaults to
    /// 22122), `connect_timeout` and `network_timeout` (seconds),
    /// `max_conns`, and `connection_pool_max_idle_time` (seconds). Other
    /// keys are ignored.
    pub fn from_conf_str(text: &str) -> Result<Self> {
        let mut config = ClientConfig::default();

        for (line_no, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| {
                FdfsError::InvalidConfig(format!("line {}: expected key = value", line_no + 1))
            })?;
            let (key, value) = (key.trim(), value.trim());

            match key {
                "tracker_server" => config.tracker_addrs.push(with_default_port(value)),
                "connect_timeout" => config.connect_timeout = parse_secs(key, value)?,
                "network_timeout" => config.network_timeout = parse_secs(key, value)?,
                "connection_pool_max_idle_time" => config.idle_timeout = parse_secs(key, value)?,
                "max_conns" => {
                    config.max_conns = value.parse().map_err(|_| {
                        FdfsError::InvalidConfig(format!("{}: not a number: {}", key, value))
                    })?
                }
                _ => tracing::debug!(key, "ignoring unrecognised config key"),
            }
        }

        Ok(config)
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64> {
    value
        .parse::<u64>()
        .map(|secs| secs.saturating_mul(1000))
        .map_err(|_| FdfsError::InvalidConfig(format!("{}: not a number: {}", key, value)))
}

/// Appends the standard tracker port to a bare host
fn with_default_port(addr: &str) -> String {
    if addr.contains(':') {
        addr.to_string()
    } else {
        format!("{}:{}", addr, TRACKER_DEFAULT_PORT)
    }
}

fn validate_addr(addr: &str) -> Result<()> {
    let invalid = || FdfsError::InvalidConfig(format!("Invalid tracker address: {}", addr));
    let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() || port.parse::<u16>().map_or(true, |p| p == 0) {
        return Err(invalid());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        let config = ClientConfig::new(vec!["127.0.0.1:22122".to_string()]);
        assert!(config.validate().is_ok());

        assert!(ClientConfig::new(vec![]).validate().is_err());
        assert!(ClientConfig::new(vec!["nohost".into()]).validate().is_err());
        assert!(ClientConfig::new(vec![":22122".into()]).validate().is_err());
        assert!(ClientConfig::new(vec!["host:port".into()]).validate().is_err());
        assert!(config.clone().with_max_conns(0).validate().is_err());
        assert!(config.clone().with_network_timeout(0).validate().is_err());
        assert!(config.with_acquire_timeout(0).validate().is_err());
    }

    #[test]
    fn test_from_conf_str() {
        let text = "\
# FastDFS client settings
connect_timeout = 2
network_timeout=60
base_path = /tmp/fastdfs
tracker_server = 10.0.0.1:22122
tracker_server = 10.0.0.2:22122
max_conns = 32
connection_pool_max_idle_time = 3600
";
        let config = ClientConfig::from_conf_str(text).unwrap();
        assert_eq!(
            config.tracker_addrs,
            vec!["10.0.0.1:22122".to_string(), "10.0.0.2:22122".to_string()]
        );
        assert_eq!(config.connect_timeout, 2000);
        assert_eq!(config.network_timeout, 60000);
        assert_eq!(config.max_conns, 32);
        assert_eq!(config.idle_timeout, 3_600_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tracker_server_default_port() {
        let config = ClientConfig::from_conf_str(
            "tracker_server = tracker.local\ntracker_server = 10.0.0.2:22200\n",
        )
        .unwrap();
        assert_eq!(
            config.tracker_addrs,
            vec!["tracker.local:22122".to_string(), "10.0.0.2:22200".to_string()]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_conf_str_rejects_garbage() {
        assert!(ClientConfig::from_conf_str("tracker_server").is_err());
        assert!(ClientConfig::from_conf_str("network_timeout = soon").is_err());
    }

    #[test]
    fn test_from_conf_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.conf");
        std::fs::write(&path, "tracker_server = 127.0.0.1:22122\n").unwrap();

        let config = ClientConfig::from_conf_file(&path).unwrap();
        assert_eq!(config.tracker_addrs, vec!["127.0.0.1:22122".to_string()]);
        assert_eq!(config.max_conns, 10);
    }
}

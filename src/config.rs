//! Configuration for the hub: poll cadence, retry schedule, discovery
//! strategy switches and the machines declared up front.

use crate::{
    discover::{AnyStrategy, BroadcastDiscover, ProbeDiscover},
    profile::MachineCategory,
    retry::BackoffPolicy,
};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::PathBuf, time::Duration};

/// The configuration of the application.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Seconds between telemetry polls per machine.
    pub poll_interval_secs: u64,

    /// Retry schedule for opening flaky transports.
    pub retry: RetryConfig,

    /// Discovery strategy switches.
    pub discovery: DiscoveryConfig,

    /// Machines declared up front, keyed by the id they register under.
    pub machines: HashMap<String, MachineConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            retry: RetryConfig::default(),
            discovery: DiscoveryConfig::default(),
            machines: HashMap::new(),
        }
    }
}

impl Config {
    /// Parse a configuration from a toml file.
    pub fn from_file(file: &PathBuf) -> Result<Self> {
        let config = std::fs::read_to_string(file)?;
        Self::from_str(&config)
    }

    /// Parse a configuration from a toml string.
    pub fn from_str(config: &str) -> Result<Self> {
        Ok(toml::from_str(config)?)
    }

    /// The poll cadence as a [Duration].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Retry schedule for opening flaky transports.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub attempts: u32,

    /// Seconds before the first retry.
    pub initial_delay_secs: u64,

    /// Ceiling on the doubling delay, seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = BackoffPolicy::default();
        Self {
            attempts: policy.attempts,
            initial_delay_secs: policy.initial.as_secs(),
            max_delay_secs: policy.cap.as_secs(),
        }
    }
}

impl RetryConfig {
    /// The schedule these settings describe.
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_secs(self.initial_delay_secs),
            cap: Duration::from_secs(self.max_delay_secs),
            attempts: self.attempts,
        }
    }
}

/// Which discovery strategies run, and how.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Keep scanning on a timer instead of a single pass at startup.
    pub continuous: bool,

    /// Seconds between scans when continuous.
    pub interval_secs: u64,

    /// Serial port enumeration settings.
    pub serial: SerialDiscoveryConfig,

    /// UDP announcement listener settings.
    pub broadcast: BroadcastDiscoveryConfig,

    /// Active HTTP probe settings.
    pub probe: ProbeDiscoveryConfig,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            continuous: true,
            interval_secs: 30,
            serial: SerialDiscoveryConfig::default(),
            broadcast: BroadcastDiscoveryConfig::default(),
            probe: ProbeDiscoveryConfig::default(),
        }
    }
}

impl DiscoveryConfig {
    /// The scan cadence as a [Duration].
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Assemble the enabled strategies.
    pub fn strategies(&self) -> Vec<AnyStrategy> {
        let mut strategies = Vec::new();
        #[cfg(feature = "serial")]
        if self.serial.enabled {
            strategies.push(
                crate::discover::SerialPortDiscover::new(self.serial.include_unrecognized).into(),
            );
        }
        if self.broadcast.enabled {
            strategies.push(
                BroadcastDiscover::new(
                    self.broadcast.port,
                    Duration::from_secs(self.broadcast.window_secs),
                )
                .into(),
            );
        }
        if self.probe.enabled {
            strategies.push(
                ProbeDiscover::new(
                    self.probe.hosts.clone(),
                    self.probe.ports.clone(),
                    Duration::from_millis(self.probe.timeout_ms),
                )
                .into(),
            );
        }
        strategies
    }
}

/// Serial port enumeration settings.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct SerialDiscoveryConfig {
    /// Whether the strategy runs at all.
    pub enabled: bool,

    /// Report ports that match no known signature as generic printers.
    pub include_unrecognized: bool,
}

impl Default for SerialDiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            include_unrecognized: false,
        }
    }
}

/// UDP announcement listener settings.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct BroadcastDiscoveryConfig {
    /// Whether the strategy runs at all.
    pub enabled: bool,

    /// Port announcements arrive on.
    pub port: u16,

    /// Seconds one pass spends listening.
    pub window_secs: u64,
}

impl Default for BroadcastDiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: crate::discover::broadcast::DEFAULT_PORT,
            window_secs: crate::discover::broadcast::DEFAULT_WINDOW.as_secs(),
        }
    }
}

/// Active HTTP probe settings. Off by default: probing address ranges is
/// far too slow for the routine scan loop.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProbeDiscoveryConfig {
    /// Whether the strategy runs at all.
    pub enabled: bool,

    /// Hosts to probe.
    pub hosts: Vec<String>,

    /// Ports to try on every host.
    pub ports: Vec<u16>,

    /// Per-request deadline, milliseconds.
    pub timeout_ms: u64,
}

impl Default for ProbeDiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            hosts: Vec::new(),
            ports: vec![80, 5000],
            timeout_ms: 500,
        }
    }
}

fn default_baud() -> u32 {
    115_200
}

/// One declared machine.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MachineConfig {
    /// A serial-attached controller.
    Serial {
        /// Port path, `/dev/ttyACM0` or `COM3`.
        port: String,

        /// Line speed.
        #[serde(default = "default_baud")]
        baud: u32,

        /// What kind of machine answers on the port.
        category: MachineCategory,
    },

    /// An OctoPrint server.
    OctoPrint {
        /// Base URL, scheme and host, no trailing slash.
        endpoint: String,

        /// The server's API key.
        api_key: String,
    },

    /// A PrusaLink controller.
    PrusaLink {
        /// Base URL, scheme and host, no trailing slash.
        endpoint: String,

        /// API key, for controllers set up with one.
        #[serde(default)]
        api_key: Option<String>,

        /// Username, for controllers using password auth.
        #[serde(default)]
        username: Option<String>,

        /// Password, for controllers using password auth.
        #[serde(default)]
        password: Option<String>,
    },

    /// A connection to nowhere, for demos and tests.
    Noop,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn an_empty_config_is_all_defaults() {
        let config = Config::from_str("").unwrap();
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.retry.attempts, 4);
        assert!(config.discovery.continuous);
        assert_eq!(config.discovery.interval_secs, 30);
        assert_eq!(config.discovery.broadcast.port, 1900);
        assert!(!config.discovery.probe.enabled);
        assert!(config.machines.is_empty());
    }

    #[test]
    fn machines_of_every_flavor_parse() {
        let config = r#"
            poll_interval_secs = 2

            [machines.workhorse]
            type = "serial"
            port = "/dev/ttyACM0"
            category = "fdm_printer"

            [machines.voron]
            type = "octo_print"
            endpoint = "http://10.0.0.42:5000"
            api_key = "ABCDEF0123456789"

            [machines.mk4]
            type = "prusa_link"
            endpoint = "http://10.0.0.17"
            username = "maker"
            password = "hunter2"

            [machines.bench]
            type = "noop"
        "#;
        let config = Config::from_str(config).unwrap();
        assert_eq!(config.poll_interval_secs, 2);
        assert_eq!(config.machines.len(), 4);

        match &config.machines["workhorse"] {
            MachineConfig::Serial { port, baud, category } => {
                assert_eq!(port, "/dev/ttyACM0");
                assert_eq!(*baud, 115_200);
                assert_eq!(*category, MachineCategory::FdmPrinter);
            }
            other => panic!("wrong flavor: {other:?}"),
        }
        match &config.machines["mk4"] {
            MachineConfig::PrusaLink {
                api_key, username, ..
            } => {
                assert_eq!(*api_key, None);
                assert_eq!(username.as_deref(), Some("maker"));
            }
            other => panic!("wrong flavor: {other:?}"),
        }
    }

    #[test]
    fn the_retry_section_builds_a_schedule() {
        let config = Config::from_str(
            r#"
            [retry]
            attempts = 6
            initial_delay_secs = 2
            max_delay_secs = 30
        "#,
        )
        .unwrap();
        let backoff = config.retry.backoff();
        assert_eq!(backoff.attempts, 6);
        assert_eq!(backoff.initial, Duration::from_secs(2));
        assert_eq!(backoff.delay_for(10), Duration::from_secs(30));
    }

    #[test]
    fn probe_strategy_only_assembles_when_enabled() {
        let config = Config::from_str("").unwrap();
        let names: Vec<_> = config
            .discovery
            .strategies()
            .iter()
            .map(|strategy| strategy.name())
            .collect();
        assert!(!names.contains(&"probe"));

        let config = Config::from_str(
            r#"
            [discovery.probe]
            enabled = true
            hosts = ["10.0.0.42"]
        "#,
        )
        .unwrap();
        let names: Vec<_> = config
            .discovery
            .strategies()
            .iter()
            .map(|strategy| strategy.name())
            .collect();
        assert!(names.contains(&"probe"));
    }
}

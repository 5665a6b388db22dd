//! Daemon configuration.
//!
//! Loaded from a YAML file found either at the path given on the command
//! line or at the first existing entry of the fixed search path:
//! `./configs/config.yaml`, `/etc/safepanel/config.yaml`,
//! `/usr/local/etc/safepanel/config.yaml`. Every section has serde defaults
//! so a partial file is enough to bring the daemon up.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Locations probed when no explicit `--config` path is given.
const SEARCH_PATHS: &[&str] = &[
    "configs/config.yaml",
    "/etc/safepanel/config.yaml",
    "/usr/local/etc/safepanel/config.yaml",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no config file found (searched {0})")]
    NotFound(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path:   PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path:   PathBuf,
        source: serde_yaml::Error,
    },
}

// ── Config tree ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub analyzer:  AnalyzerConfig,
    pub blocker:   BlockerConfig,
    pub checker:   CheckerConfig,
    pub profiling: ProfilingConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub ip:  IpAnalyzerConfig,
    pub dns: DnsAnalyzerConfig,
}

/// Raw-capture settings for the configured interface.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IpAnalyzerConfig {
    pub enabled:     bool,
    pub interface:   String,
    /// Capture buffer size in bytes; 0 keeps the pcap default.
    pub buffer_size: i32,
    pub promiscuous: bool,
}

impl Default for IpAnalyzerConfig {
    fn default() -> Self {
        Self {
            enabled:     true,
            interface:   String::new(),
            buffer_size: 0,
            promiscuous: true,
        }
    }
}

/// DNS decoding settings. `port` is the UDP port treated as DNS traffic.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DnsAnalyzerConfig {
    pub enabled: bool,
    pub port:    u16,
}

impl Default for DnsAnalyzerConfig {
    fn default() -> Self {
        Self { enabled: true, port: 53 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BlockerConfig {
    pub ip: IpBlockerConfig,
}

/// Reactive blocking settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IpBlockerConfig {
    pub enabled:          bool,
    /// Block lifetime in seconds applied to reputation-triggered blocks.
    /// 0 means permanent.
    pub default_duration: u64,
    /// Addresses that must never be blocked.
    pub whitelist:        Vec<String>,
    pub iptables:         bool,
    pub nftables:         bool,
}

impl Default for IpBlockerConfig {
    fn default() -> Self {
        Self {
            enabled:          false,
            default_duration: 3600,
            whitelist:        Vec::new(),
            iptables:         true,
            nftables:         false,
        }
    }
}

/// Paths to the reputation and geolocation databases. Both are required
/// when the reputation pipeline is enabled; empty strings disable it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CheckerConfig {
    pub ipdb_path: String,
    pub mmdb_path: String,
}

/// Recognised for compatibility with the original config tree. There is no
/// in-process profiler to attach here, so the keys are only acknowledged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProfilingConfig {
    pub enabled: bool,
    pub port:    u16,
}

// ── Loading ──────────────────────────────────────────────────────────────────

impl Config {
    /// Loads the configuration from `explicit` when given, otherwise from
    /// the first existing file on the search path.
    ///
    /// # Errors
    /// [`ConfigError::NotFound`] when no candidate file exists,
    /// [`ConfigError::Io`] / [`ConfigError::Parse`] when the file cannot be
    /// read or is malformed. All of these are fatal to the daemon.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => SEARCH_PATHS
                .iter()
                .map(PathBuf::from)
                .find(|p| p.exists())
                .ok_or_else(|| ConfigError::NotFound(SEARCH_PATHS.join(", ")))?,
        };

        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;

        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn loads_full_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut f = fs::File::create(&path).unwrap();
        writeln!(
            f,
            "analyzer:\n  network:\n    ip:\n      enabled: true\n      interface: eth0\n      buffer_size: 65536\n      promiscuous: true\n    dns:\n      enabled: true\n      port: 53\nblocker:\n  ip:\n    enabled: true\n    default_duration: 7200\n    whitelist: [\"10.0.0.1\"]\n    iptables: true\n    nftables: true\nchecker:\n  ipdb_path: /var/lib/safepanel/ip.db\n  mmdb_path: /var/lib/safepanel/country.mmdb\nprofiling:\n  enabled: false\n  port: 6060"
        )
        .unwrap();

        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.analyzer.network.ip.interface, "eth0");
        assert_eq!(cfg.analyzer.network.ip.buffer_size, 65536);
        assert_eq!(cfg.analyzer.network.dns.port, 53);
        assert_eq!(cfg.blocker.ip.default_duration, 7200);
        assert_eq!(cfg.blocker.ip.whitelist, vec!["10.0.0.1".to_string()]);
        assert!(cfg.blocker.ip.nftables);
        assert_eq!(cfg.checker.ipdb_path, "/var/lib/safepanel/ip.db");
    }

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "analyzer:\n  network:\n    ip:\n      interface: wlan0\n").unwrap();

        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.analyzer.network.ip.interface, "wlan0");
        assert!(cfg.analyzer.network.ip.enabled);
        assert_eq!(cfg.analyzer.network.dns.port, 53);
        assert_eq!(cfg.blocker.ip.default_duration, 3600);
        assert!(!cfg.blocker.ip.enabled);
        assert!(cfg.checker.ipdb_path.is_empty());
    }

    #[test]
    fn missing_explicit_path_is_an_io_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope.yaml");
        match Config::load(Some(&path)) {
            Err(ConfigError::Io { .. }) => {}
            other => panic!("expected Io error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "analyzer: [not, a, mapping").unwrap();
        assert!(matches!(
            Config::load(Some(&path)),
            Err(ConfigError::Parse { .. })
        ));
    }
}

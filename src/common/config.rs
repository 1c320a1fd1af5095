//! Configuration file handling

use serde::Deserialize;

use super::paths::config_path;
use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Breakpoint registry settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Attach handshake settings
    #[serde(default)]
    pub attach: AttachConfig,

    /// Coordinator daemon settings
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
}

/// Breakpoint registry settings
#[derive(Debug, Deserialize)]
pub struct RegistryConfig {
    /// Fixed number of entries the Shared table can hold
    #[serde(default = "default_shared_capacity")]
    pub shared_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            shared_capacity: default_shared_capacity(),
        }
    }
}

fn default_shared_capacity() -> usize {
    20
}

/// Attach handshake settings
#[derive(Debug, Clone, Deserialize)]
pub struct AttachConfig {
    /// Host where proxies waiting on a global breakpoint listen
    #[serde(default = "default_proxy_host")]
    pub proxy_host: String,

    /// Backlog for the listening socket of a local breakpoint
    #[serde(default = "default_listen_backlog")]
    pub listen_backlog: u32,
}

impl Default for AttachConfig {
    fn default() -> Self {
        Self {
            proxy_host: default_proxy_host(),
            listen_backlog: default_listen_backlog(),
        }
    }
}

fn default_proxy_host() -> String {
    "127.0.0.1".to_string()
}

fn default_listen_backlog() -> u32 {
    2
}

/// Coordinator daemon settings
#[derive(Debug, Deserialize)]
pub struct CoordinatorConfig {
    /// Seconds between liveness sweeps of registered processes
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Auto-exit after this many idle minutes with nothing registered (0 = never)
    #[serde(default)]
    pub idle_timeout_minutes: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            idle_timeout_minutes: 0,
        }
    }
}

fn default_sweep_interval() -> u64 {
    5
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                let content = std::fs::read_to_string(&path).map_err(|e| Error::FileRead {
                    path: path.display().to_string(),
                    error: e.to_string(),
                })?;
                return Self::parse(&content);
            }
        }
        Ok(Self::default())
    }

    /// Parse and validate configuration text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.registry.shared_capacity == 0 {
            return Err(Error::Config(
                "registry.shared_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.registry.shared_capacity, 20);
        assert_eq!(config.attach.proxy_host, "127.0.0.1");
        assert_eq!(config.attach.listen_backlog, 2);
        assert_eq!(config.coordinator.sweep_interval_secs, 5);
        assert_eq!(config.coordinator.idle_timeout_minutes, 0);
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::parse(
            r#"
            [registry]
            shared_capacity = 128

            [coordinator]
            idle_timeout_minutes = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.registry.shared_capacity, 128);
        assert_eq!(config.coordinator.idle_timeout_minutes, 30);
        assert_eq!(config.coordinator.sweep_interval_secs, 5);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = Config::parse("[registry]\nshared_capacity = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_malformed_file_rejected() {
        let err = Config::parse("[registry\n").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }
}

//! Configuration file support for sfl.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (SFL_*)
//! 3. Local config file (./sfl.toml)
//! 4. Global config file (e.g. ~/.config/sfl/config.toml)
//!
//! `--config PATH` replaces both files.

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sfl::Region;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the local configuration file.
pub const LOCAL_CONFIG: &str = "sfl.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Uploader configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Seconds to wait for the target's request per connection attempt.
    pub handshake_timeout_secs: Option<u64>,
    /// Milliseconds to wait for each frame acknowledge.
    pub ack_timeout_ms: Option<u64>,
    /// Resends of a frame after a CRC error or a missing acknowledge.
    pub max_retries: Option<u8>,
}

/// Simulated target configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServeConfig {
    /// Handshake deadline in polls.
    pub handshake_polls: Option<u32>,
    /// Consecutive failures before the session gives up.
    pub max_failures: Option<u8>,
    /// Empty polls allowed per byte of a frame before giving up.
    pub frame_deadline: Option<u32>,
    /// Writable regions as `start:size` strings.
    #[serde(default)]
    pub regions: Vec<String>,
}

impl ServeConfig {
    /// Parse the configured regions.
    pub fn parsed_regions(&self) -> anyhow::Result<Vec<Region>> {
        self.regions
            .iter()
            .map(|r| {
                r.parse::<Region>()
                    .map_err(|e| anyhow::anyhow!("serve.regions: {e}"))
            })
            .collect()
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection configuration.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Uploader configuration.
    #[serde(default)]
    pub upload: UploadConfig,
    /// Simulated target configuration.
    #[serde(default)]
    pub serve: ServeConfig,
}

impl Config {
    /// Load configuration from the global and local files.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "sfl").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one; set values in `other` win.
    fn merge(&mut self, other: Self) {
        let Self {
            connection,
            upload,
            serve,
        } = other;

        if connection.port.is_some() {
            self.connection.port = connection.port;
        }
        if connection.baud.is_some() {
            self.connection.baud = connection.baud;
        }

        if upload.handshake_timeout_secs.is_some() {
            self.upload.handshake_timeout_secs = upload.handshake_timeout_secs;
        }
        if upload.ack_timeout_ms.is_some() {
            self.upload.ack_timeout_ms = upload.ack_timeout_ms;
        }
        if upload.max_retries.is_some() {
            self.upload.max_retries = upload.max_retries;
        }

        if serve.handshake_polls.is_some() {
            self.serve.handshake_polls = serve.handshake_polls;
        }
        if serve.max_failures.is_some() {
            self.serve.max_failures = serve.max_failures;
        }
        if serve.frame_deadline.is_some() {
            self.serve.frame_deadline = serve.frame_deadline;
        }
        if !serve.regions.is_empty() {
            self.serve.regions = serve.regions;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.connection.port.is_none());
        assert!(config.connection.baud.is_none());
        assert!(config.upload.max_retries.is_none());
        assert!(config.serve.regions.is_empty());
    }

    #[test]
    fn test_config_merge_overrides_set_values() {
        let mut base = Config::default();
        base.connection.baud = Some(115_200);
        base.upload.max_retries = Some(1);

        let mut other = Config::default();
        other.connection.port = Some("/dev/ttyUSB0".to_string());
        other.connection.baud = Some(921_600);

        base.merge(other);

        assert_eq!(base.connection.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(base.connection.baud, Some(921_600));
        assert_eq!(base.upload.max_retries, Some(1));
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut base = Config::default();
        base.connection.port = Some("/dev/ttyUSB0".to_string());
        base.serve.regions = vec!["0x0:0x1000".to_string()];
        base.serve.frame_deadline = Some(500);

        base.merge(Config::default());

        assert_eq!(base.connection.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(base.serve.regions.len(), 1);
        assert_eq!(base.serve.frame_deadline, Some(500));
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[connection]
port = "/dev/ttyUSB0"
baud = 115200

[upload]
handshake_timeout_secs = 10
max_retries = 2

[serve]
handshake_polls = 1000
max_failures = 3
frame_deadline = 2000
regions = ["0x40000000:0x4000000"]
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.connection.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.connection.baud, Some(115_200));
        assert_eq!(config.upload.handshake_timeout_secs, Some(10));
        assert_eq!(config.upload.max_retries, Some(2));
        assert!(config.upload.ack_timeout_ms.is_none());
        assert_eq!(config.serve.handshake_polls, Some(1000));
        assert_eq!(config.serve.max_failures, Some(3));
        assert_eq!(config.serve.frame_deadline, Some(2000));
        assert_eq!(
            config.serve.parsed_regions().unwrap(),
            vec![Region::new(0x4000_0000, 0x0400_0000)]
        );
    }

    #[test]
    fn test_config_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.connection.port.is_none());
        assert!(config.serve.regions.is_empty());
    }

    #[test]
    fn test_bad_region_is_reported() {
        let config: Config = toml::from_str("[serve]\nregions = [\"nonsense\"]").unwrap();
        let err = config.serve.parsed_regions().unwrap_err();
        assert!(err.to_string().contains("serve.regions"));
    }

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sfl.toml");
        fs::write(&path, "[connection]\nport = \"/dev/ttyUSB1\"\n").unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.connection.port.as_deref(), Some("/dev/ttyUSB1"));
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        assert!(config.connection.port.is_none());
    }

    #[test]
    fn test_global_config_path_shape() {
        if let Some(p) = Config::global_config_path() {
            assert!(p.to_str().unwrap().contains("sfl"));
            assert!(p.to_str().unwrap().ends_with("config.toml"));
        }
    }
}

//! Shim configuration management

use crate::parport::DEFAULT_PATH_PREFIX;
use crate::session::SessionOptions;
use anyhow::{Context, Result, anyhow};
use protocol::WordSize;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming a configuration file
pub const CONFIG_ENV: &str = "WDSHIM_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ShimConfig {
    #[serde(default)]
    pub shim: ShimSettings,
    #[serde(default)]
    pub parport: ParportSettings,
    #[serde(default)]
    pub usb: UsbSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShimSettings {
    #[serde(default = "ShimSettings::default_log_level")]
    pub log_level: String,
    /// Device node whose control requests are emulated
    #[serde(default = "ShimSettings::default_device_node")]
    pub device_node: PathBuf,
    /// Node opened in its place so the client gets a real descriptor
    #[serde(default = "ShimSettings::default_backing_node")]
    pub backing_node: PathBuf,
    /// Forward envelopes with unknown opcodes to the real driver instead of
    /// answering them with success
    #[serde(default)]
    pub forward_unsupported: bool,
    /// Client word width in bytes (4 or 8); the build target's when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word_size: Option<WordSize>,
}

impl Default for ShimSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            device_node: Self::default_device_node(),
            backing_node: Self::default_backing_node(),
            forward_unsupported: false,
            word_size: None,
        }
    }
}

impl ShimSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }

    fn default_device_node() -> PathBuf {
        PathBuf::from("/dev/windrvr6")
    }

    fn default_backing_node() -> PathBuf {
        PathBuf::from("/dev/null")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParportSettings {
    /// Prefix of the ppdev nodes; the port number is appended
    #[serde(default = "ParportSettings::default_path_prefix")]
    pub path_prefix: String,
    /// Report the identification lines of a PC III cable on status reads
    #[serde(default)]
    pub force_pc3_ident: bool,
    /// Number of ports advertised through the virtual procfs entries
    #[serde(default = "ParportSettings::default_virtual_port_count")]
    pub virtual_port_count: u32,
}

impl Default for ParportSettings {
    fn default() -> Self {
        Self {
            path_prefix: Self::default_path_prefix(),
            force_pc3_ident: false,
            virtual_port_count: Self::default_virtual_port_count(),
        }
    }
}

impl ParportSettings {
    /// Upper bound on advertised ports
    pub const MAX_VIRTUAL_PORTS: u32 = 64;

    fn default_path_prefix() -> String {
        DEFAULT_PATH_PREFIX.to_string()
    }

    fn default_virtual_port_count() -> u32 {
        4
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsbSettings {
    /// Enumerate buses on the first open of the device node
    #[serde(default = "UsbSettings::default_enumerate_on_open")]
    pub enumerate_on_open: bool,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            enumerate_on_open: Self::default_enumerate_on_open(),
        }
    }
}

impl UsbSettings {
    fn default_enumerate_on_open() -> bool {
        true
    }
}

impl ShimConfig {
    /// Load configuration from the specified path, or the first file found
    /// in the standard locations
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => expand(&p),
            None => Self::candidates()
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?,
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: ShimConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.expand_paths();
        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Per-user configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("wdshim").join("shim.toml")
        } else {
            PathBuf::from(".config/wdshim/shim.toml")
        }
    }

    /// Locations searched when no path is given, in order
    pub fn candidates() -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if let Ok(env_path) = std::env::var(CONFIG_ENV)
            && !env_path.is_empty()
        {
            candidates.push(expand(Path::new(&env_path)));
        }
        candidates.push(Self::default_path());
        candidates.push(PathBuf::from("/etc/wdshim/shim.toml"));
        candidates
    }

    pub fn word_size(&self) -> WordSize {
        self.shim.word_size.unwrap_or(WordSize::NATIVE)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            word: self.word_size(),
            path_prefix: self.parport.path_prefix.clone(),
            force_pc3_ident: self.parport.force_pc3_ident,
        }
    }

    fn expand_paths(&mut self) {
        self.shim.device_node = expand(&self.shim.device_node);
        self.shim.backing_node = expand(&self.shim.backing_node);
        self.parport.path_prefix = shellexpand::tilde(&self.parport.path_prefix).into_owned();
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.shim.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.shim.log_level,
                valid_levels.join(", ")
            ));
        }

        if !self.shim.device_node.is_absolute() {
            return Err(anyhow!(
                "Invalid device_node '{}', must be an absolute path",
                self.shim.device_node.display()
            ));
        }
        if self.shim.backing_node.as_os_str().is_empty() {
            return Err(anyhow!("backing_node must not be empty"));
        }
        if self.shim.backing_node == self.shim.device_node {
            return Err(anyhow!("backing_node must differ from device_node"));
        }

        if self.parport.path_prefix.is_empty() {
            return Err(anyhow!("parport path_prefix must not be empty"));
        }
        if self.parport.virtual_port_count > ParportSettings::MAX_VIRTUAL_PORTS {
            return Err(anyhow!(
                "Invalid virtual_port_count {}, at most {} ports can be advertised",
                self.parport.virtual_port_count,
                ParportSettings::MAX_VIRTUAL_PORTS
            ));
        }

        Ok(())
    }
}

fn expand(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}

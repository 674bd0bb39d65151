//! Configuration management for ecstools.
//!
//! This module loads the TOML configuration file at `~/.ecstools/config.toml`.
//! Every value has a default, and command-line flags override whatever the
//! file says.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::markup::Delimiters;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// AWS-specific configuration options
    #[serde(default)]
    pub aws: AwsConfig,

    /// Which cluster to query and how to show it
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Chat bot configuration
    #[serde(default)]
    pub bot: BotConfig,

    /// Refreshing dashboard configuration
    #[serde(default)]
    pub dashboard: DashboardConfig,

    /// Text output configuration
    #[serde(default)]
    pub output: OutputConfig,
}

/// AWS SDK configuration options.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AwsConfig {
    /// AWS region (e.g., "us-east-1")
    /// If not specified, will use AWS SDK's default resolution (env vars, profile, etc.)
    pub region: Option<String>,

    /// AWS profile name to use from ~/.aws/credentials
    pub profile: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Cluster queried when none is given
    #[serde(default = "default_cluster")]
    pub name: String,

    /// Show only the resource part of task definition ARNs
    #[serde(default = "default_true")]
    pub short_arns: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// keybase executable
    #[serde(default = "default_keybase")]
    pub keybase: String,

    /// Alternate keybase home directory
    pub home: Option<PathBuf>,

    /// Team whose conversations the commands are advertised to
    pub team_name: Option<String>,

    /// Seconds between polls for unread messages
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    /// Subscribe to live messages instead of polling
    #[serde(default)]
    pub listen: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    /// Seconds between refreshes
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OutputConfig {
    /// Style markup delimiters used by colorized output
    #[serde(default)]
    pub delimiters: Delimiters,
}

// Default value functions for serde
fn default_cluster() -> String {
    "default".to_string()
}

fn default_true() -> bool {
    true
}

fn default_keybase() -> String {
    "keybase".to_string()
}

fn default_poll_interval() -> u64 {
    2
}

fn default_refresh_interval() -> u64 {
    20
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: default_cluster(),
            short_arns: default_true(),
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            keybase: default_keybase(),
            home: None,
            team_name: None,
            poll_interval: default_poll_interval(),
            listen: false,
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            refresh_interval: default_refresh_interval(),
        }
    }
}

const DEFAULT_CONFIG_TOML: &str = r#"# ecstools configuration file
# This file is automatically generated with default values.

[aws]
# AWS region to use (optional)
# If not specified, uses AWS SDK's default resolution (env vars, ~/.aws/config, etc.)
# region = "us-east-1"

# AWS profile to use from ~/.aws/credentials (optional)
# profile = "default"

[cluster]
# Cluster queried when none is given on the command line or in a chat command
name = "default"

# Display only the last part of task definition ARNs
short_arns = true

[bot]
# keybase executable used for the chat API
keybase = "keybase"

# Alternate keybase home directory (optional)
# home = "/var/lib/ecsbot"

# Advertise commands to this team's conversations only (optional)
# team_name = "ops"

# Seconds between polls for unread messages
poll_interval = 2

# Subscribe to live messages instead of polling
listen = false

[dashboard]
# Seconds between dashboard refreshes
refresh_interval = 20

[output.delimiters]
# Delimiters of the style markup used for colorized headers
left = "<"
right = ">"
"#;

impl Config {
    /// Returns the path to the configuration directory (~/.ecstools/)
    pub fn config_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir().context("Failed to determine home directory")?;
        Ok(home_dir.join(".ecstools"))
    }

    /// Returns the path to the configuration file (~/.ecstools/config.toml)
    pub fn config_file_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Loads the default configuration file, creating it if it doesn't exist.
    ///
    /// # Errors
    /// This function will return an error if:
    /// - Home directory cannot be determined
    /// - File I/O operations fail
    /// - TOML parsing fails
    pub fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Self::create_default_config()?;
            Ok(Config::default())
        }
    }

    /// Loads configuration from an explicit path. The file must exist.
    ///
    /// # Errors
    /// Fails if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path:?}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path:?}"))
    }

    fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Writes the commented default configuration file.
    ///
    /// # Errors
    /// Fails if the directory or file cannot be written.
    pub fn create_default_config() -> Result<()> {
        let config_dir = Self::config_dir()?;
        let config_path = Self::config_file_path()?;

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {config_dir:?}"))?;
        }

        fs::write(&config_path, DEFAULT_CONFIG_TOML)
            .with_context(|| format!("Failed to write config file: {config_path:?}"))?;

        Ok(())
    }
}

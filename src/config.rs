//! Configuration module for the token sequencer
//!
//! This module handles configuration loading from TOML files and
//! environment variables, and provides structured configuration types.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey};
use std::str::FromStr;
use std::time::Duration;

use crate::structured_logging::DEFAULT_LOG_CAPACITY;
use crate::types::{ProgramIds, DEFAULT_LAUNCHPAD_PROGRAM_ID};

/// Environment variable overriding `rpc.url`
pub const ENV_RPC_URL: &str = "TOKEN_SEQUENCER_RPC_URL";
/// Environment variable overriding `wallet.keypair_path`
pub const ENV_KEYPAIR_PATH: &str = "TOKEN_SEQUENCER_KEYPAIR";

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rpc: RpcConfig,

    #[serde(default)]
    pub confirmation: ConfirmationConfig,

    #[serde(default)]
    pub wallet: WalletConfig,

    #[serde(default)]
    pub programs: ProgramsConfig,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_url")]
    pub url: String,

    /// processed, confirmed or finalized
    #[serde(default = "default_commitment")]
    pub commitment: String,

    /// Request timeout in seconds
    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Status polls before a submitted transaction counts as timed out
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Path to keypair file
    #[serde(default = "default_keypair_path")]
    pub keypair_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramsConfig {
    #[serde(default = "default_launchpad")]
    pub launchpad_program_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Entries kept in the activity log
    #[serde(default = "default_log_capacity")]
    pub capacity: usize,

    /// Emit tracing output as JSON lines
    #[serde(default)]
    pub json: bool,
}

// Default value functions
fn default_rpc_url() -> String { "https://api.devnet.solana.com".to_string() }
fn default_commitment() -> String { "confirmed".to_string() }
fn default_rpc_timeout() -> u64 { 30 }
fn default_poll_interval() -> u64 { 500 }
fn default_max_attempts() -> u32 { 60 }
fn default_keypair_path() -> String { "~/.config/solana/id.json".to_string() }
fn default_launchpad() -> String { DEFAULT_LAUNCHPAD_PROGRAM_ID.to_string() }
fn default_log_capacity() -> usize { DEFAULT_LOG_CAPACITY }

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: default_rpc_url(),
            commitment: default_commitment(),
            timeout_secs: default_rpc_timeout(),
        }
    }
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            keypair_path: default_keypair_path(),
        }
    }
}

impl Default for ProgramsConfig {
    fn default() -> Self {
        Self {
            launchpad_program_id: default_launchpad(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            capacity: default_log_capacity(),
            json: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc: RpcConfig::default(),
            confirmation: ConfirmationConfig::default(),
            wallet: WalletConfig::default(),
            programs: ProgramsConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: &str) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `TOKEN_SEQUENCER_*` variables
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(ENV_RPC_URL) {
            self.rpc.url = url;
        }
        if let Ok(path) = std::env::var(ENV_KEYPAIR_PATH) {
            self.wallet.keypair_path = path;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.rpc.url.trim().is_empty() {
            anyhow::bail!("rpc.url must not be empty");
        }
        if self.rpc.timeout_secs == 0 {
            anyhow::bail!("rpc.timeout_secs must be greater than zero");
        }
        if self.confirmation.max_attempts == 0 {
            anyhow::bail!("confirmation.max_attempts must be greater than zero");
        }
        if self.log.capacity == 0 {
            anyhow::bail!("log.capacity must be greater than zero");
        }
        self.commitment()?;
        self.program_ids()?;
        Ok(())
    }

    pub fn commitment(&self) -> anyhow::Result<CommitmentConfig> {
        CommitmentConfig::from_str(&self.rpc.commitment)
            .map_err(|e| anyhow::anyhow!("Invalid rpc.commitment '{}': {}", self.rpc.commitment, e))
    }

    pub fn program_ids(&self) -> anyhow::Result<ProgramIds> {
        let launchpad = Pubkey::from_str(&self.programs.launchpad_program_id).with_context(|| {
            format!(
                "Invalid programs.launchpad_program_id: {}",
                self.programs.launchpad_program_id
            )
        })?;
        Ok(ProgramIds::with_launchpad(launchpad))
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.confirmation.poll_interval_ms)
    }
}

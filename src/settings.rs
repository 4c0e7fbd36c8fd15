use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::constants::{
    CONFIG_ROOT, DEFAULT_CONFIG_ROOT, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_QUEUE_DEPTH,
    DEFAULT_REPLACEMENT_RATE_PCT, WAIT_BLOCKS_BEFORE_RETRYING, WAIT_TIME_FOR_NEW_BLOCK,
};

/// Settings for the RPC connection to the chain we watch.
#[derive(Debug, Deserialize, Clone)]
pub struct Rpc {
    pub http_endpoint: String,
    pub expected_chain_id: u64,
}

/// Settings for the signing key `MultiResponder` drives responses through.
#[derive(Debug, Deserialize, Clone)]
pub struct Signer {
    pub private_key_file: PathBuf,
}

/// Watchtower-wide configuration. Field names mirror the configuration
/// object in the specification; defaults match the ones given there.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: u32,

    #[serde(default = "default_replacement_rate_pct")]
    pub replacement_rate_pct: u32,

    pub confirmations_before_response: u32,

    pub confirmations_before_removal: u32,

    pub block_cache_depth: u32,

    #[serde(default = "default_new_block_timeout_ms")]
    pub new_block_timeout_ms: u32,

    #[serde(default = "default_wait_blocks_before_retrying")]
    pub wait_blocks_before_retrying: u32,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// The gas limit `MultiResponder` attaches to every response transaction
    /// (spec.md's "GAS_LIMIT fixed per integration").
    pub response_gas_limit: u64,

    pub rpc: Rpc,

    pub signer: Signer,
}

fn default_max_queue_depth() -> u32 {
    DEFAULT_MAX_QUEUE_DEPTH
}

fn default_replacement_rate_pct() -> u32 {
    DEFAULT_REPLACEMENT_RATE_PCT
}

fn default_new_block_timeout_ms() -> u32 {
    WAIT_TIME_FOR_NEW_BLOCK.as_millis() as u32
}

fn default_wait_blocks_before_retrying() -> u32 {
    WAIT_BLOCKS_BEFORE_RETRYING
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

/// Command-line options, mirroring the teacher's `CommandLineOptions`
/// pattern: a path to a config file plus environment-variable overrides.
#[derive(clap::Parser, Debug, Clone)]
pub struct CommandLineOptions {
    #[clap(
        long = "config-root",
        env = CONFIG_ROOT,
        default_value = DEFAULT_CONFIG_ROOT,
        help = "The root directory to load the configuration files from."
    )]
    pub config_root: String,
}

impl Settings {
    pub fn new(opts: CommandLineOptions) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(&format!("{}/default", opts.config_root)).required(false))
            .add_source(Environment::with_prefix("PISA").separator("__"))
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validates the `ArgumentError` invariants the watchtower's
    /// constructors rely on; called once at start-up so a misconfiguration
    /// aborts the process instead of an individual appointment.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.confirmations_before_response == 0 {
            return Err(ConfigError::Message(
                "confirmations_before_response must be >= 1".into(),
            ));
        }
        if self.confirmations_before_response > self.confirmations_before_removal {
            return Err(ConfigError::Message(
                "confirmations_before_response must be <= confirmations_before_removal".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod test_utils {
    use super::*;

    pub fn new_test_settings() -> Settings {
        Settings {
            max_queue_depth: DEFAULT_MAX_QUEUE_DEPTH,
            replacement_rate_pct: DEFAULT_REPLACEMENT_RATE_PCT,
            confirmations_before_response: 2,
            confirmations_before_removal: 5,
            block_cache_depth: 100,
            new_block_timeout_ms: 1_000,
            wait_blocks_before_retrying: 20,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            response_gas_limit: 500_000,
            rpc: Rpc { http_endpoint: "http://localhost:8545".into(), expected_chain_id: 1 },
            signer: Signer { private_key_file: "/tmp/does-not-exist".into() },
        }
    }
}

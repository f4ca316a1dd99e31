//! Configuration for the deployer.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::error::{DeployerError, DeployerResult};
use crate::types::{Address, MiddlewareArgs};

/// Default configuration file looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "deployer.toml";

/// Prefix of environment variables that override file values.
pub const ENV_PREFIX: &str = "DEPLOYER_";

/// Top-level deployer configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DeployerConfig {
    /// Target network.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Signing account overrides.
    #[serde(default)]
    pub signer: SignerConfig,

    /// Stellar CLI invocation.
    #[serde(default)]
    pub cli: CliConfig,

    /// Confirmation wait behaviour.
    #[serde(default)]
    pub confirmation: ConfirmationConfig,

    /// Logic and proxy artifacts.
    #[serde(default)]
    pub build: BuildConfig,

    /// Manifest location and locking.
    #[serde(default)]
    pub manifest: ManifestConfig,

    /// Middleware initializer arguments, required by `deploy` only.
    #[serde(default)]
    pub constructor: Option<MiddlewareArgs>,
}

impl DeployerConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `deployer.toml` in the current directory (if present)
    /// 3. Environment variables with `DEPLOYER_` prefix
    pub fn load() -> DeployerResult<Self> {
        Self::from_file(DEFAULT_CONFIG_FILE)
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> DeployerResult<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| DeployerError::config(e.to_string()))
    }

    /// Constructor arguments, or a configuration error naming the missing section.
    pub fn constructor_args(&self) -> DeployerResult<&MiddlewareArgs> {
        self.constructor
            .as_ref()
            .ok_or_else(|| DeployerError::config("missing [constructor] section"))
    }
}

/// Network selection.
///
/// Either a network name known to the Stellar CLI, or an explicit RPC URL
/// with its passphrase.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct NetworkConfig {
    /// Network identifier, also used to key the manifest.
    pub name: Option<String>,

    /// Soroban RPC endpoint.
    pub rpc_url: Option<String>,

    /// Network passphrase matching `rpc_url`.
    pub network_passphrase: Option<String>,
}

/// Signer overrides. The credential itself never comes from this file.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SignerConfig {
    /// Public address of the signing account. Required when the credential
    /// is a raw secret key rather than a CLI identity name.
    pub address: Option<Address>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CliConfig {
    /// Stellar CLI executable.
    #[serde(default = "default_cli_binary")]
    pub binary: String,

    /// Extra arguments appended to every `contract` subcommand.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_cli_binary() -> String {
    "soroban".to_owned()
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            binary: default_cli_binary(),
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmationConfig {
    /// How long to wait for a transaction before re-querying its status.
    #[serde(default = "default_confirmation_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_confirmation_timeout_secs() -> u64 {
    120
}

impl ConfirmationConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_confirmation_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuildConfig {
    /// Compiled middleware logic.
    #[serde(default = "default_logic_wasm")]
    pub logic_wasm: PathBuf,

    /// Compiled upgradeable proxy contract.
    #[serde(default = "default_proxy_wasm")]
    pub proxy_wasm: PathBuf,

    /// Command run before the logic artifact is read, e.g.
    /// `["cargo", "build", "--release", "--target", "wasm32-unknown-unknown"]`.
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

fn default_logic_wasm() -> PathBuf {
    PathBuf::from("target/wasm32-unknown-unknown/release/middleware.wasm")
}

fn default_proxy_wasm() -> PathBuf {
    PathBuf::from("target/wasm32-unknown-unknown/release/upgradeable_proxy.wasm")
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            logic_wasm: default_logic_wasm(),
            proxy_wasm: default_proxy_wasm(),
            command: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestConfig {
    /// Directory holding one `<network>.json` per network.
    #[serde(default = "default_manifest_dir")]
    pub dir: PathBuf,

    /// How long to wait for another run's advisory lock.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Age after which a lock file is assumed to belong to a dead run.
    #[serde(default = "default_stale_lock_secs")]
    pub stale_lock_secs: u64,
}

fn default_manifest_dir() -> PathBuf {
    PathBuf::from(".deployments")
}

const fn default_lock_timeout_ms() -> u64 {
    10_000
}

const fn default_stale_lock_secs() -> u64 {
    900
}

impl ManifestConfig {
    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    #[must_use]
    pub const fn stale_lock_after(&self) -> Duration {
        Duration::from_secs(self.stale_lock_secs)
    }
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            dir: default_manifest_dir(),
            lock_timeout_ms: default_lock_timeout_ms(),
            stale_lock_secs: default_stale_lock_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_apply_without_a_file() {
        Jail::expect_with(|_jail| {
            let config = DeployerConfig::load().map_err(|e| e.to_string())?;

            assert_eq!(config.cli.binary, "soroban");
            assert_eq!(config.confirmation.timeout(), Duration::from_secs(120));
            assert_eq!(config.manifest.dir, PathBuf::from(".deployments"));
            assert_eq!(config.manifest.stale_lock_after(), Duration::from_secs(900));
            assert!(config.constructor.is_none());
            assert!(config.constructor_args().is_err());
            Ok(())
        });
    }

    #[test]
    fn file_and_environment_are_layered() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "deployer.toml",
                r#"
                [network]
                name = "testnet"

                [confirmation]
                timeout_secs = 30

                [constructor]
                network = "CNETWORK"
                operator_registry = "CREGISTRY"
                vault_factory = "CFACTORY"
                operator_net_opt_in = "COPTIN"
                epoch_duration = 86400
                slashing_window = 86400
                "#,
            )?;
            jail.set_env("DEPLOYER_CONFIRMATION__TIMEOUT_SECS", "300");
            jail.set_env("DEPLOYER_MANIFEST__DIR", "state");

            let config = DeployerConfig::load().map_err(|e| e.to_string())?;

            assert_eq!(config.network.name.as_deref(), Some("testnet"));
            assert_eq!(config.confirmation.timeout_secs, 300);
            assert_eq!(config.manifest.dir, PathBuf::from("state"));
            let args = config.constructor_args().map_err(|e| e.to_string())?;
            assert_eq!(args.vault_factory, Address::new("CFACTORY"));
            assert_eq!(args.epoch_duration, 86400);
            Ok(())
        });
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        Jail::expect_with(|jail| {
            jail.create_file("deployer.toml", "[confirmation]\ntimeout_secs = \"soon\"\n")?;

            let err = DeployerConfig::load().unwrap_err();
            assert!(matches!(err, DeployerError::Config(_)));
            Ok(())
        });
    }
}

//! Middleware deployer
//!
//! Deploys upgradeable middleware contracts to a Soroban network and keeps a
//! local manifest of which logic each proxy points at.
//!
//! # Architecture
//!
//! - **Logic builder**: locates the compiled middleware WASM and derives its
//!   identity from the SHA-256 of its bytes
//! - **Manifest store**: one JSON document per network, written atomically
//!   and guarded by advisory locks
//! - **Remote client**: submits transactions and reads proxy state; the
//!   production client drives the Stellar CLI
//! - **Orchestrator**: the deploy, upgrade and reconcile flows
//!
//! ```text
//! resolve logic ──▶ submit ──▶ confirm ──▶ verify pointer ──▶ persist
//!                                 │
//!                             timeout ──▶ re-query ──▶ confirmed / failed / unknown
//! ```
//!
//! # Example
//!
//! ```ignore
//! use middleware_deployer::{
//!     FileManifestStore, Orchestrator, SigningCredential, StellarCli, WasmLogicBuilder,
//! };
//!
//! let config = DeployerConfig::load()?;
//! let orchestrator = Orchestrator::new(
//!     WasmLogicBuilder::from_config(&config.build),
//!     FileManifestStore::from_config(&config.manifest),
//!     StellarCli::from_config(&config, "testnet", SigningCredential::new("alice"))?,
//!     config.confirmation.timeout(),
//! );
//! let outcome = orchestrator.upgrade("testnet", None)?;
//! ```

pub mod config;
pub mod error;
pub mod logic;
pub mod manifest;
pub mod orchestrator;
pub mod remote;
pub mod types;

pub use config::DeployerConfig;
pub use error::{DeployerError, DeployerResult, ErrorKind};
pub use logic::{BuildError, LogicBuilder, LogicHandle, WasmLogicBuilder};
pub use manifest::{FileManifestStore, ManifestError, ManifestStore, MemoryManifestStore};
pub use orchestrator::{DeployOutcome, Orchestrator, UpgradeOutcome};
pub use remote::{RemoteClient, RemoteError, SigningCredential, StellarCli};
pub use types::{Address, DeploymentRecord, LogicHash, MiddlewareArgs, Operation};

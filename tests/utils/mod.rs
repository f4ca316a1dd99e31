//! Testing utilities for end-to-end deployer flows.
//! Provides a sandbox remote backed by the proxy contract and a harness
//! wiring it to a real logic artifact and file manifest.

pub mod sandbox;

pub use sandbox::{MiddlewareLogic, SandboxRemote};

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use middleware_deployer::{
    Address, DeploymentRecord, FileManifestStore, ManifestStore, MiddlewareArgs, Orchestrator,
    WasmLogicBuilder,
};
use tempfile::TempDir;

/// Common test constants
pub mod constants {
    use std::time::Duration;

    pub const NETWORK: &str = "test";
    pub const EPOCH_DURATION: u64 = 86400;
    pub const SLASHING_WINDOW: u64 = 86400;
    pub const CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(1);
}

/// Constructor arguments `[A, B, C, D, 86400, 86400]`.
pub fn middleware_args() -> MiddlewareArgs {
    MiddlewareArgs {
        network: Address::new("CNETWORKA"),
        operator_registry: Address::new("COPREGISTRYB"),
        vault_factory: Address::new("CVAULTFACTORYC"),
        operator_net_opt_in: Address::new("COPTINSERVICED"),
        epoch_duration: constants::EPOCH_DURATION,
        slashing_window: constants::SLASHING_WINDOW,
    }
}

pub type SandboxOrchestrator = Orchestrator<WasmLogicBuilder, FileManifestStore, SandboxRemote>;

/// Orchestrator over a sandbox remote, a temp manifest directory and a
/// logic artifact the test can rewrite between runs.
pub struct Harness {
    pub orchestrator: SandboxOrchestrator,
    artifact: PathBuf,
    _dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let artifact = dir.path().join("middleware.wasm");
        let manifest = FileManifestStore::new(dir.path().join("deployments"))
            .with_lock_timeout(Duration::from_millis(100));

        let harness = Self {
            orchestrator: Orchestrator::new(
                WasmLogicBuilder::new(&artifact),
                manifest,
                SandboxRemote::new(),
                constants::CONFIRMATION_TIMEOUT,
            ),
            artifact,
            _dir: dir,
        };
        harness.write_logic(b"v1");
        harness
    }

    /// Replace the logic artifact with a module tagged `revision`.
    pub fn write_logic(&self, revision: &[u8]) {
        let mut bytes = b"\0asm\x01\0\0\0".to_vec();
        bytes.extend_from_slice(revision);
        fs::write(&self.artifact, bytes).expect("write logic artifact");
    }

    /// Replace the logic artifact with something that is not WASM.
    pub fn corrupt_logic(&self) {
        fs::write(&self.artifact, b"not wasm").expect("write logic artifact");
    }

    pub fn remote(&self) -> &SandboxRemote {
        self.orchestrator.remote()
    }

    pub fn manifest(&self) -> &FileManifestStore {
        self.orchestrator.manifest()
    }

    pub fn record(&self, proxy: &Address) -> DeploymentRecord {
        self.manifest()
            .load(constants::NETWORK, proxy)
            .expect("recorded proxy")
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

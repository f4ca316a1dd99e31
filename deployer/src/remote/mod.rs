//! Remote network client interface.
//!
//! The orchestrator never signs anything itself: every state-changing call
//! goes through a client whose signer was configured up front.

mod stellar_cli;

pub use stellar_cli::{SigningCredential, StellarCli, PROXY_NOT_INITIALIZED, PROXY_UNAUTHORIZED};

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::{Address, LogicHash, MiddlewareArgs};

/// Result type alias using [`RemoteError`].
pub type RemoteResult<T> = Result<T, RemoteError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The network refused the signer for this call.
    #[error("rejected for lack of authorization: {0}")]
    Unauthorized(String),

    /// The transaction reverted or was refused.
    #[error("transaction rejected: {0}")]
    Rejected(String),

    /// The target does not answer the accessor.
    #[error("{address} does not expose `{accessor}`: {reason}")]
    MissingAccessor {
        address: Address,
        accessor: &'static str,
        reason: String,
    },

    /// No confirmation within the wait window. The transaction may still land.
    #[error("transaction {tx} not confirmed within {}s", waited.as_secs())]
    Timeout { tx: String, waited: Duration },

    #[error("unknown transaction {0}")]
    UnknownTransaction(String),

    /// The client could not reach the network or parse its answer.
    #[error("transport error: {0}")]
    Transport(String),
}

/// State-changing calls the orchestrator submits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// Deploy a fresh instance of the logic artifact.
    InstallLogic { artifact: PathBuf, hash: LogicHash },

    /// Deploy the proxy and initialize it in one logical transaction.
    DeployProxy {
        logic: Address,
        admin: Address,
        args: MiddlewareArgs,
    },

    /// Move the proxy's logic pointer.
    UpgradeProxy {
        proxy: Address,
        logic: Address,
        caller: Address,
    },
}

impl Call {
    pub const fn label(&self) -> &'static str {
        match self {
            Self::InstallLogic { .. } => "install_logic",
            Self::DeployProxy { .. } => "deploy_proxy",
            Self::UpgradeProxy { .. } => "upgrade_proxy",
        }
    }
}

/// Reference to a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxHandle {
    pub id: String,
    pub call: &'static str,
}

impl fmt::Display for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.call)
    }
}

/// Outcome of a confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx: String,
    /// Contract created by the transaction, if any.
    pub contract: Option<Address>,
}

/// Result of re-querying a transaction after a confirmation timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    Pending,
    Confirmed(Receipt),
    Failed(RemoteError),
}

/// Read-only accessors exposed by the proxy contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accessor {
    /// Current logic pointer.
    Implementation,
    /// Account allowed to upgrade.
    Admin,
}

impl Accessor {
    /// Contract function name.
    pub const fn function(self) -> &'static str {
        match self {
            Self::Implementation => "implementation",
            Self::Admin => "admin",
        }
    }
}

/// Client for the remote execution network.
pub trait RemoteClient {
    /// Address of the configured signer.
    fn signer(&self) -> RemoteResult<Address>;

    /// Submit a call without waiting for it.
    fn submit_transaction(&self, call: Call) -> RemoteResult<TxHandle>;

    /// Block until `tx` is confirmed, fails, or `timeout` elapses.
    fn wait_for_confirmation(&self, tx: &TxHandle, timeout: Duration) -> RemoteResult<Receipt>;

    /// Ask again whether `tx` landed, without waiting.
    fn transaction_status(&self, tx: &TxHandle) -> RemoteResult<TxStatus>;

    /// Read an address-valued accessor of a contract.
    fn query(&self, address: &Address, accessor: Accessor) -> RemoteResult<Address>;

    /// Whether a contract instance still lives at `address`.
    fn contract_exists(&self, address: &Address) -> RemoteResult<bool>;
}

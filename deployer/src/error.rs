//! Error types for the deployer.

use crate::logic::BuildError;
use crate::manifest::ManifestError;
use crate::remote::RemoteError;
use crate::types::Address;

/// Result type alias using [`DeployerError`].
pub type DeployerResult<T> = Result<T, DeployerError>;

/// Failures of a deploy, upgrade or reconcile run.
#[derive(Debug, thiserror::Error)]
pub enum DeployerError {
    /// Logic could not be built or located. Nothing was submitted.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// Manifest precondition or storage failure.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// The remote network rejected the signer.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A deployment transaction was rejected or reverted.
    #[error("deploy failed: {0}")]
    Deploy(String),

    /// An upgrade transaction was rejected or reverted.
    #[error("upgrade of {proxy} failed: {reason}")]
    Upgrade {
        /// Proxy being upgraded.
        proxy: Address,
        /// Remote failure description.
        reason: String,
    },

    /// Outcome still unknown after re-querying the transaction.
    #[error(
        "transaction {tx} for {target} was not confirmed after {timeout_secs}s; \
         run `reconcile` before retrying"
    )]
    ConfirmationTimeout {
        /// Transaction identifier.
        tx: String,
        /// What the transaction was changing.
        target: String,
        /// Configured confirmation timeout.
        timeout_secs: u64,
    },

    /// The network change went through but the manifest could not record it.
    #[error(
        "proxy {proxy} on {network} changed but was not recorded: {source}; \
         run `reconcile --network {network} --proxy {proxy}`"
    )]
    NotRecorded {
        network: String,
        proxy: Address,
        #[source]
        source: ManifestError,
    },

    /// Target address is not a recognisable proxy.
    #[error("{address} is not a recognisable proxy: {reason}")]
    Reconcile {
        /// Queried address.
        address: Address,
        /// Why it was not recognised.
        reason: String,
    },

    /// Remote failure outside a transaction.
    #[error(transparent)]
    Remote(RemoteError),

    /// Constructor arguments failed the shape check.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl DeployerError {
    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Classification reported to the operator.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Build(_) => ErrorKind::Build,
            Self::Manifest(err) | Self::NotRecorded { source: err, .. } => manifest_kind(err),
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::Deploy(_) => ErrorKind::Deploy,
            Self::Upgrade { .. } => ErrorKind::Upgrade,
            Self::ConfirmationTimeout { .. } => ErrorKind::ConfirmationTimeout,
            Self::Reconcile { .. } => ErrorKind::Reconcile,
            Self::Remote(_) => ErrorKind::Remote,
            Self::InvalidArguments(_) | Self::Config(_) => ErrorKind::Config,
        }
    }
}

fn manifest_kind(err: &ManifestError) -> ErrorKind {
    match err {
        ManifestError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
        ManifestError::NotFound { .. } => ErrorKind::NotFound,
        ManifestError::Ambiguous { .. } | ManifestError::Locked { .. } => ErrorKind::Manifest,
        ManifestError::InvalidNetwork(_) | ManifestError::InvalidProxy(_) => ErrorKind::Config,
        _ => ErrorKind::Io,
    }
}

/// Operator-facing error classes and their process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Build,
    AlreadyExists,
    NotFound,
    Manifest,
    Unauthorized,
    Deploy,
    Upgrade,
    ConfirmationTimeout,
    Reconcile,
    Remote,
    Config,
    Io,
}

impl ErrorKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Build => "BuildError",
            Self::AlreadyExists => "AlreadyExists",
            Self::NotFound => "NotFound",
            Self::Manifest => "ManifestError",
            Self::Unauthorized => "UnauthorizedError",
            Self::Deploy => "DeployError",
            Self::Upgrade => "UpgradeError",
            Self::ConfirmationTimeout => "ConfirmationTimeout",
            Self::Reconcile => "ReconcileError",
            Self::Remote => "RemoteError",
            Self::Config => "ConfigError",
            Self::Io => "IoError",
        }
    }

    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Config | Self::Io => 1,
            Self::Build => 2,
            Self::AlreadyExists | Self::NotFound | Self::Manifest => 3,
            Self::Unauthorized => 4,
            Self::Deploy | Self::Upgrade | Self::Remote => 5,
            Self::ConfirmationTimeout => 6,
            Self::Reconcile => 7,
        }
    }
}

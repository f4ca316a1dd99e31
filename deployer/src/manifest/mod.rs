//! Deployment manifest storage backends.
//!
//! The manifest is the local record of which logic each tracked proxy
//! points at. Orchestration only talks to [`ManifestStore`]; the JSON file
//! backend is used by the CLI and the in-memory backend by tests.

mod file;
mod lock;
mod memory;

pub use file::FileManifestStore;
pub use lock::ManifestLock;
pub use memory::MemoryManifestStore;

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::types::{Address, DeploymentRecord, ImplementationRecord, LogicHash, RecordMutation};

/// Current on-disk manifest format.
pub const MANIFEST_VERSION: &str = "1";

/// Result type alias using [`ManifestError`].
pub type ManifestResult<T> = Result<T, ManifestError>;

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// No record for the requested target.
    #[error("no deployment of {target} recorded on network {network}")]
    NotFound { network: String, target: String },

    /// A record already exists for the network or proxy.
    #[error("proxy {proxy} is already recorded on network {network}")]
    AlreadyExists { network: String, proxy: Address },

    /// Several proxies are tracked and none was named.
    #[error("{count} proxies are recorded on network {network}; name one with --proxy")]
    Ambiguous { network: String, count: usize },

    /// Another run holds the advisory lock.
    #[error("manifest lock {resource} is held by another run")]
    Locked { resource: String },

    /// Network name cannot be used as a manifest key.
    #[error("invalid network name `{0}`")]
    InvalidNetwork(String),

    /// Proxy address cannot be used as a lock key.
    #[error("invalid proxy address `{0}`")]
    InvalidProxy(Address),

    #[error("manifest I/O on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ManifestError {
    /// Not-found error for a specific proxy, or for any proxy on the network.
    #[must_use]
    pub fn not_found(network: &str, proxy: Option<&Address>) -> Self {
        Self::NotFound {
            network: network.to_owned(),
            target: proxy.map_or_else(|| "any proxy".to_owned(), |p| format!("proxy {p}")),
        }
    }

    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Backend for deployment records.
///
/// `update` must apply the pointer move and its history entry together, and
/// every write must be durable before the call returns.
pub trait ManifestStore {
    /// Load the record of `proxy` on `network`.
    fn load(&self, network: &str, proxy: &Address) -> ManifestResult<DeploymentRecord>;

    /// All records on `network`, ordered by proxy address.
    fn records(&self, network: &str) -> ManifestResult<Vec<DeploymentRecord>>;

    /// Insert a new record. Fails with `AlreadyExists` if the proxy is known.
    fn create(&self, record: &DeploymentRecord) -> ManifestResult<()>;

    /// Apply `mutation` to an existing record and return the result.
    fn update(
        &self,
        network: &str,
        proxy: &Address,
        mutation: RecordMutation,
    ) -> ManifestResult<DeploymentRecord>;

    /// Previously deployed logic instance with identity `hash`.
    fn implementation(
        &self,
        network: &str,
        hash: &LogicHash,
    ) -> ManifestResult<Option<ImplementationRecord>>;

    /// Remember that logic `hash` is deployed at `address`.
    fn record_implementation(
        &self,
        network: &str,
        hash: &LogicHash,
        address: &Address,
    ) -> ManifestResult<()>;

    /// Take the advisory lock for one proxy. Released when the guard drops.
    fn lock(&self, network: &str, proxy: &Address) -> ManifestResult<ManifestLock>;

    /// `proxy` if given, otherwise the only proxy recorded on `network`.
    fn resolve_proxy(&self, network: &str, proxy: Option<&Address>) -> ManifestResult<Address> {
        if let Some(proxy) = proxy {
            return Ok(proxy.clone());
        }
        let mut records = self.records(network)?;
        match records.len() {
            0 => Err(ManifestError::not_found(network, None)),
            1 => Ok(records.remove(0).proxy_address),
            count => Err(ManifestError::Ambiguous {
                network: network.to_owned(),
                count,
            }),
        }
    }
}

/// Everything recorded for one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkManifest {
    pub manifest_version: String,
    pub network: String,
    #[serde(default)]
    pub proxies: BTreeMap<Address, DeploymentRecord>,
    #[serde(default)]
    pub implementations: BTreeMap<LogicHash, ImplementationRecord>,
}

impl NetworkManifest {
    pub fn new(network: impl Into<String>) -> Self {
        Self {
            manifest_version: MANIFEST_VERSION.to_owned(),
            network: network.into(),
            proxies: BTreeMap::new(),
            implementations: BTreeMap::new(),
        }
    }

    pub fn get(&self, proxy: &Address) -> ManifestResult<&DeploymentRecord> {
        self.proxies
            .get(proxy)
            .ok_or_else(|| ManifestError::not_found(&self.network, Some(proxy)))
    }

    pub fn insert(&mut self, record: &DeploymentRecord) -> ManifestResult<()> {
        if self.proxies.contains_key(&record.proxy_address) {
            return Err(ManifestError::AlreadyExists {
                network: self.network.clone(),
                proxy: record.proxy_address.clone(),
            });
        }
        self.proxies
            .insert(record.proxy_address.clone(), record.clone());
        Ok(())
    }

    pub fn apply(
        &mut self,
        proxy: &Address,
        mutation: RecordMutation,
    ) -> ManifestResult<DeploymentRecord> {
        let record = self
            .proxies
            .get_mut(proxy)
            .ok_or_else(|| ManifestError::not_found(&self.network, Some(proxy)))?;
        record.apply(mutation);
        Ok(record.clone())
    }

    pub fn remember_implementation(&mut self, hash: &LogicHash, address: &Address) {
        self.implementations.insert(
            hash.clone(),
            ImplementationRecord {
                address: address.clone(),
                deployed_at: Utc::now(),
            },
        );
    }
}

/// Network names and proxy addresses become file names, so keep them to a
/// safe alphabet.
fn is_file_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

pub(crate) fn validate_network(network: &str) -> ManifestResult<()> {
    if is_file_key(network) {
        Ok(())
    } else {
        Err(ManifestError::InvalidNetwork(network.to_owned()))
    }
}

pub(crate) fn validate_proxy(proxy: &Address) -> ManifestResult<()> {
    if is_file_key(proxy.as_str()) {
        Ok(())
    } else {
        Err(ManifestError::InvalidProxy(proxy.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HistoryEntry, Operation};

    #[test]
    fn network_names_are_restricted() {
        assert!(validate_network("testnet").is_ok());
        assert!(validate_network("futurenet-2").is_ok());
        assert!(validate_network("").is_err());
        assert!(validate_network("../etc").is_err());
        assert!(validate_network("a/b").is_err());
    }

    #[test]
    fn insert_rejects_known_proxy() {
        let mut manifest = NetworkManifest::new("test");
        let record = DeploymentRecord::new(
            "test",
            Address::new("CPROXY"),
            Address::new("GADMIN"),
            HistoryEntry::now(Address::new("CLOGIC"), None, Operation::Deploy),
        );

        manifest.insert(&record).unwrap();
        assert!(matches!(
            manifest.insert(&record),
            Err(ManifestError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn resolve_proxy_needs_exactly_one_record() {
        let store = MemoryManifestStore::new();
        assert!(matches!(
            store.resolve_proxy("test", None),
            Err(ManifestError::NotFound { .. })
        ));

        for proxy in ["CPROXY1", "CPROXY2"] {
            store
                .create(&DeploymentRecord::new(
                    "test",
                    Address::new(proxy),
                    Address::new("GADMIN"),
                    HistoryEntry::now(Address::new("CLOGIC"), None, Operation::Deploy),
                ))
                .unwrap();
            if proxy == "CPROXY1" {
                assert_eq!(
                    store.resolve_proxy("test", None).unwrap(),
                    Address::new("CPROXY1")
                );
            }
        }

        assert!(matches!(
            store.resolve_proxy("test", None),
            Err(ManifestError::Ambiguous { count: 2, .. })
        ));
        assert_eq!(
            store
                .resolve_proxy("test", Some(&Address::new("CPROXY2")))
                .unwrap(),
            Address::new("CPROXY2")
        );
    }

    #[test]
    fn apply_to_unknown_proxy_is_not_found() {
        let mut manifest = NetworkManifest::new("test");
        let res = manifest.apply(
            &Address::new("CPROXY"),
            RecordMutation::upgrade(Address::new("CLOGIC"), LogicHash::of(b"v2")),
        );
        assert!(matches!(res, Err(ManifestError::NotFound { .. })));
    }
}

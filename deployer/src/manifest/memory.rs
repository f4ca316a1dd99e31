//! In-memory manifest store for testing.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use crate::types::{Address, DeploymentRecord, ImplementationRecord, LogicHash, RecordMutation};

use super::{
    validate_network, ManifestError, ManifestLock, ManifestResult, ManifestStore, NetworkManifest,
};

/// In-memory manifest store.
///
/// Data is lost when the process exits. Locks are exclusive within the
/// process and fail immediately instead of waiting.
#[derive(Debug, Default)]
pub struct MemoryManifestStore {
    networks: RwLock<HashMap<String, NetworkManifest>>,
    held: Arc<Mutex<HashSet<(String, Address)>>>,
}

impl MemoryManifestStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn write<T>(
        &self,
        network: &str,
        f: impl FnOnce(&mut NetworkManifest) -> ManifestResult<T>,
    ) -> ManifestResult<T> {
        validate_network(network)?;
        let mut networks = self
            .networks
            .write()
            .map_err(|_| ManifestError::internal("lock poisoned"))?;
        let manifest = networks
            .entry(network.to_owned())
            .or_insert_with(|| NetworkManifest::new(network));
        f(manifest)
    }

    fn read<T>(
        &self,
        network: &str,
        f: impl FnOnce(Option<&NetworkManifest>) -> ManifestResult<T>,
    ) -> ManifestResult<T> {
        validate_network(network)?;
        let networks = self
            .networks
            .read()
            .map_err(|_| ManifestError::internal("lock poisoned"))?;
        f(networks.get(network))
    }
}

impl ManifestStore for MemoryManifestStore {
    fn load(&self, network: &str, proxy: &Address) -> ManifestResult<DeploymentRecord> {
        self.read(network, |manifest| {
            manifest
                .ok_or_else(|| ManifestError::not_found(network, Some(proxy)))?
                .get(proxy)
                .cloned()
        })
    }

    fn records(&self, network: &str) -> ManifestResult<Vec<DeploymentRecord>> {
        self.read(network, |manifest| {
            Ok(manifest
                .map(|m| m.proxies.values().cloned().collect())
                .unwrap_or_default())
        })
    }

    fn create(&self, record: &DeploymentRecord) -> ManifestResult<()> {
        self.write(&record.network, |manifest| manifest.insert(record))
    }

    fn update(
        &self,
        network: &str,
        proxy: &Address,
        mutation: RecordMutation,
    ) -> ManifestResult<DeploymentRecord> {
        self.write(network, |manifest| manifest.apply(proxy, mutation))
    }

    fn implementation(
        &self,
        network: &str,
        hash: &LogicHash,
    ) -> ManifestResult<Option<ImplementationRecord>> {
        self.read(network, |manifest| {
            Ok(manifest.and_then(|m| m.implementations.get(hash).cloned()))
        })
    }

    fn record_implementation(
        &self,
        network: &str,
        hash: &LogicHash,
        address: &Address,
    ) -> ManifestResult<()> {
        self.write(network, |manifest| {
            manifest.remember_implementation(hash, address);
            Ok(())
        })
    }

    fn lock(&self, network: &str, proxy: &Address) -> ManifestResult<ManifestLock> {
        let key = (network.to_owned(), proxy.clone());
        let resource = format!("memory:{network}/{proxy}");
        {
            let mut held = self
                .held
                .lock()
                .map_err(|_| ManifestError::internal("lock poisoned"))?;
            if !held.insert(key.clone()) {
                return Err(ManifestError::Locked { resource });
            }
        }

        let held = Arc::clone(&self.held);
        Ok(ManifestLock::new(resource, move || {
            if let Ok(mut held) = held.lock() {
                held.remove(&key);
            }
        }))
    }
}

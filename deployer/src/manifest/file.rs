//! JSON file manifest store.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::config::ManifestConfig;
use crate::types::{Address, DeploymentRecord, ImplementationRecord, LogicHash, RecordMutation};

use super::lock::FileLock;
use super::{
    validate_network, validate_proxy, ManifestError, ManifestLock, ManifestResult, ManifestStore,
    NetworkManifest,
};

/// Stores one `<network>.json` file per network under a directory.
///
/// Every write goes to a temporary file that is synced and renamed over the
/// manifest, under a short per-network lock so concurrent runs against
/// different proxies of the same network do not lose each other's updates.
///
/// Proxy locks are named `<network>@<proxy>.lock`. `@` is outside the key
/// alphabet, so no (network, proxy) pair can name another pair's lock or a
/// network write lock.
#[derive(Debug, Clone)]
pub struct FileManifestStore {
    dir: PathBuf,
    lock_timeout: Duration,
    stale_lock_after: Duration,
}

impl FileManifestStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock_timeout: Duration::from_secs(10),
            stale_lock_after: Duration::from_secs(900),
        }
    }

    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Lock files older than `after` are treated as left by a dead run.
    #[must_use]
    pub fn with_stale_lock_after(mut self, after: Duration) -> Self {
        self.stale_lock_after = after;
        self
    }

    pub fn from_config(config: &ManifestConfig) -> Self {
        Self::new(&config.dir)
            .with_lock_timeout(config.lock_timeout())
            .with_stale_lock_after(config.stale_lock_after())
    }

    /// Path of the manifest file for `network`.
    pub fn manifest_path(&self, network: &str) -> PathBuf {
        self.dir.join(format!("{network}.json"))
    }

    /// Path of the advisory lock file for one proxy.
    pub fn lock_path(&self, network: &str, proxy: &Address) -> PathBuf {
        self.dir.join(format!("{network}@{proxy}.lock"))
    }

    fn acquire(&self, path: &Path) -> ManifestResult<FileLock> {
        FileLock::acquire(path, self.lock_timeout, self.stale_lock_after)
    }

    fn io_error(path: &Path) -> impl FnOnce(io::Error) -> ManifestError + '_ {
        move |source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn ensure_dir(&self) -> ManifestResult<()> {
        fs::create_dir_all(&self.dir).map_err(Self::io_error(&self.dir))
    }

    fn read_manifest(&self, network: &str) -> ManifestResult<NetworkManifest> {
        validate_network(network)?;
        let path = self.manifest_path(network);
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|source| ManifestError::Corrupt { path, source }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(NetworkManifest::new(network)),
            Err(source) => Err(ManifestError::Io { path, source }),
        }
    }

    fn write_manifest(&self, manifest: &NetworkManifest) -> ManifestResult<()> {
        let path = self.manifest_path(&manifest.network);
        let tmp_path = self.dir.join(format!("{}.json.tmp", manifest.network));

        let json = serde_json::to_vec_pretty(manifest).map_err(|source| ManifestError::Corrupt {
            path: path.clone(),
            source,
        })?;

        let mut file = fs::File::create(&tmp_path).map_err(Self::io_error(&tmp_path))?;
        file.write_all(&json).map_err(Self::io_error(&tmp_path))?;
        file.sync_all().map_err(Self::io_error(&tmp_path))?;
        drop(file);

        fs::rename(&tmp_path, &path).map_err(Self::io_error(&path))?;
        debug!(path = %path.display(), "manifest written");
        Ok(())
    }

    /// Read-modify-write of one network file under its write lock.
    fn modify<T>(
        &self,
        network: &str,
        f: impl FnOnce(&mut NetworkManifest) -> ManifestResult<T>,
    ) -> ManifestResult<T> {
        validate_network(network)?;
        self.ensure_dir()?;
        let _write_lock = self.acquire(&self.dir.join(format!("{network}.json.lock")))?;

        let mut manifest = self.read_manifest(network)?;
        let value = f(&mut manifest)?;
        self.write_manifest(&manifest)?;
        Ok(value)
    }
}

impl ManifestStore for FileManifestStore {
    fn load(&self, network: &str, proxy: &Address) -> ManifestResult<DeploymentRecord> {
        self.read_manifest(network)?.get(proxy).cloned()
    }

    fn records(&self, network: &str) -> ManifestResult<Vec<DeploymentRecord>> {
        Ok(self
            .read_manifest(network)?
            .proxies
            .into_values()
            .collect())
    }

    fn create(&self, record: &DeploymentRecord) -> ManifestResult<()> {
        self.modify(&record.network, |manifest| manifest.insert(record))
    }

    fn update(
        &self,
        network: &str,
        proxy: &Address,
        mutation: RecordMutation,
    ) -> ManifestResult<DeploymentRecord> {
        self.modify(network, |manifest| manifest.apply(proxy, mutation))
    }

    fn implementation(
        &self,
        network: &str,
        hash: &LogicHash,
    ) -> ManifestResult<Option<ImplementationRecord>> {
        Ok(self.read_manifest(network)?.implementations.remove(hash))
    }

    fn record_implementation(
        &self,
        network: &str,
        hash: &LogicHash,
        address: &Address,
    ) -> ManifestResult<()> {
        self.modify(network, |manifest| {
            manifest.remember_implementation(hash, address);
            Ok(())
        })
    }

    fn lock(&self, network: &str, proxy: &Address) -> ManifestResult<ManifestLock> {
        validate_network(network)?;
        validate_proxy(proxy)?;
        self.ensure_dir()?;
        Ok(self.acquire(&self.lock_path(network, proxy))?.into_guard())
    }
}

//! Deploy, upgrade and reconcile flows.
//!
//! Every flow follows the same shape: resolve, submit, confirm, verify the
//! proxy pointer, then persist. The manifest is only written once the remote
//! change is confirmed, so a failed run leaves it as it was.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{DeployerError, DeployerResult};
use crate::logic::{LogicBuilder, LogicHandle};
use crate::manifest::{ManifestError, ManifestStore};
use crate::remote::{Accessor, Call, Receipt, RemoteClient, RemoteError, TxHandle, TxStatus};
use crate::types::{
    Address, DeploymentRecord, HistoryEntry, MiddlewareArgs, Operation, RecordMutation,
};

/// Result of a successful deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployOutcome {
    pub proxy_address: Address,
    pub logic_address: Address,
}

/// Result of a successful upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeOutcome {
    pub proxy_address: Address,
    pub new_logic_address: Address,
}

/// Which flow a remote failure belongs to.
#[derive(Debug, Clone, Copy)]
enum Flow<'a> {
    Deploy { network: &'a str },
    Upgrade { proxy: &'a Address },
}

impl Flow<'_> {
    fn target(self) -> String {
        match self {
            Self::Deploy { network } => format!("deployment on {network}"),
            Self::Upgrade { proxy } => format!("upgrade of {proxy}"),
        }
    }

    fn failed(self, reason: String) -> DeployerError {
        match self {
            Self::Deploy { .. } => DeployerError::Deploy(reason),
            Self::Upgrade { proxy } => DeployerError::Upgrade {
                proxy: proxy.clone(),
                reason,
            },
        }
    }

    fn failure(self, err: RemoteError) -> DeployerError {
        match err {
            RemoteError::Unauthorized(reason) => DeployerError::Unauthorized(reason),
            RemoteError::Timeout { tx, waited } => DeployerError::ConfirmationTimeout {
                tx,
                target: self.target(),
                timeout_secs: waited.as_secs(),
            },
            other => self.failed(other.to_string()),
        }
    }
}

/// Drives the deployment lifecycle of upgradeable middleware.
///
/// Configuration is injected through the three collaborators; the
/// orchestrator holds no other state.
#[derive(Debug)]
pub struct Orchestrator<L, M, R> {
    logic: L,
    manifest: M,
    remote: R,
    confirmation_timeout: Duration,
}

impl<L, M, R> Orchestrator<L, M, R>
where
    L: LogicBuilder,
    M: ManifestStore,
    R: RemoteClient,
{
    pub fn new(logic: L, manifest: M, remote: R, confirmation_timeout: Duration) -> Self {
        Self {
            logic,
            manifest,
            remote,
            confirmation_timeout,
        }
    }

    pub fn logic(&self) -> &L {
        &self.logic
    }

    pub fn manifest(&self) -> &M {
        &self.manifest
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Deploy the logic and a fresh proxy pointing at it.
    ///
    /// Refused if the network already has a record; upgrades go through
    /// [`Self::upgrade`].
    pub fn deploy(&self, network: &str, args: &MiddlewareArgs) -> DeployerResult<DeployOutcome> {
        if let Some(existing) = self.manifest.records(network)?.into_iter().next() {
            return Err(ManifestError::AlreadyExists {
                network: network.to_owned(),
                proxy: existing.proxy_address,
            }
            .into());
        }
        args.validate()?;

        info!(network, "starting deployment");
        let flow = Flow::Deploy { network };
        let logic = self.logic.resolve_logic()?;
        let admin = self.remote.signer().map_err(|e| flow.failure(e))?;
        let logic_address = self.logic_address(network, &logic, flow)?;

        let receipt = self.execute(
            Call::DeployProxy {
                logic: logic_address.clone(),
                admin: admin.clone(),
                args: args.clone(),
            },
            flow,
        )?;
        let proxy = receipt
            .contract
            .ok_or_else(|| flow.failed("proxy deployment returned no address".to_owned()))?;
        self.verify_pointer(&proxy, &logic_address, flow)?;

        let record = DeploymentRecord::new(
            network,
            proxy.clone(),
            admin,
            HistoryEntry::now(logic_address.clone(), Some(logic.hash), Operation::Deploy),
        );
        self.manifest
            .lock(network, &proxy)
            .and_then(|_lock| self.manifest.create(&record))
            .map_err(|source| DeployerError::NotRecorded {
                network: network.to_owned(),
                proxy: proxy.clone(),
                source,
            })?;

        info!(network, %proxy, logic = %logic_address, "deployment recorded");
        Ok(DeployOutcome {
            proxy_address: proxy,
            logic_address,
        })
    }

    /// Point `proxy` (or the network's only proxy) at the current logic.
    pub fn upgrade(
        &self,
        network: &str,
        proxy: Option<&Address>,
    ) -> DeployerResult<UpgradeOutcome> {
        let proxy = self.manifest.resolve_proxy(network, proxy)?;
        let flow = Flow::Upgrade { proxy: &proxy };

        let _lock = self.manifest.lock(network, &proxy)?;
        let record = self.manifest.load(network, &proxy)?;
        info!(network, %proxy, current = %record.current_logic_address, "starting upgrade");

        let logic = self.logic.resolve_logic()?;
        if record.current_logic_hash() == Some(&logic.hash) {
            info!(%proxy, hash = %logic.hash, "logic unchanged, upgrading anyway");
        }

        let caller = self.remote.signer().map_err(|e| flow.failure(e))?;
        let logic_address = self.logic_address(network, &logic, flow)?;

        self.execute(
            Call::UpgradeProxy {
                proxy: proxy.clone(),
                logic: logic_address.clone(),
                caller,
            },
            flow,
        )?;
        self.verify_pointer(&proxy, &logic_address, flow)?;

        self.manifest
            .update(
                network,
                &proxy,
                RecordMutation::upgrade(logic_address.clone(), logic.hash),
            )
            .map_err(|source| DeployerError::NotRecorded {
                network: network.to_owned(),
                proxy: proxy.clone(),
                source,
            })?;

        info!(network, %proxy, logic = %logic_address, "upgrade recorded");
        Ok(UpgradeOutcome {
            proxy_address: proxy,
            new_logic_address: logic_address,
        })
    }

    /// Rebuild the record of `proxy` from what the network reports.
    pub fn reconcile(&self, network: &str, proxy: &Address) -> DeployerResult<DeploymentRecord> {
        info!(network, %proxy, "reconciling");
        let logic = self.read_proxy(proxy, Accessor::Implementation)?;
        let admin = self.read_proxy(proxy, Accessor::Admin)?;

        let _lock = self.manifest.lock(network, proxy)?;
        let record = match self.manifest.load(network, proxy) {
            Ok(existing) => {
                if existing.current_logic_address != logic {
                    warn!(
                        %proxy,
                        recorded = %existing.current_logic_address,
                        remote = %logic,
                        "manifest disagreed with the network"
                    );
                }
                self.manifest
                    .update(network, proxy, RecordMutation::reconciled(logic, admin))?
            }
            Err(ManifestError::NotFound { .. }) => {
                let record = DeploymentRecord::new(
                    network,
                    proxy.clone(),
                    admin,
                    HistoryEntry::now(logic, None, Operation::Reconciled),
                );
                self.manifest.create(&record)?;
                record
            }
            Err(e) => return Err(e.into()),
        };

        info!(network, %proxy, logic = %record.current_logic_address, "reconciled");
        Ok(record)
    }

    /// Submit `call` and wait for it. On timeout the transaction is asked
    /// about once more; it is never resubmitted.
    fn execute(&self, call: Call, flow: Flow<'_>) -> DeployerResult<Receipt> {
        let tx = self
            .remote
            .submit_transaction(call.clone())
            .map_err(|e| flow.failure(e))?;
        info!(tx = %tx, "waiting for confirmation");

        match self
            .remote
            .wait_for_confirmation(&tx, self.confirmation_timeout)
        {
            Ok(receipt) => Ok(receipt),
            Err(RemoteError::Timeout { .. }) => {
                warn!(
                    tx = %tx,
                    timeout_secs = self.confirmation_timeout.as_secs(),
                    "confirmation timed out, re-querying transaction"
                );
                match self
                    .remote
                    .transaction_status(&tx)
                    .map_err(|e| flow.failure(e))?
                {
                    TxStatus::Confirmed(receipt) => {
                        info!(tx = %tx, "transaction confirmed on re-query");
                        Ok(receipt)
                    }
                    TxStatus::Pending | TxStatus::Failed(RemoteError::Timeout { .. }) => {
                        self.landed_upgrade(&tx, &call, flow)
                    }
                    TxStatus::Failed(err) => Err(flow.failure(err)),
                }
            }
            Err(err) => Err(flow.failure(err)),
        }
    }

    /// An unconfirmed upgrade may still have landed. The proxy pointer
    /// settles it; any other call stays unknown.
    fn landed_upgrade(
        &self,
        tx: &TxHandle,
        call: &Call,
        flow: Flow<'_>,
    ) -> DeployerResult<Receipt> {
        if let Call::UpgradeProxy { proxy, logic, .. } = call {
            match self.remote.query(proxy, Accessor::Implementation) {
                Ok(current) if &current == logic => {
                    info!(tx = %tx, %proxy, %logic, "proxy already points at the new logic");
                    return Ok(Receipt {
                        tx: tx.id.clone(),
                        contract: None,
                    });
                }
                Ok(current) => debug!(tx = %tx, %proxy, %current, "pointer has not moved"),
                Err(err) => warn!(tx = %tx, %proxy, %err, "cannot read proxy pointer"),
            }
        }
        Err(DeployerError::ConfirmationTimeout {
            tx: tx.id.clone(),
            target: flow.target(),
            timeout_secs: self.confirmation_timeout.as_secs(),
        })
    }

    /// Address of a deployed instance of `logic`, deploying one if needed.
    fn logic_address(
        &self,
        network: &str,
        logic: &LogicHandle,
        flow: Flow<'_>,
    ) -> DeployerResult<Address> {
        if let Some(existing) = self.manifest.implementation(network, &logic.hash)? {
            let live = self
                .remote
                .contract_exists(&existing.address)
                .map_err(|e| flow.failure(e))?;
            if live {
                debug!(hash = %logic.hash, address = %existing.address, "reusing deployed logic");
                return Ok(existing.address);
            }
            warn!(
                hash = %logic.hash,
                address = %existing.address,
                "cached logic is gone from the network, installing again"
            );
        }

        let receipt = self.execute(
            Call::InstallLogic {
                artifact: logic.artifact.clone(),
                hash: logic.hash.clone(),
            },
            flow,
        )?;
        let address = receipt
            .contract
            .ok_or_else(|| flow.failed("logic deployment returned no address".to_owned()))?;
        self.manifest
            .record_implementation(network, &logic.hash, &address)?;
        Ok(address)
    }

    fn verify_pointer(
        &self,
        proxy: &Address,
        expected: &Address,
        flow: Flow<'_>,
    ) -> DeployerResult<()> {
        let actual = self
            .remote
            .query(proxy, Accessor::Implementation)
            .map_err(|e| flow.failure(e))?;
        if &actual != expected {
            return Err(flow.failed(format!(
                "proxy {proxy} points at {actual} after confirmation, expected {expected}"
            )));
        }
        Ok(())
    }

    fn read_proxy(&self, proxy: &Address, accessor: Accessor) -> DeployerResult<Address> {
        self.remote.query(proxy, accessor).map_err(|err| match err {
            RemoteError::MissingAccessor { reason, .. } | RemoteError::Rejected(reason) => {
                DeployerError::Reconcile {
                    address: proxy.clone(),
                    reason,
                }
            }
            other => DeployerError::Remote(other),
        })
    }
}

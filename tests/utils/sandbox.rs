//! Remote client that executes deployer calls against a soroban test `Env`.
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt::Debug;
use std::time::Duration;

use middleware_deployer::remote::{
    Accessor, Call, Receipt, RemoteClient, RemoteError, RemoteResult, TxHandle, TxStatus,
};
use middleware_deployer::{Address, MiddlewareArgs};
use soroban_sdk::testutils::Address as _;
use soroban_sdk::{
    contract, contractimpl, symbol_short, Address as ContractAddress, Env, InvokeError, Symbol,
};
use upgradeable_proxy::{MiddlewareConfig, ProxyError, UpgradeableProxy, UpgradeableProxyClient};

/// Stand-in for the middleware logic the proxy points at.
#[contract]
pub struct MiddlewareLogic;

#[contractimpl]
impl MiddlewareLogic {
    pub fn name(_env: Env) -> Symbol {
        symbol_short!("mw")
    }
}

/// How the next submitted transaction behaves.
#[derive(Clone, Copy, PartialEq, Eq)]
enum NextTx {
    Normal,
    /// Applied on chain, but the confirmation wait times out.
    Stall,
    /// Applied on chain, but no confirmation ever arrives.
    Unconfirmed,
    /// Never reaches the chain; status stays pending.
    Drop,
}

enum SandboxTx {
    Settled(RemoteResult<Receipt>),
    Stalled(RemoteResult<Receipt>),
    Unconfirmed,
    Dropped,
}

type TryResult<T, C> = Result<Result<T, C>, Result<ProxyError, InvokeError>>;

pub struct SandboxRemote {
    env: Env,
    book: RefCell<Vec<(Address, ContractAddress)>>,
    signer: RefCell<ContractAddress>,
    txs: RefCell<HashMap<String, SandboxTx>>,
    next: Cell<NextTx>,
    submissions: Cell<usize>,
}

impl Default for SandboxRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxRemote {
    pub fn new() -> Self {
        let env = Env::default();
        env.mock_all_auths();
        let signer = ContractAddress::generate(&env);
        Self {
            env,
            book: RefCell::new(Vec::new()),
            signer: RefCell::new(signer),
            txs: RefCell::new(HashMap::new()),
            next: Cell::new(NextTx::Normal),
            submissions: Cell::new(0),
        }
    }

    /// Number of transactions submitted so far.
    pub fn submissions(&self) -> usize {
        self.submissions.get()
    }

    /// Sign from now on with a fresh account that is nobody's admin.
    pub fn impersonate_stranger(&self) -> Address {
        let stranger = ContractAddress::generate(&self.env);
        *self.signer.borrow_mut() = stranger.clone();
        self.label(&stranger, 'G')
    }

    pub fn stall_next_confirmation(&self) {
        self.next.set(NextTx::Stall);
    }

    pub fn lose_next_confirmation(&self) {
        self.next.set(NextTx::Unconfirmed);
    }

    pub fn drop_next_transaction(&self) {
        self.next.set(NextTx::Drop);
    }

    /// Deploy and initialize a proxy outside of any deployer flow.
    pub fn seed_proxy(&self) -> (Address, Address) {
        let logic = self.env.register_contract(None, MiddlewareLogic);
        let proxy = self.env.register_contract(None, UpgradeableProxy);
        let admin = self.signer.borrow().clone();
        self.label(&admin, 'G');
        UpgradeableProxyClient::new(&self.env, &proxy).init(
            &admin,
            &logic,
            &self.config(&crate::utils::middleware_args()),
        );
        (self.label(&proxy, 'C'), self.label(&logic, 'C'))
    }

    /// A proxy contract that was never initialized.
    pub fn seed_uninitialized_proxy(&self) -> Address {
        let proxy = self.env.register_contract(None, UpgradeableProxy);
        self.label(&proxy, 'C')
    }

    /// Move the pointer of `proxy` to fresh logic behind the deployer's back.
    pub fn upgrade_out_of_band(&self, proxy: &Address) -> Address {
        let proxy = self.lookup(proxy).expect("unknown proxy");
        let client = UpgradeableProxyClient::new(&self.env, &proxy);
        let logic = self.env.register_contract(None, MiddlewareLogic);
        client.upgrade(&client.admin(), &logic);
        self.label(&logic, 'C')
    }

    /// Upgrade counter stored in the proxy.
    pub fn proxy_version(&self, proxy: &Address) -> u32 {
        let proxy = self.lookup(proxy).expect("unknown proxy");
        UpgradeableProxyClient::new(&self.env, &proxy).version()
    }

    fn label(&self, address: &ContractAddress, prefix: char) -> Address {
        let mut book = self.book.borrow_mut();
        if let Some((label, _)) = book.iter().find(|(_, known)| known == address) {
            return label.clone();
        }
        let label = Address::new(format!("{prefix}SANDBOX{:04}", book.len() + 1));
        book.push((label.clone(), address.clone()));
        label
    }

    fn lookup(&self, label: &Address) -> Option<ContractAddress> {
        self.book
            .borrow()
            .iter()
            .find(|(known, _)| known == label)
            .map(|(_, address)| address.clone())
    }

    /// Caller-supplied addresses the sandbox has not seen get a fresh account.
    fn lookup_or_generate(&self, label: &Address) -> ContractAddress {
        if let Some(address) = self.lookup(label) {
            return address;
        }
        let address = ContractAddress::generate(&self.env);
        self.book.borrow_mut().push((label.clone(), address.clone()));
        address
    }

    fn config(&self, args: &MiddlewareArgs) -> MiddlewareConfig {
        MiddlewareConfig {
            network: self.lookup_or_generate(&args.network),
            operator_registry: self.lookup_or_generate(&args.operator_registry),
            vault_factory: self.lookup_or_generate(&args.vault_factory),
            operator_net_opt_in: self.lookup_or_generate(&args.operator_net_opt_in),
            epoch_duration: args.epoch_duration,
            slashing_window: args.slashing_window,
        }
    }

    fn settle<T, C: Debug>(result: TryResult<T, C>) -> RemoteResult<T> {
        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(RemoteError::Transport(format!("{err:?}"))),
            Err(Ok(ProxyError::Unauthorized)) => Err(RemoteError::Unauthorized(format!(
                "Error(Contract, #{})",
                ProxyError::Unauthorized as u32
            ))),
            Err(Ok(err)) => Err(RemoteError::Rejected(format!(
                "Error(Contract, #{})",
                err as u32
            ))),
            Err(Err(err)) => Err(RemoteError::Rejected(format!("{err:?}"))),
        }
    }

    fn apply(&self, id: &str, call: &Call) -> RemoteResult<Receipt> {
        let contract = match call {
            Call::InstallLogic { .. } => {
                let logic = self.env.register_contract(None, MiddlewareLogic);
                Some(self.label(&logic, 'C'))
            }
            Call::DeployProxy { logic, admin, args } => {
                let logic = self.lookup_or_generate(logic);
                let admin = self.lookup_or_generate(admin);
                let config = self.config(args);
                let proxy = self.env.register_contract(None, UpgradeableProxy);
                Self::settle(
                    UpgradeableProxyClient::new(&self.env, &proxy)
                        .try_init(&admin, &logic, &config),
                )?;
                Some(self.label(&proxy, 'C'))
            }
            Call::UpgradeProxy {
                proxy,
                logic,
                caller,
            } => {
                let proxy = self
                    .lookup(proxy)
                    .ok_or_else(|| RemoteError::Rejected(format!("no contract at {proxy}")))?;
                let logic = self.lookup_or_generate(logic);
                let caller = self.lookup_or_generate(caller);
                Self::settle(
                    UpgradeableProxyClient::new(&self.env, &proxy).try_upgrade(&caller, &logic),
                )?;
                None
            }
        };
        Ok(Receipt {
            tx: id.to_owned(),
            contract,
        })
    }
}

impl RemoteClient for SandboxRemote {
    fn signer(&self) -> RemoteResult<Address> {
        let signer = self.signer.borrow().clone();
        Ok(self.label(&signer, 'G'))
    }

    fn submit_transaction(&self, call: Call) -> RemoteResult<TxHandle> {
        let n = self.submissions.get() + 1;
        self.submissions.set(n);
        let id = format!("sandbox-tx-{n}");

        let tx = match self.next.replace(NextTx::Normal) {
            NextTx::Normal => SandboxTx::Settled(self.apply(&id, &call)),
            NextTx::Stall => SandboxTx::Stalled(self.apply(&id, &call)),
            NextTx::Unconfirmed => {
                let _ = self.apply(&id, &call);
                SandboxTx::Unconfirmed
            }
            NextTx::Drop => SandboxTx::Dropped,
        };
        self.txs.borrow_mut().insert(id.clone(), tx);
        Ok(TxHandle {
            id,
            call: call.label(),
        })
    }

    fn wait_for_confirmation(&self, tx: &TxHandle, timeout: Duration) -> RemoteResult<Receipt> {
        match self.txs.borrow().get(&tx.id) {
            Some(SandboxTx::Settled(result)) => result.clone(),
            Some(SandboxTx::Stalled(_) | SandboxTx::Unconfirmed | SandboxTx::Dropped) => {
                Err(RemoteError::Timeout {
                    tx: tx.id.clone(),
                    waited: timeout,
                })
            }
            None => Err(RemoteError::UnknownTransaction(tx.id.clone())),
        }
    }

    fn transaction_status(&self, tx: &TxHandle) -> RemoteResult<TxStatus> {
        match self.txs.borrow().get(&tx.id) {
            Some(SandboxTx::Settled(result) | SandboxTx::Stalled(result)) => Ok(match result {
                Ok(receipt) => TxStatus::Confirmed(receipt.clone()),
                Err(err) => TxStatus::Failed(err.clone()),
            }),
            Some(SandboxTx::Unconfirmed | SandboxTx::Dropped) => Ok(TxStatus::Pending),
            None => Err(RemoteError::UnknownTransaction(tx.id.clone())),
        }
    }

    fn query(&self, address: &Address, accessor: Accessor) -> RemoteResult<Address> {
        let missing = |reason: String| RemoteError::MissingAccessor {
            address: address.clone(),
            accessor: accessor.function(),
            reason,
        };
        let contract = self
            .lookup(address)
            .ok_or_else(|| missing("no contract at this address".to_owned()))?;
        let client = UpgradeableProxyClient::new(&self.env, &contract);
        let result = match accessor {
            Accessor::Implementation => Self::settle(client.try_implementation()),
            Accessor::Admin => Self::settle(client.try_admin()),
        };
        match result {
            Ok(value) => Ok(self.label(&value, 'C')),
            Err(RemoteError::Rejected(reason) | RemoteError::Unauthorized(reason)) => {
                Err(missing(reason))
            }
            Err(err) => Err(err),
        }
    }

    fn contract_exists(&self, address: &Address) -> RemoteResult<bool> {
        Ok(self.lookup(address).is_some())
    }
}

//! Remote client driving the Stellar CLI.
//!
//! Each transaction runs on its own worker thread; the result comes back
//! over a channel so the orchestrator can wait with a deadline and later
//! re-query without resubmitting.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::sync::{LazyLock, Mutex, MutexGuard, OnceLock};
use std::thread;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::DeployerConfig;
use crate::error::{DeployerError, DeployerResult};
use crate::types::Address;

use super::{Accessor, Call, Receipt, RemoteClient, RemoteError, RemoteResult, TxHandle, TxStatus};

/// Proxy contract error code for an uninitialized proxy.
pub const PROXY_NOT_INITIALIZED: u32 = 2;

/// Proxy contract error code for a caller that is not the admin.
pub const PROXY_UNAUTHORIZED: u32 = 3;

/// Environment variable the CLI reads the source account from.
const SOURCE_ACCOUNT_ENV: &str = "SOROBAN_ACCOUNT";

/// Identity name or secret key of the signing account.
///
/// Only ever handed to the child process through its environment.
#[derive(Clone)]
pub struct SigningCredential(String);

impl SigningCredential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Raw `S...` secret seed rather than a CLI identity name.
    pub fn is_secret_key(&self) -> bool {
        self.0.len() == 56 && self.0.starts_with('S')
    }
}

impl fmt::Debug for SigningCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningCredential(<redacted>)")
    }
}

#[derive(Debug, Clone)]
struct Invoker {
    binary: String,
    network_args: Vec<String>,
    extra_args: Vec<String>,
    credential: SigningCredential,
}

impl Invoker {
    /// Run one CLI command and return its trimmed stdout.
    fn run(&self, args: &[String]) -> RemoteResult<String> {
        debug!(binary = %self.binary, args = %args.join(" "), "running stellar cli");
        let output = Command::new(&self.binary)
            .args(args)
            .env(SOURCE_ACCOUNT_ENV, &self.credential.0)
            .output()
            .map_err(|e| RemoteError::Transport(format!("cannot run {}: {e}", self.binary)))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(classify(&stderr, &output.status.to_string()))
    }

    fn contract_args(&self, subcommand: &str) -> Vec<String> {
        let mut args = vec!["contract".to_owned(), subcommand.to_owned()];
        args.extend(self.network_args.iter().cloned());
        args.extend(self.extra_args.iter().cloned());
        args
    }

    fn deploy(&self, wasm: &Path) -> RemoteResult<Address> {
        let mut args = self.contract_args("deploy");
        args.push("--wasm".to_owned());
        args.push(wasm.display().to_string());
        parse_address(&self.run(&args)?)
    }

    fn invoke(
        &self,
        contract: &Address,
        function: &str,
        fn_args: &[(&str, String)],
        view: bool,
    ) -> RemoteResult<String> {
        let mut args = self.contract_args("invoke");
        args.push("--id".to_owned());
        args.push(contract.to_string());
        if view {
            args.push("--is-view".to_owned());
        }
        args.push("--".to_owned());
        args.push(function.to_owned());
        for (name, value) in fn_args {
            args.push(format!("--{name}"));
            args.push(value.clone());
        }
        self.run(&args)
    }

    fn execute(&self, tx: &str, call: &Call, proxy_wasm: &Path) -> RemoteResult<Receipt> {
        self.apply(tx, call, proxy_wasm).map_err(|err| match err {
            RemoteError::Timeout { waited, .. } => RemoteError::Timeout {
                tx: tx.to_owned(),
                waited,
            },
            other => other,
        })
    }

    fn apply(&self, tx: &str, call: &Call, proxy_wasm: &Path) -> RemoteResult<Receipt> {
        match call {
            Call::InstallLogic { artifact, hash } => {
                let logic = self.deploy(artifact)?;
                info!(%logic, %hash, tx, "logic deployed");
                Ok(Receipt {
                    tx: tx.to_owned(),
                    contract: Some(logic),
                })
            }
            Call::DeployProxy { logic, admin, args } => {
                let proxy = self.deploy(proxy_wasm)?;
                let config = serde_json::to_string(args)
                    .map_err(|e| RemoteError::Transport(format!("encode init config: {e}")))?;
                self.invoke(
                    &proxy,
                    "init",
                    &[
                        ("admin", admin.to_string()),
                        ("implementation", logic.to_string()),
                        ("config", config),
                    ],
                    false,
                )
                .map_err(|err| uninitialized_proxy(&proxy, err))?;
                info!(%proxy, %logic, tx, "proxy deployed");
                Ok(Receipt {
                    tx: tx.to_owned(),
                    contract: Some(proxy),
                })
            }
            Call::UpgradeProxy {
                proxy,
                logic,
                caller,
            } => {
                let version = self.invoke(
                    proxy,
                    "upgrade",
                    &[
                        ("caller", caller.to_string()),
                        ("new_implementation", logic.to_string()),
                    ],
                    false,
                )?;
                info!(%proxy, %logic, %version, tx, "proxy upgraded");
                Ok(Receipt {
                    tx: tx.to_owned(),
                    contract: None,
                })
            }
        }
    }
}

/// The proxy exists on chain but `init` failed; keep its address in the error.
fn uninitialized_proxy(proxy: &Address, err: RemoteError) -> RemoteError {
    match err {
        RemoteError::Unauthorized(reason) => {
            RemoteError::Unauthorized(format!("init of proxy {proxy} refused: {reason}"))
        }
        RemoteError::Rejected(reason) => {
            RemoteError::Rejected(format!("proxy {proxy} deployed but init failed: {reason}"))
        }
        other => other,
    }
}

struct Job {
    rx: Receiver<RemoteResult<Receipt>>,
    settled: Option<RemoteResult<Receipt>>,
}

impl Job {
    fn settle(&mut self, result: RemoteResult<Receipt>) -> RemoteResult<Receipt> {
        self.settled = Some(result.clone());
        result
    }
}

/// [`RemoteClient`] backed by the `soroban`/`stellar` command line tool.
pub struct StellarCli {
    invoker: Invoker,
    proxy_wasm: PathBuf,
    signer: OnceLock<Address>,
    jobs: Mutex<HashMap<String, Job>>,
}

impl fmt::Debug for StellarCli {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StellarCli")
            .field("invoker", &self.invoker)
            .field("proxy_wasm", &self.proxy_wasm)
            .finish_non_exhaustive()
    }
}

impl StellarCli {
    /// Client for a network known to the CLI by name.
    pub fn new(
        binary: impl Into<String>,
        network: &str,
        credential: SigningCredential,
        proxy_wasm: impl Into<PathBuf>,
    ) -> Self {
        Self::with_network_args(
            binary,
            vec!["--network".to_owned(), network.to_owned()],
            credential,
            proxy_wasm,
        )
    }

    fn with_network_args(
        binary: impl Into<String>,
        network_args: Vec<String>,
        credential: SigningCredential,
        proxy_wasm: impl Into<PathBuf>,
    ) -> Self {
        Self {
            invoker: Invoker {
                binary: binary.into(),
                network_args,
                extra_args: Vec::new(),
                credential,
            },
            proxy_wasm: proxy_wasm.into(),
            signer: OnceLock::new(),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Build a client from configuration.
    ///
    /// An explicit `rpc_url` takes precedence over the network name. A raw
    /// secret key needs `signer.address`, since its public address is never
    /// derived by passing the secret on a command line.
    pub fn from_config(
        config: &DeployerConfig,
        network: &str,
        credential: SigningCredential,
    ) -> DeployerResult<Self> {
        let network_args = match (&config.network.rpc_url, &config.network.network_passphrase) {
            (Some(url), Some(passphrase)) => vec![
                "--rpc-url".to_owned(),
                url.clone(),
                "--network-passphrase".to_owned(),
                passphrase.clone(),
            ],
            (Some(_), None) => {
                return Err(DeployerError::config(
                    "network.rpc_url requires network.network_passphrase",
                ))
            }
            (None, _) => vec!["--network".to_owned(), network.to_owned()],
        };

        if credential.is_secret_key() && config.signer.address.is_none() {
            return Err(DeployerError::config(
                "signer.address must be set when the credential is a secret key",
            ));
        }

        let mut cli = Self::with_network_args(
            config.cli.binary.clone(),
            network_args,
            credential,
            &config.build.proxy_wasm,
        );
        cli.invoker.extra_args = config.cli.extra_args.clone();
        if let Some(address) = &config.signer.address {
            cli = cli.with_signer(address.clone());
        }
        Ok(cli)
    }

    /// Use `address` as the signer instead of asking the CLI.
    #[must_use]
    pub fn with_signer(self, address: Address) -> Self {
        let _ = self.signer.set(address);
        self
    }

    fn jobs(&self) -> RemoteResult<MutexGuard<'_, HashMap<String, Job>>> {
        self.jobs
            .lock()
            .map_err(|_| RemoteError::Transport("job table poisoned".to_owned()))
    }

    fn take_job(&self, tx: &TxHandle) -> RemoteResult<Job> {
        self.jobs()?
            .remove(&tx.id)
            .ok_or_else(|| RemoteError::UnknownTransaction(tx.id.clone()))
    }

    fn put_job(&self, tx: &TxHandle, job: Job) -> RemoteResult<()> {
        self.jobs()?.insert(tx.id.clone(), job);
        Ok(())
    }
}

impl RemoteClient for StellarCli {
    fn signer(&self) -> RemoteResult<Address> {
        if let Some(address) = self.signer.get() {
            return Ok(address.clone());
        }
        let args = [
            "keys".to_owned(),
            "address".to_owned(),
            self.invoker.credential.0.clone(),
        ];
        let address = parse_address(&self.invoker.run(&args)?)?;
        Ok(self.signer.get_or_init(|| address).clone())
    }

    fn submit_transaction(&self, call: Call) -> RemoteResult<TxHandle> {
        let handle = TxHandle {
            id: Uuid::new_v4().to_string(),
            call: call.label(),
        };
        let (tx, rx) = mpsc::channel();
        let invoker = self.invoker.clone();
        let proxy_wasm = self.proxy_wasm.clone();
        let id = handle.id.clone();

        thread::Builder::new()
            .name(format!("tx-{}", call.label()))
            .spawn(move || {
                let _ = tx.send(invoker.execute(&id, &call, &proxy_wasm));
            })
            .map_err(|e| RemoteError::Transport(format!("cannot start worker: {e}")))?;

        self.put_job(&handle, Job { rx, settled: None })?;
        debug!(tx = %handle, "transaction submitted");
        Ok(handle)
    }

    fn wait_for_confirmation(&self, tx: &TxHandle, timeout: Duration) -> RemoteResult<Receipt> {
        let mut job = self.take_job(tx)?;
        let result = match job.settled.clone() {
            Some(result) => result,
            None => match job.rx.recv_timeout(timeout) {
                Ok(result) => job.settle(result),
                Err(RecvTimeoutError::Timeout) => Err(RemoteError::Timeout {
                    tx: tx.id.clone(),
                    waited: timeout,
                }),
                Err(RecvTimeoutError::Disconnected) => job.settle(Err(RemoteError::Transport(
                    "transaction worker exited without a result".to_owned(),
                ))),
            },
        };
        self.put_job(tx, job)?;
        result
    }

    fn transaction_status(&self, tx: &TxHandle) -> RemoteResult<TxStatus> {
        let mut job = self.take_job(tx)?;
        let result = match job.settled.clone() {
            Some(result) => Some(result),
            None => match job.rx.try_recv() {
                Ok(result) => Some(job.settle(result)),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => Some(job.settle(Err(RemoteError::Transport(
                    "transaction worker exited without a result".to_owned(),
                )))),
            },
        };
        self.put_job(tx, job)?;

        Ok(match result {
            // A CLI-side timeout says nothing about whether the transaction landed.
            None | Some(Err(RemoteError::Timeout { .. })) => TxStatus::Pending,
            Some(Ok(receipt)) => TxStatus::Confirmed(receipt),
            Some(Err(err)) => TxStatus::Failed(err),
        })
    }

    fn query(&self, address: &Address, accessor: Accessor) -> RemoteResult<Address> {
        let output = self
            .invoker
            .invoke(address, accessor.function(), &[], true)
            .map_err(|err| match err {
                RemoteError::Rejected(reason) | RemoteError::Unauthorized(reason) => {
                    if is_missing_accessor(&reason) {
                        RemoteError::MissingAccessor {
                            address: address.clone(),
                            accessor: accessor.function(),
                            reason,
                        }
                    } else {
                        RemoteError::Transport(reason)
                    }
                }
                other => other,
            })?;
        parse_address(&output)
    }

    fn contract_exists(&self, address: &Address) -> RemoteResult<bool> {
        let mut args = self.invoker.contract_args("fetch");
        args.push("--id".to_owned());
        args.push(address.to_string());
        match self.invoker.run(&args) {
            Ok(_) => Ok(true),
            Err(RemoteError::Rejected(reason) | RemoteError::Unauthorized(reason))
                if is_missing_contract(&reason) =>
            {
                debug!(%address, %reason, "contract not found");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}

/// CLI output is either a bare strkey or a JSON string.
fn parse_address(stdout: &str) -> RemoteResult<Address> {
    let line = stdout.lines().last().unwrap_or_default().trim();
    let value = serde_json::from_str::<String>(line).unwrap_or_else(|_| line.to_owned());
    if value.is_empty() {
        return Err(RemoteError::Transport("empty response from cli".to_owned()));
    }
    value
        .parse()
        .map_err(|_| RemoteError::Transport(format!("unexpected cli output `{value}`")))
}

static CONTRACT_ERROR: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"Error\(Contract, #(\d+)\)").ok());

static MISSING_FUNCTION: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)non-existent contract function|not found in the contract|contract not found|Error\((Storage|WasmVm), MissingValue\)",
    )
    .ok()
});

static MISSING_CONTRACT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)not found|does not exist|Error\(Storage, MissingValue\)").ok()
});

/// The CLI gave up waiting for the network; the transaction may still land.
static CLI_TIMEOUT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)submission timeout|timed out|timeout waiting").ok()
});

/// Contract error code reported in CLI stderr, if any.
pub(crate) fn contract_error_code(stderr: &str) -> Option<u32> {
    CONTRACT_ERROR
        .as_ref()?
        .captures(stderr)
        .and_then(|caps| caps.get(1))
        .and_then(|code| code.as_str().parse().ok())
}

fn is_missing_accessor(message: &str) -> bool {
    contract_error_code(message) == Some(PROXY_NOT_INITIALIZED)
        || MISSING_FUNCTION
            .as_ref()
            .is_some_and(|re| re.is_match(message))
}

fn is_missing_contract(message: &str) -> bool {
    MISSING_CONTRACT
        .as_ref()
        .is_some_and(|re| re.is_match(message))
}

/// Map a failed command's stderr onto a remote error.
///
/// A CLI-side timeout carries no transaction id; the worker fills it in.
pub(crate) fn classify(stderr: &str, status: &str) -> RemoteError {
    let message = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" | ");
    let message = if message.is_empty() {
        format!("cli exited with {status}")
    } else {
        message
    };

    if contract_error_code(&message) == Some(PROXY_UNAUTHORIZED) || message.contains("Error(Auth")
    {
        RemoteError::Unauthorized(message)
    } else if contract_error_code(&message).is_none()
        && CLI_TIMEOUT.as_ref().is_some_and(|re| re.is_match(&message))
    {
        RemoteError::Timeout {
            tx: String::new(),
            waited: Duration::ZERO,
        }
    } else {
        RemoteError::Rejected(message)
    }
}

//! middleware-deployer - deploy and upgrade middleware behind a proxy.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;

use middleware_deployer::config::DEFAULT_CONFIG_FILE;
use middleware_deployer::{
    Address, DeployerConfig, DeployerError, FileManifestStore, ManifestStore, Orchestrator,
    SigningCredential, StellarCli, WasmLogicBuilder,
};

#[derive(Parser)]
#[command(name = "middleware-deployer")]
#[command(about = "Deploy and upgrade middleware behind an upgradeable proxy")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy the logic and a new proxy pointing at it
    Deploy {
        /// Network to deploy to (defaults to network.name)
        #[arg(long)]
        network: Option<String>,

        /// Signing identity or secret key
        #[arg(long, env = "DEPLOY_PRI_KEY", hide_env_values = true)]
        source_account: String,
    },

    /// Point an existing proxy at the current logic
    Upgrade {
        /// Network of the proxy (defaults to network.name)
        #[arg(long)]
        network: Option<String>,

        /// Proxy to upgrade (defaults to the network's only proxy)
        #[arg(long, env = "PROXY")]
        proxy: Option<Address>,

        /// Signing identity or secret key
        #[arg(long, env = "DEPLOY_PRI_KEY", hide_env_values = true)]
        source_account: String,
    },

    /// Rebuild the manifest record of a proxy from the network
    Reconcile {
        /// Network of the proxy (defaults to network.name)
        #[arg(long)]
        network: Option<String>,

        /// Proxy to reconcile
        #[arg(long, env = "PROXY")]
        proxy: Address,

        /// Signing identity or secret key, used for read-only calls
        #[arg(long, env = "DEPLOY_PRI_KEY", hide_env_values = true)]
        source_account: String,
    },

    /// Print the recorded state of a proxy
    Show {
        /// Network of the proxy (defaults to network.name)
        #[arg(long)]
        network: Option<String>,

        /// Proxy to show (defaults to the network's only proxy)
        #[arg(long, env = "PROXY")]
        proxy: Option<Address>,
    },
}

impl Commands {
    fn network(&self) -> Option<&str> {
        match self {
            Self::Deploy { network, .. }
            | Self::Upgrade { network, .. }
            | Self::Reconcile { network, .. }
            | Self::Show { network, .. } => network.as_deref(),
        }
    }
}

type CliOrchestrator = Orchestrator<WasmLogicBuilder, FileManifestStore, StellarCli>;

fn orchestrator(
    config: &DeployerConfig,
    network: &str,
    source_account: &str,
) -> Result<CliOrchestrator, DeployerError> {
    Ok(Orchestrator::new(
        WasmLogicBuilder::from_config(&config.build),
        FileManifestStore::from_config(&config.manifest),
        StellarCli::from_config(config, network, SigningCredential::new(source_account))?,
        config.confirmation.timeout(),
    ))
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("encoding result")?
    );
    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = DeployerConfig::from_file(&cli.config)?;
    let network = cli
        .command
        .network()
        .map(str::to_owned)
        .or_else(|| config.network.name.clone())
        .ok_or_else(|| {
            DeployerError::config("no network given; pass --network or set network.name")
        })?;

    match cli.command {
        Commands::Deploy { source_account, .. } => {
            let args = config.constructor_args()?;
            let outcome =
                orchestrator(&config, &network, &source_account)?.deploy(&network, args)?;
            print_json(&outcome)
        }
        Commands::Upgrade {
            proxy,
            source_account,
            ..
        } => {
            let outcome = orchestrator(&config, &network, &source_account)?
                .upgrade(&network, proxy.as_ref())?;
            print_json(&outcome)
        }
        Commands::Reconcile {
            proxy,
            source_account,
            ..
        } => {
            let record = orchestrator(&config, &network, &source_account)?
                .reconcile(&network, &proxy)?;
            print_json(&record)
        }
        Commands::Show { proxy, .. } => {
            let manifest = FileManifestStore::from_config(&config.manifest);
            let record = manifest
                .resolve_proxy(&network, proxy.as_ref())
                .and_then(|proxy| manifest.load(&network, &proxy))
                .map_err(DeployerError::from)?;
            print_json(&record)
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        match e.downcast_ref::<DeployerError>() {
            Some(err) => {
                let kind = err.kind();
                eprintln!("error[{}]: {err}", kind.label());
                std::process::exit(kind.exit_code());
            }
            None => {
                eprintln!("Error: {e:#}");
                std::process::exit(1);
            }
        }
    }
}

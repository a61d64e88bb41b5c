//! flasharb - multi-DEX flash-loan arbitrage engine for EVM L2 chains.

mod amm;
mod config;
mod detector;
mod engine;
mod events;
mod executor;
mod gas;
mod health;
mod nonce;
mod planner;
mod pools;
mod profit;
mod report;
mod sizer;
mod store;
mod types;

use alloy::network::EthereumWallet;
use alloy::primitives::{I256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use clap::{Parser, Subcommand};
use eyre::{Result, WrapErr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const EXIT_OK: i32 = 0;
const EXIT_CONFIG: i32 = 1;
const EXIT_RPC: i32 = 2;
const EXIT_SIGINT: i32 = 130;

#[derive(Parser, Debug)]
#[command(name = "flasharb")]
#[command(about = "Multi-DEX flash-loan arbitrage engine for EVM L2 chains")]
struct Cli {
    /// Chain id to operate on
    #[arg(long, global = true, default_value_t = 42161)]
    chain: u64,

    /// Alternate .env-style file to load before reading the environment
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the polling/detection/execution pipeline (default)
    Run {
        /// Force dry-run regardless of config or environment
        #[arg(long)]
        dry_run: bool,
    },
    /// Print ledger stats and the most recent outcomes
    Report {
        /// Number of outcomes to list
        #[arg(long, default_value_t = 20)]
        last: usize,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match &cli.config {
        Some(path) => {
            if dotenvy::from_path(path).is_err() {
                eprintln!("could not read config file {path:?}");
                std::process::exit(EXIT_CONFIG);
            }
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    let filter = std::env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| EnvFilter::from_default_env().add_directive("info".parse().unwrap()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let code = match cli.command {
        Some(Command::Report { last }) => run_report(cli.chain, last),
        Some(Command::Run { dry_run }) => run_engine(cli.chain, dry_run).await,
        None => run_engine(cli.chain, false).await,
    };
    std::process::exit(code);
}

fn run_report(chain_id: u64, last: usize) -> i32 {
    let cfg = match config::load_chain_config(chain_id) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "configuration error");
            return EXIT_CONFIG;
        }
    };
    match store::TradeStore::load_readonly(&cfg.trade_store_path) {
        Ok(outcomes) => {
            print!("{}", report::render(&outcomes, last));
            EXIT_OK
        }
        Err(e) => {
            error!(error = %e, path = %cfg.trade_store_path, "cannot read trade ledger");
            EXIT_CONFIG
        }
    }
}

async fn run_engine(chain_id: u64, force_dry_run: bool) -> i32 {
    // Configuration stage: every failure here is exit code 1, before any
    // network I/O.
    let mut cfg = match config::load_chain_config(chain_id) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "configuration error");
            return EXIT_CONFIG;
        }
    };
    if let Err(e) = cfg.apply_env_overrides() {
        error!(error = %e, "configuration error");
        return EXIT_CONFIG;
    }
    if force_dry_run {
        cfg.dry_run = true;
    }

    let signer = match load_signer(cfg.dry_run) {
        Ok(signer) => signer,
        Err(e) => {
            error!(error = %e, "configuration error");
            return EXIT_CONFIG;
        }
    };
    let wallet_address = signer.address();
    let wallet = EthereumWallet::from(signer);

    let rpc_url = match cfg.rpc_url.parse() {
        Ok(url) => url,
        Err(e) => {
            error!(error = %e, url = %cfg.rpc_url, "invalid RPC URL");
            return EXIT_CONFIG;
        }
    };
    let provider = ProviderBuilder::new().wallet(wallet).connect_http(rpc_url);

    // Startup network stage: unreachable or mismatched RPC is exit code 2.
    if let Err(e) = health::verify_node_ready(&provider, cfg.chain_id).await {
        error!(error = %e, "RPC not usable at startup");
        return EXIT_RPC;
    }
    match provider.get_balance(wallet_address).await {
        Ok(balance) => info!(
            wallet = %wallet_address,
            balance = %report::format_wei(balance),
            dry_run = cfg.dry_run,
            "wallet ready"
        ),
        Err(e) => {
            error!(error = %e, "balance query failed");
            return EXIT_RPC;
        }
    }

    let mut ledger = match nonce::NonceLedger::open(&cfg.nonce_ledger_path) {
        Ok(ledger) => ledger,
        Err(e) => {
            error!(error = %e, "cannot open nonce ledger");
            return EXIT_CONFIG;
        }
    };
    let mut trade_store = match store::TradeStore::open(&cfg.trade_store_path) {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "cannot open trade ledger");
            return EXIT_CONFIG;
        }
    };

    match ledger.reconcile(&provider, wallet_address).await {
        Ok(reconciliation) => {
            if let Err(e) =
                record_reconciled(&provider, &reconciliation, &mut trade_store).await
            {
                error!(error = %e, "recording reconciled outcomes failed");
                return EXIT_CONFIG;
            }
        }
        Err(e) => {
            error!(error = %e, "nonce reconciliation failed");
            return EXIT_RPC;
        }
    }

    let fallback_gas_price = U256::from(cfg.max_gas_price_gwei) * U256::from(1_000_000_000u64);
    let gas_oracle: Box<dyn gas::GasOracle> = if cfg.arbitrum_gas_model {
        Box::new(gas::ArbitrumGasOracle::new(
            provider.clone(),
            config::ARB_NODE_INTERFACE,
            wallet_address,
            cfg.per_step_gas,
            fallback_gas_price,
        ))
    } else {
        Box::new(gas::GenericGasOracle::new(
            provider.clone(),
            wallet_address,
            cfg.per_step_gas,
            fallback_gas_price,
        ))
    };

    let executor_cfg = executor::ExecutorConfig {
        max_staleness_ms: cfg.max_staleness_ms,
        max_block_lag: cfg.max_block_lag,
        max_consecutive_failures: cfg.max_consecutive_failures,
        confirmation_timeout: Duration::from_millis(cfg.confirmation_timeout_ms),
        simulation_timeout: Duration::from_millis(cfg.simulation_timeout_ms),
        dry_run: cfg.dry_run,
    };
    let execution_engine =
        executor::ExecutionEngine::new(provider.clone(), wallet_address, executor_cfg, ledger);

    let (events, _logger) = events::spawn_event_logger();

    let resume_requested = Arc::new(AtomicBool::new(false));
    spawn_resume_listener(resume_requested.clone());

    let mut pipeline = engine::Pipeline::new(
        cfg,
        provider,
        gas_oracle,
        execution_engine,
        trade_store,
        events,
        resume_requested,
    );

    let interrupted = Arc::new(AtomicBool::new(false));
    let shutdown = {
        let interrupted = interrupted.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupted.store(true, Ordering::SeqCst);
            }
        }
    };

    match pipeline.run(shutdown).await {
        Ok(()) => {
            if interrupted.load(Ordering::SeqCst) {
                EXIT_SIGINT
            } else {
                EXIT_OK
            }
        }
        Err(e) => {
            error!(error = %e, "fatal engine error");
            EXIT_CONFIG
        }
    }
}

/// `PRIVATE_KEY` from the environment. Never logged, never read from files.
/// Dry-run mode synthesizes an ephemeral key so the simulation path works
/// without secrets.
fn load_signer(dry_run: bool) -> Result<PrivateKeySigner> {
    match std::env::var("PRIVATE_KEY") {
        Ok(raw) => raw
            .trim()
            .parse::<PrivateKeySigner>()
            .wrap_err("PRIVATE_KEY is not a valid secp256k1 key"),
        Err(_) if dry_run => {
            warn!("PRIVATE_KEY not set; using an ephemeral signer for dry-run");
            Ok(PrivateKeySigner::random())
        }
        Err(_) => Err(eyre::eyre!("PRIVATE_KEY must be set for live execution")),
    }
}

/// SIGHUP clears the circuit breaker (operator `resume()`).
fn spawn_resume_listener(flag: Arc<AtomicBool>) {
    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let Ok(mut hup) = signal(SignalKind::hangup()) else {
            return;
        };
        while hup.recv().await.is_some() {
            info!("SIGHUP received, scheduling circuit breaker resume");
            flag.store(true, Ordering::SeqCst);
        }
    });
    #[cfg(not(unix))]
    let _ = flag;
}

/// Append outcomes for pending transactions that mined while the process was
/// down. The settlement event is ground truth for profit; a mined
/// replacement or cancellation simply settles with zero gross.
async fn record_reconciled<P: Provider>(
    provider: &P,
    reconciliation: &nonce::Reconciliation,
    trade_store: &mut store::TradeStore,
) -> Result<()> {
    for (nonce, tx_hash) in &reconciliation.mined {
        let Some(receipt) = provider.get_transaction_receipt(*tx_hash).await? else {
            warn!(nonce, %tx_hash, "reconciled entry lost its receipt, skipping");
            continue;
        };

        let gas = U256::from(receipt.gas_used) * U256::from(receipt.effective_gas_price);
        let timestamp = chrono::Utc::now().timestamp_millis();
        let outcome = if receipt.status() {
            let gross = executor::parse_gross_profit(&receipt).unwrap_or(U256::ZERO);
            store::TradeOutcome {
                tx_hash: format!("{tx_hash:?}"),
                timestamp,
                block_number: receipt.block_number.unwrap_or_default(),
                path_label: format!("reconciled:nonce={nonce}"),
                input_amount: U256::ZERO,
                gross_profit: gross,
                gas_cost: gas,
                l1_data_fee: U256::ZERO,
                revert_cost: U256::ZERO,
                net_profit: signed(gross) - signed(gas),
                status: store::TradeStatus::Confirmed,
            }
        } else {
            store::TradeOutcome {
                tx_hash: format!("{tx_hash:?}"),
                timestamp,
                block_number: receipt.block_number.unwrap_or_default(),
                path_label: format!("reconciled:nonce={nonce}"),
                input_amount: U256::ZERO,
                gross_profit: U256::ZERO,
                gas_cost: U256::ZERO,
                l1_data_fee: U256::ZERO,
                revert_cost: gas,
                net_profit: -signed(gas),
                status: store::TradeStatus::Reverted,
            }
        };
        trade_store.append(outcome)?;
        info!(nonce, %tx_hash, "recovered outcome for transaction mined while offline");
    }
    Ok(())
}

fn signed(value: U256) -> I256 {
    I256::try_from(value).unwrap_or(I256::MAX)
}

//! Chain registry and engine parameters.
//!
//! One typed entry per supported chain. Adding a chain means adding a
//! constructor plus a match arm in [`load_chain_config`]. Secrets never live
//! here: `PRIVATE_KEY` is read by `main` and handed straight to the signer.

use crate::pools::{DexKind, PoolDescriptor};
use alloy::primitives::{address, Address, U256};
use eyre::{eyre, Result};
use std::env;
use std::sync::Arc;

/// Arbitrum node interface pseudo-contract for gas estimation.
pub const ARB_NODE_INTERFACE: Address = address!("00000000000000000000000000000000000000C8");

// Arbitrum One addresses
const ARB_AAVE_V3_POOL: Address = address!("794a61358D6845594F94dc1DB02A252b5b4814aD");
const ARB_BALANCER_VAULT: Address = address!("BA12222222228d8Ba445958a75a0704d566BF2C8");
const ARB_UNIV3_ROUTER: Address = address!("68b3465833fb72A70ecDF485E0e4C7bD8665Fc45");
const ARB_SUSHI_ROUTER: Address = address!("1b02dA8Cb0d097eB8D57A175b88c7D8b47997506");

const ARB_WETH: Address = address!("82aF49447D8a07e3bd95BD0d56f35241523fBab1");
const ARB_USDC: Address = address!("FF970A61A04b1cA14834A43f5dE4533eBDDB5CC8");

/// How transactions reach the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MevMode {
    None,
    PrivateRpc,
    BundleRelay,
}

/// Flash-loan provider kinds the executor contract understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashLoanKind {
    BalancerVault,
    AaveV3Pool,
}

/// One provider entry; the list in [`ChainConfig`] is ordered by preference
/// (zero-fee first).
#[derive(Debug, Clone)]
pub struct FlashLoanProvider {
    pub kind: FlashLoanKind,
    pub address: Address,
    pub fee_bps: u32,
    /// Assets this provider can lend on this chain.
    pub supported_assets: Vec<Address>,
}

/// A token known to the registry.
#[derive(Debug, Clone)]
pub struct TokenInfo {
    pub symbol: &'static str,
    pub address: Address,
    pub decimals: u8,
}

/// Full typed configuration for one chain.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: &'static str,
    pub rpc_url: String,
    /// Arbitrum-style chains get the node-interface L1+L2 gas decomposition.
    pub arbitrum_gas_model: bool,
    pub executor: Address,
    pub flash_loan_providers: Vec<FlashLoanProvider>,
    pub tokens: Vec<TokenInfo>,
    pub pools: Vec<Arc<PoolDescriptor>>,
    pub mev_mode: MevMode,

    // Monitor params
    pub poll_interval_ms: u64,
    pub max_retries: u32,

    // Detector params
    pub delta_threshold_bps: u32,
    pub min_profit_threshold_wei: U256,

    // Sizer params
    pub sizer_min_input_wei: U256,
    pub sizer_max_input_wei: U256,
    pub sizer_default_input_wei: U256,
    pub sizer_convergence_wei: U256,
    pub sizer_max_iterations: u32,
    pub sizer_timeout_ms: u64,

    // Cost-model params
    pub adversarial_move_bps: u32,
    /// Extra fee margin applied to variable-fee pools, in percent (50 = +50%).
    pub variable_fee_buffer_pct: u32,
    /// Profit multiple required when a fee-manipulation-risk pool is routed,
    /// in percent (200 = 2x `min_profit_threshold_wei`).
    pub risk_multiplier_pct: u32,

    // Gas params
    pub max_gas_price_gwei: u64,
    pub per_step_gas: u64,
    /// Percent added on top of the oracle gas-limit estimate (25 = x1.25).
    pub gas_limit_buffer_pct: u64,
    pub priority_fee_gwei: u64,

    // Execution params
    pub dry_run: bool,
    pub max_staleness_ms: i64,
    pub max_block_lag: u64,
    pub max_consecutive_failures: u32,
    pub confirmation_timeout_ms: u64,
    pub simulation_timeout_ms: u64,

    // Persistence
    pub trade_store_path: String,
    pub nonce_ledger_path: String,
}

impl ChainConfig {
    /// First provider (by preference order) that lists `token` among its
    /// supported assets.
    pub fn provider_for(&self, token: Address) -> Option<&FlashLoanProvider> {
        self.flash_loan_providers
            .iter()
            .find(|p| p.supported_assets.contains(&token))
    }

    /// Overlay environment variables onto the static entry. Unknown or
    /// malformed values are configuration errors (fatal at startup).
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(url) = env::var("RPC_URL") {
            self.rpc_url = url;
        }
        if let Ok(raw) = env::var("DRY_RUN") {
            self.dry_run = parse_bool(&raw)
                .ok_or_else(|| eyre!("DRY_RUN must be a boolean, got {raw:?}"))?;
        }
        if let Ok(raw) = env::var("MIN_PROFIT_THRESHOLD") {
            self.min_profit_threshold_wei = raw
                .parse::<U256>()
                .map_err(|e| eyre!("MIN_PROFIT_THRESHOLD: {e}"))?;
        }
        if let Ok(raw) = env::var("GAS_PRICE_GWEI") {
            self.max_gas_price_gwei = raw.parse().map_err(|e| eyre!("GAS_PRICE_GWEI: {e}"))?;
        }
        if let Ok(raw) = env::var("POLL_INTERVAL_MS") {
            self.poll_interval_ms = raw.parse().map_err(|e| eyre!("POLL_INTERVAL_MS: {e}"))?;
        }
        if let Ok(raw) = env::var("MAX_STALENESS_MS") {
            self.max_staleness_ms = raw.parse().map_err(|e| eyre!("MAX_STALENESS_MS: {e}"))?;
        }
        if let Ok(raw) = env::var("MAX_BLOCK_LAG") {
            self.max_block_lag = raw.parse().map_err(|e| eyre!("MAX_BLOCK_LAG: {e}"))?;
        }
        Ok(())
    }

    /// Per-pool read timeout: 2x the poll interval, capped at 5 s.
    pub fn pool_read_timeout_ms(&self) -> u64 {
        (self.poll_interval_ms * 2).min(5_000)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

/// Resolve the typed config for `chain_id`.
pub fn load_chain_config(chain_id: u64) -> Result<ChainConfig> {
    match chain_id {
        42161 => Ok(arbitrum_one()),
        421614 => Ok(arbitrum_sepolia()),
        other => Err(eyre!("unsupported chain id {other}")),
    }
}

fn arbitrum_one() -> ChainConfig {
    let weth = TokenInfo {
        symbol: "WETH",
        address: ARB_WETH,
        decimals: 18,
    };
    let usdc = TokenInfo {
        symbol: "USDC.e",
        address: ARB_USDC,
        decimals: 6,
    };

    let pools = vec![
        Arc::new(
            PoolDescriptor::new(
                "uniswap_v3:WETH/USDC:500",
                DexKind::V3,
                address!("C6962004f452bE9203591991D15f6b388e09E8D0"),
                ARB_WETH,
                ARB_USDC,
                18,
                6,
                500,
            )
            .with_router(ARB_UNIV3_ROUTER),
        ),
        Arc::new(
            PoolDescriptor::new(
                "uniswap_v3:WETH/USDC:3000",
                DexKind::V3,
                address!("C31E54c7a869B9FcBEcc14363CF510d1c41fa443"),
                ARB_WETH,
                ARB_USDC,
                18,
                6,
                3000,
            )
            .with_router(ARB_UNIV3_ROUTER),
        ),
        Arc::new(
            PoolDescriptor::new(
                "sushiswap_v2:WETH/USDC",
                DexKind::V2,
                address!("905dfCD5649217c42684f23958568e533C711Aa3"),
                ARB_WETH,
                ARB_USDC,
                18,
                6,
                3000,
            )
            .with_router(ARB_SUSHI_ROUTER),
        ),
    ];

    ChainConfig {
        chain_id: 42161,
        name: "arbitrum-one",
        rpc_url: "https://arb1.arbitrum.io/rpc".to_string(),
        arbitrum_gas_model: true,
        executor: Address::ZERO,
        flash_loan_providers: vec![
            FlashLoanProvider {
                kind: FlashLoanKind::BalancerVault,
                address: ARB_BALANCER_VAULT,
                fee_bps: 0,
                supported_assets: vec![ARB_WETH, ARB_USDC],
            },
            FlashLoanProvider {
                kind: FlashLoanKind::AaveV3Pool,
                address: ARB_AAVE_V3_POOL,
                fee_bps: 5,
                supported_assets: vec![ARB_WETH, ARB_USDC],
            },
        ],
        tokens: vec![weth, usdc],
        pools,
        mev_mode: MevMode::None,

        poll_interval_ms: 1_000,
        max_retries: 3,

        delta_threshold_bps: 10,
        // 0.0005 ETH
        min_profit_threshold_wei: U256::from(500_000_000_000_000u64),

        // 0.01 .. 100 WETH
        sizer_min_input_wei: U256::from(10_000_000_000_000_000u64),
        sizer_max_input_wei: U256::from(100u64) * U256::from(10u64).pow(U256::from(18u8)),
        sizer_default_input_wei: U256::from(10u64).pow(U256::from(18u8)),
        sizer_convergence_wei: U256::from(10u64).pow(U256::from(18u8)),
        sizer_max_iterations: 20,
        sizer_timeout_ms: 100,

        adversarial_move_bps: 10,
        variable_fee_buffer_pct: 50,
        risk_multiplier_pct: 200,

        max_gas_price_gwei: 5,
        per_step_gas: 150_000,
        gas_limit_buffer_pct: 25,
        priority_fee_gwei: 0,

        dry_run: true,
        max_staleness_ms: 2_000,
        max_block_lag: 4,
        max_consecutive_failures: 5,
        confirmation_timeout_ms: 120_000,
        simulation_timeout_ms: 5_000,

        trade_store_path: ".data/trades.jsonl".to_string(),
        nonce_ledger_path: ".data/nonce.jsonl".to_string(),
    }
}

fn arbitrum_sepolia() -> ChainConfig {
    let mut cfg = arbitrum_one();
    cfg.chain_id = 421614;
    cfg.name = "arbitrum-sepolia";
    cfg.rpc_url = "https://sepolia-rollup.arbitrum.io/rpc".to_string();
    // Testnet pools mirror the mainnet set but there is no canonical vault;
    // only Aave's faucet deployment lends here.
    cfg.flash_loan_providers.retain(|p| p.kind == FlashLoanKind::AaveV3Pool);
    cfg
}

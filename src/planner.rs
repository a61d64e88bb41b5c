//! Transaction planning: executor calldata and EIP-1559 envelope.
//!
//! Turns a costed candidate into the exact `executeArbitrage` call the
//! on-chain executor expects, plus the fee-bumped replacement and
//! cancellation transactions used when a submission stalls.

use crate::config::ChainConfig;
use crate::detector::OpportunitySeed;
use crate::gas::GasQuote;
use crate::types::{Candidate, SwapStep};
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::rpc::types::{TransactionInput, TransactionRequest};
use alloy::sol;
use alloy::sol_types::SolCall;
use eyre::{eyre, Result};

sol! {
    #[sol(rpc)]
    #[derive(Debug, PartialEq, Eq)]
    interface IFlashArbExecutor {
        struct Step {
            address adapter;
            address tokenIn;
            address tokenOut;
            uint256 amountIn;
            bytes extraData;
        }

        function executeArbitrage(
            address provider,
            address token,
            uint256 amount,
            Step[] calldata steps
        ) external;

        event ArbitrageExecuted(address indexed token, uint256 input, uint256 profit);

        error InsufficientProfit(uint256 received, uint256 required);
        error AdapterNotApproved(address adapter);
        error EmptySwapSteps();
        error NotAuthorized();
        error ContractPaused();
        error ZeroAddress();
        error ZeroAmount();
    }
}

/// Minimum replacement bump the mempool accepts: +12.5%.
const REPLACEMENT_BUMP_NUM: u128 = 1_125;
const REPLACEMENT_BUMP_DEN: u128 = 1_000;

/// Everything needed to simulate and (later) broadcast one candidate. The
/// nonce is attached at broadcast time, after the submission gates have run.
#[derive(Debug, Clone)]
pub struct PreparedTransaction {
    pub to: Address,
    pub data: Bytes,
    pub chain_id: u64,
    pub gas_limit: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
    pub flash_loan_provider: Address,
    pub flash_loan_token: Address,
    pub flash_loan_amount: U256,
    pub steps: usize,
}

impl PreparedTransaction {
    /// Materialize the request; `from` is the signer, `nonce` is set only at
    /// broadcast.
    pub fn request(&self, from: Address, nonce: Option<u64>) -> TransactionRequest {
        let mut tx = TransactionRequest::default()
            .to(self.to)
            .from(from)
            .input(TransactionInput::new(self.data.clone()))
            .value(U256::ZERO)
            .gas_limit(self.gas_limit)
            .max_fee_per_gas(self.max_fee_per_gas)
            .max_priority_fee_per_gas(self.max_priority_fee_per_gas)
            .with_chain_id(self.chain_id);
        if let Some(nonce) = nonce {
            tx = tx.nonce(nonce);
        }
        tx
    }
}

/// Builds executor transactions from candidates.
pub struct TransactionPlanner {
    executor: Address,
    chain_id: u64,
    priority_fee_wei: u128,
    gas_limit_buffer_pct: u64,
}

impl TransactionPlanner {
    pub fn from_config(cfg: &ChainConfig) -> Self {
        Self {
            executor: cfg.executor,
            chain_id: cfg.chain_id,
            priority_fee_wei: u128::from(cfg.priority_fee_gwei) * 1_000_000_000,
            gas_limit_buffer_pct: cfg.gas_limit_buffer_pct,
        }
    }

    /// Encode the candidate's route as `executeArbitrage` calldata.
    pub fn encode_calldata(&self, candidate: &Candidate) -> Result<Bytes> {
        if candidate.path.is_empty() {
            return Err(eyre!("candidate has no swap steps"));
        }
        let steps: Vec<IFlashArbExecutor::Step> = candidate
            .path
            .iter()
            .map(|s| IFlashArbExecutor::Step {
                adapter: s.adapter,
                tokenIn: s.token_in,
                tokenOut: s.token_out,
                amountIn: s.amount_in,
                extraData: s.extra_data.clone(),
            })
            .collect();

        let call = IFlashArbExecutor::executeArbitrageCall {
            provider: candidate.flash_loan_provider,
            token: candidate.flash_loan_token,
            amount: candidate.input_amount,
            steps,
        };
        Ok(Bytes::from(call.abi_encode()))
    }

    /// Assemble the full EIP-1559 envelope around the encoded route.
    ///
    /// `max_fee = 2 * base_fee + priority_fee`; the gas limit is the oracle
    /// estimate plus the configured safety margin.
    pub fn plan(
        &self,
        candidate: &Candidate,
        base_fee_wei: u128,
        gas: &GasQuote,
    ) -> Result<PreparedTransaction> {
        if self.executor == Address::ZERO {
            return Err(eyre!("executor address not configured"));
        }
        let data = self.encode_calldata(candidate)?;
        let gas_limit = gas.total_gas * (100 + self.gas_limit_buffer_pct) / 100;

        Ok(PreparedTransaction {
            to: self.executor,
            data,
            chain_id: self.chain_id,
            gas_limit,
            max_fee_per_gas: 2 * base_fee_wei + self.priority_fee_wei,
            max_priority_fee_per_gas: self.priority_fee_wei,
            flash_loan_provider: candidate.flash_loan_provider,
            flash_loan_token: candidate.flash_loan_token,
            flash_loan_amount: candidate.input_amount,
            steps: candidate.path.len(),
        })
    }

    /// Replacement for a stalled submission: same payload and nonce, fees
    /// bumped past the relay minimum.
    pub fn build_speed_up(
        &self,
        original: &PreparedTransaction,
        from: Address,
        nonce: u64,
    ) -> TransactionRequest {
        let mut bumped = original.clone();
        bumped.max_fee_per_gas = bump_fee(original.max_fee_per_gas);
        bumped.max_priority_fee_per_gas = bump_fee(original.max_priority_fee_per_gas);
        bumped.request(from, Some(nonce))
    }

    /// Cancellation: a zero-value self-transfer burning the stalled nonce.
    pub fn build_cancellation(
        &self,
        original: &PreparedTransaction,
        from: Address,
        nonce: u64,
    ) -> TransactionRequest {
        TransactionRequest::default()
            .to(from)
            .from(from)
            .value(U256::ZERO)
            .gas_limit(21_000)
            .max_fee_per_gas(bump_fee(original.max_fee_per_gas))
            .max_priority_fee_per_gas(bump_fee(original.max_priority_fee_per_gas))
            .with_chain_id(self.chain_id)
            .nonce(nonce)
    }
}

fn bump_fee(fee: u128) -> u128 {
    let bumped = (fee * REPLACEMENT_BUMP_NUM).div_ceil(REPLACEMENT_BUMP_DEN);
    // A zero priority fee still needs a nonzero bump to replace.
    bumped.max(fee + 1)
}

/// Build the ordered swap steps for a two-leg route: sell the borrowed base
/// into the rich leg, buy it back on the cheap leg. The first step carries
/// the borrowed amount; later steps spend the running balance.
pub fn build_swap_steps(seed: &OpportunitySeed, input_amount: U256) -> Vec<SwapStep> {
    let (base, quote) = seed.pair;
    let sell = &seed.sell.descriptor;
    let buy = &seed.buy.descriptor;

    vec![
        SwapStep {
            adapter: sell.router.unwrap_or(sell.address),
            token_in: base,
            token_out: quote,
            amount_in: input_amount,
            extra_data: encode_extra_data(sell.dex, sell.fee_ppm, &[base, quote]),
        },
        SwapStep {
            adapter: buy.router.unwrap_or(buy.address),
            token_in: quote,
            token_out: base,
            amount_in: U256::ZERO,
            extra_data: encode_extra_data(buy.dex, buy.fee_ppm, &[quote, base]),
        },
    ]
}

/// Adapter payload per pool family:
/// - V3: the fee tier as a 24-bit big-endian integer, right-padded to 32 bytes
/// - V2: empty
/// - LB: `bin_step` (u16) followed by the packed hop tokens
pub fn encode_extra_data(
    dex: crate::pools::DexKind,
    fee_or_bin_step: u32,
    path_tokens: &[Address],
) -> Bytes {
    use crate::pools::DexKind;
    match dex {
        DexKind::V2 => Bytes::new(),
        DexKind::V3 => {
            let mut word = [0u8; 32];
            let fee = fee_or_bin_step & 0x00FF_FFFF;
            word[0] = (fee >> 16) as u8;
            word[1] = (fee >> 8) as u8;
            word[2] = fee as u8;
            Bytes::from(word.to_vec())
        }
        DexKind::LiquidityBook => {
            let bin_step = (fee_or_bin_step & 0xFFFF) as u16;
            let mut packed = Vec::with_capacity(2 + 20 * path_tokens.len());
            packed.extend_from_slice(&bin_step.to_be_bytes());
            for token in path_tokens {
                packed.extend_from_slice(token.as_slice());
            }
            Bytes::from(packed)
        }
    }
}

/// Topic hash of the executor's settlement event, used by the execution
/// engine to recover ground-truth profit from receipts.
pub fn arbitrage_executed_topic() -> B256 {
    use alloy::sol_types::SolEvent;
    IFlashArbExecutor::ArbitrageExecuted::SIGNATURE_HASH
}

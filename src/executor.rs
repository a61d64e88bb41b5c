//! Execution engine: gate chain, simulation, submission, observation.
//!
//! Every candidate passes the same ordered gates: circuit breaker, eth_call
//! simulation, staleness, dry-run, then nonce-and-broadcast. Each gate that
//! fires converts the candidate into a typed [`ExecutionResult`]; nothing in
//! this module raises across the orchestrator boundary except invariant
//! violations, which are genuinely fatal.

use crate::nonce::{NonceLedger, PendingState};
use crate::planner::{arbitrage_executed_topic, IFlashArbExecutor, PreparedTransaction};
use crate::types::Candidate;
use alloy::consensus::TxReceipt;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::Provider;
use alloy::rpc::types::TransactionReceipt;
use alloy::sol_types::{SolError, SolEvent, SolInterface};
use eyre::{eyre, Result};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Decoded revert cause, matched against the executor's error ABI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevertReason {
    InsufficientProfit { received: U256, required: U256 },
    AdapterNotApproved(Address),
    EmptySwapSteps,
    NotAuthorized,
    ContractPaused,
    ZeroAddress,
    ZeroAmount,
    /// Solidity `Panic(uint256)`.
    Panic(U256),
    /// Standard `Error(string)`.
    Message(String),
    /// Undecodable revert payload, kept raw.
    Raw(Bytes),
    /// The simulation RPC timed out.
    Timeout,
    /// Mined with status 0; the receipt carries no revert payload.
    Unknown,
}

impl std::fmt::Display for RevertReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RevertReason::InsufficientProfit { received, required } => {
                write!(f, "InsufficientProfit(received={received}, required={required})")
            }
            RevertReason::AdapterNotApproved(adapter) => write!(f, "AdapterNotApproved({adapter})"),
            RevertReason::EmptySwapSteps => write!(f, "EmptySwapSteps"),
            RevertReason::NotAuthorized => write!(f, "NotAuthorized"),
            RevertReason::ContractPaused => write!(f, "ContractPaused"),
            RevertReason::ZeroAddress => write!(f, "ZeroAddress"),
            RevertReason::ZeroAmount => write!(f, "ZeroAmount"),
            RevertReason::Panic(code) => write!(f, "Panic({code})"),
            RevertReason::Message(msg) => write!(f, "Error({msg})"),
            RevertReason::Raw(data) => write!(f, "raw revert 0x{}", hex::encode(data)),
            RevertReason::Timeout => write!(f, "simulation timeout"),
            RevertReason::Unknown => write!(f, "unknown revert"),
        }
    }
}

/// Terminal status of one candidate's trip through the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    Confirmed {
        tx_hash: B256,
        block: u64,
        gas_used: u64,
        effective_gas_price: u128,
        /// Ground truth from the `ArbitrageExecuted` event.
        gross_profit: U256,
    },
    Reverted {
        tx_hash: B256,
        revert: RevertReason,
        gas_used: u64,
        effective_gas_price: u128,
    },
    SimulationReverted {
        revert: RevertReason,
    },
    Failed {
        reason: String,
    },
    StaleAborted {
        staleness_ms: i64,
        block_lag: u64,
    },
    CircuitBreakerOpen,
    DryRun,
}

/// Decode executor revert data. Falls back through the standard
/// `Error(string)` and `Panic(uint256)` shapes to the raw payload; never
/// fails.
pub fn decode_revert(data: &[u8]) -> RevertReason {
    use IFlashArbExecutor::IFlashArbExecutorErrors as Errors;

    if data.is_empty() {
        return RevertReason::Unknown;
    }

    if let Ok(decoded) = Errors::abi_decode(data) {
        return match decoded {
            Errors::InsufficientProfit(e) => RevertReason::InsufficientProfit {
                received: e.received,
                required: e.required,
            },
            Errors::AdapterNotApproved(e) => RevertReason::AdapterNotApproved(e.adapter),
            Errors::EmptySwapSteps(_) => RevertReason::EmptySwapSteps,
            Errors::NotAuthorized(_) => RevertReason::NotAuthorized,
            Errors::ContractPaused(_) => RevertReason::ContractPaused,
            Errors::ZeroAddress(_) => RevertReason::ZeroAddress,
            Errors::ZeroAmount(_) => RevertReason::ZeroAmount,
        };
    }

    if let Ok(revert) = alloy::sol_types::Revert::abi_decode(data) {
        return RevertReason::Message(revert.reason);
    }
    if let Ok(panic) = alloy::sol_types::Panic::abi_decode(data) {
        return RevertReason::Panic(panic.code);
    }

    RevertReason::Raw(Bytes::copy_from_slice(data))
}

/// Extract the ground-truth gross profit from a confirmed receipt.
pub fn parse_gross_profit(receipt: &TransactionReceipt) -> Option<U256> {
    let topic = arbitrage_executed_topic();
    for log in receipt.inner.logs() {
        if log.topic0() == Some(&topic) {
            if let Ok(event) = IFlashArbExecutor::ArbitrageExecuted::decode_log_data(log.data()) {
                return Some(event.profit);
            }
        }
    }
    None
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_staleness_ms: i64,
    pub max_block_lag: u64,
    pub max_consecutive_failures: u32,
    pub confirmation_timeout: Duration,
    pub simulation_timeout: Duration,
    pub dry_run: bool,
}

/// Drives candidates through the gate chain. Owns the circuit breaker and
/// the nonce ledger; exactly one candidate is in flight at a time.
pub struct ExecutionEngine<P> {
    provider: P,
    signer: Address,
    cfg: ExecutorConfig,
    ledger: NonceLedger,
    consecutive_failures: u32,
    paused: bool,
}

impl<P: Provider> ExecutionEngine<P> {
    pub fn new(provider: P, signer: Address, cfg: ExecutorConfig, ledger: NonceLedger) -> Self {
        Self {
            provider,
            signer,
            cfg,
            ledger,
            consecutive_failures: 0,
            paused: false,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Operator reset: clears the failure counter, the paused flag, and any
    /// nonce-ledger hold left by reconciliation.
    pub fn resume(&mut self) {
        self.paused = false;
        self.consecutive_failures = 0;
        self.ledger.clear_hold();
        info!("circuit breaker reset");
    }

    fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.cfg.max_consecutive_failures {
            self.paused = true;
            warn!(
                failures = self.consecutive_failures,
                "circuit breaker tripped, submissions paused until resume()"
            );
        }
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Run one candidate through all gates. `Err` is reserved for invariant
    /// violations; every operational failure is a typed result.
    pub async fn execute(
        &mut self,
        candidate: &Candidate,
        prepared: &PreparedTransaction,
    ) -> Result<ExecutionResult> {
        // Gate 1: circuit breaker.
        if self.paused {
            return Ok(ExecutionResult::CircuitBreakerOpen);
        }

        // Gate 2: simulation. A revert here costs nothing and does not count
        // toward the breaker.
        if let Some(revert) = self.simulate(prepared).await {
            return Ok(ExecutionResult::SimulationReverted { revert });
        }

        // Gate 3: staleness, against fresh wall clock and head block.
        let staleness_ms =
            chrono::Utc::now().timestamp_millis() - candidate.detected_at_ms;
        let head_block = self
            .provider
            .get_block_number()
            .await
            .unwrap_or(candidate.block_number);
        let block_lag = head_block.saturating_sub(candidate.block_number);
        if staleness_ms > self.cfg.max_staleness_ms || block_lag > self.cfg.max_block_lag {
            return Ok(ExecutionResult::StaleAborted {
                staleness_ms,
                block_lag,
            });
        }

        // Gate 4: dry-run stops short of broadcasting.
        if self.cfg.dry_run {
            return Ok(ExecutionResult::DryRun);
        }

        // Gate 5: nonce reservation, then broadcast.
        if self.ledger.is_held() {
            self.record_failure();
            return Ok(ExecutionResult::Failed {
                reason: "nonce ledger is holding submissions pending reconciliation".to_string(),
            });
        }

        self.submit(prepared).await
    }

    /// `eth_call` the prepared transaction. `None` means the call succeeded.
    async fn simulate(&self, prepared: &PreparedTransaction) -> Option<RevertReason> {
        let tx = prepared.request(self.signer, None);
        let call = tokio::time::timeout(self.cfg.simulation_timeout, self.provider.call(tx));
        match call.await {
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                let reason = match e.as_error_resp() {
                    Some(payload) => match payload.as_revert_data() {
                        Some(data) => decode_revert(&data),
                        None => RevertReason::Message(payload.message.to_string()),
                    },
                    None => RevertReason::Message(e.to_string()),
                };
                debug!(%reason, "simulation reverted");
                Some(reason)
            }
            Err(_) => Some(RevertReason::Timeout),
        }
    }

    async fn submit(&mut self, prepared: &PreparedTransaction) -> Result<ExecutionResult> {
        let chain_nonce = match self.provider.get_transaction_count(self.signer).await {
            Ok(n) => n,
            Err(e) => {
                self.record_failure();
                return Ok(ExecutionResult::Failed {
                    reason: format!("transaction count query failed: {e}"),
                });
            }
        };
        let nonce = self.ledger.next_nonce(chain_nonce)?;
        let tx = prepared.request(self.signer, Some(nonce));

        let pending = match tokio::time::timeout(
            Duration::from_secs(10),
            self.provider.send_transaction(tx),
        )
        .await
        {
            Ok(Ok(pending)) => pending,
            Ok(Err(e)) => {
                self.ledger.resolve(nonce, PendingState::Dropped)?;
                self.record_failure();
                return Ok(ExecutionResult::Failed {
                    reason: format!("broadcast failed: {e}"),
                });
            }
            Err(_) => {
                // The transaction may or may not have left; keep the entry
                // pending so reconciliation settles it.
                self.record_failure();
                return Ok(ExecutionResult::Failed {
                    reason: "broadcast timed out".to_string(),
                });
            }
        };

        let tx_hash = *pending.tx_hash();
        self.ledger.record_hash(nonce, tx_hash)?;
        info!(%tx_hash, nonce, "arbitrage submitted");

        let receipt = match tokio::time::timeout(
            self.cfg.confirmation_timeout,
            wait_for_receipt(&self.provider, tx_hash),
        )
        .await
        {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(e)) => {
                self.record_failure();
                return Ok(ExecutionResult::Failed {
                    reason: format!("receipt polling failed: {e}"),
                });
            }
            Err(_) => {
                // Speed-up/cancel replacements are planner builders driven by
                // the operator; the entry stays pending for reconciliation.
                self.record_failure();
                return Ok(ExecutionResult::Failed {
                    reason: format!("confirmation timed out for {tx_hash}"),
                });
            }
        };

        self.ledger.resolve(nonce, PendingState::Mined)?;
        self.settle(candidate_settlement(&receipt, tx_hash)?)
    }

    fn settle(&mut self, result: ExecutionResult) -> Result<ExecutionResult> {
        match &result {
            ExecutionResult::Confirmed { .. } => self.record_success(),
            ExecutionResult::Reverted { .. } => self.record_failure(),
            _ => {}
        }
        Ok(result)
    }
}

/// Map a mined receipt to its execution result. A success receipt without
/// the settlement event contradicts the executor contract and is fatal.
fn candidate_settlement(
    receipt: &TransactionReceipt,
    tx_hash: B256,
) -> Result<ExecutionResult> {
    let gas_used = receipt.gas_used;
    let effective_gas_price = receipt.effective_gas_price;
    let block = receipt.block_number.unwrap_or_default();

    if receipt.status() {
        let gross_profit = parse_gross_profit(receipt).ok_or_else(|| {
            eyre!("invariant violation: confirmed {tx_hash} missing ArbitrageExecuted event")
        })?;
        Ok(ExecutionResult::Confirmed {
            tx_hash,
            block,
            gas_used,
            effective_gas_price,
            gross_profit,
        })
    } else {
        Ok(ExecutionResult::Reverted {
            tx_hash,
            revert: RevertReason::Unknown,
            gas_used,
            effective_gas_price,
        })
    }
}

async fn wait_for_receipt<P: Provider>(provider: &P, tx_hash: B256) -> Result<TransactionReceipt> {
    loop {
        if let Some(receipt) = provider.get_transaction_receipt(tx_hash).await? {
            return Ok(receipt);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::sol_types::SolError;

    #[test]
    fn decodes_insufficient_profit() {
        let err = IFlashArbExecutor::InsufficientProfit {
            received: U256::from(999_000_000_000_000_000u128),
            required: U256::from(1_000_000_000_000_000_000u128),
        };
        let decoded = decode_revert(&err.abi_encode());
        assert_eq!(
            decoded,
            RevertReason::InsufficientProfit {
                received: U256::from(999_000_000_000_000_000u128),
                required: U256::from(1_000_000_000_000_000_000u128),
            }
        );
    }

    #[test]
    fn decodes_parameterless_errors() {
        assert_eq!(
            decode_revert(&IFlashArbExecutor::ContractPaused {}.abi_encode()),
            RevertReason::ContractPaused
        );
        assert_eq!(
            decode_revert(&IFlashArbExecutor::EmptySwapSteps {}.abi_encode()),
            RevertReason::EmptySwapSteps
        );
        assert_eq!(
            decode_revert(&IFlashArbExecutor::NotAuthorized {}.abi_encode()),
            RevertReason::NotAuthorized
        );
    }

    #[test]
    fn decodes_adapter_not_approved() {
        let adapter = Address::repeat_byte(0x42);
        let err = IFlashArbExecutor::AdapterNotApproved { adapter };
        assert_eq!(
            decode_revert(&err.abi_encode()),
            RevertReason::AdapterNotApproved(adapter)
        );
    }

    #[test]
    fn decodes_standard_error_string() {
        let revert = alloy::sol_types::Revert {
            reason: "TRANSFER_FROM_FAILED".to_string(),
        };
        assert_eq!(
            decode_revert(&revert.abi_encode()),
            RevertReason::Message("TRANSFER_FROM_FAILED".to_string())
        );
    }

    #[test]
    fn decodes_panic_selector() {
        // Arithmetic overflow panic code 0x11.
        let panic = alloy::sol_types::Panic {
            code: U256::from(0x11u64),
        };
        assert_eq!(
            decode_revert(&panic.abi_encode()),
            RevertReason::Panic(U256::from(0x11u64))
        );
    }

    #[test]
    fn unknown_selector_is_kept_raw_not_thrown() {
        let garbage = [0xde, 0xad, 0xbe, 0xef, 0x01, 0x02];
        match decode_revert(&garbage) {
            RevertReason::Raw(data) => assert_eq!(data.as_ref(), &garbage),
            other => panic!("expected raw, got {other:?}"),
        }
        assert_eq!(decode_revert(&[]), RevertReason::Unknown);
    }

    #[test]
    fn truncated_known_selector_degrades_to_raw() {
        // A valid InsufficientProfit selector with its arguments cut short
        // must not decode into a half-filled error.
        let full = IFlashArbExecutor::InsufficientProfit {
            received: U256::from(1u64),
            required: U256::from(2u64),
        }
        .abi_encode();
        let truncated = &full[..8];
        match decode_revert(truncated) {
            RevertReason::Raw(data) => assert_eq!(data.len(), 8),
            other => panic!("expected raw, got {other:?}"),
        }
    }

    mod gates {
        use super::super::*;
        use crate::types::{Candidate, CostBreakdown};
        use alloy::primitives::I256;
        use alloy::providers::ProviderBuilder;
        use tempfile::tempdir;

        fn engine(dir: &std::path::Path, dry_run: bool) -> ExecutionEngine<impl Provider> {
            // Unroutable endpoint: the lazy HTTP transport only fails when a
            // gate actually performs I/O.
            let provider = ProviderBuilder::new()
                .connect_http("http://127.0.0.1:1".parse().unwrap());
            let ledger = NonceLedger::open(dir.join("nonce.jsonl")).unwrap();
            ExecutionEngine::new(
                provider,
                Address::repeat_byte(0x11),
                ExecutorConfig {
                    max_staleness_ms: 200,
                    max_block_lag: 4,
                    max_consecutive_failures: 5,
                    confirmation_timeout: Duration::from_millis(50),
                    simulation_timeout: Duration::from_millis(200),
                    dry_run,
                },
                ledger,
            )
        }

        fn candidate() -> Candidate {
            Candidate {
                path: Vec::new(),
                path_label: "a -> b".to_string(),
                input_amount: U256::from(1u64),
                flash_loan_provider: Address::ZERO,
                flash_loan_token: Address::ZERO,
                gross_profit: I256::ZERO,
                costs: CostBreakdown::default(),
                net_profit: I256::ZERO,
                detected_at_ms: chrono::Utc::now().timestamp_millis(),
                block_number: 1,
            }
        }

        fn prepared() -> PreparedTransaction {
            PreparedTransaction {
                to: Address::repeat_byte(0xee),
                data: Bytes::new(),
                chain_id: 42161,
                gas_limit: 500_000,
                max_fee_per_gas: 1_000,
                max_priority_fee_per_gas: 10,
                flash_loan_provider: Address::ZERO,
                flash_loan_token: Address::ZERO,
                flash_loan_amount: U256::from(1u64),
                steps: 2,
            }
        }

        #[tokio::test]
        async fn breaker_trips_after_threshold_and_blocks_candidates() {
            let dir = tempdir().unwrap();
            let mut engine = engine(dir.path(), true);

            for i in 1..=4u32 {
                engine.record_failure();
                assert!(!engine.is_paused(), "not yet tripped at {i}");
            }
            engine.record_failure();
            assert!(engine.is_paused());

            // Gate 1 fires before any RPC is attempted.
            let result = engine.execute(&candidate(), &prepared()).await.unwrap();
            assert_eq!(result, ExecutionResult::CircuitBreakerOpen);

            engine.resume();
            assert!(!engine.is_paused());
            assert_eq!(engine.consecutive_failures(), 0);
        }

        #[tokio::test]
        async fn confirmed_resets_the_failure_counter() {
            let dir = tempdir().unwrap();
            let mut engine = engine(dir.path(), true);
            engine.record_failure();
            engine.record_failure();
            engine.record_success();
            assert_eq!(engine.consecutive_failures(), 0);
            assert!(!engine.is_paused());
        }

        #[tokio::test]
        async fn unreachable_rpc_becomes_simulation_reverted_not_a_breaker_hit() {
            let dir = tempdir().unwrap();
            let mut engine = engine(dir.path(), true);

            let result = engine.execute(&candidate(), &prepared()).await.unwrap();
            assert!(
                matches!(result, ExecutionResult::SimulationReverted { .. }),
                "got {result:?}"
            );
            // Simulation failures save gas; they must not count toward the
            // breaker.
            assert_eq!(engine.consecutive_failures(), 0);
        }
    }

    #[test]
    fn revert_reason_display_is_stable() {
        let reason = RevertReason::InsufficientProfit {
            received: U256::from(9u64),
            required: U256::from(10u64),
        };
        assert_eq!(
            reason.to_string(),
            "InsufficientProfit(received=9, required=10)"
        );
        assert_eq!(RevertReason::Timeout.to_string(), "simulation timeout");
    }
}

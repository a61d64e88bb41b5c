//! Pipeline orchestrator.
//!
//! One cooperative loop: each poll tick reads every pool in parallel, ranks
//! spreads, sizes and costs the best seeds, and hands at most one candidate
//! per tick to the execution engine so nonce usage stays strictly ordered.
//! All per-candidate failures are typed results; an `Err` escaping the tick
//! means an invariant violation and tears the process down.

use crate::config::ChainConfig;
use crate::detector::{OpportunityDetector, ScanResult};
use crate::events::{EngineEvent, EventSender};
use crate::executor::{ExecutionEngine, ExecutionResult};
use crate::gas::{GasOracle, GasQuote};
use crate::planner::{build_swap_steps, TransactionPlanner};
use crate::pools::reader::PoolReader;
use crate::pools::PoolSnapshot;
use crate::profit::{ProfitModel, ProfitModelConfig};
use crate::sizer::{optimal_input, SizerConfig};
use crate::store::{TradeOutcome, TradeStatus, TradeStore};
use crate::types::{Candidate, CostBreakdown};
use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, I256, U256};
use alloy::providers::Provider;
use alloy::sol;
use eyre::Result;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function balanceOf(address owner) external view returns (uint256);
    }
}

/// Emit a stats event once per this many ticks.
const STATS_EVERY_TICKS: u64 = 60;

enum SeedDisposition {
    /// Reached the execution engine; the tick's submission slot is used.
    Executed,
    /// Rejected before execution; the next seed may try.
    Rejected,
}

pub struct Pipeline<P> {
    cfg: ChainConfig,
    provider: P,
    reader: PoolReader<P>,
    detector: OpportunityDetector,
    profit: ProfitModel,
    planner: TransactionPlanner,
    gas_oracle: Box<dyn GasOracle>,
    executor: ExecutionEngine<P>,
    store: TradeStore,
    events: EventSender,
    /// Latest snapshot per pool address, owned here; stages see references.
    latest: HashMap<Address, PoolSnapshot>,
    /// Set by the operator (SIGHUP) to clear the circuit breaker.
    resume_requested: Arc<AtomicBool>,
    was_paused: bool,
    ticks: u64,
}

impl<P: Provider + Clone> Pipeline<P> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: ChainConfig,
        provider: P,
        gas_oracle: Box<dyn GasOracle>,
        executor: ExecutionEngine<P>,
        store: TradeStore,
        events: EventSender,
        resume_requested: Arc<AtomicBool>,
    ) -> Self {
        let reader = PoolReader::new(
            provider.clone(),
            cfg.pools.clone(),
            Duration::from_millis(cfg.pool_read_timeout_ms()),
            cfg.max_retries,
        );
        let detector = OpportunityDetector::new(cfg.delta_threshold_bps);
        let profit = ProfitModel::new(ProfitModelConfig {
            adversarial_move_bps: cfg.adversarial_move_bps,
            variable_fee_buffer_pct: cfg.variable_fee_buffer_pct,
            risk_multiplier_pct: cfg.risk_multiplier_pct,
            min_profit_threshold_wei: cfg.min_profit_threshold_wei,
        });
        let planner = TransactionPlanner::from_config(&cfg);

        Self {
            cfg,
            provider,
            reader,
            detector,
            profit,
            planner,
            gas_oracle,
            executor,
            store,
            events,
            latest: HashMap::new(),
            resume_requested,
            was_paused: false,
            ticks: 0,
        }
    }

    /// Run until `shutdown` resolves. The current tick always completes
    /// before the loop exits, so in-flight submissions settle and persist.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.cfg.poll_interval_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(
            chain = self.cfg.name,
            pools = self.cfg.pools.len(),
            tokens = ?self.cfg.tokens.iter().map(|t| t.symbol).collect::<Vec<_>>(),
            poll_interval_ms = self.cfg.poll_interval_ms,
            mev_mode = ?self.cfg.mev_mode,
            dry_run = self.cfg.dry_run,
            "pipeline started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown signal received, finishing current tick");
                    break;
                }
                _ = interval.tick() => {
                    let started = Instant::now();
                    self.tick().await?;
                    let elapsed = started.elapsed();
                    if elapsed.as_millis() as u64 > self.cfg.poll_interval_ms {
                        warn!(
                            elapsed_ms = elapsed.as_millis() as u64,
                            "tick overran the poll interval, missed ticks dropped"
                        );
                    }
                }
            }
        }

        self.events.emit(EngineEvent::Stats(self.store.stats()));
        info!("pipeline stopped, ledgers flushed");
        Ok(())
    }

    async fn tick(&mut self) -> Result<()> {
        self.ticks += 1;

        if self.resume_requested.swap(false, Ordering::SeqCst) && self.executor.is_paused() {
            self.executor.resume();
            self.was_paused = false;
            self.events.emit(EngineEvent::Resumed);
        }

        let poll = match self.reader.poll().await {
            Ok(poll) => poll,
            Err(e) => {
                warn!(error = %e, "head block query failed, skipping tick");
                return Ok(());
            }
        };

        self.events.emit(EngineEvent::PriceUpdate {
            head_block: poll.head_block,
            pools_read: poll.snapshots.len(),
            pool_errors: poll.errors.len(),
        });

        for snapshot in poll.snapshots {
            self.latest.insert(snapshot.descriptor.address, snapshot);
        }
        for stale in self.reader.stale_pools() {
            self.latest.remove(&stale);
        }

        let snapshots: Vec<PoolSnapshot> = self.latest.values().cloned().collect();
        let scan = self.detector.scan(&snapshots);
        self.emit_below_threshold(&scan);

        if scan.seeds.is_empty() {
            self.maybe_emit_stats();
            return Ok(());
        }

        if let Some(reason) = self.gas_ceiling_exceeded().await {
            for seed in &scan.seeds {
                self.events.emit(EngineEvent::OpportunityRejected {
                    route: seed.label(),
                    reason: reason.clone(),
                });
            }
            self.maybe_emit_stats();
            return Ok(());
        }

        for seed in scan.seeds {
            self.events.emit(EngineEvent::OpportunityFound {
                route: seed.label(),
                delta_bps: seed.delta_bps,
            });
            match self.process_seed(seed).await? {
                SeedDisposition::Executed => break,
                SeedDisposition::Rejected => continue,
            }
        }

        self.maybe_emit_stats();
        Ok(())
    }

    fn emit_below_threshold(&self, scan: &ScanResult) {
        for below in &scan.below_threshold {
            self.events.emit(EngineEvent::OpportunityRejected {
                route: format!("{}/{}", below.pair.0, below.pair.1),
                reason: format!("BelowThreshold({} bps)", below.best_delta_bps),
            });
        }
    }

    fn maybe_emit_stats(&self) {
        if self.ticks % STATS_EVERY_TICKS == 0 {
            self.events.emit(EngineEvent::Stats(self.store.stats()));
        }
    }

    /// Gas-price ceiling gate, checked once per tick before any sizing work.
    async fn gas_ceiling_exceeded(&self) -> Option<String> {
        let price = self.gas_oracle.suggested_gas_price().await?;
        let ceiling = U256::from(self.cfg.max_gas_price_gwei) * U256::from(1_000_000_000u64);
        if price > ceiling {
            Some(format!(
                "GasPriceCeiling(network {price} wei > max {ceiling} wei)"
            ))
        } else {
            None
        }
    }

    async fn process_seed(
        &mut self,
        seed: crate::detector::OpportunitySeed,
    ) -> Result<SeedDisposition> {
        let route = seed.label();
        let base_token = seed.pair.0;

        // Preferred provider's fee drives the sizing; the definitive pick
        // happens once the input amount is known.
        let Some(preferred) = self.cfg.provider_for(base_token) else {
            self.events.emit(EngineEvent::OpportunityRejected {
                route,
                reason: "NoFlashLoanProvider".to_string(),
            });
            return Ok(SeedDisposition::Rejected);
        };
        let preferred_address = preferred.address;
        let sizing_fee_bps = preferred.fee_bps;

        // Gas quote against a provisionally sized route; calldata length is
        // input-independent, so the quote holds for the final sizing too.
        let gas = self.quote_gas(&seed, preferred_address, base_token).await;

        let sizer_cfg = SizerConfig {
            min_input: self.cfg.sizer_min_input_wei,
            max_input: self.cfg.sizer_max_input_wei,
            default_input: self.cfg.sizer_default_input_wei,
            convergence: self.cfg.sizer_convergence_wei,
            max_iterations: self.cfg.sizer_max_iterations,
            timeout: Duration::from_millis(self.cfg.sizer_timeout_ms),
        };
        let sized = optimal_input(
            &sizer_cfg,
            self.profit.profit_fn(&seed, &gas, sizing_fee_bps),
        );
        if sized.is_fallback() {
            tracing::debug!(route = %route, "sizer fell back to the default input");
        }
        let input = sized.amount();

        // Definitive provider: first by preference with vault liquidity for
        // the sized amount.
        let Some((flash_provider, flash_fee_bps)) =
            self.select_provider(base_token, input).await
        else {
            self.events.emit(EngineEvent::OpportunityRejected {
                route,
                reason: "NoFlashLoanLiquidity".to_string(),
            });
            return Ok(SeedDisposition::Rejected);
        };

        let eval = match self.profit.evaluate(&seed, input, &gas, flash_fee_bps) {
            Ok(eval) => eval,
            Err(reason) => {
                self.events.emit(EngineEvent::OpportunityRejected {
                    route,
                    reason: reason.to_string(),
                });
                return Ok(SeedDisposition::Rejected);
            }
        };
        if let Err(reason) = self.profit.gate(&seed, &eval) {
            self.events.emit(EngineEvent::OpportunityRejected {
                route,
                reason: reason.to_string(),
            });
            return Ok(SeedDisposition::Rejected);
        }

        let candidate = Candidate {
            path: build_swap_steps(&seed, input),
            path_label: route.clone(),
            input_amount: input,
            flash_loan_provider: flash_provider,
            flash_loan_token: base_token,
            gross_profit: eval.gross_profit,
            costs: eval.costs.clone(),
            net_profit: eval.net_profit,
            detected_at_ms: seed.buy.observed_at_ms.min(seed.sell.observed_at_ms),
            block_number: seed.buy.block_number.min(seed.sell.block_number),
        };

        let base_fee = self.base_fee_wei().await;
        let prepared = match self.planner.plan(&candidate, base_fee, &gas) {
            Ok(prepared) => prepared,
            Err(e) => {
                self.events.emit(EngineEvent::OpportunityRejected {
                    route,
                    reason: format!("PlanningFailed: {e}"),
                });
                return Ok(SeedDisposition::Rejected);
            }
        };

        let result = self.executor.execute(&candidate, &prepared).await?;
        self.handle_result(&candidate, result)?;

        if self.executor.is_paused() && !self.was_paused {
            self.was_paused = true;
            self.events.emit(EngineEvent::Paused {
                consecutive_failures: self.executor.consecutive_failures(),
            });
        }
        Ok(SeedDisposition::Executed)
    }

    /// Walk the preference-ordered provider list and take the first entry
    /// that supports the token and holds at least `input` of it. An
    /// unreadable balance does not disqualify a provider: the simulation
    /// gate rejects an underfunded vault before anything is broadcast.
    async fn select_provider(&self, token: Address, input: U256) -> Option<(Address, u32)> {
        let erc20 = IERC20::new(token, &self.provider);
        for provider_cfg in self
            .cfg
            .flash_loan_providers
            .iter()
            .filter(|p| p.supported_assets.contains(&token))
        {
            match erc20.balanceOf(provider_cfg.address).call().await {
                Ok(balance) if balance < input => {
                    tracing::debug!(
                        vault = %provider_cfg.address,
                        %balance,
                        %input,
                        "flash-loan vault too shallow for sized input"
                    );
                }
                _ => return Some((provider_cfg.address, provider_cfg.fee_bps)),
            }
        }
        None
    }

    async fn quote_gas(
        &self,
        seed: &crate::detector::OpportunitySeed,
        flash_provider: Address,
        base_token: Address,
    ) -> GasQuote {
        let provisional = Candidate {
            path: build_swap_steps(seed, self.cfg.sizer_default_input_wei),
            path_label: seed.label(),
            input_amount: self.cfg.sizer_default_input_wei,
            flash_loan_provider: flash_provider,
            flash_loan_token: base_token,
            gross_profit: I256::ZERO,
            costs: CostBreakdown::default(),
            net_profit: I256::ZERO,
            detected_at_ms: 0,
            block_number: 0,
        };
        let steps = provisional.path.len();
        match self.planner.encode_calldata(&provisional) {
            Ok(data) => self.gas_oracle.quote(self.cfg.executor, data, steps).await,
            Err(_) => {
                // Unreachable with a two-leg seed; quoted conservatively anyway.
                self.gas_oracle
                    .quote(self.cfg.executor, Default::default(), steps)
                    .await
            }
        }
    }

    async fn base_fee_wei(&self) -> u128 {
        if let Ok(Some(block)) = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await
        {
            if let Some(base_fee) = block.header.base_fee_per_gas {
                return u128::from(base_fee);
            }
        }
        match self.provider.get_gas_price().await {
            Ok(price) => price,
            Err(_) => u128::from(self.cfg.max_gas_price_gwei) * 1_000_000_000,
        }
    }

    /// Convert the executor's verdict into events and a persisted outcome.
    fn handle_result(&mut self, candidate: &Candidate, result: ExecutionResult) -> Result<()> {
        let route = candidate.path_label.clone();
        let now_ms = chrono::Utc::now().timestamp_millis();

        match result {
            ExecutionResult::Confirmed {
                tx_hash,
                block,
                gas_used,
                effective_gas_price,
                gross_profit,
            } => {
                let gas_cost = U256::from(gas_used) * U256::from(effective_gas_price);
                // L1 share of the realized fee needs a post-hoc receipt
                // extension this RPC does not expose; it stays zero here.
                let l1_data_fee = U256::ZERO;
                let net_profit = signed(gross_profit) - signed(gas_cost) - signed(l1_data_fee);
                self.events.emit(EngineEvent::Submitted {
                    route: route.clone(),
                    tx_hash,
                });
                self.events.emit(EngineEvent::Confirmed {
                    route: route.clone(),
                    tx_hash,
                    net_profit: net_profit.to_string(),
                });
                self.append_outcome(TradeOutcome {
                    tx_hash: format!("{tx_hash:?}"),
                    timestamp: now_ms,
                    block_number: block,
                    path_label: route,
                    input_amount: candidate.input_amount,
                    gross_profit,
                    gas_cost,
                    l1_data_fee,
                    revert_cost: U256::ZERO,
                    net_profit,
                    status: TradeStatus::Confirmed,
                })
            }
            ExecutionResult::Reverted {
                tx_hash,
                revert,
                gas_used,
                effective_gas_price,
            } => {
                let revert_cost = U256::from(gas_used) * U256::from(effective_gas_price);
                self.events.emit(EngineEvent::Reverted {
                    route: route.clone(),
                    tx_hash,
                    revert: revert.to_string(),
                });
                self.append_outcome(TradeOutcome {
                    tx_hash: format!("{tx_hash:?}"),
                    timestamp: now_ms,
                    block_number: candidate.block_number,
                    path_label: route,
                    input_amount: candidate.input_amount,
                    gross_profit: U256::ZERO,
                    gas_cost: U256::ZERO,
                    l1_data_fee: U256::ZERO,
                    revert_cost,
                    net_profit: -signed(revert_cost),
                    status: TradeStatus::Reverted,
                })
            }
            ExecutionResult::SimulationReverted { revert } => {
                self.events.emit(EngineEvent::SimulationFailed {
                    route: route.clone(),
                    revert: revert.to_string(),
                });
                self.append_outcome(zero_cost_outcome(
                    format!("sim:{now_ms}"),
                    now_ms,
                    candidate,
                    TradeStatus::SimulationReverted,
                ))
            }
            ExecutionResult::Failed { reason } => {
                self.events.emit(EngineEvent::OpportunityRejected {
                    route: route.clone(),
                    reason: format!("SubmissionFailed: {reason}"),
                });
                self.append_outcome(zero_cost_outcome(
                    format!("failed:{now_ms}"),
                    now_ms,
                    candidate,
                    TradeStatus::Failed,
                ))
            }
            ExecutionResult::StaleAborted {
                staleness_ms,
                block_lag,
            } => {
                self.events.emit(EngineEvent::StaleAborted {
                    route: route.clone(),
                    staleness_ms,
                    block_lag,
                });
                self.append_outcome(zero_cost_outcome(
                    format!("stale:{now_ms}"),
                    now_ms,
                    candidate,
                    TradeStatus::StaleAborted,
                ))
            }
            ExecutionResult::CircuitBreakerOpen => {
                self.events.emit(EngineEvent::OpportunityRejected {
                    route,
                    reason: "CircuitBreakerOpen".to_string(),
                });
                Ok(())
            }
            ExecutionResult::DryRun => {
                // Estimated buckets: the would-be trade at quoted prices.
                let gross_profit = unsigned_or_zero(candidate.gross_profit);
                let gas_cost = candidate.costs.l2_gas_cost;
                let l1_data_fee = candidate.costs.l1_data_fee;
                let net_profit = signed(gross_profit) - signed(gas_cost) - signed(l1_data_fee);
                self.events.emit(EngineEvent::DryRun {
                    route: route.clone(),
                    net_profit: candidate.net_profit.to_string(),
                });
                self.append_outcome(TradeOutcome {
                    tx_hash: format!("dryrun:{now_ms}"),
                    timestamp: now_ms,
                    block_number: candidate.block_number,
                    path_label: route,
                    input_amount: candidate.input_amount,
                    gross_profit,
                    gas_cost,
                    l1_data_fee,
                    revert_cost: U256::ZERO,
                    net_profit,
                    status: TradeStatus::DryRun,
                })
            }
        }
    }

    fn append_outcome(&mut self, outcome: TradeOutcome) -> Result<()> {
        // An inconsistent record is an upstream bug; propagate as fatal.
        self.store.append(outcome)?;
        Ok(())
    }
}

fn signed(value: U256) -> I256 {
    I256::try_from(value).unwrap_or(I256::MAX)
}

fn unsigned_or_zero(value: I256) -> U256 {
    if value.is_negative() {
        U256::ZERO
    } else {
        value.unsigned_abs()
    }
}

fn zero_cost_outcome(
    tx_hash: String,
    now_ms: i64,
    candidate: &Candidate,
    status: TradeStatus,
) -> TradeOutcome {
    TradeOutcome {
        tx_hash,
        timestamp: now_ms,
        block_number: candidate.block_number,
        path_label: candidate.path_label.clone(),
        input_amount: candidate.input_amount,
        gross_profit: U256::ZERO,
        gas_cost: U256::ZERO,
        l1_data_fee: U256::ZERO,
        revert_cost: U256::ZERO,
        net_profit: I256::ZERO,
        status,
    }
}

//! Cost estimation and the net-profit model.
//!
//! Converts a detector seed plus an input amount into signed gross/net profit
//! with three-bucket cost accounting. The borrowed asset is the pair's base
//! token: the route sells it into the rich leg and buys it back on the cheap
//! leg, so gross profit is denominated in base-token wei and adds directly to
//! the native-wei gas buckets (registries quote wrapped-native bases).

use crate::amm::{walk_path, QuoteLeg};
use crate::detector::OpportunitySeed;
use crate::gas::GasQuote;
use crate::pools::PoolDescriptor;
use crate::types::CostBreakdown;
use alloy::primitives::{I256, U256};
use thiserror::Error;

const BPS_DENOMINATOR: u64 = 10_000;

/// Reasons a costed candidate is refused before planning.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("route quote failed")]
    QuoteFailed,
    #[error("net profit {net} below threshold {required}")]
    BelowMinProfit { net: I256, required: U256 },
    #[error("net profit {net} below risk-buffered threshold {required}")]
    RiskBufferNotMet { net: I256, required: U256 },
}

/// Signed profit figures plus the cost split behind them.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub gross_profit: I256,
    pub costs: CostBreakdown,
    pub net_profit: I256,
}

#[derive(Debug, Clone)]
pub struct ProfitModelConfig {
    pub adversarial_move_bps: u32,
    pub variable_fee_buffer_pct: u32,
    pub risk_multiplier_pct: u32,
    pub min_profit_threshold_wei: U256,
}

/// Evaluates routes against the full cost stack.
pub struct ProfitModel {
    cfg: ProfitModelConfig,
}

impl ProfitModel {
    pub fn new(cfg: ProfitModelConfig) -> Self {
        Self { cfg }
    }

    /// Pool fee with the variable-fee buffer applied where the DEX warrants
    /// it (liquidity-book style pools can reprice between quote and fill).
    pub fn effective_fee_ppm(&self, descriptor: &PoolDescriptor) -> u32 {
        if descriptor.dex.variable_fee_risk() {
            descriptor.fee_ppm
                + descriptor.fee_ppm * self.cfg.variable_fee_buffer_pct / 100
        } else {
            descriptor.fee_ppm
        }
    }

    /// Walk the two-leg route for `input` of the base token: sell into the
    /// rich leg, buy back on the cheap leg. Returns the final base amount.
    pub fn quote_route(&self, seed: &OpportunitySeed, input: U256) -> Option<U256> {
        let base = seed.pair.0;
        let quote = seed.pair.1;
        let legs = [
            QuoteLeg::new(&seed.sell, base).with_fee(self.effective_fee_ppm(&seed.sell.descriptor)),
            QuoteLeg::new(&seed.buy, quote).with_fee(self.effective_fee_ppm(&seed.buy.descriptor)),
        ];
        walk_path(&legs, input)
    }

    /// Full evaluation of `(seed, input)` under a fixed gas quote and
    /// flash-loan fee. Never rejects; gating is a separate step so the sizer
    /// can probe unprofitable inputs.
    pub fn evaluate(
        &self,
        seed: &OpportunitySeed,
        input: U256,
        gas: &GasQuote,
        flash_fee_bps: u32,
    ) -> Result<Evaluation, RejectReason> {
        let quoted_out = self.quote_route(seed, input).ok_or(RejectReason::QuoteFailed)?;

        // Adversarial haircut: the realized output after a small price move
        // against us. The difference is the slippage bucket.
        let adverse_out = scale_down_bps(quoted_out, self.cfg.adversarial_move_bps);
        let slippage_cost = quoted_out - adverse_out;

        let flash_loan_fee =
            input * U256::from(flash_fee_bps) / U256::from(BPS_DENOMINATOR);

        let costs = CostBreakdown::new(
            flash_loan_fee,
            gas.l2_cost_wei,
            gas.l1_cost_wei,
            slippage_cost,
        );

        let gross_profit = signed_sub(quoted_out, input);
        let net_profit = gross_profit - I256::try_from(costs.total).unwrap_or(I256::MAX);

        Ok(Evaluation {
            gross_profit,
            costs,
            net_profit,
        })
    }

    /// Threshold gating for an already evaluated candidate. Routes touching a
    /// fee-manipulation-risk DEX must clear a multiplied threshold.
    pub fn gate(&self, seed: &OpportunitySeed, eval: &Evaluation) -> Result<(), RejectReason> {
        let risky = seed.buy.descriptor.dex.fee_manipulation_risk()
            || seed.sell.descriptor.dex.fee_manipulation_risk();

        if risky {
            let required = self.cfg.min_profit_threshold_wei
                * U256::from(self.cfg.risk_multiplier_pct)
                / U256::from(100u64);
            if eval.net_profit < I256::try_from(required).unwrap_or(I256::MAX) {
                return Err(RejectReason::RiskBufferNotMet {
                    net: eval.net_profit,
                    required,
                });
            }
            return Ok(());
        }

        let required = self.cfg.min_profit_threshold_wei;
        if eval.net_profit < I256::try_from(required).unwrap_or(I256::MAX) {
            return Err(RejectReason::BelowMinProfit {
                net: eval.net_profit,
                required,
            });
        }
        Ok(())
    }

    /// Closure handed to the sizer: net profit as a function of input under a
    /// frozen gas quote.
    pub fn profit_fn<'a>(
        &'a self,
        seed: &'a OpportunitySeed,
        gas: &'a GasQuote,
        flash_fee_bps: u32,
    ) -> impl Fn(U256) -> Option<I256> + 'a {
        move |input| {
            self.evaluate(seed, input, gas, flash_fee_bps)
                .ok()
                .map(|e| e.net_profit)
        }
    }
}

fn scale_down_bps(amount: U256, bps: u32) -> U256 {
    amount * U256::from(BPS_DENOMINATOR - u64::from(bps).min(BPS_DENOMINATOR))
        / U256::from(BPS_DENOMINATOR)
}

fn signed_sub(a: U256, b: U256) -> I256 {
    if a >= b {
        I256::try_from(a - b).unwrap_or(I256::MAX)
    } else {
        -I256::try_from(b - a).unwrap_or(I256::MAX)
    }
}

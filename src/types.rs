//! Core pipeline value types shared across detection, costing, planning and
//! execution.

use alloy::primitives::{Address, Bytes, I256, U256};

/// One swap leg in the executor's calldata layout.
///
/// Chain invariants: consecutive steps connect (`token_out` feeds the next
/// `token_in`), the first step consumes the borrowed token and the last step
/// returns to it. `amount_in == 0` tells the executor to spend its current
/// balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapStep {
    pub adapter: Address,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
    /// Adapter-specific payload; fee tier for V3, empty for V2.
    pub extra_data: Bytes,
}

/// Three-bucket cost accounting for a candidate.
///
/// `l1_data_fee` stays present even when zero so confirmed, dry-run and
/// non-rollup outcomes all report the same shape.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CostBreakdown {
    pub flash_loan_fee: U256,
    pub l2_gas_cost: U256,
    pub l1_data_fee: U256,
    pub slippage_cost: U256,
    pub total: U256,
}

impl CostBreakdown {
    pub fn new(
        flash_loan_fee: U256,
        l2_gas_cost: U256,
        l1_data_fee: U256,
        slippage_cost: U256,
    ) -> Self {
        Self {
            flash_loan_fee,
            l2_gas_cost,
            l1_data_fee,
            slippage_cost,
            total: flash_loan_fee + l2_gas_cost + l1_data_fee + slippage_cost,
        }
    }
}

/// A fully costed arbitrage plan, ready for the planner and executor.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub path: Vec<SwapStep>,
    pub path_label: String,
    pub input_amount: U256,
    pub flash_loan_provider: Address,
    pub flash_loan_token: Address,
    pub gross_profit: I256,
    pub costs: CostBreakdown,
    pub net_profit: I256,
    pub detected_at_ms: i64,
    /// Head block of the snapshots this plan was derived from.
    pub block_number: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_breakdown_totals_all_buckets() {
        let costs = CostBreakdown::new(
            U256::from(5u64),
            U256::from(7u64),
            U256::from(11u64),
            U256::from(13u64),
        );
        assert_eq!(costs.total, U256::from(36u64));
    }

    #[test]
    fn zero_l1_fee_is_still_counted() {
        let costs = CostBreakdown::new(U256::from(1u64), U256::from(2u64), U256::ZERO, U256::ZERO);
        assert_eq!(costs.l1_data_fee, U256::ZERO);
        assert_eq!(costs.total, U256::from(3u64));
    }
}

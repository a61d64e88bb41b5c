//! Chain-specific gas cost models.
//!
//! Arbitrum bills an L2 transaction in two parts: L2 execution and the L1
//! calldata share. The node interface pseudo-contract reports both, priced in
//! L2 base-fee units, and the cost model follows that billing exactly. Other
//! EVM chains collapse to `total_gas * gas_price` with a zero L1 component.
//!
//! A failing oracle is never fatal: estimates degrade to a per-step constant
//! that overshoots a real route, keeping the cost model conservative.

use alloy::primitives::{Address, Bytes, U256};
use alloy::providers::Provider;
use alloy::rpc::types::{TransactionInput, TransactionRequest};
use alloy::sol;
use async_trait::async_trait;
use tracing::warn;

sol! {
    #[sol(rpc)]
    interface INodeInterface {
        function gasEstimateComponents(address to, bool contractCreation, bytes calldata data)
            external
            payable
            returns (
                uint64 gasEstimate,
                uint64 gasEstimateForL1,
                uint256 baseFee,
                uint256 l1BaseFeeEstimate
            );
    }
}

/// A priced gas estimate for one prepared transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GasQuote {
    pub total_gas: u64,
    pub l1_gas: u64,
    /// Price per gas unit used for both components (L2 base fee on Arbitrum).
    pub gas_price_wei: U256,
    pub l2_cost_wei: U256,
    pub l1_cost_wei: U256,
    pub total_cost_wei: U256,
    /// True when the oracle fell back to the per-step model.
    pub fallback: bool,
}

impl GasQuote {
    /// Price the Arbitrum component split: the node interface bills the L1
    /// share through L2 base-fee units.
    pub fn from_components(total_gas: u64, l1_gas: u64, l2_base_fee: U256) -> Self {
        let l1_gas = l1_gas.min(total_gas);
        let l2_gas = total_gas - l1_gas;
        let l2_cost_wei = U256::from(l2_gas) * l2_base_fee;
        let l1_cost_wei = U256::from(l1_gas) * l2_base_fee;
        Self {
            total_gas,
            l1_gas,
            gas_price_wei: l2_base_fee,
            l2_cost_wei,
            l1_cost_wei,
            total_cost_wei: l2_cost_wei + l1_cost_wei,
            fallback: false,
        }
    }

    /// Flat single-dimension pricing for non-rollup chains.
    pub fn flat(total_gas: u64, gas_price: U256) -> Self {
        let total_cost_wei = U256::from(total_gas) * gas_price;
        Self {
            total_gas,
            l1_gas: 0,
            gas_price_wei: gas_price,
            l2_cost_wei: total_cost_wei,
            l1_cost_wei: U256::ZERO,
            total_cost_wei,
            fallback: false,
        }
    }

    fn as_fallback(mut self) -> Self {
        self.fallback = true;
        self
    }
}

/// Produces a [`GasQuote`] for a candidate transaction. Implementations are
/// infallible: estimation errors degrade internally.
#[async_trait]
pub trait GasOracle: Send + Sync {
    async fn quote(&self, to: Address, data: Bytes, path_steps: usize) -> GasQuote;

    /// Current network gas price, for the submission ceiling gate.
    async fn suggested_gas_price(&self) -> Option<U256>;
}

/// Gas oracle backed by the Arbitrum node interface.
pub struct ArbitrumGasOracle<P> {
    provider: P,
    node_interface: Address,
    caller: Address,
    per_step_gas: u64,
    fallback_gas_price: U256,
}

impl<P: Provider> ArbitrumGasOracle<P> {
    pub fn new(
        provider: P,
        node_interface: Address,
        caller: Address,
        per_step_gas: u64,
        fallback_gas_price: U256,
    ) -> Self {
        Self {
            provider,
            node_interface,
            caller,
            per_step_gas,
            fallback_gas_price,
        }
    }

    fn fallback_quote(&self, path_steps: usize, gas_price: Option<U256>) -> GasQuote {
        let total_gas = per_step_estimate(self.per_step_gas, path_steps);
        GasQuote::flat(total_gas, gas_price.unwrap_or(self.fallback_gas_price)).as_fallback()
    }
}

#[async_trait]
impl<P: Provider + Send + Sync> GasOracle for ArbitrumGasOracle<P> {
    async fn quote(&self, to: Address, data: Bytes, path_steps: usize) -> GasQuote {
        let node = INodeInterface::new(self.node_interface, &self.provider);
        match node
            .gasEstimateComponents(to, false, data)
            .from(self.caller)
            .call()
            .await
        {
            Ok(components) => {
                // A zero L1 share is a valid reading on testnets, not an error.
                GasQuote::from_components(
                    components.gasEstimate,
                    components.gasEstimateForL1,
                    components.baseFee,
                )
            }
            Err(e) => {
                warn!(error = %e, "node interface estimate failed, using per-step fallback");
                let price = self.suggested_gas_price().await;
                self.fallback_quote(path_steps, price)
            }
        }
    }

    async fn suggested_gas_price(&self) -> Option<U256> {
        self.provider.get_gas_price().await.ok().map(U256::from)
    }
}

/// Flat-cost oracle for chains without an L1 data component.
pub struct GenericGasOracle<P> {
    provider: P,
    caller: Address,
    per_step_gas: u64,
    fallback_gas_price: U256,
}

impl<P: Provider> GenericGasOracle<P> {
    pub fn new(provider: P, caller: Address, per_step_gas: u64, fallback_gas_price: U256) -> Self {
        Self {
            provider,
            caller,
            per_step_gas,
            fallback_gas_price,
        }
    }
}

#[async_trait]
impl<P: Provider + Send + Sync> GasOracle for GenericGasOracle<P> {
    async fn quote(&self, to: Address, data: Bytes, path_steps: usize) -> GasQuote {
        let tx = TransactionRequest::default()
            .to(to)
            .from(self.caller)
            .input(TransactionInput::new(data));

        let gas_price = self
            .suggested_gas_price()
            .await
            .unwrap_or(self.fallback_gas_price);

        match self.provider.estimate_gas(tx).await {
            Ok(total_gas) => GasQuote::flat(total_gas, gas_price),
            Err(e) => {
                warn!(error = %e, "eth_estimateGas failed, using per-step fallback");
                GasQuote::flat(per_step_estimate(self.per_step_gas, path_steps), gas_price)
                    .as_fallback()
            }
        }
    }

    async fn suggested_gas_price(&self) -> Option<U256> {
        self.provider.get_gas_price().await.ok().map(U256::from)
    }
}

/// Path-length gas model: flash loan overhead plus one allotment per step.
fn per_step_estimate(per_step_gas: u64, path_steps: usize) -> u64 {
    let steps = path_steps.max(1) as u64;
    per_step_gas * (steps + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arbitrum_components_split_l1_and_l2() {
        // 1M total, 400k of it L1, base fee 0.1 gwei.
        let base_fee = U256::from(100_000_000u64);
        let quote = GasQuote::from_components(1_000_000, 400_000, base_fee);

        assert_eq!(quote.l2_cost_wei, U256::from(600_000u64) * base_fee);
        assert_eq!(quote.l1_cost_wei, U256::from(400_000u64) * base_fee);
        assert_eq!(quote.total_cost_wei, U256::from(1_000_000u64) * base_fee);
        assert!(!quote.fallback);
    }

    #[test]
    fn zero_l1_share_is_a_valid_reading() {
        let quote = GasQuote::from_components(500_000, 0, U256::from(1u64));
        assert_eq!(quote.l1_cost_wei, U256::ZERO);
        assert_eq!(quote.l2_cost_wei, U256::from(500_000u64));
    }

    #[test]
    fn l1_share_never_exceeds_total() {
        // A nonsense reading with l1 > total is clamped rather than underflowing.
        let quote = GasQuote::from_components(100, 500, U256::from(1u64));
        assert_eq!(quote.l1_gas, 100);
        assert_eq!(quote.l2_cost_wei, U256::ZERO);
    }

    #[test]
    fn flat_quote_has_no_l1_bucket() {
        let quote = GasQuote::flat(300_000, U256::from(2_000_000_000u64));
        assert_eq!(quote.l1_cost_wei, U256::ZERO);
        assert_eq!(
            quote.total_cost_wei,
            U256::from(300_000u64) * U256::from(2_000_000_000u64)
        );
    }

    #[test]
    fn per_step_fallback_overshoots_short_paths() {
        // Two swap steps at 150k each plus the loan overhead allotment.
        assert_eq!(per_step_estimate(150_000, 2), 450_000);
        // Degenerate zero-length path still budgets a full call.
        assert_eq!(per_step_estimate(150_000, 0), 300_000);
    }
}

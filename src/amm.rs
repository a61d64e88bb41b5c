//! Integer-exact AMM quoting.
//!
//! V2 pools use the constant-product formula directly. V3 pools are quoted
//! through virtual reserves derived from `L` and `sqrtPriceX96`, then fed
//! through the same formula. The virtual-reserve quote truncates downward at
//! every division, so it never reports more output than an exact tick-walking
//! quoter would.

use crate::pools::{PoolSnapshot, PoolState, FEE_DENOMINATOR_PPM};
use alloy::primitives::{Address, U256, U512};

/// Constant-product output for `amount_in` against `(reserve_in, reserve_out)`
/// with a ppm fee taken on input:
///
/// `out = in * (1e6 - fee) * R_out / (R_in * 1e6 + in * (1e6 - fee))`
pub fn v2_amount_out(amount_in: U256, reserve_in: U256, reserve_out: U256, fee_ppm: u32) -> U256 {
    if amount_in.is_zero() || reserve_in.is_zero() || reserve_out.is_zero() {
        return U256::ZERO;
    }
    let fee_ppm = u64::from(fee_ppm).min(FEE_DENOMINATOR_PPM);
    let keep = U512::from(FEE_DENOMINATOR_PPM - fee_ppm);

    let amount_with_fee = U512::from(amount_in) * keep;
    let numerator = amount_with_fee * U512::from(reserve_out);
    let denominator = U512::from(reserve_in) * U512::from(FEE_DENOMINATOR_PPM) + amount_with_fee;

    // numerator / denominator < reserve_out <= U256::MAX, narrowing is safe
    U256::from(numerator / denominator)
}

/// Virtual reserves of a V3 position at the current price:
/// `r_token0 = L * 2^96 / sqrtP`, `r_token1 = L * sqrtP / 2^96`.
///
/// Both divisions truncate, keeping the derived depth conservative.
pub fn v3_virtual_reserves(sqrt_price_x96: U256, liquidity: u128) -> (U256, U256) {
    if sqrt_price_x96.is_zero() || liquidity == 0 {
        return (U256::ZERO, U256::ZERO);
    }
    let l = U512::from(liquidity);
    let q96 = U512::from(1u8) << 96;
    let sqrt_p = U512::from(sqrt_price_x96);

    let r0: U512 = l * q96 / sqrt_p;
    let r1: U512 = l * sqrt_p / q96;

    let cap = U512::from(U256::MAX);
    (
        U256::from(r0.min(cap)),
        U256::from(r1.min(cap)),
    )
}

/// One leg of a route: which pool, and which of its tokens goes in.
#[derive(Debug, Clone)]
pub struct QuoteLeg<'a> {
    pub snapshot: &'a PoolSnapshot,
    pub token_in: Address,
    /// Effective fee for this walk; lets the cost model buffer risky pools
    /// without mutating the descriptor.
    pub fee_ppm: u32,
}

impl<'a> QuoteLeg<'a> {
    pub fn new(snapshot: &'a PoolSnapshot, token_in: Address) -> Self {
        Self {
            snapshot,
            token_in,
            fee_ppm: snapshot.descriptor.fee_ppm,
        }
    }

    pub fn with_fee(mut self, fee_ppm: u32) -> Self {
        self.fee_ppm = fee_ppm;
        self
    }

    pub fn token_out(&self) -> Address {
        let d = &self.snapshot.descriptor;
        if self.token_in == d.token0 {
            d.token1
        } else {
            d.token0
        }
    }

    /// `(reserve_in, reserve_out)` oriented for this leg's direction.
    fn oriented_reserves(&self) -> Option<(U256, U256)> {
        let d = &self.snapshot.descriptor;
        if self.token_in != d.token0 && self.token_in != d.token1 {
            return None;
        }
        let zero_for_one = self.token_in == d.token0;
        let (r0, r1) = match self.snapshot.state {
            PoolState::V2 { reserve0, reserve1 } => (reserve0, reserve1),
            PoolState::V3 {
                sqrt_price_x96,
                liquidity,
                ..
            } => v3_virtual_reserves(sqrt_price_x96, liquidity),
        };
        if r0.is_zero() || r1.is_zero() {
            return None;
        }
        Some(if zero_for_one { (r0, r1) } else { (r1, r0) })
    }

    /// Quote this leg. `None` when the pool is empty or the token does not
    /// belong to it.
    pub fn amount_out(&self, amount_in: U256) -> Option<U256> {
        let (reserve_in, reserve_out) = self.oriented_reserves()?;
        Some(v2_amount_out(amount_in, reserve_in, reserve_out, self.fee_ppm))
    }
}

/// Walk an ordered route, feeding each leg's output into the next.
///
/// Returns the final amount, or `None` when any leg cannot be quoted or the
/// legs do not chain (`token_out != next token_in`).
pub fn walk_path(legs: &[QuoteLeg<'_>], input_amount: U256) -> Option<U256> {
    let mut amount = input_amount;
    let mut expected_in: Option<Address> = None;

    for leg in legs {
        if let Some(token) = expected_in {
            if token != leg.token_in {
                return None;
            }
        }
        amount = leg.amount_out(amount)?;
        expected_in = Some(leg.token_out());
    }
    Some(amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pools::{pow10, DexKind, PoolDescriptor};
    use alloy::primitives::address;
    use proptest::prelude::*;
    use std::sync::Arc;

    const T0: Address = address!("0000000000000000000000000000000000000001");
    const T1: Address = address!("0000000000000000000000000000000000000002");

    fn v2_snapshot(reserve0: U256, reserve1: U256, fee_ppm: u32) -> PoolSnapshot {
        PoolSnapshot {
            descriptor: Arc::new(PoolDescriptor::new(
                "v2", DexKind::V2, Address::ZERO, T0, T1, 18, 18, fee_ppm,
            )),
            block_number: 1,
            observed_at_ms: 0,
            state: PoolState::V2 { reserve0, reserve1 },
        }
    }

    fn v3_snapshot(sqrt_price_x96: U256, liquidity: u128, fee_ppm: u32) -> PoolSnapshot {
        PoolSnapshot {
            descriptor: Arc::new(PoolDescriptor::new(
                "v3", DexKind::V3, Address::ZERO, T0, T1, 18, 18, fee_ppm,
            )),
            block_number: 1,
            observed_at_ms: 0,
            state: PoolState::V3 {
                sqrt_price_x96,
                liquidity,
                tick: 0,
            },
        }
    }

    #[test]
    fn v2_amount_out_matches_uniswap_reference() {
        // 1 ETH into a 100 ETH / 200_000 USDC pool at 30 bps.
        let out = v2_amount_out(
            pow10(18),
            U256::from(100u64) * pow10(18),
            U256::from(200_000u64) * pow10(6),
            3000,
        );
        // Same figures as the canonical router math: ~1974 USDC.
        assert!(out > U256::from(1_970_000_000u64));
        assert!(out < U256::from(1_980_000_000u64));
    }

    #[test]
    fn v2_amount_out_zero_cases() {
        let r = U256::from(1000u64);
        assert_eq!(v2_amount_out(U256::ZERO, r, r, 3000), U256::ZERO);
        assert_eq!(v2_amount_out(r, U256::ZERO, r, 3000), U256::ZERO);
        assert_eq!(v2_amount_out(r, r, U256::ZERO, 3000), U256::ZERO);
    }

    #[test]
    fn v3_virtual_reserves_at_unit_price() {
        // sqrtP = 2^96 -> price 1.0 -> both virtual reserves equal L.
        let (r0, r1) = v3_virtual_reserves(U256::from(1u8) << 96, 5_000_000);
        assert_eq!(r0, U256::from(5_000_000u64));
        assert_eq!(r1, U256::from(5_000_000u64));
    }

    #[test]
    fn quote_leg_orients_by_token_in() {
        let snap = v2_snapshot(
            U256::from(100u64) * pow10(18),
            U256::from(300_000u64) * pow10(18),
            3000,
        );
        let forward = QuoteLeg::new(&snap, T0).amount_out(pow10(18)).unwrap();
        let backward = QuoteLeg::new(&snap, T1).amount_out(pow10(18)).unwrap();
        // Selling 1 token0 yields ~3000 token1; selling 1 token1 yields ~1/3000 token0.
        assert!(forward > U256::from(2_900u64) * pow10(18));
        assert!(backward < pow10(18) / U256::from(2_000u64));
    }

    #[test]
    fn quote_leg_rejects_foreign_token() {
        let snap = v2_snapshot(pow10(18), pow10(18), 3000);
        let foreign = address!("00000000000000000000000000000000000000ff");
        assert!(QuoteLeg::new(&snap, foreign).amount_out(pow10(18)).is_none());
    }

    #[test]
    fn walk_path_chains_two_legs() {
        // Buy cheap on A (price 3000), sell dear on B (price 3030).
        let a = v2_snapshot(
            U256::from(1_000u64) * pow10(18),
            U256::from(3_000_000u64) * pow10(18),
            500,
        );
        let b = v2_snapshot(
            U256::from(1_000u64) * pow10(18),
            U256::from(3_030_000u64) * pow10(18),
            500,
        );
        // Borrow token1, buy token0 on A, sell token0 on B, end in token1.
        let legs = [QuoteLeg::new(&a, T1), QuoteLeg::new(&b, T0)];
        let input = U256::from(3_000u64) * pow10(18);
        let out = walk_path(&legs, input).unwrap();
        assert!(out > input, "spread should beat two 5 bps fees");
    }

    #[test]
    fn walk_path_rejects_broken_chain() {
        let a = v2_snapshot(pow10(18), pow10(18), 500);
        let b = v2_snapshot(pow10(18), pow10(18), 500);
        // Both legs consume token0: leg 2's token_in != leg 1's token_out.
        let legs = [QuoteLeg::new(&a, T0), QuoteLeg::new(&b, T0)];
        assert!(walk_path(&legs, pow10(18)).is_none());
    }

    #[test]
    fn v3_leg_quotes_like_v2_over_virtual_depth() {
        let snap = v3_snapshot(U256::from(1u8) << 96, 10u128.pow(24), 3000);
        let out = QuoteLeg::new(&snap, T0).amount_out(pow10(18)).unwrap();
        let reference = v2_amount_out(
            pow10(18),
            U256::from(10u64).pow(U256::from(24u8)),
            U256::from(10u64).pow(U256::from(24u8)),
            3000,
        );
        assert_eq!(out, reference);
    }

    #[test]
    fn v3_quote_is_conservative_against_spot() {
        // At any price, the virtual-reserve quote with zero fee must stay
        // below the infinite-depth spot conversion.
        for (price, root) in [(1u64, 1u64), (4, 2), (9, 3), (2500, 50)] {
            let sqrt_price = U256::from(root) << 96;
            let snap = v3_snapshot(sqrt_price, 10u128.pow(24), 0);
            let input = pow10(18);
            let out = QuoteLeg::new(&snap, T0).amount_out(input).unwrap();
            let spot = input * U256::from(price);
            assert!(out < spot, "price {price}: {out} >= {spot}");
        }
    }

    proptest! {
        // Output is strictly increasing in input and bounded by the spot rate
        // x * R_out / R_in over the safe input range.
        #[test]
        fn v2_out_monotone_and_below_spot(
            reserve_in in 1_000_000u128..u128::MAX / 2,
            reserve_out in 1_000_000u128..u128::MAX / 2,
            x in 1u128..=1_000_000u128,
        ) {
            let r_in = U256::from(reserve_in);
            let r_out = U256::from(reserve_out);
            let x = U256::from((x * (reserve_in / 2_000_000)).max(1));

            let out = v2_amount_out(x, r_in, r_out, 3000);
            let out_next = v2_amount_out(x + U256::from(1_000u64), r_in, r_out, 3000);
            prop_assert!(out_next >= out);

            let spot = crate::pools::mul_div(x, r_out, r_in).unwrap();
            prop_assert!(out < spot || spot.is_zero());
        }

        #[test]
        fn v2_out_never_drains_pool(
            reserve_in in 1u128..u128::MAX,
            reserve_out in 1u128..u128::MAX,
            amount in 1u128..u128::MAX,
        ) {
            let out = v2_amount_out(
                U256::from(amount),
                U256::from(reserve_in),
                U256::from(reserve_out),
                3000,
            );
            prop_assert!(out < U256::from(reserve_out));
        }
    }
}

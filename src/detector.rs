//! Cross-pool opportunity detection.
//!
//! Groups the latest live snapshots by canonical token pair, ranks every
//! directed (buy, sell) combination by fee-adjusted spread, and emits one
//! seed per pair when the spread clears the configured threshold. Two fee
//! tiers of the same DEX are distinct pools here; cross-tier routes are the
//! main source of spreads that clear the cost floor.

use crate::pools::{mul_div, PoolSnapshot, FEE_DENOMINATOR_PPM};
use alloy::primitives::{Address, U256};
use std::collections::HashMap;
use tracing::debug;

/// A directed spread between two pools of the same pair, before sizing.
#[derive(Debug, Clone)]
pub struct OpportunitySeed {
    pub pair: (Address, Address),
    /// Leg with the lowest fee-adjusted cost to acquire the base token.
    pub buy: PoolSnapshot,
    /// Leg with the highest fee-adjusted return for the base token.
    pub sell: PoolSnapshot,
    pub delta_bps: u32,
}

impl OpportunitySeed {
    pub fn label(&self) -> String {
        format!(
            "{} -> {}",
            self.buy.descriptor.label, self.sell.descriptor.label
        )
    }
}

/// A pair whose best spread did not clear the threshold this tick.
#[derive(Debug, Clone)]
pub struct BelowThreshold {
    pub pair: (Address, Address),
    pub best_delta_bps: u32,
}

#[derive(Debug, Default)]
pub struct ScanResult {
    pub seeds: Vec<OpportunitySeed>,
    pub below_threshold: Vec<BelowThreshold>,
}

/// Effective cost of buying the base token: spot price marked up by the fee.
fn effective_buy_price(snapshot: &PoolSnapshot) -> Option<U256> {
    let price = snapshot.normalized_price()?;
    let keep = FEE_DENOMINATOR_PPM - u64::from(snapshot.descriptor.fee_ppm);
    mul_div(price, U256::from(FEE_DENOMINATOR_PPM), U256::from(keep))
}

/// Effective return from selling the base token: spot price after the fee.
fn effective_sell_price(snapshot: &PoolSnapshot) -> Option<U256> {
    let price = snapshot.normalized_price()?;
    let keep = FEE_DENOMINATOR_PPM - u64::from(snapshot.descriptor.fee_ppm);
    mul_div(price, U256::from(keep), U256::from(FEE_DENOMINATOR_PPM))
}

fn delta_bps(buy_effective: U256, sell_effective: U256) -> u32 {
    if sell_effective <= buy_effective || buy_effective.is_zero() {
        return 0;
    }
    let spread = sell_effective - buy_effective;
    mul_div(spread, U256::from(10_000u64), buy_effective)
        .map(|d| d.try_into().unwrap_or(u32::MAX))
        .unwrap_or(0)
}

/// Detects the best directed spread per pair across the given snapshots.
pub struct OpportunityDetector {
    delta_threshold_bps: u32,
}

impl OpportunityDetector {
    pub fn new(delta_threshold_bps: u32) -> Self {
        Self {
            delta_threshold_bps,
        }
    }

    pub fn scan(&self, snapshots: &[PoolSnapshot]) -> ScanResult {
        let mut pairs: HashMap<(Address, Address), Vec<&PoolSnapshot>> = HashMap::new();
        for snap in snapshots.iter().filter(|s| s.is_live()) {
            pairs.entry(snap.descriptor.pair_key()).or_default().push(snap);
        }

        let mut result = ScanResult::default();

        for (pair, pool_snaps) in pairs {
            if pool_snaps.len() < 2 {
                continue;
            }

            let mut best: Option<OpportunitySeed> = None;
            for buy in &pool_snaps {
                for sell in &pool_snaps {
                    if buy.descriptor.address == sell.descriptor.address {
                        continue;
                    }
                    let (Some(buy_eff), Some(sell_eff)) =
                        (effective_buy_price(buy), effective_sell_price(sell))
                    else {
                        continue;
                    };
                    let delta = delta_bps(buy_eff, sell_eff);
                    if delta == 0 {
                        continue;
                    }

                    let candidate = OpportunitySeed {
                        pair,
                        buy: (*buy).clone(),
                        sell: (*sell).clone(),
                        delta_bps: delta,
                    };
                    best = Some(match best.take() {
                        None => candidate,
                        Some(current) => pick_better(current, candidate),
                    });
                }
            }

            match best {
                Some(seed) if seed.delta_bps >= self.delta_threshold_bps => {
                    debug!(
                        route = %seed.label(),
                        delta_bps = seed.delta_bps,
                        "spread above threshold"
                    );
                    result.seeds.push(seed);
                }
                Some(seed) => {
                    result.below_threshold.push(BelowThreshold {
                        pair,
                        best_delta_bps: seed.delta_bps,
                    });
                }
                None => {}
            }
        }

        // Deterministic processing order: widest spread first.
        result.seeds.sort_by(|a, b| b.delta_bps.cmp(&a.delta_bps));
        result
    }
}

/// Tie-breaking: max spread, then lower buy-leg fee, then deeper sell leg.
fn pick_better(current: OpportunitySeed, candidate: OpportunitySeed) -> OpportunitySeed {
    if candidate.delta_bps != current.delta_bps {
        return if candidate.delta_bps > current.delta_bps {
            candidate
        } else {
            current
        };
    }
    if candidate.buy.descriptor.fee_ppm != current.buy.descriptor.fee_ppm {
        return if candidate.buy.descriptor.fee_ppm < current.buy.descriptor.fee_ppm {
            candidate
        } else {
            current
        };
    }
    if candidate.sell.depth() > current.sell.depth() {
        candidate
    } else {
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pools::{pow10, DexKind, PoolDescriptor, PoolState};
    use alloy::primitives::address;
    use std::sync::Arc;

    const WETH: Address = address!("0000000000000000000000000000000000000a01");
    const USDC: Address = address!("0000000000000000000000000000000000000b02");

    fn v3_pool(label: &str, addr_byte: u8, fee_ppm: u32, sqrt_price_x96: U256, l: u128) -> PoolSnapshot {
        let mut addr = [0u8; 20];
        addr[19] = addr_byte;
        PoolSnapshot {
            descriptor: Arc::new(PoolDescriptor::new(
                label,
                DexKind::V3,
                Address::from(addr),
                WETH,
                USDC,
                18,
                18,
                fee_ppm,
            )),
            block_number: 50,
            observed_at_ms: 0,
            state: PoolState::V3 {
                sqrt_price_x96,
                liquidity: l,
                tick: 0,
            },
        }
    }

    fn v2_pool(label: &str, addr_byte: u8, fee_ppm: u32, r0: U256, r1: U256) -> PoolSnapshot {
        let mut addr = [0u8; 20];
        addr[19] = addr_byte;
        PoolSnapshot {
            descriptor: Arc::new(PoolDescriptor::new(
                label,
                DexKind::V2,
                Address::from(addr),
                WETH,
                USDC,
                18,
                18,
                fee_ppm,
            )),
            block_number: 50,
            observed_at_ms: 0,
            state: PoolState::V2 {
                reserve0: r0,
                reserve1: r1,
            },
        }
    }

    // sqrtPriceX96 for an integer price p with equal decimals.
    fn sqrt_price(p: u64) -> U256 {
        // floor(sqrt(p) * 2^96) computed as sqrt(p * 2^192) over integers
        let target = U256::from(p) << 192;
        let mut lo = U256::ZERO;
        let mut hi = U256::from(1u8) << 128;
        while lo < hi {
            let mid = (lo + hi + U256::from(1u8)) >> 1;
            if mid * mid <= target {
                lo = mid;
            } else {
                hi = mid - U256::from(1u8);
            }
        }
        lo
    }

    #[test]
    fn cross_tier_spread_is_detected() {
        // Same DEX, two fee tiers: 3000.00 @ 5 bps vs 3018.00 @ 30 bps.
        let a = v3_pool("uni:500", 1, 500, sqrt_price(3000), 10u128.pow(24));
        let b = v3_pool("uni:3000", 2, 3000, sqrt_price(3018), 10u128.pow(24));

        let detector = OpportunityDetector::new(10);
        let result = detector.scan(&[a, b]);

        assert_eq!(result.seeds.len(), 1);
        let seed = &result.seeds[0];
        assert_eq!(seed.buy.descriptor.label, "uni:500");
        assert_eq!(seed.sell.descriptor.label, "uni:3000");
        // 60 bps raw spread minus 35 bps of fees leaves ~25 bps.
        assert!(seed.delta_bps >= 20 && seed.delta_bps <= 30, "got {}", seed.delta_bps);
    }

    #[test]
    fn tiny_spread_is_reported_below_threshold() {
        let a = v3_pool("uni:500", 1, 500, sqrt_price(3000), 10u128.pow(24));
        let b = v3_pool("uni:500b", 2, 500, sqrt_price(3001), 10u128.pow(24));

        let detector = OpportunityDetector::new(50);
        let result = detector.scan(&[a, b]);

        assert!(result.seeds.is_empty());
        assert_eq!(result.below_threshold.len(), 1);
        assert!(result.below_threshold[0].best_delta_bps < 50);
    }

    #[test]
    fn fee_adjustment_flips_naive_direction() {
        // Raw prices say buy A sell B, but B's 1% fee eats the 30 bps spread;
        // no profitable direction exists.
        let a = v2_pool("a", 1, 500, pow10(18) * U256::from(1000u64), pow10(18) * U256::from(3_000_000u64));
        let b = v2_pool("b", 2, 10_000, pow10(18) * U256::from(1000u64), pow10(18) * U256::from(3_009_000u64));

        let detector = OpportunityDetector::new(1);
        let result = detector.scan(&[a, b]);
        assert!(result.seeds.is_empty());
    }

    #[test]
    fn single_pool_pairs_are_skipped() {
        let a = v3_pool("solo", 1, 500, sqrt_price(3000), 10u128.pow(24));
        let detector = OpportunityDetector::new(1);
        let result = detector.scan(&[a]);
        assert!(result.seeds.is_empty());
        assert!(result.below_threshold.is_empty());
    }

    #[test]
    fn equal_spread_prefers_lower_buy_fee() {
        // Two buy candidates at identical prices but different fees against
        // one rich sell pool: the cheaper tier must win the buy leg.
        let cheap = v2_pool("cheap", 1, 500, pow10(18) * U256::from(1000u64), pow10(18) * U256::from(3_000_000u64));
        let pricey = v2_pool(
            "pricey",
            2,
            3000,
            pow10(18) * U256::from(1000u64),
            pow10(18) * U256::from(3_000_000u64),
        );
        let sell = v2_pool("sell", 3, 500, pow10(18) * U256::from(1000u64), pow10(18) * U256::from(3_100_000u64));

        let detector = OpportunityDetector::new(1);
        let result = detector.scan(&[cheap, pricey, sell]);
        assert_eq!(result.seeds.len(), 1);
        assert_eq!(result.seeds[0].buy.descriptor.label, "cheap");
    }

    #[test]
    fn dead_pools_are_excluded() {
        let live = v3_pool("live", 1, 500, sqrt_price(3000), 10u128.pow(24));
        let dead = v2_pool("dead", 2, 500, U256::ZERO, U256::ZERO);
        let detector = OpportunityDetector::new(1);
        let result = detector.scan(&[live, dead]);
        assert!(result.seeds.is_empty());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // Identical pools never produce a seed: fees make any same-price
            // round trip strictly losing.
            #[test]
            fn equal_prices_never_spread(
                price in 1u64..1_000_000,
                fee_ppm in 1u32..50_000,
                n_pools in 2usize..6,
            ) {
                let snaps: Vec<PoolSnapshot> = (0..n_pools)
                    .map(|i| v2_pool(
                        &format!("p{i}"),
                        i as u8 + 1,
                        fee_ppm,
                        pow10(18) * U256::from(1_000u64),
                        pow10(18) * U256::from(1_000u64) * U256::from(price),
                    ))
                    .collect();
                let result = OpportunityDetector::new(1).scan(&snaps);
                prop_assert!(result.seeds.is_empty());
            }

            // Any emitted seed clears the configured threshold and orients
            // buy below sell on effective prices.
            #[test]
            fn seeds_respect_threshold_and_orientation(
                price_a in 100u64..10_000,
                spread_bps in 0u64..500,
                threshold in 1u32..100,
            ) {
                let price_b = price_a + price_a * spread_bps / 10_000;
                let a = v2_pool(
                    "a", 1, 500,
                    pow10(18) * U256::from(1_000u64),
                    pow10(18) * U256::from(1_000u64) * U256::from(price_a),
                );
                let b = v2_pool(
                    "b", 2, 500,
                    pow10(18) * U256::from(1_000u64),
                    pow10(18) * U256::from(1_000u64) * U256::from(price_b),
                );
                let result = OpportunityDetector::new(threshold).scan(&[a, b]);
                for seed in &result.seeds {
                    prop_assert!(seed.delta_bps >= threshold);
                    let buy = seed.buy.normalized_price().unwrap();
                    let sell = seed.sell.normalized_price().unwrap();
                    prop_assert!(sell > buy);
                }
                for below in &result.below_threshold {
                    prop_assert!(below.best_delta_bps < threshold);
                }
            }
        }
    }
}

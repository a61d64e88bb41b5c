//! Pool data model: descriptors, observed snapshots, fixed-point prices.
//!
//! All reserve and price math is integer-only. Prices are U256 values scaled
//! by 1e18 with 512-bit intermediates, so no reserve magnitude can overflow
//! and nothing is rounded through a float.

pub mod reader;

use alloy::primitives::{Address, U256, U512};
use std::fmt;
use std::sync::Arc;

/// Scale factor for fixed-point prices (18 fractional digits).
pub const PRICE_SCALE: u64 = 1_000_000_000_000_000_000;

/// Fee denominator: pool fees are carried in ppm (hundredths of a bip),
/// matching the on-chain V3 fee-tier units (500 = 0.05%).
pub const FEE_DENOMINATOR_PPM: u64 = 1_000_000;

/// Supported pool families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DexKind {
    /// Constant-product pair with on-chain reserves (`getReserves`).
    V2,
    /// Concentrated-liquidity pool (`slot0` + `liquidity`).
    V3,
    /// Liquidity-book style pool. Quoted like V2 over virtual depth, but
    /// flagged for variable-fee risk in the cost model.
    LiquidityBook,
}

impl DexKind {
    /// Pools whose fee can move between quote and execution.
    pub fn variable_fee_risk(&self) -> bool {
        matches!(self, DexKind::LiquidityBook)
    }

    /// Pools where the operator can move the fee against us.
    pub fn fee_manipulation_risk(&self) -> bool {
        matches!(self, DexKind::LiquidityBook)
    }
}

impl fmt::Display for DexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DexKind::V2 => write!(f, "V2"),
            DexKind::V3 => write!(f, "V3"),
            DexKind::LiquidityBook => write!(f, "LB"),
        }
    }
}

/// Immutable identity of a registered pool.
///
/// Invariant: `token0 < token1` byte-wise, matching on-chain ordering. The
/// constructor enforces it so every downstream pair key is canonical.
#[derive(Debug, Clone)]
pub struct PoolDescriptor {
    pub label: String,
    pub dex: DexKind,
    pub address: Address,
    pub token0: Address,
    pub token1: Address,
    pub decimals0: u8,
    pub decimals1: u8,
    /// Fee in ppm (on-chain V3 units; 3000 for canonical V2 pairs).
    pub fee_ppm: u32,
    /// Optional router hint for adapter selection.
    pub router: Option<Address>,
}

impl PoolDescriptor {
    /// Build a descriptor, normalizing token order to the on-chain invariant.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        label: impl Into<String>,
        dex: DexKind,
        address: Address,
        token0: Address,
        token1: Address,
        decimals0: u8,
        decimals1: u8,
        fee_ppm: u32,
    ) -> Self {
        let (token0, token1, decimals0, decimals1) = if token0 < token1 {
            (token0, token1, decimals0, decimals1)
        } else {
            (token1, token0, decimals1, decimals0)
        };

        Self {
            label: label.into(),
            dex,
            address,
            token0,
            token1,
            decimals0,
            decimals1,
            fee_ppm,
            router: None,
        }
    }

    pub fn with_router(mut self, router: Address) -> Self {
        self.router = Some(router);
        self
    }

    /// Canonical pair key: `(min(t0, t1), max(t0, t1))`.
    pub fn pair_key(&self) -> (Address, Address) {
        (self.token0, self.token1)
    }

    /// Fee in basis points for display and spread math.
    pub fn fee_bps(&self) -> u32 {
        self.fee_ppm / 100
    }
}

/// Raw observed pool state for one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    V2 {
        reserve0: U256,
        reserve1: U256,
    },
    V3 {
        sqrt_price_x96: U256,
        liquidity: u128,
        tick: i32,
    },
}

/// A timestamped observation of one pool.
#[derive(Debug, Clone)]
pub struct PoolSnapshot {
    pub descriptor: Arc<PoolDescriptor>,
    pub block_number: u64,
    pub observed_at_ms: i64,
    pub state: PoolState,
}

impl PoolSnapshot {
    /// Price of token0 quoted in token1, scaled by 1e18.
    ///
    /// V2: `reserve1 * 10^dec0 / (reserve0 * 10^dec1)`.
    /// V3: `(sqrtPriceX96 / 2^96)^2 * 10^(dec0 - dec1)`.
    ///
    /// Returns `None` for empty pools or a price that cannot be represented.
    pub fn normalized_price(&self) -> Option<U256> {
        let d = &self.descriptor;
        match self.state {
            PoolState::V2 { reserve0, reserve1 } => {
                if reserve0.is_zero() || reserve1.is_zero() {
                    return None;
                }
                let num = U512::from(reserve1)
                    * U512::from(pow10(d.decimals0))
                    * U512::from(PRICE_SCALE);
                let den = U512::from(reserve0) * U512::from(pow10(d.decimals1));
                narrow(num / den)
            }
            PoolState::V3 { sqrt_price_x96, .. } => {
                if sqrt_price_x96.is_zero() {
                    return None;
                }
                // price = sqrtP^2 * 10^dec0 * SCALE / (2^192 * 10^dec1)
                let num = U512::from(sqrt_price_x96)
                    * U512::from(sqrt_price_x96)
                    * U512::from(pow10(d.decimals0))
                    * U512::from(PRICE_SCALE);
                let den = (U512::from(1u8) << 192) * U512::from(pow10(d.decimals1));
                narrow(num / den)
            }
        }
    }

    /// Price of token1 quoted in token0, scaled by 1e18.
    pub fn inverse_price(&self) -> Option<U256> {
        let price = self.normalized_price()?;
        if price.is_zero() {
            return None;
        }
        let num = U512::from(PRICE_SCALE) * U512::from(PRICE_SCALE);
        narrow(num / U512::from(price))
    }

    /// True when the observation carries usable depth on both sides.
    pub fn is_live(&self) -> bool {
        match self.state {
            PoolState::V2 { reserve0, reserve1 } => !reserve0.is_zero() && !reserve1.is_zero(),
            PoolState::V3 {
                sqrt_price_x96,
                liquidity,
                ..
            } => !sqrt_price_x96.is_zero() && liquidity > 0,
        }
    }

    /// Depth proxy used for detector tie-breaking: V2 reserve0, V3 liquidity L.
    pub fn depth(&self) -> U256 {
        match self.state {
            PoolState::V2 { reserve0, .. } => reserve0,
            PoolState::V3 { liquidity, .. } => U256::from(liquidity),
        }
    }
}

/// 10^exp as U256. Token decimals are <= 36 in every registry we load.
pub fn pow10(exp: u8) -> U256 {
    U256::from(10u64).pow(U256::from(exp))
}

/// `a * b / den` with a 512-bit intermediate. `None` on zero denominator or
/// a result wider than 256 bits.
pub fn mul_div(a: U256, b: U256, den: U256) -> Option<U256> {
    if den.is_zero() {
        return None;
    }
    let wide = U512::from(a) * U512::from(b) / U512::from(den);
    narrow(wide)
}

fn narrow(wide: U512) -> Option<U256> {
    if wide > U512::from(U256::MAX) {
        None
    } else {
        Some(U256::from(wide))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    fn descriptor(dex: DexKind, dec0: u8, dec1: u8, fee_ppm: u32) -> Arc<PoolDescriptor> {
        Arc::new(PoolDescriptor::new(
            "TEST",
            dex,
            Address::ZERO,
            address!("0000000000000000000000000000000000000001"),
            address!("0000000000000000000000000000000000000002"),
            dec0,
            dec1,
            fee_ppm,
        ))
    }

    fn snapshot(descriptor: Arc<PoolDescriptor>, state: PoolState) -> PoolSnapshot {
        PoolSnapshot {
            descriptor,
            block_number: 100,
            observed_at_ms: 1_700_000_000_000,
            state,
        }
    }

    #[test]
    fn descriptor_normalizes_token_order() {
        let a = address!("00000000000000000000000000000000000000aa");
        let b = address!("0000000000000000000000000000000000000001");
        let d = PoolDescriptor::new("X", DexKind::V2, Address::ZERO, a, b, 18, 6, 3000);
        assert!(d.token0 < d.token1);
        assert_eq!(d.decimals0, 6);
        assert_eq!(d.decimals1, 18);
    }

    #[test]
    fn v2_price_equal_decimals() {
        // 100 base / 300_000 quote -> price 3000.0
        let d = descriptor(DexKind::V2, 18, 18, 3000);
        let snap = snapshot(
            d,
            PoolState::V2 {
                reserve0: U256::from(100u64) * pow10(18),
                reserve1: U256::from(300_000u64) * pow10(18),
            },
        );
        let price = snap.normalized_price().unwrap();
        assert_eq!(price, U256::from(3000u64) * U256::from(PRICE_SCALE));
    }

    #[test]
    fn v2_price_mixed_decimals() {
        // 100 WETH (18 dec) vs 300_000 USDC (6 dec) -> 3000 USDC/WETH
        let d = descriptor(DexKind::V2, 18, 6, 3000);
        let snap = snapshot(
            d,
            PoolState::V2 {
                reserve0: U256::from(100u64) * pow10(18),
                reserve1: U256::from(300_000u64) * pow10(6),
            },
        );
        let price = snap.normalized_price().unwrap();
        assert_eq!(price, U256::from(3000u64) * U256::from(PRICE_SCALE));
    }

    #[test]
    fn v3_price_from_sqrt_price() {
        // sqrtPriceX96 = 2 * 2^96 -> raw price 4.0 with equal decimals.
        let d = descriptor(DexKind::V3, 18, 18, 500);
        let snap = snapshot(
            d,
            PoolState::V3 {
                sqrt_price_x96: U256::from(2u8) << 96,
                liquidity: 1_000_000,
                tick: 0,
            },
        );
        let price = snap.normalized_price().unwrap();
        assert_eq!(price, U256::from(4u64) * U256::from(PRICE_SCALE));
    }

    #[test]
    fn inverse_price_round_trips() {
        let d = descriptor(DexKind::V2, 18, 18, 3000);
        let snap = snapshot(
            d,
            PoolState::V2 {
                reserve0: U256::from(1u64) * pow10(18),
                reserve1: U256::from(4u64) * pow10(18),
            },
        );
        let price = snap.normalized_price().unwrap();
        let inverse = snap.inverse_price().unwrap();
        assert_eq!(price, U256::from(4u64) * U256::from(PRICE_SCALE));
        assert_eq!(inverse, U256::from(PRICE_SCALE) / U256::from(4u64));
    }

    #[test]
    fn empty_pool_has_no_price() {
        let d = descriptor(DexKind::V2, 18, 18, 3000);
        let snap = snapshot(
            d,
            PoolState::V2 {
                reserve0: U256::ZERO,
                reserve1: U256::from(5u64),
            },
        );
        assert!(snap.normalized_price().is_none());
        assert!(!snap.is_live());
    }

    #[test]
    fn v3_price_realistic_weth_usdc() {
        // An 18/6-decimal pair trading at 3000: raw price 3e-9, sqrtP about
        // 4.34e24. Derived from first principles with an integer sqrt.
        let target = (U256::from(3000u64) << 192) / pow10(12);
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

        let d = descriptor(DexKind::V3, 18, 6, 500);
        let snap = snapshot(
            d,
            PoolState::V3 {
                sqrt_price_x96: lo,
                liquidity: 1 << 60,
                tick: 0,
            },
        );
        let price = snap.normalized_price().unwrap();
        let scale = U256::from(PRICE_SCALE);
        assert!(price > U256::from(2_999u64) * scale, "price {price}");
        assert!(price < U256::from(3_001u64) * scale, "price {price}");
    }

    #[test]
    fn mul_div_survives_wide_intermediates() {
        // (2^200 * 2^100) / 2^100 = 2^200: the product alone overflows U256.
        let a = U256::from(1u8) << 200;
        let b = U256::from(1u8) << 100;
        let den = U256::from(1u8) << 100;
        assert_eq!(mul_div(a, b, den), Some(a));
        assert_eq!(mul_div(a, b, U256::ZERO), None);
    }
}

//! Concurrent on-chain pool reader.
//!
//! One `eth_blockNumber` per cycle, one state read per pool, all pool reads
//! issued in parallel and individually bounded by a timeout. Per-pool
//! failures never abort the cycle; they feed a consecutive-failure counter
//! that marks the pool stale until a read succeeds again.

use super::{DexKind, PoolDescriptor, PoolSnapshot, PoolState};
use alloy::primitives::{Address, U256};
use alloy::providers::Provider;
use alloy::sol;
use dashmap::DashMap;
use eyre::Result;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

sol! {
    #[sol(rpc)]
    interface IUniswapV2Pair {
        function getReserves() external view returns (uint112 reserve0, uint112 reserve1, uint32 blockTimestampLast);
    }
}

sol! {
    #[sol(rpc)]
    interface IUniswapV3Pool {
        function slot0() external view returns (
            uint160 sqrtPriceX96,
            int24 tick,
            uint16 observationIndex,
            uint16 observationCardinality,
            uint16 observationCardinalityNext,
            uint8 feeProtocol,
            bool unlocked
        );
        function liquidity() external view returns (uint128);
    }
}

sol! {
    #[sol(rpc)]
    interface ILBPair {
        function getReserves() external view returns (uint128 reserveX, uint128 reserveY);
    }
}

/// Result of one poll cycle.
#[derive(Debug)]
pub struct PollOutcome {
    pub snapshots: Vec<PoolSnapshot>,
    pub head_block: u64,
    /// `(pool label, error text)` for every failed read this cycle.
    pub errors: Vec<(String, String)>,
}

/// Fetches the freshest snapshot of every registered pool each cycle.
pub struct PoolReader<P> {
    provider: P,
    pools: Vec<Arc<PoolDescriptor>>,
    read_timeout: Duration,
    max_retries: u32,
    failures: DashMap<Address, u32>,
}

impl<P: Provider + Clone> PoolReader<P> {
    pub fn new(
        provider: P,
        pools: Vec<Arc<PoolDescriptor>>,
        read_timeout: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            provider,
            pools,
            read_timeout,
            max_retries,
            failures: DashMap::new(),
        }
    }

    /// A pool is stale once it has failed `max_retries` consecutive reads.
    pub fn is_stale(&self, pool: Address) -> bool {
        self.failures
            .get(&pool)
            .map(|f| *f >= self.max_retries)
            .unwrap_or(false)
    }

    /// Pools currently excluded from pair groupings.
    pub fn stale_pools(&self) -> Vec<Address> {
        self.failures
            .iter()
            .filter(|e| *e.value() >= self.max_retries)
            .map(|e| *e.key())
            .collect()
    }

    /// Read every pool once, in parallel, against a single head block query.
    pub async fn poll(&self) -> Result<PollOutcome> {
        let head_block = self.provider.get_block_number().await?;
        let observed_at_ms = chrono::Utc::now().timestamp_millis();

        let reads = self.pools.iter().map(|descriptor| {
            let descriptor = Arc::clone(descriptor);
            let provider = self.provider.clone();
            let deadline = self.read_timeout;
            async move {
                let result = tokio::time::timeout(
                    deadline,
                    read_pool_state(&provider, &descriptor),
                )
                .await;
                let state = match result {
                    Ok(Ok(state)) => Ok(state),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(format!("read timed out after {deadline:?}")),
                };
                (descriptor, state)
            }
        });

        let mut snapshots = Vec::with_capacity(self.pools.len());
        let mut errors = Vec::new();

        for (descriptor, state) in join_all(reads).await {
            match state {
                Ok(state) => {
                    self.failures.insert(descriptor.address, 0);
                    snapshots.push(PoolSnapshot {
                        descriptor,
                        block_number: head_block,
                        observed_at_ms,
                        state,
                    });
                }
                Err(reason) => {
                    let mut entry = self.failures.entry(descriptor.address).or_insert(0);
                    *entry += 1;
                    if *entry >= self.max_retries {
                        warn!(
                            pool = %descriptor.label,
                            failures = *entry,
                            "pool marked stale after consecutive read failures"
                        );
                    } else {
                        debug!(pool = %descriptor.label, %reason, "pool read failed");
                    }
                    errors.push((descriptor.label.clone(), reason));
                }
            }
        }

        Ok(PollOutcome {
            snapshots,
            head_block,
            errors,
        })
    }
}

async fn read_pool_state<P: Provider>(
    provider: &P,
    descriptor: &PoolDescriptor,
) -> Result<PoolState> {
    match descriptor.dex {
        DexKind::V2 => {
            let pair = IUniswapV2Pair::new(descriptor.address, provider);
            let reserves = pair.getReserves().call().await?;
            Ok(PoolState::V2 {
                reserve0: U256::from(reserves.reserve0),
                reserve1: U256::from(reserves.reserve1),
            })
        }
        DexKind::V3 => {
            let pool = IUniswapV3Pool::new(descriptor.address, provider);
            let slot0 = pool.slot0().call().await?;
            let liquidity: u128 = pool.liquidity().call().await?;
            Ok(PoolState::V3 {
                sqrt_price_x96: U256::from(slot0.sqrtPriceX96),
                liquidity,
                tick: slot0.tick.as_i32(),
            })
        }
        DexKind::LiquidityBook => {
            // Bin reserves read like a V2 pair; the cost model carries the
            // variable-fee buffer for these pools.
            let pair = ILBPair::new(descriptor.address, provider);
            let reserves = pair.getReserves().call().await?;
            Ok(PoolState::V2 {
                reserve0: U256::from(reserves.reserveX),
                reserve1: U256::from(reserves.reserveY),
            })
        }
    }
}

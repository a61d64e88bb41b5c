//! Startup node verification.
//!
//! Run once before the pipeline starts: an unreachable RPC, a wrong chain or
//! a syncing node must stop the process before any ledger is touched.

use alloy::providers::Provider;
use eyre::Result;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct NodeHealth {
    pub block_number: u64,
    pub rpc_latency_ms: u64,
    pub chain_id: u64,
    pub is_syncing: bool,
}

impl NodeHealth {
    pub async fn check<P: Provider>(provider: &P) -> Result<Self> {
        let start = Instant::now();
        let block_number = provider.get_block_number().await?;
        let rpc_latency_ms = start.elapsed().as_millis() as u64;

        let chain_id = provider.get_chain_id().await?;

        // Some RPCs reject eth_syncing; assume synced when unsupported.
        let is_syncing = match provider.syncing().await {
            Ok(status) => !format!("{status:?}").contains("None"),
            Err(_) => false,
        };

        Ok(Self {
            block_number,
            rpc_latency_ms,
            chain_id,
            is_syncing,
        })
    }

}

/// Verify the node is usable for trading against `expected_chain_id`.
pub async fn verify_node_ready<P: Provider>(
    provider: &P,
    expected_chain_id: u64,
) -> Result<NodeHealth> {
    let health = NodeHealth::check(provider).await?;

    if health.chain_id != expected_chain_id {
        return Err(eyre::eyre!(
            "connected to chain {} but configuration expects {}",
            health.chain_id,
            expected_chain_id
        ));
    }
    if health.is_syncing {
        return Err(eyre::eyre!(
            "node is still syncing at block {}",
            health.block_number
        ));
    }
    if health.rpc_latency_ms > 500 {
        warn!(
            latency_ms = health.rpc_latency_ms,
            "high RPC latency; spreads may be stale before they can be acted on"
        );
    }

    info!(
        block = health.block_number,
        latency_ms = health.rpc_latency_ms,
        chain_id = health.chain_id,
        "node healthy"
    );
    Ok(health)
}

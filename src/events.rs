//! Typed observability events.
//!
//! Pipeline stages pass values directly; these events are a side channel for
//! logging and stats only, never control flow. A dropped receiver must not
//! stall the pipeline, so emission is fire-and-forget.

use crate::store::TradeStats;
use alloy::primitives::B256;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub enum EngineEvent {
    PriceUpdate {
        head_block: u64,
        pools_read: usize,
        pool_errors: usize,
    },
    OpportunityFound {
        route: String,
        delta_bps: u32,
    },
    OpportunityRejected {
        route: String,
        reason: String,
    },
    Submitted {
        route: String,
        tx_hash: B256,
    },
    Confirmed {
        route: String,
        tx_hash: B256,
        net_profit: String,
    },
    Reverted {
        route: String,
        tx_hash: B256,
        revert: String,
    },
    SimulationFailed {
        route: String,
        revert: String,
    },
    StaleAborted {
        route: String,
        staleness_ms: i64,
        block_lag: u64,
    },
    DryRun {
        route: String,
        net_profit: String,
    },
    Paused {
        consecutive_failures: u32,
    },
    Resumed,
    Stats(TradeStats),
}

/// Cloneable emitter handle.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EventSender {
    pub fn emit(&self, event: EngineEvent) {
        // The logger task owning the receiver may already be gone during
        // shutdown; that is not an error.
        let _ = self.tx.send(event);
    }
}

/// Build the channel and spawn the logging consumer.
pub fn spawn_event_logger() -> (EventSender, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            log_event(&event);
        }
    });
    (EventSender { tx }, handle)
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::PriceUpdate {
            head_block,
            pools_read,
            pool_errors,
        } => {
            if *pool_errors > 0 {
                warn!(head_block, pools_read, pool_errors, "price update with read errors");
            } else {
                tracing::debug!(head_block, pools_read, "price update");
            }
        }
        EngineEvent::OpportunityFound { route, delta_bps } => {
            info!(%route, delta_bps, "opportunity found");
        }
        EngineEvent::OpportunityRejected { route, reason } => {
            info!(%route, %reason, "opportunity rejected");
        }
        EngineEvent::Submitted { route, tx_hash } => {
            info!(%route, %tx_hash, "submitted");
        }
        EngineEvent::Confirmed {
            route,
            tx_hash,
            net_profit,
        } => {
            info!(%route, %tx_hash, %net_profit, "confirmed");
        }
        EngineEvent::Reverted {
            route,
            tx_hash,
            revert,
        } => {
            warn!(%route, %tx_hash, %revert, "reverted on-chain");
        }
        EngineEvent::SimulationFailed { route, revert } => {
            info!(%route, %revert, "simulation failed");
        }
        EngineEvent::StaleAborted {
            route,
            staleness_ms,
            block_lag,
        } => {
            info!(%route, staleness_ms, block_lag, "stale candidate aborted");
        }
        EngineEvent::DryRun { route, net_profit } => {
            info!(%route, %net_profit, "dry-run candidate would have been submitted");
        }
        EngineEvent::Paused {
            consecutive_failures,
        } => {
            warn!(consecutive_failures, "engine paused by circuit breaker");
        }
        EngineEvent::Resumed => info!("engine resumed"),
        EngineEvent::Stats(stats) => {
            info!(
                outcomes = stats.total_outcomes,
                confirmed = stats.confirmed,
                reverted = stats.reverted,
                win_rate_bps = stats.win_rate_bps(),
                net_profit = %stats.total_net_profit,
                "stats"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_after_receiver_drop_is_silent() {
        let (sender, handle) = spawn_event_logger();
        handle.abort();
        let _ = handle.await;
        // Must not panic or error.
        sender.emit(EngineEvent::Resumed);
    }

    #[tokio::test]
    async fn events_reach_the_logger() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sender = EventSender { tx };
        sender.emit(EngineEvent::OpportunityFound {
            route: "a -> b".to_string(),
            delta_bps: 42,
        });
        match rx.recv().await {
            Some(EngineEvent::OpportunityFound { delta_bps, .. }) => assert_eq!(delta_bps, 42),
            other => panic!("unexpected event {other:?}"),
        }
    }
}

//! Append-only trade ledger with three-bucket accounting.
//!
//! One JSON line per outcome, flushed and fsync'd on every append. The file
//! is the source of truth for the report CLI and for engine stats; the
//! in-memory vector is a cache rebuilt on open. An outcome whose buckets do
//! not reconcile (`net != gross - gas - l1 - revert`) is refused: writing it
//! would corrupt the ledger's accounting invariant, which is a fatal bug
//! upstream, not a recoverable error.

use alloy::primitives::{I256, U256};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use thiserror::Error;
use tracing::warn;

/// Terminal status of a candidate, as persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Confirmed,
    Reverted,
    SimulationReverted,
    Failed,
    StaleAborted,
    DryRun,
}

/// One persisted outcome line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOutcome {
    /// On-chain hash, or a synthetic `dryrun:`/`sim:` marker.
    pub tx_hash: String,
    /// Unix milliseconds.
    pub timestamp: i64,
    pub block_number: u64,
    pub path_label: String,
    #[serde(with = "serde_u256")]
    pub input_amount: U256,
    #[serde(with = "serde_u256")]
    pub gross_profit: U256,
    #[serde(with = "serde_u256")]
    pub gas_cost: U256,
    #[serde(with = "serde_u256")]
    pub l1_data_fee: U256,
    #[serde(with = "serde_u256")]
    pub revert_cost: U256,
    #[serde(with = "serde_i256")]
    pub net_profit: I256,
    pub status: TradeStatus,
}

impl TradeOutcome {
    /// The accounting identity every persisted record must satisfy.
    pub fn is_consistent(&self) -> bool {
        let costs = self.gas_cost + self.l1_data_fee + self.revert_cost;
        let gross = I256::try_from(self.gross_profit).unwrap_or(I256::MAX);
        let costs = I256::try_from(costs).unwrap_or(I256::MAX);
        self.net_profit == gross - costs
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("inconsistent outcome for {path_label}: net {net} != gross {gross} - costs {costs}")]
    InvariantViolation {
        path_label: String,
        net: I256,
        gross: U256,
        costs: U256,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// Aggregate view over the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TradeStats {
    pub total_outcomes: u64,
    pub confirmed: u64,
    pub reverted: u64,
    pub simulation_reverted: u64,
    pub failed: u64,
    pub stale_aborted: u64,
    pub dry_run: u64,
    pub confirmed_profitable: u64,
    pub total_gross_profit: U256,
    pub total_gas_cost: U256,
    pub total_l1_data_fee: U256,
    pub total_revert_cost: U256,
    pub total_net_profit: I256,
    pub first_timestamp: Option<i64>,
    pub last_timestamp: Option<i64>,
}

impl TradeStats {
    fn absorb(&mut self, outcome: &TradeOutcome) {
        self.total_outcomes += 1;
        match outcome.status {
            TradeStatus::Confirmed => {
                self.confirmed += 1;
                if outcome.net_profit > I256::ZERO {
                    self.confirmed_profitable += 1;
                }
            }
            TradeStatus::Reverted => self.reverted += 1,
            TradeStatus::SimulationReverted => self.simulation_reverted += 1,
            TradeStatus::Failed => self.failed += 1,
            TradeStatus::StaleAborted => self.stale_aborted += 1,
            TradeStatus::DryRun => self.dry_run += 1,
        }
        self.total_gross_profit += outcome.gross_profit;
        self.total_gas_cost += outcome.gas_cost;
        self.total_l1_data_fee += outcome.l1_data_fee;
        self.total_revert_cost += outcome.revert_cost;
        self.total_net_profit += outcome.net_profit;
        if self.first_timestamp.is_none() {
            self.first_timestamp = Some(outcome.timestamp);
        }
        self.last_timestamp = Some(outcome.timestamp);
    }

    /// Attempted submissions (mined either way).
    pub fn attempted(&self) -> u64 {
        self.confirmed + self.reverted
    }

    /// Win rate in basis points over attempted submissions.
    pub fn win_rate_bps(&self) -> u64 {
        let attempted = self.attempted();
        if attempted == 0 {
            0
        } else {
            self.confirmed_profitable * 10_000 / attempted
        }
    }
}

/// Single-writer persistent trade ledger. The report CLI opens its own
/// read-only view via [`TradeStore::load_readonly`].
pub struct TradeStore {
    file: File,
    outcomes: Vec<TradeOutcome>,
}

impl TradeStore {
    /// Open (or create) the ledger, replaying existing lines. Malformed
    /// lines are skipped with a warning.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let outcomes = if path.exists() {
            read_outcomes(&path)?
        } else {
            Vec::new()
        };
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { file, outcomes })
    }

    /// Read-only snapshot of a ledger file, for the report CLI.
    pub fn load_readonly(path: impl AsRef<Path>) -> Result<Vec<TradeOutcome>, StoreError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_outcomes(path)
    }

    /// Append one outcome, refusing records that break the accounting
    /// identity.
    pub fn append(&mut self, outcome: TradeOutcome) -> Result<(), StoreError> {
        if !outcome.is_consistent() {
            return Err(StoreError::InvariantViolation {
                path_label: outcome.path_label.clone(),
                net: outcome.net_profit,
                gross: outcome.gross_profit,
                costs: outcome.gas_cost + outcome.l1_data_fee + outcome.revert_cost,
            });
        }
        let line = serde_json::to_string(&outcome)?;
        writeln!(self.file, "{line}")?;
        self.file.flush()?;
        self.file.sync_all()?;
        self.outcomes.push(outcome);
        Ok(())
    }

    pub fn get_all(&self) -> &[TradeOutcome] {
        &self.outcomes
    }

    /// Last `n` outcomes, newest first.
    pub fn last(&self, n: usize) -> Vec<&TradeOutcome> {
        self.outcomes.iter().rev().take(n).collect()
    }

    pub fn stats(&self) -> TradeStats {
        compute_stats(&self.outcomes)
    }
}

pub fn compute_stats(outcomes: &[TradeOutcome]) -> TradeStats {
    let mut stats = TradeStats::default();
    for outcome in outcomes {
        stats.absorb(outcome);
    }
    stats
}

fn read_outcomes(path: &Path) -> Result<Vec<TradeOutcome>, StoreError> {
    let reader = BufReader::new(File::open(path)?);
    let mut outcomes = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TradeOutcome>(&line) {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => warn!(line = line_no + 1, error = %e, "skipping malformed trade line"),
        }
    }
    Ok(outcomes)
}

/// Decimal-string serde for U256: `"1500000000000000000"`.
mod serde_u256 {
    use alloy::primitives::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Decimal-string serde for I256, sign included.
mod serde_i256 {
    use alloy::primitives::I256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &I256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<I256, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

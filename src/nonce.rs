//! Durable nonce allocation and pending-transaction ledger.
//!
//! Every reserved nonce is appended (and fsync'd) to a JSONL ledger before
//! the transaction leaves the process, so a crash can never reuse or skip a
//! nonce silently. The ledger is append-only: the newest line for a nonce is
//! its current state. On startup the ledger is reconciled against the
//! wallet's on-chain `transactionCount`.

use alloy::primitives::{Address, B256};
use alloy::providers::Provider;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingState {
    Pending,
    Mined,
    Dropped,
    Replaced,
    Cancelled,
}

/// One ledger line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingEntry {
    pub nonce: u64,
    pub tx_hash: Option<String>,
    pub submitted_at: i64,
    pub state: PendingState,
}

/// Outcome of startup reconciliation.
#[derive(Debug, Default)]
pub struct Reconciliation {
    /// Mined pending entries found on-chain: `(nonce, tx_hash)`.
    pub mined: Vec<(u64, B256)>,
    /// Pending entries below the chain nonce with no receipt.
    pub dropped: Vec<u64>,
    /// Pending entries at or above the chain nonce; submissions are held
    /// until these resolve.
    pub held: Vec<u64>,
}

pub struct NonceLedger {
    file: File,
    /// Latest state per nonce (append-only file, last line wins).
    entries: BTreeMap<u64, PendingEntry>,
    /// True while unresolved pending entries block new submissions.
    held: bool,
}

impl NonceLedger {
    /// Open (or create) the ledger and replay its lines. Malformed lines are
    /// skipped with a warning; they never poison startup.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .wrap_err_with(|| format!("creating ledger directory {dir:?}"))?;
        }

        let mut entries = BTreeMap::new();
        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for (line_no, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<PendingEntry>(&line) {
                    Ok(entry) => {
                        entries.insert(entry.nonce, entry);
                    }
                    Err(e) => {
                        warn!(line = line_no + 1, error = %e, "skipping malformed nonce ledger line");
                    }
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            file,
            entries,
            held: false,
        })
    }

    /// Highest nonce the ledger has ever handed out.
    pub fn last_persisted_nonce(&self) -> Option<u64> {
        self.entries.keys().next_back().copied()
    }

    /// True while unresolved entries at or above the chain nonce exist.
    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Manually clear a hold after operator intervention.
    pub fn clear_hold(&mut self) {
        self.held = false;
    }

    /// Allocate the next nonce: `max(chain_nonce, last_persisted + 1)`. The
    /// pending entry is on disk before the nonce is returned.
    pub fn next_nonce(&mut self, chain_nonce: u64) -> Result<u64> {
        let nonce = match self.last_persisted_nonce() {
            Some(last) => chain_nonce.max(last + 1),
            None => chain_nonce,
        };
        self.append(PendingEntry {
            nonce,
            tx_hash: None,
            submitted_at: chrono::Utc::now().timestamp_millis(),
            state: PendingState::Pending,
        })?;
        Ok(nonce)
    }

    /// Attach the broadcast hash to a reserved nonce.
    pub fn record_hash(&mut self, nonce: u64, tx_hash: B256) -> Result<()> {
        self.transition(nonce, PendingState::Pending, Some(tx_hash))
    }

    /// Move a nonce to a terminal state.
    pub fn resolve(&mut self, nonce: u64, state: PendingState) -> Result<()> {
        let hash = self
            .entries
            .get(&nonce)
            .and_then(|e| e.tx_hash.as_deref())
            .and_then(|h| h.parse().ok());
        self.transition(nonce, state, hash)
    }

    fn transition(&mut self, nonce: u64, state: PendingState, tx_hash: Option<B256>) -> Result<()> {
        let entry = PendingEntry {
            nonce,
            tx_hash: tx_hash.map(|h| format!("{h:?}")),
            submitted_at: self
                .entries
                .get(&nonce)
                .map(|e| e.submitted_at)
                .unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
            state,
        };
        self.append(entry)
    }

    fn append(&mut self, entry: PendingEntry) -> Result<()> {
        let line = serde_json::to_string(&entry)?;
        writeln!(self.file, "{line}")?;
        self.file.flush()?;
        self.file.sync_all().wrap_err("fsync nonce ledger")?;
        self.entries.insert(entry.nonce, entry);
        Ok(())
    }

    fn pending_nonces(&self) -> Vec<u64> {
        self.entries
            .values()
            .filter(|e| e.state == PendingState::Pending)
            .map(|e| e.nonce)
            .collect()
    }

    /// Startup reconciliation against the chain. Pending entries below the
    /// wallet's `transactionCount` are resolved as mined or dropped; entries
    /// at or above it put the ledger on hold.
    pub async fn reconcile<P: Provider>(
        &mut self,
        provider: &P,
        wallet: Address,
    ) -> Result<Reconciliation> {
        let chain_nonce = provider.get_transaction_count(wallet).await?;
        let mut outcome = Reconciliation::default();

        for nonce in self.pending_nonces() {
            if nonce >= chain_nonce {
                outcome.held.push(nonce);
                continue;
            }
            let hash: Option<B256> = self
                .entries
                .get(&nonce)
                .and_then(|e| e.tx_hash.as_deref())
                .and_then(|h| h.parse().ok());

            match hash {
                Some(hash) => match provider.get_transaction_receipt(hash).await? {
                    Some(_) => {
                        self.resolve(nonce, PendingState::Mined)?;
                        outcome.mined.push((nonce, hash));
                    }
                    None => {
                        self.resolve(nonce, PendingState::Dropped)?;
                        outcome.dropped.push(nonce);
                    }
                },
                None => {
                    // Reserved but never broadcast; the chain moved past it.
                    self.resolve(nonce, PendingState::Dropped)?;
                    outcome.dropped.push(nonce);
                }
            }
        }

        self.held = !outcome.held.is_empty();
        if self.held {
            warn!(
                held = ?outcome.held,
                chain_nonce,
                "unresolved pending nonces at or above chain nonce, holding submissions"
            );
        } else {
            info!(
                chain_nonce,
                mined = outcome.mined.len(),
                dropped = outcome.dropped.len(),
                "nonce ledger reconciled"
            );
        }
        Ok(outcome)
    }
}

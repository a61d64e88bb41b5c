//! Report rendering for the `report` subcommand.
//!
//! Reads the trade ledger through a read-only handle and prints a stats
//! header plus the most recent outcomes. This is the only place wei values
//! are converted to decimal token units.

use crate::store::{compute_stats, TradeOutcome, TradeStatus};
use alloy::primitives::{I256, U256};
use rust_decimal::Decimal;

/// Largest mantissa the decimal type can carry (96 bits).
const DECIMAL_MANTISSA_MAX: i128 = 79_228_162_514_264_337_593_543_950_335;

/// Wei rendered as whole native-token units with 6 fractional digits.
pub fn format_wei(value: U256) -> String {
    match i128::try_from(value) {
        Ok(v) if v <= DECIMAL_MANTISSA_MAX => {
            format_decimal(Decimal::from_i128_with_scale(v, 18))
        }
        _ => value.to_string(),
    }
}

/// Signed wei, same rendering.
pub fn format_signed_wei(value: I256) -> String {
    match i128::try_from(value) {
        Ok(v) if v.abs() <= DECIMAL_MANTISSA_MAX => {
            format_decimal(Decimal::from_i128_with_scale(v, 18))
        }
        _ => value.to_string(),
    }
}

fn format_decimal(value: Decimal) -> String {
    format!("{:.6}", value)
}

fn status_tag(status: TradeStatus) -> &'static str {
    match status {
        TradeStatus::Confirmed => "CONFIRMED",
        TradeStatus::Reverted => "REVERTED",
        TradeStatus::SimulationReverted => "SIM-REVERT",
        TradeStatus::Failed => "FAILED",
        TradeStatus::StaleAborted => "STALE",
        TradeStatus::DryRun => "DRY-RUN",
    }
}

/// Render the full report into a string (printed by main, asserted in tests).
pub fn render(outcomes: &[TradeOutcome], last_n: usize) -> String {
    let stats = compute_stats(outcomes);
    let mut out = String::new();

    out.push_str("=== flasharb trade report ===\n");
    out.push_str(&format!("outcomes:             {}\n", stats.total_outcomes));
    out.push_str(&format!(
        "confirmed / reverted: {} / {}\n",
        stats.confirmed, stats.reverted
    ));
    out.push_str(&format!(
        "sim-reverted:         {}\n",
        stats.simulation_reverted
    ));
    out.push_str(&format!("stale / failed:       {} / {}\n", stats.stale_aborted, stats.failed));
    out.push_str(&format!("dry-run:              {}\n", stats.dry_run));
    out.push_str(&format!(
        "win rate:             {}.{:02}% of {} attempts\n",
        stats.win_rate_bps() / 100,
        stats.win_rate_bps() % 100,
        stats.attempted()
    ));
    out.push_str(&format!(
        "gross profit:         {}\n",
        format_wei(stats.total_gross_profit)
    ));
    out.push_str(&format!(
        "gas cost (L2 + L1):   {} + {}\n",
        format_wei(stats.total_gas_cost),
        format_wei(stats.total_l1_data_fee)
    ));
    out.push_str(&format!(
        "revert cost:          {}\n",
        format_wei(stats.total_revert_cost)
    ));
    out.push_str(&format!(
        "net profit:           {}\n",
        format_signed_wei(stats.total_net_profit)
    ));

    if let (Some(first), Some(last)) = (stats.first_timestamp, stats.last_timestamp) {
        out.push_str(&format!("window:               {first} .. {last} (unix ms)\n"));
    }

    out.push_str(&format!("\nlast {last_n} outcomes (newest first):\n"));
    for outcome in outcomes.iter().rev().take(last_n) {
        out.push_str(&format!(
            "  [{}] {:<10} {} net={} block={} {}\n",
            outcome.timestamp,
            status_tag(outcome.status),
            outcome.path_label,
            format_signed_wei(outcome.net_profit),
            outcome.block_number,
            outcome.tx_hash,
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn outcome(ts: i64, status: TradeStatus, gross: u64, gas: u64) -> TradeOutcome {
        TradeOutcome {
            tx_hash: format!("0x{ts:02x}"),
            timestamp: ts,
            block_number: ts as u64,
            path_label: "uni:500 -> uni:3000".to_string(),
            input_amount: U256::from(1u64),
            gross_profit: U256::from(gross),
            gas_cost: U256::from(gas),
            l1_data_fee: U256::ZERO,
            revert_cost: U256::ZERO,
            net_profit: I256::try_from(gross as i64 - gas as i64).unwrap(),
            status,
        }
    }

    #[test]
    fn formats_wei_to_six_decimals() {
        assert_eq!(format_wei(U256::from(1_500_000_000_000_000_000u128)), "1.500000");
        assert_eq!(format_wei(U256::ZERO), "0.000000");
        assert_eq!(
            format_signed_wei(I256::try_from(-250_000_000_000_000_000i128).unwrap()),
            "-0.250000"
        );
        // Sanity against the decimal library's own arithmetic.
        assert_eq!(dec!(1.5) + dec!(-0.25), dec!(1.25));
    }

    #[test]
    fn report_orders_newest_first_and_counts_statuses() {
        let outcomes = vec![
            outcome(1, TradeStatus::Confirmed, 100, 10),
            outcome(2, TradeStatus::Reverted, 0, 0),
            outcome(3, TradeStatus::DryRun, 55, 0),
        ];
        let text = render(&outcomes, 2);

        assert!(text.contains("outcomes:             3"));
        assert!(text.contains("confirmed / reverted: 1 / 1"));
        assert!(text.contains("dry-run:              1"));
        // Only the two newest rows are listed, newest first.
        let pos3 = text.find("[3]").unwrap();
        let pos2 = text.find("[2]").unwrap();
        assert!(pos3 < pos2);
        assert!(!text.contains("[1] "));
    }

    #[test]
    fn empty_ledger_renders_without_window() {
        let text = render(&[], 5);
        assert!(text.contains("outcomes:             0"));
        assert!(!text.contains("window:"));
    }
}

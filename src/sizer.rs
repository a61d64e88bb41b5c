//! Optimal input sizing by ternary search.
//!
//! The profit function over a two-leg constant-product route is unimodal in
//! the input, so a ternary search over the configured interval converges
//! fast. The search is synchronous and bounded: an iteration cap, a
//! wall-clock deadline, and a fallback to the configured default input keep
//! the pipeline's tick budget intact no matter what the profit closure does.

use alloy::primitives::{I256, U256};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SizerConfig {
    pub min_input: U256,
    pub max_input: U256,
    pub default_input: U256,
    /// Stop once the bracket is narrower than this.
    pub convergence: U256,
    pub max_iterations: u32,
    pub timeout: Duration,
}

/// Outcome of a sizing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizedInput {
    /// Best input found by the search, always inside `[min_input, max_input]`.
    Optimal(U256),
    /// Search failed or timed out; trade with the conservative default.
    Fallback(U256),
}

impl SizedInput {
    pub fn amount(&self) -> U256 {
        match self {
            SizedInput::Optimal(x) | SizedInput::Fallback(x) => *x,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, SizedInput::Fallback(_))
    }
}

/// Search `[min_input, max_input]` for the input maximizing `profit_fn`.
///
/// `profit_fn` returns net profit in wei for a given input; `None` marks an
/// evaluation failure and aborts the search into the fallback. The fallback
/// is also taken when the deadline fires mid-search, so a slow closure can
/// never stall the tick.
pub fn optimal_input<F>(cfg: &SizerConfig, profit_fn: F) -> SizedInput
where
    F: Fn(U256) -> Option<I256>,
{
    if cfg.min_input > cfg.max_input {
        return SizedInput::Fallback(cfg.default_input);
    }

    let started = Instant::now();
    let mut lo = cfg.min_input;
    let mut hi = cfg.max_input;

    // Both interval ends are always evaluated.
    let Some(profit_lo) = profit_fn(lo) else {
        return SizedInput::Fallback(cfg.default_input);
    };
    let Some(profit_hi) = profit_fn(hi) else {
        return SizedInput::Fallback(cfg.default_input);
    };

    let (mut best_x, mut best_profit) = if profit_lo >= profit_hi {
        (lo, profit_lo)
    } else {
        (hi, profit_hi)
    };

    for iteration in 0..cfg.max_iterations {
        if hi - lo < cfg.convergence {
            break;
        }
        if started.elapsed() >= cfg.timeout {
            debug!(iteration, "sizer deadline hit, falling back to default input");
            return SizedInput::Fallback(cfg.default_input);
        }

        let third = (hi - lo) / U256::from(3u8);
        let m1 = lo + third;
        let m2 = hi - third;

        let Some(p1) = profit_fn(m1) else {
            return SizedInput::Fallback(cfg.default_input);
        };
        let Some(p2) = profit_fn(m2) else {
            return SizedInput::Fallback(cfg.default_input);
        };

        if p1 > best_profit {
            best_profit = p1;
            best_x = m1;
        }
        if p2 > best_profit {
            best_profit = p2;
            best_x = m2;
        }

        // Flat and not improving on either third: the peak is bracketed by
        // what we already evaluated.
        if p1 == p2 && p1 <= best_profit {
            lo = m1;
            hi = m2;
            continue;
        }

        if p1 < p2 {
            lo = m1;
        } else {
            hi = m2;
        }
    }

    debug!(input = %best_x, profit = %best_profit, "sizer converged");
    SizedInput::Optimal(best_x)
}

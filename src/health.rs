// SPDX-License-Identifier: Apache-2.0, MIT

//! Pure health/sync-lag decision function. No repository access, no I/O: a
//! same-inputs-same-verdict function, unit-tested directly against the
//! boundary scenarios in `SPEC_FULL.md` §8.

use crate::models::{LatestBlockMetrics, Metrics};

/// Maximum acceptable interval between consecutive pings.
pub const PING_TTL_SECS: i64 = 10;
/// Base allowed block-height lag before time-adjustment.
pub const BASE_LAG: i64 = 10;
/// Time-adjustment window; lag allowance doubles after this much staleness.
pub const BASE_WINDOW_SECS: i64 = PING_TTL_SECS;
/// A node still syncing to its own announced target by this many blocks is
/// not considered caught up, regardless of pool position.
pub const SYNC_GAP: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Active,
    Inactive,
}

/// Decides whether a node is eligible to serve traffic right now.
///
/// Rules are applied in order; the first match decides (see `SPEC_FULL.md`
/// §4.1). `last_ping` is `None` when the node has never pinged, which is
/// treated the same as an arbitrarily stale ping.
pub fn evaluate(
    last_ping: Option<i64>,
    node_metrics: &Metrics,
    pool_best: &LatestBlockMetrics,
    now: i64,
) -> Verdict {
    // Rule 1: ping staleness.
    match last_ping {
        Some(ts) if now - ts <= PING_TTL_SECS => {}
        _ => return Verdict::Inactive,
    }

    // Rule 2: time-adjusted sync-lag.
    let delta_best = pool_best.best_block_height - node_metrics.best_block_height;
    let delta_final = pool_best.finalized_block_height - node_metrics.finalized_block_height;
    let age = (now - pool_best.timestamp).max(0);
    let allowed = time_adjusted_allowed_lag(age);
    if delta_best >= allowed && delta_final >= allowed {
        return Verdict::Inactive;
    }

    // Rule 3: target divergence.
    if node_metrics.target_block_height - node_metrics.best_block_height >= SYNC_GAP {
        return Verdict::Inactive;
    }

    Verdict::Active
}

/// `allowed = min(BaseLag * (1 + age/BaseWindow), 2 * BaseLag)`.
fn time_adjusted_allowed_lag(age: i64) -> i64 {
    let scaled = BASE_LAG as f64 * (1.0 + age as f64 / BASE_WINDOW_SECS as f64);
    scaled.min((2 * BASE_LAG) as f64).floor() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(best: i64, finalized: i64, target: i64) -> Metrics {
        Metrics {
            peer_count: 5,
            best_block_height: best,
            finalized_block_height: finalized,
            target_block_height: target,
            ready_transaction_count: 0,
            timestamp: 0,
        }
    }

    fn pool(best: i64, finalized: i64, timestamp: i64) -> LatestBlockMetrics {
        LatestBlockMetrics {
            best_block_height: best,
            finalized_block_height: finalized,
            timestamp,
        }
    }

    #[test]
    fn evaluate_is_pure() {
        let m = metrics(1000, 1000, 1000);
        let p = pool(1001, 1001, 0);
        let a = evaluate(Some(0), &m, &p, 5);
        let b = evaluate(Some(0), &m, &p, 5);
        assert_eq!(a, b);
    }

    #[test]
    fn stale_ping_is_inactive() {
        let m = metrics(1000, 1000, 1000);
        let p = pool(1000, 1000, 0);
        // ping at t=0, now=11s later, TTL=10 -> stale
        assert_eq!(evaluate(Some(0), &m, &p, 11), Verdict::Inactive);
    }

    #[test]
    fn fresh_ping_within_ttl_is_not_stale() {
        let m = metrics(1000, 1000, 1000);
        let p = pool(1001, 1000, 0);
        // 9s old ping, TTL=10 -> not stale
        assert_eq!(evaluate(Some(0), &m, &p, 9), Verdict::Active);
    }

    #[test]
    fn never_pinged_is_inactive() {
        let m = metrics(1000, 1000, 1000);
        let p = pool(1000, 1000, 0);
        assert_eq!(evaluate(None, &m, &p, 0), Verdict::Inactive);
    }

    #[test]
    fn boundary_one_block_behind_fresh_pool_is_active() {
        // node best=1000, pool best=1001, pool-metrics age=0 -> Active
        let m = metrics(1000, 1000, 1000);
        let p = pool(1001, 1000, 0);
        assert_eq!(evaluate(Some(0), &m, &p, 0), Verdict::Active);
    }

    #[test]
    fn boundary_older_metrics_still_active_on_finalized_margin() {
        // node best=1000, pool best=1015, pool age=20s (2xTTL) -> the formula
        // is already saturated at the 2xBaseLag=20 cap by this age, so
        // allowed=20; delta_final=15 < 20 -> Active (rule 2 needs BOTH
        // deltas >= allowed).
        let m = metrics(1000, 985, 1000);
        let p = pool(1015, 1000, 0);
        assert_eq!(evaluate(Some(20), &m, &p, 20), Verdict::Active);
    }

    #[test]
    fn boundary_very_old_metrics_capped_lag_is_inactive() {
        // pool age > 100x TTL -> allowed caps at 2*BaseLag=20; delta=20 >= 20
        let m = metrics(1000, 1000, 1000);
        let p = pool(1020, 1020, 0);
        assert_eq!(evaluate(Some(0), &m, &p, 2000), Verdict::Inactive);
    }

    #[test]
    fn syncing_to_own_target_is_inactive() {
        let m = metrics(1000, 1000, 1011);
        let p = pool(1000, 1000, 0);
        assert_eq!(evaluate(Some(0), &m, &p, 0), Verdict::Inactive);
    }

    #[test]
    fn just_under_sync_gap_is_active() {
        let m = metrics(1000, 1000, 1009);
        let p = pool(1000, 1000, 0);
        assert_eq!(evaluate(Some(0), &m, &p, 0), Verdict::Active);
    }
}

//! Two-tier behavioral scoring engine (spec.md §4.E).
//!
//! Grounded directly in `nnbc.c`'s `create_entry`, `nnbc_get_bin`,
//! `nnbc_misbehaved`, `nnbc_connecting`, and `nnbc_disconnected`. The verdict
//! rule is intentionally asymmetric: `BlockT2` can fire regardless of `t1`,
//! but `BlockT1` additionally requires `t2` to still be above its
//! threshold (spec.md §4.E, §9).

use std::sync::Arc;

use tracing::error;

use crate::globals::Thresholds;
use crate::metrics;
use crate::store::{ClientStore, Scores, StoreError};

/// The outcome of a scoring decision (spec.md §3). Encoded as `Allow = 0`,
/// `BlockT1 = 1`, `BlockT2 = 2` at the API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    BlockT1,
    BlockT2,
}

impl Verdict {
    pub fn as_code(self) -> u8 {
        match self {
            Verdict::Allow => 0,
            Verdict::BlockT1 => 1,
            Verdict::BlockT2 => 2,
        }
    }
}

/// Applies the asymmetric verdict rule to a pair of live scores (spec.md
/// §4.E). Pure function, no I/O, so it's trivially unit-testable against
/// the spec's literal examples.
pub fn verdict_for(scores: Scores, t1_threshold: f64, t2_threshold: f64) -> Verdict {
    if scores.t1 < t1_threshold && scores.t2 > t2_threshold {
        Verdict::BlockT1
    } else if scores.t2 < t2_threshold {
        Verdict::BlockT2
    } else {
        Verdict::Allow
    }
}

/// Computes the first-touch scores for a client that has never been seen
/// before, exactly mirroring `create_entry`'s two branches and final
/// non-positive clamp (spec.md §4.E, §9).
pub fn first_touch_scores(thresholds: &Thresholds) -> (f64, f64) {
    let cfg = thresholds.first_touch;
    let (t1, t2) = if thresholds.under_attack() {
        (
            thresholds.t1_threshold() + cfg.t1_attack_epsilon,
            thresholds.t2_threshold() + cfg.t2_attack_epsilon,
        )
    } else {
        (thresholds.t1_threshold() + cfg.t1_epsilon, 0.0)
    };
    (t1.min(0.0), t2.min(0.0))
}

/// The scoring engine: a client store plus the live thresholds it scores
/// against. Holds no per-client state of its own — everything durable lives
/// in the store (spec.md §4.B, §4.E). The store is a trait object so the
/// same engine runs against `PostgresStore` in production and `MemoryStore`
/// in tests without a generic parameter leaking into every caller.
pub struct Engine {
    store: Arc<dyn ClientStore>,
    thresholds: Arc<Thresholds>,
}

impl Engine {
    pub fn new(store: Arc<dyn ClientStore>, thresholds: Arc<Thresholds>) -> Self {
        Self { store, thresholds }
    }

    /// Creates a first-touch row for `addr` and returns the scores it was
    /// created with, for callers to use directly rather than re-reading
    /// (spec.md §4.E: "continues with the locally known (t1, t2)... no
    /// re-read").
    async fn ensure_client(&self, addr: &str) -> Result<(f64, f64), StoreError> {
        let (t1, t2) = first_touch_scores(&self.thresholds);
        let mult = self.thresholds.first_touch.t2_initial_access_multiplier;
        self.store.initialize_new_client(addr, t1, t2, mult).await?;
        Ok((t1, t2))
    }

    /// Evaluates the current verdict for `addr`, creating a first-touch row
    /// if none exists yet. This is the "is this request allowed" check
    /// (spec.md §4.E).
    pub async fn get_bin(&self, addr: &str) -> Verdict {
        let t1_threshold = self.thresholds.t1_threshold();
        let t2_threshold = self.thresholds.t2_threshold();
        match self.store.get_scores(addr, t2_threshold).await {
            Ok(scores) => verdict_for(scores, t1_threshold, t2_threshold),
            Err(StoreError::NotFound) => match self.ensure_client(addr).await {
                Ok((t1, t2)) => verdict_for(Scores { t1, t2 }, t1_threshold, t2_threshold),
                Err(err) => {
                    error!(addr, error = %err, "failed to create first-touch row");
                    metrics::inc_store_error("initialize_new_client");
                    Verdict::Allow
                }
            },
            Err(err) => {
                error!(addr, error = %err, "store error evaluating verdict, failing open");
                metrics::inc_store_error("get_scores");
                Verdict::Allow
            }
        }
    }

    /// Records a misbehavior event, creating a first-touch row first if
    /// needed (spec.md §4.E). A zero weight is a no-op: no store call is
    /// issued at all.
    pub async fn misbehaved(&self, addr: &str, amount: i64) {
        if amount == 0 {
            return;
        }
        if let Err(StoreError::NotFound) = self.store.add_to_misbehavior(addr, amount).await {
            if let Err(err) = self.ensure_client(addr).await {
                error!(addr, error = %err, "failed to create first-touch row");
                metrics::inc_store_error("initialize_new_client");
                return;
            }
            if let Err(err) = self.store.add_to_misbehavior(addr, amount).await {
                error!(addr, error = %err, "failed to record misbehavior after first touch");
                metrics::inc_store_error("add_to_misbehavior");
            }
        }
    }

    /// Records a new connection and evaluates the connection-phase verdict
    /// (spec.md §4.E). On first touch the initializer already sets
    /// `connections = 1`, so the increment is not repeated.
    pub async fn connecting(&self, addr: &str) -> Verdict {
        let t1_threshold = self.thresholds.t1_threshold();
        let t2_threshold = self.thresholds.t2_threshold();
        match self.store.increment_connections(addr).await {
            Ok(scores) => verdict_for(scores, t1_threshold, t2_threshold),
            Err(StoreError::NotFound) => match self.ensure_client(addr).await {
                Ok((t1, t2)) => verdict_for(Scores { t1, t2 }, t1_threshold, t2_threshold),
                Err(err) => {
                    error!(addr, error = %err, "failed to create first-touch row");
                    metrics::inc_store_error("initialize_new_client");
                    Verdict::Allow
                }
            },
            Err(err) => {
                error!(addr, error = %err, "store error evaluating verdict, failing open");
                metrics::inc_store_error("increment_connections");
                Verdict::Allow
            }
        }
    }

    /// Records a disconnection. Unlike `connecting`, a missing row here is
    /// not an error worth creating a row for — there is nothing to
    /// decrement back down to (spec.md §4.E).
    pub async fn disconnected(&self, addr: &str) {
        if let Err(err) = self.store.decrement_connections(addr).await {
            if !matches!(err, StoreError::NotFound) {
                error!(addr, error = %err, "failed to record disconnection");
                metrics::inc_store_error("decrement_connections");
            }
        }
    }

    /// Resets every row's connection count to zero. Called once at startup
    /// (spec.md §5).
    pub async fn clear_connections(&self) -> Result<(), StoreError> {
        self.store.clear_connections().await
    }
}

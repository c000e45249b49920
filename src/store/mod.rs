//! Client score storage (spec.md §4.B).
//!
//! `ClientStore` is the seam between the scoring engine and whatever keeps
//! durable per-address state. The production implementation
//! ([`postgres::PostgresStore`]) issues single-round-trip `UPDATE ...
//! RETURNING` statements so a score read and its side effect (incrementing
//! `accesses`, latching `t2_blocked`, ...) happen atomically on the backend,
//! never as a read-modify-write pair in this process.

pub mod postgres;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

/// The two live scores for a client, as returned by every store operation
/// that touches an existing row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scores {
    pub t1: f64,
    pub t2: f64,
}

/// Failure modes a `ClientStore` operation can report. `NotFound` is not an
/// error in the exceptional sense — callers treat it as "this client has no
/// row yet" and react accordingly (spec.md §4.B, §7).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no row for this client")]
    NotFound,
    #[error("store backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Durable per-client state: accesses, misbehaviors, connections, and the
/// two scores, keyed by address (spec.md §3, §4.B).
#[async_trait]
pub trait ClientStore: Send + Sync {
    /// Increments `accesses`, latches `t2_blocked` if `t2 < t2_threshold`,
    /// and returns the current scores. Used on every request.
    async fn get_scores(&self, addr: &str, t2_threshold: f64) -> Result<Scores, StoreError>;

    /// Adds `amount` to `misbehaviors` and returns the current scores.
    async fn add_to_misbehavior(&self, addr: &str, amount: i64) -> Result<Scores, StoreError>;

    /// Increments `connections` and returns the current scores.
    async fn increment_connections(&self, addr: &str) -> Result<Scores, StoreError>;

    /// Decrements `connections`, clamped at zero, and returns the current
    /// scores.
    async fn decrement_connections(&self, addr: &str) -> Result<Scores, StoreError>;

    /// Resets every row's `connections` to zero. Run once at startup
    /// (spec.md §5) since in-flight connection counts from a previous
    /// process are meaningless after a restart.
    async fn clear_connections(&self) -> Result<(), StoreError>;

    /// Inserts a new row with first-touch scores and the configured
    /// `t2_access_multiplier` if one doesn't already exist; a no-op (not an
    /// error) if the address is already present, so racing first-touch
    /// callers converge on whichever insert won (spec.md §4.B, §8).
    async fn initialize_new_client(
        &self,
        addr: &str,
        t1: f64,
        t2: f64,
        t2_access_multiplier: f64,
    ) -> Result<(), StoreError>;
}

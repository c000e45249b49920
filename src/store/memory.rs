//! In-memory [`ClientStore`] double used by tests (spec.md §8) where no live
//! Postgres instance is available. Implements the same atomic
//! update-and-return semantics as [`super::postgres::PostgresStore`] against
//! a `Mutex`-guarded map instead of a real backend.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{ClientStore, Scores, StoreError};

#[derive(Debug, Clone, Copy)]
struct Row {
    t1: f64,
    t2: f64,
    t2_access_multiplier: f64,
    t2_blocked: bool,
    misbehaviors: i64,
    connections: i64,
    accesses: i64,
}

/// A test double for [`ClientStore`] backed by a `HashMap` guarded by a
/// single mutex, standing in for the atomicity a real `UPDATE ... RETURNING`
/// gives against Postgres.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<String, Row>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: current `connections` value, or `None` if absent.
    pub fn connections(&self, addr: &str) -> Option<i64> {
        self.rows.lock().unwrap().get(addr).map(|r| r.connections)
    }

    /// Test helper: current `t2_blocked` value, or `None` if absent.
    pub fn t2_blocked(&self, addr: &str) -> Option<bool> {
        self.rows.lock().unwrap().get(addr).map(|r| r.t2_blocked)
    }

    /// Test helper: current `misbehaviors` value, or `None` if absent.
    pub fn misbehaviors(&self, addr: &str) -> Option<i64> {
        self.rows.lock().unwrap().get(addr).map(|r| r.misbehaviors)
    }

    /// Test helper: current `t2_access_multiplier` value, or `None` if absent.
    pub fn t2_access_multiplier(&self, addr: &str) -> Option<f64> {
        self.rows
            .lock()
            .unwrap()
            .get(addr)
            .map(|r| r.t2_access_multiplier)
    }

    /// Test helper: whether a row exists at all for `addr`.
    pub fn contains(&self, addr: &str) -> bool {
        self.rows.lock().unwrap().contains_key(addr)
    }
}

#[async_trait]
impl ClientStore for MemoryStore {
    async fn get_scores(&self, addr: &str, t2_threshold: f64) -> Result<Scores, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows.get_mut(addr).ok_or(StoreError::NotFound)?;
        row.accesses += 1;
        row.t2_blocked = row.t2_blocked || row.t2 < t2_threshold;
        Ok(Scores {
            t1: row.t1,
            t2: row.t2,
        })
    }

    async fn add_to_misbehavior(&self, addr: &str, amount: i64) -> Result<Scores, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows.get_mut(addr).ok_or(StoreError::NotFound)?;
        row.misbehaviors += amount;
        Ok(Scores {
            t1: row.t1,
            t2: row.t2,
        })
    }

    async fn increment_connections(&self, addr: &str) -> Result<Scores, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows.get_mut(addr).ok_or(StoreError::NotFound)?;
        row.connections += 1;
        Ok(Scores {
            t1: row.t1,
            t2: row.t2,
        })
    }

    async fn decrement_connections(&self, addr: &str) -> Result<Scores, StoreError> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows.get_mut(addr).ok_or(StoreError::NotFound)?;
        row.connections = (row.connections - 1).max(0);
        Ok(Scores {
            t1: row.t1,
            t2: row.t2,
        })
    }

    async fn clear_connections(&self) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        for row in rows.values_mut() {
            row.connections = 0;
        }
        Ok(())
    }

    async fn initialize_new_client(
        &self,
        addr: &str,
        t1: f64,
        t2: f64,
        t2_access_multiplier: f64,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap();
        rows.entry(addr.to_owned()).or_insert(Row {
            t1,
            t2,
            t2_access_multiplier,
            t2_blocked: false,
            misbehaviors: 0,
            connections: 1,
            accesses: 1,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_client_starts_with_one_access_and_one_connection() {
        let store = MemoryStore::new();
        store
            .initialize_new_client("10.0.0.1", -0.1, 0.0, 0.1)
            .await
            .unwrap();
        assert_eq!(store.connections("10.0.0.1"), Some(1));
        assert_eq!(store.t2_access_multiplier("10.0.0.1"), Some(0.1));
        assert_eq!(store.t2_blocked("10.0.0.1"), Some(false));
    }

    #[tokio::test]
    async fn initialize_new_client_is_idempotent() {
        let store = MemoryStore::new();
        store
            .initialize_new_client("10.0.0.1", -0.1, 0.0, 0.1)
            .await
            .unwrap();
        store.increment_connections("10.0.0.1").await.unwrap();
        store
            .initialize_new_client("10.0.0.1", -99.0, -99.0, 9.9)
            .await
            .unwrap();

        // Second call is a no-op: connections keeps the increment from
        // between the two calls, and the original scores/multiplier survive.
        assert_eq!(store.connections("10.0.0.1"), Some(2));
        assert_eq!(store.t2_access_multiplier("10.0.0.1"), Some(0.1));
        let scores = store.get_scores("10.0.0.1", -1000.0).await.unwrap();
        assert_eq!(scores, Scores { t1: -0.1, t2: 0.0 });
    }

    #[tokio::test]
    async fn decrement_below_zero_clamps_at_zero() {
        let store = MemoryStore::new();
        store
            .initialize_new_client("10.0.0.1", -0.1, 0.0, 0.1)
            .await
            .unwrap();
        store.decrement_connections("10.0.0.1").await.unwrap();
        assert_eq!(store.connections("10.0.0.1"), Some(0));
    }

    #[tokio::test]
    async fn t2_blocked_latches_and_does_not_unlatch() {
        let store = MemoryStore::new();
        store
            .initialize_new_client("10.0.0.1", -0.1, -6.0, 0.1)
            .await
            .unwrap();
        store.get_scores("10.0.0.1", -5.0).await.unwrap();
        assert_eq!(store.t2_blocked("10.0.0.1"), Some(true));

        store.add_to_misbehavior("10.0.0.1", 0).await.unwrap();
        store.get_scores("10.0.0.1", -100.0).await.unwrap();
        assert_eq!(store.t2_blocked("10.0.0.1"), Some(true));
    }

    #[tokio::test]
    async fn unknown_address_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get_scores("10.0.0.9", -5.0).await,
            Err(StoreError::NotFound)
        ));
    }
}

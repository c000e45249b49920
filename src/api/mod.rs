//! Public API surface (spec.md §4.F): a narrow command surface wrapping the
//! scoring engine, the bypass lists, and connection-count bookkeeping for a
//! reverse-proxy front end to call into.

pub mod preserialized;
pub mod rest;

use std::time::Instant;

use tracing::warn;

use crate::engine::{Engine, Verdict};
use crate::metrics;
use crate::netmap::Netmap;

/// The assembled core: bypass lists plus the scoring engine, built once at
/// startup and shared read-only across every request (spec.md §5).
pub struct Core {
    whitelist: Netmap,
    proxylist: Netmap,
    engine: Engine,
}

/// Identities arrive as raw bytes at the API boundary; Rust strings carry
/// their own length so there is no terminator to strip the way the
/// original does, but invalid UTF-8 is handled the same way a malformed
/// address is handled elsewhere: logged and treated as a non-match rather
/// than propagated as an error (spec.md §4.F).
fn identity(addr: &[u8]) -> Option<&str> {
    match std::str::from_utf8(addr) {
        Ok(s) => Some(s),
        Err(err) => {
            warn!(error = %err, "identity is not valid UTF-8");
            None
        }
    }
}

impl Core {
    pub fn new(whitelist: Netmap, proxylist: Netmap, engine: Engine) -> Self {
        Self {
            whitelist,
            proxylist,
            engine,
        }
    }

    /// True if `addr` bypasses scoring entirely (spec.md §4.A, §4.F).
    pub fn is_in_whitelist(&self, addr: &[u8]) -> bool {
        identity(addr).is_some_and(|addr| self.whitelist.is_in(addr))
    }

    /// True if `addr` is a trusted proxy whose forwarded-for identity should
    /// be trusted instead (spec.md §4.A; identity rewriting itself is a
    /// host-side concern, out of scope here).
    pub fn is_in_proxylist(&self, addr: &[u8]) -> bool {
        identity(addr).is_some_and(|addr| self.proxylist.is_in(addr))
    }

    /// Evaluates the current verdict for `addr`, recording decision latency
    /// and per-verdict counters (spec.md §4.E, §4.F). An unparseable
    /// identity fails open to `Allow`, matching the engine's own
    /// fail-open-on-backend-error posture.
    pub async fn get_bin(&self, addr: &[u8]) -> Verdict {
        let Some(addr) = identity(addr) else {
            return Verdict::Allow;
        };
        let start = Instant::now();
        let verdict = self.engine.get_bin(addr).await;
        metrics::record_decision_latency(start.elapsed().as_secs_f64());
        match verdict {
            Verdict::Allow => metrics::inc_verdict_allow(),
            Verdict::BlockT1 => metrics::inc_verdict_block_t1(),
            Verdict::BlockT2 => metrics::inc_verdict_block_t2(),
        }
        verdict
    }

    pub async fn misbehaved(&self, addr: &[u8], amount: i64) {
        if let Some(addr) = identity(addr) {
            self.engine.misbehaved(addr, amount).await;
        }
    }

    /// Evaluates the connection-phase verdict for `addr`, recording the same
    /// per-verdict counters as [`Core::get_bin`] (spec.md §4.E, §4.F).
    pub async fn connecting(&self, addr: &[u8]) -> Verdict {
        let Some(addr) = identity(addr) else {
            return Verdict::Allow;
        };
        let verdict = self.engine.connecting(addr).await;
        match verdict {
            Verdict::Allow => metrics::inc_verdict_allow(),
            Verdict::BlockT1 => metrics::inc_verdict_block_t1(),
            Verdict::BlockT2 => metrics::inc_verdict_block_t2(),
        }
        verdict
    }

    pub async fn disconnected(&self, addr: &[u8]) {
        if let Some(addr) = identity(addr) {
            self.engine.disconnected(addr).await;
        }
    }

    pub async fn clear_connections(&self) -> Result<(), crate::store::StoreError> {
        self.engine.clear_connections().await
    }
}

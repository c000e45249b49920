//! Process-wide mutable state: live thresholds and the under-attack flag.
//!
//! Spec §3/§5/§9 call for lock-free scalar reads on the scoring path and
//! plain scalar writes from the subscriber tasks. `f64` has no native atomic
//! type, so thresholds are stored as the bit pattern of an `AtomicU64` and
//! converted with `to_bits`/`from_bits` at the boundary. Stale reads are
//! acceptable per spec — there is no synchronization between a threshold
//! write and a concurrent scoring read beyond what the atomic itself gives.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

const DEFAULT_T1_THRESHOLD: f64 = -10.0;
const DEFAULT_T2_THRESHOLD: f64 = -5.0;

/// Configuration fixed once at startup and read-only for the process
/// lifetime (spec §3, §5).
#[derive(Debug, Clone, Copy)]
pub struct FirstTouchConfig {
    pub t1_epsilon: f64,
    pub t1_attack_epsilon: f64,
    pub t2_epsilon: f64,
    pub t2_attack_epsilon: f64,
    pub t2_initial_access_multiplier: f64,
}

impl Default for FirstTouchConfig {
    fn default() -> Self {
        Self {
            t1_epsilon: 9.9,
            t1_attack_epsilon: -0.5,
            t2_epsilon: 4.9,
            t2_attack_epsilon: 4.9,
            t2_initial_access_multiplier: 0.1,
        }
    }
}

/// Shared, mutable runtime context: live thresholds and the attack flag,
/// plus the first-touch configuration fixed at `initialize` time.
pub struct Thresholds {
    t1_threshold: AtomicU64,
    t2_threshold: AtomicU64,
    under_attack: AtomicU8,
    pub first_touch: FirstTouchConfig,
}

impl Thresholds {
    pub fn new(first_touch: FirstTouchConfig) -> Self {
        Self {
            t1_threshold: AtomicU64::new(DEFAULT_T1_THRESHOLD.to_bits()),
            t2_threshold: AtomicU64::new(DEFAULT_T2_THRESHOLD.to_bits()),
            under_attack: AtomicU8::new(0),
            first_touch,
        }
    }

    pub fn t1_threshold(&self) -> f64 {
        f64::from_bits(self.t1_threshold.load(Ordering::Relaxed))
    }

    pub fn t2_threshold(&self) -> f64 {
        f64::from_bits(self.t2_threshold.load(Ordering::Relaxed))
    }

    pub fn under_attack(&self) -> bool {
        self.under_attack.load(Ordering::Relaxed) != 0
    }

    pub fn set_t1_threshold(&self, value: f64) {
        self.t1_threshold.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn set_t2_threshold(&self, value: f64) {
        self.t2_threshold.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn set_under_attack(&self, flag: bool) {
        self.under_attack.store(u8::from(flag), Ordering::Relaxed);
    }
}

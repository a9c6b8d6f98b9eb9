use crate::timing::{PhaseSnapshot, PhaseTimer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// How inbound messages for a subscription are handed to its handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingPolicy {
    /// Run the handler inline on the delivery path
    Synchronous,
    /// Run the handler on a detached worker, dropping messages while one is in flight
    #[serde(rename = "threaded", alias = "threaded_drop")]
    ThreadedDrop,
}

impl Default for ProcessingPolicy {
    fn default() -> Self {
        ProcessingPolicy::Synchronous
    }
}

impl fmt::Display for ProcessingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingPolicy::Synchronous => write!(f, "synchronous"),
            ProcessingPolicy::ThreadedDrop => write!(f, "threaded"),
        }
    }
}

/// Concurrency guard and counters for one subscription
#[derive(Debug)]
pub struct SubscriptionState {
    name: String,
    policy: ProcessingPolicy,
    /// Held while a threaded invocation is in flight; absent for synchronous subscriptions
    in_flight: Option<AtomicBool>,
    received: AtomicU64,
    processed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    timer: PhaseTimer,
}

impl SubscriptionState {
    pub fn new(name: &str, policy: ProcessingPolicy) -> Self {
        let in_flight = match policy {
            ProcessingPolicy::ThreadedDrop => Some(AtomicBool::new(false)),
            ProcessingPolicy::Synchronous => None,
        };
        Self {
            name: name.to_string(),
            policy,
            in_flight,
            received: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            timer: PhaseTimer::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> ProcessingPolicy {
        self.policy
    }

    pub fn timer(&self) -> &PhaseTimer {
        &self.timer
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Non-blocking attempt to claim the subscription for one invocation.
    ///
    /// Always succeeds for synchronous subscriptions. Every `true` must be
    /// paired with exactly one [`end_processing`](Self::end_processing);
    /// prefer [`try_acquire`](Self::try_acquire), which pairs them for you.
    pub fn try_begin_processing(&self) -> bool {
        match &self.in_flight {
            Some(flag) => flag
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok(),
            None => true,
        }
    }

    pub fn end_processing(&self) {
        if let Some(flag) = &self.in_flight {
            flag.store(false, Ordering::Release);
        }
    }

    /// Scoped form of `try_begin_processing`: the claim is released when the guard drops.
    pub fn try_acquire(self: &Arc<Self>) -> Option<ProcessingGuard> {
        if self.try_begin_processing() {
            Some(ProcessingGuard {
                state: Arc::clone(self),
            })
        } else {
            None
        }
    }

    /// Whether a threaded invocation currently holds the guard
    pub fn is_busy(&self) -> bool {
        self.in_flight
            .as_ref()
            .map(|flag| flag.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    pub fn stats(&self) -> SubscriptionStats {
        SubscriptionStats {
            name: self.name.clone(),
            policy: self.policy,
            received: self.received.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            busy: self.is_busy(),
            phases: self.timer.snapshot(),
        }
    }
}

/// Claim on a subscription; releases it exactly once on drop
#[must_use = "the subscription is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ProcessingGuard {
    state: Arc<SubscriptionState>,
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.state.end_processing();
    }
}

/// Point-in-time report for one subscription
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionStats {
    pub name: String,
    pub policy: ProcessingPolicy,
    pub received: u64,
    pub processed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub busy: bool,
    pub phases: PhaseSnapshot,
}

impl fmt::Display for SubscriptionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ratio = if self.received > 0 {
            100.0 * self.processed as f64 / self.received as f64
        } else {
            0.0
        };
        writeln!(
            f,
            "subscription '{}' ({}): received {}, processed {} ({:.1}%), skipped {}, failed {}",
            self.name, self.policy, self.received, self.processed, ratio, self.skipped, self.failed
        )?;
        for (phase, stats) in &self.phases {
            writeln!(f, "  {:<24} {}", phase, stats)?;
        }
        Ok(())
    }
}

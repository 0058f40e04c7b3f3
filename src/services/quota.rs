//! Cost-aware admission control.
//!
//! Two layers gate outbound work: the process-wide [`QuotaLimiter`] with a
//! daily budget over named operation costs, and the per-session
//! [`CostBudget`] derived from `max_cost_units`. The limiter admits only
//! when the full cost fits; the session budget admits while anything at
//! all remains and records the overshoot, so a single expensive operation
//! can both run and exhaust the session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;

use crate::ports::Clock;

/// Default operation costs, mirroring the upstream API cost tables.
fn default_costs() -> HashMap<String, u64> {
    HashMap::from([
        ("youtube.search".to_string(), 100),
        ("youtube.videos".to_string(), 1),
        ("spotify.search".to_string(), 1),
        ("spotify.artist".to_string(), 1),
        ("instagram.profile".to_string(), 1),
        ("tiktok.profile".to_string(), 1),
        ("analyzer.lyrics".to_string(), 1),
        // Fetch work is time-budgeted, not cost-budgeted.
        ("fetch.headless".to_string(), 0),
        ("fetch.plain".to_string(), 0),
    ])
}

struct QuotaState {
    spent: u64,
    window_day: NaiveDate,
}

struct QuotaInner {
    costs: HashMap<String, u64>,
    daily_budget: u64,
    state: Mutex<QuotaState>,
    clock: Arc<dyn Clock>,
}

/// Process-global daily budget over named operations. Resets at UTC
/// midnight. All operations are non-blocking.
#[derive(Clone)]
pub struct QuotaLimiter {
    inner: Arc<QuotaInner>,
}

impl QuotaLimiter {
    pub fn new(daily_budget: u64, clock: Arc<dyn Clock>) -> Self {
        let today = clock.now().date_naive();
        Self {
            inner: Arc::new(QuotaInner {
                costs: default_costs(),
                daily_budget,
                state: Mutex::new(QuotaState {
                    spent: 0,
                    window_day: today,
                }),
                clock,
            }),
        }
    }

    /// Override an operation cost; unknown operations default to cost 1.
    pub fn with_cost(mut self, op: &str, cost: u64) -> Self {
        let inner = Arc::get_mut(&mut self.inner)
            .expect("with_cost must be called before the limiter is shared");
        inner.costs.insert(op.to_string(), cost);
        self
    }

    pub fn cost_of(&self, op: &str) -> u64 {
        self.inner.costs.get(op).copied().unwrap_or(1)
    }

    /// Non-blocking acquire: decrements the budget iff the full cost of
    /// `count` operations still fits.
    pub fn try_acquire(&self, op: &str, count: u64) -> bool {
        let cost = self.cost_of(op).saturating_mul(count);
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.roll_window(&mut state);
        let remaining = self.inner.daily_budget.saturating_sub(state.spent);
        if cost > remaining {
            return false;
        }
        state.spent += cost;
        true
    }

    /// Acquire with a refundable handle for failure paths.
    pub fn reserve(&self, op: &str, count: u64) -> Option<QuotaReservation> {
        if !self.try_acquire(op, count) {
            return None;
        }
        Some(QuotaReservation {
            limiter: self.clone(),
            amount: self.cost_of(op).saturating_mul(count),
            settled: false,
        })
    }

    /// Budget units left in the current window.
    pub fn remaining(&self) -> u64 {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.roll_window(&mut state);
        self.inner.daily_budget.saturating_sub(state.spent)
    }

    fn roll_window(&self, state: &mut QuotaState) {
        let today = self.inner.clock.now().date_naive();
        if today != state.window_day {
            state.spent = 0;
            state.window_day = today;
        }
    }

    fn refund(&self, amount: u64) {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.spent = state.spent.saturating_sub(amount);
    }
}

/// Refundable budget reservation. `commit` is a no-op acknowledgement;
/// `refund` returns the units on failure paths.
pub struct QuotaReservation {
    limiter: QuotaLimiter,
    amount: u64,
    settled: bool,
}

impl QuotaReservation {
    pub fn commit(mut self) {
        self.settled = true;
    }

    pub fn refund(mut self) {
        if !self.settled {
            self.limiter.refund(self.amount);
            self.settled = true;
        }
    }
}

/// Per-session cost ceiling from `SessionRequest::max_cost_units`.
///
/// Admission succeeds while spend is below the ceiling; the admitted
/// operation may overshoot it, after which the budget reports exhausted.
#[derive(Debug)]
pub struct CostBudget {
    max_units: Option<u64>,
    spent: AtomicU64,
}

impl CostBudget {
    pub fn new(max_units: Option<u64>) -> Self {
        Self {
            max_units,
            spent: AtomicU64::new(0),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    /// Charge `cost` units if the budget is not yet exhausted.
    pub fn try_charge(&self, cost: u64) -> bool {
        match self.max_units {
            None => true,
            Some(max) => {
                // Admit-then-overshoot: the check is against spend so
                // far, not spend plus cost.
                let prior = self.spent.fetch_add(cost, Ordering::SeqCst);
                if prior >= max {
                    self.spent.fetch_sub(cost, Ordering::SeqCst);
                    false
                } else {
                    true
                }
            }
        }
    }

    pub fn exhausted(&self) -> bool {
        self.max_units
            .is_some_and(|max| self.spent.load(Ordering::SeqCst) >= max)
    }

    pub fn spent(&self) -> u64 {
        self.spent.load(Ordering::SeqCst)
    }
}

/// Combined admission gate for harvest searches: session budget first,
/// then the process-wide limiter. Records whether any admission was
/// denied so the session summary can report budget exhaustion.
pub struct SearchBudget {
    quota: QuotaLimiter,
    session: Arc<CostBudget>,
    denied: AtomicBool,
}

impl SearchBudget {
    pub fn new(quota: QuotaLimiter, session: Arc<CostBudget>) -> Self {
        Self {
            quota,
            session,
            denied: AtomicBool::new(false),
        }
    }

    /// Admit one search-page operation.
    pub fn admit(&self, op: &str) -> bool {
        let cost = self.quota.cost_of(op);
        if !self.session.try_charge(cost) {
            self.denied.store(true, Ordering::SeqCst);
            return false;
        }
        if !self.quota.try_acquire(op, 1) {
            self.denied.store(true, Ordering::SeqCst);
            return false;
        }
        true
    }

    pub fn was_denied(&self) -> bool {
        self.denied.load(Ordering::SeqCst)
    }

    pub fn session_exhausted(&self) -> bool {
        self.session.exhausted()
    }
}

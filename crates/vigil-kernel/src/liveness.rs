//! Liveness checks – the "still running?" signals the health supervisor polls.
//!
//! Every monitored worker contributes exactly one [`LivenessCheck`].  Checks
//! are collected into a [`CheckSet`] whose order is fixed at construction;
//! a check's position is its identity and its bit in the
//! [`FaultMask`][vigil_types::FaultMask].
//!
//! Three implementations are provided:
//!
//! - [`FnCheck`] – wraps any `FnMut() -> bool`.
//! - [`LoopCounterCheck`] – healthy while a worker's [`LoopCounter`] keeps
//!   advancing between polls and no error has been flagged.  This is how the
//!   self-test workers report.
//! - [`HeartbeatCheck`] – healthy while a [`Heartbeat`] has been recorded
//!   within its deadline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use vigil_types::{CheckResult, HealthReport, MAX_CHECKS, VigilError};

// ────────────────────────────────────────────────────────────────────────────
// LivenessCheck trait
// ────────────────────────────────────────────────────────────────────────────

/// A single "is this worker still healthy?" predicate.
pub trait LivenessCheck: Send {
    /// Name of the monitored subsystem, used in reports and logs.
    fn name(&self) -> &str;

    /// Return `true` when the worker is still running correctly.
    ///
    /// Called once per supervisor tick from the timer context; must not
    /// block.
    fn still_running(&mut self) -> bool;
}

// ────────────────────────────────────────────────────────────────────────────
// FnCheck
// ────────────────────────────────────────────────────────────────────────────

/// A [`LivenessCheck`] backed by a closure.
pub struct FnCheck<F> {
    name: String,
    check: F,
}

impl<F> FnCheck<F>
where
    F: FnMut() -> bool + Send,
{
    pub fn new(name: impl Into<String>, check: F) -> Box<Self> {
        Box::new(Self {
            name: name.into(),
            check,
        })
    }
}

impl<F> LivenessCheck for FnCheck<F>
where
    F: FnMut() -> bool + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn still_running(&mut self) -> bool {
        (self.check)()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Loop counter
// ────────────────────────────────────────────────────────────────────────────

/// Progress counter shared between a worker and its [`LoopCounterCheck`].
///
/// The worker calls [`tick`][Self::tick] once per completed cycle and
/// [`flag_error`][Self::flag_error] when it detects an incorrect result.  The
/// error flag is sticky.
#[derive(Debug, Default)]
pub struct LoopCounter {
    cycles: AtomicU64,
    error: AtomicBool,
}

impl LoopCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record one completed cycle.
    pub fn tick(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    /// Record that the worker observed an incorrect result.
    pub fn flag_error(&self) {
        self.error.store(true, Ordering::Relaxed);
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn has_error(&self) -> bool {
        self.error.load(Ordering::Relaxed)
    }
}

/// Healthy iff the counter advanced since the previous poll and no error was
/// flagged.
///
/// The first poll compares against zero, so a worker that has not completed
/// a single cycle by the first tick is reported as stalled.
pub struct LoopCounterCheck {
    name: String,
    counter: Arc<LoopCounter>,
    last_seen: u64,
}

impl LoopCounterCheck {
    pub fn new(name: impl Into<String>, counter: Arc<LoopCounter>) -> Box<Self> {
        Box::new(Self {
            name: name.into(),
            counter,
            last_seen: 0,
        })
    }
}

impl LivenessCheck for LoopCounterCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn still_running(&mut self) -> bool {
        let now = self.counter.cycles();
        let advanced = now != self.last_seen;
        self.last_seen = now;
        advanced && !self.counter.has_error()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Heartbeat deadline
// ────────────────────────────────────────────────────────────────────────────

/// Cloneable handle a component uses to report that it is alive.
#[derive(Clone, Debug)]
pub struct Heartbeat {
    epoch: Instant,
    last_ms: Arc<AtomicU64>,
}

impl Heartbeat {
    /// Record a heartbeat now, resetting the deadline.
    pub fn beat(&self) {
        let now = self.epoch.elapsed().as_millis() as u64;
        self.last_ms.store(now, Ordering::Relaxed);
    }

    fn silence(&self) -> Duration {
        let last = Duration::from_millis(self.last_ms.load(Ordering::Relaxed));
        self.epoch.elapsed().saturating_sub(last)
    }
}

/// Healthy while the paired [`Heartbeat`] was recorded within `timeout`.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use vigil_kernel::liveness::{HeartbeatCheck, LivenessCheck};
///
/// let (mut check, heartbeat) = HeartbeatCheck::new("uplink", Duration::from_secs(1));
/// heartbeat.beat();
/// assert!(check.still_running());
/// ```
pub struct HeartbeatCheck {
    name: String,
    heartbeat: Heartbeat,
    timeout: Duration,
}

impl HeartbeatCheck {
    /// Create a check and its heartbeat handle.  The deadline starts now, so
    /// the component begins healthy.
    pub fn new(name: impl Into<String>, timeout: Duration) -> (Box<Self>, Heartbeat) {
        let heartbeat = Heartbeat {
            epoch: Instant::now(),
            last_ms: Arc::new(AtomicU64::new(0)),
        };
        let check = Box::new(Self {
            name: name.into(),
            heartbeat: heartbeat.clone(),
            timeout,
        });
        (check, heartbeat)
    }
}

impl LivenessCheck for HeartbeatCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn still_running(&mut self) -> bool {
        self.heartbeat.silence() <= self.timeout
    }
}

// ────────────────────────────────────────────────────────────────────────────
// CheckSet
// ────────────────────────────────────────────────────────────────────────────

/// Ordered, fixed-size collection of liveness checks.
///
/// # Example
///
/// ```
/// use vigil_kernel::liveness::{CheckSet, FnCheck};
///
/// let mut checks = CheckSet::new();
/// checks.push(FnCheck::new("always_ok", || true)).unwrap();
/// checks.push(FnCheck::new("always_bad", || false)).unwrap();
///
/// let report = checks.evaluate();
/// assert_eq!(report.mask().bits(), 0b10);
/// ```
#[derive(Default)]
pub struct CheckSet {
    checks: Vec<Box<dyn LivenessCheck>>,
}

impl CheckSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `check` and return its index.
    ///
    /// # Errors
    ///
    /// Returns [`VigilError::Config`] once [`MAX_CHECKS`] checks are
    /// registered, since the fault mask has no bit left for another.
    pub fn push(&mut self, check: Box<dyn LivenessCheck>) -> Result<usize, VigilError> {
        if self.checks.len() >= MAX_CHECKS {
            return Err(VigilError::Config(format!(
                "cannot register '{}': at most {MAX_CHECKS} liveness checks are supported",
                check.name()
            )));
        }
        self.checks.push(check);
        Ok(self.checks.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Names of the registered checks in evaluation order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.checks.iter().map(|c| c.name())
    }

    /// Evaluate every check in registration order.
    ///
    /// All checks run on every call; a failure never hides a later one.
    pub fn evaluate(&mut self) -> HealthReport {
        let results = self
            .checks
            .iter_mut()
            .enumerate()
            .map(|(index, check)| CheckResult {
                index,
                name: check.name().to_string(),
                healthy: check.still_running(),
            })
            .collect();
        HealthReport::new(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn fn_check_delegates_to_closure() {
        let mut check = FnCheck::new("flag", || false);
        assert_eq!(check.name(), "flag");
        assert!(!check.still_running());
    }

    #[test]
    fn loop_counter_check_requires_progress() {
        let counter = LoopCounter::new();
        let mut check = LoopCounterCheck::new("gen_queue", Arc::clone(&counter));

        // No cycle completed yet.
        assert!(!check.still_running());

        counter.tick();
        assert!(check.still_running());

        // No progress since the previous poll.
        assert!(!check.still_running());

        counter.tick();
        counter.tick();
        assert!(check.still_running());
    }

    #[test]
    fn loop_counter_error_is_sticky() {
        let counter = LoopCounter::new();
        let mut check = LoopCounterCheck::new("semaphore", Arc::clone(&counter));
        counter.tick();
        counter.flag_error();
        assert!(!check.still_running());

        counter.tick();
        assert!(counter.has_error());
        assert!(!check.still_running());
    }

    #[test]
    fn fresh_heartbeat_check_is_healthy() {
        let (mut check, _hb) = HeartbeatCheck::new("uplink", Duration::from_secs(5));
        assert!(check.still_running());
    }

    #[test]
    fn heartbeat_resets_deadline() {
        let (mut check, hb) = HeartbeatCheck::new("uplink", Duration::from_millis(40));
        thread::sleep(Duration::from_millis(25));
        hb.beat();
        thread::sleep(Duration::from_millis(25));
        // Still alive because of the recent heartbeat.
        assert!(check.still_running());
    }

    #[test]
    fn heartbeat_check_times_out_when_silent() {
        let (mut check, _hb) = HeartbeatCheck::new("uplink", Duration::from_millis(20));
        thread::sleep(Duration::from_millis(40));
        assert!(!check.still_running());
    }

    #[test]
    fn check_set_evaluates_every_check_in_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut checks = CheckSet::new();
        for (name, healthy) in [("a", true), ("b", false), ("c", false), ("d", true)] {
            let calls = Arc::clone(&calls);
            checks
                .push(FnCheck::new(name, move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    healthy
                }))
                .unwrap();
        }

        let report = checks.evaluate();
        assert_eq!(calls.load(Ordering::SeqCst), 4, "no check may be skipped");
        assert_eq!(report.mask().bits(), 0b0110);
        assert_eq!(
            report.results.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "c", "d"]
        );
        assert_eq!(checks.names().collect::<Vec<_>>(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn check_set_rejects_overflow() {
        let mut checks = CheckSet::new();
        for i in 0..MAX_CHECKS {
            assert_eq!(checks.push(FnCheck::new(format!("c{i}"), || true)).unwrap(), i);
        }
        let overflow = checks.push(FnCheck::new("one_too_many", || true));
        assert!(matches!(overflow, Err(VigilError::Config(_))));
        assert_eq!(checks.len(), MAX_CHECKS);
    }

    #[test]
    fn empty_check_set_reports_healthy() {
        let mut checks = CheckSet::new();
        assert!(checks.is_empty());
        assert!(!checks.evaluate().any_failed());
    }
}

//! [`HealthSupervisor`] – periodic aggregation of worker liveness.
//!
//! The supervisor is the callback of an auto-reload software timer.  Each
//! time the timer fires, [`HealthSupervisor::on_tick`]:
//!
//! 1. evaluates every registered [`LivenessCheck`][crate::liveness::LivenessCheck]
//!    in registration order and folds the failures into a
//!    [`FaultMask`];
//! 2. on the first non-empty mask, asks the timer service (zero-wait) to
//!    shorten its own period from the normal interval to the degraded one;
//! 3. toggles the check indicator exactly once.
//!
//! The indicator's blink rate is therefore the system status: slow means no
//! fault has been seen since start, fast means at least one has.  The switch
//! to the degraded period is latched for the lifetime of the process.
//!
//! # Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::time::Duration;
//! use vigil_hal::sim::SimPanel;
//! use vigil_kernel::health_supervisor::{HealthSupervisor, SupervisorConfig};
//! use vigil_kernel::liveness::{CheckSet, FnCheck};
//! use vigil_kernel::scheduler::TimerControl;
//! use vigil_types::{CheckPeriod, TimerId, VigilError};
//!
//! struct Timer(RefCell<Vec<Duration>>);
//! impl TimerControl for Timer {
//!     fn id(&self) -> TimerId { TimerId(0) }
//!     fn change_period(&self, period: Duration) -> Result<(), VigilError> {
//!         self.0.borrow_mut().push(period);
//!         Ok(())
//!     }
//! }
//!
//! let mut checks = CheckSet::new();
//! checks.push(FnCheck::new("queue", || false)).unwrap();
//! let (panel, leds) = SimPanel::new().with_leds(3).build();
//!
//! let mut supervisor = HealthSupervisor::new(SupervisorConfig::default(), checks, Box::new(panel));
//! let timer = Timer(RefCell::new(Vec::new()));
//! supervisor.on_tick(&timer);
//!
//! assert_eq!(supervisor.state().current_period(), CheckPeriod::Degraded);
//! assert_eq!(timer.0.borrow().as_slice(), &[Duration::from_millis(200)]);
//! assert_eq!(leds[2].toggles(), 1);
//! ```

use std::time::Duration;

use tracing::{debug, instrument, warn};
use vigil_hal::StatusSink;
use vigil_types::{CheckPeriod, FaultMask, HealthReport, VigilError};

use crate::liveness::CheckSet;
use crate::scheduler::TimerControl;

// ────────────────────────────────────────────────────────────────────────────
// Constants
// ────────────────────────────────────────────────────────────────────────────

/// Period of the check timer while no fault has been seen.
pub const DEFAULT_NORMAL_PERIOD: Duration = Duration::from_millis(3000);

/// Period of the check timer once a fault has been seen.
pub const DEFAULT_DEGRADED_PERIOD: Duration = Duration::from_millis(200);

/// Indicator slot toggled by the supervisor.
pub const DEFAULT_CHECK_INDICATOR: usize = 2;

// ────────────────────────────────────────────────────────────────────────────
// Configuration & state
// ────────────────────────────────────────────────────────────────────────────

/// Static configuration of a [`HealthSupervisor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Timer period while no fault has been observed.
    pub normal_period: Duration,
    /// Timer period after the first observed fault.
    pub degraded_period: Duration,
    /// Slot of the status indicator toggled on every tick.
    pub indicator: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            normal_period: DEFAULT_NORMAL_PERIOD,
            degraded_period: DEFAULT_DEGRADED_PERIOD,
            indicator: DEFAULT_CHECK_INDICATOR,
        }
    }
}

impl SupervisorConfig {
    /// The timer period that corresponds to `period`.
    pub fn duration_of(&self, period: CheckPeriod) -> Duration {
        match period {
            CheckPeriod::Normal => self.normal_period,
            CheckPeriod::Degraded => self.degraded_period,
        }
    }
}

/// Latched supervisor state.
///
/// `already_degraded` is derived from the current period, so the two can
/// never disagree.  The only transition is Normal → Degraded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorState {
    current_period: CheckPeriod,
}

impl SupervisorState {
    pub fn current_period(&self) -> CheckPeriod {
        self.current_period
    }

    pub fn already_degraded(&self) -> bool {
        self.current_period == CheckPeriod::Degraded
    }

    fn latch_degraded(&mut self) {
        self.current_period = CheckPeriod::Degraded;
    }
}

/// Everything one tick observed and did.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    /// Per-check results, in evaluation order.
    pub report: HealthReport,
    /// The report folded into a bit-field.
    pub mask: FaultMask,
    /// Period in force after this tick.
    pub period: CheckPeriod,
    /// `true` on the single tick that switched the timer to the degraded
    /// period.
    pub degraded_now: bool,
    /// Set when a period change was needed but the request was refused; the
    /// change is re-attempted on the next tick.
    pub reschedule_error: Option<VigilError>,
    /// New indicator state, or `None` if the toggle failed.
    pub indicator_lit: Option<bool>,
}

// ────────────────────────────────────────────────────────────────────────────
// HealthSupervisor
// ────────────────────────────────────────────────────────────────────────────

/// Aggregates liveness checks into a fault mask and adapts the cadence of the
/// timer that drives it.
///
/// Owned by the timer callback; every mutation happens inside
/// [`on_tick`][Self::on_tick], so no locking is involved.
pub struct HealthSupervisor {
    config: SupervisorConfig,
    checks: CheckSet,
    status: Box<dyn StatusSink>,
    state: SupervisorState,
    ticks: u64,
}

impl HealthSupervisor {
    /// Build a supervisor in the Normal state.
    pub fn new(config: SupervisorConfig, checks: CheckSet, status: Box<dyn StatusSink>) -> Self {
        Self {
            config,
            checks,
            status,
            state: SupervisorState::default(),
            ticks: 0,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Number of completed ticks.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// The timer period the supervisor currently expects to run at.
    pub fn current_period_duration(&self) -> Duration {
        self.config.duration_of(self.state.current_period)
    }

    /// Timer callback.  Never blocks.
    #[instrument(skip_all, name = "health_tick", fields(tick = self.ticks + 1))]
    pub fn on_tick(&mut self, timer: &dyn TimerControl) -> TickOutcome {
        self.ticks += 1;

        let report = self.checks.evaluate();
        let mask = report.mask();
        for name in report.failed() {
            warn!(check = name, "liveness check failed");
        }

        let mut degraded_now = false;
        let mut reschedule_error = None;
        if !mask.is_empty() && !self.state.already_degraded() {
            match timer.change_period(self.config.degraded_period) {
                Ok(()) => {
                    self.state.latch_degraded();
                    degraded_now = true;
                    warn!(
                        %mask,
                        timer = %timer.id(),
                        period_ms = self.config.degraded_period.as_millis() as u64,
                        "fault detected; check timer switched to degraded period"
                    );
                }
                Err(e) => {
                    warn!(error = %e, %mask, "period change refused; retrying next tick");
                    reschedule_error = Some(e);
                }
            }
        }

        let indicator_lit = match self.status.toggle_indicator(self.config.indicator) {
            Ok(lit) => Some(lit),
            Err(e) => {
                warn!(error = %e, indicator = self.config.indicator, "status indicator toggle failed");
                None
            }
        };

        debug!(%mask, period = ?self.state.current_period, "health tick complete");

        TickOutcome {
            report,
            mask,
            period: self.state.current_period,
            degraded_now,
            reschedule_error,
            indicator_lit,
        }
    }
}

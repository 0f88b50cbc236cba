//! Software timer service – the single execution context every timer
//! callback runs in.
//!
//! Timers are driven by one Tokio task ([`TimerService::run`]).  Everything
//! else talks to it through a bounded command queue, and every request is
//! zero-wait: if the queue is full the request fails with
//! [`VigilError::CommandQueueFull`] instead of blocking the caller.  That
//! matters because the most frequent sender is a timer callback itself, and
//! a callback that blocked on the queue it is supposed to drain would
//! deadlock the service.
//!
//! Commands queued from inside a callback are processed before the next
//! expiry is considered, so a period change requested by a callback re-arms
//! the timer from the moment the command is handled.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use vigil_runtime::timer::timer_service;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), vigil_types::VigilError> {
//! let (service, timers) = timer_service(8);
//! let worker = service.spawn();
//!
//! let check = timers.create("CheckTimer", Duration::from_millis(10), true, |_timer| {})?;
//! check.start()?;
//!
//! timers.shutdown()?;
//! worker.await.ok();
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, trace, warn};
use vigil_kernel::TimerControl;
use vigil_types::{TimerId, VigilError};

/// Name reported in [`VigilError::CommandQueueFull`].
pub const TIMER_QUEUE: &str = "timer";

/// Default depth of the timer command queue.
pub const DEFAULT_TIMER_QUEUE_DEPTH: usize = 10;

/// Callback run by the service each time a timer expires.  It receives a
/// handle to the timer that fired.
pub type TimerCallback = Box<dyn FnMut(&dyn TimerControl) + Send>;

enum TimerCommand {
    Create {
        id: TimerId,
        name: String,
        period: Duration,
        auto_reload: bool,
        callback: TimerCallback,
    },
    Start(TimerId),
    Stop(TimerId),
    ChangePeriod(TimerId, Duration),
    Shutdown,
}

fn try_send(tx: &mpsc::Sender<TimerCommand>, command: TimerCommand) -> Result<(), VigilError> {
    tx.try_send(command).map_err(|e| match e {
        TrySendError::Full(_) => VigilError::CommandQueueFull {
            queue: TIMER_QUEUE.to_string(),
        },
        TrySendError::Closed(_) => VigilError::Channel("timer service has stopped".to_string()),
    })
}

fn validate_period(period: Duration) -> Result<(), VigilError> {
    if period.is_zero() {
        return Err(VigilError::Scheduler(
            "timer period must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Handles
// ────────────────────────────────────────────────────────────────────────────

/// Cloneable front-end of a [`TimerService`]: creates timers and stops the
/// service.
#[derive(Clone)]
pub struct TimerServiceHandle {
    tx: mpsc::Sender<TimerCommand>,
    next_id: Arc<AtomicU32>,
}

impl TimerServiceHandle {
    /// Create a dormant timer.  It does not run until [`TimerHandle::start`]
    /// (or a period change) is requested.
    ///
    /// # Errors
    ///
    /// [`VigilError::Scheduler`] for a zero period, otherwise the queue
    /// errors of every zero-wait request.
    pub fn create<F>(
        &self,
        name: impl Into<String>,
        period: Duration,
        auto_reload: bool,
        callback: F,
    ) -> Result<TimerHandle, VigilError>
    where
        F: FnMut(&dyn TimerControl) + Send + 'static,
    {
        validate_period(period)?;
        let id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let name = name.into();
        try_send(
            &self.tx,
            TimerCommand::Create {
                id,
                name: name.clone(),
                period,
                auto_reload,
                callback: Box::new(callback),
            },
        )?;
        Ok(TimerHandle {
            id,
            name: name.into(),
            tx: self.tx.clone(),
        })
    }

    /// Ask the service to stop.  Pending commands queued before this one are
    /// still applied.
    pub fn shutdown(&self) -> Result<(), VigilError> {
        try_send(&self.tx, TimerCommand::Shutdown)
    }
}

/// Handle to one timer.  Every method is a zero-wait request.
#[derive(Clone)]
pub struct TimerHandle {
    id: TimerId,
    name: Arc<str>,
    tx: mpsc::Sender<TimerCommand>,
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

impl TimerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Arm the timer one period from now (restarting it if already armed).
    pub fn start(&self) -> Result<(), VigilError> {
        try_send(&self.tx, TimerCommand::Start(self.id))
    }

    /// Disarm the timer.
    pub fn stop(&self) -> Result<(), VigilError> {
        try_send(&self.tx, TimerCommand::Stop(self.id))
    }
}

impl TimerControl for TimerHandle {
    fn id(&self) -> TimerId {
        self.id
    }

    fn change_period(&self, period: Duration) -> Result<(), VigilError> {
        validate_period(period)?;
        try_send(&self.tx, TimerCommand::ChangePeriod(self.id, period))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Service
// ────────────────────────────────────────────────────────────────────────────

struct TimerEntry {
    name: String,
    period: Duration,
    auto_reload: bool,
    deadline: Option<Instant>,
    callback: TimerCallback,
}

/// The timer execution context.  Build with [`timer_service`].
pub struct TimerService {
    rx: mpsc::Receiver<TimerCommand>,
    // Weak so that the service alone does not keep its own queue open.
    tx: mpsc::WeakSender<TimerCommand>,
    timers: BTreeMap<TimerId, TimerEntry>,
}

/// Create a timer service with a command queue of `queue_depth` slots.
pub fn timer_service(queue_depth: usize) -> (TimerService, TimerServiceHandle) {
    let (tx, rx) = mpsc::channel(queue_depth.max(1));
    let service = TimerService {
        rx,
        tx: tx.downgrade(),
        timers: BTreeMap::new(),
    };
    let handle = TimerServiceHandle {
        tx,
        next_id: Arc::new(AtomicU32::new(0)),
    };
    (service, handle)
}

impl TimerService {
    /// Run the service on its own Tokio task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process commands and fire timers until shut down or until every
    /// handle has been dropped.
    pub async fn run(mut self) {
        debug!("timer service started");
        loop {
            let next = self.next_deadline();
            tokio::select! {
                biased;
                command = self.rx.recv() => match command {
                    Some(TimerCommand::Shutdown) | None => break,
                    Some(command) => self.apply(command),
                },
                _ = sleep_until_opt(next) => {
                    if !self.fire_due() {
                        break;
                    }
                }
            }
        }
        debug!(timers = self.timers.len(), "timer service stopped");
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timers.values().filter_map(|t| t.deadline).min()
    }

    fn apply(&mut self, command: TimerCommand) {
        let now = Instant::now();
        match command {
            TimerCommand::Create {
                id,
                name,
                period,
                auto_reload,
                callback,
            } => {
                debug!(%id, %name, ?period, auto_reload, "timer created");
                self.timers.insert(
                    id,
                    TimerEntry {
                        name,
                        period,
                        auto_reload,
                        deadline: None,
                        callback,
                    },
                );
            }
            TimerCommand::Start(id) => {
                if let Some(timer) = self.entry(id) {
                    timer.deadline = Some(now + timer.period);
                    trace!(%id, name = %timer.name, "timer armed");
                }
            }
            TimerCommand::Stop(id) => {
                if let Some(timer) = self.entry(id) {
                    timer.deadline = None;
                    trace!(%id, name = %timer.name, "timer stopped");
                }
            }
            TimerCommand::ChangePeriod(id, period) => {
                if let Some(timer) = self.entry(id) {
                    timer.period = period;
                    timer.deadline = Some(now + period);
                    debug!(%id, name = %timer.name, ?period, "timer period changed");
                }
            }
            TimerCommand::Shutdown => {}
        }
    }

    fn entry(&mut self, id: TimerId) -> Option<&mut TimerEntry> {
        let entry = self.timers.get_mut(&id);
        if entry.is_none() {
            warn!(error = %VigilError::TimerNotFound(id), "timer command ignored");
        }
        entry
    }

    /// Fire every timer whose deadline has passed, earliest first.  Returns
    /// `false` once the command queue is gone.
    fn fire_due(&mut self) -> bool {
        let now = Instant::now();
        let mut due: Vec<(Instant, TimerId)> = self
            .timers
            .iter()
            .filter_map(|(id, t)| t.deadline.filter(|d| *d <= now).map(|d| (d, *id)))
            .collect();
        due.sort();

        let Some(tx) = self.tx.upgrade() else {
            return false;
        };

        for (deadline, id) in due {
            let Some(timer) = self.timers.get_mut(&id) else {
                continue;
            };
            let handle = TimerHandle {
                id,
                name: timer.name.as_str().into(),
                tx: tx.clone(),
            };
            trace!(%id, name = %timer.name, "timer fired");
            (timer.callback)(&handle);
            timer.deadline = timer.auto_reload.then(|| deadline + timer.period);
        }
        true
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}

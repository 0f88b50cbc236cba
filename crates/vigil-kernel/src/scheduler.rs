//! Scheduler and network primitives consumed by the kernel components.
//!
//! The kernel never owns a scheduler.  It is handed implementations of these
//! traits by whoever hosts it (`vigil-runtime` on a host, a board support
//! crate on target) and calls them from the execution context it was invoked
//! in.

use std::net::Ipv4Addr;
use std::time::Duration;

use vigil_types::{NetworkTaskSpec, Priority, TaskId, TimerId, VigilError};

/// Handle to the software timer that is currently firing.
///
/// Passed to timer callbacks.  Every method is a zero-wait request: it either
/// queues the command immediately or fails, it never waits for room.
pub trait TimerControl {
    /// The timer this handle refers to.
    fn id(&self) -> TimerId;

    /// Ask the timer service to re-arm this timer with `period`, counted from
    /// the moment the request is processed.
    ///
    /// # Errors
    ///
    /// Returns [`VigilError::CommandQueueFull`] when the timer command queue
    /// has no free slot, or [`VigilError::Channel`] when the timer service
    /// has stopped.
    fn change_period(&self, period: Duration) -> Result<(), VigilError>;
}

/// Non-blocking task-creation primitive.
pub trait TaskSpawner: Send {
    /// Create a task described by `spec` and return its handle.
    ///
    /// # Errors
    ///
    /// Returns [`VigilError::TaskCreation`] if the scheduler cannot allocate
    /// the task.
    fn spawn(&mut self, spec: &NetworkTaskSpec) -> Result<TaskId, VigilError>;
}

/// Priority control over the task that dispatches network events.
pub trait PriorityControl: Send {
    /// Move the task to `priority`.
    ///
    /// # Errors
    ///
    /// Returns [`VigilError::Scheduler`] if the priority is out of range or
    /// the task no longer exists.
    fn set_priority(&mut self, priority: Priority) -> Result<(), VigilError>;

    /// The task's current priority.
    fn priority(&self) -> Priority;
}

/// Query for the interface's active address configuration.
pub trait AddressSource: Send {
    /// The IPv4 address currently assigned to the interface.
    ///
    /// # Errors
    ///
    /// Returns [`VigilError::AddressUnavailable`] when no address is bound.
    fn address_configuration(&self) -> Result<Ipv4Addr, VigilError>;
}

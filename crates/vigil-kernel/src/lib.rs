//! `vigil-kernel` – Supervision Core
//!
//! The part of Vigil that decides things.  It owns no threads and no
//! scheduler; it is called from the timer and network contexts of whatever
//! hosts it and acts only through the traits in [`scheduler`] and
//! `vigil-hal`.
//!
//! # Modules
//!
//! - [`health_supervisor`] – [`HealthSupervisor`][health_supervisor::HealthSupervisor]:
//!   the check-timer callback.  Evaluates every liveness check, folds
//!   failures into a [`FaultMask`][vigil_types::FaultMask], latches the timer
//!   into its fast period on the first fault and toggles the status LED.
//! - [`link_gate`] – [`LinkGate`][link_gate::LinkGate]:
//!   the link-event callback.  Creates the network task set exactly once on
//!   the first link-up and moves the network task between the idle and
//!   connected priority tiers.
//! - [`liveness`] – [`LivenessCheck`][liveness::LivenessCheck] and its
//!   implementations, collected into an ordered
//!   [`CheckSet`][liveness::CheckSet].
//! - [`scheduler`] – the timer, task, priority and address primitives the
//!   kernel consumes.

pub mod health_supervisor;
pub mod link_gate;
pub mod liveness;
pub mod scheduler;

pub use health_supervisor::{HealthSupervisor, SupervisorConfig, SupervisorState, TickOutcome};
pub use link_gate::{GateConfig, GateHooks, GateOutcome, LinkActivationState, LinkGate};
pub use liveness::{CheckSet, FnCheck, HeartbeatCheck, LivenessCheck, LoopCounter, LoopCounterCheck};
pub use scheduler::{AddressSource, PriorityControl, TaskSpawner, TimerControl};

//! `vigil-runtime` – Host-side Board Simulation
//!
//! Hosts the supervision core on Tokio: a timer service standing in for the
//! scheduler's timer task, a task table with priorities, the self-test
//! workers, a simulated network stack, and the wiring that boots it all.
//!
//! # Modules
//!
//! - [`system`] – [`VigilSystem`][system::VigilSystem] and
//!   [`SystemConfig`][system::SystemConfig]: boots the board and exposes its
//!   status.
//! - [`timer`] – [`TimerService`][timer::TimerService]: the single timer
//!   execution context with a zero-wait command queue.
//! - [`tasks`] – [`TaskRegistry`][tasks::TaskRegistry]: task creation and
//!   priority bookkeeping.
//! - [`self_test`] – the nine self-test workers and their loop counters.
//! - [`network`] – the IP task that runs the link gate for each link event.
//! - [`net_tasks`] – the UDP command interpreter and echo client bodies.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: initialises
//!   the global `tracing` subscriber with an optional OTLP span exporter.

pub mod net_tasks;
pub mod network;
pub mod system;
pub mod tasks;
pub mod telemetry;
pub mod timer;

pub use network::{LinkEventSender, LinkStatus};
pub use system::{Panel, SupervisorStatus, SystemConfig, VigilSystem};
pub use tasks::TaskRegistry;
pub use telemetry::{TracerProviderGuard, init_tracing};
pub use timer::{TimerHandle, TimerService, TimerServiceHandle, timer_service};

//! `vigil-middleware` – Telemetry Bus
//!
//! Carries what the supervision core observes (health reports, period
//! changes, link transitions, task creation) to whoever wants to watch,
//! without the core knowing who is listening.
//!
//! # Modules
//!
//! - [`bus`] – Headless, typed, topic-based publish/subscribe event bus built
//!   on Tokio broadcast channels.

pub mod bus;

pub use bus::{EventBus, Topic, TopicReceiver};

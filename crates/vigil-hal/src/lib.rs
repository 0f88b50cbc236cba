//! `vigil-hal` – Output Surfaces
//!
//! The board-facing layer.  The rest of Vigil only ever talks to the traits
//! defined here, so a real LED/LCD driver and the simulated panel are
//! interchangeable.
//!
//! # Modules
//!
//! - [`indicator`] – [`Indicator`] (a single on/off status output) and
//!   [`StatusSink`] ("toggle indicator N").
//! - [`display`] – [`TextDisplay`]: draws strings at fixed coordinates.
//! - [`registry`] – [`PanelRegistry`]: numbered indicator slots; implements
//!   [`StatusSink`].  [`SharedPanel`] lets several owners drive one panel.
//! - [`sim`] – recording drivers and probes for headless runs and tests.

pub mod display;
pub mod indicator;
pub mod registry;
pub mod sim;

pub use display::TextDisplay;
pub use indicator::{Indicator, StatusSink};
pub use registry::{PanelRegistry, SharedPanel};

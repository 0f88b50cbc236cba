//! In-process simulated panel for CI/CD testing without a board.
//!
//! [`SimIndicator`] and [`SimDisplay`] record every command they receive and
//! hand out cloneable probes ([`IndicatorProbe`], [`DisplayProbe`]) so tests
//! can observe the outputs after the driver itself has been moved into the
//! component that owns it.
//!
//! # Example
//!
//! ```rust
//! use vigil_hal::sim::SimPanel;
//! use vigil_hal::StatusSink;
//!
//! let (mut panel, probes) = SimPanel::new().with_leds(3).build();
//! panel.toggle_indicator(2).expect("sim toggle must succeed");
//! assert_eq!(probes[2].toggles(), 1);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use vigil_types::VigilError;

use crate::display::TextDisplay;
use crate::indicator::Indicator;
use crate::registry::PanelRegistry;

// ────────────────────────────────────────────────────────────────────────────
// Simulated indicator
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct IndicatorLog {
    lit: AtomicBool,
    toggles: AtomicUsize,
}

/// Read-only view of a [`SimIndicator`].
#[derive(Clone, Default)]
pub struct IndicatorProbe(Arc<IndicatorLog>);

impl IndicatorProbe {
    /// Number of times the indicator has been toggled.
    pub fn toggles(&self) -> usize {
        self.0.toggles.load(Ordering::SeqCst)
    }

    pub fn is_lit(&self) -> bool {
        self.0.lit.load(Ordering::SeqCst)
    }
}

/// A simulated LED that records its state and toggle count.  Always succeeds.
pub struct SimIndicator {
    id: String,
    log: Arc<IndicatorLog>,
}

impl SimIndicator {
    /// Create a simulated indicator and the probe that observes it.
    pub fn new(id: impl Into<String>) -> (Box<Self>, IndicatorProbe) {
        let log = Arc::new(IndicatorLog::default());
        let probe = IndicatorProbe(Arc::clone(&log));
        (Box::new(Self { id: id.into(), log }), probe)
    }
}

impl Indicator for SimIndicator {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_state(&mut self, lit: bool) -> Result<(), VigilError> {
        self.log.lit.store(lit, Ordering::SeqCst);
        Ok(())
    }

    fn state(&self) -> bool {
        self.log.lit.load(Ordering::SeqCst)
    }

    fn toggle(&mut self) -> Result<bool, VigilError> {
        let next = !self.log.lit.fetch_xor(true, Ordering::SeqCst);
        self.log.toggles.fetch_add(1, Ordering::SeqCst);
        Ok(next)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated display
// ────────────────────────────────────────────────────────────────────────────

/// One recorded `draw_string` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawCall {
    pub x: u32,
    pub y: u32,
    pub text: String,
}

#[derive(Default)]
struct DisplayLog {
    draws: Vec<DrawCall>,
    cells: HashMap<(u32, u32), String>,
}

/// Read-only view of a [`SimDisplay`].
#[derive(Clone, Default)]
pub struct DisplayProbe(Arc<Mutex<DisplayLog>>);

impl DisplayProbe {
    /// The most recent text drawn at exactly (`x`, `y`).
    pub fn text_at(&self, x: u32, y: u32) -> Option<String> {
        self.lock().cells.get(&(x, y)).cloned()
    }

    /// Every draw call in the order it was issued.
    pub fn draws(&self) -> Vec<DrawCall> {
        self.lock().draws.clone()
    }

    pub fn draw_count(&self) -> usize {
        self.lock().draws.len()
    }

    fn lock(&self) -> MutexGuard<'_, DisplayLog> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A simulated text display that remembers what was drawn where.  Always
/// succeeds.
pub struct SimDisplay {
    id: String,
    log: DisplayProbe,
}

impl SimDisplay {
    /// Create a simulated display and the probe that observes it.
    pub fn new(id: impl Into<String>) -> (Box<Self>, DisplayProbe) {
        let probe = DisplayProbe::default();
        (
            Box::new(Self {
                id: id.into(),
                log: probe.clone(),
            }),
            probe,
        )
    }
}

impl TextDisplay for SimDisplay {
    fn id(&self) -> &str {
        &self.id
    }

    fn draw_string(&mut self, x: u32, y: u32, text: &str) -> Result<(), VigilError> {
        let mut log = self.log.lock();
        log.draws.push(DrawCall {
            x,
            y,
            text: text.to_string(),
        });
        log.cells.insert((x, y), text.to_string());
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimPanel builder
// ────────────────────────────────────────────────────────────────────────────

/// Builder that constructs a [`PanelRegistry`] pre-populated with simulated
/// indicators for headless runs.
#[derive(Default)]
pub struct SimPanel {
    ids: Vec<String>,
}

impl SimPanel {
    /// Create an empty [`SimPanel`] builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `count` LEDs named `led0`, `led1`, … in consecutive slots.
    pub fn with_leds(mut self, count: usize) -> Self {
        let start = self.ids.len();
        self.ids
            .extend((start..start + count).map(|i| format!("led{i}")));
        self
    }

    /// Add one named LED in the next free slot.
    pub fn with_led(mut self, id: impl Into<String>) -> Self {
        self.ids.push(id.into());
        self
    }

    /// Consume the builder and return the registry plus one probe per slot,
    /// indexed by slot number.
    pub fn build(self) -> (PanelRegistry, Vec<IndicatorProbe>) {
        let mut registry = PanelRegistry::new();
        let mut probes = Vec::with_capacity(self.ids.len());
        for (index, id) in self.ids.into_iter().enumerate() {
            let (led, probe) = SimIndicator::new(id);
            registry.register_indicator(index, led);
            probes.push(probe);
        }
        (registry, probes)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::StatusSink;

    #[test]
    fn sim_indicator_counts_toggles() {
        let (mut led, probe) = SimIndicator::new("led");
        assert!(!probe.is_lit());
        assert!(led.toggle().unwrap());
        assert!(probe.is_lit());
        assert!(!led.toggle().unwrap());
        assert_eq!(probe.toggles(), 2);
    }

    #[test]
    fn sim_indicator_set_state_does_not_count_as_toggle() {
        let (mut led, probe) = SimIndicator::new("led");
        led.set_state(true).unwrap();
        assert!(probe.is_lit());
        assert_eq!(probe.toggles(), 0);
    }

    #[test]
    fn sim_display_records_draws_and_overwrites() {
        let (mut lcd, probe) = SimDisplay::new("lcd");
        lcd.draw_string(3, 3, "IP: ").unwrap();
        lcd.draw_string(48, 3, "10.0.0.1").unwrap();
        lcd.draw_string(48, 3, "10.0.0.2").unwrap();

        assert_eq!(probe.text_at(3, 3).as_deref(), Some("IP: "));
        assert_eq!(probe.text_at(48, 3).as_deref(), Some("10.0.0.2"));
        assert_eq!(probe.draw_count(), 3);
        assert_eq!(
            probe.draws()[1],
            DrawCall {
                x: 48,
                y: 3,
                text: "10.0.0.1".to_string()
            }
        );
    }

    #[test]
    fn sim_panel_builds_consecutive_slots() {
        let (mut panel, probes) = SimPanel::new().with_leds(2).with_led("check").build();
        assert_eq!(panel.len(), 3);
        assert_eq!(probes.len(), 3);

        panel.toggle_indicator(2).unwrap();
        assert_eq!(probes[2].toggles(), 1);
        assert_eq!(probes[0].toggles(), 0);
    }
}

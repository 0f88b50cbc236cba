//! [`PanelRegistry`] – numbered status-output slots.
//!
//! The board exposes its LEDs by index ("toggle LED 2").  The registry maps
//! each slot to a registered [`Indicator`] driver and implements
//! [`StatusSink`] so the health supervisor can address a slot without
//! knowing which driver backs it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;
use vigil_types::VigilError;

use crate::indicator::{Indicator, StatusSink};

/// Numbered indicator slots.
///
/// Construct with [`PanelRegistry::new`], register drivers, then hand the
/// registry to whoever owns the status outputs.
#[derive(Default)]
pub struct PanelRegistry {
    indicators: BTreeMap<usize, Box<dyn Indicator>>,
}

impl PanelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an indicator at slot `index`.  Any previously registered
    /// driver in the same slot is replaced.
    pub fn register_indicator(&mut self, index: usize, indicator: Box<dyn Indicator>) {
        self.indicators.insert(index, indicator);
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.indicators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indicators.is_empty()
    }

    /// Current state of slot `index`, or `None` if it is empty.
    pub fn state(&self, index: usize) -> Option<bool> {
        self.indicators.get(&index).map(|i| i.state())
    }

    /// Drive slot `index` to `lit`.
    ///
    /// # Errors
    ///
    /// Returns [`VigilError::HardwareFault`] when the slot is empty or the
    /// driver call fails.
    pub fn set(&mut self, index: usize, lit: bool) -> Result<(), VigilError> {
        self.slot(index)?.set_state(lit)
    }

    /// Turn every registered indicator off.
    pub fn all_off(&mut self) -> Result<(), VigilError> {
        for indicator in self.indicators.values_mut() {
            indicator.set_state(false)?;
        }
        Ok(())
    }

    fn slot(&mut self, index: usize) -> Result<&mut Box<dyn Indicator>, VigilError> {
        self.indicators
            .get_mut(&index)
            .ok_or_else(|| VigilError::HardwareFault {
                component: format!("indicator[{index}]"),
                details: format!("no indicator registered at slot {index}"),
            })
    }
}

impl StatusSink for PanelRegistry {
    fn toggle_indicator(&mut self, index: usize) -> Result<bool, VigilError> {
        let indicator = self.slot(index)?;
        let lit = indicator.toggle()?;
        debug!(index, id = indicator.id(), lit, "indicator toggled");
        Ok(lit)
    }
}

/// Cloneable handle to one [`PanelRegistry`] shared by several owners (the
/// health supervisor and the LED flash timers drive different slots of the
/// same panel).
#[derive(Clone, Default)]
pub struct SharedPanel(Arc<Mutex<PanelRegistry>>);

impl SharedPanel {
    pub fn new(panel: PanelRegistry) -> Self {
        Self(Arc::new(Mutex::new(panel)))
    }

    /// Lock the panel.  A poisoned lock is recovered; indicator state is
    /// always valid on its own.
    pub fn lock(&self) -> MutexGuard<'_, PanelRegistry> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self, index: usize) -> Option<bool> {
        self.lock().state(index)
    }
}

impl StatusSink for SharedPanel {
    fn toggle_indicator(&mut self, index: usize) -> Result<bool, VigilError> {
        self.lock().toggle_indicator(index)
    }
}

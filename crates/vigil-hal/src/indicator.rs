//! Generic `Indicator` trait for discrete status outputs (LEDs, lamps,
//! buzzers, …) and the [`StatusSink`] they are addressed through.

use vigil_types::VigilError;

/// A discrete on/off status output.
///
/// Drivers implement this trait and register themselves with a
/// [`PanelRegistry`][crate::registry::PanelRegistry] under a numeric slot.
pub trait Indicator: Send {
    /// Stable identifier for this indicator, e.g. `"led_d4"`.
    fn id(&self) -> &str;

    /// Drive the indicator to `lit` (`true` = on).
    ///
    /// # Errors
    ///
    /// Returns [`VigilError::HardwareFault`] if the output cannot be driven.
    fn set_state(&mut self, lit: bool) -> Result<(), VigilError>;

    /// Return the indicator's current state (`true` = on).
    fn state(&self) -> bool;

    /// Invert the current state and return the new one.
    fn toggle(&mut self) -> Result<bool, VigilError> {
        let next = !self.state();
        self.set_state(next)?;
        Ok(next)
    }
}

/// A sink that can toggle status output `N`.
///
/// This is the only surface the health supervisor needs from the panel.
pub trait StatusSink: Send {
    /// Toggle the indicator registered at `index` and return its new state.
    ///
    /// # Errors
    ///
    /// Returns [`VigilError::HardwareFault`] if nothing is registered at
    /// `index` or the driver rejects the command.
    fn toggle_indicator(&mut self, index: usize) -> Result<bool, VigilError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockLed {
        id: String,
        lit: bool,
    }

    impl MockLed {
        fn new(id: &str) -> Self {
            Self {
                id: id.to_string(),
                lit: false,
            }
        }
    }

    impl Indicator for MockLed {
        fn id(&self) -> &str {
            &self.id
        }

        fn set_state(&mut self, lit: bool) -> Result<(), VigilError> {
            self.lit = lit;
            Ok(())
        }

        fn state(&self) -> bool {
            self.lit
        }
    }

    struct BrokenLed;

    impl Indicator for BrokenLed {
        fn id(&self) -> &str {
            "broken"
        }

        fn set_state(&mut self, _lit: bool) -> Result<(), VigilError> {
            Err(VigilError::HardwareFault {
                component: "broken".to_string(),
                details: "open circuit".to_string(),
            })
        }

        fn state(&self) -> bool {
            false
        }
    }

    #[test]
    fn toggle_alternates_state() {
        let mut led = MockLed::new("led_d4");
        assert_eq!(led.id(), "led_d4");
        assert!(!led.state());

        assert!(led.toggle().unwrap());
        assert!(led.state());

        assert!(!led.toggle().unwrap());
        assert!(!led.state());
    }

    #[test]
    fn toggle_propagates_driver_fault() {
        let mut led = BrokenLed;
        assert!(matches!(
            led.toggle(),
            Err(VigilError::HardwareFault { .. })
        ));
    }
}

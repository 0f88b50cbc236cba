//! Terminal stand-ins for the board's LEDs and LCD.

use colored::Colorize;
use tracing::debug;
use vigil_hal::{Indicator, PanelRegistry, TextDisplay};
use vigil_runtime::Panel;
use vigil_types::VigilError;

/// An LED whose changes are logged at `debug`.  Flash LEDs toggle several
/// times a second, so they are kept off stdout.
pub struct ConsoleIndicator {
    id: String,
    lit: bool,
}

impl ConsoleIndicator {
    pub fn new(id: impl Into<String>) -> Box<Self> {
        Box::new(Self {
            id: id.into(),
            lit: false,
        })
    }
}

impl Indicator for ConsoleIndicator {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_state(&mut self, lit: bool) -> Result<(), VigilError> {
        self.lit = lit;
        debug!(led = %self.id, lit, "led");
        Ok(())
    }

    fn state(&self) -> bool {
        self.lit
    }
}

/// An LCD that prints every draw call.
pub struct ConsoleDisplay;

impl TextDisplay for ConsoleDisplay {
    fn id(&self) -> &str {
        "console_lcd"
    }

    fn draw_string(&mut self, x: u32, y: u32, text: &str) -> Result<(), VigilError> {
        println!(
            "  {} ({x:>3},{y:>3}) {}",
            "lcd".bold().blue(),
            format!("[{text}]").bold()
        );
        Ok(())
    }
}

/// A panel with `leds` console LEDs and the console LCD.
pub fn console_panel(leds: usize) -> Panel {
    let mut registry = PanelRegistry::new();
    for index in 0..leds {
        registry.register_indicator(index, ConsoleIndicator::new(format!("led{index}")));
    }
    Panel {
        leds: registry,
        display: Box::new(ConsoleDisplay),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_hal::StatusSink;

    #[test]
    fn console_panel_toggles_every_slot() {
        let mut panel = console_panel(3);
        for index in 0..3 {
            assert!(panel.leds.toggle_indicator(index).unwrap());
        }
        assert!(panel.leds.toggle_indicator(3).is_err());
        assert!(panel.display.draw_string(3, 3, "IP: ").is_ok());
    }
}

//! Generic `TextDisplay` trait for character output surfaces (LCD panels,
//! serial consoles).

use vigil_types::VigilError;

/// A surface that renders strings at fixed coordinates.
///
/// Later draws at the same coordinates overwrite earlier ones; callers that
/// need to erase text draw blanks over it.
pub trait TextDisplay: Send {
    /// Stable identifier for this display, e.g. `"lcd"`.
    fn id(&self) -> &str;

    /// Draw `text` with its top-left corner at (`x`, `y`).
    ///
    /// # Errors
    ///
    /// Returns [`VigilError::HardwareFault`] if the display cannot be written
    /// (e.g. the bus to the panel controller is down).
    fn draw_string(&mut self, x: u32, y: u32, text: &str) -> Result<(), VigilError>;
}

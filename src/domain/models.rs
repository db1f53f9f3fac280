use serde::{Deserialize, Serialize};

/// An RGB triple, one byte per channel.
pub type Rgb = (u8, u8, u8);

/// Brightness assumed before anything else has been set.
pub const DEFAULT_BRIGHTNESS: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColorMode {
    #[default]
    Rgb,
    /// Declared by the device family but never reachable on this model.
    ColorTemp,
}

/// Last known (or last requested) lighting state of a device.
///
/// Nothing here is confirmed by the device: the protocol has no read-back,
/// so every field is whatever the session last sent or tried to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightState {
    // None until the first successful power command
    pub is_on: Option<bool>,
    pub rgb_color: Option<Rgb>,
    pub brightness: u8,
    pub effect: Option<crate::domain::effects::Effect>,
    pub color_mode: ColorMode,
}

impl Default for LightState {
    fn default() -> Self {
        Self {
            is_on: None,
            rgb_color: None,
            brightness: DEFAULT_BRIGHTNESS,
            effect: None,
            color_mode: ColorMode::Rgb,
        }
    }
}

//! BJ_LED Protocol
//!
//! Packet layouts and device model definitions for the BJ_LED family of
//! BLE light controllers.
//!
//! # Packet Structure
//!
//! ```text
//! [0-1] : Vendor prefix 0x69 0x96
//! [2]   : Length / command type
//! [3]   : Sub-command
//! [4..] : Payload
//!
//! Power  : 69 96 02 01 <01 on | 00 off>
//! RGB    : 69 96 05 02 <R> <G> <B>
//! Effect : 69 96 03 03 <code> 01
//! ```
//!
//! Nothing is ever read back from the device.

use crate::domain::effects::Effect;
use crate::domain::models::Rgb;
use uuid::Uuid;

/// Write characteristic that accepts every command packet
pub const WRITE_CHAR_UUID: Uuid = Uuid::from_u128(0x0000ee01_0000_1000_8000_00805f9b34fb);

pub const PACKET_PREFIX: [u8; 2] = [0x69, 0x96];

const RGB_HEADER: [u8; 2] = [0x05, 0x02];
const EFFECT_HEADER: [u8; 2] = [0x03, 0x03];

/// Trailing byte of the effect packet. The firmware reads it as a speed, but
/// there is no way to choose one so it stays fixed.
pub const EFFECT_TRAILER: u8 = 0x01;

/// Lowest brightness the controller still renders as "on"
pub const MIN_BRIGHTNESS: u8 = 2;
pub const MAX_BRIGHTNESS: u8 = 255;

/// Static description of a supported controller model
#[derive(Debug, PartialEq, Eq)]
pub struct ModelDescriptor {
    /// Matched case-insensitively against the start of the advertised name
    pub name_prefix: &'static str,
    pub turn_on: [u8; 5],
    pub turn_off: [u8; 5],
    /// (min, max) in Kelvin, when the model has a white channel
    pub color_temp_kelvin: Option<(u32, u32)>,
}

pub const MODELS: &[ModelDescriptor] = &[ModelDescriptor {
    name_prefix: "BJ_LED",
    turn_on: [0x69, 0x96, 0x02, 0x01, 0x01],
    turn_off: [0x69, 0x96, 0x02, 0x01, 0x00],
    color_temp_kelvin: None,
}];

/// Find the model whose name prefix matches the advertised device name
pub fn detect_model(device_name: &str) -> Option<&'static ModelDescriptor> {
    let name = device_name.to_lowercase();
    MODELS
        .iter()
        .find(|model| name.starts_with(&model.name_prefix.to_lowercase()))
}

/// Brightness as a whole percentage, rounded down
pub fn brightness_percent(brightness: u8) -> u8 {
    (brightness as u32 * 100 / 255) as u8
}

/// Dim a single channel to the given brightness
pub fn scale_channel(channel: u8, brightness: u8) -> u8 {
    let percent = brightness_percent(brightness) as u32;
    (channel as u32 * percent / 100) as u8
}

pub fn scale_rgb(rgb: Rgb, brightness: u8) -> Rgb {
    (
        scale_channel(rgb.0, brightness),
        scale_channel(rgb.1, brightness),
        scale_channel(rgb.2, brightness),
    )
}

/// Resolve a requested brightness against the current one and clamp it to
/// what the controller accepts.
pub fn normalize_brightness(requested: Option<i32>, current: Option<u8>) -> u8 {
    let value = requested.unwrap_or_else(|| current.map_or(MAX_BRIGHTNESS as i32, i32::from));
    value.clamp(MIN_BRIGHTNESS as i32, MAX_BRIGHTNESS as i32) as u8
}

pub fn power_packet(model: &ModelDescriptor, on: bool) -> Vec<u8> {
    if on {
        model.turn_on.to_vec()
    } else {
        model.turn_off.to_vec()
    }
}

/// RGB packet with each channel already scaled by `brightness`
pub fn rgb_packet(rgb: Rgb, brightness: u8) -> Vec<u8> {
    let (red, green, blue) = scale_rgb(rgb, brightness);
    let mut packet = Vec::with_capacity(7);
    packet.extend_from_slice(&PACKET_PREFIX);
    packet.extend_from_slice(&RGB_HEADER);
    packet.extend_from_slice(&[red, green, blue]);
    packet
}

pub fn effect_packet(effect: Effect) -> Vec<u8> {
    let mut packet = Vec::with_capacity(6);
    packet.extend_from_slice(&PACKET_PREFIX);
    packet.extend_from_slice(&EFFECT_HEADER);
    packet.push(effect.code());
    packet.push(EFFECT_TRAILER);
    packet
}

//! Light Service Module
//!
//! [`LedDevice`] is the public face of one BJ_LED controller. It keeps the
//! last known lighting state, encodes commands into packets and pushes them
//! through the [`ConnectionManager`], retrying transient BLE failures.
//!
//! State is updated optimistically: color, brightness and effect are stored
//! before the packet is written, so a failed write still leaves the new
//! value cached. The power flag is the exception and only changes once the
//! write has gone through.

use crate::domain::effects::{self, Effect};
use crate::domain::models::{ColorMode, LightState, Rgb};
use crate::infrastructure::bluetooth::connection::ConnectionManager;
use crate::infrastructure::bluetooth::error::DeviceError;
use crate::infrastructure::bluetooth::protocol::{self, ModelDescriptor};
use crate::infrastructure::bluetooth::retry::RetryPolicy;
use crate::infrastructure::bluetooth::transport::{DeviceDirectory, Transport};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error};

/// Session options that don't come from the device itself
#[derive(Debug, Clone, Default)]
pub struct DeviceOptions {
    /// Drop the link after this much inactivity; `None` keeps it open
    pub disconnect_delay: Option<Duration>,
    pub reset: bool,
    pub retry: RetryPolicy,
}

/// Session for a single BJ_LED light controller
pub struct LedDevice<T: Transport> {
    device: T::Device,
    directory: Arc<dyn DeviceDirectory<T::Device>>,
    model: &'static ModelDescriptor,
    reset: bool,
    retry: RetryPolicy,
    connection: Arc<ConnectionManager<T>>,
    state: Mutex<LightState>,
}

impl<T: Transport> LedDevice<T> {
    /// Build a session for a device the directory already knows about.
    pub fn new(
        address: &str,
        directory: Arc<dyn DeviceDirectory<T::Device>>,
        transport: Arc<T>,
        options: DeviceOptions,
    ) -> Result<Self, DeviceError> {
        let device = directory
            .resolve(address)
            .ok_or_else(|| DeviceError::UnknownAddress(address.to_string()))?;
        let name = directory
            .name(&device)
            .unwrap_or_else(|| address.to_string());
        let model = protocol::detect_model(&name)
            .ok_or_else(|| DeviceError::UnsupportedModel(name.clone()))?;

        debug!(
            "Model information for device {} : Model {}. MAC: {}",
            name, model.name_prefix, address
        );

        let connection = ConnectionManager::new(
            name,
            address.to_string(),
            device.clone(),
            Arc::clone(&directory),
            transport,
            options.disconnect_delay,
        );

        Ok(Self {
            device,
            directory,
            model,
            reset: options.reset,
            retry: options.retry,
            connection,
            state: Mutex::new(LightState::default()),
        })
    }

    fn state(&self) -> MutexGuard<'_, LightState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn write(&self, packet: &[u8]) -> Result<(), DeviceError> {
        self.connection.ensure_connected().await?;
        self.connection.write(packet).await
    }

    pub fn name(&self) -> &str {
        self.connection.name()
    }

    pub fn address(&self) -> String {
        self.directory.address(&self.device)
    }

    pub fn rssi(&self) -> Option<i16> {
        self.directory.rssi(&self.device)
    }

    pub fn reset(&self) -> bool {
        self.reset
    }

    pub fn model(&self) -> &'static ModelDescriptor {
        self.model
    }

    pub fn is_on(&self) -> Option<bool> {
        self.state().is_on
    }

    pub fn rgb_color(&self) -> Option<Rgb> {
        self.state().rgb_color
    }

    pub fn brightness(&self) -> u8 {
        self.state().brightness
    }

    pub fn effect(&self) -> Option<Effect> {
        self.state().effect
    }

    pub fn effect_list(&self) -> Vec<&'static str> {
        effects::effect_list()
    }

    pub fn color_mode(&self) -> ColorMode {
        self.state().color_mode
    }

    pub fn min_color_temp_kelvin(&self) -> Option<u32> {
        self.model.color_temp_kelvin.map(|(min, _)| min)
    }

    pub fn max_color_temp_kelvin(&self) -> Option<u32> {
        self.model.color_temp_kelvin.map(|(_, max)| max)
    }

    /// Color temperature control is not available on this family
    pub fn color_temp_kelvin(&self) -> Option<u32> {
        None
    }

    /// Snapshot of the cached lighting state
    pub fn light_state(&self) -> LightState {
        self.state().clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.is_connected().await
    }

    pub async fn turn_on(&self) -> Result<(), DeviceError> {
        self.set_power(true).await
    }

    pub async fn turn_off(&self) -> Result<(), DeviceError> {
        self.set_power(false).await
    }

    async fn set_power(&self, on: bool) -> Result<(), DeviceError> {
        let operation = if on { "turn_on" } else { "turn_off" };
        let packet = protocol::power_packet(self.model, on);
        let packet = &packet;
        self.retry
            .run(self.name(), operation, move || async move {
                self.write(packet).await?;
                self.state().is_on = Some(on);
                Ok(())
            })
            .await
    }

    /// Send a color, dimmed to `brightness` (or the current brightness).
    ///
    /// A supplied `brightness` also replaces the stored brightness, so later
    /// color changes without one keep that level. Hosts that expect the
    /// stored value to move only through [`set_brightness`](Self::set_brightness)
    /// or [`normalize_brightness`](Self::normalize_brightness) should pass `None`.
    pub async fn set_rgb_color(&self, rgb: Rgb, brightness: Option<u8>) -> Result<(), DeviceError> {
        self.retry
            .run(self.name(), "set_rgb_color", move || async move {
                let scaled_to = {
                    let mut state = self.state();
                    state.rgb_color = Some(rgb);
                    if let Some(requested) = brightness {
                        state.brightness = requested;
                    }
                    state.brightness
                };
                self.write(&protocol::rgb_packet(rgb, scaled_to)).await
            })
            .await
    }

    /// Re-send the last color at a new brightness.
    pub async fn set_brightness(&self, brightness: u8) -> Result<(), DeviceError> {
        let Some(rgb) = self.rgb_color() else {
            return Err(DeviceError::ColorUnknown(self.name().to_string()));
        };
        self.state().brightness = brightness;
        self.set_rgb_color(rgb, Some(brightness)).await
    }

    /// Clamp a requested brightness into the range the controller renders,
    /// falling back to the current brightness, and store the result.
    ///
    /// Returns the stored 2..=255 value, not a percentage; use
    /// [`protocol::brightness_percent`] for that.
    pub fn normalize_brightness(&self, requested: Option<i32>) -> u8 {
        let mut state = self.state();
        let brightness = protocol::normalize_brightness(requested, Some(state.brightness));
        debug!(
            "{}: Normalized brightness {:?} -> {} ({}%)",
            self.name(),
            requested,
            brightness,
            protocol::brightness_percent(brightness)
        );
        state.brightness = brightness;
        brightness
    }

    /// Start an effect by name. Unknown names are logged and ignored.
    pub async fn set_effect(&self, name: &str) -> Result<(), DeviceError> {
        let effect = match name.parse::<Effect>() {
            Ok(effect) => effect,
            Err(err) => {
                error!("{}", err);
                return Ok(());
            }
        };
        debug!("Effect ID: {:#04x}", effect.code());
        debug!("Effect name: {}", effect);

        let packet = protocol::effect_packet(effect);
        let packet = &packet;
        self.retry
            .run(self.name(), "set_effect", move || async move {
                self.state().effect = Some(effect);
                self.write(packet).await
            })
            .await
    }

    /// Nothing to poll: the controller has no read-back channel.
    pub async fn update(&self) -> Result<(), DeviceError> {
        debug!("{}: Update called", self.name());
        Ok(())
    }

    /// Disconnect for shutdown. Never fails.
    pub async fn stop(&self) {
        self.connection.stop().await;
    }
}

//! In-memory transport and directory for tests
//!
//! Records every connect, write and disconnect, and lets a test script
//! failures, slow connects and link loss.

use crate::infrastructure::bluetooth::protocol::WRITE_CHAR_UUID;
use crate::infrastructure::bluetooth::transport::{
    DeviceDirectory, DeviceResolver, DisconnectCallback, Transport, TransportError,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeDevice {
    pub address: String,
    pub name: String,
    pub rssi: Option<i16>,
}

#[derive(Default)]
pub struct FakeDirectory {
    devices: Mutex<HashMap<String, FakeDevice>>,
}

impl FakeDirectory {
    pub fn with_device(address: &str, name: &str) -> Arc<Self> {
        let directory = Self::default();
        directory.insert(address, name, Some(-60));
        Arc::new(directory)
    }

    pub fn insert(&self, address: &str, name: &str, rssi: Option<i16>) {
        self.devices.lock().unwrap().insert(
            address.to_string(),
            FakeDevice {
                address: address.to_string(),
                name: name.to_string(),
                rssi,
            },
        );
    }
}

impl DeviceDirectory<FakeDevice> for FakeDirectory {
    fn resolve(&self, address: &str) -> Option<FakeDevice> {
        self.devices.lock().unwrap().get(address).cloned()
    }

    fn name(&self, device: &FakeDevice) -> Option<String> {
        Some(device.name.clone())
    }

    fn rssi(&self, device: &FakeDevice) -> Option<i16> {
        self.resolve(&device.address).and_then(|latest| latest.rssi)
    }

    fn address(&self, device: &FakeDevice) -> String {
        device.address.clone()
    }
}

pub struct FakeClient {
    connected: AtomicBool,
    on_disconnect: DisconnectCallback,
    services: Vec<Uuid>,
}

#[derive(Default)]
struct FakeState {
    connect_calls: u32,
    disconnect_calls: u32,
    resolve_calls: u32,
    writes: Vec<Vec<u8>>,
    connect_errors: VecDeque<TransportError>,
    write_errors: VecDeque<TransportError>,
    disconnect_errors: VecDeque<TransportError>,
    connect_delay: Duration,
    characteristics: Option<Vec<Uuid>>,
    failing_resolutions: u32,
    cached_services_seen: Vec<bool>,
    last_client: Option<Arc<FakeClient>>,
}

#[derive(Default)]
pub struct FakeTransport {
    state: Mutex<FakeState>,
}

impl FakeTransport {
    pub fn connect_calls(&self) -> u32 {
        self.state.lock().unwrap().connect_calls
    }

    pub fn disconnect_calls(&self) -> u32 {
        self.state.lock().unwrap().disconnect_calls
    }

    pub fn resolve_calls(&self) -> u32 {
        self.state.lock().unwrap().resolve_calls
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().writes.clone()
    }

    /// Whether each connect so far was handed a service cache
    pub fn cached_services_seen(&self) -> Vec<bool> {
        self.state.lock().unwrap().cached_services_seen.clone()
    }

    pub fn fail_next_connect(&self, err: TransportError) {
        self.state.lock().unwrap().connect_errors.push_back(err);
    }

    pub fn fail_next_write(&self, err: TransportError) {
        self.state.lock().unwrap().write_errors.push_back(err);
    }

    /// Fail the next transport-level disconnect, leaving the link up
    pub fn fail_next_disconnect(&self, err: TransportError) {
        self.state.lock().unwrap().disconnect_errors.push_back(err);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().unwrap().connect_delay = delay;
    }

    /// Characteristics exposed by connections made from now on
    pub fn set_characteristics(&self, characteristics: Vec<Uuid>) {
        self.state.lock().unwrap().characteristics = Some(characteristics);
    }

    /// Make the next `count` characteristic lookups miss
    pub fn fail_resolutions(&self, count: u32) {
        self.state.lock().unwrap().failing_resolutions = count;
    }

    /// Simulate the peripheral going away on its own
    pub fn drop_link(&self) {
        let client = self.state.lock().unwrap().last_client.clone();
        if let Some(client) = client {
            client.connected.store(false, Ordering::SeqCst);
            (client.on_disconnect)();
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    type Device = FakeDevice;
    type Client = FakeClient;
    type Services = Vec<Uuid>;
    type Characteristic = Uuid;

    async fn connect_with_retry(
        &self,
        device: FakeDevice,
        _name: &str,
        on_disconnect: DisconnectCallback,
        cached_services: Option<Vec<Uuid>>,
        resolver: DeviceResolver<FakeDevice>,
    ) -> Result<Arc<FakeClient>, TransportError> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.connect_calls += 1;
            state.cached_services_seen.push(cached_services.is_some());
            state.connect_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.connect_errors.pop_front() {
            return Err(err);
        }
        if resolver().unwrap_or(device).address.is_empty() {
            return Err(TransportError::NotFound(String::new()));
        }

        let services = match cached_services {
            Some(services) => services,
            None => state
                .characteristics
                .clone()
                .unwrap_or_else(|| vec![WRITE_CHAR_UUID]),
        };
        let client = Arc::new(FakeClient {
            connected: AtomicBool::new(true),
            on_disconnect,
            services,
        });
        state.last_client = Some(Arc::clone(&client));
        Ok(client)
    }

    async fn write_characteristic(
        &self,
        client: &FakeClient,
        _characteristic: &Uuid,
        data: &[u8],
    ) -> Result<(), TransportError> {
        if !client.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.write_errors.pop_front() {
            return Err(err);
        }
        state.writes.push(data.to_vec());
        Ok(())
    }

    async fn disconnect(&self, client: &FakeClient) -> Result<(), TransportError> {
        {
            let mut state = self.state.lock().unwrap();
            state.disconnect_calls += 1;
            if let Some(err) = state.disconnect_errors.pop_front() {
                return Err(err);
            }
        }
        client.connected.store(false, Ordering::SeqCst);
        (client.on_disconnect)();
        Ok(())
    }

    fn is_connected(&self, client: &FakeClient) -> bool {
        client.connected.load(Ordering::SeqCst)
    }

    fn services(&self, client: &FakeClient) -> Vec<Uuid> {
        client.services.clone()
    }

    fn resolve_characteristic(&self, services: &Vec<Uuid>, uuid: Uuid) -> Option<Uuid> {
        let mut state = self.state.lock().unwrap();
        state.resolve_calls += 1;
        if state.failing_resolutions > 0 {
            state.failing_resolutions -= 1;
            return None;
        }
        services.iter().copied().find(|candidate| *candidate == uuid)
    }
}

/// Captures tracing events so tests can assert on log levels
#[derive(Clone, Default)]
pub struct LogRecorder {
    events: Arc<Mutex<Vec<(Level, String)>>>,
}

impl LogRecorder {
    /// Route this thread's events into the recorder until the guard drops
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::registry().with(self.clone());
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.events
            .lock()
            .unwrap()
            .iter()
            .any(|(event_level, message)| *event_level == level && message.contains(needle))
    }

    pub fn has_level(&self, level: Level) -> bool {
        self.events
            .lock()
            .unwrap()
            .iter()
            .any(|(event_level, _)| *event_level == level)
    }
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{:?}", value);
        }
    }
}

impl<S: Subscriber> Layer<S> for LogRecorder {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        self.events
            .lock()
            .unwrap()
            .push((*event.metadata().level(), visitor.0));
    }
}

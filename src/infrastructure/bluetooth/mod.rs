//! Bluetooth Module
//!
//! Drives a BJ_LED strip over BLE.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                       LedDevice                          │
//! │   (Public session - lighting state and commands)         │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼──────────────┐
//!         │             │              │
//!         ▼             ▼              ▼
//! ┌─────────────┐ ┌────────────┐ ┌──────────┐
//! │ RetryPolicy │ │ Connection │ │ Protocol │
//! │             │ │  Manager   │ │          │
//! │ - attempts  │ │ - connect  │ │ - models │
//! │ - backoff   │ │ - idle     │ │ - packets│
//! │             │ │   timer    │ │          │
//! └─────────────┘ └─────┬──────┘ └──────────┘
//!                       │
//!                       ▼
//!               ┌───────────────┐
//!               │   Transport   │
//!               │ (btleplug or  │
//!               │   test fake)  │
//!               └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Model table and command packet encoding
//! - [`transport`] - Seams between the session and the BLE stack
//! - [`btleplug_backend`] - Scanning and GATT access through btleplug
//! - [`connection`] - Link lifecycle and idle disconnect
//! - [`retry`] - Retry wrapper for device operations
//! - [`service`] - The `LedDevice` session

pub mod btleplug_backend;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod retry;
pub mod service;
pub mod transport;

#[cfg(test)]
mod fake;

pub use error::DeviceError;
pub use service::{DeviceOptions, LedDevice};

//! WiFi signal-strength beacon for the ESP32-S3.
//!
//! Keeps a station-mode WiFi link and an MQTT session to the Ubidots broker
//! alive and publishes the link RSSI once per second. Everything except
//! [`hardware`] and [`channel`] is hardware-independent and tested on the host.

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod logic;
pub mod model;
pub mod session;
pub mod traits;

#[cfg(feature = "esp32s3")]
pub mod channel;
#[cfg(feature = "esp32s3")]
pub mod hardware;

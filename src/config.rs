//! Build-time configuration.
//!
//! Site values come from the build environment (see `build.rs`, which also
//! reads `.env`) and fall back to the defaults below.

use core::fmt::{self, Write};

use heapless::String;

macro_rules! env_or {
    ($name:literal, $default:expr) => {
        match option_env!($name) {
            Some(value) => value,
            None => $default,
        }
    };
}

pub const WIFI_SSID: &str = env_or!("WIFI_SSID", "Inteli.Iot");
pub const WIFI_PASSWORD: &str = env_or!("WIFI_PASSWORD", "");
/// Ubidots account token, sent as the MQTT username.
pub const UBIDOTS_TOKEN: &str = env_or!("UBIDOTS_TOKEN", "");
pub const DEVICE_LABEL: &str = env_or!("DEVICE_LABEL", "teste-wifi");
pub const MQTT_SERVER: &str = env_or!("MQTT_SERVER", "industrial.api.ubidots.com");
pub const MQTT_PORT: u16 = 1883;

pub const PUBLISH_INTERVAL_MS: u64 = 1_000;
/// A WiFi attempt stuck in CONNECTING longer than this is restarted.
pub const LINK_CONNECT_TIMEOUT_MS: u64 = 20_000;
pub const LOOP_DELAY_MS: u64 = 10;

const TOPIC_PREFIX: &str = "/v1.6/devices/";

pub type Topic = String<64>;
pub type ClientId = String<64>;

/// Longest device label that still fits in a [`Topic`].
pub const MAX_LABEL_LEN: usize = 64 - TOPIC_PREFIX.len();

const _: () = assert!(
    DEVICE_LABEL.len() <= MAX_LABEL_LEN,
    "DEVICE_LABEL does not fit in the MQTT topic"
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Label length in bytes.
    LabelTooLong(usize),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::LabelTooLong(len) => write!(
                f,
                "device label is {} bytes, at most {} fit",
                len, MAX_LABEL_LEN
            ),
        }
    }
}

/// Immutable parameters of one supervisor instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub wifi_ssid: &'static str,
    pub wifi_password: &'static str,
    pub token: &'static str,
    pub device_label: &'static str,
    pub mqtt_server: &'static str,
    pub mqtt_port: u16,
    pub publish_interval_ms: u64,
    pub link_connect_timeout_ms: u64,
}

impl Config {
    pub const fn from_build_env() -> Self {
        Self {
            wifi_ssid: WIFI_SSID,
            wifi_password: WIFI_PASSWORD,
            token: UBIDOTS_TOKEN,
            device_label: DEVICE_LABEL,
            mqtt_server: MQTT_SERVER,
            mqtt_port: MQTT_PORT,
            publish_interval_ms: PUBLISH_INTERVAL_MS,
            link_connect_timeout_ms: LINK_CONNECT_TIMEOUT_MS,
        }
    }

    /// Ubidots device topic, `/v1.6/devices/<label>`.
    pub fn topic(&self) -> Result<Topic, ConfigError> {
        let mut topic = Topic::new();
        write!(topic, "{}{}", TOPIC_PREFIX, self.device_label)
            .map_err(|_| ConfigError::LabelTooLong(self.device_label.len()))?;
        Ok(topic)
    }

    /// MQTT client id: the device label plus the chip's unique id in hex.
    pub fn client_id(&self, hardware_id: u32) -> Result<ClientId, ConfigError> {
        let mut id = ClientId::new();
        write!(id, "{}-{:x}", self.device_label, hardware_id)
            .map_err(|_| ConfigError::LabelTooLong(self.device_label.len()))?;
        Ok(id)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_build_env()
    }
}

/// Lower 32 bits of the factory MAC, packed little-endian like the eFuse word.
pub fn hardware_id_from_mac(mac: [u8; 6]) -> u32 {
    u32::from_le_bytes([mac[0], mac[1], mac[2], mac[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            device_label: "teste-wifi",
            ..Config::from_build_env()
        }
    }

    #[test]
    fn topic_is_derived_from_device_label() {
        assert_eq!(config().topic().unwrap().as_str(), "/v1.6/devices/teste-wifi");
    }

    #[test]
    fn client_id_uses_lowercase_hex_without_padding() {
        let id = hardware_id_from_mac([0x24, 0x6f, 0x28, 0x0a, 0x0b, 0x0c]);
        assert_eq!(id, 0x0a28_6f24);
        assert_eq!(config().client_id(id).unwrap().as_str(), "teste-wifi-a286f24");
    }

    #[test]
    fn defaults_match_broker_contract() {
        let config = Config::from_build_env();
        assert_eq!(config.mqtt_port, 1883);
        assert_eq!(config.publish_interval_ms, 1_000);
        assert_eq!(config.link_connect_timeout_ms, 20_000);
        assert!(config.device_label.len() <= MAX_LABEL_LEN);
    }

    const FIFTY: &str = concat!(
        "abcdefghij",
        "abcdefghij",
        "abcdefghij",
        "abcdefghij",
        "abcdefghij"
    );

    #[test]
    fn longest_label_fills_topic() {
        let config = Config {
            device_label: FIFTY,
            ..Config::from_build_env()
        };
        assert_eq!(MAX_LABEL_LEN, 50);
        assert_eq!(config.topic().unwrap().len(), 64);
        assert_eq!(config.client_id(u32::MAX).unwrap().len(), 59);
    }

    #[test]
    fn oversized_label_is_an_error() {
        let config = Config {
            device_label: concat!(
                "abcdefghij",
                "abcdefghij",
                "abcdefghij",
                "abcdefghij",
                "abcdefghij",
                "xy"
            ),
            ..Config::from_build_env()
        };
        assert_eq!(config.topic(), Err(ConfigError::LabelTooLong(52)));
        // The client id still has room, the topic does not.
        assert!(config.client_id(1).is_ok());

        let config = Config {
            device_label: concat!(
                "abcdefghij",
                "abcdefghij",
                "abcdefghij",
                "abcdefghij",
                "abcdefghij",
                "abcdefg"
            ),
            ..Config::from_build_env()
        };
        assert_eq!(
            config.client_id(0x0a28_6f24),
            Err(ConfigError::LabelTooLong(57))
        );
        assert_eq!(
            ConfigError::LabelTooLong(57).to_string(),
            "device label is 57 bytes, at most 50 fit"
        );
    }
}

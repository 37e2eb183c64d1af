// Model of the data handled by the beacon

use core::fmt::{self, Write};

use heapless::String;

pub type Payload = String<32>;

/// One RSSI sample, alive for a single publish tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    pub timestamp_ms: u64,
    pub rssi: i32,
}

impl Reading {
    pub fn new(timestamp_ms: u64, rssi: i32) -> Self {
        Self { timestamp_ms, rssi }
    }

    /// Ubidots payload, exactly `{"sinal": <rssi>}`.
    pub fn payload(&self) -> Payload {
        let mut payload = Payload::new();
        let _ = write!(payload, "{{\"sinal\": {}}}", self.rssi);
        payload
    }
}

/// What the WiFi link reports when polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Disconnected,
    /// Associated or associating, no IPv4 address yet.
    Connecting,
    Connected,
}

/// MQTT session state. Negative codes are transport-side, positive ones are
/// CONNACK refusals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    ConnectionTimeout,
    ConnectionLost,
    ConnectFailed,
    Disconnected,
    Connected,
    BadProtocol,
    BadClientId,
    Unavailable,
    BadCredentials,
    Unauthorized,
}

impl ChannelState {
    pub fn code(self) -> i8 {
        match self {
            ChannelState::ConnectionTimeout => -4,
            ChannelState::ConnectionLost => -3,
            ChannelState::ConnectFailed => -2,
            ChannelState::Disconnected => -1,
            ChannelState::Connected => 0,
            ChannelState::BadProtocol => 1,
            ChannelState::BadClientId => 2,
            ChannelState::Unavailable => 3,
            ChannelState::BadCredentials => 4,
            ChannelState::Unauthorized => 5,
        }
    }

    /// Maps a CONNACK return code. Codes outside 0..=5 are reserved by the
    /// protocol and treated as a failed connect.
    pub fn from_connack(return_code: u8) -> Self {
        match return_code {
            0 => ChannelState::Connected,
            1 => ChannelState::BadProtocol,
            2 => ChannelState::BadClientId,
            3 => ChannelState::Unavailable,
            4 => ChannelState::BadCredentials,
            5 => ChannelState::Unauthorized,
            _ => ChannelState::ConnectFailed,
        }
    }

    pub fn is_connected(self) -> bool {
        self == ChannelState::Connected
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ChannelState::ConnectionTimeout => "keep-alive timeout",
            ChannelState::ConnectionLost => "connection lost",
            ChannelState::ConnectFailed => "connect failed",
            ChannelState::Disconnected => "disconnected",
            ChannelState::Connected => "connected",
            ChannelState::BadProtocol => "protocol version refused",
            ChannelState::BadClientId => "client id refused",
            ChannelState::Unavailable => "server unavailable",
            ChannelState::BadCredentials => "bad username or password",
            ChannelState::Unauthorized => "not authorized",
        };
        write!(f, "{} (rc={})", text, self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_has_fixed_shape() {
        assert_eq!(Reading::new(1_000, -67).payload().as_str(), "{\"sinal\": -67}");
        assert_eq!(Reading::new(1_000, 0).payload().as_str(), "{\"sinal\": 0}");
    }

    #[test]
    fn payload_fits_extreme_values() {
        let payload = Reading::new(0, i32::MIN).payload();
        assert_eq!(payload.as_str(), "{\"sinal\": -2147483648}");
    }

    #[test]
    fn connack_codes_map_to_states() {
        for code in 0..=5u8 {
            assert_eq!(ChannelState::from_connack(code).code(), code as i8);
        }
        assert_eq!(ChannelState::from_connack(0x80), ChannelState::ConnectFailed);
        assert!(ChannelState::from_connack(0).is_connected());
    }

    #[test]
    fn display_includes_return_code() {
        let mut text = String::<48>::new();
        let _ = write!(text, "{}", ChannelState::BadCredentials);
        assert_eq!(text.as_str(), "bad username or password (rc=4)");
    }
}

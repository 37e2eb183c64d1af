//! MQTT 3.1.1 session rules that don't need a socket.
//!
//! Packets are encoded and decoded with [`myrtio_mqtt::packet`]. This module
//! pins the options a publish-only client uses (QoS 0, clean session, no will)
//! and tracks the keep-alive timer that [`crate::channel`] acts on.

use core::marker::PhantomData;

use myrtio_mqtt::client::MqttVersion;
use myrtio_mqtt::error::{MqttError, ProtocolError};
use myrtio_mqtt::packet::{
    self, Connect, Disconnect, EncodePacket, MqttPacket, PingReq, Publish, QoS,
};
use myrtio_mqtt::transport::ErrorPlaceHolder;

use crate::model::ChannelState;

pub const VERSION: MqttVersion = MqttVersion::V3;
pub const KEEP_ALIVE_SECS: u16 = 15;
pub const KEEP_ALIVE_MS: u64 = KEEP_ALIVE_SECS as u64 * 1_000;
pub const CONNACK_LEN: usize = 4;

// The encoders index the fixed header, the length reserve and (for CONNECT)
// the variable header without bounds checks.
const PUBLISH_HEADROOM: usize = 5;
const CONNECT_HEADROOM: usize = 15;

const PUBLISH: u8 = 3;
const PINGRESP: u8 = 13;

pub type CodecError = MqttError<ErrorPlaceHolder>;

/// CONNECT with a clean session. The username is left out when empty.
pub fn encode_connect(
    buf: &mut [u8],
    client_id: &str,
    username: &str,
    password: Option<&str>,
) -> Result<usize, CodecError> {
    if buf.len() < CONNECT_HEADROOM {
        return Err(MqttError::BufferTooSmall);
    }
    Connect::with_credentials(
        client_id,
        KEEP_ALIVE_SECS,
        true,
        (!username.is_empty()).then_some(username),
        password.map(str::as_bytes),
        None,
    )
    .encode(buf, VERSION)
}

/// PUBLISH at QoS 0, not retained.
pub fn encode_publish(buf: &mut [u8], topic: &str, payload: &[u8]) -> Result<usize, CodecError> {
    if buf.len() < PUBLISH_HEADROOM {
        return Err(MqttError::BufferTooSmall);
    }
    Publish {
        topic,
        qos: QoS::AtMostOnce,
        retain: false,
        payload,
        packet_id: None,
    }
    .encode(buf, VERSION)
}

pub fn encode_ping_request(buf: &mut [u8]) -> Result<usize, CodecError> {
    PingReq.encode(buf, VERSION)
}

pub fn encode_disconnect(buf: &mut [u8]) -> Result<usize, CodecError> {
    Disconnect {
        _phantom: PhantomData,
    }
    .encode(buf, VERSION)
}

/// Session state carried by a CONNACK frame.
pub fn connack_state(frame: &[u8]) -> Result<ChannelState, CodecError> {
    if frame.len() != CONNACK_LEN || frame[1] != 2 {
        return Err(MqttError::Protocol(ProtocolError::MalformedPacket));
    }
    match packet::decode::<ErrorPlaceHolder>(frame, VERSION)? {
        Some(MqttPacket::ConnAck(connack)) => Ok(ChannelState::from_connack(connack.reason_code)),
        _ => Err(MqttError::Protocol(ProtocolError::InvalidResponse)),
    }
}

/// Inbound frame as seen by a client that never subscribes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    PingResp,
    Publish,
    /// A packet type the broker has no reason to send, PINGREQ included.
    Unexpected(u8),
}

/// Classify one complete inbound frame.
pub fn classify_inbound(frame: &[u8]) -> Result<Inbound, CodecError> {
    let Some(&header) = frame.first() else {
        return Err(MqttError::Protocol(ProtocolError::MalformedPacket));
    };

    match header >> 4 {
        PUBLISH | PINGRESP => match packet::decode::<ErrorPlaceHolder>(frame, VERSION)? {
            Some(MqttPacket::PingResp) => Ok(Inbound::PingResp),
            Some(MqttPacket::Publish(_)) => Ok(Inbound::Publish),
            _ => Err(MqttError::Protocol(ProtocolError::MalformedPacket)),
        },
        kind @ (0 | 15) => Err(MqttError::Protocol(ProtocolError::InvalidPacketType(kind))),
        kind => Ok(Inbound::Unexpected(kind)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepAliveAction {
    Idle,
    SendPing,
    /// A PINGREQ went unanswered for a whole period.
    TimedOut,
}

/// Keep-alive decision from the last traffic in each direction.
pub fn keep_alive_action(
    now_ms: u64,
    last_in_ms: u64,
    last_out_ms: u64,
    ping_outstanding: bool,
    period_ms: u64,
) -> KeepAliveAction {
    let idle = now_ms.saturating_sub(last_in_ms) > period_ms
        || now_ms.saturating_sub(last_out_ms) > period_ms;

    match (idle, ping_outstanding) {
        (false, _) => KeepAliveAction::Idle,
        (true, false) => KeepAliveAction::SendPing,
        (true, true) => KeepAliveAction::TimedOut,
    }
}

/// Traffic timestamps of an open session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlive {
    period_ms: u64,
    last_in_ms: u64,
    last_out_ms: u64,
    ping_outstanding: bool,
}

impl KeepAlive {
    pub const fn new(period_ms: u64) -> Self {
        Self {
            period_ms,
            last_in_ms: 0,
            last_out_ms: 0,
            ping_outstanding: false,
        }
    }

    /// Session just opened.
    pub fn open(&mut self, now_ms: u64) {
        self.last_in_ms = now_ms;
        self.last_out_ms = now_ms;
        self.ping_outstanding = false;
    }

    pub fn sent(&mut self, now_ms: u64) {
        self.last_out_ms = now_ms;
    }

    pub fn ping_sent(&mut self, now_ms: u64) {
        self.last_out_ms = now_ms;
        self.last_in_ms = now_ms;
        self.ping_outstanding = true;
    }

    pub fn received(&mut self, now_ms: u64, inbound: Inbound) {
        self.last_in_ms = now_ms;
        if inbound == Inbound::PingResp {
            self.ping_outstanding = false;
        }
    }

    pub fn poll(&self, now_ms: u64) -> KeepAliveAction {
        keep_alive_action(
            now_ms,
            self.last_in_ms,
            self.last_out_ms,
            self.ping_outstanding,
            self.period_ms,
        )
    }

    pub fn ping_outstanding(&self) -> bool {
        self.ping_outstanding
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_with_token_username_and_no_password() {
        let mut buf = [0u8; 64];
        let len = encode_connect(&mut buf, "dev-1", "tok", None).unwrap();

        let expected: &[u8] = &[
            0x10, 22, // fixed header
            0x00, 0x04, b'M', b'Q', b'T', b'T', // protocol name
            0x04, // level
            0x82, // username + clean session
            0x00, 0x0F, // keep-alive
            0x00, 0x05, b'd', b'e', b'v', b'-', b'1', // client id
            0x00, 0x03, b't', b'o', b'k', // username
        ];
        assert_eq!(&buf[..len], expected);
    }

    #[test]
    fn connect_flags_follow_credentials() {
        let mut buf = [0u8; 64];
        let len = encode_connect(&mut buf, "c", "u", Some("p")).unwrap();
        assert_eq!(buf[9], 0xC2);
        assert_eq!(&buf[len - 3..len], &[0x00u8, 0x01, b'p']);

        encode_connect(&mut buf, "c", "", None).unwrap();
        assert_eq!(buf[9], 0x02);
    }

    #[test]
    fn connect_rejects_small_buffer() {
        let mut buf = [0u8; 8];
        assert!(matches!(
            encode_connect(&mut buf, "dev-1", "tok", None),
            Err(MqttError::BufferTooSmall)
        ));

        let mut buf = [0u8; 20];
        assert!(matches!(
            encode_connect(&mut buf, "teste-wifi-a286f24", "BBUS-token", None),
            Err(MqttError::BufferTooSmall)
        ));
    }

    #[test]
    fn publish_qos0_layout() {
        let mut buf = [0u8; 64];
        let len = encode_publish(&mut buf, "/v1.6/devices/x", b"{\"sinal\": -67}").unwrap();

        assert_eq!(buf[0], 0x30);
        assert_eq!(buf[1] as usize, 2 + 15 + 14);
        assert_eq!(&buf[2..4], &[0x00u8, 15]);
        assert_eq!(&buf[4..19], b"/v1.6/devices/x");
        assert_eq!(&buf[19..len], b"{\"sinal\": -67}");
        assert_eq!(len, 33);
    }

    #[test]
    fn remaining_length_boundaries() {
        // Topic "t" takes 3 bytes of the remaining length.
        let mut buf = std::vec![0u8; 16_400];
        let cases: [(usize, &[u8]); 4] = [
            (127, &[0x7F]),
            (128, &[0x80, 0x01]),
            (16_383, &[0xFF, 0x7F]),
            (16_384, &[0x80, 0x80, 0x01]),
        ];
        for (remaining, encoded) in cases {
            let payload = std::vec![b'x'; remaining - 3];
            let len = encode_publish(&mut buf, "t", &payload).unwrap();
            assert_eq!(&buf[1..1 + encoded.len()], encoded);
            assert_eq!(len, 1 + encoded.len() + remaining);
        }
    }

    #[test]
    fn publish_rejects_small_buffer() {
        let mut buf = [0u8; 8];
        assert!(matches!(
            encode_publish(&mut buf, "/v1.6/devices/x", b"{}"),
            Err(MqttError::BufferTooSmall)
        ));
        let mut tiny = [0u8; 3];
        assert!(encode_publish(&mut tiny, "t", b"").is_err());
    }

    #[test]
    fn empty_packets() {
        let mut buf = [0u8; 2];
        assert_eq!(encode_ping_request(&mut buf).ok(), Some(2));
        assert_eq!(buf, [0xC0u8, 0x00]);
        assert_eq!(encode_disconnect(&mut buf).ok(), Some(2));
        assert_eq!(buf, [0xE0u8, 0x00]);
    }

    #[test]
    fn connack_codes_map_to_channel_state() {
        let state = |code: u8| connack_state(&[0x20, 0x02, 0x00, code]).ok();
        assert_eq!(state(0), Some(ChannelState::Connected));
        assert_eq!(state(1), Some(ChannelState::BadProtocol));
        assert_eq!(state(2), Some(ChannelState::BadClientId));
        assert_eq!(state(3), Some(ChannelState::Unavailable));
        assert_eq!(state(4), Some(ChannelState::BadCredentials));
        assert_eq!(state(5), Some(ChannelState::Unauthorized));
        assert_eq!(state(0x80), Some(ChannelState::ConnectFailed));
    }

    #[test]
    fn connack_rejects_other_frames() {
        assert!(connack_state(&[0xD0, 0x02, 0x00, 0x00]).is_err());
        assert!(connack_state(&[0x20, 0x03, 0x00, 0x00]).is_err());
        assert!(connack_state(&[0x20, 0x02]).is_err());
    }

    #[test]
    fn inbound_frames_are_classified() {
        assert_eq!(classify_inbound(&[0xD0, 0x00]).ok(), Some(Inbound::PingResp));

        let mut buf = [0u8; 32];
        let len = encode_publish(&mut buf, "a/b", b"on").unwrap();
        assert_eq!(classify_inbound(&buf[..len]).ok(), Some(Inbound::Publish));

        // Only clients send PINGREQ.
        assert_eq!(
            classify_inbound(&[0xC0, 0x00]).ok(),
            Some(Inbound::Unexpected(12))
        );
        assert!(classify_inbound(&[0xF0, 0x00]).is_err());
        assert!(classify_inbound(&[]).is_err());
    }

    #[test]
    fn keep_alive_is_idle_within_period() {
        assert_eq!(keep_alive_action(15_000, 0, 0, false, 15_000), KeepAliveAction::Idle);
        assert_eq!(keep_alive_action(20_000, 10_000, 5_001, true, 15_000), KeepAliveAction::Idle);
    }

    #[test]
    fn keep_alive_pings_when_either_direction_goes_quiet() {
        assert_eq!(
            keep_alive_action(15_001, 0, 15_000, false, 15_000),
            KeepAliveAction::SendPing
        );
        assert_eq!(
            keep_alive_action(15_001, 15_000, 0, false, 15_000),
            KeepAliveAction::SendPing
        );
    }

    #[test]
    fn keep_alive_times_out_on_unanswered_ping() {
        let mut timer = KeepAlive::new(KEEP_ALIVE_MS);
        timer.open(1_000);

        assert_eq!(timer.poll(16_000), KeepAliveAction::Idle);
        assert_eq!(timer.poll(16_001), KeepAliveAction::SendPing);
        timer.ping_sent(16_001);
        assert!(timer.ping_outstanding());

        assert_eq!(timer.poll(31_001), KeepAliveAction::Idle);
        assert_eq!(timer.poll(31_002), KeepAliveAction::TimedOut);
    }

    #[test]
    fn pingresp_clears_outstanding_ping() {
        let mut timer = KeepAlive::new(KEEP_ALIVE_MS);
        timer.open(0);
        timer.ping_sent(15_001);

        timer.received(15_200, Inbound::Publish);
        assert!(timer.ping_outstanding());

        timer.received(15_300, Inbound::PingResp);
        assert!(!timer.ping_outstanding());
        assert_eq!(timer.poll(30_002), KeepAliveAction::SendPing);
    }

    #[test]
    fn open_resets_previous_session() {
        let mut timer = KeepAlive::new(KEEP_ALIVE_MS);
        timer.ping_sent(100);
        timer.open(50_000);
        assert!(!timer.ping_outstanding());
        assert_eq!(timer.poll(60_000), KeepAliveAction::Idle);
    }
}

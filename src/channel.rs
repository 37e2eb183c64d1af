//! MQTT session over an embassy-net TCP socket.

use core::net::Ipv4Addr;

use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::{Error as TcpError, TcpSocket};
use embassy_net::{IpAddress, Stack};
use embassy_time::{Duration, Instant, with_timeout};
use log::{debug, info, warn};
use myrtio_mqtt::util::read_variable_byte_integer;

use crate::model::ChannelState;
use crate::session::{
    self, CONNACK_LEN, Inbound, KEEP_ALIVE_MS, KEEP_ALIVE_SECS, KeepAlive, KeepAliveAction,
};
use crate::traits::TelemetryChannel;

/// Largest packet the channel sends or keeps from an inbound frame.
pub const PACKET_BUFFER_LEN: usize = 256;

const SOCKET_TIMEOUT: Duration = Duration::from_secs(15);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

pub struct MqttChannel<'a> {
    stack: Stack<'a>,
    socket: TcpSocket<'a>,
    server: Option<(&'static str, u16)>,
    state: ChannelState,
    buf: [u8; PACKET_BUFFER_LEN],
    keep_alive: KeepAlive,
}

impl<'a> MqttChannel<'a> {
    pub fn new(stack: Stack<'a>, rx_buffer: &'a mut [u8], tx_buffer: &'a mut [u8]) -> Self {
        let mut socket = TcpSocket::new(stack, rx_buffer, tx_buffer);
        socket.set_timeout(Some(SOCKET_TIMEOUT));

        Self {
            stack,
            socket,
            server: None,
            state: ChannelState::Disconnected,
            buf: [0; PACKET_BUFFER_LEN],
            keep_alive: KeepAlive::new(KEEP_ALIVE_MS),
        }
    }

    /// Send DISCONNECT and close the socket.
    pub async fn disconnect(&mut self) {
        if self.state.is_connected() {
            if let Ok(len) = session::encode_disconnect(&mut self.buf) {
                let _ = self.write_all(len).await;
            }
            self.socket.close();
            let _ = with_timeout(CLOSE_TIMEOUT, self.socket.flush()).await;
        }
        self.drop_session(ChannelState::Disconnected);
    }

    async fn resolve(&self, host: &str) -> Option<IpAddress> {
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            return Some(IpAddress::Ipv4(ip));
        }

        match self.stack.dns_query(host, DnsQueryType::A).await {
            Ok(addrs) => {
                let addr = addrs.first().copied();
                if addr.is_none() {
                    warn!("mqtt: DNS returned no address for '{}'", host);
                }
                addr
            }
            Err(e) => {
                warn!("mqtt: DNS lookup of '{}' failed: {:?}", host, e);
                None
            }
        }
    }

    async fn write_all(&mut self, len: usize) -> Result<(), TcpError> {
        let mut sent = 0;
        while sent < len {
            let n = self.socket.write(&self.buf[sent..len]).await?;
            if n == 0 {
                return Err(TcpError::ConnectionReset);
            }
            sent += n;
        }
        self.socket.flush().await?;
        self.keep_alive.sent(Instant::now().as_millis());
        Ok(())
    }

    async fn read_exact(&mut self, start: usize, end: usize) -> Result<(), TcpError> {
        let mut pos = start;
        while pos < end {
            let n = self.socket.read(&mut self.buf[pos..end]).await?;
            if n == 0 {
                return Err(TcpError::ConnectionReset);
            }
            pos += n;
        }
        Ok(())
    }

    /// Writes the first `len` bytes of the packet buffer; a failed write ends the session.
    async fn send(&mut self, len: usize) -> bool {
        match self.write_all(len).await {
            Ok(()) => true,
            Err(e) => {
                warn!("mqtt: write failed: {:?}", e);
                self.drop_session(ChannelState::ConnectionLost);
                false
            }
        }
    }

    /// Reads one inbound packet and reacts to it. Frames longer than the
    /// buffer are drained and dropped.
    async fn receive(&mut self) -> bool {
        if self.read_exact(0, 1).await.is_err() {
            return self.lost("read");
        }

        // Remaining length is 1 to 4 bytes, the last one without the continuation bit.
        let mut header_len = 1;
        loop {
            if header_len == 5 || self.read_exact(header_len, header_len + 1).await.is_err() {
                return self.lost("read");
            }
            header_len += 1;
            if self.buf[header_len - 1] & 0x80 == 0 {
                break;
            }
        }
        let mut cursor = 1;
        let remaining = match read_variable_byte_integer(&mut cursor, &self.buf[..header_len]) {
            Ok(remaining) => remaining,
            Err(e) => {
                warn!("mqtt: bad remaining length: {:?}", e);
                return self.lost("decode");
            }
        };

        let frame_len = header_len + remaining;
        let inbound = if frame_len <= PACKET_BUFFER_LEN {
            if self.read_exact(header_len, frame_len).await.is_err() {
                return self.lost("read");
            }
            match session::classify_inbound(&self.buf[..frame_len]) {
                Ok(inbound) => inbound,
                Err(e) => {
                    warn!("mqtt: undecodable inbound packet: {:?}", e);
                    return self.lost("decode");
                }
            }
        } else {
            let header = self.buf[0];
            let room = PACKET_BUFFER_LEN - header_len;
            let mut left = remaining;
            while left > 0 {
                let chunk = left.min(room);
                if self
                    .read_exact(header_len, header_len + chunk)
                    .await
                    .is_err()
                {
                    return self.lost("read");
                }
                left -= chunk;
            }
            debug!("mqtt: dropped {} byte inbound frame", frame_len);
            Inbound::Unexpected(header >> 4)
        };

        self.keep_alive.received(Instant::now().as_millis(), inbound);
        match inbound {
            Inbound::PingResp => {}
            Inbound::Publish => debug!("mqtt: ignoring inbound PUBLISH"),
            Inbound::Unexpected(kind) => warn!("mqtt: ignoring unexpected packet type {}", kind),
        }
        true
    }

    fn lost(&mut self, what: &str) -> bool {
        warn!("mqtt: {} failed, session lost", what);
        self.drop_session(ChannelState::ConnectionLost);
        false
    }

    fn drop_session(&mut self, state: ChannelState) {
        self.state = state;
        self.keep_alive.open(Instant::now().as_millis());
        self.socket.abort();
    }
}

impl TelemetryChannel for MqttChannel<'_> {
    fn set_server(&mut self, host: &'static str, port: u16) {
        self.server = Some((host, port));
    }

    fn connected(&self) -> bool {
        self.state.is_connected()
    }

    async fn connect(&mut self, client_id: &str, username: &str, password: Option<&str>) -> bool {
        let Some((host, port)) = self.server else {
            warn!("mqtt: no server configured");
            self.state = ChannelState::ConnectFailed;
            return false;
        };

        if self.state.is_connected() {
            self.disconnect().await;
        }
        // The socket may still hold a dead connection.
        self.socket.abort();
        let _ = with_timeout(CLOSE_TIMEOUT, self.socket.flush()).await;

        let Some(addr) = self.resolve(host).await else {
            self.state = ChannelState::ConnectFailed;
            return false;
        };

        if let Err(e) = self.socket.connect((addr, port)).await {
            warn!("mqtt: TCP connect to {}:{} failed: {:?}", addr, port, e);
            self.drop_session(ChannelState::ConnectFailed);
            return false;
        }

        let len = match session::encode_connect(&mut self.buf, client_id, username, password) {
            Ok(len) => len,
            Err(e) => {
                warn!("mqtt: CONNECT not encodable: {:?}", e);
                self.drop_session(ChannelState::ConnectFailed);
                return false;
            }
        };
        if self.write_all(len).await.is_err() {
            self.drop_session(ChannelState::ConnectFailed);
            return false;
        }

        match with_timeout(SOCKET_TIMEOUT, self.read_exact(0, CONNACK_LEN)).await {
            Ok(Ok(())) => {}
            _ => {
                self.drop_session(ChannelState::ConnectionTimeout);
                return false;
            }
        }

        let state = match session::connack_state(&self.buf[..CONNACK_LEN]) {
            Ok(state) => state,
            Err(e) => {
                warn!("mqtt: bad CONNACK: {:?}", e);
                ChannelState::ConnectFailed
            }
        };
        if !state.is_connected() {
            self.drop_session(state);
            return false;
        }

        info!("mqtt: session open with {}:{}", host, port);
        self.state = ChannelState::Connected;
        self.keep_alive.open(Instant::now().as_millis());
        true
    }

    fn state(&self) -> ChannelState {
        self.state
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> bool {
        if !self.state.is_connected() {
            return false;
        }

        match session::encode_publish(&mut self.buf, topic, payload) {
            Ok(len) => self.send(len).await,
            Err(e) => {
                warn!("mqtt: PUBLISH to {} not encodable: {:?}", topic, e);
                false
            }
        }
    }

    async fn service_loop(&mut self) -> bool {
        if !self.state.is_connected() {
            return false;
        }

        if !self.socket.may_send() || !self.socket.may_recv() {
            warn!("mqtt: broker closed the connection");
            self.drop_session(ChannelState::ConnectionLost);
            return false;
        }

        let now_ms = Instant::now().as_millis();
        match self.keep_alive.poll(now_ms) {
            KeepAliveAction::Idle => {}
            KeepAliveAction::TimedOut => {
                warn!("mqtt: no PINGRESP within {} s", KEEP_ALIVE_SECS);
                self.drop_session(ChannelState::ConnectionTimeout);
                return false;
            }
            KeepAliveAction::SendPing => {
                let Ok(len) = session::encode_ping_request(&mut self.buf) else {
                    return false;
                };
                if !self.send(len).await {
                    return false;
                }
                self.keep_alive.ping_sent(now_ms);
            }
        }

        while self.socket.can_recv() {
            if !self.receive().await {
                return false;
            }
        }

        true
    }
}

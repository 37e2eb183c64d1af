//! Hardware abstraction traits

use core::net::Ipv4Addr;

use crate::model::{ChannelState, LinkStatus};

/// Trait for the station-mode WiFi link
#[allow(async_fn_in_trait)]
pub trait NetworkLink {
    /// Poll the current link status
    fn status(&mut self) -> LinkStatus;

    /// Start (or restart) joining the access point. Returns once the driver has
    /// accepted or rejected the attempt; the address lease completes later.
    async fn begin(&mut self, ssid: &str, password: &str);

    /// IPv4 address leased to the station, if any
    fn local_address(&self) -> Option<Ipv4Addr>;

    /// Signal strength of the associated access point in dBm, 0 when unknown
    fn rssi(&mut self) -> i32;
}

/// Trait for the MQTT session to the telemetry broker
#[allow(async_fn_in_trait)]
pub trait TelemetryChannel {
    /// Set the broker used by the next `connect`
    fn set_server(&mut self, host: &'static str, port: u16);

    fn connected(&self) -> bool;

    /// Open a session; on `false` the reason is available from `state`
    async fn connect(&mut self, client_id: &str, username: &str, password: Option<&str>) -> bool;

    fn state(&self) -> ChannelState;

    /// Send one QoS 0 message
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> bool;

    /// Keep-alive and inbound traffic; call on every loop iteration
    async fn service_loop(&mut self) -> bool;
}

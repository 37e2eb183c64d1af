use embassy_net::Stack;
use esp_radio::wifi::{ClientConfig, ModeConfig, WifiController};
use log::warn;

use core::net::Ipv4Addr;

use crate::config::hardware_id_from_mac;
use crate::model::LinkStatus;
use crate::traits::NetworkLink;

/// Station-mode WiFi link: the esp-radio controller plus the IP stack on top of it.
pub struct WifiLink<'a> {
    controller: WifiController<'a>,
    stack: Stack<'a>,
}

impl<'a> WifiLink<'a> {
    pub fn new(controller: WifiController<'a>, stack: Stack<'a>) -> Self {
        Self { controller, stack }
    }

    fn associated(&self) -> bool {
        matches!(self.controller.is_connected(), Ok(true))
    }
}

impl NetworkLink for WifiLink<'_> {
    fn status(&mut self) -> LinkStatus {
        if !self.associated() {
            LinkStatus::Disconnected
        } else if self.stack.config_v4().is_some() {
            LinkStatus::Connected
        } else {
            LinkStatus::Connecting
        }
    }

    async fn begin(&mut self, ssid: &str, password: &str) {
        if self.associated() {
            let _ = self.controller.disconnect_async().await;
        }

        let mode = ModeConfig::Client(
            ClientConfig::default()
                .with_ssid(ssid.into())
                .with_password(password.into()),
        );
        if let Err(e) = self.controller.set_config(&mode) {
            warn!("wifi config rejected: {:?}", e);
            return;
        }

        if !self.controller.is_started().unwrap_or(false) {
            if let Err(e) = self.controller.start_async().await {
                warn!("wifi start failed: {:?}", e);
                return;
            }
        }

        if let Err(e) = self.controller.connect_async().await {
            warn!("wifi association failed: {:?}", e);
        }
    }

    fn local_address(&self) -> Option<Ipv4Addr> {
        self.stack.config_v4().map(|config| config.address.address())
    }

    fn rssi(&mut self) -> i32 {
        self.controller.rssi().unwrap_or(0)
    }
}

/// Chip-unique id for the MQTT client id, from the factory MAC in eFuse.
pub fn hardware_id() -> u32 {
    hardware_id_from_mac(esp_hal::efuse::Efuse::mac_address())
}

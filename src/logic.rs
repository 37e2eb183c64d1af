//! Business logic layer (hardware-independent)
//!
//! [`Supervisor`] owns the WiFi link and the MQTT channel and runs one polling
//! iteration per [`Supervisor::step`]: keep the link up, keep the session up,
//! service the session, and publish the RSSI when the interval has elapsed.

use core::fmt;

use log::{info, warn};

use crate::config::{ClientId, Config, ConfigError, Topic};
use crate::model::{LinkStatus, Payload, Reading};
use crate::traits::{NetworkLink, TelemetryChannel};

/// Link state as tracked by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting { since_ms: u64 },
    Connected,
}

/// Result of one publish tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub reading: Reading,
    pub published: bool,
    /// Channel state right after the attempt.
    pub channel_connected: bool,
    pub topic: Topic,
    pub payload: Payload,
}

impl fmt::Display for PublishOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.published {
            write!(f, "published to {}: {}", self.topic, self.payload)
        } else {
            write!(f, "publish failed, mqtt connected? {}", self.channel_connected)
        }
    }
}

/// What one iteration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub link_up: bool,
    pub channel_connected: bool,
    pub publish: Option<PublishOutcome>,
}

pub struct Supervisor<L, C> {
    link: L,
    channel: C,
    config: Config,
    topic: Topic,
    client_id: ClientId,
    link_state: LinkState,
    last_publish_ms: u64,
}

impl<L: NetworkLink, C: TelemetryChannel> Supervisor<L, C> {
    pub fn new(
        link: L,
        channel: C,
        config: Config,
        hardware_id: u32,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            link,
            channel,
            topic: config.topic()?,
            client_id: config.client_id(hardware_id)?,
            config,
            link_state: LinkState::Disconnected,
            last_publish_ms: 0,
        })
    }

    /// Point the channel at the broker and start joining the WiFi network.
    pub async fn start(&mut self, now_ms: u64) {
        self.channel
            .set_server(self.config.mqtt_server, self.config.mqtt_port);
        if self.config.token.is_empty() {
            warn!("no Ubidots token configured, the broker will refuse the session");
        }
        self.begin_link(now_ms).await;
        info!("setup complete");
    }

    /// One loop iteration. The caller sleeps between iterations.
    pub async fn step(&mut self, now_ms: u64) -> StepReport {
        if !self.ensure_link(now_ms).await {
            return StepReport {
                link_up: false,
                channel_connected: false,
                publish: None,
            };
        }

        if self.channel.connected() {
            if !self.channel.service_loop().await {
                warn!("MQTT session dropped: {}", self.channel.state());
            }
        } else {
            self.connect_channel().await;
        }

        let publish = if self.publish_due(now_ms) {
            Some(self.publish(now_ms).await)
        } else {
            None
        };

        StepReport {
            link_up: true,
            channel_connected: self.channel.connected(),
            publish,
        }
    }

    pub fn link_state(&self) -> LinkState {
        self.link_state
    }

    pub fn last_publish_ms(&self) -> u64 {
        self.last_publish_ms
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    async fn begin_link(&mut self, now_ms: u64) {
        info!("joining WiFi network '{}'...", self.config.wifi_ssid);
        self.link
            .begin(self.config.wifi_ssid, self.config.wifi_password)
            .await;
        self.link_state = LinkState::Connecting { since_ms: now_ms };
    }

    async fn ensure_link(&mut self, now_ms: u64) -> bool {
        let status = self.link.status();

        match self.link_state {
            LinkState::Connected if status == LinkStatus::Connected => true,
            LinkState::Connected => {
                warn!("WiFi link lost ({:?}), reconnecting", status);
                self.begin_link(now_ms).await;
                false
            }
            _ if status == LinkStatus::Connected => {
                self.link_state = LinkState::Connected;
                match self.link.local_address() {
                    Some(ip) => info!("WiFi connected, ip: {}", ip),
                    None => info!("WiFi connected"),
                }
                true
            }
            LinkState::Connecting { since_ms }
                if now_ms.saturating_sub(since_ms) > self.config.link_connect_timeout_ms =>
            {
                warn!(
                    "WiFi still not connected after {} ms, retrying",
                    self.config.link_connect_timeout_ms
                );
                self.begin_link(now_ms).await;
                false
            }
            LinkState::Connecting { .. } => false,
            LinkState::Disconnected => {
                self.begin_link(now_ms).await;
                false
            }
        }
    }

    async fn connect_channel(&mut self) {
        info!(
            "connecting to MQTT broker {}:{} as {}...",
            self.config.mqtt_server, self.config.mqtt_port, self.client_id
        );

        if self
            .channel
            .connect(&self.client_id, self.config.token, None)
            .await
        {
            info!("MQTT connected");
        } else {
            warn!("MQTT connect failed: {}, retrying shortly", self.channel.state());
        }
    }

    fn publish_due(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_publish_ms) >= self.config.publish_interval_ms.max(1)
    }

    async fn publish(&mut self, now_ms: u64) -> PublishOutcome {
        // The tick is spent whatever happens below.
        self.last_publish_ms = now_ms;

        let reading = Reading::new(now_ms, self.link.rssi());
        info!("[{}] RSSI: {} dBm", reading.timestamp_ms, reading.rssi);

        let payload = reading.payload();
        let published = if self.channel.connected() {
            self.channel.publish(&self.topic, payload.as_bytes()).await
        } else {
            false
        };

        let outcome = PublishOutcome {
            reading,
            published,
            channel_connected: self.channel.connected(),
            topic: self.topic.clone(),
            payload,
        };

        if outcome.published {
            info!("{}", outcome);
        } else {
            warn!("{}", outcome);
        }

        outcome
    }
}

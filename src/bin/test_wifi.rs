#![no_std]
#![no_main]

use embassy_executor::Spawner;
use embassy_net::{Runner, StackResources};
use embassy_time::{Duration, Instant, Timer};
use esp_backtrace as _;
use esp_hal::{rng::Rng, timer::timg::TimerGroup};
use esp_radio::wifi::WifiDevice;
use static_cell::StaticCell;

use rssi_beacon::{
    channel::MqttChannel,
    config::Config,
    hardware::{self, WifiLink},
    model::{LinkStatus, Reading},
    traits::{NetworkLink, TelemetryChannel},
};

const TCP_BUFFER_LEN: usize = 1024;

static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
static NET_RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();
static TCP_RX_BUFFER: StaticCell<[u8; TCP_BUFFER_LEN]> = StaticCell::new();
static TCP_TX_BUFFER: StaticCell<[u8; TCP_BUFFER_LEN]> = StaticCell::new();

esp_bootloader_esp_idf::esp_app_desc!();

// Test result tracking
struct TestResults {
    passed: u32,
    failed: u32,
    total: u32,
}

impl TestResults {
    fn new() -> Self {
        Self {
            passed: 0,
            failed: 0,
            total: 0,
        }
    }

    fn assert(&mut self, condition: bool, test_name: &str) {
        self.total += 1;
        if condition {
            self.passed += 1;
            esp_println::println!("  ✓ {}", test_name);
        } else {
            self.failed += 1;
            esp_println::println!("  ✗ {} FAILED", test_name);
        }
    }

    fn assert_eq<T: PartialEq + core::fmt::Debug>(&mut self, left: T, right: T, test_name: &str) {
        self.total += 1;
        if left == right {
            self.passed += 1;
            esp_println::println!("  ✓ {}", test_name);
        } else {
            self.failed += 1;
            esp_println::println!("  ✗ {} FAILED: {:?} != {:?}", test_name, left, right);
        }
    }

    fn print_summary(&self) {
        esp_println::println!("\n==========================================");
        esp_println::println!("Test Summary:");
        esp_println::println!("  Total:  {}", self.total);
        esp_println::println!("  Passed: {}", self.passed);
        esp_println::println!("  Failed: {}", self.failed);
        if self.failed == 0 {
            esp_println::println!("\n✓ ALL TESTS PASSED!");
        } else {
            esp_println::println!("\n✗ SOME TESTS FAILED");
        }
        esp_println::println!("==========================================");
    }
}

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}

fn test_device_identity(results: &mut TestResults, config: &Config) {
    esp_println::println!("\n[TEST] Device identity");

    let id = hardware::hardware_id();
    results.assert(id != 0, "eFuse MAC is readable");
    match config.client_id(id) {
        Ok(client_id) => {
            esp_println::println!("    Client id: {}", client_id);
            results.assert(
                client_id.starts_with(config.device_label),
                "client id starts with device label",
            );
        }
        Err(e) => {
            esp_println::println!("    {}", e);
            results.assert(false, "client id fits");
        }
    }
    results.assert(config.topic().is_ok(), "topic fits");
    results.assert_eq(
        Reading::new(0, -67).payload().as_str(),
        "{\"sinal\": -67}",
        "payload shape",
    );
}

async fn test_wifi_link(results: &mut TestResults, link: &mut WifiLink<'_>, config: &Config) {
    esp_println::println!("\n[TEST] WiFi link");

    link.begin(config.wifi_ssid, config.wifi_password).await;

    let start = Instant::now();
    while link.status() != LinkStatus::Connected
        && start.elapsed() < Duration::from_millis(config.link_connect_timeout_ms)
    {
        Timer::after(Duration::from_millis(500)).await;
    }
    esp_println::println!("    Join took {} ms", start.elapsed().as_millis());

    results.assert_eq(link.status(), LinkStatus::Connected, "link connected");
    match link.local_address() {
        Some(ip) => {
            esp_println::println!("    IP: {}", ip);
            results.assert(true, "DHCP address leased");
        }
        None => results.assert(false, "DHCP address leased"),
    }

    esp_println::println!("  Sampling RSSI (5 samples)...");
    let mut samples = heapless::Vec::<i32, 5>::new();
    for i in 0..5 {
        let rssi = link.rssi();
        esp_println::println!("    Sample {}: {} dBm", i + 1, rssi);
        let _ = samples.push(rssi);
        Timer::after(Duration::from_millis(200)).await;
    }
    for rssi in samples.iter() {
        results.assert(*rssi < 0 && *rssi > -127, "RSSI in valid range");
    }
}

async fn test_mqtt_session(
    results: &mut TestResults,
    channel: &mut MqttChannel<'_>,
    config: &Config,
    rssi: i32,
) {
    esp_println::println!("\n[TEST] MQTT session");

    channel.set_server(config.mqtt_server, config.mqtt_port);
    let (Ok(client_id), Ok(topic)) = (config.client_id(hardware::hardware_id()), config.topic())
    else {
        results.assert(false, "session identity fits");
        return;
    };
    let connected = channel.connect(&client_id, config.token, None).await;
    if !connected {
        esp_println::println!("    Connect failed: {}", channel.state());
    }
    results.assert(connected, "broker accepted session");
    if !connected {
        return;
    }

    let reading = Reading::new(Instant::now().as_millis(), rssi);
    let payload = reading.payload();
    esp_println::println!("    Publishing {} -> {}", payload, topic);
    results.assert(
        channel.publish(&topic, payload.as_bytes()).await,
        "publish accepted by transport",
    );

    Timer::after(Duration::from_millis(500)).await;
    results.assert(channel.service_loop().await, "session alive after publish");

    channel.disconnect().await;
    results.assert(!channel.connected(), "session closed");
}

#[esp_rtos::main]
async fn main(spawner: Spawner) {
    esp_println::logger::init_logger_from_env();
    let peripherals = esp_hal::init(esp_hal::Config::default());
    esp_alloc::heap_allocator!(size: 72 * 1024);

    esp_println::println!("\n==========================================");
    esp_println::println!("=== WiFi / MQTT Test Runner ===");
    esp_println::println!("==========================================");

    let config = Config::from_build_env();
    let mut results = TestResults::new();

    // Run tests that don't need the radio
    test_device_identity(&mut results, &config);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    let radio: &'static esp_radio::Controller<'static> = match esp_radio::init() {
        Ok(radio) => RADIO.init(radio),
        Err(e) => {
            esp_println::println!("[ERROR] Radio init failed: {:?}", e);
            results.assert(false, "radio init");
            results.print_summary();
            loop {
                Timer::after(Duration::from_secs(1)).await;
            }
        }
    };

    let (controller, interfaces) =
        match esp_radio::wifi::new(radio, peripherals.WIFI, Default::default()) {
            Ok(parts) => parts,
            Err(e) => {
                esp_println::println!("[ERROR] WiFi init failed: {:?}", e);
                results.assert(false, "wifi init");
                results.print_summary();
                loop {
                    Timer::after(Duration::from_secs(1)).await;
                }
            }
        };

    let rng = Rng::new();
    let seed = ((rng.random() as u64) << 32) | rng.random() as u64;
    let (stack, runner) = embassy_net::new(
        interfaces.sta,
        embassy_net::Config::dhcpv4(Default::default()),
        NET_RESOURCES.init(StackResources::new()),
        seed,
    );
    if let Err(e) = spawner.spawn(net_task(runner)) {
        esp_println::println!("[ERROR] Failed to spawn task: {:?}", e);
    }

    let mut link = WifiLink::new(controller, stack);
    test_wifi_link(&mut results, &mut link, &config).await;

    if link.status() == LinkStatus::Connected {
        let mut channel = MqttChannel::new(
            stack,
            TCP_RX_BUFFER.init([0; TCP_BUFFER_LEN]),
            TCP_TX_BUFFER.init([0; TCP_BUFFER_LEN]),
        );
        let rssi = link.rssi();
        test_mqtt_session(&mut results, &mut channel, &config, rssi).await;
    }

    results.print_summary();

    esp_println::println!("\nTest run complete. Looping...");
    loop {
        Timer::after(Duration::from_millis(1000)).await;
    }
}

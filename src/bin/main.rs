#![no_std]
#![no_main]

use embassy_executor::Spawner;
use embassy_net::{Runner, StackResources};
use embassy_time::{Duration, Instant, Timer};
use esp_backtrace as _;
use esp_hal::{clock::CpuClock, rng::Rng, timer::timg::TimerGroup};
use esp_radio::wifi::WifiDevice;
use static_cell::StaticCell;

use rssi_beacon::{
    channel::MqttChannel,
    config::{Config, LOOP_DELAY_MS},
    hardware::{self, WifiLink},
    logic::Supervisor,
};

const TCP_BUFFER_LEN: usize = 1024;

static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
static NET_RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();
static TCP_RX_BUFFER: StaticCell<[u8; TCP_BUFFER_LEN]> = StaticCell::new();
static TCP_TX_BUFFER: StaticCell<[u8; TCP_BUFFER_LEN]> = StaticCell::new();

esp_bootloader_esp_idf::esp_app_desc!();

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}

/// Bring-up failed; nothing useful can run, keep the executor alive.
async fn park() -> ! {
    loop {
        Timer::after(Duration::from_secs(1)).await;
    }
}

#[esp_rtos::main]
async fn main(spawner: Spawner) {
    esp_println::logger::init_logger_from_env();
    let peripherals = esp_hal::init(esp_hal::Config::default().with_cpu_clock(CpuClock::max()));
    esp_alloc::heap_allocator!(size: 72 * 1024);

    esp_println::println!("=== RSSI Beacon ===");

    // Initialize RTOS timer for embassy
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    let radio: &'static esp_radio::Controller<'static> = match esp_radio::init() {
        Ok(radio) => RADIO.init(radio),
        Err(e) => {
            esp_println::println!("[ERROR] Radio init failed: {:?}", e);
            park().await
        }
    };

    let (controller, interfaces) =
        match esp_radio::wifi::new(radio, peripherals.WIFI, Default::default()) {
            Ok(parts) => parts,
            Err(e) => {
                esp_println::println!("[ERROR] WiFi init failed: {:?}", e);
                park().await
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
        park().await
    }

    let link = WifiLink::new(controller, stack);
    let channel = MqttChannel::new(
        stack,
        TCP_RX_BUFFER.init([0; TCP_BUFFER_LEN]),
        TCP_TX_BUFFER.init([0; TCP_BUFFER_LEN]),
    );
    let mut supervisor = match Supervisor::new(
        link,
        channel,
        Config::from_build_env(),
        hardware::hardware_id(),
    ) {
        Ok(supervisor) => supervisor,
        Err(e) => {
            esp_println::println!("[ERROR] Bad configuration: {}", e);
            park().await
        }
    };

    supervisor.start(Instant::now().as_millis()).await;

    loop {
        supervisor.step(Instant::now().as_millis()).await;
        Timer::after(Duration::from_millis(LOOP_DELAY_MS)).await;
    }
}

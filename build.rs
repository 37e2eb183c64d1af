use std::env;

use dotenvy::from_path;

const FORWARDED_VARS: [&str; 5] = [
    "WIFI_SSID",
    "WIFI_PASSWORD",
    "UBIDOTS_TOKEN",
    "DEVICE_LABEL",
    "MQTT_SERVER",
];

fn main() {
    let _ = from_path(".env");

    println!("cargo:rerun-if-changed=.env");

    for name in FORWARDED_VARS {
        println!("cargo:rerun-if-env-changed={}", name);
        if let Ok(value) = env::var(name) {
            println!("cargo:rustc-env={}={}", name, value);
        }
    }

    // Host builds (library tests) link normally.
    if env::var("CARGO_CFG_TARGET_ARCH").as_deref() == Ok("xtensa") {
        println!("cargo:rustc-link-arg=-Tlinkall.x");
    }
}

//! Links the RP2040 memory map and bakes the device configuration into the
//! firmware.
//!
//! Configuration comes from an optional `config.toml` next to this file,
//! overlaid with environment variables of the same (upper-case) name. Keys
//! that are set nowhere are left out of the table so the firmware can report
//! them as missing.

use std::env;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

use config::{Config, Environment, File};

const KEYS: &[&str] = &[
    "WIFI_SSID",
    "WIFI_PASSWORD",
    "CONNECT_TIMEOUT",
    "PNG_URL",
    "CLIENT_ID",
    "CLIENT_SECRET",
    "HTTP_HEADERS",
    "REFRESH_INTERVAL_MIN",
    "DOWNLOAD_TIMEOUT",
];

fn main() {
    let out = PathBuf::from(env::var_os("OUT_DIR").expect("OUT_DIR is set by cargo"));

    fs::write(out.join("memory.x"), include_bytes!("memory.x")).expect("write memory.x");
    println!("cargo:rustc-link-search={}", out.display());
    println!("cargo:rerun-if-changed=memory.x");

    println!("cargo:rustc-link-arg-bins=--nmagic");
    println!("cargo:rustc-link-arg-bins=-Tlink.x");
    println!("cargo:rustc-link-arg-bins=-Tlink-rp.x");
    println!("cargo:rustc-link-arg-bins=-Tdefmt.x");

    println!("cargo:rerun-if-changed=config.toml");
    for key in KEYS {
        println!("cargo:rerun-if-env-changed={key}");
    }

    let settings = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()
        .expect("config.toml is not valid");

    let mut generated = String::from("pub static BOOTSTRAP: &[(&str, &str)] = &[\n");
    for key in KEYS {
        // The config crate lower-cases environment keys.
        let value = settings
            .get_string(&key.to_lowercase())
            .or_else(|_| settings.get_string(key));
        if let Ok(value) = value {
            writeln!(generated, "    ({key:?}, {value:?}),").expect("write to String");
        }
    }
    generated.push_str("];\n");

    fs::write(out.join("config_generated.rs"), generated).expect("write config_generated.rs");
}

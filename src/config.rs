//! # Print Manager Configuration
//!
//! Everything is read from a single TOML file. Every section and field is
//! optional; missing values fall back to the defaults below.
//!
//! ## Example
//!
//! ```toml
//! [logging]
//! level = "debug"
//!
//! [translator]
//! verbose = false
//!
//! [translator.precision]
//! x = 2
//!
//! [serial]
//! port = "/dev/ttyACM0"
//!
//! [[printer_types]]
//! id = "3F64F6EC-A1DF-44AB-A22E-58C036F2F474"
//! name = "Dremel Idea Builder"
//! supported_connections = [{ type = "serial", baud = 115200 }]
//! ```

// src/config.rs - Single configuration file
use crate::printable::ReadOptions;
use crate::translation::TranslatorOptions;
use printmgr_shared::{Material, PrinterProfile, PrinterType};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid log level '{0}'")]
    LogLevel(String),
}

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub reader: ReaderConfig,
    #[serde(default)]
    pub translator: TranslatorSettings,
    #[serde(default)]
    pub dremel: DremelConfig,
    #[serde(default)]
    pub virtual_printer: VirtualPrinterConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub octoprint: OctoprintConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub printer_types: Vec<PrinterType>,
    #[serde(default)]
    pub profiles: Vec<PrinterProfile>,
    #[serde(default)]
    pub materials: Vec<Material>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LoggingConfig {
    pub fn max_level(&self) -> Result<tracing::Level, ConfigError> {
        self.level
            .parse::<tracing::Level>()
            .map_err(|_| ConfigError::LogLevel(self.level.clone()))
    }
}

/// Printable reader settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReaderConfig {
    /// Chunk size used when pulling bytes from disk. Must be positive.
    #[serde(default)]
    pub buffer_size: Option<i64>,
}

/// Decimal places per axis or parameter when formatting G-code numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Precision {
    #[serde(default = "default_precision_xyz")]
    pub x: usize,
    #[serde(default = "default_precision_xyz")]
    pub y: usize,
    #[serde(default = "default_precision_xyz")]
    pub z: usize,
    #[serde(default = "default_precision_e")]
    pub e: usize,
    #[serde(default)]
    pub f: usize,
    #[serde(default)]
    pub p: usize,
    #[serde(default)]
    pub s: usize,
}

impl Default for Precision {
    fn default() -> Self {
        Self {
            x: default_precision_xyz(),
            y: default_precision_xyz(),
            z: default_precision_xyz(),
            e: default_precision_e(),
            f: 0,
            p: 0,
            s: 0,
        }
    }
}

impl Precision {
    pub fn for_axis(&self, axis: printmgr_shared::Axis) -> usize {
        use printmgr_shared::Axis;
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
            Axis::E => self.e,
            Axis::F => self.f,
        }
    }
}

/// Overrides applied on top of each translator's own defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TranslatorSettings {
    #[serde(default)]
    pub verbose: Option<bool>,
    #[serde(default)]
    pub verbose_from_mic: Option<bool>,
    #[serde(default)]
    pub precision: Option<Precision>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DremelConfig {
    /// Bitmap embedded in the g3drem header. A small placeholder is
    /// generated when unset.
    #[serde(default)]
    pub icon_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VirtualPrinterConfig {
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
    #[serde(default = "default_load_ticks")]
    pub load_ticks: u32,
    #[serde(default = "default_load_tick_ms")]
    pub load_tick_ms: u64,
    #[serde(default = "default_print_ticks")]
    pub print_ticks: u32,
    #[serde(default = "default_print_tick_ms")]
    pub print_tick_ms: u64,
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
}

impl Default for VirtualPrinterConfig {
    fn default() -> Self {
        Self {
            working_dir: default_working_dir(),
            load_ticks: default_load_ticks(),
            load_tick_ms: default_load_tick_ms(),
            print_ticks: default_print_ticks(),
            print_tick_ms: default_print_tick_ms(),
            heartbeat_ms: default_heartbeat_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SerialConfig {
    #[serde(default)]
    pub port: String,
    /// Used when the printer type does not list a serial baud rate.
    #[serde(default = "default_baud")]
    pub baud: u32,
    #[serde(default = "default_open_prime")]
    pub open_prime: String,
    #[serde(default = "default_pause_retraction")]
    pub pause_retraction: f64,
    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,
    #[serde(default = "default_handshake_interval_ms")]
    pub handshake_interval_ms: u64,
    #[serde(default = "default_handshake_wait_count")]
    pub handshake_wait_count: u32,
    #[serde(default = "default_handshake_retries")]
    pub handshake_retries: u32,
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud: default_baud(),
            open_prime: default_open_prime(),
            pause_retraction: default_pause_retraction(),
            status_interval_ms: default_status_interval_ms(),
            handshake_interval_ms: default_handshake_interval_ms(),
            handshake_wait_count: default_handshake_wait_count(),
            handshake_retries: default_handshake_retries(),
            heartbeat_ms: default_heartbeat_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OctoprintConfig {
    #[serde(default = "default_octoprint_address")]
    pub address: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
}

impl Default for OctoprintConfig {
    fn default() -> Self {
        Self {
            address: default_octoprint_address(),
            name: String::new(),
            query_timeout_ms: default_query_timeout_ms(),
            heartbeat_ms: default_heartbeat_ms(),
        }
    }
}

/// External geometry engine invoked for mesh work.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    #[serde(default = "default_server_path")]
    pub server_path: PathBuf,
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,
    /// Seconds without a progress report before the process is killed.
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            server_path: default_server_path(),
            scripts_dir: default_scripts_dir(),
            timeout_secs: default_backend_timeout(),
        }
    }
}

// Default value functions
fn default_log_level() -> String { "info".to_string() }
fn default_precision_xyz() -> usize { 3 }
fn default_precision_e() -> usize { 5 }
fn default_working_dir() -> PathBuf { std::env::temp_dir().join("printmgr-virtual") }
fn default_load_ticks() -> u32 { 3 }
fn default_load_tick_ms() -> u64 { 500 }
fn default_print_ticks() -> u32 { 10 }
fn default_print_tick_ms() -> u64 { 800 }
fn default_heartbeat_ms() -> u64 { 1000 }
fn default_baud() -> u32 { 250000 }
fn default_open_prime() -> String { "M115".to_string() }
fn default_pause_retraction() -> f64 { 5.0 }
fn default_status_interval_ms() -> u64 { 900 }
fn default_handshake_interval_ms() -> u64 { 200 }
fn default_handshake_wait_count() -> u32 { 20 }
fn default_handshake_retries() -> u32 { 4 }
fn default_octoprint_address() -> String { "http://127.0.0.1:5000".to_string() }
fn default_query_timeout_ms() -> u64 { 3000 }
fn default_server_path() -> PathBuf { PathBuf::from("roopa_server") }
fn default_scripts_dir() -> PathBuf { PathBuf::from("scripts") }
fn default_backend_timeout() -> u64 { 600 }

impl Config {
    /// Translator options built from the `[reader]`, `[translator]` and
    /// `[dremel]` sections.
    pub fn translator_options(&self) -> TranslatorOptions {
        TranslatorOptions {
            settings: self.translator.clone(),
            read_options: ReadOptions {
                buffer_size: self.reader.buffer_size,
            },
            dremel_icon: self.dremel.icon_path.clone(),
        }
    }
}

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                Err(ConfigError::Toml(e))
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            Err(ConfigError::Io(e))
        }
    }
}

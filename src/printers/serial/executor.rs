// src/printers/serial/executor.rs - command queue executor over a serial connection
use super::connection::{BoxedStream, HandshakeOptions, SerialConnection};
use crate::printers::command_queue::{CommandExecutor, Responder};
use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use std::sync::{Arc, OnceLock};

/// Opens the byte stream behind a serial executor.
#[async_trait]
pub trait PortOpener: Send + Sync {
    async fn open(&self) -> std::io::Result<BoxedStream>;
}

/// A system serial device such as `/dev/ttyACM0`.
#[derive(Debug, Clone)]
pub struct SystemPort {
    pub path: String,
    pub baud: u32,
}

#[async_trait]
impl PortOpener for SystemPort {
    async fn open(&self) -> std::io::Result<BoxedStream> {
        tracing::info!("Opening serial port {} at {} baud", self.path, self.baud);
        let port = serial2_tokio::SerialPort::open(&self.path, self.baud)?;
        Ok(Box::new(port))
    }
}

/// What the printer told us about itself while we were talking to it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Telemetry {
    pub sd_card_available: bool,
    pub extruder_temp: Option<f64>,
    pub base_plate_temp: Option<f64>,
    pub commands_processed: u64,
}

pub struct SerialExecutor {
    opener: Arc<dyn PortOpener>,
    handshake: HandshakeOptions,
    connection: tokio::sync::Mutex<Option<SerialConnection>>,
    telemetry: Arc<Mutex<Telemetry>>,
}

impl SerialExecutor {
    pub fn new(opener: Arc<dyn PortOpener>, handshake: HandshakeOptions) -> Self {
        Self {
            opener,
            handshake,
            connection: tokio::sync::Mutex::new(None),
            telemetry: Arc::new(Mutex::new(Telemetry::default())),
        }
    }

    pub fn telemetry(&self) -> Telemetry {
        self.telemetry.lock().clone()
    }

    pub fn is_sd_card_available(&self) -> bool {
        self.telemetry.lock().sd_card_available
    }

    pub fn commands_processed(&self) -> u64 {
        self.telemetry.lock().commands_processed
    }
}

#[async_trait]
impl CommandExecutor for SerialExecutor {
    async fn open(&self) -> bool {
        let stream = match self.opener.open().await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("Failed to open serial port: {}", e);
                return false;
            }
        };
        let telemetry = self.telemetry.clone();
        let banner = move |line: &str| {
            if line.starts_with("echo:SD ") {
                telemetry.lock().sd_card_available = line == "echo:SD card ok";
            }
        };
        match SerialConnection::establish(stream, &self.handshake, banner).await {
            Ok(connection) => {
                *self.connection.lock().await = Some(connection);
                self.telemetry.lock().commands_processed = 0;
                true
            }
            Err(e) => {
                tracing::error!("Serial handshake failed: {}", e);
                false
            }
        }
    }

    async fn close(&self) -> bool {
        if let Some(connection) = self.connection.lock().await.take() {
            connection.close().await;
        }
        true
    }

    async fn execute(&self, raw_code: String, responder: Responder) {
        let connection = self.connection.lock().await;
        let Some(connection) = connection.as_ref() else {
            tracing::error!("Cannot send commands if not connected: {}", raw_code.trim_end());
            responder.done();
            return;
        };
        let telemetry = self.telemetry.clone();
        let data_responder = responder.clone();
        connection.set_data_fn(Box::new(move |line| {
            record_temperatures(&telemetry, line);
            data_responder.data(line);
        }));
        if let Err(e) = connection.send(&raw_code).await {
            tracing::error!("Serial write failed: {}", e);
            responder.done();
            return;
        }
        self.telemetry.lock().commands_processed += 1;
    }
}

fn temperature_regex() -> &'static Regex {
    static TEMPERATURE: OnceLock<Regex> = OnceLock::new();
    TEMPERATURE.get_or_init(|| Regex::new(r"(.):(\d+.\d+)").expect("invalid temperature regex"))
}

/// Picks `T:` (extruder) and `B:` (bed) readings out of any reply.
fn record_temperatures(telemetry: &Mutex<Telemetry>, line: &str) {
    for captures in temperature_regex().captures_iter(line) {
        let Ok(value) = captures[2].parse::<f64>() else {
            continue;
        };
        match &captures[1] {
            "T" => telemetry.lock().extruder_temp = Some(value),
            "B" => telemetry.lock().base_plate_temp = Some(value),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temperatures_are_tracked() {
        let telemetry = Mutex::new(Telemetry::default());
        record_temperatures(&telemetry, "ok T:201.3 /210.0 B:59.8 /60.0 @:64");
        let t = telemetry.lock().clone();
        assert_eq!(t.extruder_temp, Some(201.3));
        assert_eq!(t.base_plate_temp, Some(59.8));

        record_temperatures(&telemetry, "X:10.00Y:20.00Z:0.30E:1.50");
        assert_eq!(telemetry.lock().extruder_temp, Some(201.3));
    }
}

use async_trait::async_trait;
use parking_lot::Mutex;
use printmgr_rs::config::SerialConfig;
use printmgr_rs::printers::serial::{PortOpener, SD_CARD_FILENAME};
use printmgr_rs::printers::SerialPrinter;
use printmgr_rs::{Asset, DriverEvent, PrinterDriver};
use printmgr_shared::{DriverError, DriverState, PrinterType, SupportedConnection};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// A Marlin-like device on the far end of an in-memory pipe.
struct FakeFirmware {
    sd_card: bool,
    log: Arc<Mutex<Vec<String>>>,
    sd_progress: Arc<Mutex<VecDeque<u64>>>,
}

impl FakeFirmware {
    fn new(sd_card: bool, sd_progress: &[u64]) -> Arc<Self> {
        Arc::new(Self {
            sd_card,
            log: Arc::new(Mutex::new(Vec::new())),
            sd_progress: Arc::new(Mutex::new(sd_progress.iter().copied().collect())),
        })
    }

    fn received(&self, code: &str) -> bool {
        self.log.lock().iter().any(|line| line == code)
    }
}

fn reply_to(line: &str, sd_card: bool, sd_progress: &Mutex<VecDeque<u64>>) -> String {
    let code = line.split_whitespace().next().unwrap_or("");
    match code {
        "M115" if sd_card => "echo:SD card ok\nok\n".to_string(),
        "M115" => "echo:SD init fail\nok\n".to_string(),
        "M29" => "Done saving file.\n".to_string(),
        "M27" => {
            let mut progress = sd_progress.lock();
            let done = if progress.len() > 1 {
                progress.pop_front().unwrap_or(0)
            } else {
                progress.front().copied().unwrap_or(0)
            };
            format!("SD printing byte {}/100\nok\n", done)
        }
        "M114" => "X:10.00Y:20.00Z:0.30E:15.50 Count X: 10.00\nok\n".to_string(),
        "M105" => "ok T:201.5 /210.0 B:60.5 /60.0 @:64\n".to_string(),
        _ => "ok\n".to_string(),
    }
}

#[async_trait]
impl PortOpener for FakeFirmware {
    async fn open(&self) -> std::io::Result<printmgr_rs::printers::serial::connection::BoxedStream> {
        let (host, device) = tokio::io::duplex(64 * 1024);
        let log = self.log.clone();
        let sd_progress = self.sd_progress.clone();
        let sd_card = self.sd_card;
        tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(device);
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let reply = reply_to(&line, sd_card, &sd_progress);
                log.lock().push(line);
                if write.write_all(reply.as_bytes()).await.is_err() {
                    break;
                }
            }
        });
        Ok(Box::new(host))
    }
}

fn serial_printer_type() -> PrinterType {
    PrinterType {
        id: "test-marlin".into(),
        supported_connections: vec![SupportedConnection {
            kind: "serial".into(),
            protocol: "marlin".into(),
            baud: Some(115200),
        }],
        ..Default::default()
    }
}

fn fast_settings() -> SerialConfig {
    SerialConfig {
        port: "fake".into(),
        handshake_interval_ms: 10,
        handshake_wait_count: 5,
        handshake_retries: 2,
        status_interval_ms: 10,
        heartbeat_ms: 10,
        ..Default::default()
    }
}

fn model(dir: &Path) -> PathBuf {
    let path = dir.join("model.gcode");
    std::fs::write(&path, "; sliced\nG28\nG1 X10 ; first move\nM104 S200\n").unwrap();
    path
}

async fn wait_until(what: &str, done: impl Fn() -> bool) {
    for _ in 0..1500 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("timed out waiting for {}", what);
}

async fn wait_for_state(printer: &SerialPrinter, state: DriverState) {
    wait_until(&format!("state {}", state), || printer.state() == state).await;
}

#[tokio::test]
async fn sd_card_job_uploads_then_prints() {
    let dir = tempfile::tempdir().unwrap();
    let firmware = FakeFirmware::new(true, &[40, 100]);
    let printer = SerialPrinter::new(serial_printer_type(), fast_settings(), firmware.clone());
    assert_eq!(printer.state(), DriverState::Ready);

    let response = printer.loadmodel(Asset::file(model(dir.path()))).await;
    assert!(response.success);
    wait_for_state(&printer, DriverState::ModelLoaded).await;
    assert!(firmware.received(&format!("M28 {}", SD_CARD_FILENAME)));
    assert!(firmware.received("G1 X10 "));
    assert!(firmware.received("M29"));
    assert!(!firmware.received("; sliced"));
    assert_eq!(printer.print_method().as_str(), "SD card");

    assert!(printer.print().await.success);
    wait_for_state(&printer, DriverState::Ready).await;
    assert!(firmware.received(&format!("M23 {}", SD_CARD_FILENAME)));
    assert!(firmware.received("M24"));
    assert!(firmware.received("M27"));
    wait_until("port closed", || !printer.queue().is_open()).await;
}

#[tokio::test]
async fn streaming_job_sends_every_line() {
    let dir = tempfile::tempdir().unwrap();
    let firmware = FakeFirmware::new(false, &[]);
    let printer = SerialPrinter::new(serial_printer_type(), fast_settings(), firmware.clone());
    let mut events = printer.subscribe();

    printer.loadmodel(Asset::file(model(dir.path()))).await;
    wait_for_state(&printer, DriverState::ModelLoaded).await;
    assert_eq!(printer.print_method().as_str(), "streaming");
    assert!(printer.queue().is_open());

    assert!(printer.print().await.success);
    let status = printer.status().await;
    assert_eq!(status.job.print_method.as_deref(), Some("streaming"));
    wait_for_state(&printer, DriverState::Ready).await;

    let sent: Vec<String> = firmware
        .log
        .lock()
        .iter()
        .filter(|line| !line.starts_with("M115"))
        .cloned()
        .collect();
    assert_eq!(sent, vec!["G28", "G1 X10 ", "M104 S200"]);
    assert!(!firmware.received(&format!("M28 {}", SD_CARD_FILENAME)));

    let mut completed = None;
    while let Ok(event) = events.try_recv() {
        if let DriverEvent::Status(status) = event {
            completed = Some(status);
        }
    }
    assert_eq!(completed.unwrap().job.percent_complete, Some(100.0));
}

#[tokio::test]
async fn pause_parks_and_resume_returns() {
    let dir = tempfile::tempdir().unwrap();
    let firmware = FakeFirmware::new(true, &[50]);
    let printer = SerialPrinter::new(serial_printer_type(), fast_settings(), firmware.clone());
    printer.loadmodel(Asset::file(model(dir.path()))).await;
    wait_for_state(&printer, DriverState::ModelLoaded).await;
    printer.print().await;
    wait_until("first progress poll", || firmware.received("M27")).await;

    assert!(printer.pause().await.success);
    assert_eq!(printer.state(), DriverState::Paused);
    wait_until("retraction", || firmware.received("G1 E10.5 F4000")).await;
    assert!(firmware.received("M25"));
    assert!(firmware.received("M114"));
    assert!(printer.pause().await.success);

    assert!(printer.resume().await.success);
    assert_eq!(printer.state(), DriverState::Printing);
    wait_until("return move", || firmware.received("G1 X10.00 Y20.00 Z0.30 F9000")).await;
    wait_until("re-extrusion", || firmware.received("G1 E15.5 F4000")).await;
    wait_until("SD seek", || firmware.received("M26 S50")).await;

    assert!(printer.cancel().await.success);
    assert_eq!(printer.state(), DriverState::Busy);
    wait_for_state(&printer, DriverState::Ready).await;
    assert!(firmware.received("G28"));
    printer.cleanup().await;
    assert_eq!(printer.state(), DriverState::Disconnected);
}

#[tokio::test]
async fn missing_model_is_a_bad_asset() {
    let dir = tempfile::tempdir().unwrap();
    let firmware = FakeFirmware::new(true, &[]);
    let printer = SerialPrinter::new(serial_printer_type(), fast_settings(), firmware.clone());
    let response = printer
        .loadmodel(Asset::file(dir.path().join("absent.gcode")))
        .await;
    assert!(response.has_error(DriverError::BadAsset));
    assert_eq!(printer.state(), DriverState::Ready);
    assert!(firmware.log.lock().is_empty());
}

#[tokio::test]
async fn printer_type_without_serial_fails_to_connect() {
    let firmware = FakeFirmware::new(true, &[]);
    let printer_type = PrinterType {
        id: "network-only".into(),
        ..Default::default()
    };
    let printer = SerialPrinter::new(printer_type, fast_settings(), firmware);
    assert_eq!(printer.state(), DriverState::Disconnected);
}

// src/printers/serial/mod.rs - G-code printer on a serial port, streaming or SD card
pub mod connection;
pub mod executor;

pub use connection::{HandshakeOptions, SerialConnection, SerialStream};
pub use executor::{PortOpener, SerialExecutor, SystemPort, Telemetry};

use super::command_queue::{CommandQueue, QueueCommand, QueueItem, ResponseHandler};
use super::driver::{Asset, DriverBase, PrinterDriver};
use super::heartbeat::Heartbeat;
use crate::config::SerialConfig;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use printmgr_shared::{DriverError, DriverResponse, DriverState, PrinterType, Status};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SerialError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No reply to the open handshake")]
    Handshake,
    #[error("Serial connection closed")]
    Closed,
}

/// File name used on the printer's SD card.
pub const SD_CARD_FILENAME: &str = "printmgr.gco";
pub const SAVE_DONE_REPLY: &str = "Done saving file.";
const RESUME_TRAILER: &str = "echo:enqueing \"M84 X Y Z E\"";
const OK_SETTLE: Duration = Duration::from_millis(500);
const CANCEL_REOPEN_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintMethod {
    Streaming,
    SdCard,
}

impl PrintMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PrintMethod::Streaming => "streaming",
            PrintMethod::SdCard => "SD card",
        }
    }
}

/// True when the last line of a reply is `ok`.
pub fn validate_reply_ok(reply: &str) -> bool {
    reply.split("\r\n").last() == Some("ok")
}

fn position_regex() -> &'static Regex {
    static POSITION: OnceLock<Regex> = OnceLock::new();
    POSITION.get_or_init(|| {
        Regex::new(r"^X:(\d+\.\d+)Y:(\d+\.\d+)Z:(\d+\.\d+).*$").expect("invalid position regex")
    })
}

fn extrusion_regex() -> &'static Regex {
    static EXTRUSION: OnceLock<Regex> = OnceLock::new();
    EXTRUSION.get_or_init(|| Regex::new(r".*E:(-?\d+\.\d+).*").expect("invalid extrusion regex"))
}

fn digits_regex() -> &'static Regex {
    static DIGITS: OnceLock<Regex> = OnceLock::new();
    DIGITS.get_or_init(|| Regex::new(r"\d+").expect("invalid digits regex"))
}

/// `X:1.00Y:2.00Z:3.00E:...` from M114 becomes `X1.00 Y2.00 Z3.00`.
pub fn parse_current_position(reply: &str) -> String {
    position_regex().replace(reply, "X$1 Y$2 Z$3").into_owned()
}

/// Extruder position from an M114 reply.
pub fn parse_extrude_length(reply: &str) -> Option<f64> {
    extrusion_regex()
        .captures(reply)
        .and_then(|captures| captures[1].parse().ok())
}

/// `SD printing byte 1234/5678` becomes `(1234, 5678)`.
pub fn parse_sd_progress(reply: &str) -> Option<(u64, u64)> {
    let numbers: Vec<u64> = digits_regex()
        .find_iter(reply)
        .filter_map(|m| m.as_str().parse().ok())
        .collect();
    match numbers.as_slice() {
        [done, total] if *total > 0 => Some((*done, *total)),
        _ => None,
    }
}

/// The non-empty code of each line, with `;` comments removed.
pub fn gcode_lines(text: &str) -> Vec<String> {
    text.split('\n')
        .map(|line| line.split(';').next().unwrap_or("").trim_end_matches('\r'))
        .filter(|code| !code.trim().is_empty())
        .map(str::to_string)
        .collect()
}

/// Handles replies to M24/M25. The `ok` may be followed by a trailer ending
/// with the M84 echo; if nothing follows within half a second the command
/// is complete.
fn pause_resume_command(code: &str, queue: &CommandQueue) -> QueueCommand {
    let queue = queue.clone();
    let settle: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>> = Arc::new(Mutex::new(None));
    QueueCommand::code(code).with_process_data(move |command, data| {
        if let Some(timer) = settle.lock().take() {
            timer.abort();
        }
        if validate_reply_ok(data) {
            let queue = queue.clone();
            let command_id = command.command_id;
            *settle.lock() = Some(tokio::spawn(async move {
                tokio::time::sleep(OK_SETTLE).await;
                queue.complete(command_id);
            }));
            return false;
        }
        data == RESUME_TRAILER
    })
}

#[derive(Debug, Default)]
struct SerialJob {
    /// Set when the model is streamed line by line instead of from SD.
    streaming: Option<PathBuf>,
    return_from_pause: Option<Vec<String>>,
    update_queued: bool,
    total_commands: u64,
    bytes_completed: u64,
    percent_complete: f64,
}

pub struct SerialPrinter {
    base: DriverBase,
    me: Weak<SerialPrinter>,
    printer_type: PrinterType,
    settings: SerialConfig,
    executor: Arc<SerialExecutor>,
    queue: CommandQueue,
    job: Mutex<SerialJob>,
    updater: Heartbeat,
}

impl SerialPrinter {
    /// Builds the driver for a port discovered on the system. The printer
    /// type must list a serial connection; its baud rate wins over the
    /// configured default.
    pub fn open_system(printer_type: PrinterType, settings: SerialConfig) -> Arc<Self> {
        let baud = printer_type
            .connection("serial")
            .and_then(|c| c.baud)
            .unwrap_or(settings.baud);
        let opener = Arc::new(SystemPort {
            path: settings.port.clone(),
            baud,
        });
        Self::new(printer_type, settings, opener)
    }

    pub fn new(
        printer_type: PrinterType,
        settings: SerialConfig,
        opener: Arc<dyn PortOpener>,
    ) -> Arc<Self> {
        let executor = Arc::new(SerialExecutor::new(opener, HandshakeOptions::from(&settings)));
        let reply_ok: ResponseHandler =
            Arc::new(|_: &QueueCommand, reply: &str| validate_reply_ok(reply));
        let queue = CommandQueue::new(
            executor.clone(),
            Arc::new(|code: &str| format!("{}\n", code)),
            Some(reply_ok),
        );
        let has_serial = printer_type.connection("serial").is_some();

        let printer = Arc::new_cyclic(|me: &Weak<SerialPrinter>| {
            let driver: Weak<dyn PrinterDriver> = me.clone();
            let poller = me.clone();
            SerialPrinter {
                base: DriverBase::new(Duration::from_millis(settings.heartbeat_ms), driver),
                me: me.clone(),
                updater: Heartbeat::new(
                    Duration::from_millis(settings.status_interval_ms),
                    Arc::new(move || {
                        if let Some(printer) = poller.upgrade() {
                            printer.update();
                        }
                        async {}.boxed()
                    }),
                ),
                printer_type,
                settings,
                executor,
                queue,
                job: Mutex::new(SerialJob::default()),
            }
        });

        // The port stays closed until a job needs it; discovery has already
        // vetted the device.
        if has_serial {
            printer.base.connected();
        } else {
            printer.base.connection_failed();
        }
        printer
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn executor(&self) -> &SerialExecutor {
        &self.executor
    }

    pub fn print_method(&self) -> PrintMethod {
        if self.job.lock().streaming.is_some() {
            PrintMethod::Streaming
        } else {
            PrintMethod::SdCard
        }
    }

    /// Runs `f` on a task with a strong handle to this printer.
    fn spawn_with(&self, f: impl FnOnce(Arc<SerialPrinter>) -> BoxFuture<'static, ()>) {
        if let Some(me) = self.me.upgrade() {
            tokio::spawn(f(me));
        }
    }

    /// `G1` to the printer type's park position, in millimetres.
    pub fn park_command(&self) -> Option<String> {
        let [x, y, z] = self.printer_type.build_volume.park_position?;
        Some(format!("G1 X{} Y{} Z{} F4000", x * 10.0, y * 10.0, z * 10.0))
    }

    fn start_commands(&self) -> Vec<QueueItem> {
        vec![
            format!("M23 {}", SD_CARD_FILENAME).into(),
            "M24".into(),
        ]
    }

    fn resume_commands(&self) -> Vec<QueueItem> {
        let bytes = self.job.lock().bytes_completed;
        vec![
            format!("M23 {}", SD_CARD_FILENAME).into(),
            format!("M26 S{}", bytes).into(),
            pause_resume_command("M24", &self.queue).into(),
        ]
    }

    async fn ready_to_load_file(&self, asset: &Asset) -> Option<PathBuf> {
        if self.queue.is_open() {
            tracing::warn!("SerialPrinter.loadmodel requires a closed connection");
            return None;
        }
        let path = asset.path()?;
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => Some(path.to_path_buf()),
            Ok(_) => {
                tracing::warn!("Asset is not a file: {:?}", asset);
                None
            }
            Err(e) => {
                tracing::warn!("SerialPrinter.loadmodel bad asset {:?}: {}", asset, e);
                None
            }
        }
    }

    async fn read_gcode(path: &Path) -> Vec<String> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => gcode_lines(&text),
            Err(e) => {
                tracing::warn!("Failed to load model file {}: {}", path.display(), e);
                Vec::new()
            }
        }
    }

    /// Called once the port is open during a load: stream to SD when the
    /// card is present, otherwise remember the file for direct streaming.
    async fn after_load_open(self: Arc<Self>, path: PathBuf) {
        if !self.queue.is_open() {
            self.base.loadmodel_completed(&*self, false).await;
            return;
        }
        if !self.executor.is_sd_card_available() {
            self.job.lock().streaming = Some(path);
            self.base.loadmodel_completed(&*self, true).await;
        } else {
            self.base.set_state(DriverState::LoadingModel);
            self.stream_file_to_sd_card(&path).await;
        }
    }

    /// Writes the model to the SD card between M28 and M29. The connection
    /// is left open for the print that follows.
    async fn stream_file_to_sd_card(&self, path: &Path) {
        let codes = Self::read_gcode(path).await;
        let mut commands: Vec<QueueItem> = Vec::with_capacity(codes.len() + 2);
        commands.push(format!("M28 {}", SD_CARD_FILENAME).into());
        self.job.lock().total_commands = codes.len() as u64;
        commands.extend(codes.into_iter().map(QueueItem::from));

        let me = self.me.clone();
        commands.push(
            QueueCommand::code("M29")
                .with_process_data(move |_, data| {
                    let saved = data == SAVE_DONE_REPLY;
                    if let Some(printer) = me.upgrade() {
                        tokio::spawn(async move {
                            printer.base.loadmodel_completed(&*printer, saved).await;
                        });
                    }
                    true
                })
                .into(),
        );
        self.queue.enqueue(commands);
    }

    /// Queues an M27 progress query while an SD print runs.
    fn update(&self) {
        {
            let job = self.job.lock();
            if job.update_queued {
                return;
            }
        }
        if !matches!(self.state(), DriverState::Printing | DriverState::Paused) || !self.queue.is_open() {
            return;
        }
        let me = self.me.clone();
        self.queue.enqueue(QueueCommand::code("M27").with_process_data(move |_, data| {
            let ok = validate_reply_ok(data);
            if ok {
                return true;
            }
            let (Some(printer), Some((done, total))) = (me.upgrade(), parse_sd_progress(data)) else {
                return false;
            };
            let percent = (100.0 * done as f64 / total as f64).floor();
            {
                let mut job = printer.job.lock();
                job.bytes_completed = done;
                job.percent_complete = percent;
                job.update_queued = percent >= 100.0;
            }
            if percent >= 100.0 {
                printer.updater.pause();
                printer.queue.clear();
                let finished = printer.me.clone();
                printer.queue.enqueue(QueueCommand::close().with_post(move |_| {
                    if let Some(printer) = finished.upgrade() {
                        tokio::spawn(async move {
                            printer.base.print_completed(&*printer).await;
                        });
                    }
                }));
            }
            false
        }));
        self.job.lock().update_queued = true;
    }

    /// Reads the position, retracts, parks and pauses the queue.
    fn pause_position_command(&self) -> QueueCommand {
        let me = self.me.clone();
        QueueCommand::code("M114").with_process_data(move |_, data| {
            if validate_reply_ok(data) {
                return true;
            }
            let Some(printer) = me.upgrade() else {
                return false;
            };
            let Some(extruded) = parse_extrude_length(data) else {
                tracing::debug!("Ignoring reply while waiting for M114: {}", data);
                return false;
            };
            let return_move = format!("G1 {} F9000", parse_current_position(data));
            let re_extrude = format!("G1 E{} F4000", extruded);
            printer.job.lock().return_from_pause = Some(vec![return_move, re_extrude]);

            let retract = format!("G1 E{} F4000", extruded - printer.settings.pause_retraction);
            let queue = printer.queue.clone();
            let mut park = QueueCommand::default().with_post(move |_| queue.pause());
            park.code = printer.park_command();
            printer.queue.prepend(vec![QueueItem::from(retract), park.into()]);
            false
        })
    }
}

#[async_trait]
impl PrinterDriver for SerialPrinter {
    fn base(&self) -> &DriverBase {
        &self.base
    }

    async fn loadmodel(&self, asset: Asset) -> DriverResponse {
        let response = self.base.loadmodel();
        if !response.success {
            return response;
        }
        let Some(path) = self.ready_to_load_file(&asset).await else {
            self.base.loadmodel_completed(self, false).await;
            return DriverResponse::failure(self.state(), DriverError::BadAsset);
        };
        self.job.lock().percent_complete = 0.0;

        // SD card presence is only known once the port is open.
        let me = self.me.clone();
        self.queue.enqueue(QueueCommand::open().with_post(move |_| {
            if let Some(printer) = me.upgrade() {
                tokio::spawn(printer.after_load_open(path.clone()));
            }
        }));
        DriverResponse::success(self.state())
    }

    async fn print(&self) -> DriverResponse {
        let response = self.base.print();
        if !response.success {
            return response;
        }
        let streaming = {
            let mut job = self.job.lock();
            job.percent_complete = 0.0;
            job.total_commands = 0;
            job.streaming.clone()
        };

        match streaming {
            Some(path) => {
                if !tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_file()) {
                    return DriverResponse::failure(self.state(), DriverError::ModelNotLoaded);
                }
                if !self.queue.is_open() {
                    return DriverResponse::failure(self.state(), DriverError::BadState);
                }
                let codes = Self::read_gcode(&path).await;
                self.job.lock().total_commands = codes.len() as u64;
                let mut commands: Vec<QueueItem> = codes.into_iter().map(QueueItem::from).collect();
                let me = self.me.clone();
                commands.push(
                    QueueCommand::close()
                        .with_post(move |_| {
                            if let Some(printer) = me.upgrade() {
                                tokio::spawn(async move {
                                    printer.base.print_completed(&*printer).await;
                                });
                            }
                        })
                        .into(),
                );
                self.queue.enqueue(commands);
            }
            None => {
                self.queue.enqueue(self.start_commands());
                self.job.lock().update_queued = false;
                self.updater.start();
            }
        }
        DriverResponse::success(self.state())
    }

    async fn cancel(&self) -> DriverResponse {
        let response = self.base.cancel();
        if !response.success {
            return response;
        }
        if self.queue.is_open() {
            self.base.set_state(DriverState::Busy);
            self.queue.clear();
            // Reopening resets the firmware, which also stops any heating.
            let me = self.me.clone();
            self.queue.enqueue(vec![
                QueueItem::from(QueueCommand::close()),
                QueueCommand::delay(CANCEL_REOPEN_DELAY).into(),
                QueueCommand::open().into(),
                "G28".into(),
                QueueCommand::close()
                    .with_post(move |_| {
                        if let Some(printer) = me.upgrade() {
                            printer.base.set_state(DriverState::Ready);
                        }
                    })
                    .into(),
            ]);
        }
        DriverResponse::success(self.state())
    }

    async fn pause(&self) -> DriverResponse {
        if self.state() == DriverState::Paused {
            return DriverResponse::success(self.state());
        }
        let response = self.base.pause();
        if !response.success {
            return response;
        }
        let mut commands: Vec<QueueItem> = Vec::new();
        if self.job.lock().streaming.is_none() {
            commands.push(pause_resume_command("M25", &self.queue).into());
        }
        commands.push(self.pause_position_command().into());
        self.queue.prepend(commands);
        response
    }

    async fn resume(&self) -> DriverResponse {
        let response = self.base.resume();
        let returning = self.job.lock().return_from_pause.take();
        if response.success {
            if let Some(return_moves) = returning {
                let mut commands: Vec<QueueItem> = return_moves.into_iter().map(QueueItem::from).collect();
                if self.job.lock().streaming.is_none() {
                    commands.extend(self.resume_commands());
                }
                self.queue.prepend(commands);
                self.job.lock().update_queued = false;
            }
        } else if let Some(return_moves) = returning {
            self.job.lock().return_from_pause = Some(return_moves);
        }
        response
    }

    async fn status(&self) -> Status {
        let state = self.state();
        let mut status = Status::new(state);
        if !matches!(
            state,
            DriverState::Printing | DriverState::Paused | DriverState::LoadingModel
        ) {
            return status;
        }
        let method = self.print_method();
        let (total, percent) = {
            let job = self.job.lock();
            (job.total_commands, job.percent_complete)
        };
        let telemetry = self.executor.telemetry();
        status.job.percent_complete = Some(if total > 0 {
            (telemetry.commands_processed as f64 * 100.0 / total as f64).round()
        } else {
            percent
        });
        status.job.print_method = Some(method.as_str().to_string());
        if let Some(t) = telemetry.extruder_temp {
            status.temperature_sensor("extruder1", t);
        }
        if let Some(t) = telemetry.base_plate_temp {
            status.temperature_sensor("basePlate", t);
        }
        status
    }

    async fn cleanup(&self) -> DriverResponse {
        let response = self.base.cleanup();
        self.updater.clear();
        self.queue.cleanup();
        response
    }
}

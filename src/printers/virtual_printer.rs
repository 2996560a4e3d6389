// src/printers/virtual_printer.rs - simulated printer with timed load and print
use super::driver::{route_command, Asset, CommandParams, DriverBase, PrinterDriver};
use crate::config::VirtualPrinterConfig;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use printmgr_shared::{DriverCommand, DriverError, DriverResponse, DriverState, Status};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

pub const CUSTOM_COMMANDS: [&str; 3] = ["custom command #1", "custom command #2", "custom command #3"];

#[derive(Debug, Default)]
struct Simulation {
    model_loaded: bool,
    progress: f64,
}

pub struct VirtualPrinter {
    base: DriverBase,
    config: VirtualPrinterConfig,
    me: Weak<VirtualPrinter>,
    sim: Mutex<Simulation>,
    delay: Mutex<Option<JoinHandle<()>>>,
}

impl VirtualPrinter {
    /// Creates the printer and connects it immediately.
    pub fn new(config: VirtualPrinterConfig) -> Arc<Self> {
        let printer = Arc::new_cyclic(|me: &Weak<VirtualPrinter>| {
            let driver: Weak<dyn PrinterDriver> = me.clone();
            VirtualPrinter {
                base: DriverBase::new(Duration::from_millis(config.heartbeat_ms), driver),
                config,
                me: me.clone(),
                sim: Mutex::new(Simulation::default()),
                delay: Mutex::new(None),
            }
        });
        printer.base.connected();
        printer
    }

    pub fn working_dir(&self) -> &Path {
        &self.config.working_dir
    }

    pub fn progress(&self) -> f64 {
        self.sim.lock().progress
    }

    fn stop_delay(&self) {
        if let Some(task) = self.delay.lock().take() {
            task.abort();
        }
    }

    fn start_delay<F>(&self, run: F)
    where
        F: FnOnce(Arc<VirtualPrinter>) -> BoxFuture<'static, ()>,
    {
        let Some(me) = self.me.upgrade() else {
            return;
        };
        let task = tokio::spawn(run(me));
        if let Some(previous) = self.delay.lock().replace(task) {
            previous.abort();
        }
    }

    async fn simulate_load(self: Arc<Self>, source: PathBuf, destination: PathBuf) {
        let tick = Duration::from_millis(self.config.load_tick_ms);
        for _ in 0..self.config.load_ticks {
            tokio::time::sleep(tick).await;
        }
        let copied = async {
            tokio::fs::create_dir_all(&self.config.working_dir).await?;
            tokio::fs::copy(&source, &destination).await
        }
        .await;
        let success = match copied {
            Ok(bytes) => {
                tracing::debug!("Virtual printer loaded {} bytes into {}", bytes, destination.display());
                self.sim.lock().model_loaded = true;
                true
            }
            Err(e) => {
                tracing::error!("Virtual printer failed to load {}: {}", source.display(), e);
                false
            }
        };
        self.base.loadmodel_completed(self.as_ref(), success).await;
    }

    async fn simulate_print(self: Arc<Self>) {
        let total = self.config.print_ticks.max(1);
        let step = (100.0 / total as f64).round();
        let mut ticks = 0;
        let mut timer = tokio::time::interval(Duration::from_millis(self.config.print_tick_ms));
        timer.tick().await;
        loop {
            timer.tick().await;
            if self.state() == DriverState::Printing {
                ticks += 1;
                self.sim.lock().progress += step;
            }
            tracing::debug!("progress = {}", self.progress());
            if ticks >= total {
                self.sim.lock().progress = 100.0;
                self.base.print_completed(self.as_ref()).await;
                return;
            }
        }
    }
}

#[async_trait]
impl PrinterDriver for VirtualPrinter {
    fn base(&self) -> &DriverBase {
        &self.base
    }

    async fn loadmodel(&self, asset: Asset) -> DriverResponse {
        let response = self.base.loadmodel();
        if !response.success {
            return response;
        }

        let Some((source, destination)) = asset
            .path()
            .and_then(|path| Some((path.to_path_buf(), self.working_dir().join(path.file_name()?))))
        else {
            tracing::debug!("VirtualPrinter.loadmodel bad asset {:?}", asset);
            self.base.loadmodel_completed(self, false).await;
            return DriverResponse::failure(self.state(), DriverError::BadAsset);
        };

        let _ = tokio::fs::remove_file(&destination).await;
        self.start_delay(move |me| me.simulate_load(source, destination).boxed());
        DriverResponse::success(self.state())
    }

    async fn print(&self) -> DriverResponse {
        let response = self.base.print();
        if !response.success {
            return response;
        }
        if !self.sim.lock().model_loaded {
            return DriverResponse::failure(self.state(), DriverError::ModelNotLoaded);
        }
        self.sim.lock().progress = 0.0;
        self.start_delay(|me| me.simulate_print().boxed());
        DriverResponse::success(self.state())
    }

    async fn cancel(&self) -> DriverResponse {
        let response = self.base.cancel();
        if !response.success {
            return response;
        }
        self.sim.lock().progress = 0.0;
        self.stop_delay();
        DriverResponse::success(self.state())
    }

    async fn pause(&self) -> DriverResponse {
        self.base.pause()
    }

    async fn resume(&self) -> DriverResponse {
        self.base.resume()
    }

    async fn status(&self) -> Status {
        let state = self.state();
        let mut status = Status::new(state);
        if matches!(state, DriverState::Printing | DriverState::Paused) {
            status.job.percent_complete = Some(self.progress());
        }
        status
    }

    async fn command(&self, params: CommandParams) -> DriverResponse {
        match params.kind() {
            DriverCommand::Other(name) if CUSTOM_COMMANDS.contains(&name.as_str()) => {
                tracing::debug!("Received custom command: {:?}", params);
                DriverResponse::success(self.state())
            }
            _ => route_command(self, params).await,
        }
    }

    async fn cleanup(&self) -> DriverResponse {
        self.stop_delay();
        self.base.cleanup()
    }
}

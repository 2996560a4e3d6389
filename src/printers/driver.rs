// src/printers/driver.rs - driver lifecycle shared by every transport
use super::heartbeat::Heartbeat;
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use printmgr_shared::{DriverCommand, DriverError, DriverResponse, DriverState, Status};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;

/// Delay between a successful connect and the `Ready` event.
pub const READY_EVENT_DELAY: Duration = Duration::from_millis(100);

/// A model to load onto a printer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Asset {
    File { path: PathBuf },
    Url { url: String },
}

impl Asset {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Asset::File { path: path.into() }
    }

    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Asset::File { path } => Some(path),
            Asset::Url { .. } => None,
        }
    }
}

/// Parameters of a device specific command: `{ "command": <name>, ... }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandParams {
    pub command: String,
    #[serde(flatten)]
    pub args: serde_json::Map<String, serde_json::Value>,
}

impl CommandParams {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: serde_json::Map::new(),
        }
    }

    pub fn kind(&self) -> DriverCommand {
        DriverCommand::parse(&self.command)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    /// The driver connected and is ready for work.
    Ready,
    ConnectionFailed,
    /// Periodic job progress.
    Status(Status),
    StateChanged(DriverState),
}

/// The API every printer driver exposes. Implementors hold a [`DriverBase`]
/// and call its transition methods so the state table stays identical
/// across transports.
#[async_trait]
pub trait PrinterDriver: Send + Sync {
    fn base(&self) -> &DriverBase;

    fn state(&self) -> DriverState {
        self.base().state()
    }

    fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.base().subscribe()
    }

    async fn loadmodel(&self, asset: Asset) -> DriverResponse;

    async fn print(&self) -> DriverResponse;

    async fn cancel(&self) -> DriverResponse;

    async fn pause(&self) -> DriverResponse;

    async fn resume(&self) -> DriverResponse;

    /// A fresh status snapshot.
    async fn status(&self) -> Status;

    async fn get_status(&self) -> DriverResponse {
        DriverResponse::with_status(self.status().await)
    }

    /// Job control commands are routed to their methods; anything else is
    /// an unknown command.
    async fn command(&self, params: CommandParams) -> DriverResponse {
        route_command(self, params).await
    }

    async fn cleanup(&self) -> DriverResponse;
}

/// Shared handling of the `command` entry point.
pub async fn route_command<D: PrinterDriver + ?Sized>(
    driver: &D,
    params: CommandParams,
) -> DriverResponse {
    match params.kind() {
        DriverCommand::Print => driver.print().await,
        DriverCommand::Cancel => driver.cancel().await,
        DriverCommand::Pause => driver.pause().await,
        DriverCommand::Resume => driver.resume().await,
        DriverCommand::Status | DriverCommand::GetStatus => driver.get_status().await,
        _ => {
            tracing::debug!("Received unknown command: {:?}", params);
            DriverResponse::failure(driver.state(), DriverError::UnknownCommand)
        }
    }
}

/// State, progress heartbeat and event channel behind every driver.
pub struct DriverBase {
    state: Mutex<DriverState>,
    events: broadcast::Sender<DriverEvent>,
    progress: Heartbeat,
}

impl DriverBase {
    /// `driver` is the owning driver, polled for status on each heartbeat.
    /// Build the driver with `Arc::new_cyclic` to obtain it.
    pub fn new(heartbeat: Duration, driver: Weak<dyn PrinterDriver>) -> Self {
        let (events, _) = broadcast::channel(64);
        let tick_events = events.clone();
        let progress = Heartbeat::new(
            heartbeat,
            Arc::new(move || {
                let driver = driver.clone();
                let events = tick_events.clone();
                async move {
                    if let Some(driver) = driver.upgrade() {
                        send_progress(driver.as_ref(), &events).await;
                    }
                }
                .boxed()
            }),
        );
        Self {
            state: Mutex::new(DriverState::Disconnected),
            events,
            progress,
        }
    }

    pub fn state(&self) -> DriverState {
        *self.state.lock()
    }

    /// Sets the state directly. Transport drivers use this for states the
    /// shared table does not cover (BUSY while a cancel settles).
    pub fn set_state(&self, state: DriverState) {
        self.update(|_| state);
    }

    /// Replaces the state with `next(current)` under one lock and returns
    /// the new state.
    pub fn update(&self, next: impl FnOnce(DriverState) -> DriverState) -> DriverState {
        let mut state = self.state.lock();
        let previous = *state;
        *state = next(previous);
        self.announce(previous, *state);
        *state
    }

    /// Moves to `to` if the current state is one of `from`. The check and
    /// the write happen under one lock, so of two racing callers only one
    /// can leave a given state. Returns the state that was left.
    pub fn transition(
        &self,
        from: &[DriverState],
        to: DriverState,
    ) -> Result<DriverState, DriverResponse> {
        let mut state = self.state.lock();
        let previous = *state;
        if !from.contains(&previous) {
            return Err(DriverResponse::failure(previous, DriverError::BadState));
        }
        *state = to;
        self.announce(previous, to);
        Ok(previous)
    }

    // Called with the state lock held so events arrive in state order.
    fn announce(&self, previous: DriverState, state: DriverState) {
        if previous != state {
            tracing::debug!("Driver state {} -> {}", previous, state);
            let _ = self.events.send(DriverEvent::StateChanged(state));
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: DriverEvent) {
        let _ = self.events.send(event);
    }

    pub fn progress_heartbeat(&self) -> &Heartbeat {
        &self.progress
    }

    /// DISCONNECTED or CONNECTING -> READY. The `Ready` event follows
    /// shortly after.
    pub fn connected(&self) -> DriverResponse {
        if let Err(response) = self.transition(
            &[DriverState::Disconnected, DriverState::Connecting],
            DriverState::Ready,
        ) {
            return response;
        }
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(READY_EVENT_DELAY).await;
            let _ = events.send(DriverEvent::Ready);
        });
        DriverResponse::success(DriverState::Ready)
    }

    pub fn connection_failed(&self) -> DriverResponse {
        tracing::warn!("failed to connect");
        self.set_state(DriverState::Disconnected);
        self.emit(DriverEvent::ConnectionFailed);
        DriverResponse::success(DriverState::Disconnected)
    }

    /// READY -> LOADING_MODEL, with progress reporting started.
    pub fn loadmodel(&self) -> DriverResponse {
        if let Err(response) = self.transition(&[DriverState::Ready], DriverState::LoadingModel) {
            return response;
        }
        tracing::debug!("Loading model started");
        self.progress.start();
        DriverResponse::success(DriverState::LoadingModel)
    }

    pub async fn loadmodel_completed(&self, driver: &dyn PrinterDriver, success: bool) {
        tracing::debug!("Model loaded, success: {}", success);
        self.progress.pause();
        self.set_state(if success {
            DriverState::ModelLoaded
        } else {
            DriverState::Ready
        });
        send_progress(driver, &self.events).await;
    }

    /// MODEL_LOADED -> PRINTING.
    pub fn print(&self) -> DriverResponse {
        if let Err(response) = self.transition(&[DriverState::ModelLoaded], DriverState::Printing) {
            return response;
        }
        tracing::debug!("Print started");
        self.progress.start();
        DriverResponse::success(DriverState::Printing)
    }

    /// Reports final progress, then returns to READY.
    pub async fn print_completed(&self, driver: &dyn PrinterDriver) {
        tracing::debug!("Print completed");
        self.progress.pause();
        send_progress(driver, &self.events).await;
        self.set_state(DriverState::Ready);
    }

    pub fn cancel(&self) -> DriverResponse {
        let cancellable = [
            DriverState::Printing,
            DriverState::LoadingModel,
            DriverState::Paused,
        ];
        if let Err(response) = self.transition(&cancellable, DriverState::Ready) {
            return response;
        }
        tracing::debug!("Print canceled");
        self.progress.pause();
        DriverResponse::success(DriverState::Ready)
    }

    /// PRINTING -> PAUSED; a no-op success when already paused.
    pub fn pause(&self) -> DriverResponse {
        match self.transition(
            &[DriverState::Printing, DriverState::Paused],
            DriverState::Paused,
        ) {
            Ok(DriverState::Printing) => {
                self.progress.pause();
                DriverResponse::success(DriverState::Paused)
            }
            Ok(_) => DriverResponse::success(DriverState::Paused),
            Err(response) => response,
        }
    }

    /// PAUSED -> PRINTING; a no-op success when already printing.
    pub fn resume(&self) -> DriverResponse {
        match self.transition(
            &[DriverState::Paused, DriverState::Printing],
            DriverState::Printing,
        ) {
            Ok(DriverState::Paused) => {
                self.progress.resume();
                DriverResponse::success(DriverState::Printing)
            }
            Ok(_) => DriverResponse::success(DriverState::Printing),
            Err(response) => response,
        }
    }

    /// Always succeeds and always ends DISCONNECTED.
    pub fn cleanup(&self) -> DriverResponse {
        self.progress.clear();
        self.set_state(DriverState::Disconnected);
        DriverResponse::success(DriverState::Disconnected)
    }
}

async fn send_progress(driver: &dyn PrinterDriver, events: &broadcast::Sender<DriverEvent>) {
    let status = driver.status().await;
    if status.state != DriverState::Disconnected && status.state != DriverState::Connecting {
        tracing::debug!("sending status");
        let _ = events.send(DriverEvent::Status(status));
    }
}

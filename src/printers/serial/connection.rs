// src/printers/serial/connection.rs - line-oriented serial link with open handshake
use super::SerialError;
use crate::config::SerialConfig;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

/// Anything a serial link can run over: a real port or an in-memory pipe.
pub trait SerialStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> SerialStream for T {}

pub type BoxedStream = Box<dyn SerialStream>;

pub type DataFn = Box<dyn FnMut(&str) + Send>;

/// Query sent once the port has gone quiet after opening.
pub const HANDSHAKE_QUERY: &str = "M115";

#[derive(Debug, Clone)]
pub struct HandshakeOptions {
    /// Written right after the port opens; empty for printers that talk first.
    pub open_prime: String,
    pub interval: Duration,
    /// Ticks to wait for an expected reply before retrying.
    pub wait_count: u32,
    pub retries: u32,
}

impl From<&SerialConfig> for HandshakeOptions {
    fn from(config: &SerialConfig) -> Self {
        Self {
            open_prime: config.open_prime.clone(),
            interval: Duration::from_millis(config.handshake_interval_ms),
            wait_count: config.handshake_wait_count,
            retries: config.handshake_retries,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Opened,
    DataExpected,
    DataReceived,
    QuerySent,
    QueryAcknowledged,
    Connected,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStep {
    Wait,
    SendQuery,
    Connected,
    Failed,
}

/// Settles the burst of output many firmwares print on open. Once the port
/// has been quiet for a tick an `M115` is sent; its `ok` completes the
/// handshake.
#[derive(Debug, Clone)]
pub struct Handshake {
    state: HandshakeState,
    wait_count: u32,
    wait: u32,
    retries: u32,
}

impl Handshake {
    pub fn new(options: &HandshakeOptions) -> Self {
        Self {
            state: HandshakeState::Opened,
            wait_count: options.wait_count,
            wait: options.wait_count,
            retries: options.retries,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn on_line(&mut self, line: &str) {
        self.state = match self.state {
            HandshakeState::Opened => HandshakeState::DataExpected,
            HandshakeState::DataExpected => HandshakeState::DataReceived,
            HandshakeState::QuerySent if line == "ok" => HandshakeState::QueryAcknowledged,
            other => other,
        };
    }

    pub fn on_tick(&mut self) -> HandshakeStep {
        match self.state {
            HandshakeState::DataReceived => {
                self.state = HandshakeState::DataExpected;
                self.wait = self.wait_count;
                HandshakeStep::Wait
            }
            HandshakeState::DataExpected => {
                self.state = HandshakeState::QuerySent;
                self.wait = self.wait_count;
                HandshakeStep::SendQuery
            }
            HandshakeState::QueryAcknowledged => {
                self.state = HandshakeState::Connected;
                HandshakeStep::Connected
            }
            HandshakeState::Opened | HandshakeState::QuerySent => {
                self.wait = self.wait.saturating_sub(1);
                if self.wait > 0 {
                    return HandshakeStep::Wait;
                }
                self.retries = self.retries.saturating_sub(1);
                if self.retries > 0 {
                    self.state = HandshakeState::DataExpected;
                    return HandshakeStep::Wait;
                }
                self.state = HandshakeState::Failed;
                HandshakeStep::Failed
            }
            HandshakeState::Connected => HandshakeStep::Connected,
            HandshakeState::Failed => HandshakeStep::Failed,
        }
    }
}

/// An open, handshaken serial link. Incoming lines go to the current data
/// function.
pub struct SerialConnection {
    writer: tokio::sync::Mutex<WriteHalf<BoxedStream>>,
    data_fn: Arc<Mutex<Option<DataFn>>>,
    reader: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

impl SerialConnection {
    /// Runs the open handshake over `stream`. Every line received before
    /// the link settles is passed to `init_data`.
    pub async fn establish(
        stream: BoxedStream,
        options: &HandshakeOptions,
        mut init_data: impl FnMut(&str) + Send,
    ) -> Result<Self, SerialError> {
        let (read_half, mut writer) = tokio::io::split(stream);
        let (line_tx, mut line_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_lines(read_half, line_tx));

        if !options.open_prime.is_empty() {
            if let Err(e) = write_line(&mut writer, &options.open_prime).await {
                reader.abort();
                return Err(e);
            }
        }

        let mut handshake = Handshake::new(options);
        let mut ticker = interval_at(Instant::now() + options.interval, options.interval);
        loop {
            tokio::select! {
                line = line_rx.recv() => match line {
                    Some(line) => {
                        tracing::debug!("Initial serial response: {}", line);
                        init_data(&line);
                        handshake.on_line(&line);
                    }
                    None => return Err(SerialError::Closed),
                },
                _ = ticker.tick() => match handshake.on_tick() {
                    HandshakeStep::Wait => {}
                    HandshakeStep::SendQuery => {
                        if let Err(e) = write_line(&mut writer, HANDSHAKE_QUERY).await {
                            reader.abort();
                            return Err(e);
                        }
                    }
                    HandshakeStep::Connected => break,
                    HandshakeStep::Failed => {
                        tracing::warn!("Failed to receive responses opening or after {}, giving up", HANDSHAKE_QUERY);
                        reader.abort();
                        return Err(SerialError::Handshake);
                    }
                },
            }
        }

        let data_fn: Arc<Mutex<Option<DataFn>>> = Arc::new(Mutex::new(None));
        let dispatch_fn = data_fn.clone();
        let dispatcher = tokio::spawn(async move {
            while let Some(line) = line_rx.recv().await {
                match dispatch_fn.lock().as_mut() {
                    Some(f) => f(&line),
                    None => tracing::debug!("Unclaimed serial data: {}", line),
                }
            }
        });
        tracing::info!("Serial connection established");

        Ok(Self {
            writer: tokio::sync::Mutex::new(writer),
            data_fn,
            reader,
            dispatcher,
        })
    }

    pub fn set_data_fn(&self, f: DataFn) {
        *self.data_fn.lock() = Some(f);
    }

    pub async fn send(&self, raw: &str) -> Result<(), SerialError> {
        tracing::debug!("Serial TX: {}", raw.trim_end());
        let mut writer = self.writer.lock().await;
        writer.write_all(raw.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    pub async fn close(self) {
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            tracing::error!("Failed closing the port: {}", e);
        }
        self.reader.abort();
        self.dispatcher.abort();
    }
}

async fn write_line(writer: &mut WriteHalf<BoxedStream>, line: &str) -> Result<(), SerialError> {
    tracing::debug!("Serial TX: {}", line);
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

async fn read_lines(read_half: ReadHalf<BoxedStream>, lines: mpsc::UnboundedSender<String>) {
    let mut reader = BufReader::new(read_half).lines();
    loop {
        match reader.next_line().await {
            Ok(Some(line)) => {
                tracing::trace!("Serial RX: {}", line);
                if lines.send(line).is_err() {
                    break;
                }
            }
            Ok(None) => {
                tracing::info!("Serial connection closed by remote");
                break;
            }
            Err(e) => {
                tracing::error!("Serial read error: {}", e);
                break;
            }
        }
    }
}

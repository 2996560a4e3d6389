// src/printers/command_queue.rs - serialized command execution against one device connection
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

pub type Callback = Arc<dyn Fn(&QueueCommand) + Send + Sync>;

/// Inspects one response line for a command; returns true once the command
/// is complete.
pub type ResponseHandler = Arc<dyn Fn(&QueueCommand, &str) -> bool + Send + Sync>;

pub type ExpandCode = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Performs the device I/O for a queue.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn open(&self) -> bool;

    async fn close(&self) -> bool;

    /// Sends `raw_code`. Response lines go to `responder.data()`; executors
    /// that expect no structured reply call `responder.done()` instead.
    async fn execute(&self, raw_code: String, responder: Responder);
}

/// A unit of work for the queue. Only one of `open`, `close`, `delay` and
/// `raw_code` should be set; a command with none of them completes
/// immediately.
#[derive(Clone, Default)]
pub struct QueueCommand {
    pub code: Option<String>,
    pub raw_code: Option<String>,
    pub open: bool,
    pub close: bool,
    pub delay: Option<Duration>,
    pub pre_callback: Option<Callback>,
    pub post_callback: Option<Callback>,
    pub process_data: Option<ResponseHandler>,
    /// Assigned when the command is dequeued.
    pub command_id: u64,
}

impl fmt::Debug for QueueCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueCommand")
            .field("code", &self.code)
            .field("raw_code", &self.raw_code)
            .field("open", &self.open)
            .field("close", &self.close)
            .field("delay", &self.delay)
            .field("command_id", &self.command_id)
            .finish()
    }
}

impl QueueCommand {
    pub fn code(code: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            ..Default::default()
        }
    }

    pub fn raw(raw_code: impl Into<String>) -> Self {
        Self {
            raw_code: Some(raw_code.into()),
            ..Default::default()
        }
    }

    pub fn open() -> Self {
        Self {
            open: true,
            ..Default::default()
        }
    }

    pub fn close() -> Self {
        Self {
            close: true,
            ..Default::default()
        }
    }

    pub fn delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    /// A command that only runs `callback` at its turn in the queue.
    pub fn callback(callback: impl Fn(&QueueCommand) + Send + Sync + 'static) -> Self {
        Self::default().with_post(callback)
    }

    pub fn with_pre(mut self, callback: impl Fn(&QueueCommand) + Send + Sync + 'static) -> Self {
        self.pre_callback = Some(Arc::new(callback));
        self
    }

    pub fn with_post(mut self, callback: impl Fn(&QueueCommand) + Send + Sync + 'static) -> Self {
        self.post_callback = Some(Arc::new(callback));
        self
    }

    pub fn with_process_data(
        mut self,
        handler: impl Fn(&QueueCommand, &str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.process_data = Some(Arc::new(handler));
        self
    }

    fn kind_count(&self) -> usize {
        self.open as usize
            + self.close as usize
            + self.delay.is_some() as usize
            + self.raw_code.is_some() as usize
    }
}

/// Anything the queue accepts: bare codes, full commands and nested lists of
/// either.
pub enum QueueItem {
    Code(String),
    Command(QueueCommand),
    Batch(Vec<QueueItem>),
}

impl From<&str> for QueueItem {
    fn from(code: &str) -> Self {
        QueueItem::Code(code.to_string())
    }
}

impl From<String> for QueueItem {
    fn from(code: String) -> Self {
        QueueItem::Code(code)
    }
}

impl From<QueueCommand> for QueueItem {
    fn from(command: QueueCommand) -> Self {
        QueueItem::Command(command)
    }
}

impl<T: Into<QueueItem>> From<Vec<T>> for QueueItem {
    fn from(items: Vec<T>) -> Self {
        QueueItem::Batch(items.into_iter().map(Into::into).collect())
    }
}

/// Handle given to the executor for the command it is running.
#[derive(Clone)]
pub struct Responder {
    queue: Weak<Inner>,
    command_id: u64,
}

impl Responder {
    pub fn command_id(&self) -> u64 {
        self.command_id
    }

    /// Delivers one line of response data.
    pub fn data(&self, data: &str) {
        if let Some(inner) = self.queue.upgrade() {
            let queue = CommandQueue { inner };
            queue.process_data(self.command_id, data);
        }
    }

    /// Marks the command complete without further data.
    pub fn done(&self) {
        if let Some(inner) = self.queue.upgrade() {
            let queue = CommandQueue { inner };
            queue.command_processed(self.command_id);
            queue.next_command();
        }
    }
}

#[derive(Default)]
struct QueueState {
    open: bool,
    pending: VecDeque<QueueCommand>,
    current: Option<QueueCommand>,
    command_id: u64,
    processing: bool,
}

struct Inner {
    state: Mutex<QueueState>,
    executor: Arc<dyn CommandExecutor>,
    expand_code: ExpandCode,
    response: Option<ResponseHandler>,
}

/// FIFO of device commands with at most one in flight. Cloning yields
/// another handle to the same queue.
#[derive(Clone)]
pub struct CommandQueue {
    inner: Arc<Inner>,
}

impl CommandQueue {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        expand_code: ExpandCode,
        response: Option<ResponseHandler>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                executor,
                expand_code,
                response,
            }),
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.state.lock().open
    }

    pub fn is_processing(&self) -> bool {
        self.inner.state.lock().processing
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while a command is dispatched and not yet complete.
    pub fn is_busy(&self) -> bool {
        self.inner.state.lock().current.is_some()
    }

    pub fn executor(&self) -> Arc<dyn CommandExecutor> {
        self.inner.executor.clone()
    }

    pub fn pause(&self) {
        self.inner.state.lock().processing = false;
    }

    pub fn resume(&self) {
        self.inner.state.lock().processing = true;
        self.next_command();
    }

    /// Drops everything pending and pauses. A command already dispatched
    /// runs to completion.
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        state.pending.clear();
        state.processing = false;
    }

    pub fn enqueue(&self, item: impl Into<QueueItem>) {
        let commands = self.expand(item.into());
        if commands.is_empty() {
            return;
        }
        let was_empty = {
            let mut state = self.inner.state.lock();
            let was_empty = state.pending.is_empty();
            state.pending.extend(commands);
            was_empty
        };
        if was_empty {
            self.resume();
        }
    }

    /// Inserts ahead of everything pending and resumes processing.
    pub fn prepend(&self, item: impl Into<QueueItem>) {
        let commands = self.expand(item.into());
        if commands.is_empty() {
            return;
        }
        {
            let mut state = self.inner.state.lock();
            for command in commands.into_iter().rev() {
                state.pending.push_front(command);
            }
        }
        self.resume();
    }

    /// Clears the queue, then closes the connection if it is open and
    /// pauses once that is done.
    pub fn cleanup(&self) {
        self.clear();
        let (busy, open) = {
            let state = self.inner.state.lock();
            (state.current.is_some(), state.open)
        };
        if busy || open {
            let mut command = QueueCommand::default();
            command.close = open;
            let queue = Arc::downgrade(&self.inner);
            command.post_callback = Some(Arc::new(move |_: &QueueCommand| {
                if let Some(inner) = queue.upgrade() {
                    inner.state.lock().processing = false;
                }
            }));
            self.prepend(command);
        } else {
            self.pause();
        }
    }

    /// Completes the in-flight command from outside its response handler,
    /// e.g. after a settle timer.
    pub fn complete(&self, command_id: u64) {
        self.command_processed(command_id);
        self.next_command();
    }

    fn expand(&self, item: QueueItem) -> Vec<QueueCommand> {
        let mut out = Vec::new();
        self.expand_into(item, &mut out);
        out
    }

    fn expand_into(&self, item: QueueItem, out: &mut Vec<QueueCommand>) {
        match item {
            QueueItem::Code(code) => self.expand_into(QueueItem::Command(QueueCommand::code(code)), out),
            QueueItem::Batch(items) => {
                for item in items {
                    self.expand_into(item, out);
                }
            }
            QueueItem::Command(mut command) => {
                if command.raw_code.is_none() {
                    if let Some(code) = &command.code {
                        command.raw_code = Some((self.inner.expand_code)(code));
                    }
                }
                out.push(command);
            }
        }
    }

    /// Dispatches pending commands until one is in flight, the queue is
    /// empty or processing is paused.
    fn next_command(&self) {
        loop {
            let command = {
                let mut state = self.inner.state.lock();
                if state.current.is_some() || !state.processing {
                    return;
                }
                let Some(mut command) = state.pending.pop_front() else {
                    state.processing = false;
                    return;
                };
                state.command_id += 1;
                command.command_id = state.command_id;
                if !state.open && !command.open && command.delay.is_none() {
                    tracing::error!(
                        "Cannot send commands without an open connection, dropping {:?}",
                        command
                    );
                    continue;
                }
                state.current = Some(command.clone());
                command
            };
            if self.send_command(command) {
                continue;
            }
            return;
        }
    }

    /// Starts the command. Returns true when it completed inline.
    fn send_command(&self, command: QueueCommand) -> bool {
        if let Some(pre) = &command.pre_callback {
            tracing::debug!("Calling preCallback for command {}", command.command_id);
            pre(&command);
        }
        if command.kind_count() > 1 {
            tracing::error!(
                "open, close, delay and raw_code are mutually exclusive: {:?}",
                command
            );
        }

        let id = command.command_id;
        let executor = self.inner.executor.clone();
        let queue = self.clone();
        if command.open {
            tokio::spawn(async move {
                let ok = executor.open().await;
                queue.open_processed(id, ok);
            });
        } else if command.close {
            tokio::spawn(async move {
                let ok = executor.close().await;
                queue.close_processed(id, ok);
            });
        } else if let Some(delay) = command.delay {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                queue.command_processed(id);
                queue.next_command();
            });
        } else if let Some(raw_code) = command.raw_code.clone() {
            tracing::debug!("Sending command: {}", raw_code.lines().next().unwrap_or(""));
            let responder = Responder {
                queue: Arc::downgrade(&self.inner),
                command_id: id,
            };
            tokio::spawn(async move {
                executor.execute(raw_code, responder).await;
            });
        } else {
            self.command_processed(id);
            return true;
        }
        false
    }

    fn process_data(&self, command_id: u64, data: &str) {
        let (command, handler) = {
            let state = self.inner.state.lock();
            match &state.current {
                Some(current) if current.command_id == command_id => {
                    let handler = current
                        .process_data
                        .clone()
                        .or_else(|| self.inner.response.clone());
                    (current.clone(), handler)
                }
                _ => {
                    tracing::warn!(
                        "Command {} is no longer receiving data, ignoring: {}",
                        command_id,
                        data
                    );
                    return;
                }
            }
        };
        let complete = match handler {
            Some(handler) => handler(&command, data),
            None => true,
        };
        if complete {
            self.command_processed(command_id);
            self.next_command();
        }
    }

    fn command_processed(&self, command_id: u64) {
        let finished = {
            let mut state = self.inner.state.lock();
            match &state.current {
                Some(current) if current.command_id == command_id => state.current.take(),
                _ => {
                    tracing::error!(
                        "Command ids are out of sync: completion for {} while the queue is on {}",
                        command_id,
                        state.command_id
                    );
                    None
                }
            }
        };
        if let Some(command) = finished {
            if let Some(post) = &command.post_callback {
                tracing::debug!("Calling postCallback for command {}", command_id);
                post(&command);
            }
        }
    }

    fn open_processed(&self, command_id: u64, success: bool) {
        if success {
            self.inner.state.lock().open = true;
        } else {
            tracing::error!("Executor open() failed");
        }
        self.command_processed(command_id);
        self.next_command();
    }

    fn close_processed(&self, command_id: u64, success: bool) {
        if success {
            self.inner.state.lock().open = false;
        } else {
            tracing::error!("Executor close() failed");
        }
        self.command_processed(command_id);
        self.next_command();
    }
}

// src/printable/fdm.rs - FDM command stream reader
use super::reader::{PrintableReader, ReadError, ReadOptions};
use async_trait::async_trait;
use printmgr_shared::{FdmCommand, FdmHeader, PrintableKind};
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncRead;

/// Passive notification delivered before the sink sees each message.
#[derive(Debug, Clone, Copy)]
pub enum FdmEvent<'a> {
    Header(&'a FdmHeader),
    Command(&'a FdmCommand),
}

/// Consumer of a decoded FDM stream. Each hook is awaited before the next
/// frame is read.
#[async_trait]
pub trait FdmSink: Send {
    type Error: From<ReadError> + Send;

    async fn on_header(&mut self, _header: &FdmHeader) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn on_command(&mut self, command: FdmCommand) -> Result<(), Self::Error>;
}

type Observer = Box<dyn for<'a> FnMut(FdmEvent<'a>) + Send>;

pub struct FdmReader {
    options: ReadOptions,
    observers: Vec<Observer>,
}

impl FdmReader {
    pub fn new(options: ReadOptions) -> Self {
        Self {
            options,
            observers: Vec::new(),
        }
    }

    pub fn observe(&mut self, observer: impl for<'a> FnMut(FdmEvent<'a>) + Send + 'static) {
        self.observers.push(Box::new(observer));
    }

    fn notify(&mut self, event: FdmEvent<'_>) {
        for observer in &mut self.observers {
            observer(event);
        }
    }

    /// Reads `path` to the end-of-commands marker and returns the number of
    /// commands delivered, the marker included.
    pub async fn read<S: FdmSink>(
        &mut self,
        path: impl AsRef<Path>,
        sink: &mut S,
    ) -> Result<usize, S::Error> {
        let path = path.as_ref();
        let mut reader: PrintableReader<File> =
            PrintableReader::open(path, PrintableKind::Fdm, &self.options).await?;
        tracing::debug!("Reading FDM printable {}", path.display());
        self.read_messages(&mut reader, sink).await
    }

    /// Same as [`FdmReader::read`] over an already opened byte source.
    pub async fn read_from<R, S>(&mut self, source: R, sink: &mut S) -> Result<usize, S::Error>
    where
        R: AsyncRead + Unpin + Send,
        S: FdmSink,
    {
        let chunk_size = self.options.chunk_size()?;
        let mut reader = PrintableReader::new(source, chunk_size);
        reader.expect_magic(PrintableKind::Fdm).await?;
        self.read_messages(&mut reader, sink).await
    }

    async fn read_messages<R, S>(
        &mut self,
        reader: &mut PrintableReader<R>,
        sink: &mut S,
    ) -> Result<usize, S::Error>
    where
        R: AsyncRead + Unpin + Send,
        S: FdmSink,
    {
        let header: FdmHeader = reader.read_message().await?;
        self.notify(FdmEvent::Header(&header));
        sink.on_header(&header).await?;

        let mut count = 0;
        loop {
            let command: FdmCommand = reader.read_message().await?;
            count += 1;
            self.notify(FdmEvent::Command(&command));
            let done = command.is_end_of_commands();
            sink.on_command(command).await?;
            if done {
                break;
            }
        }
        tracing::debug!("FDM printable finished after {} commands", count);
        Ok(count)
    }
}

impl Default for FdmReader {
    fn default() -> Self {
        Self::new(ReadOptions::default())
    }
}

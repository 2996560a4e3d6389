// src/printable/dlp.rs - DLP slice stream reader
use super::reader::{PrintableReader, ReadError, ReadOptions};
use async_trait::async_trait;
use printmgr_shared::{DlpHeader, DlpSlice, PrintableKind};
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncRead;

#[derive(Debug, Clone, Copy)]
pub enum DlpEvent<'a> {
    Header(&'a DlpHeader),
    Slice { index: usize, slice: &'a DlpSlice },
}

/// Consumer of a decoded DLP stream. Each hook is awaited before the next
/// slice is read.
#[async_trait]
pub trait DlpSink: Send {
    type Error: From<ReadError> + Send;

    async fn on_header(&mut self, _header: &DlpHeader) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn on_slice(&mut self, index: usize, slice: DlpSlice) -> Result<(), Self::Error>;
}

type Observer = Box<dyn for<'a> FnMut(DlpEvent<'a>) + Send>;

pub struct DlpReader {
    options: ReadOptions,
    observers: Vec<Observer>,
}

impl DlpReader {
    pub fn new(options: ReadOptions) -> Self {
        Self {
            options,
            observers: Vec::new(),
        }
    }

    pub fn observe(&mut self, observer: impl for<'a> FnMut(DlpEvent<'a>) + Send + 'static) {
        self.observers.push(Box::new(observer));
    }

    fn notify(&mut self, event: DlpEvent<'_>) {
        for observer in &mut self.observers {
            observer(event);
        }
    }

    /// Reads the header and exactly `num_slices` slices; returns the slice count.
    pub async fn read<S: DlpSink>(
        &mut self,
        path: impl AsRef<Path>,
        sink: &mut S,
    ) -> Result<usize, S::Error> {
        let path = path.as_ref();
        let mut reader: PrintableReader<File> =
            PrintableReader::open(path, PrintableKind::Dlp, &self.options).await?;
        tracing::debug!("Reading DLP printable {}", path.display());
        self.read_messages(&mut reader, sink).await
    }

    pub async fn read_from<R, S>(&mut self, source: R, sink: &mut S) -> Result<usize, S::Error>
    where
        R: AsyncRead + Unpin + Send,
        S: DlpSink,
    {
        let chunk_size = self.options.chunk_size()?;
        let mut reader = PrintableReader::new(source, chunk_size);
        reader.expect_magic(PrintableKind::Dlp).await?;
        self.read_messages(&mut reader, sink).await
    }

    async fn read_messages<R, S>(
        &mut self,
        reader: &mut PrintableReader<R>,
        sink: &mut S,
    ) -> Result<usize, S::Error>
    where
        R: AsyncRead + Unpin + Send,
        S: DlpSink,
    {
        let header: DlpHeader = reader.read_message().await?;
        self.notify(DlpEvent::Header(&header));
        sink.on_header(&header).await?;

        let total = header.num_slices as usize;
        for index in 0..total {
            let slice: DlpSlice = reader.read_message().await?;
            self.notify(DlpEvent::Slice {
                index,
                slice: &slice,
            });
            sink.on_slice(index, slice).await?;
        }
        tracing::debug!("DLP printable finished after {} slices", total);
        Ok(total)
    }
}

impl Default for DlpReader {
    fn default() -> Self {
        Self::new(ReadOptions::default())
    }
}

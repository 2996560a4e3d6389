// src/printable/reader.rs - length-prefixed message framing over a chunked byte source
use printmgr_shared::{DecodeError, PrintableKind, PrintableMessage};
use prost::encoding::decode_varint;
use std::path::Path;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};

pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Longest encoding of a 32-bit length prefix.
const MAX_PREFIX_BYTES: usize = 5;

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("Invalid buffer size: {0}")]
    InvalidBufferSize(i64),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Not a valid printable file.")]
    NotPrintable,
    #[error("Unexpected end of stream: needed {needed} bytes, {available} available")]
    ShortRead { needed: usize, available: usize },
    #[error("Malformed message: {0}")]
    Malformed(#[from] DecodeError),
    #[error("Length prefix {0} does not fit in 32 bits")]
    OversizedPrefix(u64),
}

impl ReadError {
    /// True for errors about the file's contents rather than access to it.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            ReadError::NotPrintable
                | ReadError::ShortRead { .. }
                | ReadError::Malformed(_)
                | ReadError::OversizedPrefix(_)
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    /// Bytes pulled from the source per read. `None` uses the default.
    pub buffer_size: Option<i64>,
}

impl ReadOptions {
    pub fn with_buffer_size(buffer_size: i64) -> Self {
        Self {
            buffer_size: Some(buffer_size),
        }
    }

    pub fn chunk_size(&self) -> Result<usize, ReadError> {
        match self.buffer_size {
            None => Ok(DEFAULT_BUFFER_SIZE),
            Some(size) if size > 0 => Ok(size as usize),
            Some(size) => Err(ReadError::InvalidBufferSize(size)),
        }
    }
}

/// Reads magic-prefixed, varint32-framed messages from a byte source that
/// may hand out data in arbitrarily small pieces.
///
/// Length prefixes are read by taking up to five bytes at once and pushing
/// the unused tail back in front of the cursor, so no byte is lost or read
/// twice across a message boundary whatever the chunk size.
pub struct PrintableReader<R> {
    source: R,
    chunk_size: usize,
    buffer: Vec<u8>,
    pos: usize,
    eof: bool,
}

impl PrintableReader<File> {
    /// Validates the options, opens `path` and checks the magic for `kind`.
    pub async fn open(
        path: impl AsRef<Path>,
        kind: PrintableKind,
        options: &ReadOptions,
    ) -> Result<Self, ReadError> {
        let chunk_size = options.chunk_size()?;
        let file = File::open(path.as_ref()).await?;
        let mut reader = PrintableReader::new(file, chunk_size);
        reader.expect_magic(kind).await?;
        Ok(reader)
    }
}

impl<R: AsyncRead + Unpin> PrintableReader<R> {
    pub fn new(source: R, chunk_size: usize) -> Self {
        Self {
            source,
            chunk_size: chunk_size.max(1),
            buffer: Vec::new(),
            pos: 0,
            eof: false,
        }
    }

    fn available(&self) -> usize {
        self.buffer.len() - self.pos
    }

    async fn fill(&mut self, wanted: usize) -> Result<(), ReadError> {
        if self.available() >= wanted || self.eof {
            return Ok(());
        }
        if self.pos > 0 {
            self.buffer.drain(..self.pos);
            self.pos = 0;
        }
        let mut chunk = vec![0u8; self.chunk_size];
        while self.buffer.len() < wanted {
            let n = self.source.read(&mut chunk).await?;
            if n == 0 {
                self.eof = true;
                break;
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
        Ok(())
    }

    /// Takes up to `n` bytes; fewer only when the source is exhausted.
    async fn read_up_to(&mut self, n: usize) -> Result<&[u8], ReadError> {
        self.fill(n).await?;
        let take = n.min(self.available());
        let start = self.pos;
        self.pos += take;
        Ok(&self.buffer[start..start + take])
    }

    async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, ReadError> {
        self.fill(n).await?;
        let available = self.available();
        if available < n {
            return Err(ReadError::ShortRead {
                needed: n,
                available,
            });
        }
        let bytes = self.buffer[self.pos..self.pos + n].to_vec();
        self.pos += n;
        Ok(bytes)
    }

    fn push_back(&mut self, n: usize) {
        self.pos -= n;
    }

    pub async fn read_magic(&mut self) -> Result<u32, ReadError> {
        match self.read_exact(4).await {
            Ok(bytes) => Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
            Err(ReadError::ShortRead { .. }) => Err(ReadError::NotPrintable),
            Err(e) => Err(e),
        }
    }

    pub async fn expect_magic(&mut self, kind: PrintableKind) -> Result<(), ReadError> {
        let magic = self.read_magic().await?;
        if magic != kind.magic() {
            tracing::debug!(
                "Magic mismatch: expected {:#010x}, found {:#010x}",
                kind.magic(),
                magic
            );
            return Err(ReadError::NotPrintable);
        }
        Ok(())
    }

    /// Reads the next length-prefixed message.
    pub async fn read_message<M: PrintableMessage>(&mut self) -> Result<M, ReadError> {
        let head = self.read_up_to(MAX_PREFIX_BYTES).await?;
        let taken = head.len();
        // Fewer bytes than a full prefix only happens at end of stream.
        if taken < MAX_PREFIX_BYTES && head.iter().all(|b| b & 0x80 != 0) {
            return Err(ReadError::ShortRead {
                needed: taken + 1,
                available: taken,
            });
        }
        let mut rest = head;
        let len = decode_varint(&mut rest)?;
        let used = taken - rest.len();
        if len > u64::from(u32::MAX) {
            return Err(ReadError::OversizedPrefix(len));
        }
        self.push_back(taken - used);
        let body = self.read_exact(len as usize).await?;
        Ok(M::from_body(&body)?)
    }
}

/// Identifies a printable file by its magic marker.
pub async fn sniff(path: impl AsRef<Path>) -> Result<PrintableKind, ReadError> {
    let file = File::open(path.as_ref()).await?;
    let mut reader = PrintableReader::new(file, 4);
    let magic = reader.read_magic().await?;
    PrintableKind::from_magic(magic).ok_or(ReadError::NotPrintable)
}

// src/printable/mod.rs - readers for machine-independent printable files
pub mod dlp;
pub mod fdm;
pub mod reader;

pub use dlp::{DlpEvent, DlpReader, DlpSink};
pub use fdm::{FdmEvent, FdmReader, FdmSink};
pub use reader::{sniff, PrintableReader, ReadError, ReadOptions, DEFAULT_BUFFER_SIZE};

// src/translation/mod.rs - printable to machine-specific output translation
pub mod directive;
pub mod dlp;
pub mod factory;
pub mod fdm;
pub mod format;
pub mod vendors;

use crate::config::TranslatorSettings;
use crate::printable::{ReadError, ReadOptions};
use async_trait::async_trait;
use printmgr_shared::{Material, PrinterProfile, PrinterType};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::watch;

pub use directive::TranslatorDirective;
pub use factory::{TranslatorFactory, TranslatorType};

#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("Read error: {0}")]
    Read(#[from] ReadError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}() method is unimplemented.")]
    Unimplemented(&'static str),
    #[error("Parameter not found in profile {profile}: {name}")]
    MissingParameter { profile: String, name: String },
    #[error("No profile available for printer type {0}")]
    MissingProfile(String),
    #[error("Translation was not started")]
    NotStarted,
}

/// Options shared by every translator the factory builds.
#[derive(Debug, Clone, Default)]
pub struct TranslatorOptions {
    pub settings: TranslatorSettings,
    pub read_options: ReadOptions,
    pub dremel_icon: Option<PathBuf>,
}

/// Everything a translator is constructed from.
#[derive(Debug, Clone, Default)]
pub struct TranslatorContext {
    pub printer_type: PrinterType,
    pub profile: Option<PrinterProfile>,
    pub material: Option<Material>,
    pub options: TranslatorOptions,
}

/// Fraction of the input translated so far, observable while it runs.
#[derive(Debug)]
pub struct Progress {
    tx: watch::Sender<f64>,
}

impl Default for Progress {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(0.0);
        Self { tx }
    }
}

impl Progress {
    pub fn set(&self, progress: f64) {
        self.tx.send_replace(progress);
    }

    pub fn get(&self) -> f64 {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<f64> {
        self.tx.subscribe()
    }
}

/// Converts one printable file into the output a printer consumes.
#[async_trait]
pub trait Translator: Send {
    fn job_name(&self) -> &str;

    fn progress(&self) -> &Progress;

    /// Drives a reader over `input`, feeding every decoded message to the
    /// translator's hooks.
    async fn start_translation(&mut self, input: &Path, output: &Path)
        -> Result<(), TranslationError>;

    /// Flushes accumulated output to `output`.
    async fn end_translation(&mut self, output: &Path) -> Result<(), TranslationError>;

    async fn translate(&mut self, input: &Path, output: &Path) -> Result<(), TranslationError> {
        tracing::info!(
            "Translating {} -> {} ({})",
            input.display(),
            output.display(),
            self.job_name()
        );
        self.start_translation(input, output).await?;
        self.end_translation(output).await
    }
}

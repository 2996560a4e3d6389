// src/lib.rs - print manager runtime: printable readers, translators and printer drivers
pub mod backend;
pub mod catalog;
pub mod config;
pub mod printable;
pub mod printers;
pub mod translation;

pub use backend::{BackendError, GeometryBackend};
pub use catalog::{CatalogError, PrinterCatalog};
pub use config::{load_config, Config, ConfigError};
pub use printers::{Asset, CommandParams, DriverEvent, PrinterDriver};
pub use translation::{TranslationError, Translator, TranslatorFactory, TranslatorOptions};

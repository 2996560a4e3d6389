// src/translation/factory.rs - registry that picks a translator for a printer
use super::{TranslationError, Translator, TranslatorContext, TranslatorOptions};
use printmgr_shared::{Material, PrinterProfile, PrinterType};
use std::sync::Arc;

/// A kind of translator the factory can build.
pub trait TranslatorType: Send + Sync {
    fn name(&self) -> &str;

    fn can_translate(
        &self,
        printer_type: &PrinterType,
        profile: Option<&PrinterProfile>,
        material: Option<&Material>,
    ) -> bool;

    fn create(&self, context: TranslatorContext) -> Result<Box<dyn Translator>, TranslationError>;
}

/// Ordered registry; the first type that accepts a printer wins.
#[derive(Default)]
pub struct TranslatorFactory {
    types: Vec<Arc<dyn TranslatorType>>,
    options: TranslatorOptions,
}

impl TranslatorFactory {
    pub fn new(options: TranslatorOptions) -> Self {
        Self {
            types: Vec::new(),
            options,
        }
    }

    /// A factory with every built-in vendor translator registered.
    pub fn with_builtin_translators(options: TranslatorOptions) -> Self {
        let mut factory = Self::new(options);
        super::vendors::register_builtin(&mut factory);
        factory
    }

    /// Adds a translator type. Names are unique; a duplicate is rejected.
    pub fn register(&mut self, translator_type: Arc<dyn TranslatorType>) -> bool {
        if self.types.iter().any(|t| t.name() == translator_type.name()) {
            tracing::warn!("Translator {} is already registered", translator_type.name());
            return false;
        }
        tracing::debug!("Registered translator {}", translator_type.name());
        self.types.push(translator_type);
        true
    }

    pub fn get(
        &self,
        printer_type: &PrinterType,
        profile: Option<&PrinterProfile>,
        material: Option<&Material>,
    ) -> Option<Box<dyn Translator>> {
        for translator_type in &self.types {
            if !translator_type.can_translate(printer_type, profile, material) {
                continue;
            }
            let context = TranslatorContext {
                printer_type: printer_type.clone(),
                profile: profile.cloned(),
                material: material.cloned(),
                options: self.options.clone(),
            };
            match translator_type.create(context) {
                Ok(translator) => return Some(translator),
                Err(e) => tracing::error!(
                    "Failed to create translator {}: {}",
                    translator_type.name(),
                    e
                ),
            }
        }
        None
    }

    pub fn names(&self) -> Vec<&str> {
        self.types.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn clear(&mut self) {
        self.types.clear();
    }
}

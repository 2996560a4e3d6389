// src/catalog.rs - read-only lookup tables for printer types, profiles and materials
use crate::config::Config;
use printmgr_shared::{Material, PrinterProfile, PrinterType};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("duplicate {kind} id: {id}")]
    Duplicate { kind: &'static str, id: String },
}

/// Built once at startup and shared behind an `Arc`; never mutated after.
#[derive(Debug, Default)]
pub struct PrinterCatalog {
    printer_types: HashMap<String, PrinterType>,
    profiles: HashMap<String, PrinterProfile>,
    materials: HashMap<String, Material>,
}

impl PrinterCatalog {
    pub fn new(
        printer_types: Vec<PrinterType>,
        profiles: Vec<PrinterProfile>,
        materials: Vec<Material>,
    ) -> Result<Self, CatalogError> {
        let mut catalog = Self::default();
        for printer_type in printer_types {
            let id = printer_type.id.clone();
            if catalog.printer_types.insert(id.clone(), printer_type).is_some() {
                return Err(CatalogError::Duplicate { kind: "printer type", id });
            }
        }
        for profile in profiles {
            let id = profile.id.clone();
            if catalog.profiles.insert(id.clone(), profile).is_some() {
                return Err(CatalogError::Duplicate { kind: "profile", id });
            }
        }
        for material in materials {
            let id = material.id.clone();
            if catalog.materials.insert(id.clone(), material).is_some() {
                return Err(CatalogError::Duplicate { kind: "material", id });
            }
        }
        tracing::info!(
            "Catalog loaded: {} printer types, {} profiles, {} materials",
            catalog.printer_types.len(),
            catalog.profiles.len(),
            catalog.materials.len()
        );
        Ok(catalog)
    }

    pub fn from_config(config: &Config) -> Result<Self, CatalogError> {
        Self::new(
            config.printer_types.clone(),
            config.profiles.clone(),
            config.materials.clone(),
        )
    }

    pub fn printer_type(&self, id: &str) -> Result<&PrinterType, CatalogError> {
        self.printer_types.get(id).ok_or_else(|| CatalogError::NotFound {
            kind: "printer type",
            id: id.to_string(),
        })
    }

    pub fn profile(&self, id: &str) -> Result<&PrinterProfile, CatalogError> {
        self.profiles.get(id).ok_or_else(|| CatalogError::NotFound {
            kind: "profile",
            id: id.to_string(),
        })
    }

    pub fn material(&self, id: &str) -> Result<&Material, CatalogError> {
        self.materials.get(id).ok_or_else(|| CatalogError::NotFound {
            kind: "material",
            id: id.to_string(),
        })
    }

    /// Profile to use for a printer type: the explicit id, else the type's default.
    pub fn profile_for(
        &self,
        printer_type: &PrinterType,
        profile_id: Option<&str>,
    ) -> Option<&PrinterProfile> {
        profile_id
            .or(printer_type.default_profile_id.as_deref())
            .and_then(|id| self.profiles.get(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn printer_type(id: &str) -> PrinterType {
        PrinterType {
            id: id.to_string(),
            default_profile_id: Some("default".into()),
            ..Default::default()
        }
    }

    #[test]
    fn lookups_and_default_profile() {
        let profile = PrinterProfile {
            id: "default".into(),
            ..Default::default()
        };
        let catalog = PrinterCatalog::new(vec![printer_type("a")], vec![profile], vec![]).unwrap();
        let pt = catalog.printer_type("a").unwrap();
        assert_eq!(catalog.profile_for(pt, None).unwrap().id, "default");
        assert!(catalog.profile_for(pt, Some("missing")).is_none());
        assert_eq!(
            catalog.material("m"),
            Err(CatalogError::NotFound { kind: "material", id: "m".into() })
        );
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let result = PrinterCatalog::new(vec![printer_type("a"), printer_type("a")], vec![], vec![]);
        assert!(matches!(result, Err(CatalogError::Duplicate { .. })));
    }
}

// printmgr_shared/src/printer_type.rs - printer type, profile and material records
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Technology {
    #[default]
    #[serde(rename = "FDM")]
    Fdm,
    #[serde(rename = "DLP")]
    Dlp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VolumeType {
    #[default]
    Cartesian,
    Cylindrical,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildVolume {
    #[serde(rename = "type", default)]
    pub kind: VolumeType,
    #[serde(default)]
    pub bed_size: [f64; 3],
    #[serde(default)]
    pub bed_offset: [f64; 2],
    #[serde(default)]
    pub park_position: Option<[f64; 3]>,
    #[serde(default)]
    pub home_position: Option<[f64; 3]>,
}

impl BuildVolume {
    pub fn is_delta(&self) -> bool {
        self.kind == VolumeType::Cylindrical
    }
}

/// One way of talking to a printer type, e.g. `serial` at 250000 baud.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SupportedConnection {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub baud: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrinterType {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub technology: Technology,
    #[serde(default)]
    pub default_profile_id: Option<String>,
    #[serde(default)]
    pub default_material_id: Option<String>,
    #[serde(default)]
    pub supported_connections: Vec<SupportedConnection>,
    #[serde(default)]
    pub build_volume: BuildVolume,
}

impl PrinterType {
    pub fn connection(&self, kind: &str) -> Option<&SupportedConnection> {
        self.supported_connections.iter().find(|c| c.kind == kind)
    }
}

/// Slicing profile. Everything besides the identity is kept as loosely typed
/// values; consumers look up the keys they need.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrinterProfile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub technology: Technology,
    #[serde(flatten)]
    pub values: BTreeMap<String, serde_json::Value>,
}

impl PrinterProfile {
    pub fn value(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub values: BTreeMap<String, serde_json::Value>,
}

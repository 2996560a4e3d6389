// src/translation/dlp.rs - Ember print package: gzipped tar of settings and slice images
use super::format::{round_half_away, to_fixed};
use super::{Progress, TranslationError, Translator, TranslatorContext};
use crate::printable::{DlpReader, DlpSink, ReadOptions};
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use printmgr_shared::{DlpHeader, DlpSlice, PrinterProfile};
use serde_json::Value;
use std::f64::consts::PI;
use std::path::Path;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const SETTINGS_ENTRY: &str = "printsettings";

/// Slices allowed to wait for the package writer before `on_slice` blocks.
const PENDING_ENTRIES: usize = 4;

/// Unit conversion applied to a profile value before it is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conversion {
    None,
    /// centimetres to microns
    Length,
    /// seconds to milliseconds
    Time,
    /// radians to millidegrees
    Angle,
}

const SETTING_MAP: &[(&str, &str, Conversion)] = &[
    ("LayerThicknessMicrons", "layer_height", Conversion::Length),
    ("BurnInExposureSec", "burn_in_exposure", Conversion::None),
    ("BurnInLayers", "burn_in_layers", Conversion::None),
    ("BurnInSeparationRPM", "burn_in_layer_separation_slide_velocity", Conversion::None),
    ("BurnInApproachRPM", "burn_in_layer_approach_slide_velocity", Conversion::None),
    ("BurnInZLiftMicrons", "burn_in_layer_z_axis_overlift", Conversion::Length),
    ("BurnInSeparationMicronsPerSec", "burn_in_layer_separation_z_axis_velocity", Conversion::Length),
    ("BurnInApproachMicronsPerSec", "burn_in_layer_approach_z_axis_velocity", Conversion::Length),
    ("BurnInRotationMilliDegrees", "burn_in_layer_angle_of_rotation", Conversion::Angle),
    ("BurnInExposureWaitMS", "burn_in_layer_wait_after_exposure", Conversion::Time),
    ("BurnInSeparationWaitMS", "burn_in_layer_wait_after_separation", Conversion::Time),
    ("BurnInApproachWaitMS", "burn_in_layer_wait_after_approach", Conversion::Time),
    ("FirstExposureSec", "first_layer_exposure_time", Conversion::None),
    ("FirstSeparationRPM", "first_layer_separation_slide_velocity", Conversion::None),
    ("FirstApproachRPM", "first_layer_approach_slide_velocity", Conversion::None),
    ("FirstZLiftMicrons", "first_layer_z_axis_overlift", Conversion::Length),
    ("FirstSeparationMicronsPerSec", "first_layer_separation_z_axis_velocity", Conversion::Length),
    ("FirstApproachMicronsPerSec", "first_layer_approach_z_axis_velocity", Conversion::Length),
    ("FirstRotationMilliDegrees", "first_layer_angle_of_rotation", Conversion::Angle),
    ("FirstExposureWaitMS", "first_layer_wait_after_exposure", Conversion::Time),
    ("FirstSeparationWaitMS", "first_layer_wait_after_separation", Conversion::Time),
    ("FirstApproachWaitMS", "first_layer_wait_after_approach", Conversion::Time),
    ("ModelExposureSec", "model_exposure_time", Conversion::None),
    ("ModelSeparationRPM", "model_layer_separation_slide_velocity", Conversion::None),
    ("ModelApproachRPM", "model_layer_approach_slide_velocity", Conversion::None),
    ("ModelZLiftMicrons", "model_layer_z_axis_overlift", Conversion::Length),
    ("ModelSeparationMicronsPerSec", "model_layer_separation_z_axis_velocity", Conversion::Length),
    ("ModelApproachMicronsPerSec", "model_layer_approach_z_axis_velocity", Conversion::Length),
    ("ModelRotationMilliDegrees", "model_layer_angle_of_rotation", Conversion::Angle),
    ("ModelExposureWaitMS", "model_layer_wait_after_exposure", Conversion::Time),
    ("ModelSeparationWaitMS", "model_layer_wait_after_separation", Conversion::Time),
    ("ModelApproachWaitMS", "model_layer_wait_after_approach", Conversion::Time),
];

impl Conversion {
    fn apply(self, value: f64) -> f64 {
        match self {
            Conversion::None => value,
            Conversion::Length => 10000.0 * value,
            Conversion::Time => 1000.0 * value,
            Conversion::Angle => 1000.0 * 180.0 / PI * value,
        }
    }
}

/// Exposure times keep three decimals; every other numeric setting is an
/// integer.
fn format_number(ember_name: &str, value: f64) -> String {
    if ember_name.ends_with("ExposureSec") {
        to_fixed(value, 3)
    } else {
        format!("{}", round_half_away(value) as i64)
    }
}

fn setting_value(
    profile: &PrinterProfile,
    ember_name: &str,
    name: &str,
    conversion: Conversion,
) -> Result<String, TranslationError> {
    let value = profile
        .value(name)
        .ok_or_else(|| TranslationError::MissingParameter {
            profile: profile.id.clone(),
            name: name.to_string(),
        })?;
    Ok(match value {
        Value::Number(n) => {
            let raw = n.as_f64().unwrap_or_default();
            format_number(ember_name, conversion.apply(raw))
        }
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

/// Renders the `printsettings` document. Values are written verbatim, so
/// the result is JSON-like rather than strict JSON.
pub fn encode_settings(profile: &PrinterProfile, job_name: &str) -> Result<String, TranslationError> {
    let mut settings = vec![("JobName".to_string(), format!("\"{}\"", job_name))];
    for (ember_name, name, conversion) in SETTING_MAP {
        let value = setting_value(profile, ember_name, name, *conversion)?;
        settings.push((ember_name.to_string(), value));
    }
    settings.sort_by(|a, b| a.0.cmp(&b.0));

    let body: Vec<String> = settings
        .iter()
        .map(|(name, value)| format!("        \"{}\": {}", name, value))
        .collect();
    Ok(format!(
        "{{\n    \"Settings\": {{\n{}\n    }}\n}}\n",
        body.join(",\n")
    ))
}

struct Entry {
    name: String,
    data: Vec<u8>,
}

/// Owns the tar/gzip stream on a blocking thread. Entries are handed over
/// through a bounded channel, so compression never runs on the runtime.
struct PackageWriter {
    entries: mpsc::Sender<Entry>,
    task: JoinHandle<Result<usize, TranslationError>>,
}

impl PackageWriter {
    async fn create(output: &Path) -> Result<Self, TranslationError> {
        let file = tokio::fs::File::create(output).await?.into_std().await;
        let (entries, mut pending) = mpsc::channel::<Entry>(PENDING_ENTRIES);
        let task = tokio::task::spawn_blocking(move || -> Result<usize, TranslationError> {
            let mut package = tar::Builder::new(GzEncoder::new(file, Compression::default()));
            let mtime = chrono::Utc::now().timestamp().max(0) as u64;
            let mut written = 0;
            while let Some(entry) = pending.blocking_recv() {
                let mut header = tar::Header::new_gnu();
                header.set_size(entry.data.len() as u64);
                header.set_mode(0o644);
                header.set_mtime(mtime);
                package.append_data(&mut header, &entry.name, entry.data.as_slice())?;
                written += 1;
            }
            package.into_inner()?.finish()?;
            Ok(written)
        });
        Ok(Self { entries, task })
    }

    /// Closes the channel and waits for the stream to be flushed. Returns
    /// the number of entries written.
    async fn finish(self) -> Result<usize, TranslationError> {
        drop(self.entries);
        self.task
            .await
            .map_err(|e| TranslationError::Io(std::io::Error::other(e)))?
    }
}

pub struct EmberTranslator {
    profile: Option<PrinterProfile>,
    printer_type_id: String,
    read_options: ReadOptions,
    job_name: String,
    slice_count: usize,
    slices_written: usize,
    package: Option<PackageWriter>,
    progress: Progress,
}

impl EmberTranslator {
    pub fn new(context: &TranslatorContext) -> Self {
        Self {
            profile: context.profile.clone(),
            printer_type_id: context.printer_type.id.clone(),
            read_options: context.options.read_options,
            job_name: "Spark".to_string(),
            slice_count: 0,
            slices_written: 0,
            package: None,
            progress: Progress::default(),
        }
    }

    async fn append(&mut self, name: String, data: Vec<u8>) -> Result<(), TranslationError> {
        let writer = self.package.as_ref().ok_or(TranslationError::NotStarted)?;
        if writer.entries.send(Entry { name, data }).await.is_ok() {
            return Ok(());
        }
        // The writer only hangs up after an I/O failure; surface it.
        let writer = self.package.take().ok_or(TranslationError::NotStarted)?;
        writer.finish().await?;
        Err(TranslationError::NotStarted)
    }
}

#[async_trait]
impl DlpSink for EmberTranslator {
    type Error = TranslationError;

    async fn on_header(&mut self, header: &DlpHeader) -> Result<(), TranslationError> {
        self.slice_count = header.num_slices as usize;
        tracing::debug!(
            "Ember job: {} slices at {}x{}",
            header.num_slices,
            header.image_width,
            header.image_height
        );
        Ok(())
    }

    async fn on_slice(&mut self, index: usize, slice: DlpSlice) -> Result<(), TranslationError> {
        if self.slice_count > 0 {
            self.progress.set((index + 1) as f64 / self.slice_count as f64);
        }
        self.slices_written += 1;
        let name = format!("slice_{}.png", self.slices_written);
        self.append(name, slice.png_data).await
    }
}

#[async_trait]
impl Translator for EmberTranslator {
    fn job_name(&self) -> &str {
        &self.job_name
    }

    fn progress(&self) -> &Progress {
        &self.progress
    }

    async fn start_translation(&mut self, input: &Path, output: &Path) -> Result<(), TranslationError> {
        let profile = self
            .profile
            .as_ref()
            .ok_or_else(|| TranslationError::MissingProfile(self.printer_type_id.clone()))?;
        let settings = encode_settings(profile, &self.job_name)?;

        self.package = Some(PackageWriter::create(output).await?);
        self.append(SETTINGS_ENTRY.to_string(), settings.into_bytes()).await?;

        let mut reader = DlpReader::new(self.read_options);
        reader.read(input, self).await?;
        Ok(())
    }

    async fn end_translation(&mut self, _output: &Path) -> Result<(), TranslationError> {
        let package = self.package.take().ok_or(TranslationError::NotStarted)?;
        let entries = package.finish().await?;
        tracing::info!("Wrote Ember package with {} slices", entries.saturating_sub(1));
        Ok(())
    }
}

// src/translation/fdm/mod.rs - G-code generation from FDM command streams
//
// Each firmware family is a table of conversion hooks over a shared
// `GcodeWriter`. Families start from the Marlin table and replace the
// entries whose output differs.
pub mod delta;
pub mod g3drem;
pub mod makerbot;
pub mod marlin;
pub mod printrbot;

use super::directive::TranslatorDirective;
use super::format::to_fixed;
use super::{Progress, TranslationError, Translator, TranslatorContext};
use crate::config::{Precision, TranslatorSettings};
use crate::printable::{FdmReader, FdmSink, ReadOptions};
use async_trait::async_trait;
use printmgr_shared::{Axis, CommandType, FdmCommand, PrinterType};
use std::path::{Path, PathBuf};

pub type ConvertFn<S> =
    fn(&mut GcodeWriter<S>, &mut FdmCommand) -> Result<String, TranslationError>;
pub type LineFn<S> = fn(&GcodeWriter<S>, &FdmCommand, String) -> String;
pub type PostCommandFn<S> =
    fn(&mut GcodeWriter<S>, &FdmCommand, String) -> Result<String, TranslationError>;

/// Per-family state carried alongside the writer.
pub trait FamilyState: Default + Send + 'static {
    fn configure(&mut self, _printer_type: &PrinterType) {}
}

impl FamilyState for () {}

/// Conversion table, one entry per command type plus the shared line and
/// movement helpers.
pub struct FdmHooks<S> {
    pub convert_end_of_commands: ConvertFn<S>,
    pub convert_move: ConvertFn<S>,
    pub convert_extrude_move: ConvertFn<S>,
    pub convert_extrude: ConvertFn<S>,
    pub convert_set_feed_rate: ConvertFn<S>,
    pub convert_set_temp_bed: ConvertFn<S>,
    pub convert_set_temp_nozzle: ConvertFn<S>,
    pub convert_set_fan_speed: ConvertFn<S>,
    pub convert_set_units: ConvertFn<S>,
    pub convert_disable_motors: ConvertFn<S>,
    pub convert_set_mode_xyz: ConvertFn<S>,
    pub convert_set_mode_e: ConvertFn<S>,
    pub convert_reset_extrusion_distance: ConvertFn<S>,
    pub convert_pause: ConvertFn<S>,
    pub convert_home_axes: ConvertFn<S>,
    pub convert_comment: ConvertFn<S>,
    pub convert_start_print: ConvertFn<S>,
    pub convert_end_print: ConvertFn<S>,
    pub convert_custom_command: ConvertFn<S>,
    pub convert_progress: ConvertFn<S>,
    pub convert_estimates: ConvertFn<S>,
    pub process_axes_array: ConvertFn<S>,
    pub post_process_command: PostCommandFn<S>,
    pub post_process_line: LineFn<S>,
}

impl<S> Clone for FdmHooks<S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for FdmHooks<S> {}

macro_rules! missing_hooks {
    ($($name:ident),* $(,)?) => {
        mod missing {
            use super::*;
            $(
                pub fn $name<S>(
                    _writer: &mut GcodeWriter<S>,
                    _command: &mut FdmCommand,
                ) -> Result<String, TranslationError> {
                    Err(TranslationError::Unimplemented(stringify!($name)))
                }
            )*

            pub fn post_process_command<S>(
                _writer: &mut GcodeWriter<S>,
                _command: &FdmCommand,
                _line: String,
            ) -> Result<String, TranslationError> {
                Err(TranslationError::Unimplemented("post_process_command"))
            }
        }
    };
}

missing_hooks!(
    convert_end_of_commands,
    convert_move,
    convert_extrude_move,
    convert_extrude,
    convert_set_feed_rate,
    convert_set_temp_bed,
    convert_set_temp_nozzle,
    convert_set_fan_speed,
    convert_set_units,
    convert_disable_motors,
    convert_set_mode_xyz,
    convert_set_mode_e,
    convert_reset_extrusion_distance,
    convert_pause,
    convert_home_axes,
    convert_comment,
    convert_start_print,
    convert_end_print,
    convert_custom_command,
    convert_progress,
    convert_estimates,
    process_axes_array,
);

impl<S: FamilyState> FdmHooks<S> {
    /// A table where every conversion fails with an "unimplemented" error.
    pub fn unimplemented() -> Self {
        Self {
            convert_end_of_commands: missing::convert_end_of_commands::<S>,
            convert_move: missing::convert_move::<S>,
            convert_extrude_move: missing::convert_extrude_move::<S>,
            convert_extrude: missing::convert_extrude::<S>,
            convert_set_feed_rate: missing::convert_set_feed_rate::<S>,
            convert_set_temp_bed: missing::convert_set_temp_bed::<S>,
            convert_set_temp_nozzle: missing::convert_set_temp_nozzle::<S>,
            convert_set_fan_speed: missing::convert_set_fan_speed::<S>,
            convert_set_units: missing::convert_set_units::<S>,
            convert_disable_motors: missing::convert_disable_motors::<S>,
            convert_set_mode_xyz: missing::convert_set_mode_xyz::<S>,
            convert_set_mode_e: missing::convert_set_mode_e::<S>,
            convert_reset_extrusion_distance: missing::convert_reset_extrusion_distance::<S>,
            convert_pause: missing::convert_pause::<S>,
            convert_home_axes: missing::convert_home_axes::<S>,
            convert_comment: missing::convert_comment::<S>,
            convert_start_print: missing::convert_start_print::<S>,
            convert_end_print: missing::convert_end_print::<S>,
            convert_custom_command: missing::convert_custom_command::<S>,
            convert_progress: missing::convert_progress::<S>,
            convert_estimates: missing::convert_estimates::<S>,
            process_axes_array: missing::process_axes_array::<S>,
            post_process_command: missing::post_process_command::<S>,
            post_process_line: marlin::post_process_line::<S>,
        }
    }

    /// The generic Marlin dialect every FDM family builds on.
    pub fn marlin() -> Self {
        Self {
            convert_end_of_commands: marlin::convert_nothing::<S>,
            convert_move: marlin::convert_move::<S>,
            convert_extrude_move: marlin::convert_extrude_move::<S>,
            convert_extrude: marlin::convert_extrude::<S>,
            convert_set_feed_rate: marlin::convert_move::<S>,
            convert_set_temp_bed: marlin::convert_set_temp_bed::<S>,
            convert_set_temp_nozzle: marlin::convert_set_temp_nozzle::<S>,
            convert_set_fan_speed: marlin::convert_set_fan_speed::<S>,
            convert_set_units: marlin::convert_set_units::<S>,
            convert_disable_motors: marlin::convert_disable_motors::<S>,
            convert_set_mode_xyz: marlin::convert_set_mode_xyz::<S>,
            convert_set_mode_e: marlin::convert_set_mode_e::<S>,
            convert_reset_extrusion_distance: marlin::convert_reset_extrusion_distance::<S>,
            convert_pause: marlin::convert_pause::<S>,
            convert_home_axes: marlin::convert_home_axes::<S>,
            convert_comment: marlin::convert_comment::<S>,
            convert_start_print: marlin::convert_nothing::<S>,
            convert_end_print: marlin::convert_nothing::<S>,
            convert_custom_command: marlin::convert_custom_command::<S>,
            convert_progress: marlin::convert_nothing::<S>,
            convert_estimates: marlin::convert_estimates::<S>,
            process_axes_array: marlin::process_axes_array::<S>,
            post_process_command: marlin::post_process_command::<S>,
            post_process_line: marlin::post_process_line::<S>,
        }
    }
}

/// Family defaults applied before configuration overrides.
#[derive(Debug, Clone, Copy)]
pub struct WriterDefaults {
    pub verbose: bool,
    pub verbose_from_mic: bool,
    pub axis_letters: [&'static str; 5],
}

impl Default for WriterDefaults {
    fn default() -> Self {
        Self {
            verbose: true,
            verbose_from_mic: true,
            axis_letters: ["X", "Y", "Z", "E", "F"],
        }
    }
}

/// Time and material figures announced by an ESTIMATES command.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Estimates {
    pub print_time: f64,
    pub material_length: f64,
}

/// Axes a movement command touches and how many sub-moves it expands to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveAxes {
    /// Axes with one value per sub-move.
    pub array: Vec<Axis>,
    /// Axes with a single value, emitted on the first sub-move only.
    pub initial: Vec<Axis>,
    pub count: usize,
}

pub fn active_axes(command: &FdmCommand) -> ActiveAxes {
    let mut active = ActiveAxes {
        array: Vec::new(),
        initial: Vec::new(),
        count: 1,
    };
    for axis in Axis::ALL {
        let len = command.axis(axis).len();
        if len > 1 {
            active.array.push(axis);
            active.count = len;
        } else if len == 1 {
            active.initial.push(axis);
        }
    }
    active
}

pub struct GcodeWriter<S> {
    pub verbose: bool,
    pub verbose_from_mic: bool,
    pub precision: Precision,
    pub axis_letters: [&'static str; 5],
    /// Last emitted value per axis; `None` until first written.
    pub current_pos: [Option<f64>; 5],
    pub estimates: Estimates,
    pub state: S,
    hooks: FdmHooks<S>,
    warnings: Vec<String>,
}

impl<S: FamilyState> GcodeWriter<S> {
    pub fn new(
        hooks: FdmHooks<S>,
        defaults: WriterDefaults,
        settings: &TranslatorSettings,
        printer_type: &PrinterType,
    ) -> Self {
        let mut state = S::default();
        state.configure(printer_type);
        Self {
            verbose: settings.verbose.unwrap_or(defaults.verbose),
            verbose_from_mic: settings.verbose_from_mic.unwrap_or(defaults.verbose_from_mic),
            precision: settings.precision.unwrap_or_default(),
            axis_letters: defaults.axis_letters,
            current_pos: [None; 5],
            estimates: Estimates::default(),
            state,
            hooks,
            warnings: Vec::new(),
        }
    }

    /// Converts one command to its G-code text, possibly empty.
    pub fn convert_command(&mut self, mut command: FdmCommand) -> Result<String, TranslationError> {
        let hooks = self.hooks;
        let convert = match command.command_type {
            CommandType::EndOfCommands => hooks.convert_end_of_commands,
            CommandType::Move => hooks.convert_move,
            CommandType::ExtrudeMove => hooks.convert_extrude_move,
            CommandType::Extrude => hooks.convert_extrude,
            CommandType::SetFeedRate => hooks.convert_set_feed_rate,
            CommandType::SetTempBed => hooks.convert_set_temp_bed,
            CommandType::SetTempNozzle => hooks.convert_set_temp_nozzle,
            CommandType::SetFanSpeed => hooks.convert_set_fan_speed,
            CommandType::SetUnits => hooks.convert_set_units,
            CommandType::DisableMotors => hooks.convert_disable_motors,
            CommandType::SetModeXyz => hooks.convert_set_mode_xyz,
            CommandType::SetModeE => hooks.convert_set_mode_e,
            CommandType::ResetExtrusionDistance => hooks.convert_reset_extrusion_distance,
            CommandType::Pause => hooks.convert_pause,
            CommandType::HomeAxes => hooks.convert_home_axes,
            CommandType::Comment => hooks.convert_comment,
            CommandType::StartPrint => hooks.convert_start_print,
            CommandType::EndPrint => hooks.convert_end_print,
            CommandType::Custom => hooks.convert_custom_command,
            CommandType::Progress => hooks.convert_progress,
            CommandType::Estimates => hooks.convert_estimates,
            CommandType::Unknown(code) => {
                tracing::warn!("Skipping FDM command with unknown type {}", code);
                return Ok(String::new());
            }
        };
        let converted = convert(self, &mut command)?;
        (hooks.post_process_command)(self, &command, converted)
    }

    /// Formats a value of `axis` with that axis's precision.
    pub fn format_axis(&self, axis: Axis, value: f64) -> String {
        to_fixed(value, self.precision.for_axis(axis))
    }

    pub fn axis_letter(&self, axis: Axis) -> &'static str {
        self.axis_letters[axis.index()]
    }

    pub fn post_process_line(&self, command: &FdmCommand, line: String) -> String {
        (self.hooks.post_process_line)(self, command, line)
    }

    pub fn process_axes_array(&mut self, command: &mut FdmCommand) -> Result<String, TranslationError> {
        let process = self.hooks.process_axes_array;
        process(self, command)
    }

    /// Emits ` <letter><value>` for sub-move `i` unless it would repeat the
    /// last written value of that axis.
    pub fn redundancy_check(&mut self, command: &FdmCommand, axis: Axis, i: usize) -> String {
        let Some(&new_pos) = command.axis(axis).get(i) else {
            return String::new();
        };
        let slot = axis.index();
        let formatted = self.format_axis(axis, new_pos);
        let changed = match self.current_pos[slot] {
            None => true,
            Some(current) => {
                (current - new_pos).abs() > 0.00001 || formatted != self.format_axis(axis, current)
            }
        };
        if !changed {
            return String::new();
        }
        self.current_pos[slot] = Some(new_pos);
        format!(" {}{}", self.axis_letter(axis), formatted)
    }

    /// Applies translator directives embedded in an ESTIMATES comment. A
    /// malformed directive is reported and the current settings are kept.
    pub fn apply_directives(&mut self, comment: &str) {
        match TranslatorDirective::parse(comment) {
            Ok(directives) => {
                for directive in directives {
                    match directive {
                        TranslatorDirective::SetVerbose(flag) => self.verbose = flag,
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Ignoring malformed translator directive: {}", e);
                self.warnings.push(format!("Malformed translator directive: {}", e));
            }
        }
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

/// How the accumulated G-code is written out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputContainer {
    Plain,
    G3drem,
}

/// Translator driving an FDM reader into a `GcodeWriter`.
pub struct FdmTranslator<S> {
    writer: GcodeWriter<S>,
    output: String,
    container: OutputContainer,
    icon_path: Option<PathBuf>,
    read_options: ReadOptions,
    job_name: String,
    progress: Progress,
}

impl<S: FamilyState> FdmTranslator<S> {
    pub fn new(
        hooks: FdmHooks<S>,
        defaults: WriterDefaults,
        container: OutputContainer,
        context: &TranslatorContext,
    ) -> Self {
        Self {
            writer: GcodeWriter::new(
                hooks,
                defaults,
                &context.options.settings,
                &context.printer_type,
            ),
            output: String::new(),
            container,
            icon_path: context.options.dremel_icon.clone(),
            read_options: context.options.read_options,
            job_name: "Spark".to_string(),
            progress: Progress::default(),
        }
    }

    pub fn writer(&self) -> &GcodeWriter<S> {
        &self.writer
    }

    /// G-code produced so far.
    pub fn output(&self) -> &str {
        &self.output
    }
}

#[async_trait]
impl<S: FamilyState> FdmSink for FdmTranslator<S> {
    type Error = TranslationError;

    async fn on_command(&mut self, command: FdmCommand) -> Result<(), TranslationError> {
        if command.command_type == CommandType::Progress {
            self.progress.set(command.progress);
        }
        let text = self.writer.convert_command(command)?;
        self.output.push_str(&text);
        Ok(())
    }
}

#[async_trait]
impl<S: FamilyState> Translator for FdmTranslator<S> {
    fn job_name(&self) -> &str {
        &self.job_name
    }

    fn progress(&self) -> &Progress {
        &self.progress
    }

    async fn start_translation(
        &mut self,
        input: &Path,
        _output: &Path,
    ) -> Result<(), TranslationError> {
        let mut reader = FdmReader::new(self.read_options);
        let count = reader.read(input, self).await?;
        tracing::debug!("Converted {} FDM commands", count);
        Ok(())
    }

    async fn end_translation(&mut self, output: &Path) -> Result<(), TranslationError> {
        match self.container {
            OutputContainer::Plain => tokio::fs::write(output, self.output.as_bytes()).await?,
            OutputContainer::G3drem => {
                g3drem::write(
                    output,
                    self.output.as_bytes(),
                    self.icon_path.as_deref(),
                    self.writer.estimates,
                )
                .await?
            }
        }
        self.progress.set(1.0);
        Ok(())
    }
}

// src/translation/fdm/printrbot.rs - Printrbot dialect: deferred heating, profile-driven homing
use super::{marlin, FamilyState, FdmHooks, GcodeWriter};
use crate::translation::format::to_fixed;
use crate::translation::TranslationError;
use printmgr_shared::FdmCommand;

#[derive(Debug)]
pub struct PrintrbotState {
    pub initial_temp: String,
    pub initial_bed_temp: String,
    pub first_move_processed: bool,
}

impl Default for PrintrbotState {
    fn default() -> Self {
        Self {
            initial_temp: "0".to_string(),
            initial_bed_temp: "0".to_string(),
            first_move_processed: false,
        }
    }
}

impl PrintrbotState {
    fn bed_heating(&self) -> bool {
        self.initial_bed_temp.parse::<f64>().unwrap_or(0.0) > 0.0
    }
}

impl FamilyState for PrintrbotState {}

pub fn hooks() -> FdmHooks<PrintrbotState> {
    FdmHooks {
        convert_home_axes,
        convert_set_temp_nozzle,
        convert_set_temp_bed,
        convert_custom_command,
        convert_move,
        ..FdmHooks::marlin()
    }
}

/// Homing comes from the profile's start sequence.
pub fn convert_home_axes(
    _w: &mut GcodeWriter<PrintrbotState>,
    _cmd: &mut FdmCommand,
) -> Result<String, TranslationError> {
    Ok(String::new())
}

/// The nozzle is only heated right away when the bed is not heating.
pub fn convert_set_temp_nozzle(
    w: &mut GcodeWriter<PrintrbotState>,
    cmd: &mut FdmCommand,
) -> Result<String, TranslationError> {
    w.state.initial_temp = to_fixed(cmd.nozzle_temp, w.precision.s);
    let line = if w.state.bed_heating() {
        String::new()
    } else {
        format!("M104 S{}", w.state.initial_temp)
    };
    Ok(w.post_process_line(cmd, line))
}

pub fn convert_set_temp_bed(
    w: &mut GcodeWriter<PrintrbotState>,
    cmd: &mut FdmCommand,
) -> Result<String, TranslationError> {
    w.state.initial_bed_temp = to_fixed(cmd.bed_temp, w.precision.s);
    let line = format!("M140 S{}", w.state.initial_bed_temp);
    Ok(w.post_process_line(cmd, line))
}

/// Injects the custom text followed by the waits for bed and nozzle.
pub fn convert_custom_command(
    w: &mut GcodeWriter<PrintrbotState>,
    cmd: &mut FdmCommand,
) -> Result<String, TranslationError> {
    let mut line = String::new();
    if !cmd.custom.is_empty() {
        line += &cmd.custom;
        line.push('\n');
    }
    if w.state.bed_heating() {
        line += &format!("M190 S{}\n", w.state.initial_bed_temp);
    }
    line += &format!("M109 S{}", w.state.initial_temp);
    Ok(w.post_process_line(cmd, line))
}

/// The first travel move is swallowed; the start sequence positions the head.
pub fn convert_move(
    w: &mut GcodeWriter<PrintrbotState>,
    cmd: &mut FdmCommand,
) -> Result<String, TranslationError> {
    if !w.state.first_move_processed {
        w.state.first_move_processed = true;
        return Ok(String::new());
    }
    marlin::convert_move(w, cmd)
}

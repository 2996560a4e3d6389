// src/translation/fdm/delta.rs - Marlin variant for delta and offset-bed machines
use super::{active_axes, FamilyState, FdmHooks, GcodeWriter};
use crate::translation::TranslationError;
use printmgr_shared::{Axis, CommandType, FdmCommand, PrinterType};

#[derive(Debug, Default)]
pub struct DeltaState {
    pub homed: bool,
    pub bed_offset: [f64; 2],
    pub is_delta: bool,
}

impl FamilyState for DeltaState {
    fn configure(&mut self, printer_type: &PrinterType) {
        self.bed_offset = printer_type.build_volume.bed_offset;
        self.is_delta = printer_type.build_volume.is_delta();
    }
}

pub fn hooks() -> FdmHooks<DeltaState> {
    FdmHooks {
        convert_home_axes,
        process_axes_array,
        ..FdmHooks::marlin()
    }
}

/// Homing happens once, in the printer's own start sequence.
pub fn convert_home_axes(
    w: &mut GcodeWriter<DeltaState>,
    _cmd: &mut FdmCommand,
) -> Result<String, TranslationError> {
    if w.state.homed {
        return Ok(String::new());
    }
    w.state.homed = true;
    Ok("G28; home\n".to_string())
}

/// Like the Marlin expansion, but each sub-move is checked on its own. An
/// extrusion on a sub-move with no motion is dropped and its feed rate
/// carried to the next sub-move that does move.
pub fn process_axes_array(
    w: &mut GcodeWriter<DeltaState>,
    cmd: &mut FdmCommand,
) -> Result<String, TranslationError> {
    let count = active_axes(cmd).count;
    let mut out = String::new();
    let mut stored_f: Option<String> = None;
    for i in 0..count {
        let mut canceled_e = false;
        let mut line = String::from("G1");

        if w.state.is_delta {
            let [dx, dy] = w.state.bed_offset;
            if let Some(x) = cmd.x.get_mut(i) {
                *x += dx * 10.0;
            }
            if let Some(y) = cmd.y.get_mut(i) {
                *y += dy * 10.0;
            }
        }
        for axis in [Axis::X, Axis::Y, Axis::Z] {
            line += &w.redundancy_check(cmd, axis, i);
        }
        if cmd.e.get(i).is_some() {
            if line != "G1" || cmd.command_type == CommandType::Extrude {
                line += &w.redundancy_check(cmd, Axis::E, i);
            } else {
                canceled_e = true;
            }
        }
        if cmd.f.get(i).is_some() {
            let f = w.redundancy_check(cmd, Axis::F, i);
            if canceled_e {
                stored_f = Some(f);
            } else {
                line += &f;
            }
        } else if let Some(f) = stored_f.take() {
            line += &f;
        }

        if line == "G1" {
            line.clear();
        }
        out += &w.post_process_line(cmd, line);
    }
    Ok(out)
}

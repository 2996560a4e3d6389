// src/translation/fdm/makerbot.rs - MakerBot flavoured G-code (A extruder axis, absolute moves)
use super::{active_axes, marlin, FamilyState, FdmHooks, GcodeWriter, WriterDefaults};
use crate::translation::format::to_fixed;
use crate::translation::TranslationError;
use printmgr_shared::{Axis, FdmCommand};

const HOME_SPEED_XY: u32 = 2000;
const HOME_SPEED_Z: u32 = 900;
const HOME_SPEED_Z_SLOW: u32 = 100;

type Converted = Result<String, TranslationError>;

/// Last commanded position; every move restates all of it.
#[derive(Debug, Default)]
pub struct MakerbotState {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub f: f64,
}

impl FamilyState for MakerbotState {}

pub fn defaults() -> WriterDefaults {
    WriterDefaults {
        axis_letters: ["X", "Y", "Z", "A", "F"],
        ..WriterDefaults::default()
    }
}

pub fn hooks() -> FdmHooks<MakerbotState> {
    FdmHooks {
        convert_set_temp_bed,
        convert_set_temp_nozzle,
        convert_set_fan_speed,
        convert_set_units: marlin::convert_nothing,
        convert_disable_motors,
        convert_set_mode_xyz: marlin::convert_nothing,
        convert_set_mode_e: marlin::convert_nothing,
        convert_reset_extrusion_distance,
        convert_pause: marlin::convert_nothing,
        convert_home_axes,
        convert_start_print,
        convert_end_print,
        convert_progress,
        process_axes_array,
        ..FdmHooks::marlin()
    }
}

fn remark(w: &GcodeWriter<MakerbotState>, text: &str) -> String {
    if w.verbose {
        format!("; {}\n", text)
    } else {
        "\n".to_string()
    }
}

/// No heated bed support.
pub fn convert_set_temp_bed(w: &mut GcodeWriter<MakerbotState>, cmd: &mut FdmCommand) -> Converted {
    Ok(w.post_process_line(cmd, String::new()))
}

/// Heats with the stepper drive current lowered, then restores it.
pub fn convert_set_temp_nozzle(
    w: &mut GcodeWriter<MakerbotState>,
    cmd: &mut FdmCommand,
) -> Converted {
    let mut line = format!("M104 S{} T0", to_fixed(cmd.nozzle_temp, w.precision.s));
    if cmd.nozzle_temp > 0.0 {
        line += &remark(w, "wait for nozzle to reach temperature");
        line += "G130 X20 Y20 A20 B20";
        line += &remark(w, "lower stepper vrefs while heating");
        line += "M133 T0";
        line += &remark(w, "wait for nozzle to reach temperature");
        line += "G130 X127 Y127 A127 B127";
        line += &remark(w, "set stepper motor vref to defaults");
    } else {
        line += &remark(w, "turn off the extruder");
    }
    Ok(line)
}

pub fn convert_set_fan_speed(
    w: &mut GcodeWriter<MakerbotState>,
    cmd: &mut FdmCommand,
) -> Converted {
    let line = if cmd.fan_speed > 0.0 { "M126 T0" } else { "M127 T0" };
    Ok(w.post_process_line(cmd, line.to_string()))
}

pub fn convert_disable_motors(
    w: &mut GcodeWriter<MakerbotState>,
    _cmd: &mut FdmCommand,
) -> Converted {
    Ok(format!("M18 X Y Z A B{}", remark(w, "turn off steppers")))
}

pub fn convert_reset_extrusion_distance(
    w: &mut GcodeWriter<MakerbotState>,
    cmd: &mut FdmCommand,
) -> Converted {
    Ok(w.post_process_line(cmd, "G92 A0 B0".to_string()))
}

/// Homes XY to maximum and Z to minimum, then reloads the stored offsets.
pub fn convert_home_axes(w: &mut GcodeWriter<MakerbotState>, cmd: &mut FdmCommand) -> Converted {
    let (x, y, z) = (!cmd.x.is_empty(), !cmd.y.is_empty(), !cmd.z.is_empty());
    let mut line = String::new();
    if x || y {
        line += "G162 ";
        if x {
            line += "X ";
        }
        if y {
            line += "Y ";
        }
        line += &format!("F{}", HOME_SPEED_XY);
        line += &remark(w, "home XY");
    }
    if z {
        line += &format!("G161 Z F{}", HOME_SPEED_Z);
        line += &remark(w, "home Z axis minimum");
        line += "G92 X0.000 Y0.000 Z-5.000 A0 B0";
        line += &remark(w, "set Z to -5");
        line += &format!("G1 Z0.0 F{}", HOME_SPEED_Z);
        line += &remark(w, "move Z to '0'");
        line += &format!("G161 Z F{}", HOME_SPEED_Z_SLOW);
        line += &remark(w, "home Z axis minimum");
    }
    if x || y || z {
        line += "M132 ";
        if x {
            line += "X ";
        }
        if y {
            line += "Y ";
        }
        if z {
            line += "Z ";
        }
        line += "A B";
        line += &remark(w, "recall stored home offsets for XYZAB axis");

        line += "G92 ";
        line += if x { "X293.000 " } else { "X0.000 " };
        line += if y { "Y153.000 " } else { "Y0.000 " };
        line += if z { "Z0.000 " } else { "Z10.000 " };
        line += "A0 B0";
        line += &remark(w, "set coordinates");
    }
    Ok(line)
}

pub fn convert_start_print(w: &mut GcodeWriter<MakerbotState>, cmd: &mut FdmCommand) -> Converted {
    Ok(w.post_process_line(cmd, "M136".to_string()))
}

pub fn convert_end_print(w: &mut GcodeWriter<MakerbotState>, _cmd: &mut FdmCommand) -> Converted {
    Ok(format!(
        "M72 P5{}M137{}",
        remark(w, "play song"),
        remark(w, "end print")
    ))
}

/// Reports whole percent; completion is announced twice.
pub fn convert_progress(w: &mut GcodeWriter<MakerbotState>, cmd: &mut FdmCommand) -> Converted {
    let percent = (cmd.progress * 100.0).trunc() as i64;
    let mut line = format!("M73 P{}{}", percent, remark(w, "progress"));
    if percent == 100 {
        line += &format!("M73 P{}{}", percent, remark(w, "progress"));
    }
    Ok(line)
}

/// Every sub-move carries the full X Y Z F position, with A appended when
/// the command extrudes.
pub fn process_axes_array(
    w: &mut GcodeWriter<MakerbotState>,
    cmd: &mut FdmCommand,
) -> Converted {
    if let Some(&z) = cmd.z.first() {
        w.state.z = z;
    }
    let count = active_axes(cmd).count;
    let moves = !cmd.x.is_empty() || !cmd.y.is_empty() || !cmd.z.is_empty();
    let mut out = String::new();
    for i in 0..count {
        let mut line = String::from("G1");
        if let Some(&x) = cmd.x.get(i) {
            w.state.x = x;
        }
        if let Some(&y) = cmd.y.get(i) {
            w.state.y = y;
        }
        if let Some(&z) = cmd.z.get(i) {
            w.state.z = z;
        }
        if let Some(&f) = cmd.f.get(i) {
            w.state.f = f;
        }
        let extrusion = cmd
            .e
            .get(i)
            .map(|e| format!(" {}{}", w.axis_letter(Axis::E), w.format_axis(Axis::E, *e)))
            .unwrap_or_default();

        if moves {
            line += &format!(
                " X{} Y{} Z{} F{}",
                w.format_axis(Axis::X, w.state.x),
                w.format_axis(Axis::Y, w.state.y),
                w.format_axis(Axis::Z, w.state.z),
                w.format_axis(Axis::F, w.state.f),
            );
            line += &extrusion;
        } else if !cmd.e.is_empty() {
            line += &extrusion;
            line += &format!(" F{}", w.format_axis(Axis::F, w.state.f));
        } else if !cmd.f.is_empty() {
            line += &format!(" F{}", w.format_axis(Axis::F, w.state.f));
        }
        out += &w.post_process_line(cmd, line);
    }
    Ok(out)
}

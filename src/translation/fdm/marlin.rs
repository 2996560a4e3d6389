// src/translation/fdm/marlin.rs - generic Marlin G-code dialect
use super::{active_axes, FamilyState, GcodeWriter};
use crate::translation::format::{js_number, num_to_string, to_fixed};
use crate::translation::TranslationError;
use printmgr_shared::{CommandType, FdmCommand, PositionMode, Units};

type Converted = Result<String, TranslationError>;

pub fn convert_nothing<S: FamilyState>(_: &mut GcodeWriter<S>, _: &mut FdmCommand) -> Converted {
    Ok(String::new())
}

pub fn convert_move<S: FamilyState>(w: &mut GcodeWriter<S>, cmd: &mut FdmCommand) -> Converted {
    w.process_axes_array(cmd)
}

pub fn convert_extrude_move<S: FamilyState>(
    w: &mut GcodeWriter<S>,
    cmd: &mut FdmCommand,
) -> Converted {
    let no_motion = cmd.x.is_empty() && cmd.y.is_empty() && cmd.z.is_empty() && cmd.e.is_empty();
    if no_motion && cmd.f.first() == Some(&0.0) {
        return Ok(String::new());
    }
    w.process_axes_array(cmd)
}

pub fn convert_extrude<S: FamilyState>(w: &mut GcodeWriter<S>, cmd: &mut FdmCommand) -> Converted {
    // F is always restated on a pure extrusion
    w.current_pos[printmgr_shared::Axis::F.index()] = None;
    w.process_axes_array(cmd)
}

pub fn convert_set_temp_bed<S: FamilyState>(
    w: &mut GcodeWriter<S>,
    cmd: &mut FdmCommand,
) -> Converted {
    let code = if cmd.wait { "M190 S" } else { "M140 S" };
    let line = format!("{}{}", code, to_fixed(cmd.bed_temp, w.precision.s));
    Ok(w.post_process_line(cmd, line))
}

pub fn convert_set_temp_nozzle<S: FamilyState>(
    w: &mut GcodeWriter<S>,
    cmd: &mut FdmCommand,
) -> Converted {
    let code = if cmd.wait { "M109 S" } else { "M104 S" };
    let line = format!("{}{}", code, to_fixed(cmd.nozzle_temp, w.precision.s));
    Ok(w.post_process_line(cmd, line))
}

pub fn convert_set_fan_speed<S: FamilyState>(
    w: &mut GcodeWriter<S>,
    cmd: &mut FdmCommand,
) -> Converted {
    let line = format!("M106 S{}", to_fixed(cmd.fan_speed, w.precision.s));
    Ok(w.post_process_line(cmd, line))
}

pub fn convert_set_units<S: FamilyState>(
    w: &mut GcodeWriter<S>,
    cmd: &mut FdmCommand,
) -> Converted {
    let line = match cmd.units {
        Units::Millimeters => "G21",
        Units::Inches => "G20",
        Units::Unknown(_) => "",
    };
    Ok(w.post_process_line(cmd, line.to_string()))
}

pub fn convert_disable_motors<S: FamilyState>(
    w: &mut GcodeWriter<S>,
    cmd: &mut FdmCommand,
) -> Converted {
    Ok(w.post_process_line(cmd, "M84".to_string()))
}

pub fn convert_set_mode_xyz<S: FamilyState>(
    w: &mut GcodeWriter<S>,
    cmd: &mut FdmCommand,
) -> Converted {
    let line = match cmd.mode {
        PositionMode::Absolute => "G90",
        PositionMode::Relative => "G91",
        PositionMode::Unknown(_) => "",
    };
    Ok(w.post_process_line(cmd, line.to_string()))
}

pub fn convert_set_mode_e<S: FamilyState>(
    w: &mut GcodeWriter<S>,
    cmd: &mut FdmCommand,
) -> Converted {
    let line = match cmd.mode {
        PositionMode::Absolute => "M82",
        PositionMode::Relative => "M83",
        PositionMode::Unknown(_) => "",
    };
    Ok(w.post_process_line(cmd, line.to_string()))
}

pub fn convert_reset_extrusion_distance<S: FamilyState>(
    w: &mut GcodeWriter<S>,
    cmd: &mut FdmCommand,
) -> Converted {
    let values: Vec<String> = cmd.e.iter().map(|e| js_number(*e)).collect();
    let line = format!("G92 E{}", values.join(","));
    Ok(w.post_process_line(cmd, line))
}

/// Dwell. Delays under a minute are given in milliseconds, longer ones in
/// whole seconds to stay inside the firmware's 16-bit argument.
pub fn convert_pause<S: FamilyState>(w: &mut GcodeWriter<S>, cmd: &mut FdmCommand) -> Converted {
    let delay_ms = cmd.pause_time * 1000.0;
    let line = if delay_ms < 60000.0 {
        format!("G4 P{}", num_to_string(delay_ms, None))
    } else {
        format!("G4 S{}", js_number((delay_ms / 1000.0 + 0.5).floor()))
    };
    Ok(w.post_process_line(cmd, line))
}

pub fn convert_home_axes<S: FamilyState>(
    w: &mut GcodeWriter<S>,
    cmd: &mut FdmCommand,
) -> Converted {
    let mut line = String::from("G28");
    let all = cmd.x.len() == 1 && cmd.y.len() == 1 && cmd.z.len() == 1;
    if !all {
        if let [x] = cmd.x.as_slice() {
            line += &format!(" X{}", to_fixed(*x, w.precision.x));
        }
        if let [y] = cmd.y.as_slice() {
            line += &format!(" Y{}", to_fixed(*y, w.precision.y));
        }
        if let [z] = cmd.z.as_slice() {
            line += &format!(" Z{}", to_fixed(*z, w.precision.z));
        }
    }
    Ok(w.post_process_line(cmd, line))
}

pub fn convert_comment<S: FamilyState>(w: &mut GcodeWriter<S>, cmd: &mut FdmCommand) -> Converted {
    let line = if w.verbose {
        format!("; {}", cmd.comment)
    } else {
        String::new()
    };
    Ok(w.post_process_line(cmd, line))
}

pub fn convert_custom_command<S: FamilyState>(
    w: &mut GcodeWriter<S>,
    cmd: &mut FdmCommand,
) -> Converted {
    Ok(w.post_process_line(cmd, cmd.custom.clone()))
}

pub fn convert_estimates<S: FamilyState>(
    w: &mut GcodeWriter<S>,
    cmd: &mut FdmCommand,
) -> Converted {
    if !cmd.comment.is_empty() && w.verbose_from_mic {
        w.apply_directives(&cmd.comment);
    }
    Ok(String::new())
}

pub fn post_process_command<S: FamilyState>(
    _: &mut GcodeWriter<S>,
    _: &FdmCommand,
    line: String,
) -> Converted {
    Ok(line)
}

/// Appends the command's comment in verbose mode and terminates non-empty
/// lines.
pub fn post_process_line<S>(w: &GcodeWriter<S>, cmd: &FdmCommand, mut line: String) -> String {
    if w.verbose && !cmd.comment.is_empty() && cmd.command_type != CommandType::Comment {
        line.push_str("; ");
        line.push_str(&cmd.comment);
    }
    if !line.is_empty() {
        line.push('\n');
    }
    line
}

/// One G1 per sub-move. Array axes appear on every line, single-valued
/// axes only on the first, each filtered through the redundancy check.
pub fn process_axes_array<S: FamilyState>(
    w: &mut GcodeWriter<S>,
    cmd: &mut FdmCommand,
) -> Converted {
    let axes = active_axes(cmd);
    let mut out = String::new();
    for i in 0..axes.count {
        let mut line = String::from("G1");
        for &axis in &axes.array {
            line += &w.redundancy_check(cmd, axis, i);
        }
        if i == 0 {
            for &axis in &axes.initial {
                line += &w.redundancy_check(cmd, axis, i);
            }
        }
        out += &w.post_process_line(cmd, line);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::super::{FdmHooks, GcodeWriter, WriterDefaults};
    use crate::config::TranslatorSettings;
    use printmgr_shared::{CommandType, FdmCommand, PrinterType};

    fn writer(verbose: bool) -> GcodeWriter<()> {
        let settings = TranslatorSettings {
            verbose: Some(verbose),
            ..Default::default()
        };
        GcodeWriter::new(
            FdmHooks::marlin(),
            WriterDefaults::default(),
            &settings,
            &PrinterType::default(),
        )
    }

    fn command(kind: CommandType) -> FdmCommand {
        FdmCommand::new(kind)
    }

    #[test]
    fn repeated_axes_are_dropped() {
        let mut w = writer(false);
        let mut first = command(CommandType::Move);
        first.x = vec![10.0];
        first.y = vec![20.0];
        first.f = vec![3000.0];
        assert_eq!(w.convert_command(first).unwrap(), "G1 X10.000 Y20.000 F3000\n");

        let mut second = command(CommandType::Move);
        second.x = vec![10.000001];
        second.y = vec![25.0];
        second.f = vec![3000.0];
        assert_eq!(w.convert_command(second).unwrap(), "G1 Y25.000\n");
    }

    #[test]
    fn array_axes_expand_to_sub_moves() {
        let mut w = writer(false);
        let mut cmd = command(CommandType::ExtrudeMove);
        cmd.x = vec![1.0, 2.0, 3.0];
        cmd.y = vec![5.0];
        cmd.e = vec![0.1, 0.2, 0.3];
        let out = w.convert_command(cmd).unwrap();
        assert_eq!(
            out,
            "G1 X1.000 E0.10000 Y5.000\nG1 X2.000 E0.20000\nG1 X3.000 E0.30000\n"
        );
    }

    #[test]
    fn extrude_always_restates_feed_rate() {
        let mut w = writer(false);
        let mut feed = command(CommandType::SetFeedRate);
        feed.f = vec![1200.0];
        assert_eq!(w.convert_command(feed.clone()).unwrap(), "G1 F1200\n");
        assert_eq!(w.convert_command(feed).unwrap(), "G1\n");

        let mut extrude = command(CommandType::Extrude);
        extrude.e = vec![2.0];
        extrude.f = vec![1200.0];
        assert_eq!(w.convert_command(extrude).unwrap(), "G1 E2.00000 F1200\n");
    }

    #[test]
    fn empty_extrude_move_with_zero_feed_is_skipped() {
        let mut w = writer(false);
        let mut cmd = command(CommandType::ExtrudeMove);
        cmd.f = vec![0.0];
        assert_eq!(w.convert_command(cmd).unwrap(), "");
    }

    #[test]
    fn temperatures_and_fan() {
        let mut w = writer(false);
        let mut bed = command(CommandType::SetTempBed);
        bed.bed_temp = 60.0;
        bed.wait = true;
        assert_eq!(w.convert_command(bed).unwrap(), "M190 S60\n");

        let mut nozzle = command(CommandType::SetTempNozzle);
        nozzle.nozzle_temp = 210.4;
        assert_eq!(w.convert_command(nozzle).unwrap(), "M104 S210\n");

        let mut fan = command(CommandType::SetFanSpeed);
        fan.fan_speed = 255.0;
        assert_eq!(w.convert_command(fan).unwrap(), "M106 S255\n");
    }

    #[test]
    fn pause_switches_units_at_one_minute() {
        let mut w = writer(false);
        let mut short = command(CommandType::Pause);
        short.pause_time = 1.5;
        assert_eq!(w.convert_command(short).unwrap(), "G4 P1500\n");

        let mut long = command(CommandType::Pause);
        long.pause_time = 90.4;
        assert_eq!(w.convert_command(long).unwrap(), "G4 S90\n");
    }

    #[test]
    fn homing_lists_partial_axes() {
        let mut w = writer(false);
        let mut all = command(CommandType::HomeAxes);
        all.x = vec![0.0];
        all.y = vec![0.0];
        all.z = vec![0.0];
        assert_eq!(w.convert_command(all).unwrap(), "G28\n");

        let mut xy = command(CommandType::HomeAxes);
        xy.x = vec![0.0];
        xy.y = vec![0.0];
        assert_eq!(w.convert_command(xy).unwrap(), "G28 X0.000 Y0.000\n");
    }

    #[test]
    fn verbose_appends_comments() {
        let mut w = writer(true);
        let mut cmd = command(CommandType::DisableMotors);
        cmd.comment = "done".into();
        assert_eq!(w.convert_command(cmd).unwrap(), "M84; done\n");

        let mut note = command(CommandType::Comment);
        note.comment = "layer 2".into();
        assert_eq!(w.convert_command(note).unwrap(), "; layer 2\n");
    }

    #[test]
    fn estimates_directive_toggles_verbose() {
        let mut w = writer(true);
        let mut est = command(CommandType::Estimates);
        est.comment = r#"{"translator":{"verbose":false}}"#.into();
        assert_eq!(w.convert_command(est).unwrap(), "");
        assert!(!w.verbose);

        let mut bad = command(CommandType::Estimates);
        bad.comment = "{not json".into();
        w.convert_command(bad).unwrap();
        assert!(!w.verbose);
        assert_eq!(w.warnings().len(), 1);
    }

    #[test]
    fn reset_extrusion_and_modes() {
        let mut w = writer(false);
        let mut reset = command(CommandType::ResetExtrusionDistance);
        reset.e = vec![0.0];
        assert_eq!(w.convert_command(reset).unwrap(), "G92 E0\n");

        let mut rel = command(CommandType::SetModeE);
        rel.mode = printmgr_shared::PositionMode::Relative;
        assert_eq!(w.convert_command(rel).unwrap(), "M83\n");

        let mut inches = command(CommandType::SetUnits);
        inches.units = printmgr_shared::Units::Inches;
        assert_eq!(w.convert_command(inches).unwrap(), "G20\n");
    }

    #[test]
    fn unimplemented_table_reports_hook_name() {
        let mut w: GcodeWriter<()> = GcodeWriter::new(
            FdmHooks::unimplemented(),
            WriterDefaults::default(),
            &TranslatorSettings::default(),
            &PrinterType::default(),
        );
        let err = w.convert_command(command(CommandType::Move)).unwrap_err();
        assert_eq!(err.to_string(), "convert_move() method is unimplemented.");
    }
}

use flate2::read::GzDecoder;
use printmgr_rs::config::TranslatorSettings;
use printmgr_rs::translation::vendors::{
    AUTODESK_EMBER, DREAMMAKER_OVERLORD, DREMEL_IDEA_BUILDER, MAKERBOT_REPLICATOR_2, PRINTRBOT_PLAY,
    ULTIMAKER_2,
};
use printmgr_rs::translation::fdm::g3drem;
use printmgr_rs::{TranslationError, TranslatorFactory, TranslatorOptions};
use printmgr_shared::{
    BuildVolume, CommandType, DlpHeader, DlpSlice, FdmCommand, FdmHeader, PrinterProfile,
    PrinterType, VolumeType, PrintableMessage, DLP_MAGIC, FDM_MAGIC,
};
use serde_json::json;
use std::io::Read;
use std::path::{Path, PathBuf};

fn quiet_options() -> TranslatorOptions {
    TranslatorOptions {
        settings: TranslatorSettings {
            verbose: Some(false),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn printer(id: &str) -> PrinterType {
    PrinterType {
        id: id.to_string(),
        ..Default::default()
    }
}

fn mv(kind: CommandType, x: f64, y: f64) -> FdmCommand {
    let mut cmd = FdmCommand::new(kind);
    cmd.x = vec![x];
    cmd.y = vec![y];
    cmd
}

fn sample_job() -> Vec<FdmCommand> {
    let mut nozzle = FdmCommand::new(CommandType::SetTempNozzle);
    nozzle.nozzle_temp = 210.0;
    nozzle.wait = true;

    let mut first = mv(CommandType::Move, 10.0, 20.0);
    first.f = vec![3000.0];

    let mut extrude = mv(CommandType::ExtrudeMove, 30.0, 20.0);
    extrude.e = vec![1.5];

    let mut progress = FdmCommand::new(CommandType::Progress);
    progress.progress = 0.5;

    vec![
        FdmCommand::new(CommandType::StartPrint),
        nozzle,
        FdmCommand::new(CommandType::HomeAxes),
        first,
        extrude,
        progress,
        FdmCommand::new(CommandType::DisableMotors),
        FdmCommand::new(CommandType::EndPrint),
        FdmCommand::new(CommandType::EndOfCommands),
    ]
}

fn write_fdm(dir: &Path, printer_type_id: &str, commands: &[FdmCommand]) -> PathBuf {
    let mut bytes = FDM_MAGIC.to_be_bytes().to_vec();
    let header = FdmHeader {
        printer_type_id: printer_type_id.into(),
        ..Default::default()
    };
    bytes.extend(header.encode_framed());
    for command in commands {
        bytes.extend(command.encode_framed());
    }
    let path = dir.join("job.mic");
    std::fs::write(&path, bytes).unwrap();
    path
}

async fn translate(
    factory: &TranslatorFactory,
    printer_type: &PrinterType,
    profile: Option<&PrinterProfile>,
    input: &Path,
    output: &Path,
) -> Result<f64, TranslationError> {
    let mut translator = factory
        .get(printer_type, profile, None)
        .expect("translator for printer type");
    translator.translate(input, output).await?;
    Ok(translator.progress().get())
}

#[tokio::test]
async fn marlin_job_produces_plain_gcode() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_fdm(dir.path(), ULTIMAKER_2, &sample_job());
    let output = dir.path().join("job.gcode");
    let factory = TranslatorFactory::with_builtin_translators(quiet_options());

    let progress = translate(&factory, &printer(ULTIMAKER_2), None, &input, &output)
        .await
        .unwrap();
    assert_eq!(progress, 1.0);

    let gcode = std::fs::read_to_string(&output).unwrap();
    let lines: Vec<&str> = gcode.lines().collect();
    assert!(lines.contains(&"M109 S210"), "{}", gcode);
    assert!(lines.contains(&"G28"));
    assert!(lines.contains(&"G1 X10.000 Y20.000 F3000"));
    assert!(lines.contains(&"M84"));
    let first = lines.iter().position(|l| l.starts_with("G1 X10")).unwrap();
    let second = lines.iter().position(|l| l.starts_with("G1 X30")).unwrap();
    assert!(first < second);
    assert!(lines[second].contains("E1.50000"));
}

#[tokio::test]
async fn delta_job_homes_once_and_shifts_the_bed() {
    let dir = tempfile::tempdir().unwrap();
    let mut job = sample_job();
    job.insert(3, FdmCommand::new(CommandType::HomeAxes));
    let input = write_fdm(dir.path(), DREAMMAKER_OVERLORD, &job);
    let output = dir.path().join("job.gcode");

    let printer_type = PrinterType {
        build_volume: BuildVolume {
            kind: VolumeType::Cylindrical,
            bed_offset: [1.0, 1.0],
            ..Default::default()
        },
        ..printer(DREAMMAKER_OVERLORD)
    };
    let factory = TranslatorFactory::with_builtin_translators(quiet_options());
    translate(&factory, &printer_type, None, &input, &output)
        .await
        .unwrap();

    let gcode = std::fs::read_to_string(&output).unwrap();
    assert_eq!(gcode.matches("G28").count(), 1, "{}", gcode);
    assert!(gcode.contains("G1 X20.000 Y30.000 F3000\n"));
}

#[tokio::test]
async fn printrbot_job_defers_homing_and_first_move() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_fdm(dir.path(), PRINTRBOT_PLAY, &sample_job());
    let output = dir.path().join("job.gcode");
    let factory = TranslatorFactory::with_builtin_translators(quiet_options());
    translate(&factory, &printer(PRINTRBOT_PLAY), None, &input, &output)
        .await
        .unwrap();

    let gcode = std::fs::read_to_string(&output).unwrap();
    assert!(gcode.contains("M104 S210\n"), "{}", gcode);
    assert!(!gcode.contains("G28"));
    assert!(!gcode.contains("G1 X10.000"));
}

#[tokio::test]
async fn dremel_job_is_wrapped_in_a_g3drem_container() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_fdm(dir.path(), DREMEL_IDEA_BUILDER, &sample_job());
    let output = dir.path().join("job.g3drem");
    let factory = TranslatorFactory::with_builtin_translators(TranslatorOptions::default());
    translate(&factory, &printer(DREMEL_IDEA_BUILDER), None, &input, &output)
        .await
        .unwrap();

    let bytes = std::fs::read(&output).unwrap();
    assert_eq!(&bytes[..16], g3drem::MAGIC);
    let image_addr = u32::from_le_bytes(bytes[16..20].try_into().unwrap()) as usize;
    let gcode_addr = u32::from_le_bytes(bytes[24..28].try_into().unwrap()) as usize;
    assert_eq!(image_addr, g3drem::HEADER_LEN);
    assert_eq!(&bytes[image_addr..image_addr + 2], b"BM");
    assert_eq!(gcode_addr - image_addr, g3drem::placeholder_bitmap().len());

    let gcode = String::from_utf8(bytes[gcode_addr..].to_vec()).unwrap();
    assert!(gcode.contains("\r\n"));
    assert!(!gcode.contains(';'), "{}", gcode);
}

fn commented_job() -> Vec<FdmCommand> {
    let mut job = sample_job();
    let mut layer = FdmCommand::new(CommandType::Comment);
    layer.comment = "layer 1".into();
    job.insert(3, layer);
    job
}

#[tokio::test]
async fn dremel_keeps_comments_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_fdm(dir.path(), DREMEL_IDEA_BUILDER, &commented_job());
    let output = dir.path().join("job.g3drem");
    let factory = TranslatorFactory::with_builtin_translators(TranslatorOptions::default());
    translate(&factory, &printer(DREMEL_IDEA_BUILDER), None, &input, &output)
        .await
        .unwrap();

    let bytes = std::fs::read(&output).unwrap();
    let gcode_addr = u32::from_le_bytes(bytes[24..28].try_into().unwrap()) as usize;
    let gcode = String::from_utf8(bytes[gcode_addr..].to_vec()).unwrap();
    assert!(gcode.contains("; layer 1\r\n"), "{}", gcode);

    let quiet = dir.path().join("quiet.g3drem");
    let factory = TranslatorFactory::with_builtin_translators(quiet_options());
    translate(&factory, &printer(DREMEL_IDEA_BUILDER), None, &input, &quiet)
        .await
        .unwrap();
    let bytes = std::fs::read(&quiet).unwrap();
    let gcode_addr = u32::from_le_bytes(bytes[24..28].try_into().unwrap()) as usize;
    assert!(!String::from_utf8_lossy(&bytes[gcode_addr..]).contains("layer 1"));
}

#[tokio::test]
async fn makerbot_keeps_comments_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_fdm(dir.path(), MAKERBOT_REPLICATOR_2, &commented_job());
    let output = dir.path().join("job.gcode");
    let factory = TranslatorFactory::with_builtin_translators(TranslatorOptions::default());
    translate(&factory, &printer(MAKERBOT_REPLICATOR_2), None, &input, &output)
        .await
        .unwrap();

    let gcode = std::fs::read_to_string(&output).unwrap();
    assert!(gcode.contains("; layer 1\n"), "{}", gcode);
    assert!(gcode.contains("M18 X Y Z A B; turn off steppers\n"), "{}", gcode);
}

#[tokio::test]
async fn dremel_uses_the_configured_icon() {
    let dir = tempfile::tempdir().unwrap();
    let icon = dir.path().join("icon.bmp");
    std::fs::write(&icon, b"BMicon").unwrap();
    let input = write_fdm(dir.path(), DREMEL_IDEA_BUILDER, &sample_job());
    let output = dir.path().join("job.g3drem");

    let options = TranslatorOptions {
        dremel_icon: Some(icon),
        ..Default::default()
    };
    let factory = TranslatorFactory::with_builtin_translators(options);
    translate(&factory, &printer(DREMEL_IDEA_BUILDER), None, &input, &output)
        .await
        .unwrap();

    let bytes = std::fs::read(&output).unwrap();
    let gcode_addr = u32::from_le_bytes(bytes[24..28].try_into().unwrap()) as usize;
    assert_eq!(gcode_addr, g3drem::HEADER_LEN + 6);
    assert_eq!(&bytes[g3drem::HEADER_LEN..gcode_addr], b"BMicon");
}

#[tokio::test]
async fn missing_dremel_icon_fails_the_translation() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_fdm(dir.path(), DREMEL_IDEA_BUILDER, &sample_job());
    let options = TranslatorOptions {
        dremel_icon: Some(dir.path().join("nope.bmp")),
        ..Default::default()
    };
    let factory = TranslatorFactory::with_builtin_translators(options);
    let err = translate(
        &factory,
        &printer(DREMEL_IDEA_BUILDER),
        None,
        &input,
        &dir.path().join("job.g3drem"),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, TranslationError::Io(_)));
}

#[tokio::test]
async fn unknown_printer_type_has_no_translator() {
    let factory = TranslatorFactory::with_builtin_translators(TranslatorOptions::default());
    assert!(factory.get(&printer("not-a-printer"), None, None).is_none());
}

fn ember_profile() -> PrinterProfile {
    let mut profile = PrinterProfile {
        id: "ember-default".into(),
        ..Default::default()
    };
    let mut names = vec![
        "layer_height".to_string(),
        "burn_in_exposure".to_string(),
        "burn_in_layers".to_string(),
        "first_layer_exposure_time".to_string(),
        "model_exposure_time".to_string(),
    ];
    for stage in ["burn_in_layer", "first_layer", "model_layer"] {
        for setting in [
            "separation_slide_velocity",
            "approach_slide_velocity",
            "z_axis_overlift",
            "separation_z_axis_velocity",
            "approach_z_axis_velocity",
            "angle_of_rotation",
            "wait_after_exposure",
            "wait_after_separation",
            "wait_after_approach",
        ] {
            names.push(format!("{}_{}", stage, setting));
        }
    }
    for name in names {
        profile.values.insert(name, json!(1.0));
    }
    profile.values.insert("layer_height".into(), json!(0.0025));
    profile
}

fn write_dlp(dir: &Path, slices: usize) -> PathBuf {
    let mut bytes = DLP_MAGIC.to_be_bytes().to_vec();
    let header = DlpHeader {
        printer_type_id: AUTODESK_EMBER.into(),
        num_slices: slices as u32,
        image_width: 1280,
        image_height: 800,
    };
    bytes.extend(header.encode_framed());
    for i in 0..slices {
        let slice = DlpSlice {
            png_data: format!("png-{}", i).into_bytes(),
        };
        bytes.extend(slice.encode_framed());
    }
    let path = dir.join("job.dlp");
    std::fs::write(&path, bytes).unwrap();
    path
}

#[tokio::test]
async fn ember_job_is_a_gzipped_tar_of_settings_and_slices() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_dlp(dir.path(), 3);
    let output = dir.path().join("job.tar.gz");
    let factory = TranslatorFactory::with_builtin_translators(TranslatorOptions::default());
    let profile = ember_profile();
    let progress = translate(&factory, &printer(AUTODESK_EMBER), Some(&profile), &input, &output)
        .await
        .unwrap();
    assert_eq!(progress, 1.0);

    let file = std::fs::File::open(&output).unwrap();
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    let mut entries = Vec::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let name = entry.path().unwrap().to_string_lossy().into_owned();
        let mut body = String::new();
        entry.read_to_string(&mut body).unwrap();
        entries.push((name, body));
    }

    let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(
        names,
        ["printsettings", "slice_1.png", "slice_2.png", "slice_3.png"]
    );
    assert!(entries[0].1.contains("\"LayerThicknessMicrons\": 25,\n"));
    assert!(entries[0].1.contains("\"JobName\": \"Spark\""));
    assert_eq!(entries[3].1, "png-2");
}

#[tokio::test]
async fn ember_requires_a_profile() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_dlp(dir.path(), 1);
    let factory = TranslatorFactory::with_builtin_translators(TranslatorOptions::default());
    let err = translate(
        &factory,
        &printer(AUTODESK_EMBER),
        None,
        &input,
        &dir.path().join("job.tar.gz"),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, TranslationError::MissingProfile(id) if id == AUTODESK_EMBER));
}

// printmgr_shared/src/printable.rs - decoded printable file records
use prost::{DecodeError, Message};
use serde::{Deserialize, Serialize};

/// Magic marker opening every FDM printable file (big-endian on disk).
pub const FDM_MAGIC: u32 = 0x14C6_4CAB;
/// Magic marker opening every DLP printable file (big-endian on disk).
pub const DLP_MAGIC: u32 = 0x5F52_BD92;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrintableKind {
    Fdm,
    Dlp,
}

impl PrintableKind {
    pub fn magic(self) -> u32 {
        match self {
            PrintableKind::Fdm => FDM_MAGIC,
            PrintableKind::Dlp => DLP_MAGIC,
        }
    }

    pub fn from_magic(magic: u32) -> Option<Self> {
        match magic {
            FDM_MAGIC => Some(PrintableKind::Fdm),
            DLP_MAGIC => Some(PrintableKind::Dlp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandType {
    EndOfCommands,
    Move,
    ExtrudeMove,
    Extrude,
    SetFeedRate,
    SetTempBed,
    SetTempNozzle,
    SetFanSpeed,
    SetUnits,
    DisableMotors,
    SetModeXyz,
    SetModeE,
    ResetExtrusionDistance,
    Pause,
    HomeAxes,
    Comment,
    StartPrint,
    EndPrint,
    Custom,
    Progress,
    Estimates,
    /// A type number this build does not know about.
    Unknown(u32),
}

impl CommandType {
    pub fn from_wire(value: u32) -> Self {
        use CommandType::*;
        match value {
            0 => EndOfCommands,
            1 => Move,
            2 => ExtrudeMove,
            3 => Extrude,
            4 => SetFeedRate,
            5 => SetTempBed,
            6 => SetTempNozzle,
            7 => SetFanSpeed,
            8 => SetUnits,
            9 => DisableMotors,
            10 => SetModeXyz,
            11 => SetModeE,
            12 => ResetExtrusionDistance,
            13 => Pause,
            14 => HomeAxes,
            15 => Comment,
            16 => StartPrint,
            17 => EndPrint,
            18 => Custom,
            19 => Progress,
            20 => Estimates,
            other => Unknown(other),
        }
    }

    pub fn to_wire(self) -> u32 {
        use CommandType::*;
        match self {
            EndOfCommands => 0,
            Move => 1,
            ExtrudeMove => 2,
            Extrude => 3,
            SetFeedRate => 4,
            SetTempBed => 5,
            SetTempNozzle => 6,
            SetFanSpeed => 7,
            SetUnits => 8,
            DisableMotors => 9,
            SetModeXyz => 10,
            SetModeE => 11,
            ResetExtrusionDistance => 12,
            Pause => 13,
            HomeAxes => 14,
            Comment => 15,
            StartPrint => 16,
            EndPrint => 17,
            Custom => 18,
            Progress => 19,
            Estimates => 20,
            Unknown(other) => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Units {
    #[default]
    Millimeters,
    Inches,
    Unknown(u32),
}

impl Units {
    pub fn from_wire(value: u32) -> Self {
        match value {
            0 => Units::Millimeters,
            1 => Units::Inches,
            other => Units::Unknown(other),
        }
    }

    pub fn to_wire(self) -> u32 {
        match self {
            Units::Millimeters => 0,
            Units::Inches => 1,
            Units::Unknown(other) => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PositionMode {
    #[default]
    Absolute,
    Relative,
    Unknown(u32),
}

impl PositionMode {
    pub fn from_wire(value: u32) -> Self {
        match value {
            0 => PositionMode::Absolute,
            1 => PositionMode::Relative,
            other => PositionMode::Unknown(other),
        }
    }

    pub fn to_wire(self) -> u32 {
        match self {
            PositionMode::Absolute => 0,
            PositionMode::Relative => 1,
            PositionMode::Unknown(other) => other,
        }
    }
}

/// Movement axes carried by an FDM command, in emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
    E,
    F,
}

impl Axis {
    pub const ALL: [Axis; 5] = [Axis::X, Axis::Y, Axis::Z, Axis::E, Axis::F];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// A record that can be pulled out of, or written into, a printable file.
/// On disk each record is a protobuf message behind a varint length.
pub trait PrintableMessage: Sized {
    fn from_body(body: &[u8]) -> Result<Self, DecodeError>;

    /// Varint length prefix followed by the encoded body.
    fn encode_framed(&self) -> Vec<u8>;
}

macro_rules! plain_message {
    ($($ty:ty),*) => {$(
        impl PrintableMessage for $ty {
            fn from_body(body: &[u8]) -> Result<Self, DecodeError> {
                <$ty as Message>::decode(body)
            }

            fn encode_framed(&self) -> Vec<u8> {
                self.encode_length_delimited_to_vec()
            }
        }
    )*};
}

#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
pub struct FdmHeader {
    #[prost(string, tag = "1")]
    pub printer_type_id: String,
    #[prost(string, tag = "2")]
    pub profile_id: String,
    #[prost(string, tag = "3")]
    pub material_id: String,
}

/// One decoded FDM command. Movement commands carry parallel per-axis
/// arrays so a single command can describe a polyline of sub-moves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FdmCommand {
    pub command_type: CommandType,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
    pub e: Vec<f64>,
    pub f: Vec<f64>,
    pub nozzle_temp: f64,
    pub bed_temp: f64,
    pub fan_speed: f64,
    pub pause_time: f64,
    pub comment: String,
    pub units: Units,
    pub mode: PositionMode,
    pub wait: bool,
    pub custom: String,
    pub progress: f64,
    pub estimated_print_time: f64,
    pub estimated_material_length: f64,
}

impl Default for FdmCommand {
    fn default() -> Self {
        Self::new(CommandType::EndOfCommands)
    }
}

impl FdmCommand {
    pub fn new(command_type: CommandType) -> Self {
        Self {
            command_type,
            x: Vec::new(),
            y: Vec::new(),
            z: Vec::new(),
            e: Vec::new(),
            f: Vec::new(),
            nozzle_temp: 0.0,
            bed_temp: 0.0,
            fan_speed: 0.0,
            pause_time: 0.0,
            comment: String::new(),
            units: Units::default(),
            mode: PositionMode::default(),
            wait: false,
            custom: String::new(),
            progress: 0.0,
            estimated_print_time: 0.0,
            estimated_material_length: 0.0,
        }
    }

    pub fn axis(&self, axis: Axis) -> &[f64] {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
            Axis::E => &self.e,
            Axis::F => &self.f,
        }
    }

    pub fn axis_mut(&mut self, axis: Axis) -> &mut Vec<f64> {
        match axis {
            Axis::X => &mut self.x,
            Axis::Y => &mut self.y,
            Axis::Z => &mut self.z,
            Axis::E => &mut self.e,
            Axis::F => &mut self.f,
        }
    }

    pub fn is_end_of_commands(&self) -> bool {
        self.command_type == CommandType::EndOfCommands
    }
}

/// Protobuf shape of an FDM command. Enums travel as raw numbers so
/// values this build does not know survive decoding.
#[derive(Clone, PartialEq, Message)]
pub struct FdmCommandRecord {
    #[prost(int32, tag = "1")]
    pub r#type: i32,
    #[prost(float, repeated, tag = "2")]
    pub x: Vec<f32>,
    #[prost(float, repeated, tag = "3")]
    pub y: Vec<f32>,
    #[prost(float, repeated, tag = "4")]
    pub z: Vec<f32>,
    #[prost(float, repeated, tag = "5")]
    pub e: Vec<f32>,
    #[prost(float, repeated, tag = "6")]
    pub f: Vec<f32>,
    #[prost(float, tag = "7")]
    pub nozzle_temp: f32,
    #[prost(float, tag = "8")]
    pub bed_temp: f32,
    #[prost(float, tag = "9")]
    pub fan_speed: f32,
    #[prost(float, tag = "10")]
    pub pause_time: f32,
    #[prost(string, tag = "11")]
    pub comment: String,
    #[prost(int32, tag = "12")]
    pub units: i32,
    #[prost(int32, tag = "13")]
    pub mode: i32,
    #[prost(bool, tag = "14")]
    pub wait: bool,
    #[prost(string, tag = "15")]
    pub custom: String,
    #[prost(float, tag = "16")]
    pub progress: f32,
    #[prost(float, tag = "17")]
    pub estimated_print_time: f32,
    #[prost(float, tag = "18")]
    pub estimated_material_length: f32,
}

fn widen(values: Vec<f32>) -> Vec<f64> {
    values.into_iter().map(f64::from).collect()
}

fn narrow(values: &[f64]) -> Vec<f32> {
    values.iter().map(|v| *v as f32).collect()
}

impl From<FdmCommandRecord> for FdmCommand {
    fn from(record: FdmCommandRecord) -> Self {
        Self {
            command_type: CommandType::from_wire(record.r#type as u32),
            x: widen(record.x),
            y: widen(record.y),
            z: widen(record.z),
            e: widen(record.e),
            f: widen(record.f),
            nozzle_temp: record.nozzle_temp.into(),
            bed_temp: record.bed_temp.into(),
            fan_speed: record.fan_speed.into(),
            pause_time: record.pause_time.into(),
            comment: record.comment,
            units: Units::from_wire(record.units as u32),
            mode: PositionMode::from_wire(record.mode as u32),
            wait: record.wait,
            custom: record.custom,
            progress: record.progress.into(),
            estimated_print_time: record.estimated_print_time.into(),
            estimated_material_length: record.estimated_material_length.into(),
        }
    }
}

impl From<&FdmCommand> for FdmCommandRecord {
    fn from(cmd: &FdmCommand) -> Self {
        Self {
            r#type: cmd.command_type.to_wire() as i32,
            x: narrow(&cmd.x),
            y: narrow(&cmd.y),
            z: narrow(&cmd.z),
            e: narrow(&cmd.e),
            f: narrow(&cmd.f),
            nozzle_temp: cmd.nozzle_temp as f32,
            bed_temp: cmd.bed_temp as f32,
            fan_speed: cmd.fan_speed as f32,
            pause_time: cmd.pause_time as f32,
            comment: cmd.comment.clone(),
            units: cmd.units.to_wire() as i32,
            mode: cmd.mode.to_wire() as i32,
            wait: cmd.wait,
            custom: cmd.custom.clone(),
            progress: cmd.progress as f32,
            estimated_print_time: cmd.estimated_print_time as f32,
            estimated_material_length: cmd.estimated_material_length as f32,
        }
    }
}

impl PrintableMessage for FdmCommand {
    fn from_body(body: &[u8]) -> Result<Self, DecodeError> {
        FdmCommandRecord::decode(body).map(FdmCommand::from)
    }

    fn encode_framed(&self) -> Vec<u8> {
        FdmCommandRecord::from(self).encode_length_delimited_to_vec()
    }
}

#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
pub struct DlpHeader {
    #[prost(string, tag = "1")]
    pub printer_type_id: String,
    #[prost(uint32, tag = "2")]
    pub num_slices: u32,
    #[prost(uint32, tag = "3")]
    pub image_width: u32,
    #[prost(uint32, tag = "4")]
    pub image_height: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct DlpSlice {
    #[prost(bytes = "vec", tag = "1")]
    pub png_data: Vec<u8>,
}

plain_message!(FdmHeader, DlpHeader, DlpSlice);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fdm_command_survives_the_wire() {
        let mut cmd = FdmCommand::new(CommandType::ExtrudeMove);
        cmd.x = vec![140.78848266601562, 139.18099975585938];
        cmd.y = vec![145.38790893554688, 144.3461151123047];
        cmd.e = vec![190.988037109375, 191.0517578125];
        cmd.f = vec![2400.0];
        cmd.comment = "bead-solid_infill".into();
        cmd.wait = true;
        let framed = cmd.encode_framed();
        let len = prost::decode_length_delimiter(&framed[..]).unwrap();
        let body = &framed[framed.len() - len..];
        assert_eq!(FdmCommand::from_body(body).unwrap(), cmd);
    }

    #[test]
    fn axis_arrays_are_packed() {
        let mut cmd = FdmCommand::new(CommandType::Move);
        cmd.x = vec![1.0, 2.0];
        let body = FdmCommandRecord::from(&cmd).encode_to_vec();
        // type=1 varint, then field 2 length-delimited with two f32s
        assert_eq!(&body[..4], &[0x08, 0x01, 0x12, 0x08]);
    }

    #[test]
    fn end_of_commands_encodes_to_an_empty_body() {
        let cmd = FdmCommand::new(CommandType::EndOfCommands);
        assert_eq!(cmd.encode_framed(), vec![0]);
        assert!(FdmCommand::from_body(&[]).unwrap().is_end_of_commands());
    }

    #[test]
    fn unknown_command_type_is_kept() {
        let body = FdmCommandRecord {
            r#type: 42,
            ..Default::default()
        }
        .encode_to_vec();
        let cmd = FdmCommand::from_body(&body).unwrap();
        assert_eq!(cmd.command_type, CommandType::Unknown(42));
    }

    #[test]
    fn truncated_body_is_rejected() {
        let header = DlpHeader {
            printer_type_id: "ember".into(),
            num_slices: 3,
            ..Default::default()
        };
        let body = header.encode_to_vec();
        assert!(DlpHeader::from_body(&body[..body.len() - 1]).is_err());
        assert_eq!(DlpHeader::from_body(&body).unwrap(), header);
    }

    #[test]
    fn magic_lookup() {
        assert_eq!(PrintableKind::from_magic(0x14C64CAB), Some(PrintableKind::Fdm));
        assert_eq!(PrintableKind::from_magic(0x5F52BD92), Some(PrintableKind::Dlp));
        assert_eq!(PrintableKind::from_magic(0), None);
    }
}

// printmgr_shared: printable records, their protobuf framing and driver status types
// shared by the translators, the drivers and any front end.

pub mod printable;
pub mod printer_type;
pub mod status;

pub use printable::{
    Axis, CommandType, DlpHeader, DlpSlice, FdmCommand, FdmCommandRecord, FdmHeader, PositionMode,
    PrintableKind, PrintableMessage, Units, DLP_MAGIC, FDM_MAGIC,
};
pub use printer_type::{
    BuildVolume, Material, PrinterProfile, PrinterType, SupportedConnection, Technology,
    VolumeType,
};
pub use status::{
    DriverCommand, DriverError, DriverResponse, DriverState, JobInfo, JobState, Sensor, Status,
    Tool,
};
pub use prost::DecodeError;

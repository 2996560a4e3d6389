// src/printers/mod.rs - printer drivers and the plumbing they share
pub mod command_queue;
pub mod driver;
pub mod heartbeat;
pub mod octoprint;
pub mod serial;
pub mod virtual_printer;

pub use command_queue::{CommandExecutor, CommandQueue, QueueCommand, QueueItem, Responder};
pub use driver::{Asset, CommandParams, DriverBase, DriverEvent, PrinterDriver};
pub use heartbeat::Heartbeat;
pub use octoprint::{OctoprintError, OctoprintPrinter};
pub use serial::{SerialError, SerialPrinter};
pub use virtual_printer::VirtualPrinter;

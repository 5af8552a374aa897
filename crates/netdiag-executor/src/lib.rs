//! Ping and dig execution for the reference backend.
//!
//! Provides:
//! - Typed, validated command parameters
//! - Command line building
//! - `ProcessExecutor` streaming child output as response frames

pub mod command;
pub mod params;
pub mod process;
pub mod validation;

pub use command::{CommandBuilder, CommandParts};
pub use params::{CommandParams, DigParams, PingParams, RecordType};
pub use process::ProcessExecutor;
pub use validation::ValidationError;

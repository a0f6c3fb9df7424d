//! # Error Types
//!
//! Defines error types and a result alias used throughout the [crate],
//! using the [thiserror] crate to define error types with detailed
//! messages. Errors raised while a command runs unwind to the REPL top
//! level and are reported there; they never terminate the session.

use gimli::DwTag;
use thiserror::Error;

use crate::Addr;

/// Type alias for Results returned by minidbg functions
pub type Result<T> = std::result::Result<T, DebuggerError>;

/// All error conditions the debugger can run into, from system-level
/// failures to missing debug information.
#[derive(Error, Debug)]
pub enum DebuggerError {
    #[error("Os error: {0}")]
    Os(#[from] nix::Error),
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Executable does not exist: {0}")]
    ExecutableDoesNotExist(String),
    #[error("Executable is not a file: {0}")]
    ExecutableIsNotAFile(String),
    #[error("Could not convert to CString: {0}")]
    CStringConv(#[from] std::ffi::NulError),
    #[error("No debuggee running")]
    NoDebugee,
    #[error("Tried to enable breakpoint again")]
    BreakpointIsAlreadyEnabled,
    #[error("Tried to disable breakpoint again")]
    BreakpointIsAlreadyDisabled,
    #[error("Could not parse integer: {0}")]
    ParseInt(#[from] std::num::ParseIntError),
    #[error("Could not parse string: {0}")]
    ParseStr(String),
    #[error("Unknown command")]
    UnknownCommand,
    #[error("Error while getting cli input: {0}")]
    CliUiDialogueError(#[from] dialoguer::Error),
    #[error("Error while reading information from the executable file: {0}")]
    Object(#[from] object::Error),
    #[error("Error while working with the DWARF debug information: {0}")]
    Dwarf(#[from] gimli::Error),
    #[error("DWARF tag not implemented for this debugger: {0}")]
    DwTagNotImplemented(DwTag),
    #[error("While calculating the higher address with DWARF debug symbols, the lower address was none but the higher (offset) was some")]
    HighAddrExistsButNotLowAddr,
    #[error("Cannot find function for address {0}")]
    FunctionNotFound(Addr),
    #[error("Cannot find line entry for address {0}")]
    LineEntryNotFound(Addr),
    #[error("Register with DWARF number {0} is not supported by this debugger")]
    UnknownDwarfRegister(u16),
    #[error("Unknown register name: {0}")]
    UnknownRegisterName(String),
    #[error("Unhandled variable location")]
    UnhandledVariableLocation,
}

//! The seam between the debugger engine and whatever collects user
//! input. The UI turns a line of input into a [`Status`] command; the
//! engine answers with a [`Feedback`] the UI renders on the next round.

use crate::addr::Addr;
use crate::errors::Result;
use crate::feedback::Feedback;
use crate::regs::Register;
use crate::Word;

pub mod cli;

/// A parsed user command, ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Continue,
    SetBreakpoint(Addr),
    SetBreakpointAtFunction(String),
    SetBreakpointAtSourceLine(String, u64),
    DumpRegisters,
    ReadRegister(Register),
    WriteRegister(Register, u64),
    ReadMem(Addr),
    WriteMem(Addr, Word),
    StepIn,
    StepOver,
    StepOut,
    LookupSymbol(String),
    Backtrace,
    ReadVariables,
    DebuggerQuit,
}

pub trait DebuggerUI {
    /// Renders the previous command's feedback, then blocks for the next
    /// command.
    fn process(&mut self, feedback: &Feedback) -> Result<Status>;
}

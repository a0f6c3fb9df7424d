//! # minidbg
//!
//! A minimal interactive source-level debugger for x86-64 Linux ELF
//! executables. The debugger forks the target, attaches via ptrace and
//! drives it through a read-eval-print loop: software breakpoints,
//! instruction and source-line stepping, register and memory access, a
//! frame-pointer backtrace and DWARF-based variable reading.

use nix::sys::ptrace;
use nix::unistd::Pid;

use crate::errors::Result;

pub mod addr;
pub mod breakpoint;
pub mod consts;
pub mod dbginfo;
pub mod debuggee;
pub mod debugger;
pub mod dwarf_parse;
pub mod errors;
pub mod feedback;
pub mod regs;
pub mod source;
pub mod ui;
pub mod unwind;
pub mod variable;

pub use addr::Addr;
pub use regs::Register;

/// A machine word of the tracee, as ptrace hands it out.
pub type Word = i64;

/// Size of a [Word] in bytes.
pub const WORD_BYTES: usize = 8;

/// Reads a single machine word at an arbitrary address in the tracee.
///
/// # Errors
///
/// Fails if the tracee is not stopped or the address is not mapped.
pub fn mem_read_word(pid: Pid, addr: Addr) -> Result<Word> {
    Ok(ptrace::read(pid, addr.raw_pointer())?)
}

/// Writes a single machine word at an arbitrary address in the tracee.
///
/// # Errors
///
/// Fails if the tracee is not stopped or the address is not writable.
pub fn mem_write_word(pid: Pid, addr: Addr, value: Word) -> Result<()> {
    ptrace::write(pid, addr.raw_pointer(), value)?;
    Ok(())
}

//! Software breakpoints.
//!
//! A breakpoint patches the low byte of the machine word at its address
//! with the one-byte int3 opcode and remembers the original byte so the
//! instruction can be restored. The saved byte doubles as the enabled
//! flag: a breakpoint is enabled exactly while a saved byte is present.

use nix::unistd::Pid;

use crate::addr::Addr;
use crate::errors::{DebuggerError, Result};
use crate::{mem_read_word, mem_write_word, Word};

/// The int3 software-interrupt opcode.
pub const INT3: Word = 0xcc;
pub const BYTE_MASK: Word = 0xff;

/// Replaces the low byte of `word` with int3, returning the saved
/// original byte and the patched word.
pub(crate) fn patch_trap(word: Word) -> (u8, Word) {
    ((word & BYTE_MASK) as u8, (word & !BYTE_MASK) | INT3)
}

/// Restores `saved` into the low byte of `word`.
pub(crate) fn restore_byte(word: Word, saved: u8) -> Word {
    (word & !BYTE_MASK) | Word::from(saved)
}

pub struct Breakpoint {
    addr: Addr,
    pid: Pid,
    saved_data: Option<u8>,
}

impl Breakpoint {
    /// Constructs a disabled breakpoint. Nothing is written to the tracee.
    pub fn new(pid: Pid, addr: Addr) -> Self {
        Self {
            pid,
            addr,
            saved_data: None,
        }
    }

    /// Patches the trap opcode into the tracee and saves the original byte.
    ///
    /// # Errors
    ///
    /// Enabling an already-enabled breakpoint is
    /// [`DebuggerError::BreakpointIsAlreadyEnabled`]: the saved byte would
    /// otherwise be clobbered with the trap opcode itself.
    pub fn enable(&mut self) -> Result<()> {
        if self.saved_data.is_some() {
            return Err(DebuggerError::BreakpointIsAlreadyEnabled);
        }

        let word = mem_read_word(self.pid, self.addr)?;
        let (saved, patched) = patch_trap(word);
        mem_write_word(self.pid, self.addr, patched)?;
        self.saved_data = Some(saved);

        Ok(())
    }

    /// Restores the saved byte in the tracee.
    ///
    /// # Errors
    ///
    /// Disabling an already-disabled breakpoint is
    /// [`DebuggerError::BreakpointIsAlreadyDisabled`].
    pub fn disable(&mut self) -> Result<()> {
        let saved = self
            .saved_data
            .ok_or(DebuggerError::BreakpointIsAlreadyDisabled)?;

        let word = mem_read_word(self.pid, self.addr)?;
        mem_write_word(self.pid, self.addr, restore_byte(word, saved))?;
        self.saved_data = None;

        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.saved_data.is_some()
    }

    pub fn addr(&self) -> Addr {
        self.addr
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_patch_saves_low_byte() {
        let word: Word = 0x1122334455667788;
        let (saved, patched) = patch_trap(word);
        assert_eq!(saved, 0x88);
        assert_eq!(patched, 0x11223344556677cc);
    }

    #[test]
    fn test_restore_is_exact() {
        let word: Word = 0x00ffeeddccbbaa55;
        let (saved, patched) = patch_trap(word);
        assert_eq!(restore_byte(patched, saved), word);
    }

    #[test]
    fn test_patch_preserves_sign_bit() {
        let word: Word = -2; // 0xffff_ffff_ffff_fffe
        let (saved, patched) = patch_trap(word);
        assert_eq!(saved, 0xfe);
        assert_eq!(patched as u64, 0xffff_ffff_ffff_ffcc);
        assert_eq!(restore_byte(patched, saved), word);
    }
}

//! # Register File Adapter
//!
//! Table-driven access to the tracee's general-purpose registers.
//!
//! The kernel exposes the registers of a stopped tracee as one fixed
//! struct ([`user_regs_struct`]). Every register is described by one
//! [`RegisterDescriptor`] carrying its DWARF register number and display
//! name, and the descriptor table is kept in the exact field order of the
//! kernel block, so a register's value is simply the word at its table
//! position. Reading or writing always fetches and stores the whole block
//! with a single ptrace request.

use std::fmt::Display;
use std::str::FromStr;

use nix::libc::user_regs_struct;
use nix::sys::ptrace;
use nix::unistd::Pid;

use crate::errors::{DebuggerError, Result};

/// Number of words in the x86-64 general-purpose register block.
pub const TOTAL_REGISTERS: usize = 27;

/// An x86-64 general-purpose register.
///
/// The variants are declared in the field order of [`user_regs_struct`],
/// so `reg as usize` is the register's word index within the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
pub enum Register {
    r15,
    r14,
    r13,
    r12,
    rbp,
    rbx,
    r11,
    r10,
    r9,
    r8,
    rax,
    rcx,
    rdx,
    rsi,
    rdi,
    orig_rax,
    rip,
    cs,
    eflags,
    rsp,
    ss,
    fs_base,
    gs_base,
    ds,
    es,
    fs,
    gs,
}

impl Register {
    fn index(self) -> usize {
        self as usize
    }

    /// The display name of this register.
    pub fn name(self) -> &'static str {
        REGISTER_DESCRIPTORS[self.index()].name
    }
}

impl Display for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Register {
    type Err = DebuggerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        REGISTER_DESCRIPTORS
            .iter()
            .find(|d| d.name == s)
            .map(|d| d.reg)
            .ok_or_else(|| DebuggerError::UnknownRegisterName(s.to_string()))
    }
}

/// Static metadata for one register: the architectural register, its DWARF
/// register number (-1 where DWARF defines none) and its display name.
#[derive(Debug, Clone, Copy)]
pub struct RegisterDescriptor {
    pub reg: Register,
    pub dwarf: i32,
    pub name: &'static str,
}

/// The register table, in kernel block order. The positional correspondence
/// with [`user_regs_struct`] is load-bearing; see [`block_to_words`].
///
/// DWARF register numbers follow the System V AMD64 ABI.
pub static REGISTER_DESCRIPTORS: [RegisterDescriptor; TOTAL_REGISTERS] = [
    RegisterDescriptor { reg: Register::r15, dwarf: 15, name: "r15" },
    RegisterDescriptor { reg: Register::r14, dwarf: 14, name: "r14" },
    RegisterDescriptor { reg: Register::r13, dwarf: 13, name: "r13" },
    RegisterDescriptor { reg: Register::r12, dwarf: 12, name: "r12" },
    RegisterDescriptor { reg: Register::rbp, dwarf: 6, name: "rbp" },
    RegisterDescriptor { reg: Register::rbx, dwarf: 3, name: "rbx" },
    RegisterDescriptor { reg: Register::r11, dwarf: 11, name: "r11" },
    RegisterDescriptor { reg: Register::r10, dwarf: 10, name: "r10" },
    RegisterDescriptor { reg: Register::r9, dwarf: 9, name: "r9" },
    RegisterDescriptor { reg: Register::r8, dwarf: 8, name: "r8" },
    RegisterDescriptor { reg: Register::rax, dwarf: 0, name: "rax" },
    RegisterDescriptor { reg: Register::rcx, dwarf: 2, name: "rcx" },
    RegisterDescriptor { reg: Register::rdx, dwarf: 1, name: "rdx" },
    RegisterDescriptor { reg: Register::rsi, dwarf: 4, name: "rsi" },
    RegisterDescriptor { reg: Register::rdi, dwarf: 5, name: "rdi" },
    RegisterDescriptor { reg: Register::orig_rax, dwarf: -1, name: "orig_rax" },
    RegisterDescriptor { reg: Register::rip, dwarf: -1, name: "rip" },
    RegisterDescriptor { reg: Register::cs, dwarf: 51, name: "cs" },
    RegisterDescriptor { reg: Register::eflags, dwarf: 49, name: "eflags" },
    RegisterDescriptor { reg: Register::rsp, dwarf: 7, name: "rsp" },
    RegisterDescriptor { reg: Register::ss, dwarf: 52, name: "ss" },
    RegisterDescriptor { reg: Register::fs_base, dwarf: 58, name: "fs_base" },
    RegisterDescriptor { reg: Register::gs_base, dwarf: 59, name: "gs_base" },
    RegisterDescriptor { reg: Register::ds, dwarf: 53, name: "ds" },
    RegisterDescriptor { reg: Register::es, dwarf: 50, name: "es" },
    RegisterDescriptor { reg: Register::fs, dwarf: 54, name: "fs" },
    RegisterDescriptor { reg: Register::gs, dwarf: 55, name: "gs" },
];

/// Flattens the kernel register block into its positional word layout.
pub(crate) fn block_to_words(regs: &user_regs_struct) -> [u64; TOTAL_REGISTERS] {
    [
        regs.r15,
        regs.r14,
        regs.r13,
        regs.r12,
        regs.rbp,
        regs.rbx,
        regs.r11,
        regs.r10,
        regs.r9,
        regs.r8,
        regs.rax,
        regs.rcx,
        regs.rdx,
        regs.rsi,
        regs.rdi,
        regs.orig_rax,
        regs.rip,
        regs.cs,
        regs.eflags,
        regs.rsp,
        regs.ss,
        regs.fs_base,
        regs.gs_base,
        regs.ds,
        regs.es,
        regs.fs,
        regs.gs,
    ]
}

fn words_to_block(words: &[u64; TOTAL_REGISTERS]) -> user_regs_struct {
    user_regs_struct {
        r15: words[0],
        r14: words[1],
        r13: words[2],
        r12: words[3],
        rbp: words[4],
        rbx: words[5],
        r11: words[6],
        r10: words[7],
        r9: words[8],
        r8: words[9],
        rax: words[10],
        rcx: words[11],
        rdx: words[12],
        rsi: words[13],
        rdi: words[14],
        orig_rax: words[15],
        rip: words[16],
        cs: words[17],
        eflags: words[18],
        rsp: words[19],
        ss: words[20],
        fs_base: words[21],
        gs_base: words[22],
        ds: words[23],
        es: words[24],
        fs: words[25],
        gs: words[26],
    }
}

/// Fetches the whole register block and returns the requested register.
///
/// # Errors
///
/// Fails if the tracee is not stopped.
pub fn get_reg(pid: Pid, r: Register) -> Result<u64> {
    let regs = ptrace::getregs(pid)?;
    Ok(block_to_words(&regs)[r.index()])
}

/// Fetches the register block, overwrites one register, writes it back.
///
/// # Errors
///
/// Fails if the tracee is not stopped.
pub fn set_reg(pid: Pid, r: Register, value: u64) -> Result<()> {
    let regs = ptrace::getregs(pid)?;
    let mut words = block_to_words(&regs);
    words[r.index()] = value;
    ptrace::setregs(pid, words_to_block(&words))?;
    Ok(())
}

/// Reads the register with the given DWARF register number.
///
/// # Errors
///
/// Fails with [`DebuggerError::UnknownDwarfRegister`] if no descriptor
/// carries that number (wrong or hostile DWARF information).
pub fn get_reg_by_dwarf(pid: Pid, dwarf: u16) -> Result<u64> {
    let descriptor = REGISTER_DESCRIPTORS
        .iter()
        .find(|d| d.dwarf == i32::from(dwarf))
        .ok_or(DebuggerError::UnknownDwarfRegister(dwarf))?;
    get_reg(pid, descriptor.reg)
}

#[cfg(test)]
mod test {
    use super::*;

    fn distinct_block() -> user_regs_struct {
        let mut words = [0u64; TOTAL_REGISTERS];
        for (idx, w) in words.iter_mut().enumerate() {
            *w = idx as u64 + 1;
        }
        words_to_block(&words)
    }

    #[test]
    fn test_descriptor_table_is_positional() {
        for (idx, descriptor) in REGISTER_DESCRIPTORS.iter().enumerate() {
            assert_eq!(descriptor.reg.index(), idx, "{}", descriptor.name);
        }
    }

    #[test]
    fn test_block_round_trip() {
        let regs = distinct_block();
        let words = block_to_words(&regs);
        for (idx, w) in words.iter().enumerate() {
            assert_eq!(*w, idx as u64 + 1);
        }
        // spot-check a few fields against their table position
        assert_eq!(regs.rbp, words[Register::rbp.index()]);
        assert_eq!(regs.rax, words[Register::rax.index()]);
        assert_eq!(regs.rip, words[Register::rip.index()]);
        assert_eq!(regs.gs, words[Register::gs.index()]);
    }

    #[test]
    fn test_register_names() {
        assert_eq!(Register::rip.name(), "rip");
        assert_eq!("rax".parse::<Register>().unwrap(), Register::rax);
        assert_eq!("fs_base".parse::<Register>().unwrap(), Register::fs_base);
        assert!("xmm0".parse::<Register>().is_err());
    }

    #[test]
    fn test_dwarf_numbers() {
        let by_dwarf = |n: i32| {
            REGISTER_DESCRIPTORS
                .iter()
                .find(|d| d.dwarf == n)
                .map(|d| d.reg)
        };
        assert_eq!(by_dwarf(0), Some(Register::rax));
        assert_eq!(by_dwarf(6), Some(Register::rbp));
        assert_eq!(by_dwarf(7), Some(Register::rsp));
        assert_eq!(by_dwarf(16), None); // rip has no DWARF mapping here
    }
}

//! The tracee side of a debugging session: the child process id, the
//! breakpoint map, the parsed debug information and the load bias that
//! separates runtime addresses from DWARF addresses.

use std::collections::HashMap;

use nix::sys::ptrace;
use nix::unistd::Pid;
use tracing::debug;

use crate::addr::Addr;
use crate::breakpoint::Breakpoint;
use crate::dbginfo::{DebugInfo, ElfSymbol};
use crate::errors::Result;

pub struct Debuggee {
    pub(crate) pid: Pid,
    pub(crate) breakpoints: HashMap<Addr, Breakpoint>,
    pub(crate) dbginfo: DebugInfo,
    load_bias: Option<Addr>,
}

impl Debuggee {
    pub(crate) fn build(pid: Pid, dbginfo: DebugInfo) -> Self {
        Self {
            pid,
            breakpoints: HashMap::new(),
            dbginfo,
            load_bias: None,
        }
    }

    pub fn kill(&self) -> Result<()> {
        ptrace::kill(self.pid)?;
        Ok(())
    }

    /// Determines the load bias of the running tracee: the base of its
    /// first mapping for position-independent executables, zero otherwise.
    ///
    /// Must run once the tracee has stopped after exec, before any
    /// breakpoint is placed or navigation query resolved. Later calls are
    /// a no-op; the bias never changes within a session.
    ///
    /// # Errors
    ///
    /// Fails if the process map cannot be read.
    pub fn initialise_load_bias(&mut self) -> Result<()> {
        if self.load_bias.is_some() {
            return Ok(());
        }
        let bias = if self.dbginfo.is_dynamic() {
            let maps = proc_maps::get_process_maps(self.pid.as_raw())?;
            maps.first()
                .map_or(Addr::from(0usize), |m| Addr::from(m.start()))
        } else {
            Addr::from(0usize)
        };
        debug!("load bias: {bias}");
        self.load_bias = Some(bias);
        Ok(())
    }

    pub fn load_bias(&self) -> Addr {
        self.load_bias.unwrap_or(Addr::from(0usize))
    }

    /// DWARF address to runtime address.
    pub fn to_runtime(&self, addr: Addr) -> Addr {
        addr + self.load_bias().usize()
    }

    /// Runtime address to DWARF address.
    pub fn to_dwarf(&self, addr: Addr) -> Addr {
        addr - self.load_bias().usize()
    }

    /// Runtime breakpoint addresses for every function named `name`: the
    /// line entry one past the one at the function's low pc, so the
    /// breakpoint lands on the first user-code line after the prologue.
    ///
    /// Overloaded names are not resolved; every match is returned.
    ///
    /// # Errors
    ///
    /// Fails if a matching function has no line table coverage.
    pub fn function_breakpoint_addrs(&self, name: &str) -> Result<Vec<Addr>> {
        let mut addrs = Vec::new();
        for fun in self.dbginfo.functions_by_name(name) {
            let Some(low) = fun.low_addr() else { continue };
            let entry = self.dbginfo.post_prologue_entry(low)?;
            addrs.push(self.to_runtime(entry.addr));
        }
        Ok(addrs)
    }

    /// Runtime address of the first statement at `file`:`line`, if any.
    ///
    /// # Errors
    ///
    /// Fails if the line tables cannot be read.
    pub fn source_breakpoint_addr(&self, file: &str, line: u64) -> Result<Option<Addr>> {
        Ok(self
            .dbginfo
            .source_line_to_addr(file, line)?
            .map(|addr| self.to_runtime(addr)))
    }

    pub fn symbols_by_name(&self, name: &str) -> Vec<ElfSymbol> {
        self.dbginfo.lookup_symbol(name)
    }
}

//! # Debugger core
//!
//! Owns the session: launches the tracee, classifies its stops, and
//! implements the stepping algorithms (step-in, step-over, step-out,
//! continue) on top of breakpoints, the register file and the DWARF/ELF
//! navigator. Commands arrive from the UI as [`Status`] values and leave
//! as [`Feedback`].

use std::ffi::CString;
use std::path::Path;

use nix::sys::personality::{self, Persona};
use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{execv, fork, ForkResult};
use tracing::{debug, error, trace, warn};

use crate::addr::Addr;
use crate::breakpoint::Breakpoint;
use crate::consts::{SI_KERNEL, TRAP_BRKPT, TRAP_TRACE};
use crate::dbginfo::{DebugInfo, LineEntry, LocationAttr, SymbolKind};
use crate::debuggee::Debuggee;
use crate::dwarf_parse::{evaluate_expression, ExprContext, TraceeContext};
use crate::errors::{DebuggerError, Result};
use crate::feedback::Feedback;
use crate::regs::{self, Register};
use crate::source;
use crate::ui::{DebuggerUI, Status};
use crate::unwind::{Backtrace, MAX_FRAMES};
use crate::variable::{VariableLocation, VariableValue};
use crate::{mem_read_word, mem_write_word, Word};

/// Stack offset of the saved return address relative to rbp.
const RETURN_ADDR_OFFSET: usize = 8;

pub struct Debugger<UI: DebuggerUI> {
    pub(crate) debuggee: Option<Debuggee>,
    ui: UI,
}

impl<UI: DebuggerUI> Debugger<UI> {
    pub fn build(ui: UI) -> Self {
        Debugger { debuggee: None, ui }
    }

    fn debuggee(&self) -> Result<&Debuggee> {
        self.debuggee.as_ref().ok_or(DebuggerError::NoDebugee)
    }

    fn debuggee_mut(&mut self) -> Result<&mut Debuggee> {
        self.debuggee.as_mut().ok_or(DebuggerError::NoDebugee)
    }

    /// Forks and execs the target under tracing; the parent keeps the
    /// child as its debuggee.
    ///
    /// # Errors
    ///
    /// Fails if the path does not point to a file, the debug information
    /// cannot be parsed, or the fork fails.
    pub fn launch(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path: &Path = path.as_ref();
        if !path.exists() {
            let err = DebuggerError::ExecutableDoesNotExist(path.to_string_lossy().to_string());
            error!("{err}");
            return Err(err);
        }
        if !path.is_file() {
            let err = DebuggerError::ExecutableIsNotAFile(path.to_string_lossy().to_string());
            error!("{err}");
            return Err(err);
        }

        let dbginfo = DebugInfo::build(path)?;

        match unsafe { fork() } {
            Err(e) => {
                error!("could not start executable: {e}");
                Err(e.into())
            }
            Ok(ForkResult::Parent { child }) => {
                println!("Started debugging process {child}");
                println!("Press <Ctrl+d> to quit");
                self.debuggee = Some(Debuggee::build(child, dbginfo));
                Ok(())
            }
            Ok(ForkResult::Child) => {
                let cpath = CString::new(path.to_string_lossy().to_string().as_str())?;
                // address breakpoints need a stable layout across runs
                if let Err(e) = personality::set(Persona::ADDR_NO_RANDOMIZE) {
                    eprintln!("could not disable address randomization: {e}");
                }
                ptrace::traceme().inspect_err(|e| eprintln!("error while doing traceme: {e}"))?;
                execv(&cpath, &[&cpath])?;
                unreachable!()
            }
        }
    }

    /// The REPL: wait for the post-exec stop, fix the load bias once, then
    /// loop commands until quit or end of input.
    ///
    /// # Errors
    ///
    /// Only UI failures end the loop; command errors are reported as
    /// [`Feedback::Error`] and the loop continues.
    pub fn run_debugger(&mut self) -> Result<()> {
        let first = self.wait_signal()?;
        if let Feedback::Exit(_) = first {
            warn!("debuggee died before the first stop");
            self.debuggee = None;
        } else {
            self.debuggee_mut()?.initialise_load_bias()?;
        }

        let mut feedback = Feedback::Ok;
        loop {
            let status = match self.ui.process(&feedback) {
                Err(e) => {
                    error!("{e}");
                    return Err(e);
                }
                Ok(s) => s,
            };
            feedback = match status {
                Status::DebuggerQuit => break,
                Status::Continue => self.cont(),
                Status::SetBreakpoint(addr) => self.set_bp(addr),
                Status::SetBreakpointAtFunction(name) => self.set_bp_at_function(&name),
                Status::SetBreakpointAtSourceLine(file, line) => {
                    self.set_bp_at_source_line(&file, line)
                }
                Status::DumpRegisters => self.dump_regs(),
                Status::ReadRegister(r) => self.read_reg(r),
                Status::WriteRegister(r, v) => self.write_reg(r, v),
                Status::ReadMem(a) => self.read_mem(a),
                Status::WriteMem(a, v) => self.write_mem(a, v),
                Status::StepIn => self.step_in(),
                Status::StepOver => self.step_over(),
                Status::StepOut => self.step_out(),
                Status::LookupSymbol(name) => self.lookup_symbol(&name),
                Status::Backtrace => self.backtrace(),
                Status::ReadVariables => self.read_variables(),
            }
            .into();

            // nothing left to control once the tracee is gone
            if let Feedback::Exit(_) = feedback {
                self.debuggee = None;
            }
        }

        Ok(())
    }

    /// Kills the tracee if it is still around.
    ///
    /// # Errors
    ///
    /// Fails if the kill request cannot be delivered.
    pub fn cleanup(&self) -> Result<()> {
        if let Some(dbge) = &self.debuggee {
            dbge.kill()?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // tracee control

    /// Blocks until the tracee stops or dies, then classifies the stop.
    ///
    /// # Errors
    ///
    /// Fails when waiting or signal-info retrieval fails.
    pub fn wait_signal(&self) -> Result<Feedback> {
        let pid = self.debuggee()?.pid;
        match waitpid(pid, None)? {
            WaitStatus::Exited(_, exit_code) => {
                debug!("debuggee exited with code {exit_code}");
                Ok(Feedback::Exit(exit_code))
            }
            WaitStatus::Signaled(_, signal, _) => {
                debug!("debuggee terminated by signal {signal}");
                Ok(Feedback::Exit(-1))
            }
            _ => {
                let siginfo = self.get_signal_info()?;
                match Signal::try_from(siginfo.si_signo) {
                    Ok(Signal::SIGTRAP) => self.handle_sigtrap(&siginfo)?,
                    Ok(Signal::SIGSEGV) => eprintln!("segfault. {}", siginfo.si_code),
                    Ok(signal) => println!("Got signal {}", signal.as_str()),
                    Err(_) => warn!("stopped by unknown signal number {}", siginfo.si_signo),
                }
                Ok(Feedback::Ok)
            }
        }
    }

    /// The last signal that stopped the tracee.
    ///
    /// # Errors
    ///
    /// Fails if the tracee is not stopped.
    pub fn get_signal_info(&self) -> Result<nix::libc::siginfo_t> {
        Ok(ptrace::getsiginfo(self.debuggee()?.pid)?)
    }

    fn handle_sigtrap(&self, siginfo: &nix::libc::siginfo_t) -> Result<()> {
        let dbge = self.debuggee()?;
        match siginfo.si_code {
            // one of these is set when a software breakpoint was executed
            SI_KERNEL | TRAP_BRKPT => {
                // execution went one byte past the trap; point the pc back
                // at the patched instruction
                let pc = self.get_pc()? - 1usize;
                self.set_pc(pc)?;
                println!("Hit breakpoint at address {:#x}", pc.usize());

                let entry = dbge.dbginfo.line_entry_from_pc(dbge.to_dwarf(pc))?;
                source::print_source(&entry.file, entry.line, source::DEFAULT_CONTEXT_LINES)?;
            }
            // 0 is the post-exec stop, TRAP_TRACE a single step; both silent
            0 | TRAP_TRACE => (),
            code => println!("Unknown SIGTRAP code {code}"),
        }
        Ok(())
    }

    fn get_pc(&self) -> Result<Addr> {
        Ok(Addr::from(regs::get_reg(self.debuggee()?.pid, Register::rip)?))
    }

    fn set_pc(&self, pc: Addr) -> Result<()> {
        regs::set_reg(self.debuggee()?.pid, Register::rip, pc.u64())
    }

    fn atomic_single_step(&self) -> Result<Feedback> {
        ptrace::step(self.debuggee()?.pid, None)?;
        self.wait_signal()
    }

    /// Single-steps one instruction, transparently stepping over an
    /// enabled breakpoint under the pc.
    ///
    /// # Errors
    ///
    /// Fails when the step request or the following wait fails.
    pub fn single_step(&mut self) -> Result<Feedback> {
        let pc = self.get_pc()?;
        if self.debuggee()?.breakpoints.contains_key(&pc) {
            self.step_over_breakpoint()
        } else {
            self.atomic_single_step()
        }
    }

    /// If the pc sits on an enabled breakpoint: disable it, single-step
    /// the restored instruction, re-enable it. No-op otherwise.
    ///
    /// # Errors
    ///
    /// Fails when patching or stepping fails.
    pub fn step_over_breakpoint(&mut self) -> Result<Feedback> {
        let pc = self.get_pc()?;
        let enabled_here = self
            .debuggee()?
            .breakpoints
            .get(&pc)
            .is_some_and(Breakpoint::is_enabled);
        if !enabled_here {
            return Ok(Feedback::Ok);
        }

        trace!("stepping over breakpoint at {pc}");
        if let Some(bp) = self.debuggee_mut()?.breakpoints.get_mut(&pc) {
            bp.disable()?;
        }
        let feedback = self.atomic_single_step()?;
        if let Feedback::Exit(_) = feedback {
            // the tracee is gone, there is nothing left to re-patch
            return Ok(feedback);
        }
        match self.debuggee_mut()?.breakpoints.get_mut(&pc) {
            Some(bp) => bp.enable()?,
            None => warn!("breakpoint at {pc} vanished while stepping over it"),
        }

        Ok(Feedback::Ok)
    }

    /// Resumes the tracee and waits for the next stop.
    ///
    /// # Errors
    ///
    /// Fails when the continue request or the wait fails.
    pub fn cont(&mut self) -> Result<Feedback> {
        let feedback = self.step_over_breakpoint()?;
        if let Feedback::Exit(_) = feedback {
            return Ok(feedback);
        }
        ptrace::cont(self.debuggee()?.pid, None)?;
        self.wait_signal()
    }

    // ------------------------------------------------------------------
    // stepping engine

    fn current_line_entry(&self) -> Result<LineEntry> {
        let dbge = self.debuggee()?;
        let pc = self.get_pc()?;
        dbge.dbginfo.line_entry_from_pc(dbge.to_dwarf(pc))
    }

    /// Steps instructions until the line entry under the pc names a
    /// different source line, then shows where execution arrived.
    ///
    /// # Errors
    ///
    /// Fails when the pc leaves the line table (*not-found*), ending the
    /// command but not the session.
    pub fn step_in(&mut self) -> Result<Feedback> {
        let start_line = self.current_line_entry()?.line;
        loop {
            let feedback = self.single_step()?;
            if let Feedback::Exit(_) = feedback {
                return Ok(feedback);
            }
            if self.current_line_entry()?.line != start_line {
                break;
            }
        }

        let entry = self.current_line_entry()?;
        source::print_source(&entry.file, entry.line, source::DEFAULT_CONTEXT_LINES)?;
        Ok(Feedback::Ok)
    }

    /// Runs to the next line of the current function without following
    /// calls: temporary breakpoints on every other line of the function
    /// and on the return address, then continue.
    ///
    /// The temporaries never outlive the command, whatever the outcome of
    /// the continue.
    ///
    /// # Errors
    ///
    /// Fails when the current function or its lines cannot be resolved.
    pub fn step_over(&mut self) -> Result<Feedback> {
        let (entries, start_entry_addr, return_addr) = {
            let dbge = self.debuggee()?;
            let dwarf_pc = dbge.to_dwarf(self.get_pc()?);
            let func = dbge.dbginfo.function_from_pc(dwarf_pc)?;
            let low = func
                .low_addr()
                .ok_or(DebuggerError::FunctionNotFound(dwarf_pc))?;
            let high = func
                .high_addr()
                .ok_or(DebuggerError::FunctionNotFound(dwarf_pc))?;

            let entries = dbge.dbginfo.line_entries_in_range(low, high)?;
            let start_entry_addr = dbge.dbginfo.line_entry_from_pc(dwarf_pc)?.addr;

            let frame_pointer = Addr::from(regs::get_reg(dbge.pid, Register::rbp)?);
            let return_addr =
                Addr::from(mem_read_word(dbge.pid, frame_pointer + RETURN_ADDR_OFFSET)?);

            (entries, start_entry_addr, return_addr)
        };

        let mut temporaries: Vec<Addr> = Vec::new();
        for entry in entries {
            if entry.addr == start_entry_addr {
                continue;
            }
            let runtime = self.debuggee()?.to_runtime(entry.addr);
            if self.debuggee()?.breakpoints.contains_key(&runtime) {
                continue;
            }
            self.place_breakpoint(runtime)?;
            temporaries.push(runtime);
        }
        if !self.debuggee()?.breakpoints.contains_key(&return_addr) {
            self.place_breakpoint(return_addr)?;
            temporaries.push(return_addr);
        }

        let outcome = self.cont();
        for addr in temporaries {
            self.remove_breakpoint(addr);
        }
        outcome
    }

    /// Runs until the current function returns: temporary breakpoint on
    /// the return address, continue, remove the temporary.
    ///
    /// # Errors
    ///
    /// Fails when the frame's return address cannot be read.
    pub fn step_out(&mut self) -> Result<Feedback> {
        let dbge = self.debuggee()?;
        let frame_pointer = Addr::from(regs::get_reg(dbge.pid, Register::rbp)?);
        let return_addr = Addr::from(mem_read_word(dbge.pid, frame_pointer + RETURN_ADDR_OFFSET)?);

        let is_temporary = !dbge.breakpoints.contains_key(&return_addr);
        if is_temporary {
            self.place_breakpoint(return_addr)?;
        }

        let outcome = self.cont();
        if is_temporary {
            self.remove_breakpoint(return_addr);
        }
        outcome
    }

    // ------------------------------------------------------------------
    // breakpoints

    /// Creates, enables and registers a breakpoint at a runtime address.
    /// Placing on an occupied address keeps the existing breakpoint.
    fn place_breakpoint(&mut self, addr: Addr) -> Result<()> {
        let dbge = self.debuggee_mut()?;
        if dbge.breakpoints.contains_key(&addr) {
            warn!("breakpoint at {addr} already exists");
            return Ok(());
        }
        trace!("placing breakpoint at {addr}");
        let mut bp = Breakpoint::new(dbge.pid, addr);
        bp.enable()?;
        dbge.breakpoints.insert(addr, bp);
        Ok(())
    }

    /// Disables (best effort) and forgets the breakpoint at `addr`. The
    /// map entry goes away even when the tracee can no longer be patched.
    pub fn remove_breakpoint(&mut self, addr: Addr) {
        let Some(dbge) = self.debuggee.as_mut() else {
            return;
        };
        if let Some(bp) = dbge.breakpoints.get_mut(&addr) {
            if bp.is_enabled() {
                if let Err(e) = bp.disable() {
                    warn!("could not restore the original byte at {addr}: {e}");
                }
            }
            dbge.breakpoints.remove(&addr);
        } else {
            warn!("removed a breakpoint at {addr} that did not exist");
        }
    }

    /// Breakpoint at a literal runtime address.
    ///
    /// # Errors
    ///
    /// Fails when the trap byte cannot be written.
    pub fn set_bp(&mut self, addr: Addr) -> Result<Feedback> {
        self.place_breakpoint(addr)?;
        println!("Set breakpoint at address {:#x}", addr.usize());
        Ok(Feedback::Ok)
    }

    /// Breakpoints at the post-prologue line of every function named
    /// `name`.
    ///
    /// # Errors
    ///
    /// Fails when navigation or patching fails.
    pub fn set_bp_at_function(&mut self, name: &str) -> Result<Feedback> {
        let addrs = self.debuggee()?.function_breakpoint_addrs(name)?;
        if addrs.is_empty() {
            warn!("no function named '{name}' in the debug information");
        }
        for addr in addrs {
            self.set_bp(addr)?;
        }
        Ok(Feedback::Ok)
    }

    /// Breakpoint at the first statement of `file`:`line`, first matching
    /// compilation unit wins.
    ///
    /// # Errors
    ///
    /// Fails when navigation or patching fails.
    pub fn set_bp_at_source_line(&mut self, file: &str, line: u64) -> Result<Feedback> {
        match self.debuggee()?.source_breakpoint_addr(file, line)? {
            Some(addr) => self.set_bp(addr),
            None => {
                warn!("no statement found at {file}:{line}");
                Ok(Feedback::Ok)
            }
        }
    }

    // ------------------------------------------------------------------
    // inspection commands

    pub fn dump_regs(&self) -> Result<Feedback> {
        Ok(Feedback::Registers(ptrace::getregs(self.debuggee()?.pid)?))
    }

    pub fn read_reg(&self, r: Register) -> Result<Feedback> {
        Ok(Feedback::RegisterValue(regs::get_reg(
            self.debuggee()?.pid,
            r,
        )?))
    }

    pub fn write_reg(&self, r: Register, value: u64) -> Result<Feedback> {
        regs::set_reg(self.debuggee()?.pid, r, value)?;
        Ok(Feedback::Ok)
    }

    pub fn read_mem(&self, addr: Addr) -> Result<Feedback> {
        Ok(Feedback::Word(mem_read_word(self.debuggee()?.pid, addr)?))
    }

    pub fn write_mem(&self, addr: Addr, value: Word) -> Result<Feedback> {
        mem_write_word(self.debuggee()?.pid, addr, value)?;
        Ok(Feedback::Ok)
    }

    pub fn lookup_symbol(&self, name: &str) -> Result<Feedback> {
        Ok(Feedback::Symbols(self.debuggee()?.symbols_by_name(name)))
    }

    /// Walks the rbp frame chain from the current pc up to `main`,
    /// resolving each return address to its function.
    ///
    /// A return address outside the known functions ends the walk; code
    /// built without frame pointers produces a short (never a wrong-length
    /// looping) backtrace.
    ///
    /// # Errors
    ///
    /// Fails when the current pc is in no known function.
    pub fn backtrace(&self) -> Result<Feedback> {
        let dbge = self.debuggee()?;
        let mut backtrace = Backtrace::default();

        let mut current = dbge.dbginfo.function_from_pc(dbge.to_dwarf(self.get_pc()?))?;
        backtrace.push(
            current.low_addr().unwrap_or(Addr::from(0usize)),
            current.name().unwrap_or("<unknown>"),
        );

        let mut frame_pointer = Addr::from(regs::get_reg(dbge.pid, Register::rbp)?);
        let mut return_addr =
            Addr::from(mem_read_word(dbge.pid, frame_pointer + RETURN_ADDR_OFFSET)?);

        while current.name() != Some("main") {
            if backtrace.len() >= MAX_FRAMES {
                warn!("giving up on the frame chain after {MAX_FRAMES} frames");
                break;
            }
            current = match dbge.dbginfo.function_from_pc(dbge.to_dwarf(return_addr)) {
                Ok(f) => f,
                Err(e) => {
                    warn!("stopping the walk at {return_addr}: {e}");
                    break;
                }
            };
            backtrace.push(
                current.low_addr().unwrap_or(Addr::from(0usize)),
                current.name().unwrap_or("<unknown>"),
            );
            frame_pointer = Addr::from(mem_read_word(dbge.pid, frame_pointer)?);
            return_addr = Addr::from(mem_read_word(dbge.pid, frame_pointer + RETURN_ADDR_OFFSET)?);
        }

        Ok(Feedback::Backtrace(backtrace))
    }

    /// Reads every variable of the current function by evaluating its
    /// DWARF location expression against live process state.
    ///
    /// Only the function DIE's immediate children are considered; nested
    /// lexical blocks are not traversed.
    ///
    /// # Errors
    ///
    /// Fails when the pc is in no known function or a variable's location
    /// has an unsupported form.
    pub fn read_variables(&self) -> Result<Feedback> {
        let dbge = self.debuggee()?;
        let ctx = TraceeContext::new(dbge.pid, dbge.load_bias());

        let pc = ctx.program_counter()?;
        let func = dbge.dbginfo.function_from_pc(pc)?;
        let frame_base = match func.frame_base() {
            Some(LocationAttr::Expr(e)) => Some(e),
            _ => None,
        };

        let mut variables = Vec::new();
        for child in func.children() {
            if child.kind() != SymbolKind::Variable {
                continue;
            }
            let Some(location) = child.location() else {
                continue;
            };
            let expr = match location {
                LocationAttr::Expr(e) => e,
                LocationAttr::Unsupported => {
                    return Err(DebuggerError::UnhandledVariableLocation)
                }
            };
            let name = child.name().unwrap_or("<unnamed>").to_string();

            let resolved = evaluate_expression(expr, child.encoding(), frame_base, &ctx)?;
            let value = match resolved {
                gimli::Location::Address { address } => {
                    let addr = Addr::from(address);
                    VariableValue {
                        name,
                        location: VariableLocation::Address(addr),
                        value: mem_read_word(dbge.pid, addr)?,
                    }
                }
                gimli::Location::Register { register } => VariableValue {
                    name,
                    location: VariableLocation::Register(register.0),
                    value: regs::get_reg_by_dwarf(dbge.pid, register.0)? as Word,
                },
                _ => return Err(DebuggerError::UnhandledVariableLocation),
            };
            variables.push(value);
        }

        Ok(Feedback::Variables(variables))
    }
}

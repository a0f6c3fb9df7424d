//! # DWARF Location Evaluation
//!
//! Drives gimli's expression evaluator against live tracee state. The
//! evaluator is a resumable state machine: whenever it needs something
//! only the debugger knows (a register value, a word of tracee memory,
//! the frame base, the canonical frame address) it suspends and is
//! resumed with the answer, supplied here through the [`ExprContext`]
//! trait.

use gimli::{Encoding, EvaluationResult, Location, Value};
use nix::unistd::Pid;
use tracing::trace;

use crate::addr::Addr;
use crate::dbginfo::{Expression, GimliRd};
use crate::errors::{DebuggerError, Result};
use crate::regs::{self, Register};
use crate::{mem_read_word, Word};

/// The queries a DWARF location expression may need answered from the
/// process being debugged.
pub trait ExprContext {
    /// Value of the register with the given DWARF register number.
    fn register(&self, dwarf_regnum: u16) -> Result<u64>;
    /// The current program counter, in DWARF address space.
    fn program_counter(&self) -> Result<Addr>;
    /// A word of tracee memory. `size` is accepted for interface
    /// completeness; reads are word-sized.
    fn deref_size(&self, addr: Addr, size: u8) -> Result<Word>;
    /// The canonical frame address of the current frame.
    fn canonical_frame_address(&self) -> Result<Addr>;
    /// Runtime-minus-DWARF address offset of the tracee image.
    fn load_bias(&self) -> Addr;
}

/// [`ExprContext`] backed by ptrace against a stopped tracee.
pub struct TraceeContext {
    pid: Pid,
    load_bias: Addr,
}

impl TraceeContext {
    pub fn new(pid: Pid, load_bias: Addr) -> Self {
        Self { pid, load_bias }
    }
}

impl ExprContext for TraceeContext {
    fn register(&self, dwarf_regnum: u16) -> Result<u64> {
        regs::get_reg_by_dwarf(self.pid, dwarf_regnum)
    }

    fn program_counter(&self) -> Result<Addr> {
        Ok(Addr::from(regs::get_reg(self.pid, Register::rip)?) - self.load_bias.usize())
    }

    fn deref_size(&self, addr: Addr, _size: u8) -> Result<Word> {
        mem_read_word(self.pid, addr)
    }

    fn canonical_frame_address(&self) -> Result<Addr> {
        // rbp-chained frames: the CFA sits two words above the frame base
        Ok(Addr::from(regs::get_reg(self.pid, Register::rbp)?) + 16usize)
    }

    fn load_bias(&self) -> Addr {
        self.load_bias
    }
}

/// Evaluates a location expression and returns the single resulting
/// location.
///
/// `frame_base` is the enclosing function's `DW_AT_frame_base`
/// expression, evaluated on demand when the expression uses
/// `DW_OP_fbreg`.
///
/// # Errors
///
/// Requirements the debugger cannot satisfy (TLS, location lists,
/// multi-piece results, a missing frame base) fail with
/// [`DebuggerError::UnhandledVariableLocation`].
pub fn evaluate_expression<C: ExprContext>(
    expr: &Expression,
    encoding: Encoding,
    frame_base: Option<&Expression>,
    ctx: &C,
) -> Result<Location<GimliRd>> {
    let mut eval = expr.clone().evaluation(encoding);
    let mut state = eval.evaluate()?;

    loop {
        match state {
            EvaluationResult::Complete => break,
            EvaluationResult::RequiresRegister { register, .. } => {
                let value = ctx.register(register.0)?;
                state = eval.resume_with_register(Value::Generic(value))?;
            }
            EvaluationResult::RequiresMemory { address, size, .. } => {
                let word = ctx.deref_size(Addr::from(address), size)?;
                state = eval.resume_with_memory(Value::Generic(word as u64))?;
            }
            EvaluationResult::RequiresFrameBase => {
                let fb_expr = frame_base.ok_or(DebuggerError::UnhandledVariableLocation)?;
                let fb = match evaluate_expression(fb_expr, encoding, None, ctx)? {
                    Location::Address { address } => address,
                    Location::Register { register } => ctx.register(register.0)?,
                    _ => return Err(DebuggerError::UnhandledVariableLocation),
                };
                state = eval.resume_with_frame_base(fb)?;
            }
            EvaluationResult::RequiresCallFrameCfa => {
                state = eval.resume_with_call_frame_cfa(ctx.canonical_frame_address()?.u64())?;
            }
            EvaluationResult::RequiresRelocatedAddress(addr) => {
                state = eval.resume_with_relocated_address(addr + ctx.load_bias().u64())?;
            }
            other => {
                trace!("unsupported evaluation requirement: {other:?}");
                return Err(DebuggerError::UnhandledVariableLocation);
            }
        }
    }

    let mut pieces = eval.result();
    if pieces.len() == 1 {
        Ok(pieces.remove(0).location)
    } else {
        Err(DebuggerError::UnhandledVariableLocation)
    }
}

#[cfg(test)]
mod test {
    use std::rc::Rc;

    use gimli::NativeEndian;

    use super::*;

    struct MockContext {
        registers: Vec<(u16, u64)>,
        memory_word: Word,
        cfa: Addr,
    }

    impl ExprContext for MockContext {
        fn register(&self, dwarf_regnum: u16) -> Result<u64> {
            self.registers
                .iter()
                .find(|(n, _)| *n == dwarf_regnum)
                .map(|(_, v)| *v)
                .ok_or(DebuggerError::UnknownDwarfRegister(dwarf_regnum))
        }
        fn program_counter(&self) -> Result<Addr> {
            Ok(Addr::from(0x1000usize))
        }
        fn deref_size(&self, _addr: Addr, _size: u8) -> Result<Word> {
            Ok(self.memory_word)
        }
        fn canonical_frame_address(&self) -> Result<Addr> {
            Ok(self.cfa)
        }
        fn load_bias(&self) -> Addr {
            Addr::from(0usize)
        }
    }

    fn ctx() -> MockContext {
        MockContext {
            registers: vec![(0, 42), (6, 0x7fff_0100)],
            memory_word: 0x55,
            cfa: Addr::from(0x7fff_0200usize),
        }
    }

    fn expr(bytes: &[u8]) -> Expression {
        gimli::Expression(GimliRd::new(Rc::from(bytes), NativeEndian))
    }

    fn encoding() -> Encoding {
        Encoding {
            format: gimli::Format::Dwarf32,
            version: 4,
            address_size: 8,
        }
    }

    #[test]
    fn test_eval_addr() {
        // DW_OP_addr 0x1000
        let e = expr(&[0x03, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
        match evaluate_expression(&e, encoding(), None, &ctx()).unwrap() {
            Location::Address { address } => assert_eq!(address, 0x1000),
            other => panic!("expected an address, got {other:?}"),
        }
    }

    #[test]
    fn test_eval_register_location() {
        // DW_OP_reg0
        let e = expr(&[0x50]);
        match evaluate_expression(&e, encoding(), None, &ctx()).unwrap() {
            Location::Register { register } => assert_eq!(register.0, 0),
            other => panic!("expected a register, got {other:?}"),
        }
    }

    #[test]
    fn test_eval_fbreg_with_register_frame_base() {
        // DW_OP_fbreg -16, frame base DW_OP_reg6 (rbp)
        let e = expr(&[0x91, 0x70]);
        let fb = expr(&[0x56]);
        match evaluate_expression(&e, encoding(), Some(&fb), &ctx()).unwrap() {
            Location::Address { address } => assert_eq!(address, 0x7fff_0100 - 16),
            other => panic!("expected an address, got {other:?}"),
        }
    }

    #[test]
    fn test_eval_fbreg_without_frame_base_fails() {
        let e = expr(&[0x91, 0x70]);
        assert!(matches!(
            evaluate_expression(&e, encoding(), None, &ctx()),
            Err(DebuggerError::UnhandledVariableLocation)
        ));
    }

    #[test]
    fn test_eval_breg_offset() {
        // DW_OP_breg6 +8
        let e = expr(&[0x76, 0x08]);
        match evaluate_expression(&e, encoding(), None, &ctx()).unwrap() {
            Location::Address { address } => assert_eq!(address, 0x7fff_0100 + 8),
            other => panic!("expected an address, got {other:?}"),
        }
    }
}

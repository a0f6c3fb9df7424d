//! What a debugger command hands back to the UI. Every observable piece
//! of command output is a [`Feedback`] variant with its rendering in one
//! place; the UI only decides where to print it.

use std::fmt::Display;

use nix::libc::user_regs_struct;

use crate::dbginfo::ElfSymbol;
use crate::errors::DebuggerError;
use crate::regs::{block_to_words, REGISTER_DESCRIPTORS};
use crate::unwind::Backtrace;
use crate::variable::VariableValue;
use crate::Word;

#[derive(Debug)]
pub enum Feedback {
    Ok,
    /// The tracee is gone; exit code, or -1 when killed by a signal.
    Exit(i32),
    Registers(user_regs_struct),
    RegisterValue(u64),
    Word(Word),
    Symbols(Vec<ElfSymbol>),
    Backtrace(Backtrace),
    Variables(Vec<VariableValue>),
    Error(DebuggerError),
}

impl Display for Feedback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Feedback::Ok => Ok(()),
            Feedback::Exit(code) => write!(f, "Debuggee exited with code {code}"),
            Feedback::Registers(regs) => {
                let words = block_to_words(regs);
                let lines: Vec<String> = REGISTER_DESCRIPTORS
                    .iter()
                    .zip(words.iter())
                    .map(|(descriptor, value)| format!("{:>9} {:#018x}", descriptor.name, value))
                    .collect();
                write!(f, "{}", lines.join("\n"))
            }
            Feedback::RegisterValue(value) => write!(f, "{value}"),
            Feedback::Word(word) => write!(f, "{word:#x}"),
            Feedback::Symbols(symbols) => {
                let lines: Vec<String> = symbols
                    .iter()
                    .map(|s| format!("{} {} {:#x}", s.name, s.kind, s.addr.usize()))
                    .collect();
                write!(f, "{}", lines.join("\n"))
            }
            Feedback::Backtrace(backtrace) => write!(f, "{backtrace}"),
            Feedback::Variables(variables) => {
                let lines: Vec<String> = variables.iter().map(ToString::to_string).collect();
                write!(f, "{}", lines.join("\n"))
            }
            Feedback::Error(e) => write!(f, "Error: {e}"),
        }
    }
}

impl From<Result<Feedback, DebuggerError>> for Feedback {
    fn from(result: Result<Feedback, DebuggerError>) -> Self {
        match result {
            Ok(feedback) => feedback,
            Err(e) => Feedback::Error(e),
        }
    }
}

#[cfg(test)]
mod test {
    use crate::addr::Addr;
    use crate::dbginfo::ElfSymbolKind;

    use super::*;

    #[test]
    fn test_register_value_is_decimal() {
        assert_eq!(format!("{}", Feedback::RegisterValue(42)), "42");
    }

    #[test]
    fn test_word_is_hex() {
        assert_eq!(format!("{}", Feedback::Word(0x2a)), "0x2a");
    }

    #[test]
    fn test_symbol_lines() {
        let feedback = Feedback::Symbols(vec![ElfSymbol {
            kind: ElfSymbolKind::Func,
            name: "main".to_string(),
            addr: Addr::from(0x1139usize),
        }]);
        assert_eq!(format!("{feedback}"), "main func 0x1139");
    }

    #[test]
    fn test_error_wrapping() {
        let feedback: Feedback = Err::<Feedback, _>(DebuggerError::NoDebugee).into();
        assert!(matches!(feedback, Feedback::Error(DebuggerError::NoDebugee)));
    }
}

//! Interactive command line: reads a line with history, parses it into a
//! [`Status`] by prefix-matching the closed command set, and renders the
//! previous command's [`Feedback`].

use dialoguer::BasicHistory;
use tracing::trace;

use super::{DebuggerUI, Status};
use crate::addr::Addr;
use crate::errors::{DebuggerError, Result};
use crate::feedback::Feedback;
use crate::regs::Register;
use crate::Word;

pub struct CliUi {
    buf: String,
    buf_preparsed: Vec<String>,
    history: BasicHistory,
}

impl CliUi {
    pub fn build() -> Result<Self> {
        Ok(CliUi {
            buf: String::new(),
            buf_preparsed: Vec::new(),
            history: BasicHistory::new(),
        })
    }

    fn get_input(&mut self) -> Result<()> {
        self.buf = dialoguer::Input::new()
            .with_prompt("mini_dbg")
            .history_with(&mut self.history)
            .interact_text()?;
        trace!("processing '{}'", self.buf);
        self.buf_preparsed = self.buf.split_whitespace().map(str::to_string).collect();
        Ok(())
    }
}

impl DebuggerUI for CliUi {
    fn process(&mut self, feedback: &Feedback) -> Result<Status> {
        match feedback {
            Feedback::Ok => (),
            Feedback::Error(e) => eprintln!("{e}"),
            other => println!("{other}"),
        }

        loop {
            if self.get_input().is_err() {
                // end of input (Ctrl+d) closes the session
                return Ok(Status::DebuggerQuit);
            }
            if self.buf_preparsed.is_empty() {
                continue;
            }
            let parts: Vec<&str> = self.buf_preparsed.iter().map(String::as_str).collect();
            match parse_command(&parts) {
                Ok(Status::DebuggerQuit) => {
                    println!("Exited from mini debugger");
                    return Ok(Status::DebuggerQuit);
                }
                Ok(status) => return Ok(status),
                Err(DebuggerError::UnknownCommand) => eprintln!("Unknown command"),
                Err(e) => eprintln!("{e}"),
            }
        }
    }
}

/// `candidate` is a (non-empty) prefix of the full command word.
fn is_prefix(candidate: &str, command: &str) -> bool {
    !candidate.is_empty() && command.starts_with(candidate)
}

fn arg<'a>(parts: &[&'a str], idx: usize, usage: &str) -> Result<&'a str> {
    parts
        .get(idx)
        .copied()
        .ok_or_else(|| DebuggerError::ParseStr(format!("usage: {usage}")))
}

/// Hexadecimal arguments are parsed base-16 after stripping a `0x` prefix.
fn get_number(raw: &str) -> Result<u64> {
    Ok(u64::from_str_radix(
        raw.strip_prefix("0x").unwrap_or(raw),
        16,
    )?)
}

/// Parses one whitespace-split input line into a command.
///
/// Commands are matched by prefix; ties go to whichever command is tested
/// first (so a bare `b` means `break`, not `backtrace`).
///
/// # Errors
///
/// [`DebuggerError::UnknownCommand`] when nothing matches; argument
/// errors otherwise.
pub(crate) fn parse_command(parts: &[&str]) -> Result<Status> {
    let command = parts[0];

    if is_prefix(command, "continue") {
        Ok(Status::Continue)
    } else if is_prefix(command, "break") {
        let target = arg(parts, 1, "break 0xADDR|FILE:LINE|FUNCTION")?;
        if let Some(hex) = target.strip_prefix("0x") {
            Ok(Status::SetBreakpoint(Addr::from(usize::from_str_radix(
                hex, 16,
            )?)))
        } else if let Some((file, line)) = target.split_once(':') {
            Ok(Status::SetBreakpointAtSourceLine(
                file.to_string(),
                line.parse()?,
            ))
        } else {
            Ok(Status::SetBreakpointAtFunction(target.to_string()))
        }
    } else if is_prefix(command, "register") {
        let sub = arg(parts, 1, "register dump|read|write")?;
        if is_prefix(sub, "dump") {
            Ok(Status::DumpRegisters)
        } else if is_prefix(sub, "read") {
            let reg: Register = arg(parts, 2, "register read NAME")?.parse()?;
            Ok(Status::ReadRegister(reg))
        } else if is_prefix(sub, "write") {
            let reg: Register = arg(parts, 2, "register write NAME 0xVALUE")?.parse()?;
            let value = get_number(arg(parts, 3, "register write NAME 0xVALUE")?)?;
            Ok(Status::WriteRegister(reg, value))
        } else {
            Err(DebuggerError::UnknownCommand)
        }
    } else if is_prefix(command, "memory") {
        let sub = arg(parts, 1, "memory read|write")?;
        let addr = Addr::from(get_number(arg(parts, 2, "memory read|write 0xADDR")?)? as usize);
        if is_prefix(sub, "read") {
            Ok(Status::ReadMem(addr))
        } else if is_prefix(sub, "write") {
            let value = get_number(arg(parts, 3, "memory write 0xADDR 0xVALUE")?)? as Word;
            Ok(Status::WriteMem(addr, value))
        } else {
            Err(DebuggerError::UnknownCommand)
        }
    } else if is_prefix(command, "step") {
        Ok(Status::StepIn)
    } else if is_prefix(command, "next") {
        Ok(Status::StepOver)
    } else if is_prefix(command, "finish") {
        Ok(Status::StepOut)
    } else if is_prefix(command, "symbol") {
        Ok(Status::LookupSymbol(arg(parts, 1, "symbol NAME")?.to_string()))
    } else if is_prefix(command, "backtrace") {
        Ok(Status::Backtrace)
    } else if is_prefix(command, "variables") {
        Ok(Status::ReadVariables)
    } else if is_prefix(command, "quit") {
        Ok(Status::DebuggerQuit)
    } else {
        Err(DebuggerError::UnknownCommand)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_get_number() {
        assert_eq!(0x19u64, get_number("19").unwrap());
        assert_eq!(0x19u64, get_number("0x19").unwrap());
        assert_eq!(0x19u64, get_number("0x00019").unwrap());
        assert_eq!(0x19u64, get_number("00019").unwrap());
        assert!(get_number("zz").is_err());
    }

    #[test]
    fn test_parse_break_forms() {
        assert_eq!(
            parse_command(&["break", "0x401150"]).unwrap(),
            Status::SetBreakpoint(Addr::from(0x401150usize))
        );
        assert_eq!(
            parse_command(&["break", "main.c:7"]).unwrap(),
            Status::SetBreakpointAtSourceLine("main.c".to_string(), 7)
        );
        assert_eq!(
            parse_command(&["break", "f"]).unwrap(),
            Status::SetBreakpointAtFunction("f".to_string())
        );
    }

    #[test]
    fn test_parse_register_commands() {
        assert_eq!(
            parse_command(&["register", "dump"]).unwrap(),
            Status::DumpRegisters
        );
        assert_eq!(
            parse_command(&["register", "read", "rax"]).unwrap(),
            Status::ReadRegister(Register::rax)
        );
        assert_eq!(
            parse_command(&["register", "write", "rax", "0x2a"]).unwrap(),
            Status::WriteRegister(Register::rax, 0x2a)
        );
        assert!(parse_command(&["register", "read", "nope"]).is_err());
    }

    #[test]
    fn test_parse_memory_commands() {
        assert_eq!(
            parse_command(&["memory", "read", "0x404028"]).unwrap(),
            Status::ReadMem(Addr::from(0x404028usize))
        );
        assert_eq!(
            parse_command(&["memory", "write", "0x404028", "0xff"]).unwrap(),
            Status::WriteMem(Addr::from(0x404028usize), 0xff)
        );
    }

    #[test]
    fn test_prefix_matching() {
        assert_eq!(parse_command(&["c"]).unwrap(), Status::Continue);
        assert_eq!(parse_command(&["cont"]).unwrap(), Status::Continue);
        assert_eq!(parse_command(&["s"]).unwrap(), Status::StepIn);
        assert_eq!(parse_command(&["n"]).unwrap(), Status::StepOver);
        assert_eq!(parse_command(&["fin"]).unwrap(), Status::StepOut);
        assert_eq!(parse_command(&["back"]).unwrap(), Status::Backtrace);
        assert_eq!(parse_command(&["var"]).unwrap(), Status::ReadVariables);
        assert_eq!(parse_command(&["q"]).unwrap(), Status::DebuggerQuit);
        // ambiguous prefixes resolve in command-table order
        assert_eq!(
            parse_command(&["b", "f"]).unwrap(),
            Status::SetBreakpointAtFunction("f".to_string())
        );
    }

    #[test]
    fn test_unknown_command() {
        assert!(matches!(
            parse_command(&["frobnicate"]),
            Err(DebuggerError::UnknownCommand)
        ));
    }
}

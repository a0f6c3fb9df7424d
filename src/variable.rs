//! Values of local variables read out of the tracee, together with where
//! they were found. Produced by the variable reader in
//! [`crate::debugger`], rendered by the UI.

use std::fmt::Display;

use crate::addr::Addr;
use crate::Word;

/// Where a variable's storage was resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableLocation {
    /// The variable lives in tracee memory at this runtime address.
    Address(Addr),
    /// The variable lives in the register with this DWARF number.
    Register(u16),
}

/// One local variable with its resolved location and current value.
#[derive(Debug, Clone)]
pub struct VariableValue {
    pub name: String,
    pub location: VariableLocation,
    pub value: Word,
}

impl Display for VariableValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.location {
            VariableLocation::Address(addr) => {
                write!(f, "{} ({:#x}) = {}", self.name, addr.usize(), self.value)
            }
            VariableLocation::Register(n) => {
                write!(f, "{} (reg {}) = {}", self.name, n, self.value)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_display_address_variable() {
        let v = VariableValue {
            name: "counter".to_string(),
            location: VariableLocation::Address(Addr::from(0x7ffd_1234usize)),
            value: 42,
        };
        assert_eq!(format!("{v}"), "counter (0x7ffd1234) = 42");
    }

    #[test]
    fn test_display_register_variable() {
        let v = VariableValue {
            name: "i".to_string(),
            location: VariableLocation::Register(0),
            value: -3,
        };
        assert_eq!(format!("{v}"), "i (reg 0) = -3");
    }
}

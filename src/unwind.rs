//! Call stack representation for the frame-pointer-chain walker.
//!
//! The walk itself lives in [`crate::debugger`]; this module holds the
//! frame containers and their rendering. Frames are printed as
//! `frame #N: 0x<low-pc> <name>` with the function's DWARF low pc.

use std::fmt::Display;

use crate::addr::Addr;

/// Upper bound on walked frames, so a broken rbp chain cannot loop the
/// walker forever.
pub const MAX_FRAMES: usize = 64;

#[derive(Debug, Clone)]
pub struct BacktraceFrame {
    pub number: usize,
    pub low_pc: Addr,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct Backtrace {
    pub frames: Vec<BacktraceFrame>,
}

impl Backtrace {
    pub fn push(&mut self, low_pc: Addr, name: &str) {
        self.frames.push(BacktraceFrame {
            number: self.frames.len(),
            low_pc,
            name: name.to_string(),
        });
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl Display for Backtrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lines: Vec<String> = self
            .frames
            .iter()
            .map(|frame| {
                format!(
                    "frame #{}: {:#x} {}",
                    frame.number,
                    frame.low_pc.usize(),
                    frame.name
                )
            })
            .collect();
        write!(f, "{}", lines.join("\n"))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_frames_are_numbered_in_push_order() {
        let mut bt = Backtrace::default();
        bt.push(Addr::from(0x1149usize), "f");
        bt.push(Addr::from(0x1160usize), "g");
        bt.push(Addr::from(0x1180usize), "main");
        assert_eq!(bt.len(), 3);
        assert_eq!(
            format!("{bt}"),
            "frame #0: 0x1149 f\nframe #1: 0x1160 g\nframe #2: 0x1180 main"
        );
    }
}

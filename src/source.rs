//! Prints a window of source code around a line, with a cursor on the
//! line itself. Purely informational; never touches the tracee.

use std::fmt::Write as _;
use std::path::Path;

use crate::errors::Result;

const DIVIDER_LEN: usize = 78;

/// Context lines shown above and below the current line.
pub const DEFAULT_CONTEXT_LINES: u64 = 3;

/// Renders `context` lines around `line` (1-based), the line itself
/// marked with `> `, framed by divider lines.
pub fn render_window(source: &str, line: u64, context: u64) -> String {
    let start = if line <= context { 1 } else { line - context };
    let end = line + context;

    let mut out = String::new();
    let divider = "=".repeat(DIVIDER_LEN);
    out.push_str(&divider);
    out.push('\n');
    for (idx, text) in source.lines().enumerate() {
        let current = idx as u64 + 1;
        if current < start {
            continue;
        }
        if current > end {
            break;
        }
        let cursor = if current == line { "> " } else { "  " };
        let _ = writeln!(out, "{cursor}{text}");
    }
    out.push_str(&divider);
    out
}

/// Prints the source window for `path` to stdout.
///
/// # Errors
///
/// Fails if the source file cannot be read.
pub fn print_source(path: &Path, line: u64, context: u64) -> Result<()> {
    let text = std::fs::read_to_string(path)?;
    println!("{}", render_window(&text, line, context));
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    const SOURCE: &str = "one\ntwo\nthree\nfour\nfive\nsix\nseven\neight\n";

    #[test]
    fn test_window_marks_current_line() {
        let rendered = render_window(SOURCE, 4, 1);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].chars().all(|c| c == '='));
        assert_eq!(lines[1], "  three");
        assert_eq!(lines[2], "> four");
        assert_eq!(lines[3], "  five");
        assert!(lines[4].chars().all(|c| c == '='));
    }

    #[test]
    fn test_window_clamps_at_top() {
        let rendered = render_window(SOURCE, 1, 3);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[1], "> one");
        assert_eq!(lines[2], "  two");
        assert_eq!(lines[3], "  three");
        assert_eq!(lines[4], "  four");
    }

    #[test]
    fn test_window_clamps_at_bottom() {
        let rendered = render_window(SOURCE, 8, 2);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[1], "  six");
        assert_eq!(lines[2], "  seven");
        assert_eq!(lines[3], "> eight");
        assert!(lines[4].chars().all(|c| c == '='));
    }
}

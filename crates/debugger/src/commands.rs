//! Parsing of the commands typed at the prompt

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCommand {
    /// `b <file>:<line>`
    BreakpointFileLine { file: PathBuf, line: u32 },
    /// `b <symbol>`
    BreakpointSymbol(String),
    /// `r`
    Run,
    /// `c`
    Continue,
    /// `s`
    Step,
    /// `n`
    Next,
    /// Blank input
    Empty,
    /// Anything else, with the message to show
    Invalid(String),
}

pub fn parse(input: &str) -> ParsedCommand {
    let tokens: Vec<&str> = input.split_whitespace().collect();

    match tokens.as_slice() {
        [] => ParsedCommand::Empty,
        ["b"] => ParsedCommand::Invalid("Incomplete breakpoint command".to_string()),
        ["b", target] => parse_breakpoint(target),
        ["r"] => ParsedCommand::Run,
        ["c"] => ParsedCommand::Continue,
        ["s"] => ParsedCommand::Step,
        ["n"] => ParsedCommand::Next,
        _ => ParsedCommand::Invalid(format!("{} not valid", input.trim())),
    }
}

fn parse_breakpoint(target: &str) -> ParsedCommand {
    let Some((file, line)) = target.rsplit_once(':') else {
        return ParsedCommand::BreakpointSymbol(target.to_string());
    };

    // `ns::func` style names are symbols, not file:line
    if file.ends_with(':') || file.is_empty() {
        return ParsedCommand::BreakpointSymbol(target.to_string());
    }

    match line.parse::<i64>() {
        Ok(value) => match u32::try_from(value) {
            Ok(line) if line > 0 => ParsedCommand::BreakpointFileLine {
                file: PathBuf::from(file),
                line,
            },
            _ => ParsedCommand::Invalid(format!("Breakpoint line '{line}' out of range")),
        },
        Err(e) if matches!(
            e.kind(),
            std::num::IntErrorKind::PosOverflow | std::num::IntErrorKind::NegOverflow
        ) =>
        {
            ParsedCommand::Invalid(format!("Breakpoint line '{line}' out of range"))
        }
        Err(_) => ParsedCommand::Invalid(format!("Breakpoint line '{line}' not an integer")),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn file_line(file: &str, line: u32) -> ParsedCommand {
        ParsedCommand::BreakpointFileLine {
            file: PathBuf::from(file),
            line,
        }
    }

    fn invalid(message: &str) -> ParsedCommand {
        ParsedCommand::Invalid(message.to_string())
    }

    #[rstest]
    #[case("b main.cpp:10", file_line("main.cpp", 10))]
    #[case("  b   src/util.c:3  ", file_line("src/util.c", 3))]
    #[case("b /abs/path/x.rs:42", file_line("/abs/path/x.rs", 42))]
    #[case("b main", ParsedCommand::BreakpointSymbol("main".to_string()))]
    #[case("b ns::func", ParsedCommand::BreakpointSymbol("ns::func".to_string()))]
    #[case("b", invalid("Incomplete breakpoint command"))]
    #[case("b main.cpp:ten", invalid("Breakpoint line 'ten' not an integer"))]
    #[case("b main.cpp:", invalid("Breakpoint line '' not an integer"))]
    #[case("b main.cpp:99999999999999999999", invalid("Breakpoint line '99999999999999999999' out of range"))]
    #[case("b main.cpp:0", invalid("Breakpoint line '0' out of range"))]
    #[case("b main.cpp:-4", invalid("Breakpoint line '-4' out of range"))]
    #[case("r", ParsedCommand::Run)]
    #[case("c", ParsedCommand::Continue)]
    #[case(" s ", ParsedCommand::Step)]
    #[case("n", ParsedCommand::Next)]
    #[case("", ParsedCommand::Empty)]
    #[case("   \t", ParsedCommand::Empty)]
    #[case("run", invalid("run not valid"))]
    #[case("c now", invalid("c now not valid"))]
    #[case("b a.c:1 extra", invalid("b a.c:1 extra not valid"))]
    fn parses(#[case] input: &str, #[case] expected: ParsedCommand) {
        assert_eq!(parse(input), expected);
    }
}

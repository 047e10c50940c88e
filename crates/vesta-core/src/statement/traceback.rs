//! Human-facing tracebacks for execution errors.

use std::sync::LazyLock;

use regex::Regex;
use vesta_lang::{Exception, TraceFrame};

use crate::config::TracebackPolicy;

static UNIT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<statement\d+>").unwrap_or_else(|e| panic!("invalid unit pattern: {e}"))
});

/// A formatted execution error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Formatted {
    pub(crate) message: String,
    /// Line of the deepest frame in the statement's own unit.
    pub(crate) line: Option<u32>,
}

/// Format `exc`, raised while running unit `unit` whose source is `source`.
///
/// When the statement's own unit appears only once in the stack, that frame
/// is the statement's top level and says nothing the line number does not,
/// so it is dropped together with everything above it.
pub(crate) fn format(
    exc: &Exception,
    unit: &str,
    source: &str,
    policy: &TracebackPolicy,
) -> Formatted {
    let frames = &exc.traceback;
    let own: Vec<usize> = frames
        .iter()
        .enumerate()
        .filter(|(_, frame)| &*frame.unit == unit)
        .map(|(i, _)| i)
        .collect();
    let line = own.last().map(|&i| frames[i].line);
    let skip = match own.as_slice() {
        [] => 0,
        [only] => only + 1,
        [first, ..] => *first,
    };

    let lines: Vec<&str> = source.lines().collect();
    let mut text = String::new();
    for frame in frames.iter().skip(skip) {
        if policy.internal_units.iter().any(|u| **u == *frame.unit) {
            continue;
        }
        text.push_str(&frame_line(frame, &policy.placeholder));
        if &*frame.unit == unit {
            let source_line = (frame.line as usize)
                .checked_sub(1)
                .and_then(|i| lines.get(i));
            if let Some(source_line) = source_line {
                text.push_str("    ");
                text.push_str(source_line.trim());
                text.push('\n');
            }
        }
    }
    text.push_str(&exc.summary());

    Formatted {
        message: text.trim_end().to_string(),
        line,
    }
}

fn frame_line(frame: &TraceFrame, placeholder: &str) -> String {
    let unit = UNIT_NAME.replace_all(&frame.unit, placeholder);
    format!(
        "  File \"{}\", line {}, in {}\n",
        unit, frame.line, frame.function
    )
}

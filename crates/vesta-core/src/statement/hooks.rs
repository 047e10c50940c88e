//! Functions the rewriter splices into statements.
//!
//! Each execution gets its own set of closures bound to that execution's
//! scope and capture buffer, so no ambient "current statement" exists.

use std::sync::Arc;

use parking_lot::Mutex;
use vesta_lang::{Args, ExecResult, HostObject, Interpreter, Namespace, Value};

use super::ResultItem;
use crate::config::HookNames;

/// Results and stdout text collected while a statement runs.
#[derive(Debug, Default)]
pub(crate) struct Capture {
    results: Vec<ResultItem>,
    pending: String,
}

impl Capture {
    pub(crate) fn push(&mut self, item: ResultItem) {
        self.results.push(item);
    }

    /// Append stdout text; each completed line becomes an `Output` entry.
    pub(crate) fn write(&mut self, text: &str) {
        self.pending.push_str(text);
        while let Some(pos) = self.pending.find('\n') {
            let line = self.pending[..pos].to_string();
            self.pending.drain(..=pos);
            self.results.push(ResultItem::Output(line));
        }
    }

    /// Flush any unterminated line and hand back the results.
    pub(crate) fn finish(&mut self) -> Vec<ResultItem> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.results.push(ResultItem::Output(rest));
        }
        std::mem::take(&mut self.results)
    }
}

pub(crate) type SharedCapture = Arc<Mutex<Capture>>;

/// Install the output, print, copy and builder hooks into `interp`.
pub(crate) fn install(
    interp: &mut Interpreter,
    names: &HookNames,
    scope: &Namespace,
    capture: &SharedCapture,
) {
    interp.set_hook(&names.output, output_hook(&names.output, scope, capture));
    interp.set_hook(&names.print, print_hook(&names.print));
    interp.set_hook(&names.copy, copy_hook(&names.copy));
    interp.set_hook(&names.builder, builder_hook(&names.builder));
}

fn output_hook(name: &str, scope: &Namespace, capture: &SharedCapture) -> Value {
    let scope = scope.clone();
    let capture = capture.clone();
    Value::native(name, move |interp, args| {
        let mut values = args.positional;
        let value = match values.len() {
            0 => return Ok(Value::None),
            1 => match values.pop() {
                Some(Value::None) | None => return Ok(Value::None),
                Some(value) => value,
            },
            _ => Value::tuple(values),
        };
        // repr may run user code that prints, so the capture is not held
        // across it.
        let repr = interp.repr(&value)?;
        capture.lock().push(ResultItem::Value(repr));
        scope.set("_", value);
        Ok(Value::None)
    })
}

fn print_hook(name: &str) -> Value {
    Value::native(name, |interp, args| {
        let mut parts = Vec::with_capacity(args.positional.len());
        for value in &args.positional {
            parts.push(interp.str(value)?);
        }
        let mut text = parts.join(" ");
        text.push('\n');
        interp.write_stdout(&text);
        Ok(Value::None)
    })
}

fn copy_hook(name: &str) -> Value {
    let owned = name.to_string();
    Value::native(name, move |_, args| {
        args.check(&owned, 1, 1)?;
        args.positional[0].shallow_copy()
    })
}

fn builder_hook(name: &str) -> Value {
    let owned = name.to_string();
    Value::native(name, move |_, args: Args| -> ExecResult<Value> {
        args.check(&owned, 0, 1)?;
        let value = args.positional.into_iter().next().unwrap_or(Value::None);
        Ok(Value::Host(Arc::new(Builder { value })))
    })
}

/// Context manager behind `build` blocks: binds the built value for the
/// block and never suppresses exceptions.
struct Builder {
    value: Value,
}

impl HostObject for Builder {
    fn type_name(&self) -> &str {
        "builder"
    }

    fn has_method(&self, name: &str) -> bool {
        matches!(name, "__enter__" | "__exit__")
    }

    fn call_method(&self, _interp: &mut Interpreter, name: &str, _args: Args) -> ExecResult<Value> {
        match name {
            "__enter__" => Ok(self.value.clone()),
            _ => Ok(Value::None),
        }
    }
}

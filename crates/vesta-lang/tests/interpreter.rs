//! Integration tests for the interpreter.
//!
//! Tests whole programs from source text through execution.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use vesta_lang::{
    ExceptionKind, FeatureSet, Interpreter, InterruptHandle, ModuleRegistry, Namespace, Unwind,
    Value, compile, parse,
};

// =============================================================================
// Test Helpers
// =============================================================================

/// Runs source against a fresh namespace and collects stdout.
struct Harness {
    registry: Arc<ModuleRegistry>,
    globals: Namespace,
    stdout: Arc<Mutex<String>>,
}

impl Harness {
    fn new() -> Self {
        Self {
            registry: Arc::new(ModuleRegistry::new()),
            globals: Namespace::new(),
            stdout: Arc::new(Mutex::new(String::new())),
        }
    }

    fn interpreter(&self, interrupt: InterruptHandle) -> Interpreter {
        let stdout = self.stdout.clone();
        Interpreter::new(self.registry.clone(), interrupt)
            .with_stdout(move |text| stdout.lock().push_str(text))
    }

    fn run(&self, source: &str) -> Result<(), Unwind> {
        let program = compile(
            parse(source).expect("Failed to parse"),
            "<test>",
            &FeatureSet::new(),
        )
        .expect("Failed to compile");
        self.interpreter(InterruptHandle::new())
            .run(&program, &self.globals)
    }

    fn eval(&self, expr: &str) -> String {
        self.run(&format!("__result = {expr}\n"))
            .unwrap_or_else(|_| panic!("Failed to evaluate {expr}"));
        self.globals
            .get("__result")
            .expect("result not bound")
            .repr()
    }

    fn error(&self, source: &str) -> (ExceptionKind, String) {
        match self.run(source) {
            Err(Unwind::Error(exc)) => (exc.kind, exc.message),
            Err(Unwind::Interrupt) => panic!("unexpected interrupt"),
            Ok(()) => panic!("expected an error"),
        }
    }

    fn stdout(&self) -> String {
        self.stdout.lock().clone()
    }
}

// =============================================================================
// Expressions
// =============================================================================

#[test]
fn test_arithmetic_and_division_modes() {
    let h = Harness::new();
    assert_eq!(h.eval("1 + 2 * 3"), "7");
    assert_eq!(h.eval("7 / 2"), "3");
    assert_eq!(h.eval("7 // 2.0"), "3.0");
    assert_eq!(h.eval("2 ** 10"), "1024");
    assert_eq!(h.eval("-7 % 3"), "2");

    h.run("from __future__ import division\n__result = 7 / 2\n").unwrap();
    assert_eq!(h.globals.get("__result").unwrap().repr(), "3.5");
}

#[test]
fn test_strings_and_formatting() {
    let h = Harness::new();
    assert_eq!(h.eval("'a' + 'b' * 2"), "'abb'");
    assert_eq!(h.eval("'%s=%d' % ('x', 3)"), "'x=3'");
    assert_eq!(h.eval("'%.2f' % 3.14159"), "'3.14'");
    assert_eq!(h.eval("'%(a)s-%(b)r' % {'a': 1, 'b': 'z'}"), "\"1-'z'\"");
    assert_eq!(h.eval("'{} and {name}'.format(1, name='two')"), "'1 and two'");
    assert_eq!(h.eval("', '.join(['a', 'b'])"), "'a, b'");
    assert_eq!(h.eval("'a,b,,c'.split(',')"), "['a', 'b', '', 'c']");
    assert_eq!(h.eval("'  x '.strip()"), "'x'");
    assert_eq!(h.eval("'hello'[1:3]"), "'el'");
}

#[test]
fn test_containers() {
    let h = Harness::new();
    assert_eq!(h.eval("[x * x for x in range(5) if x % 2 == 0]"), "[0, 4, 16]");
    assert_eq!(h.eval("{'a': 1}.get('b', 5)"), "5");
    assert_eq!(h.eval("sorted([3, 1, 2], reverse=True)"), "[3, 2, 1]");
    assert_eq!(h.eval("sorted(['bb', 'a', 'ccc'], key=len)"), "['a', 'bb', 'ccc']");
    assert_eq!(h.eval("zip([1, 2], 'ab')"), "[(1, 'a'), (2, 'b')]");
    assert_eq!(h.eval("dict([('a', 1)]).items()"), "[('a', 1)]");
    assert_eq!(h.eval("(1, 2) + (3,)"), "(1, 2, 3)");
    assert_eq!(h.eval("3 in [1, 2, 3] and 'x' not in 'abc'"), "True");
    assert_eq!(h.eval("max([1, 5, 3]), min(4, 2)"), "(5, 2)");
}

#[test]
fn test_aliasing_and_augmented_assignment() {
    let h = Harness::new();
    h.run("a = [1]\nb = a\nb += [2]\nc = a[:]\nc.append(3)\n")
        .unwrap();
    assert_eq!(h.globals.get("a").unwrap().repr(), "[1, 2]");
    assert_eq!(h.globals.get("c").unwrap().repr(), "[1, 2, 3]");
}

// =============================================================================
// Statements
// =============================================================================

#[test]
fn test_functions_closures_and_defaults() {
    let h = Harness::new();
    h.run(
        "def make(n):\n    def add(x, y=1):\n        return x + y + n\n    return add\n\
         f = make(10)\nr1 = f(1)\nr2 = f(1, y=5)\n\
         def varargs(*args, **kw):\n    return len(args), sorted(kw.keys())\n\
         r3 = varargs(1, 2, a=3)\n",
    )
    .unwrap();
    assert_eq!(h.globals.get("r1").unwrap().repr(), "12");
    assert_eq!(h.globals.get("r2").unwrap().repr(), "16");
    assert_eq!(h.globals.get("r3").unwrap().repr(), "(2, ['a'])");
}

#[test]
fn test_classes() {
    let h = Harness::new();
    h.run(
        "class Counter:\n    start = 5\n    def __init__(self):\n        self.n = Counter.start\n\
         \x20   def bump(self, by=1):\n        self.n += by\n        return self\n\
         \x20   def __repr__(self):\n        return 'Counter(%d)' % self.n\n\
         class Double(Counter):\n    def bump(self, by=1):\n        return Counter.bump(self, by * 2)\n\
         c = Double().bump().bump(3)\n",
    )
    .unwrap();
    let c = h.globals.get("c").unwrap();
    let registry = Arc::new(ModuleRegistry::new());
    let mut interp = Interpreter::new(registry, InterruptHandle::new());
    assert_eq!(interp.repr(&c).unwrap(), "Counter(13)");
}

#[test]
fn test_exceptions() {
    let h = Harness::new();
    h.run(
        "log = []\n\
         try:\n    {}['k']\nexcept KeyError as e:\n    log.append(str(e))\nelse:\n    log.append('else')\nfinally:\n    log.append('finally')\n\
         try:\n    1 / 0\nexcept (ValueError, ArithmeticError):\n    log.append('arith')\n",
    )
    .unwrap();
    assert_eq!(
        h.globals.get("log").unwrap().repr(),
        "[\"'k'\", 'finally', 'arith']"
    );

    let (kind, message) = h.error("raise ValueError('bad value')");
    assert_eq!(kind, ExceptionKind::ValueError);
    assert_eq!(message, "bad value");

    let (kind, message) = h.error("undefined_name");
    assert_eq!(kind, ExceptionKind::NameError);
    assert_eq!(message, "name 'undefined_name' is not defined");

    let (kind, _) = h.error("try:\n    [][0]\nexcept IndexError:\n    raise\n");
    assert_eq!(kind, ExceptionKind::IndexError);
}

#[test]
fn test_traceback_frames() {
    let h = Harness::new();
    let program = compile(
        parse("def f():\n    return 1 / 0\n\nf()\n").unwrap(),
        "<unit>",
        &FeatureSet::new(),
    )
    .unwrap();
    let mut interp = h.interpreter(InterruptHandle::new());
    let Err(Unwind::Error(exc)) = interp.run(&program, &h.globals) else {
        panic!("expected an error");
    };
    let frames: Vec<(String, String, u32)> = exc
        .traceback
        .iter()
        .map(|f| (f.unit.to_string(), f.function.to_string(), f.line))
        .collect();
    assert_eq!(
        frames,
        vec![
            ("<unit>".to_string(), "<module>".to_string(), 4),
            ("<unit>".to_string(), "f".to_string(), 2),
        ]
    );
}

#[test]
fn test_with_statement() {
    let h = Harness::new();
    h.run(
        "log = []\n\
         class Manager:\n    def __enter__(self):\n        log.append('enter')\n        return 42\n\
         \x20   def __exit__(self, kind, value, tb):\n        log.append(kind is None)\n\
         with Manager() as x:\n    log.append(x)\n",
    )
    .unwrap();
    assert_eq!(
        h.globals.get("log").unwrap().repr(),
        "['enter', 42, True]"
    );
}

#[test]
fn test_print_and_sys_stdout() {
    let h = Harness::new();
    h.run("import sys\nprint 'a', 1\nprint 'b',\nprint 'c'\nprint >>sys.stdout, 'd'\n")
        .unwrap();
    assert_eq!(h.stdout(), "a 1\nb c\nd\n");
}

#[test]
fn test_recursion_limit() {
    let h = Harness::new();
    let program = compile(
        parse("def f(n):\n    return f(n + 1)\nf(0)\n").unwrap(),
        "<test>",
        &FeatureSet::new(),
    )
    .unwrap();
    let mut interp = h.interpreter(InterruptHandle::new());
    interp.set_recursion_limit(50);
    let Err(Unwind::Error(exc)) = interp.run(&program, &h.globals) else {
        panic!("expected an error");
    };
    assert_eq!(exc.kind, ExceptionKind::RecursionError);
}

#[test]
fn test_integer_overflow_raises() {
    let h = Harness::new();
    let (kind, message) = h.error("x = 9223372036854775807 + 1");
    assert_eq!(kind, ExceptionKind::OverflowError);
    assert_eq!(message, "integer overflow");
}

#[test]
fn test_huge_sequences_raise_instead_of_aborting() {
    let h = Harness::new();
    let (kind, _) = h.error("x = 'ab' * 10**17");
    assert_eq!(kind, ExceptionKind::MemoryError);
    let (kind, _) = h.error("x = range(10**11)");
    assert_eq!(kind, ExceptionKind::MemoryError);
    let (kind, _) = h.error("x = xrange(-10**18, 10**18)");
    assert_eq!(kind, ExceptionKind::MemoryError);
    let (kind, _) = h.error("x = (1, 2) * 10**18");
    assert_eq!(kind, ExceptionKind::MemoryError);
    let (kind, _) = h.error("x = '%999999999999d' % 1");
    assert_eq!(kind, ExceptionKind::MemoryError);

    h.run("try:\n    x = [0] * 10**15\nexcept MemoryError:\n    x = 'caught'\n")
        .unwrap();
    assert_eq!(h.globals.get("x").unwrap().repr(), "'caught'");
}

#[test]
fn test_range_lengths() {
    let h = Harness::new();
    assert_eq!(h.eval("range(3)"), "[0, 1, 2]");
    assert_eq!(h.eval("range(10, 0, -3)"), "[10, 7, 4, 1]");
    assert_eq!(h.eval("range(0, 10, 4)"), "[0, 4, 8]");
    assert_eq!(h.eval("range(5, 5)"), "[]");
    assert_eq!(h.eval("range(9223372036854775806, 9223372036854775807)"), "[9223372036854775806]");
}

#[test]
fn test_empty_repetition_of_huge_count() {
    let h = Harness::new();
    assert_eq!(h.eval("[] * 10**13"), "[]");
    assert_eq!(h.eval("'' * 10**17"), "''");
    assert_eq!(h.eval("() * 10**18"), "()");
}

// =============================================================================
// Modules
// =============================================================================

#[test]
fn test_imports() {
    let h = Harness::new();
    h.registry
        .register_source("shapes.square", "def area(s):\n    return s * s\n");
    h.run(
        "import math\nimport shapes.square\nfrom shapes.square import area as sq\n\
         from copy import copy\n\
         r = (int(math.sqrt(16)), shapes.square.area(3), sq(2))\n\
         a = [1]\nb = copy(a)\n",
    )
    .unwrap();
    assert_eq!(h.globals.get("r").unwrap().repr(), "(4, 9, 4)");
    assert!(!h.globals.get("a").unwrap().is(&h.globals.get("b").unwrap()));

    let (kind, _) = h.error("from . import x");
    assert_eq!(kind, ExceptionKind::ImportError);
    let (kind, message) = h.error("from math import nothing");
    assert_eq!(kind, ExceptionKind::ImportError);
    assert_eq!(message, "cannot import name nothing");
}

#[test]
fn test_host_hooks_resolve_after_globals() {
    let h = Harness::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let program = compile(parse("hook(1)\nhook = 5\n").unwrap(), "<t>", &FeatureSet::new()).unwrap();
    let mut interp = h.interpreter(InterruptHandle::new());
    interp.set_hook(
        "hook",
        Value::native("hook", move |_, args| {
            sink.lock().push(args.positional[0].repr());
            Ok(Value::None)
        }),
    );
    interp.run(&program, &h.globals).unwrap();
    assert_eq!(*seen.lock(), vec!["1".to_string()]);
    assert_eq!(h.globals.get("hook").unwrap().repr(), "5");
}

// =============================================================================
// Interruption
// =============================================================================

#[test]
fn test_interrupt_stops_infinite_loop() {
    let h = Harness::new();
    let program = compile(parse("while True:\n    pass\n").unwrap(), "<t>", &FeatureSet::new()).unwrap();
    let interrupt = InterruptHandle::new();
    let mut interp = h.interpreter(interrupt.clone());
    let globals = h.globals.clone();
    let worker = thread::spawn(move || interp.run(&program, &globals));
    thread::sleep(Duration::from_millis(50));
    interrupt.interrupt();
    let result = worker.join().expect("worker panicked");
    assert!(matches!(result, Err(Unwind::Interrupt)));
}

#[test]
fn test_interrupt_wakes_sleep() {
    let h = Harness::new();
    let program = compile(
        parse("import time\ntime.sleep(30)\n").unwrap(),
        "<t>",
        &FeatureSet::new(),
    )
    .unwrap();
    let interrupt = InterruptHandle::new();
    let mut interp = h.interpreter(interrupt.clone());
    let globals = h.globals.clone();
    let started = Instant::now();
    let worker = thread::spawn(move || interp.run(&program, &globals));
    thread::sleep(Duration::from_millis(50));
    interrupt.interrupt();
    let result = worker.join().expect("worker panicked");
    assert!(matches!(result, Err(Unwind::Interrupt)));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[test]
fn test_interrupt_during_large_repetition() {
    let h = Harness::new();
    let program = compile(
        parse("x = [] * 10**13\nwhile True:\n    y = 'ab' * 1000\n").unwrap(),
        "<t>",
        &FeatureSet::new(),
    )
    .unwrap();
    let interrupt = InterruptHandle::new();
    let mut interp = h.interpreter(interrupt.clone());
    let globals = h.globals.clone();
    let started = Instant::now();
    let worker = thread::spawn(move || interp.run(&program, &globals));
    thread::sleep(Duration::from_millis(50));
    interrupt.interrupt();
    let result = worker.join().expect("worker panicked");
    assert!(matches!(result, Err(Unwind::Interrupt)));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(h.globals.get("x").unwrap().repr(), "[]");
}

#[test]
fn test_interrupt_is_not_caught_by_except() {
    let h = Harness::new();
    let program = compile(
        parse("while True:\n    try:\n        pass\n    except:\n        pass\n").unwrap(),
        "<t>",
        &FeatureSet::new(),
    )
    .unwrap();
    let interrupt = InterruptHandle::new();
    interrupt.interrupt();
    let mut interp = h.interpreter(interrupt);
    assert!(matches!(
        interp.run(&program, &h.globals),
        Err(Unwind::Interrupt)
    ));
}

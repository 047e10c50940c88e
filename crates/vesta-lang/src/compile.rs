//! Compilation of parsed units into executable programs.
//!
//! Compilation validates context-dependent rules the grammar cannot express
//! (`return` outside a function, `break` outside a loop, unknown `__future__`
//! features) and lowers the tree according to the effective feature set.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::ast::*;
use crate::error::{ParseResult, SyntaxError};
use crate::stack::ensure_sufficient_stack;

/// Features accepted in `from __future__ import ...`.
///
/// Only `division` changes behaviour; the rest are accepted for
/// compatibility and have no effect.
pub const FUTURE_FEATURES: &[&str] = &[
    "division",
    "absolute_import",
    "with_statement",
    "nested_scopes",
    "generators",
];

/// A set of enabled `__future__` features.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FeatureSet(BTreeSet<String>);

impl FeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, feature: impl Into<String>) {
        self.0.insert(feature.into());
    }

    pub fn contains(&self, feature: &str) -> bool {
        self.0.contains(feature)
    }

    pub fn union(&self, other: &FeatureSet) -> FeatureSet {
        FeatureSet(self.0.union(&other.0).cloned().collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        FeatureSet(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().collect();
        f.write_str(&names.join(", "))
    }
}

/// A compiled, executable unit.
#[derive(Debug, Clone)]
pub struct Program {
    /// Unit name used in tracebacks, e.g. `<statement3>`.
    pub name: Arc<str>,
    pub body: Arc<Vec<Stmt>>,
    /// Inherited features plus those declared by the unit.
    pub features: FeatureSet,
}

/// Features declared by `from __future__ import` statements at the top level.
pub fn declared_features(module: &Module) -> ParseResult<FeatureSet> {
    let mut features = FeatureSet::new();
    for stmt in &module.body {
        if let StmtKind::ImportFrom {
            module: name,
            names,
            level: 0,
        } = &stmt.kind
        {
            if name != "__future__" {
                continue;
            }
            for alias in names {
                if !FUTURE_FEATURES.contains(&alias.name.as_str()) {
                    return Err(SyntaxError::new(
                        format!("future feature {} is not defined", alias.name),
                        stmt.line,
                        0,
                    ));
                }
                features.insert(alias.name.clone());
            }
        }
    }
    Ok(features)
}

/// Validate and lower `module` into a program named `name`.
pub fn compile(mut module: Module, name: &str, inherited: &FeatureSet) -> ParseResult<Program> {
    let features = inherited.union(&declared_features(&module)?);
    let mut compiler = Compiler {
        true_division: features.contains("division"),
        in_function: false,
        in_loop: false,
    };
    compiler.visit_body(&mut module.body)?;
    Ok(Program {
        name: Arc::from(name),
        body: Arc::new(module.body),
        features,
    })
}

struct Compiler {
    true_division: bool,
    in_function: bool,
    in_loop: bool,
}

impl Compiler {
    fn visit_body(&mut self, body: &mut [Stmt]) -> ParseResult<()> {
        for stmt in body {
            self.visit_stmt(stmt)?;
        }
        Ok(())
    }

    fn visit_loop_body(&mut self, body: &mut [Stmt]) -> ParseResult<()> {
        let saved = std::mem::replace(&mut self.in_loop, true);
        let result = self.visit_body(body);
        self.in_loop = saved;
        result
    }

    fn visit_function(&mut self, def: &mut Arc<FunctionDef>) -> ParseResult<()> {
        let def = Arc::make_mut(def);
        for param in &mut def.params.args {
            if let Some(default) = &mut param.default {
                self.visit_expr(default)?;
            }
        }
        for decorator in &mut def.decorators {
            self.visit_expr(decorator)?;
        }
        let saved = (self.in_function, self.in_loop);
        self.in_function = true;
        self.in_loop = false;
        let result = self.visit_body(&mut def.body);
        (self.in_function, self.in_loop) = saved;
        result
    }

    fn visit_stmt(&mut self, stmt: &mut Stmt) -> ParseResult<()> {
        ensure_sufficient_stack(|| self.visit_stmt_kind(stmt))
    }

    fn visit_stmt_kind(&mut self, stmt: &mut Stmt) -> ParseResult<()> {
        let line = stmt.line;
        match &mut stmt.kind {
            StmtKind::Expr(expr) => self.visit_expr(expr)?,
            StmtKind::Assign { targets, value } => {
                for target in targets {
                    self.visit_expr(target)?;
                }
                self.visit_expr(value)?;
            }
            StmtKind::AugAssign { target, op, value } => {
                if *op == BinOp::Div && self.true_division {
                    *op = BinOp::TrueDiv;
                }
                self.visit_expr(target)?;
                self.visit_expr(value)?;
            }
            StmtKind::Print { dest, values, .. } => {
                if let Some(dest) = dest {
                    self.visit_expr(dest)?;
                }
                for value in values {
                    self.visit_expr(value)?;
                }
            }
            StmtKind::If { test, body, orelse } => {
                self.visit_expr(test)?;
                self.visit_body(body)?;
                self.visit_body(orelse)?;
            }
            StmtKind::While { test, body, orelse } => {
                self.visit_expr(test)?;
                self.visit_loop_body(body)?;
                self.visit_body(orelse)?;
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                self.visit_expr(target)?;
                self.visit_expr(iter)?;
                self.visit_loop_body(body)?;
                self.visit_body(orelse)?;
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                self.visit_body(body)?;
                for handler in handlers {
                    if let Some(kind) = &mut handler.kind {
                        self.visit_expr(kind)?;
                    }
                    self.visit_body(&mut handler.body)?;
                }
                self.visit_body(orelse)?;
                self.visit_body(finalbody)?;
            }
            StmtKind::With {
                context,
                target,
                body,
            } => {
                self.visit_expr(context)?;
                if let Some(target) = target {
                    self.visit_expr(target)?;
                }
                self.visit_body(body)?;
            }
            StmtKind::FunctionDef(def) => self.visit_function(def)?,
            StmtKind::ClassDef(class) => {
                for base in &mut class.bases {
                    self.visit_expr(base)?;
                }
                for decorator in &mut class.decorators {
                    self.visit_expr(decorator)?;
                }
                let saved = (self.in_function, self.in_loop);
                self.in_function = false;
                self.in_loop = false;
                let result = self.visit_body(&mut class.body);
                (self.in_function, self.in_loop) = saved;
                result?;
            }
            StmtKind::Return(value) => {
                if !self.in_function {
                    return Err(SyntaxError::new("'return' outside function", line, 0));
                }
                if let Some(value) = value {
                    self.visit_expr(value)?;
                }
            }
            StmtKind::Raise(value) => {
                if let Some(value) = value {
                    self.visit_expr(value)?;
                }
            }
            StmtKind::Break => {
                if !self.in_loop {
                    return Err(SyntaxError::new("'break' outside loop", line, 0));
                }
            }
            StmtKind::Continue => {
                if !self.in_loop {
                    return Err(SyntaxError::new(
                        "'continue' not properly in loop",
                        line,
                        0,
                    ));
                }
            }
            StmtKind::Global(_) => {
                return Err(SyntaxError::new(
                    "the global statement is not supported",
                    line,
                    0,
                ));
            }
            StmtKind::ImportFrom { module, names, .. } if module.as_str() == "__future__" => {
                if let Some(alias) = names
                    .iter()
                    .find(|a| !FUTURE_FEATURES.contains(&a.name.as_str()))
                {
                    return Err(SyntaxError::new(
                        format!("future feature {} is not defined", alias.name),
                        line,
                        0,
                    ));
                }
            }
            StmtKind::Del(targets) => {
                for target in targets {
                    self.visit_expr(target)?;
                }
            }
            StmtKind::Assert { test, msg } => {
                self.visit_expr(test)?;
                if let Some(msg) = msg {
                    self.visit_expr(msg)?;
                }
            }
            StmtKind::Import(_)
            | StmtKind::ImportFrom { .. }
            | StmtKind::Pass => {}
        }
        Ok(())
    }

    fn visit_expr(&mut self, expr: &mut Expr) -> ParseResult<()> {
        ensure_sufficient_stack(|| self.visit_expr_kind(expr))
    }

    fn visit_expr_kind(&mut self, expr: &mut Expr) -> ParseResult<()> {
        match &mut expr.kind {
            ExprKind::Name(_)
            | ExprKind::Int(_)
            | ExprKind::Float(_)
            | ExprKind::Str(_)
            | ExprKind::Bool(_)
            | ExprKind::None => {}
            ExprKind::List(items) | ExprKind::Tuple(items) => {
                for item in items {
                    self.visit_expr(item)?;
                }
            }
            ExprKind::Dict(entries) => {
                for (key, value) in entries {
                    self.visit_expr(key)?;
                    self.visit_expr(value)?;
                }
            }
            ExprKind::ListComp { elt, generators } => {
                self.visit_expr(elt)?;
                for generator in generators {
                    self.visit_expr(&mut generator.target)?;
                    self.visit_expr(&mut generator.iter)?;
                    for cond in &mut generator.ifs {
                        self.visit_expr(cond)?;
                    }
                }
            }
            ExprKind::Attribute { value, .. } => self.visit_expr(value)?,
            ExprKind::Subscript { value, index } => {
                self.visit_expr(value)?;
                self.visit_expr(index)?;
            }
            ExprKind::Slice { lower, upper, step } => {
                for part in [lower, upper, step].into_iter().flatten() {
                    self.visit_expr(part)?;
                }
            }
            ExprKind::Call { func, args } => {
                self.visit_expr(func)?;
                for arg in args {
                    match arg {
                        Arg::Positional(e)
                        | Arg::Keyword(_, e)
                        | Arg::Star(e)
                        | Arg::DoubleStar(e) => self.visit_expr(e)?,
                    }
                }
            }
            ExprKind::BinOp { left, op, right } => {
                if *op == BinOp::Div && self.true_division {
                    *op = BinOp::TrueDiv;
                }
                self.visit_expr(left)?;
                self.visit_expr(right)?;
            }
            ExprKind::UnaryOp { operand, .. } => self.visit_expr(operand)?,
            ExprKind::BoolOp { values, .. } => {
                for value in values {
                    self.visit_expr(value)?;
                }
            }
            ExprKind::Compare { left, ops } => {
                self.visit_expr(left)?;
                for (_, right) in ops {
                    self.visit_expr(right)?;
                }
            }
            ExprKind::IfExp { test, body, orelse } => {
                self.visit_expr(test)?;
                self.visit_expr(body)?;
                self.visit_expr(orelse)?;
            }
            ExprKind::Lambda(def) => self.visit_function(def)?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn compile_source(source: &str, inherited: &FeatureSet) -> ParseResult<Program> {
        compile(parse(source)?, "<test>", inherited)
    }

    fn first_binop(program: &Program) -> BinOp {
        match &program.body[0].kind {
            StmtKind::Expr(Expr {
                kind: ExprKind::BinOp { op, .. },
                ..
            }) => *op,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_classic_division_by_default() {
        let program = compile_source("1 / 2", &FeatureSet::new()).unwrap();
        assert_eq!(first_binop(&program), BinOp::Div);
        assert!(program.features.is_empty());
    }

    #[test]
    fn test_declared_division() {
        let program =
            compile_source("from __future__ import division\n1 / 2", &FeatureSet::new()).unwrap();
        assert!(program.features.contains("division"));
        match &program.body[1].kind {
            StmtKind::Expr(Expr {
                kind: ExprKind::BinOp { op, .. },
                ..
            }) => assert_eq!(*op, BinOp::TrueDiv),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_inherited_division_reaches_nested_functions() {
        let inherited: FeatureSet = ["division"].into_iter().collect();
        let program = compile_source("def f(x):\n    return x / 2\n", &inherited).unwrap();
        let StmtKind::FunctionDef(def) = &program.body[0].kind else {
            panic!("expected a function");
        };
        let StmtKind::Return(Some(Expr {
            kind: ExprKind::BinOp { op, .. },
            ..
        })) = &def.body[0].kind
        else {
            panic!("expected a return");
        };
        assert_eq!(*op, BinOp::TrueDiv);
    }

    #[test]
    fn test_unknown_future_feature() {
        let err = compile_source("from __future__ import braces", &FeatureSet::new()).unwrap_err();
        assert_eq!(err.message, "future feature braces is not defined");
    }

    #[test]
    fn test_context_errors() {
        let none = FeatureSet::new();
        assert!(compile_source("return 1", &none).is_err());
        assert!(compile_source("break", &none).is_err());
        assert!(compile_source("while x:\n    def f():\n        break\n", &none).is_err());
        assert!(compile_source("while x:\n    if y:\n        break\n", &none).is_ok());
        assert!(compile_source("f = lambda: 1", &none).is_ok());
    }
}

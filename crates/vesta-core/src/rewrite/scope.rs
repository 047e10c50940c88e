//! Lexical scopes seen by the rewriter.
//!
//! A name bound anywhere in a scope is local to the whole scope. Class
//! bodies form a scope of their own but are invisible to functions nested
//! inside them. Comprehensions and lambdas never contain statements, so
//! they never hold a mutation site and are not tracked.

use rustc_hash::FxHashSet;
use vesta_lang::ast::{Expr, ExprKind, Params, Stmt, StmtKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScopeKind {
    /// The statement's own top level; its names are worksheet globals.
    Chunk,
    Function,
    Class,
}

#[derive(Debug)]
pub(crate) struct Scope {
    pub(crate) kind: ScopeKind,
    pub(crate) bound: FxHashSet<String>,
}

impl Scope {
    pub(crate) fn chunk() -> Self {
        Self {
            kind: ScopeKind::Chunk,
            bound: FxHashSet::default(),
        }
    }

    pub(crate) fn function(params: &Params, body: &[Stmt]) -> Self {
        let mut bound: FxHashSet<String> = params.names().map(str::to_string).collect();
        collect_body(body, &mut bound);
        Self {
            kind: ScopeKind::Function,
            bound,
        }
    }

    pub(crate) fn class(body: &[Stmt]) -> Self {
        let mut bound = FxHashSet::default();
        collect_body(body, &mut bound);
        Self {
            kind: ScopeKind::Class,
            bound,
        }
    }
}

/// How the root name of a mutated path resolves from the innermost scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution {
    /// Bound in the current function or class body.
    Local,
    /// Bound in an enclosing function.
    Free,
    /// A worksheet global, referenced from the statement's top level or a
    /// class body there.
    Global,
    /// A worksheet global referenced from inside a function.
    GlobalInFunction,
}

pub(crate) fn resolve(scopes: &[Scope], name: &str) -> Resolution {
    let Some((current, enclosing)) = scopes.split_last() else {
        return Resolution::Global;
    };
    if current.kind != ScopeKind::Chunk && current.bound.contains(name) {
        return Resolution::Local;
    }
    for scope in enclosing.iter().rev() {
        if scope.kind == ScopeKind::Function && scope.bound.contains(name) {
            return Resolution::Free;
        }
    }
    let in_function = scopes.iter().any(|s| s.kind == ScopeKind::Function);
    if in_function {
        Resolution::GlobalInFunction
    } else {
        Resolution::Global
    }
}

/// Names bound by `body`, not descending into nested functions or classes
/// other than through their own names.
pub(crate) fn collect_body(body: &[Stmt], bound: &mut FxHashSet<String>) {
    for stmt in body {
        collect_stmt(stmt, bound);
    }
}

fn collect_stmt(stmt: &Stmt, bound: &mut FxHashSet<String>) {
    match &stmt.kind {
        StmtKind::Assign { targets, .. } => {
            for target in targets {
                collect_target(target, bound);
            }
        }
        StmtKind::AugAssign { target, .. } => collect_target(target, bound),
        StmtKind::For {
            target,
            body,
            orelse,
            ..
        } => {
            collect_target(target, bound);
            collect_body(body, bound);
            collect_body(orelse, bound);
        }
        StmtKind::If { body, orelse, .. } | StmtKind::While { body, orelse, .. } => {
            collect_body(body, bound);
            collect_body(orelse, bound);
        }
        StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } => {
            collect_body(body, bound);
            for handler in handlers {
                if let Some(name) = &handler.name {
                    bound.insert(name.clone());
                }
                collect_body(&handler.body, bound);
            }
            collect_body(orelse, bound);
            collect_body(finalbody, bound);
        }
        StmtKind::With { target, body, .. } => {
            if let Some(target) = target {
                collect_target(target, bound);
            }
            collect_body(body, bound);
        }
        StmtKind::FunctionDef(def) => {
            bound.insert(def.name.clone());
        }
        StmtKind::ClassDef(class) => {
            bound.insert(class.name.clone());
        }
        StmtKind::Import(aliases) => {
            for alias in aliases {
                bound.insert(import_binding(&alias.name, alias.asname.as_deref()));
            }
        }
        StmtKind::ImportFrom { names, .. } => {
            for alias in names.iter().filter(|a| a.name != "*") {
                bound.insert(alias.asname.clone().unwrap_or_else(|| alias.name.clone()));
            }
        }
        StmtKind::Del(targets) => {
            for target in targets {
                collect_target(target, bound);
            }
        }
        StmtKind::Expr(_)
        | StmtKind::Print { .. }
        | StmtKind::Return(_)
        | StmtKind::Raise(_)
        | StmtKind::Global(_)
        | StmtKind::Assert { .. }
        | StmtKind::Pass
        | StmtKind::Break
        | StmtKind::Continue => {}
    }
}

/// Names bound by an assignment target.
pub(crate) fn collect_target(target: &Expr, bound: &mut FxHashSet<String>) {
    match &target.kind {
        ExprKind::Name(name) => {
            bound.insert(name.clone());
        }
        ExprKind::Tuple(items) | ExprKind::List(items) => {
            for item in items {
                collect_target(item, bound);
            }
        }
        _ => {}
    }
}

/// The name `import a.b.c [as d]` binds.
pub(crate) fn import_binding(module: &str, asname: Option<&str>) -> String {
    match asname {
        Some(asname) => asname.to_string(),
        None => module.split('.').next().unwrap_or(module).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesta_lang::parse;

    fn bound(source: &str) -> Vec<String> {
        let module = parse(source).unwrap();
        let mut names = FxHashSet::default();
        collect_body(&module.body, &mut names);
        let mut names: Vec<String> = names.into_iter().collect();
        names.sort();
        names
    }

    #[test]
    fn test_collects_assignment_forms() {
        assert_eq!(bound("a, [b, c] = x\nd += 1\ne.f = 2"), ["a", "b", "c", "d"]);
    }

    #[test]
    fn test_collects_compound_statements() {
        let source = "for i in x:\n    j = i\nwith y as k:\n    pass\ntry:\n    pass\nexcept E as err:\n    pass";
        assert_eq!(bound(source), ["err", "i", "j", "k"]);
    }

    #[test]
    fn test_nested_definitions_only_bind_their_names() {
        assert_eq!(
            bound("def f(x):\n    y = 1\nclass C:\n    z = 2"),
            ["C", "f"]
        );
    }

    #[test]
    fn test_imports() {
        assert_eq!(
            bound("import os.path\nimport re as r\nfrom m import a, b as c\nfrom n import *"),
            ["a", "c", "os", "r"]
        );
    }

    #[test]
    fn test_resolution() {
        let mut outer = Scope::chunk();
        outer.bound.insert("g".into());
        let mut f = Scope::function(&Params::default(), &[]);
        f.bound.insert("x".into());
        let mut class = Scope::class(&[]);
        class.bound.insert("c".into());
        let g = Scope::function(&Params::default(), &[]);

        let scopes = vec![outer, f, class, g];
        assert_eq!(resolve(&scopes, "x"), Resolution::Free);
        assert_eq!(resolve(&scopes, "c"), Resolution::GlobalInFunction);
        assert_eq!(resolve(&scopes, "g"), Resolution::GlobalInFunction);
        assert_eq!(resolve(&scopes[..1], "g"), Resolution::Global);
        assert_eq!(resolve(&scopes[..3], "c"), Resolution::Local);
    }
}

//! Mutation descriptors.
//!
//! For a site like `a.b[0] = 1` the receiver `a.b` may be an object that an
//! earlier statement's scope still refers to. Before the statement runs,
//! every prefix of the receiver's path is replaced by a shallow copy,
//! outermost first: `a = copy(a)`, then `a.b = copy(a.b)`.

use std::sync::LazyLock;

use regex::Regex;
use rustc_hash::FxHashSet;
use vesta_lang::ast::{Expr, ExprKind, Module, Stmt, StmtKind};
use vesta_lang::{FeatureSet, Program, compile};

use super::RewriteError;

/// Unit name of compiled copy procedures.
pub const COPY_UNIT: &str = "<copy>";

/// A path a statement may mutate.
#[derive(Debug, Clone)]
pub struct Mutation {
    /// Outermost name of the path.
    pub root: String,
    /// Human readable path, e.g. `a.b[...]` or `a.get(...)`.
    pub description: String,
    /// Rebinds the path to a shallow copy of itself. Absent when the path
    /// runs through a call and cannot be assigned.
    pub copy: Option<Program>,
}

/// One step of a receiver chain, root first.
struct Link<'e> {
    expr: &'e Expr,
    description: String,
}

/// The analysed chain of a receiver expression.
struct Chain<'e> {
    root: Option<String>,
    /// Copyable prefixes, root first.
    links: Vec<Link<'e>>,
    /// Description of the whole receiver when the chain stopped being
    /// copyable before reaching it.
    opaque: Option<String>,
    /// Set once a call is entered; nothing inside a call is copied.
    inside_call: bool,
}

/// Collects deduplicated descriptors for one statement.
pub(crate) struct MutationCollector<'a> {
    copy_hook: &'a str,
    features: FeatureSet,
    seen: FxHashSet<String>,
    mutations: Vec<Mutation>,
}

impl<'a> MutationCollector<'a> {
    pub(crate) fn new(copy_hook: &'a str, features: FeatureSet) -> Self {
        Self {
            copy_hook,
            features,
            seen: FxHashSet::default(),
            mutations: Vec::new(),
        }
    }

    /// Root name of the receiver, if the chain starts at a name.
    pub(crate) fn root_of(receiver: &Expr) -> Option<&str> {
        match &receiver.kind {
            ExprKind::Name(name) => Some(name),
            ExprKind::Attribute { value, .. } | ExprKind::Subscript { value, .. } => {
                Self::root_of(value)
            }
            ExprKind::Call { func, .. } => Self::root_of(func),
            _ => None,
        }
    }

    /// Record descriptors for a mutated receiver.
    pub(crate) fn add(&mut self, receiver: &Expr) -> Result<(), RewriteError> {
        let chain = analyse(receiver);
        let Some(root) = chain.root else {
            return Ok(());
        };
        for link in &chain.links {
            if self.seen.insert(path_key(link.expr)) {
                let copy = self.copy_procedure(link.expr)?;
                self.mutations.push(Mutation {
                    root: root.clone(),
                    description: link.description.clone(),
                    copy: Some(copy),
                });
            }
        }
        if let Some(description) = chain.opaque {
            if self.seen.insert(path_key(receiver)) {
                self.mutations.push(Mutation {
                    root,
                    description,
                    copy: None,
                });
            }
        }
        Ok(())
    }

    pub(crate) fn into_mutations(self) -> Vec<Mutation> {
        self.mutations
    }

    /// `path = copy(path)`, compiled as its own unit.
    fn copy_procedure(&self, path: &Expr) -> Result<Program, RewriteError> {
        let hook = Expr::name(self.copy_hook, path.line, path.column);
        let assign = Stmt::new(
            StmtKind::Assign {
                targets: vec![path.clone()],
                value: Expr::call(hook, vec![path.clone()]),
            },
            path.line,
        );
        let module = Module { body: vec![assign] };
        compile(module, COPY_UNIT, &self.features).map_err(|e| {
            RewriteError::Internal(format!("cannot compile copy procedure: {e}"))
        })
    }
}

/// Walk `receiver` from its root outward.
fn analyse(receiver: &Expr) -> Chain<'_> {
    let mut chain = Chain {
        root: None,
        links: Vec::new(),
        opaque: None,
        inside_call: false,
    };
    let (description, copyable) = walk(receiver, &mut chain);
    if !copyable {
        chain.opaque = Some(description);
    }
    chain
}

/// Describe `expr`, pushing copyable prefixes while the chain so far is
/// copyable. Returns the description and whether the chain is copyable up
/// to and including `expr`.
fn walk<'e>(expr: &'e Expr, chain: &mut Chain<'e>) -> (String, bool) {
    let (description, copyable) = match &expr.kind {
        ExprKind::Name(name) => {
            chain.root = Some(name.clone());
            (name.clone(), true)
        }
        ExprKind::Attribute { value, attr } => {
            let (inner, copyable) = walk(value, chain);
            (format!("{inner}.{attr}"), copyable)
        }
        ExprKind::Subscript { value, .. } => {
            let (inner, copyable) = walk(value, chain);
            (format!("{inner}[...]"), copyable)
        }
        ExprKind::Call { func, .. } => {
            chain.inside_call = true;
            let (inner, _) = walk(func, chain);
            (format!("{inner}(...)"), false)
        }
        ExprKind::List(_) | ExprKind::ListComp { .. } => ("[...]".to_string(), false),
        ExprKind::Dict(_) => ("{...}".to_string(), false),
        ExprKind::Str(_) => ("\"...\"".to_string(), false),
        ExprKind::Int(n) => (n.to_string(), false),
        _ => ("(...)".to_string(), false),
    };
    if copyable && !chain.inside_call {
        chain.links.push(Link {
            expr,
            description: description.clone(),
        });
    }
    (description, copyable)
}

static POSITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(line|column): \d+").unwrap_or_else(|e| panic!("invalid position pattern: {e}"))
});

/// Structural identity of a path, ignoring source positions.
fn path_key(expr: &Expr) -> String {
    POSITION.replace_all(&format!("{:?}", expr.kind), "").into_owned()
}

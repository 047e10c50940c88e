//! The rewriting walk.
//!
//! One pass over a statement's tree that:
//! - wraps top-level bare expressions in the output hook
//! - replaces `print` without a destination by the print hook
//! - names anonymous `build` blocks and surfaces their value
//! - records imports
//! - records mutation sites, skipping roots that are local to a function or
//!   that the statement is known to have rebound already
//!
//! Rebound ("overwritten") names are tracked per control-flow region. A
//! region passes its overwrites on only where every path through it
//! rebinds the name.

use std::sync::Arc;

use rustc_hash::FxHashSet;
use vesta_lang::FeatureSet;
use vesta_lang::ast::{Expr, ExprKind, Stmt, StmtKind};

use super::RewriteError;
use super::imports::ImportSet;
use super::mutation::{Mutation, MutationCollector};
use super::scope::{Resolution, Scope, collect_target, import_binding, resolve};
use crate::config::{HookNames, MutationPolicy};

type Overwrites = FxHashSet<String>;

type Result<T> = std::result::Result<T, RewriteError>;

pub(crate) struct Transformer<'a> {
    hooks: &'a HookNames,
    policy: &'a MutationPolicy,
    scopes: Vec<Scope>,
    build_count: usize,
    mutations: MutationCollector<'a>,
    imports: ImportSet,
}

impl<'a> Transformer<'a> {
    pub(crate) fn new(hooks: &'a HookNames, policy: &'a MutationPolicy, features: FeatureSet) -> Self {
        Self {
            hooks,
            policy,
            scopes: vec![Scope::chunk()],
            build_count: 0,
            mutations: MutationCollector::new(&hooks.copy, features),
            imports: ImportSet::new(),
        }
    }

    /// Rewrite `body` in place.
    pub(crate) fn transform(mut self, body: &mut [Stmt]) -> Result<(Vec<Mutation>, ImportSet)> {
        let mut overwritten = Overwrites::default();
        self.visit_body(body, &mut overwritten)?;
        Ok((self.mutations.into_mutations(), self.imports))
    }

    fn at_top_level(&self) -> bool {
        self.scopes.len() == 1
    }

    fn visit_body(&mut self, body: &mut [Stmt], overwritten: &mut Overwrites) -> Result<()> {
        for stmt in body {
            self.visit_stmt(stmt, overwritten)?;
        }
        Ok(())
    }

    fn visit_stmt(&mut self, stmt: &mut Stmt, overwritten: &mut Overwrites) -> Result<()> {
        let line = stmt.line;
        let replacement = match &mut stmt.kind {
            StmtKind::Expr(expr) => {
                if let ExprKind::Call { func, .. } = &expr.kind {
                    if let ExprKind::Attribute { value, attr } = &func.kind {
                        if !self.policy.is_getter(attr) {
                            self.mutated(value, line, overwritten)?;
                        }
                    }
                }
                if self.at_top_level() {
                    let value = std::mem::replace(expr, Expr::new(ExprKind::None, line, 0));
                    *expr = self.output_call(value);
                }
                None
            }
            StmtKind::Assign { targets, .. } => {
                for target in targets.iter() {
                    self.assigned(target, line, overwritten)?;
                }
                for target in targets.iter() {
                    collect_target(target, overwritten);
                }
                None
            }
            StmtKind::AugAssign { target, .. } => {
                self.mutated(target, line, overwritten)?;
                None
            }
            StmtKind::Print { dest: None, values, .. } => {
                let hook = Expr::name(&self.hooks.print, line, 0);
                Some(StmtKind::Expr(Expr::call(hook, std::mem::take(values))))
            }
            StmtKind::Print { .. } => None,
            StmtKind::If { body, orelse, .. } => {
                let mut then_branch = overwritten.clone();
                self.visit_body(body, &mut then_branch)?;
                let mut else_branch = overwritten.clone();
                self.visit_body(orelse, &mut else_branch)?;
                if !orelse.is_empty() {
                    *overwritten = intersection(&then_branch, &else_branch);
                }
                None
            }
            StmtKind::While { body, orelse, .. } => {
                self.visit_body(body, &mut overwritten.clone())?;
                self.visit_body(orelse, &mut overwritten.clone())?;
                None
            }
            StmtKind::For {
                target,
                body,
                orelse,
                ..
            } => {
                self.assigned(target, line, overwritten)?;
                let mut in_loop = overwritten.clone();
                collect_target(target, &mut in_loop);
                self.visit_body(body, &mut in_loop)?;
                self.visit_body(orelse, &mut overwritten.clone())?;
                None
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                let mut completed = overwritten.clone();
                self.visit_body(body, &mut completed)?;
                self.visit_body(orelse, &mut completed)?;

                let mut after = if handlers.is_empty() {
                    overwritten.clone()
                } else {
                    completed
                };
                for handler in handlers.iter_mut() {
                    let mut handled = overwritten.clone();
                    if let Some(name) = &handler.name {
                        handled.insert(name.clone());
                    }
                    self.visit_body(&mut handler.body, &mut handled)?;
                    after = intersection(&after, &handled);
                }
                self.visit_body(finalbody, &mut after)?;
                *overwritten = after;
                None
            }
            StmtKind::With {
                context,
                target,
                body,
            } => {
                if target.is_none() && self.is_builder(context) {
                    let name = format!("__build{}", self.build_count);
                    self.build_count += 1;
                    *target = Some(Expr::name(&name, line, 0));
                    body.push(Stmt::new(StmtKind::Expr(Expr::name(name, line, 0)), line));
                }
                if let Some(target) = target {
                    self.assigned(target, line, overwritten)?;
                    collect_target(target, overwritten);
                }
                self.visit_body(body, overwritten)?;
                None
            }
            StmtKind::FunctionDef(def) => {
                overwritten.insert(def.name.clone());
                let def = Arc::make_mut(def);
                self.scopes.push(Scope::function(&def.params, &def.body));
                let result = self.visit_body(&mut def.body, &mut Overwrites::default());
                self.scopes.pop();
                result?;
                None
            }
            StmtKind::ClassDef(class) => {
                self.scopes.push(Scope::class(&class.body));
                let result = self.visit_body(&mut class.body, &mut overwritten.clone());
                self.scopes.pop();
                result?;
                overwritten.insert(class.name.clone());
                None
            }
            StmtKind::Import(aliases) => {
                for alias in aliases.iter() {
                    self.imports.add_module(&alias.name);
                    overwritten.insert(import_binding(&alias.name, alias.asname.as_deref()));
                }
                None
            }
            StmtKind::ImportFrom {
                module,
                names,
                level,
            } => {
                if *level > 0 {
                    return Err(RewriteError::Unsupported {
                        message: "relative imports are not supported".to_string(),
                        line,
                    });
                }
                self.imports.add_module(module);
                for alias in names.iter() {
                    if module.as_str() == "__future__" {
                        self.imports.add_future(&alias.name);
                    }
                    // `from m import *` binds nothing we can see.
                    if alias.name != "*" {
                        overwritten
                            .insert(alias.asname.clone().unwrap_or_else(|| alias.name.clone()));
                    }
                }
                None
            }
            StmtKind::Global(_) => {
                return Err(RewriteError::Unsupported {
                    message: "the global statement is not supported".to_string(),
                    line,
                });
            }
            StmtKind::Del(targets) => {
                for target in targets.iter() {
                    self.assigned(target, line, overwritten)?;
                }
                None
            }
            StmtKind::Return(_)
            | StmtKind::Raise(_)
            | StmtKind::Assert { .. }
            | StmtKind::Pass
            | StmtKind::Break
            | StmtKind::Continue => None,
        };
        if let Some(kind) = replacement {
            stmt.kind = kind;
        }
        Ok(())
    }

    /// `value` passed to the output hook; tuples are passed element-wise.
    fn output_call(&self, value: Expr) -> Expr {
        let hook = Expr::name(&self.hooks.output, value.line, value.column);
        let args = match value.kind {
            ExprKind::Tuple(items) => items,
            kind => vec![Expr {
                kind,
                line: value.line,
                column: value.column,
            }],
        };
        Expr::call(hook, args)
    }

    fn is_builder(&self, context: &Expr) -> bool {
        matches!(
            &context.kind,
            ExprKind::Call { func, .. }
                if matches!(&func.kind, ExprKind::Name(name) if *name == self.hooks.builder)
        )
    }

    /// Receivers mutated by assigning to (or deleting) `target`.
    fn assigned(&mut self, target: &Expr, line: u32, overwritten: &Overwrites) -> Result<()> {
        match &target.kind {
            ExprKind::Subscript { value, .. } | ExprKind::Attribute { value, .. } => {
                self.mutated(value, line, overwritten)
            }
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                for item in items {
                    self.assigned(item, line, overwritten)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn mutated(&mut self, receiver: &Expr, line: u32, overwritten: &Overwrites) -> Result<()> {
        let Some(root) = MutationCollector::root_of(receiver) else {
            return Ok(());
        };
        match resolve(&self.scopes, root) {
            // Closure variables are not copied.
            Resolution::Local | Resolution::Free => Ok(()),
            Resolution::GlobalInFunction => Err(RewriteError::Unsupported {
                message: format!(
                    "'{root}' is a worksheet variable and can't be modified inside a function"
                ),
                line,
            }),
            Resolution::Global if overwritten.contains(root) => Ok(()),
            Resolution::Global => self.mutations.add(receiver),
        }
    }
}

fn intersection(a: &Overwrites, b: &Overwrites) -> Overwrites {
    a.intersection(b).cloned().collect()
}

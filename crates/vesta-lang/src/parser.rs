//! Recursive descent parser.
//!
//! Grammar follows the classic Python 2 layout: statements are separated by
//! `Newline` tokens, blocks are delimited by `Indent`/`Dedent`, and
//! expressions are parsed by precedence climbing from `test` down to `atom`.

use std::sync::Arc;

use crate::ast::*;
use crate::error::{ParseResult, SyntaxError};
use crate::lexer::{Tok, Token, tokenize};
use crate::stack::ensure_sufficient_stack;

/// Deepest nesting of expressions and blocks the parser accepts.
pub const MAX_NESTING: usize = 500;

/// Parse a complete source unit.
pub fn parse(source: &str) -> ParseResult<Module> {
    let tokens = tokenize(source)?;
    Parser::new(tokens).file()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    /// Parse one nesting level deeper.
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        if self.depth >= MAX_NESTING {
            return self.error("too many nested expressions or blocks");
        }
        self.depth += 1;
        let result = ensure_sufficient_stack(|| parse(self));
        self.depth -= 1;
        result
    }

    // =========================================================================
    // Token helpers
    // =========================================================================

    fn token(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    fn peek(&self) -> &Tok {
        &self.token().tok
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + offset).min(last)].tok
    }

    fn advance(&mut self) -> Token {
        let token = self.token().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn at(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.at(tok) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok) -> ParseResult<Token> {
        if self.at(tok) {
            Ok(self.advance())
        } else {
            self.error(format!(
                "invalid syntax: expected {}, found {}",
                tok.describe(),
                self.peek().describe()
            ))
        }
    }

    fn expect_name(&mut self) -> ParseResult<String> {
        match self.peek().clone() {
            Tok::Name(name) => {
                self.advance();
                Ok(name)
            }
            other => self.error(format!(
                "invalid syntax: expected a name, found {}",
                other.describe()
            )),
        }
    }

    fn error<T>(&self, message: impl Into<String>) -> ParseResult<T> {
        let token = self.token();
        Err(SyntaxError::new(message, token.line, token.column))
    }

    fn error_at<T>(&self, expr: &Expr, message: impl Into<String>) -> ParseResult<T> {
        Err(SyntaxError::new(message, expr.line, expr.column))
    }

    /// Whether the current token can begin an expression.
    fn starts_expr(&self) -> bool {
        matches!(
            self.peek(),
            Tok::Name(_)
                | Tok::Int(_)
                | Tok::Float(_)
                | Tok::Str(_)
                | Tok::NoneKw
                | Tok::TrueKw
                | Tok::FalseKw
                | Tok::LParen
                | Tok::LBracket
                | Tok::LBrace
                | Tok::Minus
                | Tok::Plus
                | Tok::Tilde
                | Tok::Not
                | Tok::Lambda
        )
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn file(&mut self) -> ParseResult<Module> {
        let mut body = Vec::new();
        loop {
            match self.peek() {
                Tok::Eof => break,
                Tok::Newline => {
                    self.advance();
                }
                Tok::Indent => return self.error("unexpected indent"),
                _ => body.extend(self.statement()?),
            }
        }
        Ok(Module { body })
    }

    fn statement(&mut self) -> ParseResult<Vec<Stmt>> {
        match self.peek() {
            Tok::If => Ok(vec![self.if_statement()?]),
            Tok::While => Ok(vec![self.while_statement()?]),
            Tok::For => Ok(vec![self.for_statement()?]),
            Tok::Try => Ok(vec![self.try_statement()?]),
            Tok::With => Ok(vec![self.with_statement()?]),
            Tok::Def => Ok(vec![self.function_def(Vec::new())?]),
            Tok::Class => Ok(vec![self.class_def(Vec::new())?]),
            Tok::At => Ok(vec![self.decorated()?]),
            _ => self.simple_statements(),
        }
    }

    fn simple_statements(&mut self) -> ParseResult<Vec<Stmt>> {
        let mut stmts = vec![self.small_statement()?];
        while self.eat(&Tok::Semi) {
            if self.at(&Tok::Newline) || self.at(&Tok::Eof) {
                break;
            }
            stmts.push(self.small_statement()?);
        }
        if !self.eat(&Tok::Newline) && !self.at(&Tok::Eof) {
            return self.error("invalid syntax");
        }
        Ok(stmts)
    }

    fn small_statement(&mut self) -> ParseResult<Stmt> {
        let line = self.token().line;
        let kind = match self.peek() {
            Tok::Pass => {
                self.advance();
                StmtKind::Pass
            }
            Tok::Break => {
                self.advance();
                StmtKind::Break
            }
            Tok::Continue => {
                self.advance();
                StmtKind::Continue
            }
            Tok::Return => {
                self.advance();
                let value = if self.starts_expr() {
                    Some(self.testlist()?)
                } else {
                    None
                };
                StmtKind::Return(value)
            }
            Tok::Raise => self.raise_statement()?,
            Tok::Print => self.print_statement()?,
            Tok::Del => {
                self.advance();
                let targets = self.exprlist_items()?;
                for target in &targets {
                    self.validate_target(target, "delete")?;
                }
                StmtKind::Del(targets)
            }
            Tok::Import => self.import_statement()?,
            Tok::From => self.from_import_statement()?,
            Tok::Global => {
                self.advance();
                let mut names = vec![self.expect_name()?];
                while self.eat(&Tok::Comma) {
                    names.push(self.expect_name()?);
                }
                StmtKind::Global(names)
            }
            Tok::Assert => {
                self.advance();
                let test = self.test()?;
                let msg = if self.eat(&Tok::Comma) {
                    Some(self.test()?)
                } else {
                    None
                };
                StmtKind::Assert { test, msg }
            }
            _ => return self.expr_statement(),
        };
        Ok(Stmt::new(kind, line))
    }

    fn expr_statement(&mut self) -> ParseResult<Stmt> {
        let line = self.token().line;
        let first = self.testlist()?;

        if let Some(op) = augmented_op(self.peek()) {
            self.advance();
            if matches!(first.kind, ExprKind::Tuple(_) | ExprKind::List(_)) {
                return self.error_at(&first, "illegal expression for augmented assignment");
            }
            self.validate_target(&first, "assign to")?;
            let value = self.testlist()?;
            return Ok(Stmt::new(
                StmtKind::AugAssign {
                    target: first,
                    op,
                    value,
                },
                line,
            ));
        }

        if self.at(&Tok::Assign) {
            let mut targets = vec![first];
            let mut value;
            loop {
                self.expect(&Tok::Assign)?;
                value = self.testlist()?;
                if self.at(&Tok::Assign) {
                    targets.push(value);
                } else {
                    break;
                }
            }
            for target in &targets {
                self.validate_target(target, "assign to")?;
            }
            return Ok(Stmt::new(StmtKind::Assign { targets, value }, line));
        }

        Ok(Stmt::new(StmtKind::Expr(first), line))
    }

    fn validate_target(&self, target: &Expr, verb: &str) -> ParseResult<()> {
        let what = match &target.kind {
            ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => {
                return Ok(());
            }
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                for item in items {
                    self.validate_target(item, verb)?;
                }
                return Ok(());
            }
            ExprKind::Call { .. } => "function call",
            ExprKind::Int(_)
            | ExprKind::Float(_)
            | ExprKind::Str(_)
            | ExprKind::Bool(_)
            | ExprKind::None
            | ExprKind::Dict(_) => "literal",
            ExprKind::Lambda(_) => "lambda",
            ExprKind::ListComp { .. } => "list comprehension",
            ExprKind::IfExp { .. } => "conditional expression",
            ExprKind::Compare { .. } => "comparison",
            _ => "operator",
        };
        self.error_at(target, format!("can't {verb} {what}"))
    }

    fn raise_statement(&mut self) -> ParseResult<StmtKind> {
        self.advance();
        if !self.starts_expr() {
            return Ok(StmtKind::Raise(None));
        }
        let exc = self.test()?;
        if self.eat(&Tok::Comma) {
            // `raise E, arg` is sugar for `raise E(arg)`.
            let arg = self.test()?;
            return Ok(StmtKind::Raise(Some(Expr::call(exc, vec![arg]))));
        }
        Ok(StmtKind::Raise(Some(exc)))
    }

    fn print_statement(&mut self) -> ParseResult<StmtKind> {
        self.advance();
        let mut dest = None;
        let mut values = Vec::new();
        let mut newline = true;

        if self.eat(&Tok::RShift) {
            dest = Some(self.test()?);
            if !self.eat(&Tok::Comma) {
                return Ok(StmtKind::Print {
                    dest,
                    values,
                    newline,
                });
            }
        }

        while self.starts_expr() {
            values.push(self.test()?);
            newline = true;
            if self.eat(&Tok::Comma) {
                newline = false;
            } else {
                break;
            }
        }

        Ok(StmtKind::Print {
            dest,
            values,
            newline,
        })
    }

    fn dotted_name(&mut self) -> ParseResult<String> {
        let mut name = self.expect_name()?;
        while self.eat(&Tok::Dot) {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn import_statement(&mut self) -> ParseResult<StmtKind> {
        self.advance();
        let mut names = Vec::new();
        loop {
            let name = self.dotted_name()?;
            let asname = if self.eat(&Tok::As) {
                Some(self.expect_name()?)
            } else {
                None
            };
            names.push(Alias { name, asname });
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        Ok(StmtKind::Import(names))
    }

    fn from_import_statement(&mut self) -> ParseResult<StmtKind> {
        self.advance();
        let mut level = 0;
        while self.eat(&Tok::Dot) {
            level += 1;
        }
        let module = if matches!(self.peek(), Tok::Name(_)) {
            self.dotted_name()?
        } else if level > 0 {
            String::new()
        } else {
            return self.error("invalid syntax: expected a module name");
        };
        self.expect(&Tok::Import)?;

        if self.eat(&Tok::Star) {
            return Ok(StmtKind::ImportFrom {
                module,
                names: vec![Alias {
                    name: "*".to_string(),
                    asname: None,
                }],
                level,
            });
        }

        let parenthesized = self.eat(&Tok::LParen);
        let mut names = Vec::new();
        loop {
            let name = self.expect_name()?;
            let asname = if self.eat(&Tok::As) {
                Some(self.expect_name()?)
            } else {
                None
            };
            names.push(Alias { name, asname });
            if !self.eat(&Tok::Comma) {
                break;
            }
            if parenthesized && self.at(&Tok::RParen) {
                break;
            }
        }
        if parenthesized {
            self.expect(&Tok::RParen)?;
        }
        Ok(StmtKind::ImportFrom {
            module,
            names,
            level,
        })
    }

    /// Parse `: suite`.
    fn block(&mut self) -> ParseResult<Body> {
        self.expect(&Tok::Colon)?;
        if !self.eat(&Tok::Newline) {
            return self.simple_statements();
        }
        if !self.eat(&Tok::Indent) {
            return self.error("expected an indented block");
        }
        let mut body = Vec::new();
        while !self.eat(&Tok::Dedent) {
            if self.at(&Tok::Eof) {
                break;
            }
            if self.eat(&Tok::Newline) {
                continue;
            }
            body.extend(self.nested(Self::statement)?);
        }
        Ok(body)
    }

    fn if_statement(&mut self) -> ParseResult<Stmt> {
        let line = self.advance().line;
        let test = self.test()?;
        let body = self.block()?;
        let orelse = if self.at(&Tok::Elif) {
            vec![self.if_statement()?]
        } else if self.eat(&Tok::Else) {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(Stmt::new(StmtKind::If { test, body, orelse }, line))
    }

    fn while_statement(&mut self) -> ParseResult<Stmt> {
        let line = self.advance().line;
        let test = self.test()?;
        let body = self.block()?;
        let orelse = if self.eat(&Tok::Else) {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(Stmt::new(StmtKind::While { test, body, orelse }, line))
    }

    fn for_statement(&mut self) -> ParseResult<Stmt> {
        let line = self.advance().line;
        let target = self.exprlist()?;
        self.validate_target(&target, "assign to")?;
        self.expect(&Tok::In)?;
        let iter = self.testlist()?;
        let body = self.block()?;
        let orelse = if self.eat(&Tok::Else) {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(Stmt::new(
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            },
            line,
        ))
    }

    fn try_statement(&mut self) -> ParseResult<Stmt> {
        let line = self.advance().line;
        let body = self.block()?;
        let mut handlers = Vec::new();
        while self.at(&Tok::Except) {
            let handler_line = self.advance().line;
            let mut kind = None;
            let mut name = None;
            if !self.at(&Tok::Colon) {
                kind = Some(self.test()?);
                if self.eat(&Tok::As) || self.eat(&Tok::Comma) {
                    name = Some(self.expect_name()?);
                }
            }
            let handler_body = self.block()?;
            handlers.push(ExceptHandler {
                kind,
                name,
                body: handler_body,
                line: handler_line,
            });
        }
        let orelse = if !handlers.is_empty() && self.eat(&Tok::Else) {
            self.block()?
        } else {
            Vec::new()
        };
        let finalbody = if self.eat(&Tok::Finally) {
            self.block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finalbody.is_empty() {
            return self.error("invalid syntax: expected 'except' or 'finally' block");
        }
        Ok(Stmt::new(
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            },
            line,
        ))
    }

    fn with_statement(&mut self) -> ParseResult<Stmt> {
        let line = self.advance().line;
        let mut items = Vec::new();
        loop {
            let context = self.test()?;
            let target = if self.eat(&Tok::As) {
                let target = self.bitor_expr()?;
                self.validate_target(&target, "assign to")?;
                Some(target)
            } else {
                None
            };
            items.push((context, target));
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        // `with a, b:` nests the second item inside the first.
        let mut body = self.block()?;
        while let Some((context, target)) = items.pop() {
            let stmt = Stmt::new(
                StmtKind::With {
                    context,
                    target,
                    body,
                },
                line,
            );
            body = vec![stmt];
        }
        Ok(body.remove(0))
    }

    fn decorated(&mut self) -> ParseResult<Stmt> {
        let mut decorators = Vec::new();
        while self.eat(&Tok::At) {
            decorators.push(self.test()?);
            self.expect(&Tok::Newline)?;
        }
        match self.peek() {
            Tok::Def => self.function_def(decorators),
            Tok::Class => self.class_def(decorators),
            _ => self.error("invalid syntax: decorator must precede 'def' or 'class'"),
        }
    }

    fn function_def(&mut self, decorators: Vec<Expr>) -> ParseResult<Stmt> {
        let line = self.advance().line;
        let name = self.expect_name()?;
        self.expect(&Tok::LParen)?;
        let params = self.params(&Tok::RParen)?;
        self.expect(&Tok::RParen)?;
        let body = self.block()?;
        Ok(Stmt::new(
            StmtKind::FunctionDef(Arc::new(FunctionDef {
                name,
                params,
                body,
                decorators,
                line,
            })),
            line,
        ))
    }

    fn params(&mut self, close: &Tok) -> ParseResult<Params> {
        let mut params = Params::default();
        let mut seen_default = false;
        while !self.at(close) {
            if self.eat(&Tok::Star) {
                params.vararg = Some(self.expect_name()?);
            } else if self.eat(&Tok::DoubleStar) {
                params.kwarg = Some(self.expect_name()?);
            } else {
                if params.vararg.is_some() || params.kwarg.is_some() {
                    return self.error("invalid syntax");
                }
                let name = self.expect_name()?;
                if params.names().any(|existing| existing == name) {
                    return self.error(format!(
                        "duplicate argument '{name}' in function definition"
                    ));
                }
                let default = if self.eat(&Tok::Assign) {
                    seen_default = true;
                    Some(self.test()?)
                } else if seen_default {
                    return self.error("non-default argument follows default argument");
                } else {
                    None
                };
                params.args.push(Param { name, default });
            }
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        Ok(params)
    }

    fn class_def(&mut self, decorators: Vec<Expr>) -> ParseResult<Stmt> {
        let line = self.advance().line;
        let name = self.expect_name()?;
        let mut bases = Vec::new();
        if self.eat(&Tok::LParen) {
            while !self.at(&Tok::RParen) {
                bases.push(self.test()?);
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
            self.expect(&Tok::RParen)?;
        }
        let body = self.block()?;
        Ok(Stmt::new(
            StmtKind::ClassDef(ClassDef {
                name,
                bases,
                body,
                decorators,
            }),
            line,
        ))
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    /// `test (',' test)* [',']`, producing a tuple when a comma is present.
    fn testlist(&mut self) -> ParseResult<Expr> {
        let first = self.test()?;
        if !self.at(&Tok::Comma) {
            return Ok(first);
        }
        let (line, column) = (first.line, first.column);
        let mut items = vec![first];
        while self.eat(&Tok::Comma) {
            if !self.starts_expr() {
                break;
            }
            items.push(self.test()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), line, column))
    }

    /// Assignment targets of `for` and comprehensions, which must not
    /// swallow the `in` keyword.
    fn exprlist(&mut self) -> ParseResult<Expr> {
        let mut items = self.exprlist_items()?;
        if items.len() == 1 && !matches!(self.tokens[self.pos - 1].tok, Tok::Comma) {
            return Ok(items.remove(0));
        }
        let (line, column) = (items[0].line, items[0].column);
        Ok(Expr::new(ExprKind::Tuple(items), line, column))
    }

    fn exprlist_items(&mut self) -> ParseResult<Vec<Expr>> {
        let mut items = vec![self.bitor_expr()?];
        while self.eat(&Tok::Comma) {
            if !self.starts_expr() {
                break;
            }
            items.push(self.bitor_expr()?);
        }
        Ok(items)
    }

    fn test(&mut self) -> ParseResult<Expr> {
        self.nested(Self::conditional)
    }

    fn conditional(&mut self) -> ParseResult<Expr> {
        if self.at(&Tok::Lambda) {
            return self.lambda();
        }
        let body = self.or_test()?;
        if self.at(&Tok::If) {
            self.advance();
            let test = self.or_test()?;
            self.expect(&Tok::Else)?;
            let orelse = self.test()?;
            let (line, column) = (body.line, body.column);
            return Ok(Expr::new(
                ExprKind::IfExp {
                    test: Box::new(test),
                    body: Box::new(body),
                    orelse: Box::new(orelse),
                },
                line,
                column,
            ));
        }
        Ok(body)
    }

    fn lambda(&mut self) -> ParseResult<Expr> {
        let token = self.advance();
        let params = self.params(&Tok::Colon)?;
        self.expect(&Tok::Colon)?;
        let body = self.test()?;
        let line = body.line;
        Ok(Expr::new(
            ExprKind::Lambda(Arc::new(FunctionDef {
                name: "<lambda>".to_string(),
                params,
                body: vec![Stmt::new(StmtKind::Return(Some(body)), line)],
                decorators: Vec::new(),
                line: token.line,
            })),
            token.line,
            token.column,
        ))
    }

    fn or_test(&mut self) -> ParseResult<Expr> {
        let first = self.and_test()?;
        if !self.at(&Tok::Or) {
            return Ok(first);
        }
        let (line, column) = (first.line, first.column);
        let mut values = vec![first];
        while self.eat(&Tok::Or) {
            values.push(self.and_test()?);
        }
        Ok(Expr::new(
            ExprKind::BoolOp {
                op: BoolOp::Or,
                values,
            },
            line,
            column,
        ))
    }

    fn and_test(&mut self) -> ParseResult<Expr> {
        let first = self.not_test()?;
        if !self.at(&Tok::And) {
            return Ok(first);
        }
        let (line, column) = (first.line, first.column);
        let mut values = vec![first];
        while self.eat(&Tok::And) {
            values.push(self.not_test()?);
        }
        Ok(Expr::new(
            ExprKind::BoolOp {
                op: BoolOp::And,
                values,
            },
            line,
            column,
        ))
    }

    fn not_test(&mut self) -> ParseResult<Expr> {
        if self.at(&Tok::Not) {
            let token = self.advance();
            let operand = self.nested(Self::not_test)?;
            return Ok(Expr::new(
                ExprKind::UnaryOp {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                token.line,
                token.column,
            ));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> ParseResult<Expr> {
        let left = self.bitor_expr()?;
        let mut ops = Vec::new();
        loop {
            let op = match self.peek() {
                Tok::Lt => CmpOp::Lt,
                Tok::Gt => CmpOp::Gt,
                Tok::Le => CmpOp::LtE,
                Tok::Ge => CmpOp::GtE,
                Tok::EqEq => CmpOp::Eq,
                Tok::NotEq => CmpOp::NotEq,
                Tok::In => CmpOp::In,
                Tok::Not if self.peek_at(1) == &Tok::In => {
                    self.advance();
                    CmpOp::NotIn
                }
                Tok::Is => {
                    if self.peek_at(1) == &Tok::Not {
                        self.advance();
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                _ => break,
            };
            self.advance();
            ops.push((op, self.bitor_expr()?));
        }
        if ops.is_empty() {
            return Ok(left);
        }
        let (line, column) = (left.line, left.column);
        Ok(Expr::new(
            ExprKind::Compare {
                left: Box::new(left),
                ops,
            },
            line,
            column,
        ))
    }

    fn binary_level(
        &mut self,
        operand: fn(&mut Self) -> ParseResult<Expr>,
        table: &[(Tok, BinOp)],
    ) -> ParseResult<Expr> {
        let mut left = operand(self)?;
        'outer: loop {
            for (tok, op) in table {
                if self.at(tok) {
                    self.advance();
                    let right = operand(self)?;
                    let (line, column) = (left.line, left.column);
                    left = Expr::new(
                        ExprKind::BinOp {
                            left: Box::new(left),
                            op: *op,
                            right: Box::new(right),
                        },
                        line,
                        column,
                    );
                    continue 'outer;
                }
            }
            break;
        }
        Ok(left)
    }

    fn bitor_expr(&mut self) -> ParseResult<Expr> {
        self.binary_level(Self::xor_expr, &[(Tok::Pipe, BinOp::BitOr)])
    }

    fn xor_expr(&mut self) -> ParseResult<Expr> {
        self.binary_level(Self::and_expr, &[(Tok::Caret, BinOp::BitXor)])
    }

    fn and_expr(&mut self) -> ParseResult<Expr> {
        self.binary_level(Self::shift_expr, &[(Tok::Amp, BinOp::BitAnd)])
    }

    fn shift_expr(&mut self) -> ParseResult<Expr> {
        self.binary_level(
            Self::arith_expr,
            &[(Tok::LShift, BinOp::LShift), (Tok::RShift, BinOp::RShift)],
        )
    }

    fn arith_expr(&mut self) -> ParseResult<Expr> {
        self.binary_level(Self::term, &[(Tok::Plus, BinOp::Add), (Tok::Minus, BinOp::Sub)])
    }

    fn term(&mut self) -> ParseResult<Expr> {
        self.binary_level(
            Self::factor,
            &[
                (Tok::Star, BinOp::Mul),
                (Tok::Slash, BinOp::Div),
                (Tok::DoubleSlash, BinOp::FloorDiv),
                (Tok::Percent, BinOp::Mod),
            ],
        )
    }

    fn factor(&mut self) -> ParseResult<Expr> {
        let op = match self.peek() {
            Tok::Minus => UnaryOp::Neg,
            Tok::Plus => UnaryOp::Pos,
            Tok::Tilde => UnaryOp::Invert,
            _ => return self.power(),
        };
        let token = self.advance();
        let operand = self.nested(Self::factor)?;
        // Fold negative literals so `-9223372036854775808` style values and
        // `-1` reprs stay simple.
        if op == UnaryOp::Neg {
            match operand.kind {
                ExprKind::Int(n) => {
                    return Ok(Expr::new(ExprKind::Int(-n), token.line, token.column));
                }
                ExprKind::Float(f) => {
                    return Ok(Expr::new(ExprKind::Float(-f), token.line, token.column));
                }
                _ => {}
            }
        }
        Ok(Expr::new(
            ExprKind::UnaryOp {
                op,
                operand: Box::new(operand),
            },
            token.line,
            token.column,
        ))
    }

    fn power(&mut self) -> ParseResult<Expr> {
        let base = self.atom_expr()?;
        if self.eat(&Tok::DoubleStar) {
            let exponent = self.nested(Self::factor)?;
            let (line, column) = (base.line, base.column);
            return Ok(Expr::new(
                ExprKind::BinOp {
                    left: Box::new(base),
                    op: BinOp::Pow,
                    right: Box::new(exponent),
                },
                line,
                column,
            ));
        }
        Ok(base)
    }

    fn atom_expr(&mut self) -> ParseResult<Expr> {
        let mut expr = self.atom()?;
        loop {
            let (line, column) = (expr.line, expr.column);
            match self.peek() {
                Tok::LParen => {
                    self.advance();
                    let args = self.call_args()?;
                    self.expect(&Tok::RParen)?;
                    expr = Expr::new(
                        ExprKind::Call {
                            func: Box::new(expr),
                            args,
                        },
                        line,
                        column,
                    );
                }
                Tok::LBracket => {
                    self.advance();
                    let index = self.subscript_list()?;
                    self.expect(&Tok::RBracket)?;
                    expr = Expr::new(
                        ExprKind::Subscript {
                            value: Box::new(expr),
                            index: Box::new(index),
                        },
                        line,
                        column,
                    );
                }
                Tok::Dot => {
                    self.advance();
                    let attr = self.expect_name()?;
                    expr = Expr::new(
                        ExprKind::Attribute {
                            value: Box::new(expr),
                            attr,
                        },
                        line,
                        column,
                    );
                }
                _ => return Ok(expr),
            }
        }
    }

    fn call_args(&mut self) -> ParseResult<Vec<Arg>> {
        let mut args = Vec::new();
        while !self.at(&Tok::RParen) {
            if self.eat(&Tok::Star) {
                args.push(Arg::Star(self.test()?));
            } else if self.eat(&Tok::DoubleStar) {
                args.push(Arg::DoubleStar(self.test()?));
            } else if matches!(self.peek(), Tok::Name(_)) && self.peek_at(1) == &Tok::Assign {
                let name = self.expect_name()?;
                self.advance();
                args.push(Arg::Keyword(name, self.test()?));
            } else {
                let value = self.test()?;
                if self.at(&Tok::For) {
                    // A bare generator expression argument.
                    let comp = self.comprehension(value)?;
                    args.push(Arg::Positional(comp));
                } else {
                    if args
                        .iter()
                        .any(|a| matches!(a, Arg::Keyword(..) | Arg::DoubleStar(_)))
                    {
                        return self.error_at(&value, "non-keyword arg after keyword arg");
                    }
                    args.push(Arg::Positional(value));
                }
            }
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        Ok(args)
    }

    fn subscript_list(&mut self) -> ParseResult<Expr> {
        let first = self.subscript()?;
        if !self.at(&Tok::Comma) {
            return Ok(first);
        }
        let (line, column) = (first.line, first.column);
        let mut items = vec![first];
        while self.eat(&Tok::Comma) {
            if self.at(&Tok::RBracket) {
                break;
            }
            items.push(self.subscript()?);
        }
        Ok(Expr::new(ExprKind::Tuple(items), line, column))
    }

    fn subscript(&mut self) -> ParseResult<Expr> {
        let token = self.token().clone();
        let lower = if self.at(&Tok::Colon) {
            None
        } else {
            let value = self.test()?;
            if !self.at(&Tok::Colon) {
                return Ok(value);
            }
            Some(Box::new(value))
        };
        self.expect(&Tok::Colon)?;
        let upper = if self.starts_expr() {
            Some(Box::new(self.test()?))
        } else {
            None
        };
        let step = if self.eat(&Tok::Colon) && self.starts_expr() {
            Some(Box::new(self.test()?))
        } else {
            None
        };
        Ok(Expr::new(
            ExprKind::Slice { lower, upper, step },
            token.line,
            token.column,
        ))
    }

    fn comprehension(&mut self, elt: Expr) -> ParseResult<Expr> {
        let (line, column) = (elt.line, elt.column);
        let mut generators = Vec::new();
        while self.eat(&Tok::For) {
            let target = self.exprlist()?;
            self.validate_target(&target, "assign to")?;
            self.expect(&Tok::In)?;
            let iter = self.or_test()?;
            let mut ifs = Vec::new();
            while self.eat(&Tok::If) {
                ifs.push(self.or_test()?);
            }
            generators.push(Comprehension { target, iter, ifs });
        }
        Ok(Expr::new(
            ExprKind::ListComp {
                elt: Box::new(elt),
                generators,
            },
            line,
            column,
        ))
    }

    fn atom(&mut self) -> ParseResult<Expr> {
        let token = self.advance();
        let (line, column) = (token.line, token.column);
        let kind = match token.tok {
            Tok::Name(name) => ExprKind::Name(name),
            Tok::Int(n) => ExprKind::Int(n),
            Tok::Float(f) => ExprKind::Float(f),
            Tok::Str(mut s) => {
                while let Tok::Str(next) = self.peek() {
                    s.push_str(next);
                    self.advance();
                }
                ExprKind::Str(s)
            }
            Tok::NoneKw => ExprKind::None,
            Tok::TrueKw => ExprKind::Bool(true),
            Tok::FalseKw => ExprKind::Bool(false),
            Tok::LParen => {
                if self.eat(&Tok::RParen) {
                    ExprKind::Tuple(Vec::new())
                } else {
                    let first = self.test()?;
                    let expr = if self.at(&Tok::For) {
                        self.comprehension(first)?
                    } else if self.at(&Tok::Comma) {
                        let mut items = vec![first];
                        while self.eat(&Tok::Comma) {
                            if self.at(&Tok::RParen) {
                                break;
                            }
                            items.push(self.test()?);
                        }
                        Expr::new(ExprKind::Tuple(items), line, column)
                    } else {
                        first
                    };
                    self.expect(&Tok::RParen)?;
                    return Ok(expr);
                }
            }
            Tok::LBracket => {
                if self.eat(&Tok::RBracket) {
                    ExprKind::List(Vec::new())
                } else {
                    let first = self.test()?;
                    if self.at(&Tok::For) {
                        let comp = self.comprehension(first)?;
                        self.expect(&Tok::RBracket)?;
                        return Ok(Expr::new(comp.kind, line, column));
                    }
                    let mut items = vec![first];
                    while self.eat(&Tok::Comma) {
                        if self.at(&Tok::RBracket) {
                            break;
                        }
                        items.push(self.test()?);
                    }
                    self.expect(&Tok::RBracket)?;
                    ExprKind::List(items)
                }
            }
            Tok::LBrace => {
                let mut entries = Vec::new();
                while !self.at(&Tok::RBrace) {
                    let key = self.test()?;
                    self.expect(&Tok::Colon)?;
                    let value = self.test()?;
                    entries.push((key, value));
                    if !self.eat(&Tok::Comma) {
                        break;
                    }
                }
                self.expect(&Tok::RBrace)?;
                ExprKind::Dict(entries)
            }
            Tok::Indent => {
                return Err(SyntaxError::new("unexpected indent", line, column));
            }
            Tok::Newline | Tok::Eof => {
                return Err(SyntaxError::new(
                    "unexpected EOF while parsing",
                    line,
                    column,
                ));
            }
            _ => return Err(SyntaxError::new("invalid syntax", line, column)),
        };
        Ok(Expr::new(kind, line, column))
    }
}

fn augmented_op(tok: &Tok) -> Option<BinOp> {
    let op = match tok {
        Tok::PlusEq => BinOp::Add,
        Tok::MinusEq => BinOp::Sub,
        Tok::StarEq => BinOp::Mul,
        Tok::SlashEq => BinOp::Div,
        Tok::DoubleSlashEq => BinOp::FloorDiv,
        Tok::PercentEq => BinOp::Mod,
        Tok::DoubleStarEq => BinOp::Pow,
        Tok::AmpEq => BinOp::BitAnd,
        Tok::PipeEq => BinOp::BitOr,
        Tok::CaretEq => BinOp::BitXor,
        Tok::LShiftEq => BinOp::LShift,
        Tok::RShiftEq => BinOp::RShift,
        _ => return None,
    };
    Some(op)
}

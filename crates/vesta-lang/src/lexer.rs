//! Tokenizer.
//!
//! Raw tokens come from `logos`; a second pass turns line structure into
//! `Newline`, `Indent` and `Dedent` tokens the way the parser expects:
//!
//! - newlines inside `()`, `[]` and `{}` are ignored
//! - a backslash at the end of a line joins it with the next
//! - blank and comment-only lines produce nothing
//! - at end of input all open indentation levels are closed

use logos::Logos;

use crate::error::{ParseResult, SyntaxError};

/// Raw token from logos (before indentation processing).
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\x0C\r]+")]
enum RawToken {
    #[regex(r"#[^\n]*")]
    Comment,

    #[token("\n")]
    Newline,

    #[regex(r"\\\r?\n")]
    LineContinuation,

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Name,

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r"0[xX][0-9a-fA-F]+", |lex| i64::from_str_radix(&lex.slice()[2..], 16).ok())]
    HexInt(i64),

    #[regex(r"[0-9]+\.[0-9]*([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Float(f64),

    #[regex(r#"[uUbBrR]?'([^'\\\n]|\\(.|\n))*'"#)]
    #[regex(r#"[uUbBrR]?"([^"\\\n]|\\(.|\n))*""#)]
    Str,

    #[regex(r"[uUbBrR]?'''", |lex| scan_triple_quoted(lex, b"'''"))]
    #[regex(r#"[uUbBrR]?""""#, |lex| scan_triple_quoted(lex, b"\"\"\""))]
    TripleStr,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(":")]
    Colon,
    #[token(",")]
    Comma,
    #[token(";")]
    Semi,
    #[token(".")]
    Dot,
    #[token("@")]
    At,
    #[token("=")]
    Assign,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("**")]
    DoubleStar,
    #[token("/")]
    Slash,
    #[token("//")]
    DoubleSlash,
    #[token("%")]
    Percent,
    #[token("~")]
    Tilde,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("<<")]
    LShift,
    #[token(">>")]
    RShift,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("==")]
    EqEq,
    #[token("!=")]
    #[token("<>")]
    NotEq,
    #[token("+=")]
    PlusEq,
    #[token("-=")]
    MinusEq,
    #[token("*=")]
    StarEq,
    #[token("/=")]
    SlashEq,
    #[token("//=")]
    DoubleSlashEq,
    #[token("%=")]
    PercentEq,
    #[token("**=")]
    DoubleStarEq,
    #[token("&=")]
    AmpEq,
    #[token("|=")]
    PipeEq,
    #[token("^=")]
    CaretEq,
    #[token("<<=")]
    LShiftEq,
    #[token(">>=")]
    RShiftEq,
}

/// Consume the body of a triple-quoted string up to and including the
/// closing quotes.
fn scan_triple_quoted(lex: &mut logos::Lexer<RawToken>, quote: &[u8]) -> bool {
    let rest = lex.remainder().as_bytes();
    let mut i = 0;
    while i < rest.len() {
        if rest[i] == b'\\' {
            i += 2;
            continue;
        }
        if rest[i..].starts_with(quote) {
            lex.bump(i + quote.len());
            return true;
        }
        i += 1;
    }
    false
}

/// Token kinds seen by the parser.
#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),

    // Keywords
    And,
    As,
    Assert,
    Break,
    Class,
    Continue,
    Def,
    Del,
    Elif,
    Else,
    Except,
    Finally,
    For,
    From,
    Global,
    If,
    Import,
    In,
    Is,
    Lambda,
    Not,
    Or,
    Pass,
    Print,
    Raise,
    Return,
    Try,
    While,
    With,
    NoneKw,
    TrueKw,
    FalseKw,

    // Punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Colon,
    Comma,
    Semi,
    Dot,
    At,
    Assign,
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    Tilde,
    Amp,
    Pipe,
    Caret,
    LShift,
    RShift,
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
    NotEq,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    DoubleSlashEq,
    PercentEq,
    DoubleStarEq,
    AmpEq,
    PipeEq,
    CaretEq,
    LShiftEq,
    RShiftEq,

    // Layout
    Newline,
    Indent,
    Dedent,
    Eof,
}

impl Tok {
    fn keyword(name: &str) -> Option<Tok> {
        let tok = match name {
            "and" => Tok::And,
            "as" => Tok::As,
            "assert" => Tok::Assert,
            "break" => Tok::Break,
            "class" => Tok::Class,
            "continue" => Tok::Continue,
            "def" => Tok::Def,
            "del" => Tok::Del,
            "elif" => Tok::Elif,
            "else" => Tok::Else,
            "except" => Tok::Except,
            "finally" => Tok::Finally,
            "for" => Tok::For,
            "from" => Tok::From,
            "global" => Tok::Global,
            "if" => Tok::If,
            "import" => Tok::Import,
            "in" => Tok::In,
            "is" => Tok::Is,
            "lambda" => Tok::Lambda,
            "not" => Tok::Not,
            "or" => Tok::Or,
            "pass" => Tok::Pass,
            "print" => Tok::Print,
            "raise" => Tok::Raise,
            "return" => Tok::Return,
            "try" => Tok::Try,
            "while" => Tok::While,
            "with" => Tok::With,
            "None" => Tok::NoneKw,
            "True" => Tok::TrueKw,
            "False" => Tok::FalseKw,
            _ => return None,
        };
        Some(tok)
    }

    /// Short description used in "expected X" messages.
    pub fn describe(&self) -> String {
        match self {
            Tok::Name(name) => format!("name '{name}'"),
            Tok::Int(_) | Tok::Float(_) => "number".to_string(),
            Tok::Str(_) => "string".to_string(),
            Tok::Newline => "end of line".to_string(),
            Tok::Indent => "indent".to_string(),
            Tok::Dedent => "dedent".to_string(),
            Tok::Eof => "end of input".to_string(),
            other => format!("{other:?}"),
        }
    }
}

/// A token with its 1-based source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: u32,
    pub column: u32,
}

/// Tokenize `source` into parser tokens, ending with `Tok::Eof`.
pub fn tokenize(source: &str) -> ParseResult<Vec<Token>> {
    let line_starts = line_starts(source);
    let position = |offset: usize| -> (u32, u32) {
        let line = line_starts.partition_point(|&start| start <= offset) - 1;
        let column = source[line_starts[line]..offset].chars().count() + 1;
        (line as u32 + 1, column as u32)
    };

    let mut tokens: Vec<Token> = Vec::new();
    let mut indents: Vec<usize> = vec![0];
    let mut depth = 0usize;
    let mut at_line_start = true;
    let mut lexer = RawToken::lexer(source);

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        let (line, column) = position(span.start);
        let raw = match result {
            Ok(raw) => raw,
            Err(()) => {
                let slice = lexer.slice();
                let message = if slice.starts_with(['\'', '"']) || slice.ends_with(['\'', '"']) {
                    "EOL while scanning string literal".to_string()
                } else {
                    format!("invalid token '{slice}'")
                };
                return Err(SyntaxError::new(message, line, column));
            }
        };

        match raw {
            RawToken::Comment | RawToken::LineContinuation => continue,
            RawToken::Newline => {
                if depth == 0 && !at_line_start {
                    tokens.push(Token {
                        tok: Tok::Newline,
                        line,
                        column,
                    });
                    at_line_start = true;
                }
                continue;
            }
            _ => {}
        }

        if at_line_start && depth == 0 {
            let line_text = &source[line_starts[line as usize - 1]..span.start];
            let width = indentation_width(line_text);
            let current = indents.last().copied().unwrap_or(0);
            if width > current {
                indents.push(width);
                tokens.push(Token {
                    tok: Tok::Indent,
                    line,
                    column,
                });
            } else {
                while width < indents.last().copied().unwrap_or(0) {
                    indents.pop();
                    tokens.push(Token {
                        tok: Tok::Dedent,
                        line,
                        column,
                    });
                }
                if width != indents.last().copied().unwrap_or(0) {
                    return Err(SyntaxError::new(
                        "unindent does not match any outer indentation level",
                        line,
                        column,
                    ));
                }
            }
            at_line_start = false;
        }

        let slice = lexer.slice();
        let tok = match raw {
            RawToken::Name => Tok::keyword(slice).unwrap_or_else(|| Tok::Name(slice.to_string())),
            RawToken::Int(n) | RawToken::HexInt(n) => Tok::Int(n),
            RawToken::Float(f) => Tok::Float(f),
            RawToken::Str => Tok::Str(string_literal(slice, 1)),
            RawToken::TripleStr => Tok::Str(string_literal(slice, 3)),
            RawToken::LParen => {
                depth += 1;
                Tok::LParen
            }
            RawToken::LBracket => {
                depth += 1;
                Tok::LBracket
            }
            RawToken::LBrace => {
                depth += 1;
                Tok::LBrace
            }
            RawToken::RParen => {
                depth = depth.saturating_sub(1);
                Tok::RParen
            }
            RawToken::RBracket => {
                depth = depth.saturating_sub(1);
                Tok::RBracket
            }
            RawToken::RBrace => {
                depth = depth.saturating_sub(1);
                Tok::RBrace
            }
            RawToken::Colon => Tok::Colon,
            RawToken::Comma => Tok::Comma,
            RawToken::Semi => Tok::Semi,
            RawToken::Dot => Tok::Dot,
            RawToken::At => Tok::At,
            RawToken::Assign => Tok::Assign,
            RawToken::Plus => Tok::Plus,
            RawToken::Minus => Tok::Minus,
            RawToken::Star => Tok::Star,
            RawToken::DoubleStar => Tok::DoubleStar,
            RawToken::Slash => Tok::Slash,
            RawToken::DoubleSlash => Tok::DoubleSlash,
            RawToken::Percent => Tok::Percent,
            RawToken::Tilde => Tok::Tilde,
            RawToken::Amp => Tok::Amp,
            RawToken::Pipe => Tok::Pipe,
            RawToken::Caret => Tok::Caret,
            RawToken::LShift => Tok::LShift,
            RawToken::RShift => Tok::RShift,
            RawToken::Lt => Tok::Lt,
            RawToken::Gt => Tok::Gt,
            RawToken::Le => Tok::Le,
            RawToken::Ge => Tok::Ge,
            RawToken::EqEq => Tok::EqEq,
            RawToken::NotEq => Tok::NotEq,
            RawToken::PlusEq => Tok::PlusEq,
            RawToken::MinusEq => Tok::MinusEq,
            RawToken::StarEq => Tok::StarEq,
            RawToken::SlashEq => Tok::SlashEq,
            RawToken::DoubleSlashEq => Tok::DoubleSlashEq,
            RawToken::PercentEq => Tok::PercentEq,
            RawToken::DoubleStarEq => Tok::DoubleStarEq,
            RawToken::AmpEq => Tok::AmpEq,
            RawToken::PipeEq => Tok::PipeEq,
            RawToken::CaretEq => Tok::CaretEq,
            RawToken::LShiftEq => Tok::LShiftEq,
            RawToken::RShiftEq => Tok::RShiftEq,
            RawToken::Comment | RawToken::Newline | RawToken::LineContinuation => continue,
        };
        tokens.push(Token { tok, line, column });
    }

    let (line, column) = position(source.len());
    if !at_line_start {
        tokens.push(Token {
            tok: Tok::Newline,
            line,
            column,
        });
    }
    while indents.len() > 1 {
        indents.pop();
        tokens.push(Token {
            tok: Tok::Dedent,
            line,
            column,
        });
    }
    tokens.push(Token {
        tok: Tok::Eof,
        line,
        column,
    });
    Ok(tokens)
}

fn line_starts(source: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(source.match_indices('\n').map(|(i, _)| i + 1))
        .collect()
}

/// Width of leading whitespace; tabs advance to the next multiple of 8.
fn indentation_width(prefix: &str) -> usize {
    let mut width = 0;
    for c in prefix.chars() {
        match c {
            '\t' => width = (width / 8 + 1) * 8,
            ' ' => width += 1,
            _ => {}
        }
    }
    width
}

/// Decode a quoted literal: strip the prefix and `quote_len` quote
/// characters on each side, then process escapes unless raw.
fn string_literal(slice: &str, quote_len: usize) -> String {
    let prefix_len = slice
        .find(['\'', '"'])
        .unwrap_or(0);
    let raw = slice[..prefix_len].chars().any(|c| c == 'r' || c == 'R');
    let body = &slice[prefix_len + quote_len..slice.len() - quote_len];
    if raw {
        body.to_string()
    } else {
        unescape(body)
    }
}

fn unescape(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('a') => out.push('\x07'),
            Some('b') => out.push('\x08'),
            Some('f') => out.push('\x0C'),
            Some('v') => out.push('\x0B'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('\n') => {}
            Some('x') => {
                let hex: String = (0..2).filter_map(|_| chars.next_if(|c| c.is_ascii_hexdigit())).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) if hex.len() == 2 => out.push(decoded),
                    _ => {
                        out.push_str("\\x");
                        out.push_str(&hex);
                    }
                }
            }
            Some('u') => {
                let hex: String = (0..4).filter_map(|_| chars.next_if(|c| c.is_ascii_hexdigit())).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) if hex.len() == 4 => out.push(decoded),
                    _ => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Tok> {
        tokenize(source).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn test_simple_statement() {
        assert_eq!(
            kinds("a = 1"),
            vec![
                Tok::Name("a".into()),
                Tok::Assign,
                Tok::Int(1),
                Tok::Newline,
                Tok::Eof
            ]
        );
    }

    #[test]
    fn test_indentation() {
        let toks = kinds("if x:\n    y\nz");
        assert_eq!(
            toks,
            vec![
                Tok::If,
                Tok::Name("x".into()),
                Tok::Colon,
                Tok::Newline,
                Tok::Indent,
                Tok::Name("y".into()),
                Tok::Newline,
                Tok::Dedent,
                Tok::Name("z".into()),
                Tok::Newline,
                Tok::Eof
            ]
        );
    }

    #[test]
    fn test_brackets_join_lines() {
        let toks = kinds("f(1,\n  2)\n");
        assert!(!toks[..toks.len() - 2].contains(&Tok::Newline));
        assert!(!toks.contains(&Tok::Indent));
    }

    #[test]
    fn test_backslash_continuation() {
        let toks = kinds("1 \\\n+ 2\n");
        assert_eq!(
            toks,
            vec![Tok::Int(1), Tok::Plus, Tok::Int(2), Tok::Newline, Tok::Eof]
        );
    }

    #[test]
    fn test_comments_and_blank_lines() {
        let toks = kinds("# hello\n\na # trailing\n");
        assert_eq!(toks, vec![Tok::Name("a".into()), Tok::Newline, Tok::Eof]);
    }

    #[test]
    fn test_strings() {
        assert_eq!(kinds(r#"'a\nb'"#)[0], Tok::Str("a\nb".into()));
        assert_eq!(kinds(r#"r'a\nb'"#)[0], Tok::Str("a\\nb".into()));
        assert_eq!(kinds("\"\"\"x\ny\"\"\"")[0], Tok::Str("x\ny".into()));
        assert_eq!(kinds("u'\\u00e9'")[0], Tok::Str("é".into()));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("0x1f")[0], Tok::Int(31));
        assert_eq!(kinds("1.5")[0], Tok::Float(1.5));
        assert_eq!(kinds("1e3")[0], Tok::Float(1000.0));
    }

    #[test]
    fn test_positions() {
        let tokens = tokenize("a\n  é = 1").unwrap_err();
        assert_eq!(tokens.line, 2);

        let tokens = tokenize("x = 'é' + y").unwrap();
        let y = tokens.iter().find(|t| t.tok == Tok::Name("y".into())).unwrap();
        assert_eq!((y.line, y.column), (1, 11));
    }

    #[test]
    fn test_bad_dedent() {
        let err = tokenize("if x:\n    a\n  b\n").unwrap_err();
        assert_eq!(err.line, 3);
    }
}

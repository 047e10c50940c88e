//! Line classification.

/// How a single line participates in chunking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    Blank,
    Comment,
    StatementStart,
    /// Indented, or starting with a block-continuation keyword.
    Continuation,
    Decorator,
}

/// Keywords that continue the preceding compound statement.
const CONTINUATION_KEYWORDS: &[&str] = &["else", "elif", "except", "finally"];

/// Classify a line; the first matching rule wins.
pub fn classify(line: &str) -> LineClass {
    let trimmed = line.trim_start();
    if trimmed.is_empty() {
        LineClass::Blank
    } else if trimmed.starts_with('#') {
        LineClass::Comment
    } else if trimmed.len() != line.len() || starts_with_continuation_keyword(line) {
        LineClass::Continuation
    } else if line.starts_with('@') {
        LineClass::Decorator
    } else {
        LineClass::StatementStart
    }
}

/// `else:` or `except ValueError:` but not `elsewhere = 1`.
fn starts_with_continuation_keyword(line: &str) -> bool {
    CONTINUATION_KEYWORDS.iter().any(|keyword| {
        line.strip_prefix(keyword)
            .and_then(|rest| rest.chars().next())
            .is_some_and(|c| !(c.is_ascii_alphanumeric() || c == '_'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_and_comment() {
        assert_eq!(classify(""), LineClass::Blank);
        assert_eq!(classify("   \t"), LineClass::Blank);
        assert_eq!(classify("# note"), LineClass::Comment);
        assert_eq!(classify("    # indented note"), LineClass::Comment);
    }

    #[test]
    fn test_continuation() {
        assert_eq!(classify("    return 1"), LineClass::Continuation);
        assert_eq!(classify("else:"), LineClass::Continuation);
        assert_eq!(classify("elif x:"), LineClass::Continuation);
        assert_eq!(classify("except ValueError:"), LineClass::Continuation);
        assert_eq!(classify("finally:"), LineClass::Continuation);
    }

    #[test]
    fn test_keyword_prefix_is_not_continuation() {
        assert_eq!(classify("elsewhere = 1"), LineClass::StatementStart);
        assert_eq!(classify("exceptions = []"), LineClass::StatementStart);
        assert_eq!(classify("else"), LineClass::StatementStart);
    }

    #[test]
    fn test_decorator_and_statement() {
        assert_eq!(classify("@decorated"), LineClass::Decorator);
        assert_eq!(classify("def foo():"), LineClass::StatementStart);
        assert_eq!(classify("1 + 1"), LineClass::StatementStart);
    }
}

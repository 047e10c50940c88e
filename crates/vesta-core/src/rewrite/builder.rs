//! `build` block sugar.
//!
//! `build [expr] [as name]:` is rewritten textually into a `with` statement
//! around the builder hook before parsing. The rewrite stays on the same
//! line, so line numbers reported by the parser are unaffected.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};

/// `build:` and `build as name:`
static BARE_BUILD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^([ \t]*)build((?:[ \t]+as[ \t]+[a-zA-Z_][a-zA-Z_0-9]*[ \t]*)?):")
        .unwrap_or_else(|e| panic!("invalid builder pattern: {e}"))
});

/// `build expr:` and `build expr as name:`
static BUILD_WITH_ARG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^([ \t]*)build[ \t]+([^=\r\n][^\r\n]*?)((?:[ \t]+as[ \t]+[a-zA-Z_][a-zA-Z_0-9]*[ \t]*)?):",
    )
    .unwrap_or_else(|e| panic!("invalid builder pattern: {e}"))
});

/// Replace `build` blocks in `source` with `with <hook>(...)` blocks.
pub(crate) fn expand_builders<'a>(source: &'a str, hook: &str) -> Cow<'a, str> {
    if !source.contains("build") {
        return Cow::Borrowed(source);
    }
    let bare = BARE_BUILD.replace_all(source, |caps: &Captures| {
        format!("{}with {hook}(){}:", &caps[1], &caps[2])
    });
    let expanded = BUILD_WITH_ARG.replace_all(&bare, |caps: &Captures| {
        format!("{}with {hook}({}){}:", &caps[1], &caps[2], &caps[3])
    });
    Cow::Owned(expanded.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expand(source: &str) -> String {
        expand_builders(source, "B").into_owned()
    }

    #[test]
    fn test_bare_build() {
        assert_eq!(expand("build:\n    pass"), "with B():\n    pass");
        assert_eq!(expand("build as l:\n    l = 1"), "with B() as l:\n    l = 1");
    }

    #[test]
    fn test_build_with_argument() {
        assert_eq!(
            expand("build list() as l:\n    l.append(1)"),
            "with B(list()) as l:\n    l.append(1)"
        );
        assert_eq!(expand("build [1]:\n    pass"), "with B([1]):\n    pass");
    }

    #[test]
    fn test_nested_build_keeps_indentation() {
        assert_eq!(
            expand("if x:\n    build:\n        pass"),
            "if x:\n    with B():\n        pass"
        );
    }

    #[test]
    fn test_other_uses_of_build_untouched() {
        assert_eq!(expand("builder = 1"), "builder = 1");
        assert_eq!(expand("build = {1: 2}"), "build = {1: 2}");
        assert_eq!(expand("x = build(1)"), "x = build(1)");
    }
}

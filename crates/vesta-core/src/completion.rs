//! Name completion and object lookup at a position in worksheet text.
//!
//! Both work on a single line and resolve names against a scope without
//! running any code: a dotted path is followed through module globals,
//! instance and class attributes only.

use vesta_lang::{Namespace, Value, builtin, builtin_names};

/// A name that completes the identifier before the cursor.
#[derive(Debug, Clone)]
pub struct Completion {
    /// The full name.
    pub name: String,
    /// What to insert at the cursor to finish the name.
    pub insert: String,
    /// The value the name is bound to, when it could be resolved.
    pub value: Option<Value>,
}

/// A value named by the source text around a position.
#[derive(Debug, Clone)]
pub struct ObjectAt {
    pub value: Value,
    pub line: usize,
    /// Character offset where the (possibly dotted) name starts.
    pub start: usize,
    /// Character offset just past the name.
    pub end: usize,
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_identifier(s: &str) -> bool {
    s.starts_with(|c: char| c.is_alphabetic() || c == '_') && s.chars().all(is_name_char)
}

/// Whether the end of `chars` lies inside a string literal or a comment.
fn in_string_or_comment(chars: &[char]) -> bool {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for &c in chars {
        match quote {
            Some(_) if escaped => escaped = false,
            Some(_) if c == '\\' => escaped = true,
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == '#' => return true,
            None => {}
        }
    }
    quote.is_some()
}

/// The dotted name ending at `end`, split into the components before the
/// last dot and the last component, which may be empty.
fn dotted_before(chars: &[char], end: usize) -> Option<(Vec<String>, String)> {
    let mut start = end;
    while start > 0 && (is_name_char(chars[start - 1]) || chars[start - 1] == '.') {
        start -= 1;
    }
    let run: String = chars[start..end].iter().collect();
    let mut path: Vec<String> = run.split('.').map(str::to_string).collect();
    let last = path.pop().unwrap_or_default();
    if !path.iter().all(|part| is_identifier(part)) {
        return None;
    }
    if last.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    Some((path, last))
}

fn resolve(scope: &Namespace, path: &[String]) -> Option<Value> {
    let (first, rest) = path.split_first()?;
    let root = scope.get(first).or_else(|| builtin(first))?;
    rest.iter().try_fold(root, |object, name| object.static_attr(name))
}

/// Completions for the name ending at character `offset` of `line`.
pub(crate) fn complete(scope: &Namespace, line: &str, offset: usize) -> Vec<Completion> {
    let chars: Vec<char> = line.chars().take(offset).collect();
    if in_string_or_comment(&chars) {
        return Vec::new();
    }
    let Some((path, partial)) = dotted_before(&chars, chars.len()) else {
        return Vec::new();
    };

    let mut candidates: Vec<(String, Option<Value>)> = if path.is_empty() {
        let mut names: Vec<(String, Option<Value>)> = scope
            .entries()
            .into_iter()
            .map(|(name, value)| (name, Some(value)))
            .collect();
        names.extend(
            builtin_names()
                .into_iter()
                .filter(|name| !scope.contains(name))
                .map(|name| (name.to_string(), builtin(name))),
        );
        names
    } else {
        let Some(object) = resolve(scope, &path) else {
            return Vec::new();
        };
        object
            .attribute_names()
            .into_iter()
            .map(|name| {
                let value = object.static_attr(&name);
                (name, value)
            })
            .collect()
    };

    let show_private = partial.starts_with('_');
    candidates.retain(|(name, _)| {
        name.starts_with(partial.as_str()) && (show_private || !name.starts_with('_'))
    });
    candidates.sort_by(|a, b| a.0.cmp(&b.0));
    candidates.dedup_by(|a, b| a.0 == b.0);
    candidates
        .into_iter()
        .map(|(name, value)| Completion {
            insert: name[partial.len()..].to_string(),
            name,
            value,
        })
        .collect()
}

/// The value named by the identifier under character `offset` of `line`,
/// together with any dotted prefix, as `(value, start, end)`.
pub(crate) fn object_at(
    scope: &Namespace,
    line: &str,
    offset: usize,
) -> Option<(Value, usize, usize)> {
    let chars: Vec<char> = line.chars().collect();
    if !chars.get(offset).copied().is_some_and(is_name_char) {
        return None;
    }
    if in_string_or_comment(&chars[..offset]) {
        return None;
    }
    let mut end = offset;
    while end < chars.len() && is_name_char(chars[end]) {
        end += 1;
    }
    let (path, last) = dotted_before(&chars, end)?;
    if !is_identifier(&last) {
        return None;
    }
    let length: usize = path.iter().map(|part| part.chars().count() + 1).sum::<usize>()
        + last.chars().count();
    let value = if path.is_empty() {
        scope.get(&last).or_else(|| builtin(&last))
    } else {
        resolve(scope, &path)?.static_attr(&last)
    }?;
    Some((value, end - length, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> Namespace {
        let scope = Namespace::new();
        scope.set("alpha", Value::Int(1));
        scope.set("alphabet", Value::str("abc"));
        scope.set("_hidden", Value::None);
        scope.set("items", Value::list(vec![]));
        scope
    }

    fn names(completions: &[Completion]) -> Vec<&str> {
        completions.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_dotted_before() {
        let chars: Vec<char> = "x = os.pa".chars().collect();
        assert_eq!(
            dotted_before(&chars, chars.len()),
            Some((vec!["os".to_string()], "pa".to_string()))
        );
        let chars: Vec<char> = "x = 1.5".chars().collect();
        assert_eq!(dotted_before(&chars, chars.len()), None);
        let chars: Vec<char> = "f(".chars().collect();
        assert_eq!(dotted_before(&chars, chars.len()), Some((vec![], String::new())));
    }

    #[test]
    fn test_string_and_comment_detection() {
        let chars = |s: &str| s.chars().collect::<Vec<char>>();
        assert!(in_string_or_comment(&chars("x = 'al")));
        assert!(in_string_or_comment(&chars("x = 1 # al")));
        assert!(!in_string_or_comment(&chars("x = 'a#b' + al")));
        assert!(in_string_or_comment(&chars(r#"x = "a\"b"#)));
    }

    #[test]
    fn test_complete_names() {
        let scope = scope();
        let found = complete(&scope, "y = alp", 7);
        assert_eq!(names(&found), ["alpha", "alphabet"]);
        assert_eq!(found[1].insert, "habet");
        assert_eq!(found[0].value.as_ref().unwrap().repr(), "1");

        assert_eq!(names(&complete(&scope, "le", 2)), ["len"]);
        assert!(names(&complete(&scope, "", 0)).contains(&"items"));
        assert!(!names(&complete(&scope, "", 0)).contains(&"_hidden"));
        assert_eq!(names(&complete(&scope, "_h", 2)), ["_hidden"]);
        assert!(complete(&scope, "'alp", 4).is_empty());
    }

    #[test]
    fn test_complete_attributes() {
        let scope = scope();
        assert_eq!(names(&complete(&scope, "items.ap", 8)), ["append"]);
        assert!(names(&complete(&scope, "alphabet.", 9)).contains(&"upper"));
        assert!(complete(&scope, "missing.x", 9).is_empty());
        assert!(complete(&scope, "alpha.x", 7).is_empty());
    }

    #[test]
    fn test_object_at() {
        let scope = scope();
        let (value, start, end) = object_at(&scope, "print alphabet + 1", 8).unwrap();
        assert_eq!(value.repr(), "'abc'");
        assert_eq!((start, end), (6, 14));

        let (value, start, end) = object_at(&scope, "x = items.append(2)", 12).unwrap();
        assert!(matches!(value, Value::Method(_)));
        assert_eq!((start, end), (4, 16));

        assert!(object_at(&scope, "x = alpha", 3).is_none());
        assert!(object_at(&scope, "x = 'alpha'", 6).is_none());
        assert!(object_at(&scope, "x = nothing", 5).is_none());
    }
}

//! Statement rewriting between the neutral form and each backend's native form.
//!
//! Callers write statements with `?` placeholders. SQLite accepts those as-is;
//! PostgreSQL needs numbered `$N` markers. The scanner skips quoted literals,
//! quoted identifiers and comments so a `?` inside them is never touched.
//! Dollar-quoted PostgreSQL bodies are not recognised.

use std::borrow::Cow;
use std::collections::HashMap;

use tally_core::Backend;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Scan {
    Code,
    SingleQuoted,
    DoubleQuoted,
    LineComment,
    BlockComment,
}

/// Walk `sql`, calling `on_code` for every character outside literals and
/// comments and `on_other` for everything else.
fn scan(sql: &str, mut on_code: impl FnMut(char), mut on_other: impl FnMut(char)) {
    let mut state = Scan::Code;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            Scan::Code => match c {
                '\'' => {
                    state = Scan::SingleQuoted;
                    on_other(c);
                }
                '"' => {
                    state = Scan::DoubleQuoted;
                    on_other(c);
                }
                '-' if chars.peek() == Some(&'-') => {
                    state = Scan::LineComment;
                    on_other(c);
                }
                '/' if chars.peek() == Some(&'*') => {
                    state = Scan::BlockComment;
                    on_other(c);
                    if let Some(star) = chars.next() {
                        on_other(star);
                    }
                }
                _ => on_code(c),
            },
            // A doubled quote closes and immediately reopens, which is the
            // escape for a literal quote.
            Scan::SingleQuoted => {
                if c == '\'' {
                    state = Scan::Code;
                }
                on_other(c);
            }
            Scan::DoubleQuoted => {
                if c == '"' {
                    state = Scan::Code;
                }
                on_other(c);
            }
            Scan::LineComment => {
                if c == '\n' {
                    state = Scan::Code;
                }
                on_other(c);
            }
            Scan::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    on_other(c);
                    if let Some(slash) = chars.next() {
                        on_other(slash);
                    }
                    state = Scan::Code;
                } else {
                    on_other(c);
                }
            }
        }
    }
}

/// Number of neutral `?` placeholders in a statement.
pub fn count_placeholders(sql: &str) -> usize {
    let mut count = 0;
    scan(sql, |c| count += usize::from(c == '?'), |_| {});
    count
}

/// Rewrite neutral `?` placeholders into the backend's native markers.
///
/// ```rust
/// use tally_core::Backend;
/// use tally_store::dialect::rewrite_placeholders;
///
/// let sql = "SELECT * FROM users WHERE email = ? AND name <> '?' AND id > ?";
/// assert_eq!(
///     rewrite_placeholders(sql, Backend::Postgres),
///     "SELECT * FROM users WHERE email = $1 AND name <> '?' AND id > $2"
/// );
/// assert_eq!(rewrite_placeholders(sql, Backend::Sqlite), sql);
/// ```
pub fn rewrite_placeholders(sql: &str, backend: Backend) -> Cow<'_, str> {
    if backend == Backend::Sqlite || !sql.contains('?') {
        return Cow::Borrowed(sql);
    }

    let out = std::cell::RefCell::new(String::with_capacity(sql.len() + 8));
    let mut index = 0usize;
    scan(
        sql,
        |c| {
            let mut buf = out.borrow_mut();
            if c == '?' {
                index += 1;
                buf.push('$');
                buf.push_str(&index.to_string());
            } else {
                buf.push(c);
            }
        },
        |c| out.borrow_mut().push(c),
    );
    Cow::Owned(out.into_inner())
}

/// Replace every literal and comment with spaces, keeping code positions.
fn mask_literals(sql: &str) -> String {
    let out = std::cell::RefCell::new(String::with_capacity(sql.len()));
    scan(
        sql,
        |c| out.borrow_mut().push(c),
        |_| out.borrow_mut().push(' '),
    );
    out.into_inner()
}

fn keywords(sql: &str) -> impl Iterator<Item = String> {
    mask_literals(sql)
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|word| !word.is_empty())
        .map(|word| word.to_ascii_uppercase())
        .collect::<Vec<_>>()
        .into_iter()
}

/// Whether the statement carries a `RETURNING` clause outside literals.
pub fn has_returning_clause(sql: &str) -> bool {
    keywords(sql).any(|word| word == "RETURNING")
}

/// Whether the first keyword of the statement is `INSERT`.
pub fn is_insert(sql: &str) -> bool {
    keywords(sql).next().is_some_and(|word| word == "INSERT")
}

/// Maps result-column names back to the data model's canonical case.
///
/// PostgreSQL folds unquoted identifiers to lower case, so `staffId` comes
/// back as `staffid`. SQLite echoes whatever case the statement used. Both
/// are looked up case-insensitively against the known column names.
#[derive(Debug, Clone, Default)]
pub struct ColumnCase {
    canonical: HashMap<String, &'static str>,
}

impl ColumnCase {
    pub fn new(names: impl IntoIterator<Item = &'static str>) -> Self {
        let canonical = names
            .into_iter()
            .map(|name| (name.to_ascii_lowercase(), name))
            .collect();
        Self { canonical }
    }

    /// Canonical spelling of `name`, or `name` itself when unknown.
    pub fn normalize(&self, name: &str) -> String {
        match self.canonical.get(&name.to_ascii_lowercase()) {
            Some(canonical) => (*canonical).to_string(),
            None => name.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_is_order_preserving() {
        let sql = "INSERT INTO t (a, b, c) VALUES (?, ?, ?)";
        assert_eq!(
            rewrite_placeholders(sql, Backend::Postgres),
            "INSERT INTO t (a, b, c) VALUES ($1, $2, $3)"
        );
    }

    #[test]
    fn test_rewrite_skips_literals_and_comments() {
        let sql = concat!(
            "SELECT 'it''s ?' AS a, \"odd?name\" -- trailing ?\n",
            "FROM t /* block ? */ WHERE x = ? AND y = '?'"
        );
        let rewritten = rewrite_placeholders(sql, Backend::Postgres);
        assert_eq!(
            rewritten,
            concat!(
                "SELECT 'it''s ?' AS a, \"odd?name\" -- trailing ?\n",
                "FROM t /* block ? */ WHERE x = $1 AND y = '?'"
            )
        );
        assert_eq!(count_placeholders(sql), 1);
    }

    #[test]
    fn test_rewrite_beyond_nine_parameters() {
        let sql = vec!["?"; 12].join(", ");
        let rewritten = rewrite_placeholders(&sql, Backend::Postgres);
        assert!(rewritten.ends_with("$11, $12"));
        assert_eq!(count_placeholders(&sql), 12);
    }

    #[test]
    fn test_sqlite_is_untouched() {
        let sql = "UPDATE t SET a = ? WHERE b = ?";
        assert!(matches!(
            rewrite_placeholders(sql, Backend::Sqlite),
            Cow::Borrowed(_)
        ));
    }

    #[test]
    fn test_keyword_detection() {
        assert!(has_returning_clause(
            "INSERT INTO users (email) VALUES (?) RETURNING id"
        ));
        assert!(!has_returning_clause(
            "INSERT INTO notes (body) VALUES ('returning soon')"
        ));
        assert!(is_insert("  insert into t default values"));
        assert!(!is_insert("-- insert\nUPDATE t SET a = 1"));
    }

    #[test]
    fn test_column_case_normalization() {
        let case = ColumnCase::new(["staffId", "createdAt", "id"]);
        assert_eq!(case.normalize("staffid"), "staffId");
        assert_eq!(case.normalize("CREATEDAT"), "createdAt");
        assert_eq!(case.normalize("id"), "id");
        assert_eq!(case.normalize("total"), "total");
    }
}

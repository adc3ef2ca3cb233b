//! SQL rewriting
//!
//! Named-parameter substitution and row-limit injection. Both are textual:
//! the statement that reaches the driver is plain SQL.

use crate::database::dialect::{DatabaseKind, LimitStyle};
use serde_json::{Map, Value};

/// Replace `:name` tokens with literal values.
///
/// Strings are single-quoted with embedded quotes doubled; numbers and
/// booleans are written as-is; arrays and objects become quoted JSON text; a
/// null or missing value becomes `NULL`. Tokens inside quoted literals or
/// quoted identifiers are left alone, as are `::` casts. Without any
/// parameters the text is returned unchanged.
pub fn apply_parameters(sql: &str, parameters: &Map<String, Value>) -> String {
    if parameters.is_empty() {
        return sql.to_string();
    }

    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if let Some(q) = quote {
            out.push(c);
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }

        match c {
            '\'' | '"' => {
                quote = Some(c);
                out.push(c);
                i += 1;
            }
            ':' if chars.get(i + 1) == Some(&':') => {
                out.push_str("::");
                i += 2;
            }
            ':' if chars.get(i + 1).is_some_and(|n| n.is_alphabetic() || *n == '_') => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_') {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                out.push_str(&literal(parameters.get(&name)));
                i = end;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

fn literal(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "NULL".to_string(),
        Some(Value::String(s)) => quote(s),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other @ (Value::Array(_) | Value::Object(_))) => quote(&other.to_string()),
    }
}

fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Append `LIMIT n` unless the statement already mentions `LIMIT`.
///
/// A single trailing `;` is dropped before appending. When a `LIMIT` is
/// already present the original text is returned untouched.
pub fn apply_limit(sql: &str, limit: u64) -> String {
    let trimmed = strip_terminator(sql);
    if contains_keyword(trimmed, "LIMIT") {
        return sql.to_string();
    }
    format!("{} LIMIT {}", trimmed, limit)
}

/// Dialect-aware variant of [`apply_limit`].
///
/// Only statements that read rows (`SELECT`, `WITH`, `VALUES`, `TABLE` or a
/// parenthesized query) are rewritten. Mutations and DDL pass through as-is,
/// since a trailing `LIMIT` or `FETCH FIRST` is a syntax error on them for
/// PostgreSQL and Oracle; the executor's row cap still applies.
pub fn apply_row_limit(kind: DatabaseKind, sql: &str, limit: u64) -> String {
    if !reads_rows(sql) {
        return sql.to_string();
    }
    match kind.limit_style() {
        LimitStyle::Limit => apply_limit(sql, limit),
        LimitStyle::FetchFirst => {
            let trimmed = strip_terminator(sql);
            if contains_keyword(trimmed, "LIMIT") || contains_keyword(trimmed, "FETCH") {
                return sql.to_string();
            }
            format!("{} FETCH FIRST {} ROWS ONLY", trimmed, limit)
        }
        LimitStyle::RowCapOnly => sql.to_string(),
    }
}

fn reads_rows(sql: &str) -> bool {
    let trimmed = sql.trim_start();
    if trimmed.starts_with('(') {
        return true;
    }
    let first = trimmed
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .next()
        .unwrap_or_default();
    ["SELECT", "WITH", "VALUES", "TABLE"]
        .iter()
        .any(|keyword| first.eq_ignore_ascii_case(keyword))
}

fn strip_terminator(sql: &str) -> &str {
    let trimmed = sql.trim();
    match trimmed.strip_suffix(';') {
        Some(rest) => rest.trim_end(),
        None => trimmed,
    }
}

/// Case-insensitive whole-word search
fn contains_keyword(sql: &str, keyword: &str) -> bool {
    sql.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .any(|word| word.eq_ignore_ascii_case(keyword))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_string_parameter_quotes_are_doubled() {
        let sql = apply_parameters("SELECT * FROM t WHERE name = :n", &params(json!({"n": "O'Brien"})));
        assert_eq!(sql, "SELECT * FROM t WHERE name = 'O''Brien'");
    }

    #[test]
    fn test_null_and_missing_parameters() {
        let sql = apply_parameters(
            "UPDATE t SET a = :a, b = :b WHERE id = :id",
            &params(json!({"a": null, "id": 7})),
        );
        assert_eq!(sql, "UPDATE t SET a = NULL, b = NULL WHERE id = 7");
    }

    #[test]
    fn test_typed_parameters() {
        let sql = apply_parameters(
            "SELECT :flag, :ratio, :tags",
            &params(json!({"flag": true, "ratio": 0.5, "tags": ["a", "b's"]})),
        );
        assert_eq!(sql, r#"SELECT true, 0.5, '["a","b''s"]'"#);
    }

    #[test]
    fn test_tokens_are_matched_whole() {
        let sql = apply_parameters(
            "SELECT :id, :id_2 FROM t",
            &params(json!({"id": 1, "id_2": 2})),
        );
        assert_eq!(sql, "SELECT 1, 2 FROM t");
    }

    #[test]
    fn test_quoted_text_and_casts_are_untouched() {
        let sql = apply_parameters(
            "SELECT ':n', \"col:n\", x::text FROM t WHERE a = :n",
            &params(json!({"n": 3})),
        );
        assert_eq!(sql, "SELECT ':n', \"col:n\", x::text FROM t WHERE a = 3");
    }

    #[test]
    fn test_no_parameters_leaves_sql_unchanged() {
        let sql = "SELECT * FROM t WHERE a = :missing";
        assert_eq!(apply_parameters(sql, &Map::new()), sql);
    }

    #[test]
    fn test_apply_limit() {
        assert_eq!(apply_limit("SELECT * FROM t", 50), "SELECT * FROM t LIMIT 50");
        assert_eq!(apply_limit("SELECT * FROM t LIMIT 10", 50), "SELECT * FROM t LIMIT 10");
        assert_eq!(apply_limit("  SELECT * FROM t;  ", 5), "SELECT * FROM t LIMIT 5");
        assert_eq!(apply_limit("select * from t limit 3;", 5), "select * from t limit 3;");
    }

    #[test]
    fn test_limit_keyword_must_be_a_word() {
        assert_eq!(
            apply_limit("SELECT speed_limit FROM roads", 10),
            "SELECT speed_limit FROM roads LIMIT 10"
        );
    }

    #[test]
    fn test_dialect_row_limit() {
        assert_eq!(
            apply_row_limit(DatabaseKind::PostgreSql, "SELECT 1", 10),
            "SELECT 1 LIMIT 10"
        );
        assert_eq!(
            apply_row_limit(DatabaseKind::Oracle, "SELECT * FROM t;", 10),
            "SELECT * FROM t FETCH FIRST 10 ROWS ONLY"
        );
        assert_eq!(
            apply_row_limit(DatabaseKind::Oracle, "SELECT * FROM t FETCH FIRST 2 ROWS ONLY", 10),
            "SELECT * FROM t FETCH FIRST 2 ROWS ONLY"
        );
        assert_eq!(
            apply_row_limit(DatabaseKind::SqlServer, "SELECT * FROM t", 10),
            "SELECT * FROM t"
        );
    }

    #[test]
    fn test_mutations_are_not_limited() {
        for kind in [DatabaseKind::PostgreSql, DatabaseKind::MySql, DatabaseKind::Oracle] {
            assert_eq!(
                apply_row_limit(kind, "UPDATE t SET a = 1;", 10),
                "UPDATE t SET a = 1;"
            );
            assert_eq!(apply_row_limit(kind, "delete from t", 10), "delete from t");
        }
        assert_eq!(
            apply_row_limit(DatabaseKind::PostgreSql, "  with x AS (SELECT 1) SELECT * FROM x", 5),
            "with x AS (SELECT 1) SELECT * FROM x LIMIT 5"
        );
        assert_eq!(
            apply_row_limit(DatabaseKind::MySql, "(SELECT 1) UNION (SELECT 2)", 5),
            "(SELECT 1) UNION (SELECT 2) LIMIT 5"
        );
    }
}

use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::sql::scan::{find_keyword_positions, matching_paren};

pub const UNKNOWN_RELATION: &str = "unknown";

/// One `EXISTS (...)` clause found in a subset string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistsClause {
    /// The clause text, from `EXISTS` through its closing parenthesis.
    pub sql: String,
    pub start: usize,
    pub end: usize,
    pub schema: String,
    pub table: String,
    pub alias: Option<String>,
}

impl ExistsClause {
    pub fn is_parsed(&self) -> bool {
        self.table != UNKNOWN_RELATION
    }
}

/// Offset of the opening paren that follows an `EXISTS` keyword at `position`.
fn exists_open_paren(sql: &str, position: usize) -> Option<usize> {
    let after = position + "EXISTS".len();
    let rest = &sql[after..];
    let skipped = rest.len() - rest.trim_start().len();
    let open = after + skipped;
    (sql.as_bytes().get(open) == Some(&b'(')).then_some(open)
}

pub fn contains_exists_clause(sql: &str) -> bool {
    find_keyword_positions(sql, "EXISTS", false)
        .into_iter()
        .any(|position| exists_open_paren(sql, position).is_some())
}

/// Outermost `EXISTS (...)` clauses in textual order. Clauses nested inside
/// another clause stay part of their parent.
pub fn extract_exists_clauses(sql: &str) -> Vec<ExistsClause> {
    let mut clauses = Vec::new();
    let mut consumed_until = 0usize;

    for position in find_keyword_positions(sql, "EXISTS", false) {
        if position < consumed_until {
            continue;
        }
        let Some(open) = exists_open_paren(sql, position) else {
            continue;
        };
        let Some(close) = matching_paren(sql, open) else {
            tracing::debug!(position, "unterminated EXISTS clause");
            continue;
        };
        let end = close + 1;
        let clause_sql = &sql[position..end];
        let relation = parse_relation(clause_sql);
        clauses.push(ExistsClause {
            sql: clause_sql.to_string(),
            start: position,
            end,
            schema: relation.schema,
            table: relation.table,
            alias: relation.alias,
        });
        consumed_until = end;
    }

    clauses
}

/// `sql` with every outermost EXISTS clause removed.
pub(crate) fn strip_exists_clauses(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut cursor = 0;
    for clause in extract_exists_clauses(sql) {
        out.push_str(&sql[cursor..clause.start]);
        cursor = clause.end;
    }
    out.push_str(&sql[cursor..]);
    out
}

struct Relation {
    schema: String,
    table: String,
    alias: Option<String>,
}

fn from_relation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?is)^FROM\s+(?:("[^"]+"|[A-Za-z_][A-Za-z0-9_]*)\s*\.\s*)?("[^"]+"|[A-Za-z_][A-Za-z0-9_]*)(?:\s+(?:AS\s+)?("[^"]+"|[A-Za-z_][A-Za-z0-9_]*))?"#,
        )
        .expect("FROM relation regex is valid")
    })
}

const NON_ALIAS_KEYWORDS: &[&str] = &[
    "WHERE", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "ON", "GROUP", "ORDER", "LIMIT",
];

fn parse_relation(clause_sql: &str) -> Relation {
    let unknown = Relation {
        schema: UNKNOWN_RELATION.to_string(),
        table: UNKNOWN_RELATION.to_string(),
        alias: None,
    };
    let Some(from) = find_keyword_positions(clause_sql, "FROM", false).first().copied() else {
        return unknown;
    };
    let Some(captures) = from_relation_regex().captures(&clause_sql[from..]) else {
        return unknown;
    };

    let unquote = |value: &str| value.trim_matches('"').to_string();
    let schema = captures
        .get(1)
        .map(|value| unquote(value.as_str()))
        .unwrap_or_else(|| "public".to_string());
    let table = unquote(&captures[2]);
    let alias = captures
        .get(3)
        .map(|value| value.as_str())
        .filter(|value| {
            !NON_ALIAS_KEYWORDS
                .iter()
                .any(|keyword| value.eq_ignore_ascii_case(keyword))
        })
        .map(unquote);

    Relation {
        schema,
        table,
        alias,
    }
}

/// Rewrites references to `original_table` inside `sql` to `new_alias`, for
/// reusing a clause where that table is not in scope.
///
/// Passes go from the most specific form (`"schema"."table"."col"`) to bare
/// `table.col`. A no-op when the table is not referenced.
pub fn adapt_exists_for_nested_context(sql: &str, original_table: &str, new_alias: &str) -> String {
    adapt_exists_for_nested_context_in_schema(sql, None, original_table, new_alias)
}

pub fn adapt_exists_for_nested_context_in_schema(
    sql: &str,
    original_schema: Option<&str>,
    original_table: &str,
    new_alias: &str,
) -> String {
    let table = original_table.trim_matches('"');
    if table.is_empty() || !sql.to_ascii_lowercase().contains(&table.to_ascii_lowercase()) {
        return sql.to_string();
    }
    let escaped_table = regex::escape(table);
    let column = r#"("[^"]+"|[A-Za-z_][A-Za-z0-9_]*)"#;
    let quoted_or_bare_table = format!(r#"(?:"{escaped_table}"|\b{escaped_table}\b)"#);
    let schema_pattern = match original_schema.map(|schema| schema.trim_matches('"')) {
        Some(schema) if !schema.is_empty() => {
            let escaped_schema = regex::escape(schema);
            format!(r#"(?:"{escaped_schema}"|\b{escaped_schema}\b)"#)
        }
        _ => r#"(?:"[^"]+"|\b[A-Za-z_][A-Za-z0-9_]*\b)"#.to_string(),
    };

    let replace_column = |captures: &Captures| format!("{new_alias}.{}", &captures[1]);

    let schema_qualified = Regex::new(&format!(
        r"{schema_pattern}\s*\.\s*{quoted_or_bare_table}\s*\.\s*{column}"
    ));
    let table_qualified = Regex::new(&format!(r#""{escaped_table}"\s*\.\s*{column}"#));
    let bare = Regex::new(&format!(
        r#"(?i)(^|[^A-Za-z0-9_".]){escaped_table}\s*\.\s*{column}"#
    ));

    let (Ok(schema_qualified), Ok(table_qualified), Ok(bare)) =
        (schema_qualified, table_qualified, bare)
    else {
        tracing::warn!(original_table, "could not build adaptation patterns");
        return sql.to_string();
    };

    let adapted = schema_qualified.replace_all(sql, replace_column);
    let adapted = table_qualified.replace_all(&adapted, replace_column);
    let adapted = bare.replace_all(&adapted, |captures: &Captures| {
        format!("{}{new_alias}.{}", &captures[1], &captures[2])
    });
    adapted.into_owned()
}

/// Replaces every character outside `[A-Za-z0-9_."]` with `_` and trims
/// leading/trailing underscores. Total: never fails, empty in, empty out.
pub fn sanitize_sql_identifier(identifier: &str) -> String {
    let replaced: String = identifier
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '"') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    replaced.trim_matches('_').to_string()
}

pub fn quote_ident(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// `"schema"."table"`, or just `"table"` without a schema.
pub fn qualified_name(schema: Option<&str>, table: &str) -> String {
    match schema.filter(|schema| !schema.is_empty()) {
        Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(table)),
        None => quote_ident(table),
    }
}

pub fn escape_sql_string(value: &str) -> String {
    value.replace('\'', "''")
}

pub fn quote_literal(value: &str) -> String {
    format!("'{}'", escape_sql_string(value))
}

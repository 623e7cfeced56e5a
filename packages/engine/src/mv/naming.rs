//! Naming of FilterMate-owned relations.
//!
//! Views live in the temp schema and are named
//! `{prefix}{session_id}_{content_hash[..8]}`. Stale-view detection on project
//! load matches on these prefixes, so they must not change.

use md5::{Digest, Md5};

use crate::sql::identifiers::sanitize_sql_identifier;
use crate::sql::scan::{tokenize, Token};

pub const DEFAULT_TEMP_SCHEMA: &str = "filtermate_temp";
pub const MV_PREFIX: &str = "fm_temp_mv_";
pub const CHAIN_PREFIX: &str = "fm_temp_chain_";
/// Prefixes written by earlier plugin versions; still recognized as ours.
pub const LEGACY_PREFIXES: &[&str] = &["fm_chain_", "mv_"];

pub fn generate_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Hex MD5 of the parts joined with `|`.
pub fn content_hash(parts: &[&str]) -> String {
    let mut hasher = Md5::new();
    for (index, part) in parts.iter().enumerate() {
        if index > 0 {
            hasher.update(b"|");
        }
        hasher.update(part.as_bytes());
    }
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

pub fn view_name(prefix: &str, session_id: &str, hash: &str) -> String {
    let short = hash.get(..8).unwrap_or(hash);
    sanitize_sql_identifier(&format!("{prefix}{session_id}_{short}"))
}

pub fn is_filtermate_view_name(name: &str) -> bool {
    let lowered = name.trim_matches('"').to_ascii_lowercase();
    [MV_PREFIX, CHAIN_PREFIX]
        .iter()
        .chain(LEGACY_PREFIXES.iter())
        .any(|prefix| lowered.starts_with(prefix))
}

/// Relation named by the tokens following `FROM`/`JOIN`; the last part of a
/// qualified name.
fn relation_after(tokens: &[Token]) -> Option<&str> {
    let first = tokens.first()?.identifier()?;
    match (tokens.get(1), tokens.get(2).and_then(Token::identifier)) {
        (Some(Token::Symbol('.')), Some(name)) => Some(name),
        _ => Some(first),
    }
}

/// FilterMate views `sql` reads from, first occurrence order. A name counts
/// when it follows `FROM` or `JOIN`, or is qualified by `temp_schema`.
/// String literals and column references never count.
pub fn view_references(sql: &str, temp_schema: &str) -> Vec<String> {
    let tokens = tokenize(sql);
    let mut names: Vec<String> = Vec::new();
    for (index, token) in tokens.iter().enumerate() {
        let relation = if token.is_keyword("FROM") || token.is_keyword("JOIN") {
            relation_after(&tokens[index + 1..])
        } else if token
            .identifier()
            .is_some_and(|schema| schema.eq_ignore_ascii_case(temp_schema))
            && tokens.get(index + 1) == Some(&Token::Symbol('.'))
        {
            tokens.get(index + 2).and_then(Token::identifier)
        } else {
            None
        };
        let Some(name) = relation.filter(|name| is_filtermate_view_name(name)) else {
            continue;
        };
        if !names.iter().any(|known| known == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// [`view_references`] against the default temp schema.
pub fn stale_view_references(sql: &str) -> Vec<String> {
    view_references(sql, DEFAULT_TEMP_SCHEMA)
}

use std::sync::OnceLock;

use regex::Regex;

use crate::sql::scan::{
    contains_keyword, matching_paren, split_top_level, split_top_level_commas, strip_outer_parens,
};

fn in_list_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?is)^((?:"[^"]+"|[A-Za-z_][A-Za-z0-9_]*)(?:\s*\.\s*(?:"[^"]+"|[A-Za-z_][A-Za-z0-9_]*))?)\s+IN\s*\("#,
        )
        .expect("IN list regex is valid")
    })
}

struct InList {
    column: String,
    values: Vec<String>,
}

fn parse_in_list(conjunct: &str) -> Option<InList> {
    let captures = in_list_regex().captures(conjunct)?;
    let whole = captures.get(0)?;
    let open = whole.end() - 1;
    let close = matching_paren(conjunct, open)?;
    if close != conjunct.len() - 1 {
        return None;
    }
    let body = &conjunct[open + 1..close];
    if contains_keyword(body, "SELECT") {
        return None;
    }
    Some(InList {
        column: captures[1].to_string(),
        values: split_top_level_commas(body)
            .into_iter()
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .collect(),
    })
}

/// Flattens nested AND groups; OR groups stay opaque.
fn flatten_conjuncts(sql: &str, out: &mut Vec<String>) {
    for part in split_top_level(sql, "AND") {
        let inner = strip_outer_parens(part);
        let inner_parts = split_top_level(inner, "AND");
        if inner != part
            && inner_parts.len() > 1
            && split_top_level(inner, "OR").len() == 1
            && !inner_parts.iter().any(|piece| piece.is_empty())
        {
            flatten_conjuncts(inner, out);
        } else if inner != part && split_top_level(inner, "OR").len() == 1 {
            out.push(inner.to_string());
        } else {
            out.push(part.to_string());
        }
    }
}

/// Collapses repeated `col IN (...)` conjuncts of a top-level AND chain into
/// one clause holding their intersection.
pub fn optimize_duplicate_in_clauses(sql: &str) -> String {
    if split_top_level(sql, "OR").len() > 1 {
        return sql.to_string();
    }
    let mut conjuncts = Vec::new();
    flatten_conjuncts(sql, &mut conjuncts);
    if conjuncts.len() < 2 || conjuncts.iter().any(|conjunct| conjunct.is_empty()) {
        return sql.to_string();
    }

    let parsed: Vec<Option<InList>> = conjuncts.iter().map(|c| parse_in_list(c)).collect();
    let mut merged_any = false;
    let mut output: Vec<String> = Vec::with_capacity(conjuncts.len());
    let mut emitted_columns: Vec<String> = Vec::new();

    for (index, conjunct) in conjuncts.iter().enumerate() {
        let Some(list) = &parsed[index] else {
            output.push(conjunct.clone());
            continue;
        };
        if emitted_columns.contains(&list.column) {
            merged_any = true;
            continue;
        }
        let same_column: Vec<&InList> = parsed
            .iter()
            .flatten()
            .filter(|other| other.column == list.column)
            .collect();
        if same_column.len() == 1 {
            output.push(conjunct.clone());
            continue;
        }
        let values: Vec<&String> = list
            .values
            .iter()
            .filter(|value| same_column.iter().all(|other| other.values.contains(value)))
            .collect();
        output.push(if values.is_empty() {
            "1 = 0".to_string()
        } else {
            format!(
                "{} IN ({})",
                list.column,
                values
                    .iter()
                    .map(|value| value.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        });
        emitted_columns.push(list.column.clone());
    }

    if !merged_any {
        return sql.to_string();
    }
    let optimized = if output.len() == 1 {
        output.remove(0)
    } else {
        output
            .iter()
            .map(|conjunct| {
                if conjunct.starts_with("NOT ") || parse_in_list(conjunct).is_some() {
                    conjunct.clone()
                } else {
                    format!("({conjunct})")
                }
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    };
    if optimized.len() < sql.len() {
        tracing::debug!(
            bytes_saved = sql.len() - optimized.len(),
            "collapsed duplicate IN clauses"
        );
    }
    optimized
}

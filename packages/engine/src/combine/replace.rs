use std::sync::OnceLock;

use regex::Regex;

use crate::combine::exists::strip_exists_clauses;
use crate::mv::naming::stale_view_references;
use crate::sql::scan::{find_keyword_positions, matching_paren};

pub const SOURCE_ALIAS: &str = "__source";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaceDecision {
    pub should_replace: bool,
    pub reasons: Vec<String>,
}

fn in_select_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bIN\s*(\()\s*SELECT\b").expect("IN SELECT regex is valid"))
}

fn style_idiom_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(AND\s+TRUE\s*\)|\bTHEN\s+(?:true|false)\b|\bSELECT\s+CASE\b)")
            .expect("style idiom regex is valid")
    })
}

/// Decides whether an existing subset is too foreign to combine with and
/// must be discarded.
///
/// `__source` inside an EXISTS clause is self-contained scope and does not
/// count; the same alias anywhere else only resolves inside the query that
/// produced it.
pub fn should_replace_old_subset(old_subset: &str) -> ReplaceDecision {
    let mut reasons = Vec::new();

    let outside_exists = strip_exists_clauses(old_subset);
    if !find_keyword_positions(&outside_exists, SOURCE_ALIAS, false).is_empty() {
        reasons.push(format!("`{SOURCE_ALIAS}` is referenced outside an EXISTS clause"));
    }

    for captures in in_select_regex().captures_iter(old_subset) {
        let Some(open) = captures.get(1).map(|group| group.start()) else {
            continue;
        };
        let end = matching_paren(old_subset, open)
            .map(|close| close + 1)
            .unwrap_or(old_subset.len());
        let subquery = &old_subset[open..end];
        for view in stale_view_references(subquery) {
            reasons.push(format!("references materialized view `{view}` in IN (SELECT ...)"));
        }
    }

    if let Some(idiom) = style_idiom_regex().find(old_subset) {
        reasons.push(format!(
            "contains a style/symbology expression idiom `{}`",
            idiom.as_str()
        ));
    }

    ReplaceDecision {
        should_replace: !reasons.is_empty(),
        reasons,
    }
}

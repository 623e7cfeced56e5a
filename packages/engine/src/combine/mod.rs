//! Merging a freshly built filter with the subset string already applied to
//! a layer.

mod duplicates;
mod exists;
mod replace;

pub use duplicates::optimize_duplicate_in_clauses;
pub use exists::{
    adapt_exists_for_nested_context, adapt_exists_for_nested_context_in_schema,
    contains_exists_clause, extract_exists_clauses, ExistsClause, UNKNOWN_RELATION,
};
pub(crate) use exists::strip_exists_clauses;
pub use replace::{should_replace_old_subset, ReplaceDecision, SOURCE_ALIAS};

use crate::layer::ProviderType;
use crate::request::CombineOperator;
use crate::sql::scan::{
    collapse_whitespace, contains_keyword, find_keyword_positions, strip_outer_parens,
    unbalanced_closing_parens,
};

/// Trimmed, whitespace-collapsed form without wrapping parentheses. Used for
/// identity and containment checks.
pub fn normalize_expression(expression: &str) -> String {
    strip_outer_parens(&collapse_whitespace(expression)).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubsetPattern {
    NoOldFilter,
    ExistsPattern,
    WhereClausePattern,
    PlainCondition,
}

/// Classification of a layer's current subset string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubsetState {
    pub pattern: SubsetPattern,
    pub has_exists: bool,
    pub references_source_alias: bool,
    pub is_replaceable: bool,
    pub replace_reasons: Vec<String>,
}

impl SubsetState {
    pub fn inspect(subset: Option<&str>) -> Self {
        let Some(subset) = subset.map(str::trim).filter(|subset| !subset.is_empty()) else {
            return Self {
                pattern: SubsetPattern::NoOldFilter,
                has_exists: false,
                references_source_alias: false,
                is_replaceable: false,
                replace_reasons: Vec::new(),
            };
        };
        let has_exists = contains_exists_clause(subset);
        let pattern = if has_exists {
            SubsetPattern::ExistsPattern
        } else if contains_keyword(subset, "WHERE") {
            SubsetPattern::WhereClausePattern
        } else {
            SubsetPattern::PlainCondition
        };
        let decision = should_replace_old_subset(subset);
        Self {
            pattern,
            has_exists,
            references_source_alias: contains_keyword(subset, SOURCE_ALIAS),
            is_replaceable: decision.should_replace,
            replace_reasons: decision.reasons,
        }
    }
}

/// Combines filters per provider. The duplicate optimizer runs on every
/// combined result when set.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubsetCombiner {
    pub optimize_duplicates: Option<fn(&str) -> String>,
}

impl SubsetCombiner {
    pub fn with_duplicate_optimizer() -> Self {
        Self {
            optimize_duplicates: Some(optimize_duplicate_in_clauses),
        }
    }

    pub fn combine(
        &self,
        new_expression: &str,
        old_subset: Option<&str>,
        operator: Option<CombineOperator>,
        provider: ProviderType,
    ) -> String {
        let Some(old_subset) = old_subset.filter(|old| !old.trim().is_empty()) else {
            return new_expression.to_string();
        };
        let Some(operator) = operator else {
            tracing::info!(provider = %provider, "replace mode discards the previous subset");
            return new_expression.to_string();
        };

        let normalized_new = normalize_expression(new_expression);
        let normalized_old = normalize_expression(old_subset);
        if normalized_new == normalized_old {
            return new_expression.to_string();
        }
        if normalized_old.contains(&normalized_new) {
            tracing::debug!("new expression already contained in the previous subset");
            return old_subset.to_string();
        }
        if normalized_new.contains(&normalized_old) {
            tracing::debug!("new expression supersedes the previous subset");
            return new_expression.to_string();
        }
        if operator == CombineOperator::Replace {
            tracing::info!(provider = %provider, "replace operator discards the previous subset");
            return new_expression.to_string();
        }

        let mut old = old_subset.trim().to_string();
        if matches!(provider, ProviderType::Ogr | ProviderType::Memory)
            && (contains_keyword(&old, "SELECT") || contains_keyword(&old, "FROM"))
        {
            match where_fragment(&old) {
                Some(fragment) => old = fragment,
                None => {
                    tracing::warn!(
                        provider = %provider,
                        "previous subset is not expressible for this provider, dropping it"
                    );
                    return new_expression.to_string();
                }
            }
        }

        let op = operator.as_sql();
        let combined = if contains_exists_clause(&old) {
            let new = strip_leading_where(new_expression);
            format!("({old}) {op} ({new})")
        } else if let Some(position) = find_keyword_positions(&old, "WHERE", false).first().copied()
        {
            let prefix = old[..position].trim_end();
            let fragment = trim_unbalanced_tail(old[position + "WHERE".len()..].trim());
            format!("{prefix} WHERE {fragment} {op} ( {new_expression} )")
        } else {
            format!("( {old} ) {op} ( {new_expression} )")
        };

        match self.optimize_duplicates {
            Some(optimize) => optimize(&combined),
            None => combined,
        }
    }
}

/// Combines with the duplicate optimizer enabled.
pub fn combine_with_old_subset(
    new_expression: &str,
    old_subset: Option<&str>,
    operator: Option<CombineOperator>,
    provider: ProviderType,
) -> String {
    SubsetCombiner::with_duplicate_optimizer().combine(
        new_expression,
        old_subset,
        operator,
        provider,
    )
}

fn strip_leading_where(expression: &str) -> &str {
    let trimmed = expression.trim();
    match trimmed.get(..6) {
        Some(head) if head.eq_ignore_ascii_case("WHERE ") => trimmed[6..].trim_start(),
        _ => trimmed,
    }
}

fn trim_unbalanced_tail(fragment: &str) -> &str {
    let mut current = fragment.trim_end();
    while unbalanced_closing_parens(current) > 0 && current.ends_with(')') {
        current = current[..current.len() - 1].trim_end();
    }
    current
}

fn where_fragment(sql: &str) -> Option<String> {
    let position = find_keyword_positions(sql, "WHERE", false).first().copied()?;
    let fragment = trim_unbalanced_tail(sql[position + "WHERE".len()..].trim());
    (!fragment.is_empty()).then(|| fragment.to_string())
}

#[cfg(test)]
mod tests {
    use super::{
        combine_with_old_subset, normalize_expression, SubsetCombiner, SubsetPattern,
        SubsetState,
    };
    use crate::layer::ProviderType;
    use crate::request::CombineOperator;

    const PG: ProviderType = ProviderType::Postgres;

    #[test]
    fn normalization_strips_parens_and_whitespace() {
        assert_eq!(normalize_expression("  ((\"a\"   = 1)) "), "\"a\" = 1");
        assert_eq!(normalize_expression("(a) AND (b)"), "(a) AND (b)");
    }

    #[test]
    fn no_old_subset_returns_new() {
        let plain = SubsetCombiner::default();
        assert_eq!(plain.combine("\"a\" = 1", None, Some(CombineOperator::And), PG), "\"a\" = 1");
        assert_eq!(plain.combine("\"a\" = 1", Some("  "), Some(CombineOperator::And), PG), "\"a\" = 1");
    }

    #[test]
    fn identical_expressions_never_duplicate() {
        for expression in ["\"a\" = 1", "(\"a\" = 1 OR \"b\" = 2)", "EXISTS (SELECT 1 FROM t AS __source WHERE x)"] {
            assert_eq!(
                combine_with_old_subset(expression, Some(expression), Some(CombineOperator::And), PG),
                expression
            );
        }
    }

    #[test]
    fn contained_new_expression_keeps_old() {
        let old = "( \"a\" = 1 ) AND ( \"b\" = 2 )";
        assert_eq!(
            combine_with_old_subset("\"b\" = 2", Some(old), Some(CombineOperator::And), PG),
            old
        );
    }

    #[test]
    fn superseding_new_expression_wins() {
        let new = "( \"a\" = 1 ) AND ( \"b\" = 2 )";
        assert_eq!(
            combine_with_old_subset(new, Some("\"a\" = 1"), Some(CombineOperator::And), PG),
            new
        );
    }

    #[test]
    fn replace_discards_old() {
        assert_eq!(combine_with_old_subset("\"a\" = 1", Some("\"b\" = 2"), None, PG), "\"a\" = 1");
        assert_eq!(
            combine_with_old_subset("\"a\" = 1", Some("\"b\" = 2"), Some(CombineOperator::Replace), PG),
            "\"a\" = 1"
        );
    }

    #[test]
    fn plain_conditions_combine_with_operator() {
        assert_eq!(
            combine_with_old_subset("\"a\" = 1", Some("\"b\" = 2"), Some(CombineOperator::Or), PG),
            "( \"b\" = 2 ) OR ( \"a\" = 1 )"
        );
        assert_eq!(
            combine_with_old_subset("\"a\" = 1", Some("\"b\" = 2"), Some(CombineOperator::AndNot), PG),
            "( \"b\" = 2 ) AND NOT ( \"a\" = 1 )"
        );
    }

    #[test]
    fn exists_subset_chains_and_strips_leading_where() {
        let old = "EXISTS (SELECT 1 FROM \"public\".\"zones\" AS __source WHERE ST_Intersects(\"geom\", __source.\"geom\"))";
        let combined = combine_with_old_subset(
            "WHERE \"kind\" = 'road'",
            Some(old),
            Some(CombineOperator::And),
            PG,
        );
        assert_eq!(combined, format!("({old}) AND (\"kind\" = 'road')"));
    }

    #[test]
    fn where_clause_subset_appends_after_fragment() {
        let old = "SELECT * FROM \"roads\" WHERE \"kind\" = 'a'))";
        let combined = combine_with_old_subset("\"b\" = 2", Some(old), Some(CombineOperator::And), PG);
        assert_eq!(combined, "SELECT * FROM \"roads\" WHERE \"kind\" = 'a' AND ( \"b\" = 2 )");
    }

    #[test]
    fn ogr_extracts_where_fragment_or_drops_old() {
        let old = "SELECT * FROM roads WHERE \"kind\" = 'a'";
        assert_eq!(
            combine_with_old_subset("\"fid\" IN (1)", Some(old), Some(CombineOperator::And), ProviderType::Ogr),
            "( \"kind\" = 'a' ) AND ( \"fid\" IN (1) )"
        );
        assert_eq!(
            combine_with_old_subset("\"fid\" IN (1)", Some("SELECT * FROM roads"), Some(CombineOperator::And), ProviderType::Ogr),
            "\"fid\" IN (1)"
        );
    }

    #[test]
    fn duplicate_optimizer_runs_after_combination() {
        let combined = combine_with_old_subset(
            "\"fid\" IN (2, 3)",
            Some("\"fid\" IN (1, 2)"),
            Some(CombineOperator::And),
            ProviderType::Ogr,
        );
        assert_eq!(combined, "\"fid\" IN (2)");
        let untouched = SubsetCombiner::default().combine(
            "\"fid\" IN (2, 3)",
            Some("\"fid\" IN (1, 2)"),
            Some(CombineOperator::And),
            ProviderType::Ogr,
        );
        assert_eq!(untouched, "( \"fid\" IN (1, 2) ) AND ( \"fid\" IN (2, 3) )");
    }

    #[test]
    fn subset_state_classifies_patterns() {
        assert_eq!(SubsetState::inspect(None).pattern, SubsetPattern::NoOldFilter);
        let exists = SubsetState::inspect(Some("EXISTS (SELECT 1 FROM t AS __source WHERE x)"));
        assert_eq!(exists.pattern, SubsetPattern::ExistsPattern);
        assert!(exists.has_exists);
        assert!(exists.references_source_alias);
        assert!(!exists.is_replaceable);
        let foreign = SubsetState::inspect(Some("__source.\"id\" IN (1,2,3)"));
        assert_eq!(foreign.pattern, SubsetPattern::PlainCondition);
        assert!(foreign.is_replaceable);
        assert_eq!(
            SubsetState::inspect(Some("SELECT * FROM t WHERE a = 1")).pattern,
            SubsetPattern::WhereClausePattern
        );
    }
}

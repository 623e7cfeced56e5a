//! Small filter expression tree, serialized to SQL text only at the boundary.

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FilterExpr {
    /// `function(target, source)`, optionally compared (`= 1` for Spatialite).
    Predicate {
        function: &'static str,
        target: String,
        source: String,
        comparison: Option<&'static str>,
    },
    Exists {
        relation: String,
        alias: String,
        conditions: Vec<FilterExpr>,
    },
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
    /// Emitted verbatim; the caller guarantees it binds tighter than AND.
    Raw(String),
    /// Emitted in parentheses.
    Group(String),
}

impl FilterExpr {
    pub(crate) fn predicate(function: &'static str, target: &str, source: &str) -> Self {
        Self::Predicate {
            function,
            target: target.to_string(),
            source: source.to_string(),
            comparison: None,
        }
    }

    pub(crate) fn to_sql(&self) -> String {
        match self {
            Self::Predicate {
                function,
                target,
                source,
                comparison,
            } => match comparison {
                Some(comparison) => format!("{function}({target}, {source}) {comparison}"),
                None => format!("{function}({target}, {source})"),
            },
            Self::Exists {
                relation,
                alias,
                conditions,
            } => format!(
                "EXISTS (SELECT 1 FROM {relation} AS {alias} WHERE {})",
                render_and(conditions)
            ),
            Self::And(items) => render_and(items),
            Self::Or(items) => render_or(items),
            Self::Raw(sql) => sql.clone(),
            Self::Group(sql) => format!("({sql})"),
        }
    }
}

fn render_and(items: &[FilterExpr]) -> String {
    match items {
        [] => "TRUE".to_string(),
        [single] => single.to_sql(),
        _ => items
            .iter()
            .map(|item| match item {
                FilterExpr::Or(inner) if inner.len() > 1 => format!("({})", item.to_sql()),
                _ => item.to_sql(),
            })
            .collect::<Vec<_>>()
            .join(" AND "),
    }
}

fn render_or(items: &[FilterExpr]) -> String {
    match items {
        [] => "FALSE".to_string(),
        [single] => single.to_sql(),
        _ => items
            .iter()
            .map(|item| match item {
                FilterExpr::And(inner) if inner.len() > 1 => format!("({})", item.to_sql()),
                _ => item.to_sql(),
            })
            .collect::<Vec<_>>()
            .join(" OR "),
    }
}

#[cfg(test)]
mod tests {
    use super::FilterExpr;

    #[test]
    fn single_predicate_has_no_parens() {
        let expr = FilterExpr::Or(vec![FilterExpr::predicate(
            "ST_Intersects",
            "\"geom\"",
            "__source.\"geom\"",
        )]);
        assert_eq!(expr.to_sql(), "ST_Intersects(\"geom\", __source.\"geom\")");
    }

    #[test]
    fn or_inside_exists_is_parenthesized_next_to_other_conditions() {
        let expr = FilterExpr::Exists {
            relation: "\"public\".\"zones\"".to_string(),
            alias: "__source".to_string(),
            conditions: vec![
                FilterExpr::Or(vec![
                    FilterExpr::predicate("ST_Within", "\"geom\"", "__source.\"geom\""),
                    FilterExpr::predicate("ST_Intersects", "\"geom\"", "__source.\"geom\""),
                ]),
                FilterExpr::Group("\"kind\" = 'park'".to_string()),
            ],
        };
        assert_eq!(
            expr.to_sql(),
            "EXISTS (SELECT 1 FROM \"public\".\"zones\" AS __source WHERE \
             (ST_Within(\"geom\", __source.\"geom\") OR ST_Intersects(\"geom\", __source.\"geom\")) \
             AND (\"kind\" = 'park'))"
        );
    }

    #[test]
    fn spatialite_comparison_suffix() {
        let expr = FilterExpr::Predicate {
            function: "Intersects",
            target: "\"geometry\"".to_string(),
            source: "MakeValid(GeomFromText('POINT(1 2)', 2154))".to_string(),
            comparison: Some("= 1"),
        };
        assert_eq!(
            expr.to_sql(),
            "Intersects(\"geometry\", MakeValid(GeomFromText('POINT(1 2)', 2154))) = 1"
        );
    }
}

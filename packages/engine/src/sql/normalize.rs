//! Reconciles a filter with the target table before it is applied.
//!
//! QGIS treats field names case-insensitively while PostgreSQL does not, and
//! text columns compared to numeric literals raise "operator does not exist".
//! Both are fixed on the parsed expression; unparsable input is left alone.

use std::ops::ControlFlow;

use sqlparser::ast::{
    BinaryOperator, CastKind, DataType, ExactNumberInfo, Expr, Ident, Query, SetExpr, Statement,
    UnaryOperator, Value as SqlValue, VisitMut, VisitorMut,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::FieldInfo;

pub fn normalize_filter_for_table(expression: &str, table: &str, fields: &[FieldInfo]) -> String {
    if fields.is_empty() || expression.trim().is_empty() {
        return expression.to_string();
    }
    let Some(mut selection) = parse_selection(expression) else {
        tracing::debug!("filter is not parsable, skipping column normalization");
        return expression.to_string();
    };

    let mut visitor = ColumnNormalizer {
        table,
        fields,
        query_depth: 0,
        changed: false,
    };
    let _ = VisitMut::visit(&mut selection, &mut visitor);
    if visitor.changed {
        selection.to_string()
    } else {
        expression.to_string()
    }
}

fn parse_selection(expression: &str) -> Option<Expr> {
    let sql = format!("SELECT 1 FROM filtermate_target WHERE {expression}");
    let mut statements = Parser::parse_sql(&PostgreSqlDialect {}, &sql).ok()?;
    if statements.len() != 1 {
        return None;
    }
    let Statement::Query(query) = statements.remove(0) else {
        return None;
    };
    let SetExpr::Select(select) = *query.body else {
        return None;
    };
    select.selection
}

struct ColumnNormalizer<'a> {
    table: &'a str,
    fields: &'a [FieldInfo],
    query_depth: usize,
    changed: bool,
}

impl ColumnNormalizer<'_> {
    fn field_for(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|field| field.name == name).or_else(|| {
            self.fields
                .iter()
                .find(|field| field.name.eq_ignore_ascii_case(name))
        })
    }

    fn normalize_ident(&mut self, ident: &mut Ident) {
        let Some(field) = self.field_for(&ident.value) else {
            return;
        };
        let needs_quote = ident.quote_style.is_none() && field.name != field.name.to_lowercase();
        if field.name != ident.value || needs_quote {
            ident.value = field.name.clone();
            ident.quote_style = Some('"');
            self.changed = true;
        }
    }

    fn column_of<'e>(&self, expr: &'e Expr) -> Option<&'e Ident> {
        match expr {
            Expr::Identifier(ident) => Some(ident),
            Expr::CompoundIdentifier(parts) if self.qualifies_target(parts) => parts.last(),
            _ => None,
        }
    }

    fn qualifies_target(&self, parts: &[Ident]) -> bool {
        parts.len() >= 2 && parts[parts.len() - 2].value.eq_ignore_ascii_case(self.table)
    }

    fn is_text_column(&self, expr: &Expr) -> bool {
        self.column_of(expr)
            .and_then(|ident| self.field_for(&ident.value))
            .is_some_and(|field| field.kind.is_textual())
    }
}

impl VisitorMut for ColumnNormalizer<'_> {
    type Break = ();

    fn pre_visit_query(&mut self, _query: &mut Query) -> ControlFlow<Self::Break> {
        self.query_depth += 1;
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &mut Query) -> ControlFlow<Self::Break> {
        self.query_depth -= 1;
        ControlFlow::Continue(())
    }

    fn post_visit_expr(&mut self, expr: &mut Expr) -> ControlFlow<Self::Break> {
        // Subqueries read other tables; their columns are not the target's.
        if self.query_depth > 0 {
            return ControlFlow::Continue(());
        }
        match expr {
            Expr::Identifier(ident) => self.normalize_ident(ident),
            Expr::CompoundIdentifier(parts) => {
                if self.qualifies_target(parts) {
                    if let Some(last) = parts.last_mut() {
                        self.normalize_ident(last);
                    }
                }
            }
            Expr::BinaryOp { left, op, right } if is_comparison(op) => {
                if self.is_text_column(left) && is_numeric_literal(right) {
                    cast_to_numeric(left);
                    self.changed = true;
                } else if self.is_text_column(right) && is_numeric_literal(left) {
                    cast_to_numeric(right);
                    self.changed = true;
                }
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

fn is_comparison(op: &BinaryOperator) -> bool {
    matches!(
        op,
        BinaryOperator::Eq
            | BinaryOperator::NotEq
            | BinaryOperator::Lt
            | BinaryOperator::LtEq
            | BinaryOperator::Gt
            | BinaryOperator::GtEq
    )
}

fn is_numeric_literal(expr: &Expr) -> bool {
    match expr {
        Expr::Value(value) => matches!(value.value, SqlValue::Number(..)),
        Expr::UnaryOp {
            op: UnaryOperator::Minus | UnaryOperator::Plus,
            expr,
        } => is_numeric_literal(expr),
        Expr::Nested(inner) => is_numeric_literal(inner),
        _ => false,
    }
}

fn cast_to_numeric(expr: &mut Box<Expr>) {
    let inner = std::mem::replace(expr.as_mut(), Expr::Value(SqlValue::Null.into()));
    **expr = Expr::Cast {
        kind: CastKind::DoubleColon,
        expr: Box::new(inner),
        data_type: DataType::Numeric(ExactNumberInfo::None),
        format: None,
    };
}

#[cfg(test)]
mod tests {
    use super::normalize_filter_for_table;
    use crate::{FieldInfo, FieldKind};

    fn fields() -> Vec<FieldInfo> {
        vec![
            FieldInfo::new("NomCommune", FieldKind::Text),
            FieldInfo::new("code_postal", FieldKind::Text),
            FieldInfo::new("population", FieldKind::Integer),
        ]
    }

    #[test]
    fn fixes_identifier_case() {
        let out = normalize_filter_for_table("\"nomcommune\" = 'Lyon'", "communes", &fields());
        assert_eq!(out, "\"NomCommune\" = 'Lyon'");
    }

    #[test]
    fn casts_text_columns_compared_to_numbers() {
        let out = normalize_filter_for_table("\"code_postal\" > 69000", "communes", &fields());
        assert_eq!(out, "\"code_postal\"::NUMERIC > 69000");
    }

    #[test]
    fn leaves_matching_filters_untouched() {
        let filter = "\"population\" > 1000 AND ST_Intersects(\"geom\", __source.\"geom\")";
        assert_eq!(normalize_filter_for_table(filter, "communes", &fields()), filter);
    }

    #[test]
    fn ignores_columns_inside_subqueries() {
        let filter = "EXISTS (SELECT 1 FROM \"public\".\"zones\" AS __source WHERE __source.\"nomcommune\" = 'x')";
        assert_eq!(normalize_filter_for_table(filter, "communes", &fields()), filter);
    }

    #[test]
    fn unparsable_input_is_returned_as_is() {
        let filter = "\"nomcommune\" = = 'x'";
        assert_eq!(normalize_filter_for_table(filter, "communes", &fields()), filter);
    }
}

use std::future::Future;

use crate::backend::SqlConnection;
use crate::combine::contains_exists_clause;
use crate::request::FilterRequest;
use crate::FilterMateError;

/// Per-row buffer expressions evaluated inside chained EXISTS subqueries.
/// This combination is what freezes the UI for minutes.
pub fn is_complex_query(request: &FilterRequest) -> bool {
    request.buffer.has_dynamic_expression()
        && request
            .source_filter()
            .is_some_and(contains_exists_clause)
}

/// Runs `work` under `statement_timeout`. The timeout is reset afterwards
/// whatever the outcome, so it never leaks onto later statements of a
/// pooled connection.
pub async fn with_statement_timeout<T, F>(
    connection: &dyn SqlConnection,
    timeout_ms: u64,
    work: F,
) -> Result<T, FilterMateError>
where
    F: Future<Output = Result<T, FilterMateError>>,
{
    connection
        .execute(&format!("SET statement_timeout = {timeout_ms}"), &[])
        .await?;
    let result = work.await;
    if let Err(error) = connection.execute("RESET statement_timeout", &[]).await {
        tracing::warn!(%error, "could not reset statement_timeout");
    }
    result
}

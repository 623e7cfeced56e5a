use std::sync::Arc;

use async_trait::async_trait;

use crate::{FilterMateError, LayerProps, QueryResult, Value};

/// A live database connection owned by the caller.
///
/// Statements executed through one connection share its session state
/// (`statement_timeout`, open transaction), so the engine may run several
/// statements in one filtering pass and then `commit` or `rollback`.
#[async_trait(?Send)]
pub trait SqlConnection: Send + Sync {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult, FilterMateError>;

    async fn commit(&self) -> Result<(), FilterMateError> {
        Ok(())
    }

    async fn rollback(&self) -> Result<(), FilterMateError> {
        Ok(())
    }
}

pub struct LayerConnection {
    pub connection: Arc<dyn SqlConnection>,
    pub source_uri: String,
}

#[async_trait(?Send)]
pub trait ConnectionProvider: Send + Sync {
    async fn connection_for_layer(
        &self,
        layer: &LayerProps,
    ) -> Result<LayerConnection, FilterMateError>;
}

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use filtermate_engine::errors::database_error;
use filtermate_engine::sql::split_statements;
use filtermate_engine::{FilterMateError, QueryResult, SqlConnection, Value};
use rusqlite::{params_from_iter, Connection, Row};

pub struct SqliteConnection {
    conn: Mutex<Connection>,
}

impl SqliteConnection {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FilterMateError> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .map_err(|err| database_error(&format!("opening {}", path.display()), err))?;
        tracing::debug!(path = %path.display(), "opened sqlite database");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, FilterMateError> {
        let conn = Connection::open_in_memory()
            .map_err(|err| database_error("opening in-memory database", err))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, FilterMateError> {
        self.conn
            .lock()
            .map_err(|_| FilterMateError::unknown("sqlite mutex poisoned"))
    }

    /// Ends the open transaction, if any. Autocommit mode has nothing to end.
    fn finish_transaction(&self, statement: &str) -> Result<(), FilterMateError> {
        let conn = self.lock()?;
        if conn.is_autocommit() {
            return Ok(());
        }
        conn.execute_batch(statement)
            .map_err(|err| database_error(statement, err))
    }
}

#[async_trait(?Send)]
impl SqlConnection for SqliteConnection {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult, FilterMateError> {
        let conn = self.lock()?;

        if params.is_empty() && split_statements(sql).len() > 1 {
            conn.execute_batch(sql)
                .map_err(|err| database_error(sql, err))?;
            return Ok(QueryResult::default());
        }

        let mut stmt = conn.prepare(sql).map_err(|err| database_error(sql, err))?;
        let columns = stmt
            .column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect::<Vec<_>>();
        let bound_params = params.iter().cloned().map(to_sql_value);
        let mut rows = stmt
            .query(params_from_iter(bound_params))
            .map_err(|err| database_error(sql, err))?;
        let mut result_rows = Vec::new();
        while let Some(row) = rows.next().map_err(|err| database_error(sql, err))? {
            result_rows.push(map_row(row)?);
        }
        Ok(QueryResult {
            rows: result_rows,
            columns,
        })
    }

    async fn commit(&self) -> Result<(), FilterMateError> {
        self.finish_transaction("COMMIT")
    }

    async fn rollback(&self) -> Result<(), FilterMateError> {
        self.finish_transaction("ROLLBACK")
    }
}

fn map_row(row: &Row<'_>) -> Result<Vec<Value>, FilterMateError> {
    let mut values = Vec::new();
    for idx in 0..row.as_ref().column_count() {
        let value = row
            .get_ref(idx)
            .map_err(|err| database_error("reading column", err))?;
        values.push(match value {
            rusqlite::types::ValueRef::Null => Value::Null,
            rusqlite::types::ValueRef::Integer(value) => Value::Integer(value),
            rusqlite::types::ValueRef::Real(value) => Value::Real(value),
            rusqlite::types::ValueRef::Text(value) | rusqlite::types::ValueRef::Blob(value) => {
                Value::Text(String::from_utf8_lossy(value).to_string())
            }
        });
    }
    Ok(values)
}

fn to_sql_value(value: Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Boolean(value) => rusqlite::types::Value::Integer(i64::from(value)),
        Value::Integer(value) => rusqlite::types::Value::Integer(value),
        Value::Real(value) => rusqlite::types::Value::Real(value),
        Value::Text(value) => rusqlite::types::Value::Text(value),
    }
}

#[cfg(test)]
mod tests {
    use filtermate_engine::{SqlConnection, Value};

    use super::SqliteConnection;

    #[tokio::test]
    async fn rows_map_to_engine_values() {
        let connection = SqliteConnection::in_memory().expect("in-memory database should open");
        let result = connection
            .execute("SELECT 1, 2.5, 'x', NULL, ?", &[Value::Boolean(true)])
            .await
            .expect("select should succeed");

        assert_eq!(
            result.rows,
            vec![vec![
                Value::Integer(1),
                Value::Real(2.5),
                Value::Text("x".to_string()),
                Value::Null,
                Value::Integer(1),
            ]]
        );
    }

    #[tokio::test]
    async fn semicolons_inside_literals_still_return_rows() {
        let connection = SqliteConnection::in_memory().expect("in-memory database should open");
        let result = connection
            .execute("SELECT '\"kind\" = ''a;b''' AS subset;", &[])
            .await
            .expect("select should succeed");

        assert_eq!(result.columns, vec!["subset".to_string()]);
        assert_eq!(result.rows, vec![vec![Value::Text("\"kind\" = 'a;b'".to_string())]]);
    }

    #[tokio::test]
    async fn commit_without_transaction_is_a_no_op() {
        let connection = SqliteConnection::in_memory().expect("in-memory database should open");
        connection.commit().await.expect("commit should succeed");
        connection.rollback().await.expect("rollback should succeed");
    }

    #[tokio::test]
    async fn rollback_discards_open_transaction() {
        let connection = SqliteConnection::in_memory().expect("in-memory database should open");
        connection
            .execute("CREATE TABLE t (id INTEGER)", &[])
            .await
            .expect("create should succeed");
        connection
            .execute("BEGIN; INSERT INTO t VALUES (1);", &[])
            .await
            .expect("batch should succeed");
        connection.rollback().await.expect("rollback should succeed");

        let count = connection
            .execute("SELECT COUNT(*) FROM t", &[])
            .await
            .expect("count should succeed");
        assert_eq!(count.rows[0][0], Value::Integer(0));
    }

    #[tokio::test]
    async fn errors_carry_the_database_code() {
        let connection = SqliteConnection::in_memory().expect("in-memory database should open");
        let error = connection
            .execute("SELECT * FROM missing_table", &[])
            .await
            .expect_err("missing table should fail");
        assert_eq!(error.code, "FILTERMATE_ERROR_DATABASE");
        assert!(error.description.contains("missing_table"));
    }
}

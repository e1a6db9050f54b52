//! SQLite executor.

use async_trait::async_trait;
use rowscope_rls::{ExecError, Executor, Row};
use serde_json::Value;
use sqlx::sqlite::{SqliteArguments, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Arguments, Column, Row as _, TypeInfo, ValueRef};

use crate::{db_error, number_arg};

fn args_add<'q, T>(args: &mut SqliteArguments<'q>, v: T) -> anyhow::Result<()>
where
    T: 'q + sqlx::Encode<'q, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    args.add(v).map_err(|e| anyhow::anyhow!(e))
}

fn bind_args<'q>(values: &[Value]) -> anyhow::Result<SqliteArguments<'q>> {
    let mut args = SqliteArguments::default();
    for v in values {
        match v {
            Value::Null => args_add(&mut args, Option::<String>::None)?,
            Value::Bool(b) => args_add(&mut args, *b)?,
            Value::Number(n) => match n.as_i64() {
                Some(i) => args_add(&mut args, i)?,
                None => args_add(&mut args, number_arg(n)?)?,
            },
            Value::String(s) => args_add(&mut args, s.clone())?,
            other => args_add(&mut args, sqlx::types::Json(other.clone()))?,
        }
    }
    Ok(args)
}

/// Values are decoded by their storage class, not the declared column type.
fn decode_row(row: &SqliteRow) -> Result<Row, sqlx::Error> {
    let mut out = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" => Value::from(row.try_get::<i64, _>(i)?),
                "REAL" => Value::from(row.try_get::<f64, _>(i)?),
                "BLOB" => Value::from(row.try_get::<Vec<u8>, _>(i)?),
                _ => Value::from(row.try_get::<String, _>(i)?),
            }
        };
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

pub struct SqliteExecutor {
    pool: SqlitePool,
}

impl SqliteExecutor {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect with a single pooled connection, so `sqlite::memory:`
    /// databases persist across calls.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Executor for SqliteExecutor {
    fn driver_name(&self) -> &str {
        "sqlite"
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> Result<u64, ExecError> {
        let args = bind_args(args)?;
        let result = sqlx::query_with(sql, args)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>, ExecError> {
        let args = bind_args(args)?;
        let rows = sqlx::query_with(sql, args)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        tracing::debug!(rows = rows.len(), "Fetched rows");
        rows.iter()
            .map(decode_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_round_trips_json_arguments() {
        let db = SqliteExecutor::connect("sqlite::memory:").await.unwrap();
        let rows = db
            .fetch_all(
                "SELECT ? AS i, ? AS f, ? AS s, ? AS n, ? AS b",
                &[json!(7), json!(1.5), json!("x"), Value::Null, json!(true)],
            )
            .await
            .unwrap();
        let row = &rows[0];
        assert_eq!(row["i"], json!(7));
        assert_eq!(row["f"], json!(1.5));
        assert_eq!(row["s"], json!("x"));
        assert_eq!(row["n"], Value::Null);
        // SQLite stores booleans as integers.
        assert_eq!(row["b"], json!(1));
    }

    #[tokio::test]
    async fn test_database_error_is_wrapped() {
        let db = SqliteExecutor::connect("sqlite::memory:").await.unwrap();
        let err = db.execute("DELETE FROM missing", &[]).await.unwrap_err();
        assert!(matches!(err, ExecError::Database(_)));
    }
}

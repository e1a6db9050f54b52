//! Postgres executor.
//!
//! Parameters are sent with the type implied by their JSON value (`INT8`,
//! `FLOAT8`, `TEXT`, `BOOL`, `JSONB`). Columns of other types must be cast
//! in the query text, e.g. `id = $1::uuid`.

use async_trait::async_trait;
use rowscope_rls::{ExecError, Executor, Row};
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::{Arguments, Column, Row as _, TypeInfo, ValueRef};

use crate::{db_error, number_arg};

fn args_add<T>(args: &mut PgArguments, v: T) -> anyhow::Result<()>
where
    T: Send + Sync + 'static,
    for<'q> T: sqlx::Encode<'q, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    args.add(v).map_err(|e| anyhow::anyhow!(e))
}

fn bind_args(values: &[Value]) -> anyhow::Result<PgArguments> {
    let mut args = PgArguments::default();
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

fn decode_row(row: &PgRow) -> Result<Row, sqlx::Error> {
    let mut out = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            match raw.type_info().name() {
                "INT2" => Value::from(row.try_get::<i16, _>(i)?),
                "INT4" => Value::from(row.try_get::<i32, _>(i)?),
                "INT8" => Value::from(row.try_get::<i64, _>(i)?),
                "FLOAT4" => Value::from(row.try_get::<f32, _>(i)?),
                "FLOAT8" => Value::from(row.try_get::<f64, _>(i)?),
                "BOOL" => Value::from(row.try_get::<bool, _>(i)?),
                "UUID" => Value::from(row.try_get::<uuid::Uuid, _>(i)?.to_string()),
                "JSON" | "JSONB" => row.try_get::<sqlx::types::Json<Value>, _>(i)?.0,
                "TIMESTAMPTZ" => Value::from(
                    row.try_get::<chrono::DateTime<chrono::Utc>, _>(i)?
                        .to_rfc3339(),
                ),
                "TIMESTAMP" => Value::from(row.try_get::<chrono::NaiveDateTime, _>(i)?.to_string()),
                "DATE" => Value::from(row.try_get::<chrono::NaiveDate, _>(i)?.to_string()),
                "BYTEA" => Value::from(row.try_get::<Vec<u8>, _>(i)?),
                _ => Value::from(row.try_get::<String, _>(i)?),
            }
        };
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

pub struct PostgresExecutor {
    pool: PgPool,
}

impl PostgresExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Executor for PostgresExecutor {
    fn driver_name(&self) -> &str {
        "postgres"
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

    #[test]
    fn test_binds_every_json_type() {
        let args = bind_args(&[
            json!(1),
            json!(2.5),
            json!("a"),
            Value::Null,
            json!(false),
            json!({"k": [1, 2]}),
        ])
        .unwrap();
        assert_eq!(args.len(), 6);
    }
}

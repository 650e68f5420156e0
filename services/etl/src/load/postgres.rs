//! Postgres warehouse: one transaction per load
//!
//! Statements are built from the table's introspected column types. Every
//! value is bound as text and cast server-side (`CAST($n AS <udt>)`), so
//! one code path serves integer, date, timestamp and boolean columns.

use super::{CommittedOrder, Warehouse};
use crate::rows::Value;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use tracing::debug;

pub struct PgWarehouse {
    tx: Transaction<'static, Postgres>,
    /// table -> column -> udt name
    column_types: HashMap<String, HashMap<String, String>>,
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn checked(name: &str) -> Result<&str> {
    if !is_identifier(name) {
        anyhow::bail!("Invalid warehouse identifier '{}'", name);
    }
    Ok(name)
}

impl PgWarehouse {
    pub async fn begin(pool: &PgPool) -> Result<Self> {
        let tx = pool
            .begin()
            .await
            .context("Failed to open warehouse transaction")?;
        debug!("warehouse transaction opened");
        Ok(Self {
            tx,
            column_types: HashMap::new(),
        })
    }

    async fn types_of(&mut self, table: &str) -> Result<HashMap<String, String>> {
        if let Some(types) = self.column_types.get(table) {
            return Ok(types.clone());
        }
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT column_name::text, udt_name::text
            FROM information_schema.columns
            WHERE table_schema = current_schema() AND table_name = $1
            ORDER BY ordinal_position
            "#,
        )
        .bind(table)
        .fetch_all(&mut *self.tx)
        .await?;

        let types: HashMap<String, String> = rows.into_iter().collect();
        self.column_types.insert(table.to_string(), types.clone());
        Ok(types)
    }
}

/// `CAST($n AS <udt>)` for a column, text when the type is unknown
fn placeholder(types: &HashMap<String, String>, column: &str, n: usize) -> String {
    let udt = types
        .get(column)
        .map(String::as_str)
        .filter(|t| is_identifier(t))
        .unwrap_or("text");
    format!("CAST(${n} AS {udt})")
}

#[async_trait]
impl Warehouse for PgWarehouse {
    async fn table_columns(&mut self, table: &str) -> Result<Vec<String>> {
        let table = checked(table)?;
        Ok(self.types_of(table).await?.into_keys().collect())
    }

    async fn insert_if_absent(
        &mut self,
        table: &str,
        key: &[&str],
        record: &[(&'static str, Value)],
    ) -> Result<bool> {
        let table = checked(table)?;
        let types = self.types_of(table).await?;
        let cell = |column: &str| {
            record
                .iter()
                .find(|(c, _)| *c == column)
                .and_then(|(_, v)| v.as_text())
        };

        let mut conditions = Vec::with_capacity(key.len());
        for (i, column) in key.iter().enumerate() {
            let column = checked(column)?;
            conditions.push(format!(
                "{column} IS NOT DISTINCT FROM {}",
                placeholder(&types, column, i + 1)
            ));
        }
        let exists_sql = format!(
            "SELECT 1 FROM {table} WHERE {} LIMIT 1",
            conditions.join(" AND ")
        );
        let mut exists = sqlx::query(&exists_sql);
        for column in key {
            exists = exists.bind(cell(*column));
        }
        if exists.fetch_optional(&mut *self.tx).await?.is_some() {
            return Ok(false);
        }

        let mut columns = Vec::with_capacity(record.len());
        let mut values = Vec::with_capacity(record.len());
        for (i, (column, _)) in record.iter().enumerate() {
            let column = checked(column)?;
            columns.push(column);
            values.push(placeholder(&types, column, i + 1));
        }
        let insert_sql = format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            columns.join(", "),
            values.join(", ")
        );
        let mut insert = sqlx::query(&insert_sql);
        for (_, value) in record {
            insert = insert.bind(value.as_text());
        }
        insert.execute(&mut *self.tx).await?;
        Ok(true)
    }

    async fn key_map(&mut self, table: &str, natural: &str, surrogate: &str) -> Result<HashMap<String, i64>> {
        let (table, natural, surrogate) = (checked(table)?, checked(natural)?, checked(surrogate)?);
        let sql = format!(
            "SELECT {natural}::text, {surrogate}::int8 FROM {table} WHERE {natural} IS NOT NULL AND {surrogate} IS NOT NULL"
        );
        let rows: Vec<(String, i64)> = sqlx::query_as(&sql).fetch_all(&mut *self.tx).await?;
        Ok(rows.into_iter().collect())
    }

    async fn committed_orders(&mut self) -> Result<HashMap<i64, CommittedOrder>> {
        let rows: Vec<(i64, Option<String>, Option<String>, Option<NaiveDateTime>)> = sqlx::query_as(
            "SELECT order_id::int8, customer_code::text, employee_code::text, order_date::timestamp FROM dim_order",
        )
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, customer_code, employee_code, order_date)| {
                (
                    id,
                    CommittedOrder {
                        customer_code,
                        employee_code,
                        order_date,
                    },
                )
            })
            .collect())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await.context("Failed to commit warehouse transaction")
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await.context("Failed to roll back warehouse transaction")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_uses_column_type() {
        let types = HashMap::from([
            ("date_key".to_string(), "int4".to_string()),
            ("odd".to_string(), "int4; drop".to_string()),
        ]);
        assert_eq!(placeholder(&types, "date_key", 1), "CAST($1 AS int4)");
        assert_eq!(placeholder(&types, "missing", 2), "CAST($2 AS text)");
        assert_eq!(placeholder(&types, "odd", 3), "CAST($3 AS text)");
    }

    #[test]
    fn test_identifier_check() {
        assert!(checked("fact_orders").is_ok());
        assert!(checked("fact_orders; drop table x").is_err());
        assert!(checked("").is_err());
    }
}

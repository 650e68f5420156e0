//! Run ledger (`etl_runs`)
//!
//! Written outside the load transaction so a failed run is still recorded.

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

/// Create run row with status `running`
pub async fn create_run(pool: &PgPool, detail: serde_json::Value) -> Result<Uuid> {
    let run_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO etl_runs (run_id, component, status, detail)
        VALUES ($1, 'etl', 'running', $2)
        "#,
    )
    .bind(run_id)
    .bind(detail)
    .execute(pool)
    .await?;
    Ok(run_id)
}

/// Finish run
pub async fn finish_run(
    pool: &PgPool,
    run_id: Uuid,
    status: &str,
    error: Option<&str>,
    detail: serde_json::Value,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE etl_runs
        SET finished_at = now(), status = $2, error = $3, detail = detail || $4
        WHERE run_id = $1
        "#,
    )
    .bind(run_id)
    .bind(status)
    .bind(error)
    .bind(detail)
    .execute(pool)
    .await?;
    Ok(())
}

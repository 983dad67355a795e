//! PostgreSQL result sink.
//!
//! A day is written in one transaction: previous rows for the same day are
//! replaced, so rerunning a day is safe.

use chrono::NaiveDate;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use crate::pipeline::DayReport;

/// Create a PostgreSQL connection pool.
pub async fn create_pool(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(database_url)
        .await?;

    tracing::info!(max_connections, "Connected to PostgreSQL");
    Ok(pool)
}

#[derive(Debug, Clone)]
pub struct PgSink {
    pool: PgPool,
}

impl PgSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Replace everything stored for `report.day` with the report's rows.
    pub async fn write_day(&self, run_id: Uuid, report: &DayReport) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM trajectories WHERE snapshot_date = $1")
            .bind(report.day)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM volatility WHERE snapshot_date = $1")
            .bind(report.day)
            .execute(&mut *tx)
            .await?;

        for row in &report.trajectories {
            sqlx::query(
                r#"
                INSERT INTO trajectories (run_id, snapshot_date, user_address, block_number, block_timestamp,
                                          liquidation_probability_p1, liquidation_probability_p2, health_factor)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(run_id)
            .bind(report.day)
            .bind(&row.user)
            .bind(row.block_number as i64)
            .bind(row.timestamp)
            .bind(row.liquidation_probability_p1)
            .bind(row.liquidation_probability_p2)
            .bind(row.health_factor)
            .execute(&mut *tx)
            .await?;
        }

        for entry in &report.volatility {
            sqlx::query(
                r#"
                INSERT INTO volatility (run_id, snapshot_date, pair1, pair2, value)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(run_id)
            .bind(report.day)
            .bind(entry.pair1.as_str())
            .bind(entry.pair2.as_str())
            .bind(entry.value)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO run_days (snapshot_date, run_id, users_evaluated, users_failed)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (snapshot_date) DO UPDATE
            SET run_id = $2, users_evaluated = $3, users_failed = $4, completed_at = NOW()
            "#,
        )
        .bind(report.day)
        .bind(run_id)
        .bind(report.users_evaluated as i32)
        .bind(report.users_failed as i32)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            day = %report.day,
            run_id = %run_id,
            trajectories = report.trajectories.len(),
            volatility = report.volatility.len(),
            "Day written"
        );
        Ok(())
    }

    /// Whether `day` has already been written by any run.
    pub async fn is_day_completed(&self, day: NaiveDate) -> anyhow::Result<bool> {
        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT run_id FROM run_days WHERE snapshot_date = $1")
                .bind(day)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.is_some())
    }
}

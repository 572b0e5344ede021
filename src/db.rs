use std::future::Future;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Acquire, PgPool, Postgres, Row, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{StoreError, StoreResult};
use crate::models::{AcademicPeriod, EvaluationComponent, EvaluationKey, LinkedActivities};
use crate::store::{EvaluationScope, EvaluationStore};
use crate::weights::round2;

pub async fn connect(config: &Config) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.request_timeout)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;
    info!(max_connections = config.max_connections, "connected to Postgres");
    Ok(pool)
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO evaluation_weights.periods (code, is_current)
        VALUES ($1, TRUE)
        ON CONFLICT (code) DO UPDATE SET is_current = TRUE
        "#,
    )
    .bind("20252")
    .execute(pool)
    .await?;

    let components = vec![
        (
            Uuid::parse_str("6f1c2a8e-5b0d-4c47-9d7e-1f2a3b4c5d6e")?,
            "Midterm exam",
            4.0,
        ),
        (
            Uuid::parse_str("a2b3c4d5-e6f7-4a8b-9c0d-1e2f3a4b5c6d")?,
            "Homework",
            3.0,
        ),
    ];

    for (id, name, weight) in components {
        sqlx::query(
            r#"
            INSERT INTO evaluation_weights.components
            (id, course_code, teacher_code, partial, period, name, weight)
            VALUES ($1, $2, $3, $4, $5, $6, $7::float8::numeric(5,2))
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name, weight = EXCLUDED.weight
            "#,
        )
        .bind(id)
        .bind("MAT101")
        .bind("DOC-014")
        .bind(1_i32)
        .bind("20252")
        .bind(name)
        .bind(weight)
        .execute(pool)
        .await?;
    }

    let homework_id = Uuid::parse_str("a2b3c4d5-e6f7-4a8b-9c0d-1e2f3a4b5c6d")?;
    sqlx::query(
        r#"
        INSERT INTO evaluation_weights.activities (id, component_id, name)
        VALUES ($1, $2, $3)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(Uuid::parse_str("0b1c2d3e-4f50-4617-8293-a4b5c6d7e8f9")?)
    .bind(homework_id)
    .bind("Homework 1: limits")
    .execute(pool)
    .await?;

    Ok(())
}

async fn with_timeout<T, F>(limit: Duration, call: F) -> StoreResult<T>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(StoreError::from),
        Err(_) => Err(StoreError::Timeout(limit.as_secs())),
    }
}

/// Failures opening or releasing a transaction. Timeouts keep their identity.
fn scope_failure(err: StoreError) -> StoreError {
    match err {
        StoreError::Timeout(_) | StoreError::Transaction(_) => err,
        other => StoreError::Transaction(other.to_string()),
    }
}

/// Postgres-backed evaluation store. Every call is bounded by the
/// request-level timeout.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    timeout: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }
}

fn component_rows(rows: Vec<sqlx::postgres::PgRow>) -> Vec<EvaluationComponent> {
    rows.into_iter()
        .map(|row| EvaluationComponent {
            id: row.get("id"),
            name: row.get("name"),
            weight: row.get("weight"),
        })
        .collect()
}

fn activity_names(rows: Vec<sqlx::postgres::PgRow>) -> LinkedActivities {
    LinkedActivities::from_names(rows.into_iter().map(|row| row.get("name")).collect())
}

const LINKED_ACTIVITIES: &str =
    "SELECT name FROM evaluation_weights.activities WHERE component_id = $1 ORDER BY name";

#[async_trait]
impl EvaluationStore for PgStore {
    async fn fetch_current_period(&self) -> StoreResult<Option<AcademicPeriod>> {
        let row = with_timeout(
            self.timeout,
            sqlx::query(
                "SELECT code FROM evaluation_weights.periods \
                 WHERE is_current ORDER BY code DESC LIMIT 1",
            )
            .fetch_optional(&self.pool),
        )
        .await?;

        match row {
            Some(row) => {
                let code: String = row.get("code");
                AcademicPeriod::parse(&code)
                    .map(Some)
                    .ok_or_else(|| StoreError::Query(format!("malformed current period {code}")))
            }
            None => Ok(None),
        }
    }

    async fn fetch_components(&self, key: &EvaluationKey) -> StoreResult<Vec<EvaluationComponent>> {
        let rows = with_timeout(
            self.timeout,
            sqlx::query(
                "SELECT id, name, weight::float8 AS weight \
                 FROM evaluation_weights.components \
                 WHERE course_code = $1 AND teacher_code = $2 AND partial = $3 AND period = $4 \
                 ORDER BY created_at, name",
            )
            .bind(&key.course_code)
            .bind(&key.teacher_code)
            .bind(key.partial)
            .bind(key.period.as_str())
            .fetch_all(&self.pool),
        )
        .await?;
        Ok(component_rows(rows))
    }

    async fn count_linked_activities(&self, id: Uuid) -> StoreResult<LinkedActivities> {
        let rows = with_timeout(
            self.timeout,
            sqlx::query(LINKED_ACTIVITIES).bind(id).fetch_all(&self.pool),
        )
        .await?;
        Ok(activity_names(rows))
    }

    async fn fetch_weight_sum(&self, key: &EvaluationKey) -> StoreResult<f64> {
        let row = with_timeout(
            self.timeout,
            sqlx::query(
                "SELECT COALESCE(SUM(weight), 0)::float8 AS total \
                 FROM evaluation_weights.components \
                 WHERE course_code = $1 AND teacher_code = $2 AND partial = $3 AND period = $4",
            )
            .bind(&key.course_code)
            .bind(&key.teacher_code)
            .bind(key.partial)
            .bind(key.period.as_str())
            .fetch_one(&self.pool),
        )
        .await?;
        Ok(round2(row.get("total")))
    }

    async fn begin<'a>(&'a self) -> StoreResult<Box<dyn EvaluationScope + 'a>> {
        let tx = with_timeout(self.timeout, self.pool.begin())
            .await
            .map_err(scope_failure)?;
        debug!("transaction opened");
        Ok(Box::new(PgScope {
            tx,
            timeout: self.timeout,
        }))
    }
}

/// One Postgres transaction. Each write runs under its own savepoint so a
/// failed statement does not abort the whole transaction. Dropping the
/// scope rolls back.
pub struct PgScope {
    tx: Transaction<'static, Postgres>,
    timeout: Duration,
}

impl PgScope {
    /// Releases the savepoint on success, rolls back to it on failure.
    async fn settle<T>(
        savepoint: Transaction<'_, Postgres>,
        result: StoreResult<T>,
        limit: Duration,
    ) -> StoreResult<T> {
        match result {
            Ok(value) => {
                with_timeout(limit, savepoint.commit()).await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = savepoint.rollback().await {
                    debug!(error = %rollback_err, "savepoint rollback failed");
                    return Err(StoreError::Transaction(rollback_err.to_string()));
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl EvaluationScope for PgScope {
    async fn create_component(
        &mut self,
        key: &EvaluationKey,
        name: &str,
        weight: f64,
    ) -> StoreResult<Uuid> {
        let limit = self.timeout;
        let mut savepoint = with_timeout(limit, Acquire::begin(&mut self.tx))
            .await
            .map_err(scope_failure)?;

        let result = with_timeout(
            limit,
            sqlx::query(
                r#"
                INSERT INTO evaluation_weights.components
                (id, course_code, teacher_code, partial, period, name, weight)
                VALUES ($1, $2, $3, $4, $5, $6, $7::float8::numeric(5,2))
                RETURNING id
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(&key.course_code)
            .bind(&key.teacher_code)
            .bind(key.partial)
            .bind(key.period.as_str())
            .bind(name)
            .bind(weight)
            .fetch_one(&mut *savepoint),
        )
        .await
        .map(|row| row.get::<Uuid, _>("id"));

        Self::settle(savepoint, result, limit).await
    }

    async fn update_component(&mut self, id: Uuid, name: &str, weight: f64) -> StoreResult<()> {
        let limit = self.timeout;
        let mut savepoint = with_timeout(limit, Acquire::begin(&mut self.tx))
            .await
            .map_err(scope_failure)?;

        let result = with_timeout(
            limit,
            sqlx::query(
                "UPDATE evaluation_weights.components \
                 SET name = $2, weight = $3::float8::numeric(5,2), updated_at = NOW() \
                 WHERE id = $1",
            )
            .bind(id)
            .bind(name)
            .bind(weight)
            .execute(&mut *savepoint),
        )
        .await
        .and_then(|done| match done.rows_affected() {
            0 => Err(StoreError::NotFound(format!("component {id}"))),
            _ => Ok(()),
        });

        Self::settle(savepoint, result, limit).await
    }

    async fn delete_component(&mut self, id: Uuid) -> StoreResult<()> {
        let limit = self.timeout;
        let mut savepoint = with_timeout(limit, Acquire::begin(&mut self.tx))
            .await
            .map_err(scope_failure)?;

        let result = with_timeout(
            limit,
            sqlx::query("DELETE FROM evaluation_weights.components WHERE id = $1")
                .bind(id)
                .execute(&mut *savepoint),
        )
        .await
        .and_then(|done| match done.rows_affected() {
            0 => Err(StoreError::NotFound(format!("component {id}"))),
            _ => Ok(()),
        });

        Self::settle(savepoint, result, limit).await
    }

    async fn count_linked_activities(&mut self, id: Uuid) -> StoreResult<LinkedActivities> {
        let rows = with_timeout(
            self.timeout,
            sqlx::query(LINKED_ACTIVITIES).bind(id).fetch_all(&mut *self.tx),
        )
        .await?;
        Ok(activity_names(rows))
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let PgScope { tx, timeout } = *self;
        with_timeout(timeout, tx.commit())
            .await
            .map_err(scope_failure)
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        let PgScope { tx, timeout } = *self;
        with_timeout(timeout, tx.rollback())
            .await
            .map_err(scope_failure)
    }
}

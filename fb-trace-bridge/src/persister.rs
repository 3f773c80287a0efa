use async_trait::async_trait;
use backtraced_error::SqlxError;
use sqlx::PgPool;
use std::time::Duration;
use thiserror::Error;
use trace_structs::TraceEvent;
use tracing::{info, info_span, instrument, Instrument};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Inserting slow log row failed")]
    Db(#[from] SqlxError),
    #[error("Inserting slow log row didn't finish within {0:?}")]
    TimedOut(Duration),
}

/// Where slow statements end up. One call per event, no batching and no de-duplication,
/// inserting the same event twice stores two rows.
#[async_trait]
pub trait SlowLogSink {
    async fn insert(&self, event: &TraceEvent) -> Result<(), PersistError>;
}

pub struct PgSlowLog {
    con: PgPool,
    insert_timeout: Option<Duration>,
}

impl PgSlowLog {
    /// Waiting for a free connection is left to the pool, callers never see exhaustion
    /// unless it outlasts `insert_timeout`.
    pub fn new(con: PgPool, insert_timeout: Option<Duration>) -> Self {
        Self {
            con,
            insert_timeout,
        }
    }

    async fn insert_row(&self, event: &TraceEvent) -> Result<(), SqlxError> {
        sqlx::query(
            "insert into fb_slow_log \
            (event_time, transaction_id, duration_ms, sql_text, user_name, remote_address) \
            values ($1, $2, $3, $4, $5, $6)",
        )
        .bind(event.occurred_at)
        .bind(event.transaction_id)
        .bind(event.duration_ms)
        .bind(&event.statement_text)
        .bind(&event.user)
        .bind(&event.remote_address)
        .execute(&self.con)
        .instrument(info_span!("inserting_fb_slow_log"))
        .await
        .map_err(|e| {
            SqlxError::from_sqlx_error(
                e,
                format!("inserting fb_slow_log for transaction {}", event.transaction_id),
            )
        })?;
        Ok(())
    }
}

#[async_trait]
impl SlowLogSink for PgSlowLog {
    #[instrument(skip_all, fields(transaction_id = event.transaction_id))]
    async fn insert(&self, event: &TraceEvent) -> Result<(), PersistError> {
        with_insert_timeout(self.insert_timeout, self.insert_row(event)).await?;
        info!(
            "Slow log saved: TX {} ({}ms) - IP {}",
            event.transaction_id, event.duration_ms, event.remote_address
        );
        Ok(())
    }
}

async fn with_insert_timeout<F>(limit: Option<Duration>, insert: F) -> Result<(), PersistError>
where
    F: std::future::Future<Output = Result<(), SqlxError>>,
{
    match limit {
        None => insert.await?,
        Some(limit) => tokio::time::timeout(limit, insert)
            .await
            .map_err(|_| PersistError::TimedOut(limit))??,
    }
    Ok(())
}

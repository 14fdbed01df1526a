//! PostgreSQL access for the bot: pooled connections, guarded execution,
//! chat authorization and the interaction log.

pub mod decode;

use crate::config::Settings;
use crate::error::{BotError, Result};
use crate::row::Row;
use crate::sql_guard::{guard_sql, strip_leading_comments};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row as _;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

pub use decode::decode_row;

const MAX_ATTEMPTS: u32 = 3;
const RETRY_STEP: Duration = Duration::from_millis(100);
const MIN_CONNECTIONS: u32 = 5;

/// Runs already-guarded SQL and returns decoded rows.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<Vec<Row>>;
}

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Open the pool and check it with `SELECT 1`.
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let url = settings.require_database_url()?;
        let max = settings.pg_max_connections.max(1);
        let pool = PgPoolOptions::new()
            .min_connections(MIN_CONNECTIONS.min(max))
            .max_connections(max)
            .acquire_timeout(settings.pg_command_timeout)
            .connect(url)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;
        info!("Connected to PostgreSQL (max {} connections)", max);
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Strip leading comments, guard, then execute.
    pub async fn execute_guarded(&self, sql: &str) -> Result<(String, Vec<Row>)> {
        let guarded = guard_sql(strip_leading_comments(sql))?;
        let rows = self.execute(&guarded).await?;
        Ok((guarded, rows))
    }

    /// Whether `chat_id` is listed in `bot_autorized_chats`. Errors count as "no".
    pub async fn is_authorized_chat(&self, chat_id: i64) -> bool {
        let found = sqlx::query("SELECT chat_id FROM bot_autorized_chats WHERE chat_id = $1")
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await;
        match found {
            Ok(row) => row.is_some(),
            Err(e) => {
                error!("Authorization check failed for chat {}: {}", chat_id, e);
                false
            }
        }
    }

    /// Record one request/response pair in `public.agent_logs`.
    ///
    /// Returns the new row id; failures are logged and never reach the caller.
    pub async fn log_interaction(
        &self,
        chat_id: i64,
        user_id: Option<i64>,
        user_name: Option<&str>,
        request: &str,
        response: &str,
        bot_id: &str,
    ) -> Option<i64> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO public.agent_logs
                (chat_id, user_id, user_name, user_request, agent_response, n8n_execution)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(user_name)
        .bind(request)
        .bind(response)
        .bind(bot_id)
        .fetch_one(&self.pool)
        .await;

        let id = inserted.and_then(|row| {
            row.try_get::<i64, _>("id")
                .or_else(|_| row.try_get::<i32, _>("id").map(i64::from))
        });
        match id {
            Ok(id) => Some(id),
            Err(e) => {
                error!("Failed to log interaction for chat {}: {}", chat_id, e);
                None
            }
        }
    }

    async fn fetch(&self, sql: &str) -> std::result::Result<Vec<Row>, sqlx::Error> {
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(decode_row).collect())
    }
}

#[async_trait]
impl SqlExecutor for Database {
    async fn execute(&self, sql: &str) -> Result<Vec<Row>> {
        let started = Instant::now();
        let mut attempt = 1;
        loop {
            match self.fetch(sql).await {
                Ok(rows) => {
                    info!(
                        "SQL executed in {} ms, {} rows",
                        started.elapsed().as_millis(),
                        rows.len()
                    );
                    return Ok(rows);
                }
                Err(e) if attempt < MAX_ATTEMPTS && is_transient(&e) => {
                    warn!("SQL attempt {}/{} failed: {}", attempt, MAX_ATTEMPTS, e);
                    tokio::time::sleep(RETRY_STEP * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!("SQL execution failed: {} | query: {}", e, sql);
                    return Err(BotError::from(e));
                }
            }
        }
    }
}

/// Connection-level failures are worth another attempt; query errors are not.
fn is_transient(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::Protocol(_)
            | sqlx::Error::Tls(_)
    )
}

//! Question -> LLM -> guarded SQL -> rows -> HTML reply.

use crate::cache::ChatCache;
use crate::config::Settings;
use crate::db::SqlExecutor;
use crate::format::reply::{AgentResult, ReplyBuilder};
use crate::llm::Assistant;
use crate::sql_guard::{strip_leading_comments, SqlGuard};
use regex::Regex;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Telegram's hard limit for a single text message.
pub const MAX_TEXT_LENGTH: usize = 4096;

const EMPTY_TEXT: &str = "Пожалуйста, введите текст для обработки.";
const INVALID_TEXT: &str = "❌ Сообщение слишком длинное или пустое";
const AI_FAILED: &str = "<b>Ошибка при обращении к AI.</b> Попробуйте позже.";
const UNSAFE_QUERY: &str = "<b>Не удалось построить безопасный запрос.</b>";
const DB_FAILED: &str = "<b>Пока не могу получить данные из базы.</b>";
const EXCEL_READY: &str = "<b>Готовлю полный список в Excel.</b>";
const CONTEXT_RESET: &str = "новый запрос";

lazy_static::lazy_static! {
    static ref EXCEL_REQUEST: Regex =
        Regex::new(r"(?i)^\s*в\s+(?:excel|эксель)\s*[.!]?\s*$").expect("excel request pattern");
}

/// Non-empty and within the Telegram message limit.
pub fn validate_text(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty() && trimmed.chars().count() <= MAX_TEXT_LENGTH
}

pub struct Agent {
    assistant: Arc<dyn Assistant>,
    executor: Arc<dyn SqlExecutor>,
    guard: SqlGuard,
    replies: ReplyBuilder,
    last_sql: ChatCache<String>,
}

impl Agent {
    pub fn new(
        assistant: Arc<dyn Assistant>,
        executor: Arc<dyn SqlExecutor>,
        settings: &Settings,
    ) -> Self {
        Self {
            assistant,
            executor,
            guard: SqlGuard::new(),
            replies: ReplyBuilder::from_settings(settings),
            last_sql: ChatCache::new(settings.cache_ttl, settings.cache_capacity),
        }
    }

    /// Last guarded SQL executed for this chat, if still fresh.
    pub fn last_sql(&self, chat_id: i64) -> Option<String> {
        self.last_sql.get(chat_id)
    }

    pub async fn answer(&self, chat_id: i64, text: &str) -> AgentResult {
        if text.trim().is_empty() {
            return AgentResult::text(EMPTY_TEXT);
        }
        if !validate_text(text) {
            return AgentResult::text(INVALID_TEXT);
        }
        if text.to_lowercase().contains(CONTEXT_RESET) {
            info!("Context reset for chat {}", chat_id);
            self.last_sql.remove(chat_id);
        }

        if EXCEL_REQUEST.is_match(text) {
            if let Some(sql) = self.last_sql.get(chat_id) {
                return self.export_last(sql).await;
            }
        }

        let reply = match self.assistant.ask(text).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("AI request error for chat {}: {}", chat_id, e);
                return AgentResult::text(AI_FAILED);
            }
        };
        info!(
            "AI reply for chat {}: sql={}, send_excel={}",
            chat_id,
            reply.sql_query.is_some(),
            reply.send_excel
        );

        let Some(sql) = reply.sql_query else {
            return self.replies.text_info(&reply.output);
        };

        let guarded = match self.guard.guard(strip_leading_comments(&sql)) {
            Ok(guarded) => guarded,
            Err(e) => {
                warn!("Chat {}: {}", chat_id, e);
                return self.replies.text_info(UNSAFE_QUERY);
            }
        };

        let rows = match self.executor.execute(&guarded).await {
            Ok(rows) => rows,
            Err(e) => {
                error!("SQL execution error for chat {}: {}", chat_id, e);
                return self.replies.text_info(DB_FAILED);
            }
        };
        self.last_sql.insert(chat_id, guarded.clone());

        if rows.is_empty() {
            return self.replies.no_data(Some(guarded));
        }
        self.replies.rows(rows, text, None, Some(guarded))
    }

    async fn export_last(&self, sql: String) -> AgentResult {
        match self.executor.execute(&sql).await {
            Ok(rows) if !rows.is_empty() => AgentResult {
                output: EXCEL_READY.to_string(),
                send_excel: true,
                table_data: Some(rows),
                sql_query: Some(sql),
            },
            Ok(_) => self.replies.no_data(Some(sql)),
            Err(e) => {
                error!("SQL execution error on Excel export: {}", e);
                self.replies.text_info(DB_FAILED)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BotError, Result};
    use crate::llm::AgentReply;
    use crate::row::{Row, Value};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeAssistant {
        reply: Option<AgentReply>,
    }

    #[async_trait]
    impl Assistant for FakeAssistant {
        async fn ask(&self, _question: &str) -> Result<AgentReply> {
            self.reply
                .clone()
                .ok_or_else(|| BotError::Llm("timeout".to_string()))
        }
    }

    #[derive(Default)]
    struct FakeExecutor {
        rows: Vec<Row>,
        fail: bool,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SqlExecutor for FakeExecutor {
        async fn execute(&self, sql: &str) -> Result<Vec<Row>> {
            self.seen.lock().unwrap().push(sql.to_string());
            if self.fail {
                return Err(BotError::Database("connection refused".to_string()));
            }
            Ok(self.rows.clone())
        }
    }

    fn sql_reply(sql: &str) -> Option<AgentReply> {
        Some(AgentReply {
            output: String::new(),
            sql_query: Some(sql.to_string()),
            send_excel: false,
        })
    }

    fn brand_rows() -> Vec<Row> {
        vec![
            Row::new().with("brand", "Бренд А").with("revenue", Value::Int(1_500_000)),
            Row::new().with("brand", "Бренд Б").with("revenue", Value::Int(900_000)),
        ]
    }

    fn agent(reply: Option<AgentReply>, executor: Arc<FakeExecutor>) -> Agent {
        Agent::new(Arc::new(FakeAssistant { reply }), executor, &Settings::default())
    }

    #[test]
    fn test_validate_text() {
        assert!(validate_text("выручка за март"));
        assert!(!validate_text("   "));
        assert!(!validate_text(&"я".repeat(MAX_TEXT_LENGTH + 1)));
        assert!(validate_text(&"я".repeat(MAX_TEXT_LENGTH)));
    }

    #[tokio::test]
    async fn test_empty_text() {
        let executor = Arc::new(FakeExecutor::default());
        let result = agent(None, executor).answer(1, "  ").await;
        assert_eq!(result.output, EMPTY_TEXT);
    }

    #[tokio::test]
    async fn test_llm_failure() {
        let executor = Arc::new(FakeExecutor::default());
        let result = agent(None, executor.clone()).answer(1, "выручка за март").await;
        assert_eq!(result.output, AI_FAILED);
        assert!(executor.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reply_without_sql_is_text_info() {
        let reply = Some(AgentReply {
            output: "Здравствуйте!".to_string(),
            ..AgentReply::default()
        });
        let result = agent(reply, Arc::new(FakeExecutor::default()))
            .answer(1, "привет, бот")
            .await;
        assert_eq!(result.output, "<b>Информация</b>\n\nЗдравствуйте!");
        assert!(result.sql_query.is_none());
    }

    #[tokio::test]
    async fn test_rejected_sql_is_never_executed() {
        let executor = Arc::new(FakeExecutor::default());
        let result = agent(sql_reply("DELETE FROM orders"), executor.clone())
            .answer(1, "удали все заказы")
            .await;
        assert_eq!(result.output, UNSAFE_QUERY);
        assert!(executor.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_guarded_sql_is_executed_and_rendered() {
        let executor = Arc::new(FakeExecutor {
            rows: brand_rows(),
            ..FakeExecutor::default()
        });
        let bot = agent(
            sql_reply(
                "-- выручка\nSELECT brand, SUM(revenue) AS revenue FROM profit GROUP BY brand",
            ),
            executor.clone(),
        );
        let result = bot.answer(42, "выручка по брендам за март").await;

        let seen = executor.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].starts_with("SELECT brand"));
        assert!(seen[0].contains("marker = 'Бонус'"));
        assert_eq!(result.sql_query.as_deref(), Some(seen[0].as_str()));
        assert!(result.output.starts_with("<b>Выручка по брендам за март</b>"));
        assert!(result.output.contains("Бренд А"));
        assert!(!result.send_excel);
        assert_eq!(bot.last_sql(42), Some(seen[0].clone()));
    }

    #[tokio::test]
    async fn test_execution_failure() {
        let executor = Arc::new(FakeExecutor {
            fail: true,
            ..FakeExecutor::default()
        });
        let result = agent(sql_reply("SELECT 1"), executor)
            .answer(1, "сколько всего клиентов")
            .await;
        assert_eq!(result.output, DB_FAILED);
    }

    #[tokio::test]
    async fn test_empty_rows_is_no_data() {
        let result = agent(sql_reply("SELECT * FROM debt"), Arc::new(FakeExecutor::default()))
            .answer(1, "долги по клиентам")
            .await;
        assert!(result.output.starts_with("<b>Нет данных по заданным условиям.</b>"));
        assert!(result.sql_query.unwrap().contains("FROM (SELECT * FROM public.debt"));
    }

    #[tokio::test]
    async fn test_excel_follow_up_reuses_last_sql() {
        let executor = Arc::new(FakeExecutor {
            rows: brand_rows(),
            ..FakeExecutor::default()
        });
        let bot = agent(sql_reply("SELECT brand, revenue FROM profit"), executor.clone());
        bot.answer(5, "выручка по брендам за март").await;

        let result = bot.answer(5, "в Excel").await;
        assert!(result.send_excel);
        assert_eq!(result.table_data.map(|rows| rows.len()), Some(2));

        let seen = executor.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], seen[1]);
    }

    #[tokio::test]
    async fn test_context_reset_forgets_last_sql() {
        let executor = Arc::new(FakeExecutor {
            rows: brand_rows(),
            ..FakeExecutor::default()
        });
        let bot = agent(None, executor);
        bot.last_sql.insert(9, "SELECT 1".to_string());
        bot.answer(9, "новый запрос: выручка").await;
        assert_eq!(bot.last_sql(9), None);
    }
}

use crate::config::Settings;
use crate::error::{BotError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

const SYSTEM_PROMPT: &str = r#"Ты аналитический ассистент компании. Отвечай строго JSON-объектом:
{"output": "<текст ответа в HTML для Telegram>", "sql_query": "<один SELECT для PostgreSQL или null>", "send_excel": false}
Если для ответа нужны данные из базы, ОБЯЗАТЕЛЬНО верни sql_query. Таблицы: public.profit, public.orders, public.debt, public.managers_plan, public.stock, public.clients, public.products.
Только SELECT или WITH, один оператор, без точки с запятой в середине. Не добавляй лишних полей."#;

/// Structured answer the model returns for one user message.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentReply {
    pub output: String,
    pub sql_query: Option<String>,
    pub send_excel: bool,
}

#[derive(Debug, Deserialize)]
struct RawReply {
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    sql_query: Option<String>,
    #[serde(default)]
    send_excel: Option<bool>,
}

impl From<RawReply> for AgentReply {
    fn from(raw: RawReply) -> Self {
        Self {
            output: raw.output.map(|s| s.trim().to_string()).unwrap_or_default(),
            sql_query: raw
                .sql_query
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            send_excel: raw.send_excel.unwrap_or(false),
        }
    }
}

/// Anything that turns a user question into an [`AgentReply`].
#[async_trait]
pub trait Assistant: Send + Sync {
    async fn ask(&self, question: &str) -> Result<AgentReply>;
}

#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let api_key = settings
            .openai_api_key
            .clone()
            .ok_or_else(|| BotError::Config("OPENAI_API_KEY is not set".to_string()))?;
        Ok(Self::new(
            api_key,
            settings.openai_model.clone(),
            settings.openai_base_url.clone(),
        ))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One chat completion in JSON mode; returns the raw message content.
    pub async fn call_llm(&self, question: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": question}
            ],
            "response_format": {"type": "json_object"},
            "temperature": 0.0,
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| BotError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(BotError::Llm(format!("LLM API error ({}): {}", status, error_text)));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BotError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| BotError::Llm("No content in LLM response".to_string()))?;
        debug!("LLM replied with {} chars", content.len());
        Ok(content.to_string())
    }
}

#[async_trait]
impl Assistant for LlmClient {
    async fn ask(&self, question: &str) -> Result<AgentReply> {
        let content = self.call_llm(question).await.map_err(|e| {
            error!("AI request error: {}", e);
            e
        })?;
        parse_reply(&content)
    }
}

/// Parse the model's JSON, tolerating a surrounding markdown code fence.
pub fn parse_reply(content: &str) -> Result<AgentReply> {
    let cleaned = strip_code_fence(content);
    if cleaned.is_empty() {
        return Ok(AgentReply::default());
    }
    let raw: RawReply = serde_json::from_str(cleaned)?;
    Ok(raw.into())
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let inner = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.strip_suffix("```").unwrap_or(rest))
        .unwrap_or(trimmed);
    inner.trim()
}

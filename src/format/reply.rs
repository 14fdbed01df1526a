//! Chat replies built from query results or from plain assistant text.

use super::html::sanitize_html;
use super::render::{Renderer, NO_DATA_MESSAGE};
use crate::config::Settings;
use crate::row::Row;
use serde::Serialize;

const SHORT_PHRASES: &[&str] = &[
    "в кг", "кг", "вес", "по весу", "да", "нет", "это", "то", "все", "всего", "еще",
    "ещё", "покажи", "дай", "нужно", "хочу", "мне", "мне нужно", "отлично", "хорошо",
    "плохо", "нормально", "давайте", "пожалуйста", "спасибо", "благодарю", "извините",
];

const MIN_TITLE_CHARS: usize = 10;

const EXCEL_HINT: &str = "Могу отправить полный список в Excel — напишите: в excel";
const CLARIFY_PROMPT: &str =
    "Хм… Не совсем понял запрос. Сформулируйте, пожалуйста, период и метрику.";

/// What the messaging layer receives for one incoming message.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentResult {
    pub output: String,
    pub send_excel: bool,
    /// Full result set, kept only when it should go out as an Excel attachment.
    pub table_data: Option<Vec<Row>>,
    pub sql_query: Option<String>,
}

impl AgentResult {
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReplyBuilder {
    renderer: Renderer,
    excel_threshold: usize,
}

impl Default for ReplyBuilder {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl ReplyBuilder {
    pub fn new(renderer: Renderer, excel_threshold: usize) -> Self {
        Self {
            renderer,
            excel_threshold,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(Renderer::new(settings.char_budget), settings.excel_threshold)
    }

    /// Render rows for the chat; large results are flagged for Excel export.
    pub fn rows(
        &self,
        rows: Vec<Row>,
        user_text: &str,
        existing_title: Option<&str>,
        sql_query: Option<String>,
    ) -> AgentResult {
        if rows.is_empty() {
            return self.no_data(sql_query);
        }
        let title = existing_title
            .map(str::to_string)
            .or_else(|| title_from_user(user_text));
        let output = self.renderer.render(&rows, title.as_deref());
        let send_excel = rows.len() > self.excel_threshold;
        AgentResult {
            output,
            send_excel,
            table_data: send_excel.then_some(rows),
            sql_query,
        }
    }

    pub fn no_data(&self, sql_query: Option<String>) -> AgentResult {
        AgentResult {
            output: format!("{}\n{}", NO_DATA_MESSAGE, EXCEL_HINT),
            send_excel: false,
            table_data: Some(Vec::new()),
            sql_query,
        }
    }

    /// Reply without database rows; guarantees a bold title line.
    pub fn text_info(&self, text: &str) -> AgentResult {
        let mut body = sanitize_html(text);
        if body.trim().is_empty() {
            body = CLARIFY_PROMPT.to_string();
        }
        if !body.trim_start().starts_with("<b>") {
            body = format!("<b>Информация</b>\n\n{}", body);
        }
        AgentResult::text(body)
    }
}

fn is_short_phrase(text: &str) -> bool {
    let t = text.trim().to_lowercase();
    t.is_empty() || SHORT_PHRASES.contains(&t.as_str()) || t.chars().count() < MIN_TITLE_CHARS
}

/// Bold title made from the user's question, unless it is a short service phrase.
pub fn title_from_user(text: &str) -> Option<String> {
    if is_short_phrase(text) {
        return None;
    }
    let t = text.trim().trim_end_matches(':').trim_end();
    if t.is_empty() {
        return None;
    }
    let mut chars = t.chars();
    let first = chars.next()?;
    let title: String = first.to_uppercase().chain(chars).collect();
    Some(format!("<b>{}</b>", sanitize_html(&title)))
}

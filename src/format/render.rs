//! HTML Table Renderer
//!
//! Turns a result set into the chat message body: a bold title, an optional
//! period line and one line per row or group, bounded by the platform budget.

use super::html::{escape, sanitize_html, strip_tags};
use super::number::{capitalize, metric_label, unit_for_column, with_unit};
use super::shape::{detect_shape, metric_value, RowProfile, Shape, WeekColumn};
use crate::config::DEFAULT_CHAR_BUDGET;
use crate::row::{Row, Value};
use chrono::{Datelike, NaiveDate};
use itertools::Itertools;
use regex::Regex;
use std::collections::HashMap;
use tracing::info;

lazy_static::lazy_static! {
    static ref YEAR_MONTH: Regex = Regex::new(r"^(\d{4})-(\d{1,2})$").expect("year-month pattern");
}

pub const NO_DATA_MESSAGE: &str = "<b>Нет данных по заданным условиям.</b>";
pub const DEFAULT_TITLE: &str = "<b>Результаты запроса</b>";
pub const REPORT_TITLE: &str = "<b>Отчёт</b>";
const PERIOD_MARKER: &str = "Период:";
const UNNAMED: &str = "Без названия";

/// Characters kept free for the truncation footer.
pub const FOOTER_RESERVE: usize = 200;

/// The title may use at most this fraction of the budget, the period line half of it.
const TITLE_SHARE: usize = 4;
const PERIOD_SHARE: usize = 8;

const RU_MONTHS: [&str; 12] = [
    "Январь", "Февраль", "Март", "Апрель", "Май", "Июнь", "Июль", "Август", "Сентябрь",
    "Октябрь", "Ноябрь", "Декабрь",
];

const MONTH_ALIASES: [&[&str]; 12] = [
    &["january", "jan", "январь", "января", "янв"],
    &["february", "feb", "февраль", "февраля", "фев"],
    &["march", "mar", "март", "марта", "мар"],
    &["april", "apr", "апрель", "апреля", "апр"],
    &["may", "май", "мая"],
    &["june", "jun", "июнь", "июня", "июн"],
    &["july", "jul", "июль", "июля", "июл"],
    &["august", "aug", "август", "августа", "авг"],
    &["september", "sep", "sept", "сентябрь", "сентября", "сен"],
    &["october", "oct", "октябрь", "октября", "окт"],
    &["november", "nov", "ноябрь", "ноября", "ноя"],
    &["december", "dec", "декабрь", "декабря", "дек"],
];

/// Per-render state: header parts plus the rows being rendered.
struct RenderContext<'a> {
    title: String,
    period_line: Option<String>,
    rows: &'a [Row],
}

#[derive(Debug, Clone)]
pub struct Renderer {
    char_budget: usize,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new(DEFAULT_CHAR_BUDGET)
    }
}

impl Renderer {
    pub fn new(char_budget: usize) -> Self {
        Self { char_budget }
    }

    pub fn char_budget(&self) -> usize {
        self.char_budget
    }

    /// Render `rows` as sanitized, length-bounded HTML. Never fails.
    pub fn render(&self, rows: &[Row], title_hint: Option<&str>) -> String {
        if rows.is_empty() {
            return NO_DATA_MESSAGE.to_string();
        }

        let shape = detect_shape(rows);
        let default_title = match shape {
            Shape::TimeSeries { .. } | Shape::Weekly { .. } => REPORT_TITLE,
            _ => DEFAULT_TITLE,
        };
        let (title, mut period_line) = split_title(title_hint, default_title);
        if period_line.is_none() {
            period_line = period_from_rows(rows);
        }
        let ctx = RenderContext {
            title: fit_line(&title, self.char_budget / TITLE_SHARE),
            period_line: period_line.map(|p| fit_line(&p, self.char_budget / PERIOD_SHARE)),
            rows,
        };

        match &shape {
            Shape::SingleMetric { metric } => self.render_single(&ctx, metric),
            Shape::TimeSeries { time_column, metrics } => {
                let lines = time_series_lines(&ctx, time_column, metrics);
                self.assemble(&ctx, lines)
            }
            Shape::Weekly { name_column, weeks } => {
                let lines = weekly_lines(&ctx, name_column.as_deref(), weeks);
                self.assemble(&ctx, lines)
            }
            Shape::General { primary, secondary, metrics } => {
                let lines = match (primary, secondary) {
                    (Some(primary), Some(secondary)) => {
                        grouped_lines(&ctx, primary, secondary, metrics)
                    }
                    (Some(primary), None) => named_lines(&ctx, primary, metrics),
                    (None, _) => metric_only_lines(&ctx, metrics),
                };
                self.assemble(&ctx, lines)
            }
        }
    }

    fn header(&self, ctx: &RenderContext<'_>) -> String {
        std::iter::once(ctx.title.as_str())
            .chain(ctx.period_line.as_deref())
            .map(sanitize_html)
            .join("\n")
    }

    fn render_single(&self, ctx: &RenderContext<'_>, metric: &str) -> String {
        let value = ctx.rows[0].get(metric).cloned().unwrap_or(Value::Null);
        let body = sanitize_html(&with_unit(&value, unit_for_column(metric)));
        format!("{}\n{}", self.header(ctx), body)
    }

    /// Join header and lines, truncating to the character budget when needed.
    fn assemble(&self, ctx: &RenderContext<'_>, lines: Vec<String>) -> String {
        let header = self.header(ctx);
        let lines: Vec<String> = lines.iter().map(|l| sanitize_html(l)).collect();
        if lines.is_empty() {
            return header;
        }

        let full = format!("{}\n\n{}", header, lines.join("\n"));
        if char_len(&full) <= self.char_budget {
            return full;
        }

        let available = self
            .char_budget
            .saturating_sub(FOOTER_RESERVE + char_len(&header) + 2);
        let mut used = 0;
        let kept: Vec<&String> = lines
            .iter()
            .take_while(|line| {
                let cost = char_len(line) + 1;
                if used + cost > available {
                    return false;
                }
                used += cost;
                true
            })
            .collect();

        info!("Message truncated: showing {} of {} lines", kept.len(), lines.len());
        let footer = format!(
            "<i>Показаны первые {} из {} строк. \
             Полный список могу отправить в Excel — напишите: в excel</i>",
            kept.len(),
            lines.len()
        );
        if kept.is_empty() {
            let short = format!("{}\n\n{}", header, footer);
            if char_len(&short) <= self.char_budget {
                short
            } else {
                header
            }
        } else {
            format!("{}\n\n{}\n\n{}", header, kept.iter().join("\n"), footer)
        }
    }
}

/// Render with the default budget.
pub fn build_html_from_rows(rows: &[Row], title_hint: Option<&str>) -> String {
    Renderer::default().render(rows, title_hint)
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Sanitize a header line and shorten it to at most `limit` characters.
///
/// Markup inside an over-long line is dropped; a bold wrapper is kept.
fn fit_line(line: &str, limit: usize) -> String {
    let clean = sanitize_html(line);
    if char_len(&clean) <= limit {
        return clean;
    }
    let (inner, bold) = match clean.strip_prefix("<b>").and_then(|l| l.strip_suffix("</b>")) {
        Some(inner) => (inner, true),
        None => (clean.as_str(), false),
    };
    // "<b>" + "…" + "</b>"
    let overhead = if bold { 8 } else { 1 };
    let mut cut: String = strip_tags(inner)
        .chars()
        .take(limit.saturating_sub(overhead))
        .collect();
    if let Some(amp) = cut.rfind('&') {
        if !cut[amp..].contains(';') {
            cut.truncate(amp);
        }
    }
    let cut = cut.trim_end();
    let shortened = if bold {
        format!("<b>{}…</b>", cut)
    } else {
        format!("{}…", cut)
    };
    sanitize_html(&shortened)
}

/// Split a bold title hint into title and period line.
///
/// A hint that is not wrapped in `<b>…</b>` is ignored in favour of `default_title`.
pub fn split_title(hint: Option<&str>, default_title: &str) -> (String, Option<String>) {
    let Some(hint) = hint.map(str::trim) else {
        return (default_title.to_string(), None);
    };
    let Some(inner) = hint.strip_prefix("<b>").and_then(|h| h.strip_suffix("</b>")) else {
        return (default_title.to_string(), None);
    };
    match inner.find(PERIOD_MARKER) {
        Some(idx) => {
            let title = inner[..idx].trim_end_matches(|c: char| {
                c.is_whitespace() || matches!(c, ',' | '.' | ':' | '-' | '—' | '(')
            });
            let period = inner[idx..].trim().trim_end_matches(')').trim_end();
            let title = if title.is_empty() {
                default_title.to_string()
            } else {
                format!("<b>{}</b>", title)
            };
            (title, Some(period.to_string()))
        }
        None => (hint.to_string(), None),
    }
}

fn period_from_rows(rows: &[Row]) -> Option<String> {
    let profile = RowProfile::analyze(rows);
    let column = profile.period_column()?;
    let value = rows[0].get(column)?.to_string();
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(format!("{} {}", PERIOD_MARKER, escape(value)))
    }
}

fn dimension_text(row: &Row, column: &str) -> String {
    match row.get(column).map(|v| v.to_string()) {
        Some(text) if !text.trim().is_empty() => escape(text.trim()),
        _ => UNNAMED.to_string(),
    }
}

/// `Label: value<unit>` for every numeric metric present in the row.
fn labeled_clauses(row: &Row, metrics: &[String]) -> Vec<String> {
    metrics
        .iter()
        .filter_map(|m| {
            let value = row.get(m).filter(|v| v.is_numeric())?;
            Some(format!("{}: {}", metric_label(m), with_unit(value, unit_for_column(m))))
        })
        .collect()
}

/// Bare value when there is a single metric, labeled clauses otherwise.
fn value_part(row: &Row, metrics: &[String]) -> Option<String> {
    match metrics {
        [only] => row
            .get(only)
            .filter(|v| v.is_numeric())
            .map(|v| with_unit(v, unit_for_column(only))),
        _ => {
            let clauses = labeled_clauses(row, metrics);
            if clauses.is_empty() {
                None
            } else {
                Some(clauses.join("; "))
            }
        }
    }
}

fn time_series_lines(
    ctx: &RenderContext<'_>,
    time_column: &str,
    metrics: &[String],
) -> Vec<String> {
    ctx.rows
        .iter()
        .map(|row| {
            let label = row
                .get(time_column)
                .map(|v| time_label(time_column, v))
                .filter(|l| !l.trim().is_empty())
                .map(|l| escape(&l))
                .unwrap_or_else(|| UNNAMED.to_string());
            let clauses = labeled_clauses(row, metrics);
            if clauses.is_empty() {
                label
            } else {
                format!("{} — {}", label, clauses.join("; "))
            }
        })
        .collect()
}

fn weekly_lines(
    ctx: &RenderContext<'_>,
    name_column: Option<&str>,
    weeks: &[WeekColumn],
) -> Vec<String> {
    ctx.rows
        .iter()
        .map(|row| {
            let name = name_column
                .map(|c| dimension_text(row, c))
                .unwrap_or_else(|| UNNAMED.to_string());
            let clauses = weeks
                .iter()
                .filter_map(|w| {
                    let value = row.get(&w.column).filter(|v| v.is_numeric())?;
                    Some(format!("Неделя {}: {}", w.week, with_unit(value, Some(w.unit))))
                })
                .join("; ");
            if clauses.is_empty() {
                format!("<b>{}</b>", name)
            } else {
                format!("<b>{}</b> — {}", name, clauses)
            }
        })
        .collect()
}

fn named_lines(ctx: &RenderContext<'_>, primary: &str, metrics: &[String]) -> Vec<String> {
    ctx.rows
        .iter()
        .map(|row| {
            let name = dimension_text(row, primary);
            match value_part(row, metrics) {
                Some(values) => format!("<b>{}</b> — {}", name, values),
                None => format!("<b>{}</b>", name),
            }
        })
        .collect()
}

/// Rows grouped by the primary dimension, largest groups first.
fn grouped_lines(
    ctx: &RenderContext<'_>,
    primary: &str,
    secondary: &str,
    metrics: &[String],
) -> Vec<String> {
    let sort_metric = metrics.first().map(String::as_str);
    let value_of = |row: &Row| sort_metric.map(|m| metric_value(row, m)).unwrap_or(0.0);

    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<&Row>)> = Vec::new();
    for row in ctx.rows {
        let key = dimension_text(row, primary);
        let slot = *index.entry(key.clone()).or_insert_with(|| {
            groups.push((key, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(row);
    }

    groups
        .into_iter()
        .map(|(key, rows)| {
            let total: f64 = rows.iter().map(|r| value_of(*r)).sum();
            (key, rows, total)
        })
        .sorted_by(|a, b| b.2.total_cmp(&a.2))
        .flat_map(|(key, rows, _)| {
            let header = format!("<b>{}:</b>", key);
            let children = rows
                .into_iter()
                .sorted_by(|a, b| value_of(*b).total_cmp(&value_of(*a)))
                .map(|row| {
                    let name = dimension_text(row, secondary);
                    match value_part(row, metrics) {
                        Some(values) => format!("  {} - {}", name, values),
                        None => format!("  {}", name),
                    }
                })
                .collect::<Vec<_>>();
            std::iter::once(header).chain(children)
        })
        .collect()
}

/// Rows without any label column: one clause per line for a single row.
fn metric_only_lines(ctx: &RenderContext<'_>, metrics: &[String]) -> Vec<String> {
    if ctx.rows.len() == 1 {
        return labeled_clauses(&ctx.rows[0], metrics);
    }
    ctx.rows
        .iter()
        .map(|row| labeled_clauses(row, metrics).join("; "))
        .filter(|line| !line.is_empty())
        .collect()
}

/// Human label for a time-series row.
pub fn time_label(column: &str, value: &Value) -> String {
    let monthly = {
        let lower = column.to_lowercase();
        lower.contains("month") || lower.contains("месяц")
    };
    match value {
        Value::Date(d) => date_label(*d, monthly),
        Value::DateTime(dt) => date_label(dt.date(), monthly),
        Value::Int(_) | Value::Float(_) | Value::Decimal(_) => match whole_number(value) {
            Some(n) => month_name_by_number(n).unwrap_or_else(|| n.to_string()),
            None => value.to_string(),
        },
        Value::Text(text) => text_time_label(text.trim(), monthly),
        other => other.to_string(),
    }
}

fn date_label(date: NaiveDate, monthly: bool) -> String {
    if monthly {
        format!("{} {}", RU_MONTHS[date.month0() as usize], date.year())
    } else {
        date.format("%d.%m.%Y").to_string()
    }
}

fn whole_number(value: &Value) -> Option<i64> {
    value
        .as_number()
        .filter(|n| n.fract() == 0.0 && n.abs() < i64::MAX as f64)
        .map(|n| n as i64)
}

fn month_name_by_number(n: i64) -> Option<String> {
    (1..=12)
        .contains(&n)
        .then(|| RU_MONTHS[(n - 1) as usize].to_string())
}

fn text_time_label(text: &str, monthly: bool) -> String {
    if let Some(date) = text
        .get(..10)
        .and_then(|head| NaiveDate::parse_from_str(head, "%Y-%m-%d").ok())
    {
        return date_label(date, monthly);
    }
    if let Some(caps) = YEAR_MONTH.captures(text) {
        if let Some(month) = caps[2].parse::<i64>().ok().and_then(month_name_by_number) {
            return format!("{} {}", month, &caps[1]);
        }
    }
    let lower = text.to_lowercase();
    if let Some(idx) = MONTH_ALIASES.iter().position(|aliases| aliases.contains(&lower.as_str())) {
        return RU_MONTHS[idx].to_string();
    }
    if let Some(month) = text.parse::<i64>().ok().and_then(month_name_by_number) {
        return month;
    }
    capitalize(text)
}

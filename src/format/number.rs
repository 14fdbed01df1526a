//! Russian-locale numbers, units and metric labels.

use crate::row::Value;

/// Physical unit inferred from a column name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Currency,
    Mass,
    Count,
}

impl Unit {
    pub fn suffix(self) -> &'static str {
        match self {
            Unit::Currency => " ₽",
            Unit::Mass => " кг",
            Unit::Count => " шт",
        }
    }
}

/// Substring rules checked in order; the first rule with a matching token wins.
const UNIT_RULES: &[(&[&str], Unit)] = &[
    (&["revenue", "sum", "amount", "выручк", "сумм", "руб", "₽"], Unit::Currency),
    (&["weight", "kg", "вес", "кг"], Unit::Mass),
    (&["quantity", "qty", "колич", "шт"], Unit::Count),
];

/// Label rules for metric columns, same matching discipline as [`UNIT_RULES`].
const LABEL_RULES: &[(&[&str], &str)] = &[
    (&["revenue", "выручк"], "Выручка"),
    (&["profit", "прибыл"], "Прибыль"),
    (&["debt", "долг"], "Долг"),
    (&["plan", "план"], "План"),
    (&["weight", "kg", "вес"], "Вес"),
    (&["quantity", "qty", "колич"], "Количество"),
    (&["sum", "amount", "сумм"], "Сумма"),
    (&["price", "цен"], "Цена"),
];

/// Infer a unit from a column name; `None` when no token matches.
pub fn unit_for_column(column: &str) -> Option<Unit> {
    let lower = column.to_lowercase();
    UNIT_RULES
        .iter()
        .find(|(tokens, _)| tokens.iter().any(|t| lower.contains(t)))
        .map(|(_, unit)| *unit)
}

/// Human label for a metric column.
///
/// Known stems map to a Russian word; anything else is the column name with
/// underscores turned into spaces and the first letter capitalised.
pub fn metric_label(column: &str) -> String {
    let lower = column.to_lowercase();
    if let Some((_, label)) = LABEL_RULES
        .iter()
        .find(|(tokens, _)| tokens.iter().any(|t| lower.contains(t)))
    {
        return (*label).to_string();
    }
    capitalize(&column.replace('_', " "))
}

pub(crate) fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Format a value with space thousands groups and a decimal comma.
///
/// Values that do not read as a number are returned in their text form.
pub fn format_number(value: &Value) -> String {
    match value.as_number() {
        Some(n) => format_float(n),
        None => value.to_string(),
    }
}

/// Two-decimal rounding; a zero fraction is dropped entirely.
pub fn format_float(value: f64) -> String {
    let fixed = format!("{:.2}", value);
    let (sign, digits) = match fixed.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", fixed.as_str()),
    };
    let (whole, frac) = digits.split_once('.').unwrap_or((digits, "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(ch);
    }

    let is_zero = whole.chars().all(|c| c == '0') && frac == "00";
    let sign = if is_zero { "" } else { sign };
    if frac == "00" {
        format!("{}{}", sign, grouped)
    } else {
        format!("{}{},{}", sign, grouped, frac)
    }
}

/// Formatted number followed by the unit suffix, if any.
pub fn with_unit(value: &Value, unit: Option<Unit>) -> String {
    let formatted = format_number(value);
    match unit {
        Some(unit) if value.is_numeric() => format!("{}{}", formatted, unit.suffix()),
        _ => formatted,
    }
}

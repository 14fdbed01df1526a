//! Row Shape Analyzer
//!
//! Classifies the columns of a result set into dimensions and metrics and picks
//! the layout the renderer should use. Detection runs a fixed, ordered list of
//! detectors; the first one that recognises the probe row wins.

use super::number::Unit;
use crate::row::{Row, Value};
use regex::Regex;

lazy_static::lazy_static! {
    static ref TYPED_WEEK: Regex =
        Regex::new(r"(?i)^week(\d+)_(kg|quantity|qty|revenue)$").expect("typed week pattern");
    static ref BARE_WEEK: Regex = Regex::new(r"(?i)^week(\d+)$").expect("bare week pattern");
}

/// Column names that mark a time series.
pub const TIME_COLUMNS: &[&str] = &["month", "month_name", "date", "day", "месяц", "дата"];

/// Text column lifted into the period line instead of being rendered as a dimension.
pub const PERIOD_COLUMN: &str = "period";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    Dimension,
    Metric,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnProfile {
    pub name: String,
    pub role: ColumnRole,
}

/// Column roles of a result set, in probe-row order.
#[derive(Debug, Clone, PartialEq)]
pub struct RowProfile {
    pub columns: Vec<ColumnProfile>,
}

impl RowProfile {
    /// Classify every column of the probe row.
    ///
    /// A column whose probe value is null takes its role from the first
    /// non-null value further down; an all-null column is a dimension.
    pub fn analyze(rows: &[Row]) -> Self {
        let Some(probe) = rows.first() else {
            return Self { columns: Vec::new() };
        };
        let columns = probe
            .iter()
            .map(|(name, value)| {
                let sample = if value.is_null() {
                    rows.iter()
                        .filter_map(|r| r.get(name))
                        .find(|v| !v.is_null())
                        .unwrap_or(value)
                } else {
                    value
                };
                ColumnProfile {
                    name: name.to_string(),
                    role: if sample.is_numeric() {
                        ColumnRole::Metric
                    } else {
                        ColumnRole::Dimension
                    },
                }
            })
            .collect();
        Self { columns }
    }

    pub fn metrics(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .filter(|c| c.role == ColumnRole::Metric)
            .map(|c| c.name.as_str())
    }

    /// Dimension columns, excluding the period column.
    pub fn dimensions(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .filter(|c| c.role == ColumnRole::Dimension && !is_period_column(&c.name))
            .map(|c| c.name.as_str())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn period_column(&self) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.role == ColumnRole::Dimension && is_period_column(&c.name))
            .map(|c| c.name.as_str())
    }
}

fn is_period_column(name: &str) -> bool {
    name.eq_ignore_ascii_case(PERIOD_COLUMN)
}

/// One `week<N>[_suffix]` column.
#[derive(Debug, Clone, PartialEq)]
pub struct WeekColumn {
    pub column: String,
    pub week: u32,
    pub unit: Unit,
}

/// Layout chosen for a result set.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    TimeSeries {
        time_column: String,
        metrics: Vec<String>,
    },
    SingleMetric {
        metric: String,
    },
    Weekly {
        name_column: Option<String>,
        weeks: Vec<WeekColumn>,
    },
    General {
        primary: Option<String>,
        secondary: Option<String>,
        metrics: Vec<String>,
    },
}

type Detector = fn(&RowProfile, usize) -> Option<Shape>;

/// Detectors in priority order.
pub const DETECTORS: &[(&str, Detector)] = &[
    ("time_series", detect_time_series),
    ("single_metric", detect_single_metric),
    ("weekly_typed", detect_weekly_typed),
    ("weekly_untyped", detect_weekly_untyped),
    ("general", detect_general),
];

/// Maximum number of metrics rendered in the general layout.
pub const MAX_METRICS: usize = 3;

/// Pick the layout for `rows`.
pub fn detect_shape(rows: &[Row]) -> Shape {
    let profile = RowProfile::analyze(rows);
    DETECTORS
        .iter()
        .find_map(|(_, detect)| detect(&profile, rows.len()))
        .unwrap_or(Shape::General {
            primary: None,
            secondary: None,
            metrics: Vec::new(),
        })
}

pub fn detect_time_series(profile: &RowProfile, _rows: usize) -> Option<Shape> {
    let time_column = profile
        .columns
        .iter()
        .find(|c| TIME_COLUMNS.iter().any(|t| c.name.to_lowercase() == *t))?;
    let metrics = profile
        .metrics()
        .filter(|m| *m != time_column.name)
        .map(str::to_string)
        .collect();
    Some(Shape::TimeSeries {
        time_column: time_column.name.clone(),
        metrics,
    })
}

pub fn detect_single_metric(profile: &RowProfile, rows: usize) -> Option<Shape> {
    let metrics: Vec<&str> = profile.metrics().collect();
    match (rows, metrics.as_slice()) {
        (1, [metric]) => Some(Shape::SingleMetric {
            metric: metric.to_string(),
        }),
        _ => None,
    }
}

pub fn detect_weekly_typed(profile: &RowProfile, _rows: usize) -> Option<Shape> {
    detect_weekly(profile, |name| {
        let caps = TYPED_WEEK.captures(name)?;
        let week = caps[1].parse().ok()?;
        let unit = match caps[2].to_lowercase().as_str() {
            "kg" => Unit::Mass,
            "quantity" | "qty" => Unit::Count,
            _ => Unit::Currency,
        };
        Some((week, unit))
    })
}

pub fn detect_weekly_untyped(profile: &RowProfile, _rows: usize) -> Option<Shape> {
    detect_weekly(profile, |name| {
        let caps = BARE_WEEK.captures(name)?;
        Some((caps[1].parse().ok()?, Unit::Currency))
    })
}

fn detect_weekly<F>(profile: &RowProfile, parse: F) -> Option<Shape>
where
    F: Fn(&str) -> Option<(u32, Unit)>,
{
    let mut weeks: Vec<WeekColumn> = profile
        .metrics()
        .filter_map(|name| {
            parse(name).map(|(week, unit)| WeekColumn {
                column: name.to_string(),
                week,
                unit,
            })
        })
        .collect();
    if weeks.is_empty() {
        return None;
    }
    // Stable: columns of the same week keep their select-list order.
    weeks.sort_by_key(|w| w.week);
    Some(Shape::Weekly {
        name_column: profile.dimensions().next().map(str::to_string),
        weeks,
    })
}

pub fn detect_general(profile: &RowProfile, _rows: usize) -> Option<Shape> {
    let mut dimensions = profile.dimensions();
    let primary = dimensions.next().map(str::to_string);
    let secondary = dimensions.next().map(str::to_string);

    let all_metrics: Vec<&str> = profile.metrics().collect();
    let without_totals: Vec<&str> = all_metrics
        .iter()
        .copied()
        .filter(|m| !m.to_lowercase().contains("total"))
        .collect();
    let chosen = if without_totals.is_empty() {
        all_metrics
    } else {
        without_totals
    };

    Some(Shape::General {
        primary,
        secondary,
        metrics: chosen.into_iter().take(MAX_METRICS).map(str::to_string).collect(),
    })
}

/// Numeric value of `column` in `row`, 0 when missing or not a number.
pub(crate) fn metric_value(row: &Row, column: &str) -> f64 {
    row.get(column).and_then(Value::as_number).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[(&str, Value)]) -> Row {
        cells.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_roles_from_probe_row() {
        let rows = vec![row(&[
            ("brand", Value::from("Milk")),
            ("revenue", Value::Float(10.5)),
            ("qty", Value::from("1 200")),
        ])];
        let profile = RowProfile::analyze(&rows);
        assert_eq!(profile.dimensions().collect::<Vec<_>>(), vec!["brand"]);
        assert_eq!(profile.metrics().collect::<Vec<_>>(), vec!["revenue", "qty"]);
    }

    #[test]
    fn test_null_probe_value_uses_later_rows() {
        let rows = vec![
            row(&[("brand", Value::from("A")), ("revenue", Value::Null)]),
            row(&[("brand", Value::from("B")), ("revenue", Value::Int(5))]),
        ];
        let profile = RowProfile::analyze(&rows);
        assert_eq!(profile.metrics().collect::<Vec<_>>(), vec!["revenue"]);
    }

    #[test]
    fn test_time_series_wins_over_single_metric() {
        let rows = vec![row(&[("month", Value::from("january")), ("revenue", Value::Float(1.0))])];
        assert_eq!(
            detect_shape(&rows),
            Shape::TimeSeries {
                time_column: "month".to_string(),
                metrics: vec!["revenue".to_string()],
            }
        );
    }

    #[test]
    fn test_single_metric_requires_one_row() {
        let one = vec![row(&[("client_count", Value::Int(3175))])];
        assert_eq!(
            detect_shape(&one),
            Shape::SingleMetric { metric: "client_count".to_string() }
        );
        let two = vec![one[0].clone(), one[0].clone()];
        assert!(matches!(detect_shape(&two), Shape::General { .. }));
    }

    #[test]
    fn test_weekly_typed_sorted_by_week() {
        let rows = vec![row(&[
            ("name", Value::from("Иванов")),
            ("week10_kg", Value::Int(3)),
            ("week2_kg", Value::Int(1)),
            ("week9_kg", Value::Int(2)),
        ])];
        match detect_shape(&rows) {
            Shape::Weekly { name_column, weeks } => {
                assert_eq!(name_column.as_deref(), Some("name"));
                assert_eq!(weeks.iter().map(|w| w.week).collect::<Vec<_>>(), vec![2, 9, 10]);
                assert!(weeks.iter().all(|w| w.unit == Unit::Mass));
            }
            other => panic!("unexpected shape {:?}", other),
        }
    }

    #[test]
    fn test_weekly_untyped_defaults_to_currency() {
        let rows = vec![row(&[("manager", Value::from("A")), ("week1", Value::Int(1))])];
        assert_eq!(detect_weekly_typed(&RowProfile::analyze(&rows), 1), None);
        match detect_weekly_untyped(&RowProfile::analyze(&rows), 1) {
            Some(Shape::Weekly { weeks, .. }) => assert_eq!(weeks[0].unit, Unit::Currency),
            other => panic!("unexpected shape {:?}", other),
        }
    }

    #[test]
    fn test_general_skips_totals_and_period() {
        let rows = vec![
            row(&[
                ("period", Value::from("январь 2025")),
                ("manager", Value::from("A")),
                ("brand", Value::from("B")),
                ("revenue", Value::Int(1)),
                ("total_revenue", Value::Int(2)),
                ("weight_kg", Value::Int(3)),
                ("qty", Value::Int(4)),
                ("price", Value::Int(5)),
            ]),
            row(&[("manager", Value::from("C"))]),
        ];
        let profile = RowProfile::analyze(&rows);
        assert_eq!(profile.period_column(), Some("period"));
        assert_eq!(
            detect_general(&profile, 2),
            Some(Shape::General {
                primary: Some("manager".to_string()),
                secondary: Some("brand".to_string()),
                metrics: vec!["revenue".to_string(), "weight_kg".to_string(), "qty".to_string()],
            })
        );
    }

    #[test]
    fn test_general_falls_back_to_total_columns() {
        let rows = vec![
            row(&[("manager", Value::from("A")), ("total_revenue", Value::Int(2))]),
            row(&[("manager", Value::from("B")), ("total_revenue", Value::Int(3))]),
        ];
        match detect_shape(&rows) {
            Shape::General { metrics, .. } => {
                assert_eq!(metrics, vec!["total_revenue".to_string()])
            }
            other => panic!("unexpected shape {:?}", other),
        }
    }
}

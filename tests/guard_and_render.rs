use analytics_bot::format::render::Renderer;
use analytics_bot::format::reply::ReplyBuilder;
use analytics_bot::format::{
    build_html_from_rows, format_number, sanitize_html, unit_for_column, Unit,
};
use analytics_bot::row::{rows_from_json, Value};
use analytics_bot::sql_guard::{guard_sql, strip_leading_comments};
use analytics_bot::BotError;
use serde_json::json;

const PROFIT_FILTERED: &str = "(SELECT * FROM public.profit WHERE client_code NOT IN \
                               (SELECT client_code FROM public.clients WHERE marker = 'Бонус'))";

#[test]
fn guard_preserves_alias_and_column_references() {
    let out = guard_sql("SELECT p.revenue FROM profit p WHERE p.manager = 'X'").unwrap();
    assert_eq!(
        out,
        format!("SELECT p.revenue FROM {} p WHERE p.manager = 'X'", PROFIT_FILTERED)
    );
}

#[test]
fn guard_reuses_table_name_as_alias() {
    let out = guard_sql("SELECT * FROM debt WHERE total_debt > 0").unwrap();
    assert!(out.starts_with("SELECT * FROM (SELECT * FROM public.debt WHERE client_code NOT IN"));
    assert!(out.ends_with(") debt WHERE total_debt > 0"));
}

#[test]
fn guard_wraps_every_protected_table_once() {
    let sql = "WITH s AS (SELECT product_code, SUM(qty) AS qty FROM stock GROUP BY product_code) \
               SELECT m.manager, o.qty FROM orders o JOIN managers_plan m ON m.manager = o.manager \
               LEFT JOIN s ON s.product_code = o.product_code";
    let once = guard_sql(sql).unwrap();
    assert_eq!(once.matches("FROM public.orders").count(), 1);
    assert_eq!(once.matches("FROM public.managers_plan").count(), 1);
    assert_eq!(once.matches("FROM public.stock").count(), 1);
    assert!(once.contains("c.marker <> 'Бонус'"));
    assert_eq!(guard_sql(&once).unwrap(), once);
}

#[test]
fn guard_wraps_unusual_spellings_of_protected_tables() {
    for sql in [
        "SELECT * FROM/**/profit",
        "SELECT * FROM \"profit\"",
        "SELECT * FROM ONLY profit",
    ] {
        let out = guard_sql(sql).unwrap();
        assert_eq!(out, format!("SELECT * FROM {} profit", PROFIT_FILTERED));
    }
}

#[test]
fn guard_rejects_unsafe_statements() {
    for sql in [
        "",
        "UPDATE orders SET qty = 0",
        "SELECT 1; DROP TABLE profit",
        "SELECT * FROM orders WHERE 1 = 1; DELETE FROM orders",
        "EXPLAIN SELECT 1",
        "SELECT * FROM profit UNION SELECT * FROM pg_catalog.pg_user \
         WHERE 1=1 AND (SELECT 1) IS NOT NULL; TRUNCATE profit",
    ] {
        let err = guard_sql(sql).unwrap_err();
        assert!(err.is_rejection(), "expected rejection for {:?}", sql);
        assert!(matches!(err, BotError::RejectedQuery(_)));
    }
}

#[test]
fn commented_llm_sql_is_accepted_after_stripping() {
    let sql = "/* отчёт */\n-- выручка по месяцам\n\
               SELECT month, SUM(revenue) AS revenue FROM profit GROUP BY month";
    assert!(guard_sql(sql).is_err());
    let out = guard_sql(strip_leading_comments(sql)).unwrap();
    assert!(out.starts_with("SELECT month"));
    assert!(out.contains(&format!("FROM {} profit GROUP BY month", PROFIT_FILTERED)));
}

#[test]
fn number_and_unit_formatting() {
    assert_eq!(format_number(&Value::from("1234567.5")), "1 234 567,50");
    assert_eq!(format_number(&Value::Int(1000)), "1 000");
    assert_eq!(format_number(&Value::from("abc")), "abc");
    assert_eq!(unit_for_column("total_revenue"), Some(Unit::Currency));
    assert_eq!(unit_for_column("weight_kg"), Some(Unit::Mass));
    assert_eq!(unit_for_column("quantity"), Some(Unit::Count));
    assert_eq!(unit_for_column("client_name"), None);
}

#[test]
fn single_row_single_metric_from_json() {
    let rows = rows_from_json(&json!([{"client_count": 3175}]));
    let out = build_html_from_rows(&rows, Some("<b>Количество уникальных клиентов</b>"));
    assert_eq!(out, "<b>Количество уникальных клиентов</b>\n3 175");
}

#[test]
fn monthly_revenue_from_json() {
    let rows = rows_from_json(&json!([
        {"month": "january", "revenue": 8956617.99},
        {"month": "february", "revenue": 7000000}
    ]));
    let out = build_html_from_rows(&rows, None);
    let lines: Vec<&str> = out.lines().collect();
    assert!(lines.contains(&"Январь — Выручка: 8 956 617,99 ₽"));
    assert!(lines.contains(&"Февраль — Выручка: 7 000 000 ₽"));
}

#[test]
fn long_results_are_truncated_with_footer() {
    let items: Vec<serde_json::Value> = (0..500)
        .map(|i| json!({"manager": format!("Менеджер номер {:0>40}", i), "revenue": 100000 + i}))
        .collect();
    let rows = rows_from_json(&serde_json::Value::Array(items));
    let out = Renderer::new(2000).render(&rows, None);

    assert!(out.chars().count() <= 2000);
    let shown = out.lines().filter(|l| l.starts_with("<b>Менеджер")).count();
    assert!(shown > 0 && shown < 500);
    assert!(out.contains(&format!("Показаны первые {} из 500 строк", shown)));
}

#[test]
fn rendered_output_is_sanitized() {
    let rows = rows_from_json(&json!([
        {"brand": "<script>x</script>A&B", "revenue": 10},
        {"brand": "Обычный", "revenue": 5}
    ]));
    let out = build_html_from_rows(&rows, Some("<b>Выручка <u>по брендам"));
    assert!(!out.contains("<script>"));
    assert!(out.contains("A&amp;B"));
    assert_eq!(sanitize_html(&out), out);
}

#[test]
fn reply_flags_large_results_for_excel() {
    let items: Vec<serde_json::Value> = (0..45)
        .map(|i| json!({"brand": format!("Бренд {}", i), "revenue": 1000 * i}))
        .collect();
    let rows = rows_from_json(&serde_json::Value::Array(items));
    let result = ReplyBuilder::default().rows(rows, "выручка по всем брендам", None, None);
    assert!(result.send_excel);
    assert_eq!(result.table_data.map(|r| r.len()), Some(45));
    assert!(result.output.starts_with("<b>Выручка по всем брендам</b>"));
}

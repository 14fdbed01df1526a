//! SQL Guard
//!
//! Accepts a single read-only statement produced by the LLM and rewrites every
//! `FROM`/`JOIN` reference to a protected table into a filtered subquery that
//! drops records of bonus-marked clients. Aliases are kept; an unaliased table
//! gets its own name as alias so qualified columns (`profit.revenue`) still resolve.
//!
//! A reference may be spelled with comments between `FROM` and the table, with
//! `ONLY`, or with a double-quoted name; all of these are rewritten. Comma-joined
//! tables after the first one are not.

use crate::config::BONUS_MARKER;
use crate::error::{BotError, Result};
use regex::{Captures, Regex};
use std::ops::Range;
use tracing::{debug, warn};

lazy_static::lazy_static! {
    static ref FORBIDDEN: Regex = Regex::new(
        r"(?i)\b(insert|update|delete|merge|alter|drop|truncate|create|grant|revoke|call|copy)\b"
    ).expect("forbidden keyword pattern");
    static ref MULTI_STATEMENT: Regex = Regex::new(r";\s*\S").expect("multi statement pattern");
    static ref LEADING_KEYWORD: Regex =
        Regex::new(r"(?i)^\s*(select|with)\b").expect("leading keyword pattern");
    static ref DEFAULT_GUARD: SqlGuard = SqlGuard::new();
}

/// Whitespace or SQL comments between the tokens of a table reference.
const GAP: &str = r"(?:\s|/\*(?s:.*?)\*/|--[^\n]*\n)+";

/// Words that may follow a table reference without being its alias.
const CLAUSE_KEYWORDS: &[&str] = &[
    "where", "join", "inner", "left", "right", "full", "cross", "outer", "natural", "lateral",
    "on", "using", "group", "order", "having", "limit", "offset", "fetch", "for", "union",
    "intersect", "except", "window", "and", "or", "not", "select", "from", "when", "then",
    "else", "end", "returning", "tablesample", "with", "as",
];

/// How rows of a protected table are linked to the client marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientLink {
    /// The table carries the client code in the named column.
    Direct(&'static str),
    /// The table is linked to clients through `products.client_code`.
    ViaProduct,
}

#[derive(Debug, Clone, Copy)]
pub struct ProtectedTable {
    pub name: &'static str,
    pub link: ClientLink,
}

/// Tables whose every reference must exclude bonus clients.
pub const PROTECTED_TABLES: &[ProtectedTable] = &[
    ProtectedTable { name: "profit", link: ClientLink::Direct("client_code") },
    ProtectedTable { name: "orders", link: ClientLink::Direct("client_code") },
    ProtectedTable { name: "debt", link: ClientLink::Direct("client_code") },
    ProtectedTable { name: "managers_plan", link: ClientLink::Direct("client_code") },
    ProtectedTable { name: "stock", link: ClientLink::ViaProduct },
];

impl ProtectedTable {
    /// Parenthesized subquery that replaces the bare table reference.
    pub fn filtered_subquery(&self) -> String {
        match self.link {
            ClientLink::Direct(column) => format!(
                "(SELECT * FROM public.{table} WHERE {column} NOT IN \
                 (SELECT client_code FROM public.clients WHERE marker = '{marker}'))",
                table = self.name,
                column = column,
                marker = BONUS_MARKER,
            ),
            ClientLink::ViaProduct => format!(
                "(SELECT * FROM public.{table} WHERE product_code IN (\
                 SELECT pr.product_code FROM public.products pr \
                 LEFT JOIN public.clients c ON pr.client_code = c.client_code \
                 WHERE c.client_code IS NULL OR c.marker <> '{marker}'))",
                table = self.name,
                marker = BONUS_MARKER,
            ),
        }
    }
}

struct TableRule {
    table: ProtectedTable,
    subquery: String,
    from_pattern: Regex,
    join_pattern: Regex,
}

impl TableRule {
    fn new(table: ProtectedTable) -> Self {
        let pattern = |keyword: &str| {
            Regex::new(&format!(
                concat!(
                    r#"(?i)\b{keyword}{gap}(?:ONLY{gap})?(?:"?public"?\.)?(?:"{table}"|{table}\b)"#,
                    r"(?P<tail>\s+(?:AS\s+)?(?P<alias>[a-zA-Z_][a-zA-Z0-9_]*))?",
                ),
                keyword = keyword,
                gap = GAP,
                table = regex::escape(table.name),
            ))
            .expect("table reference pattern")
        };
        Self {
            subquery: table.filtered_subquery(),
            from_pattern: pattern("FROM"),
            join_pattern: pattern("JOIN"),
            table,
        }
    }

    /// Wrap every `FROM`/`JOIN` reference, leaving already-wrapped ones alone.
    fn apply(&self, query: &str) -> (String, usize) {
        let mut wrapped = 0;
        let query = self.rewrite(query, &self.from_pattern, "FROM", &mut wrapped);
        let query = self.rewrite(&query, &self.join_pattern, "JOIN", &mut wrapped);
        (query, wrapped)
    }

    fn rewrite(
        &self,
        query: &str,
        pattern: &Regex,
        keyword: &str,
        wrapped: &mut usize,
    ) -> String {
        let guarded = guarded_spans(query, &self.subquery);
        pattern
            .replace_all(query, |caps: &Captures| {
                let Some(whole) = caps.get(0) else {
                    return String::new();
                };
                if guarded.iter().any(|span| span.contains(&whole.start())) {
                    return whole.as_str().to_string();
                }
                *wrapped += 1;
                match caps.name("alias") {
                    Some(alias) if !is_clause_keyword(alias.as_str()) => {
                        format!("{} {} {}", keyword, self.subquery, alias.as_str())
                    }
                    // The word after the table belongs to the next clause: keep it verbatim.
                    Some(_) => format!(
                        "{} {} {}{}",
                        keyword,
                        self.subquery,
                        self.table.name,
                        caps.name("tail").map(|t| t.as_str()).unwrap_or_default()
                    ),
                    None => format!("{} {} {}", keyword, self.subquery, self.table.name),
                }
            })
            .into_owned()
    }
}

fn guarded_spans(query: &str, subquery: &str) -> Vec<Range<usize>> {
    query
        .match_indices(subquery)
        .map(|(start, text)| start..start + text.len())
        .collect()
}

fn is_clause_keyword(word: &str) -> bool {
    CLAUSE_KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(word))
}

/// Validates and rewrites LLM-generated SQL.
pub struct SqlGuard {
    rules: Vec<TableRule>,
}

impl Default for SqlGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlGuard {
    pub fn new() -> Self {
        Self::with_tables(PROTECTED_TABLES)
    }

    pub fn with_tables(tables: &[ProtectedTable]) -> Self {
        Self {
            rules: tables.iter().copied().map(TableRule::new).collect(),
        }
    }

    /// Validate `sql` and inject the bonus-client filter.
    ///
    /// Fails with [`BotError::RejectedQuery`] for empty input, more than one
    /// statement, anything not starting with `SELECT`/`WITH`, or any DDL/DML
    /// keyword appearing as a whole word.
    pub fn guard(&self, sql: &str) -> Result<String> {
        let query = validate(sql).map_err(|reason| {
            warn!("Rejected SQL ({}): {}", reason, preview(sql));
            BotError::RejectedQuery(reason.to_string())
        })?;

        let mut guarded = query.to_string();
        for rule in &self.rules {
            let (rewritten, count) = rule.apply(&guarded);
            if count > 0 {
                debug!("Wrapped {} reference(s) to {}", count, rule.table.name);
            }
            guarded = rewritten;
        }
        Ok(guarded)
    }
}

fn validate(sql: &str) -> std::result::Result<&str, &'static str> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err("empty SQL query");
    }
    let query = trimmed.strip_suffix(';').unwrap_or(trimmed);
    if MULTI_STATEMENT.is_match(query) {
        return Err("multiple SQL statements are not allowed");
    }
    if !LEADING_KEYWORD.is_match(query) {
        return Err("only SELECT or WITH statements are allowed");
    }
    if FORBIDDEN.is_match(query) {
        return Err("DDL/DML statements are not allowed");
    }
    Ok(query)
}

fn preview(sql: &str) -> String {
    let mut chars = sql.chars();
    let head: String = chars.by_ref().take(200).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// Guard with the default protected table set.
pub fn guard_sql(sql: &str) -> Result<String> {
    DEFAULT_GUARD.guard(sql)
}

/// Drop leading `--` line comments and `/* */` block comments.
///
/// An unterminated block comment is left in place.
pub fn strip_leading_comments(sql: &str) -> &str {
    let mut rest = sql.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix("--") {
            rest = match after.find('\n') {
                Some(nl) => after[nl + 1..].trim_start(),
                None => "",
            };
        } else if let Some(after) = rest.strip_prefix("/*") {
            match after.find("*/") {
                Some(end) => rest = after[end + 2..].trim_start(),
                None => return rest,
            }
        } else {
            return rest;
        }
    }
}

//! Allow-list HTML sanitizer for Telegram's HTML parse mode.
//!
//! Only a fixed set of inline tags survives. Every other tag is stripped while
//! its text is kept, stray `<`, `>` and `&` are escaped, and tags left open at
//! the end of the input are closed so each sanitized fragment is well formed
//! on its own.

use regex::Regex;

lazy_static::lazy_static! {
    static ref TAG: Regex =
        Regex::new(r"<(/?)([a-zA-Z][a-zA-Z0-9-]*)([^<>]*)>").expect("tag pattern");
    static ref ENTITY: Regex = Regex::new(r"&(?:#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z][a-zA-Z0-9]*);")
        .expect("entity pattern");
    static ref HREF: Regex =
        Regex::new(r#"(?i)\bhref\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("href pattern");
    static ref CLASS: Regex =
        Regex::new(r#"(?i)\bclass\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("class pattern");
}

pub const ALLOWED_TAGS: &[&str] = &[
    "b", "strong", "i", "em", "u", "ins", "s", "strike", "del", "code", "pre", "a", "span",
    "tg-spoiler",
];

const ALLOWED_SCHEMES: &[&str] = &["http://", "https://", "tg://", "mailto:"];

/// Sanitize one fragment of HTML.
pub fn sanitize_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    // Open tags in nesting order; `false` marks a span whose tag was dropped.
    let mut open: Vec<(String, bool)> = Vec::new();
    let mut last = 0;

    for caps in TAG.captures_iter(html) {
        let Some(whole) = caps.get(0) else { continue };
        escape_text_into(&html[last..whole.start()], &mut out);
        last = whole.end();

        let closing = !caps[1].is_empty();
        let name = caps[2].to_lowercase();
        if !ALLOWED_TAGS.contains(&name.as_str()) {
            continue;
        }

        if closing {
            if let Some(pos) = open.iter().rposition(|(t, _)| *t == name) {
                for (tag, _) in open.drain(pos..).rev().filter(|(_, kept)| *kept) {
                    out.push_str(&format!("</{}>", tag));
                }
            }
            continue;
        }

        match opening_tag(&name, &caps[3]) {
            Some(tag) => {
                out.push_str(&tag);
                open.push((name, true));
            }
            None => open.push((name, false)),
        }
    }
    escape_text_into(&html[last..], &mut out);

    for (tag, _) in open.iter().rev().filter(|(_, kept)| *kept) {
        out.push_str(&format!("</{}>", tag));
    }
    out
}

/// Text content with every tag removed; entities are left as they are.
pub fn strip_tags(html: &str) -> String {
    TAG.replace_all(html, "").into_owned()
}

/// Rebuild an allowed opening tag with only its permitted attributes.
fn opening_tag(name: &str, attrs: &str) -> Option<String> {
    match name {
        "a" => {
            let href = HREF
                .captures(attrs)
                .and_then(|c| c.get(1).or_else(|| c.get(2)))
                .map(|m| m.as_str().trim())
                .filter(|h| ALLOWED_SCHEMES.iter().any(|s| h.to_lowercase().starts_with(s)));
            Some(match href {
                Some(h) => {
                    format!("<a href=\"{}\">", html_escape::encode_double_quoted_attribute(h))
                }
                None => "<a>".to_string(),
            })
        }
        "span" => {
            let class = CLASS
                .captures(attrs)
                .and_then(|c| c.get(1).or_else(|| c.get(2)))
                .map(|m| m.as_str().trim().to_string());
            match class.as_deref() {
                Some("tg-spoiler") => Some("<span class=\"tg-spoiler\">".to_string()),
                _ => None,
            }
        }
        _ => Some(format!("<{}>", name)),
    }
}

/// Escape markup characters, leaving well-formed entities untouched.
fn escape_text_into(text: &str, out: &mut String) {
    let mut last = 0;
    for entity in ENTITY.find_iter(text) {
        out.push_str(&html_escape::encode_text(&text[last..entity.start()]));
        out.push_str(entity.as_str());
        last = entity.end();
    }
    out.push_str(&html_escape::encode_text(&text[last..]));
}

/// Escape plain text for inclusion in HTML output.
pub fn escape(text: &str) -> String {
    html_escape::encode_text(text).into_owned()
}

//! Feed entry body clean-up: pull out images, keep a small tag allow-list.

use regex::{Captures, Regex};
use std::collections::HashSet;

lazy_static::lazy_static! {
    static ref IMG_SRC: Regex =
        Regex::new(r#"(?is)<img\b(?:[^>"']|"[^"]*"|'[^']*')*?\bsrc\s*=\s*["']?([^"'\s>]+)"#)
            .unwrap();
    static ref IMG_TAG: Regex =
        Regex::new(r#"(?is)<img\b(?:[^>"']|"[^"]*"|'[^']*')*>"#).unwrap();
    static ref BR_TAG: Regex = Regex::new(r"(?i)<br\s*/?>").unwrap();
    static ref DROPPED_BLOCK: Regex =
        Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)\s*>|<!--.*?-->").unwrap();
    static ref ANY_TAG: Regex =
        Regex::new(r#"(?s)<(/?)([a-zA-Z][a-zA-Z0-9]*)((?:[^>"']|"[^"]*"|'[^']*')*)>"#).unwrap();
    static ref ATTRIBUTE: Regex =
        Regex::new(r#"([a-zA-Z_:][-a-zA-Z0-9_:.]*)\s*=\s*("[^"]*"|'[^']*'|[^\s"'>]+)"#).unwrap();
    static ref BLANK_RUNS: Regex = Regex::new(r"\n{3,}").unwrap();
}

const ALLOWED_TAGS: [(&str, &[&str]); 5] = [
    ("a", &["href", "title", "target", "rel"]),
    ("p", &[]),
    ("span", &["class"]),
    ("em", &[]),
    ("strong", &[]),
];

/// `src` of every `<img>` with an http(s) URL, first occurrence order.
pub fn extract_image_urls(html: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    IMG_SRC
        .captures_iter(html)
        .filter_map(|caps| caps.get(1))
        .map(|m| decode_entities(m.as_str().trim()))
        .filter(|url| url.starts_with("http://") || url.starts_with("https://"))
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

pub fn strip_images(html: &str) -> String {
    IMG_TAG.replace_all(html, "").into_owned()
}

/// Images removed, line breaks turned into blank lines, everything outside
/// the allow-list stripped with its text kept.
pub fn clean_entry_body(html: &str) -> String {
    let without_images = strip_images(html);
    let with_breaks = BR_TAG.replace_all(&without_images, "\n\n");
    let sanitized = sanitize(&with_breaks);
    BLANK_RUNS
        .replace_all(sanitized.trim(), "\n\n")
        .into_owned()
}

pub fn sanitize(html: &str) -> String {
    let html = DROPPED_BLOCK.replace_all(html, "");
    ANY_TAG
        .replace_all(&html, |caps: &Captures| rebuild_tag(caps))
        .into_owned()
}

fn rebuild_tag(caps: &Captures) -> String {
    let closing = !caps[1].is_empty();
    let name = caps[2].to_ascii_lowercase();
    let allowed = match ALLOWED_TAGS.iter().find(|(tag, _)| *tag == name) {
        Some((_, attrs)) => *attrs,
        None => return String::new(),
    };
    if closing {
        return format!("</{}>", name);
    }

    let mut tag = format!("<{}", name);
    for attr in ATTRIBUTE.captures_iter(&caps[3]) {
        let attr_name = attr[1].to_ascii_lowercase();
        if !allowed.contains(&attr_name.as_str()) {
            continue;
        }
        let value = attr[2].trim_matches(|c| c == '"' || c == '\'');
        if attr_name == "href" && !is_safe_href(value) {
            continue;
        }
        tag.push_str(&format!(" {}=\"{}\"", attr_name, escape_attribute(value)));
    }
    tag.push('>');
    tag
}

fn is_safe_href(value: &str) -> bool {
    let lower = value.trim().to_ascii_lowercase();
    match lower.split_once(':') {
        // relative or fragment links
        None => true,
        Some((scheme, _)) if scheme.contains('/') => true,
        Some((scheme, _)) => matches!(scheme, "http" | "https" | "mailto"),
    }
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn decode_entities(raw: &str) -> String {
    raw.replace("&amp;", "&")
}

//! Generic derive bodies shared by pipelines and the CLI.
//!
//! All of them depend on the payload by default; rebind with
//! [`EnrichFunction::on`] or [`EnrichFunction::after`].

use super::{EnrichFunction, Multiplicity};
use crate::context::RootContext;
use crate::value::Value;

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::Arc;

static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\W+").expect("static word pattern"));

/// Text view of a value: text as is, bytes decoded lossily.
fn text_of(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::Text(s) => Some(Cow::Borrowed(s.as_str())),
        Value::Bytes(b) => Some(String::from_utf8_lossy(b)),
        _ => None,
    }
}

/// Split an HTTP message at the blank line ending its header block.
fn split_http(bytes: &[u8]) -> Option<(&[u8], &[u8])> {
    if let Some(i) = find(bytes, b"\r\n\r\n") {
        return Some((&bytes[..i], &bytes[i + 4..]));
    }
    find(bytes, b"\n\n").map(|i| (&bytes[..i], &bytes[i + 2..]))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// `body`: bytes following the HTTP header block. Absent if there is none.
pub fn http_body() -> EnrichFunction {
    EnrichFunction::single("body", |v, _| {
        let (_, body) = split_http(v.as_bytes()?)?;
        Some(Value::from(body.to_vec()))
    })
}

/// `headers`: the HTTP header lines, status line first.
pub fn http_headers() -> EnrichFunction {
    EnrichFunction::single("headers", |v, _| {
        let (head, _) = split_http(v.as_bytes()?)?;
        let lines = String::from_utf8_lossy(head)
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| Value::text(l.trim_end()))
            .collect();
        Some(Value::List(lines))
    })
}

/// `string`: lossy UTF-8 decoding.
pub fn utf8() -> EnrichFunction {
    EnrichFunction::single("string", |v, _| text_of(v).map(|s| Value::text(s)))
}

/// `lowercase`: lowercases text, or each text item of a list.
pub fn lowercase() -> EnrichFunction {
    EnrichFunction::single("lowercase", |v, _| match v {
        Value::List(items) => Some(Value::List(
            items
                .iter()
                .filter_map(|i| text_of(i).map(|s| Value::text(s.to_lowercase())))
                .collect(),
        )),
        other => text_of(other).map(|s| Value::text(s.to_lowercase())),
    })
}

fn split_words(text: &str) -> Vec<Value> {
    NON_WORD
        .split(text)
        .filter(|w| !w.is_empty())
        .map(Value::from)
        .collect()
}

/// `terms`: words split on non-word characters.
///
/// Single: one list value. Multi: one fork per word, duplicates kept.
pub fn words(multiplicity: Multiplicity) -> EnrichFunction {
    match multiplicity {
        Multiplicity::Single => EnrichFunction::single("terms", |v, _| {
            text_of(v).map(|s| Value::List(split_words(&s)))
        }),
        Multiplicity::Multi => EnrichFunction::multi("terms", |v, _| {
            text_of(v).map(|s| split_words(&s)).unwrap_or_default()
        }),
    }
}

/// `distinct`: list with duplicates removed, first occurrence wins.
pub fn distinct() -> EnrichFunction {
    EnrichFunction::single("distinct", |v, _| {
        let items = v.as_list()?;
        let mut seen = HashSet::new();
        let out = items
            .iter()
            .filter(|i| seen.insert(i.to_flat()))
            .cloned()
            .collect();
        Some(Value::List(out))
    })
}

/// Regex capture `group` over text. Single keeps the first match, multi
/// forks per match.
pub fn regex(name: &str, pattern: Regex, group: usize, multiplicity: Multiplicity) -> EnrichFunction {
    let captures = move |v: &Value, _: &RootContext| -> Vec<Value> {
        let Some(text) = text_of(v) else {
            return Vec::new();
        };
        let all = pattern
            .captures_iter(&text)
            .filter_map(|c| c.get(group).map(|m| Value::text(m.as_str())));
        match multiplicity {
            Multiplicity::Single => all.take(1).collect(),
            Multiplicity::Multi => all.collect(),
        }
    };
    EnrichFunction::raw(name, multiplicity, Arc::new(captures))
}

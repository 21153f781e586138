//! CDX index records: the lightweight metadata every record tree starts from.

use crate::Result;
use crate::diagnostics;
use crate::value::Value;

use anyhow::{Context, bail};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::fs;

/// Number of columns in a CDX-11 line.
pub const CDX_COLUMNS: usize = 11;

const MISSING: &str = "-";

static TIMESTAMP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4,14}$").expect("static timestamp pattern"));

/// Where the archived payload lives: a container file plus a byte range.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator {
    pub filename: String,
    pub offset: u64,
    pub length: u64,
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}+{}", self.filename, self.offset, self.length)
    }
}

/// One CDX-11 row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdxRecord {
    pub surt_url: String,
    /// 14-digit capture time (yyyyMMddHHmmss); shorter prefixes are accepted.
    pub timestamp: String,
    pub original_url: String,
    pub mime: Option<String>,
    pub status: Option<u16>,
    pub digest: Option<String>,
    pub redirect_url: Option<String>,
    pub meta: Option<String>,
    pub locator: Option<Locator>,
}

impl CdxRecord {
    /// Metadata fields exposed under the `record` subtree, missing values omitted.
    pub fn fields(&self) -> Vec<(&'static str, Value)> {
        let mut out = vec![
            ("surt_url", Value::text(&self.surt_url)),
            ("timestamp", Value::text(&self.timestamp)),
            ("original_url", Value::text(&self.original_url)),
        ];
        if let Some(mime) = &self.mime {
            out.push(("mime", Value::text(mime)));
        }
        if let Some(status) = self.status {
            out.push(("status", Value::Int(i64::from(status))));
        }
        if let Some(digest) = &self.digest {
            out.push(("digest", Value::text(digest)));
        }
        if let Some(redirect) = &self.redirect_url {
            out.push(("redirect_url", Value::text(redirect)));
        }
        if let Some(meta) = &self.meta {
            out.push(("meta", Value::text(meta)));
        }
        if let Some(size) = self.locator.as_ref().and_then(|l| i64::try_from(l.length).ok()) {
            out.push(("compressed_size", Value::Int(size)));
        }
        out
    }

    /// Render back into a CDX-11 line.
    pub fn to_cdx_line(&self) -> String {
        fn opt(v: &Option<String>) -> &str {
            v.as_deref().unwrap_or(MISSING)
        }
        let status = self
            .status
            .map(|s| s.to_string())
            .unwrap_or_else(|| MISSING.to_string());
        let (length, offset, filename) = match &self.locator {
            Some(l) => (l.length.to_string(), l.offset.to_string(), l.filename.clone()),
            None => (MISSING.to_string(), MISSING.to_string(), MISSING.to_string()),
        };
        [
            self.surt_url.as_str(),
            self.timestamp.as_str(),
            self.original_url.as_str(),
            opt(&self.mime),
            status.as_str(),
            opt(&self.digest),
            opt(&self.redirect_url),
            opt(&self.meta),
            length.as_str(),
            offset.as_str(),
            filename.as_str(),
        ]
        .join(" ")
    }
}

/// Parse a CDX file into records, in file order.
pub fn parse_cdx_file(path: &str) -> Result<Vec<CdxRecord>> {
    let text = fs::read_to_string(path)
        .with_context(|| diagnostics::error_message(format!("read cdx file {}", path)))?;
    parse_cdx_str(&text, path)
}

/// Parse CDX text. `origin` names the source in error messages.
///
/// Expected columns (whitespace-separated):
/// urlkey timestamp original mime status digest redirect meta length offset filename
///
/// Example:
/// org,example)/ 20200101000000 http://example.org/ text/html 200 ABC - - 512 0 a.warc
pub fn parse_cdx_str(text: &str, origin: &str) -> Result<Vec<CdxRecord>> {
    let mut out = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let lno = lineno + 1;
        let line = line.trim();

        if line.is_empty() {
            continue;
        }

        // Skip the " CDX N b a m s k r M S V g" header if present.
        if line.starts_with("CDX") {
            continue;
        }

        let record = parse_cdx_line(line)
            .with_context(|| diagnostics::error_message(format!("cdx parse error at {}:{}", origin, lno)))?;
        out.push(record);
    }
    Ok(out)
}

pub fn parse_cdx_line(line: &str) -> Result<CdxRecord> {
    let cols: Vec<&str> = line.split_whitespace().collect();
    if cols.len() != CDX_COLUMNS {
        bail!(
            "expected {} columns, found {}: {:?}",
            CDX_COLUMNS,
            cols.len(),
            line
        );
    }

    let timestamp = cols[1];
    if !TIMESTAMP_RE.is_match(timestamp) {
        bail!("bad timestamp {:?}", timestamp);
    }

    let status = match optional(cols[4]) {
        Some(s) => Some(
            s.parse::<u16>()
                .with_context(|| format!("bad status code {:?}", s))?,
        ),
        None => None,
    };

    let locator = match (optional(cols[8]), optional(cols[9]), optional(cols[10])) {
        (Some(length), Some(offset), Some(filename)) => {
            // Lengths are exposed as signed integers under `record/compressed_size`.
            let length: i64 = length
                .parse()
                .with_context(|| format!("bad length {:?}", length))?;
            if length < 0 {
                bail!("negative length {}", length);
            }
            Some(Locator {
                filename: filename.to_string(),
                offset: offset
                    .parse()
                    .with_context(|| format!("bad offset {:?}", offset))?,
                length: length as u64,
            })
        }
        _ => None,
    };

    Ok(CdxRecord {
        surt_url: cols[0].to_string(),
        timestamp: timestamp.to_string(),
        original_url: cols[2].to_string(),
        mime: optional(cols[3]).map(str::to_string),
        status,
        digest: optional(cols[5]).map(str::to_string),
        redirect_url: optional(cols[6]).map(str::to_string),
        meta: optional(cols[7]).map(str::to_string),
        locator,
    })
}

fn optional(col: &str) -> Option<&str> {
    (col != MISSING).then_some(col)
}

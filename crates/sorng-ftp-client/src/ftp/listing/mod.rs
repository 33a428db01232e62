//! Directory listing parser.
//!
//! Three grammars, tried in this order when auto-detecting:
//! 1. **MLSD facts** (RFC 3659): `type=file;size=1234;modify=20260101120000; file.txt`
//! 2. **Unix-style** (`ls -l`): `-rwxr-xr-x 1 owner group 1234 Jan  1 12:00 file.txt`
//! 3. **DOS/IIS-style**: `01-01-26  12:00AM       1234 file.txt`
//!
//! The first grammar matching the first significant line parses the whole
//! body. Lenient parsing skips lines the grammar rejects; strict parsing
//! fails on them.

pub mod dos;
pub mod mlsd;
pub mod unix;

use serde::{Deserialize, Serialize};

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::types::FtpEntry;

/// One listing grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ListingFormat {
    Mlsd,
    Unix,
    Dos,
}

impl ListingFormat {
    /// Auto-detection priority.
    pub const DETECTION_ORDER: [ListingFormat; 3] =
        [ListingFormat::Mlsd, ListingFormat::Unix, ListingFormat::Dos];

    /// Whether `line` looks like this grammar.
    pub fn matches(self, line: &str) -> bool {
        match self {
            Self::Mlsd => mlsd::matches(line),
            Self::Unix => unix::matches(line),
            Self::Dos => dos::matches(line),
        }
    }

    /// Parse one line; `None` when the grammar rejects it.
    pub fn parse_line(self, line: &str, strict: bool) -> Option<FtpEntry> {
        match self {
            Self::Mlsd => mlsd::parse(line, strict),
            Self::Unix => unix::parse(line, strict),
            Self::Dos => dos::parse(line, strict),
        }
    }
}

/// Which grammar(s) to apply to a listing body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListingStyle {
    #[default]
    Auto,
    Forced(ListingFormat),
}

/// Grammar of the first significant line, if any grammar matches it.
pub fn detect_format(body: &str) -> Option<ListingFormat> {
    let first = significant_lines(body).next()?;
    ListingFormat::DETECTION_ORDER
        .into_iter()
        .find(|format| format.matches(first))
}

/// Parse a listing body, skipping lines that do not parse.
///
/// An empty body, or one no grammar understands, yields an empty list.
pub fn parse_listing(body: &str, style: ListingStyle) -> Vec<FtpEntry> {
    let Some(format) = resolve(body, style) else {
        return Vec::new();
    };
    significant_lines(body)
        .filter_map(|line| format.parse_line(line, false))
        .filter(|entry| !is_self_reference(entry))
        .collect()
}

/// Parse a listing body, failing on the first line that does not parse.
pub fn parse_listing_strict(body: &str, style: ListingStyle) -> FtpResult<Vec<FtpEntry>> {
    let Some(format) = resolve(body, style) else {
        return match significant_lines(body).next() {
            None => Ok(Vec::new()),
            Some(line) => Err(FtpError::protocol_error(format!(
                "Unrecognised listing format: '{}'",
                line
            ))),
        };
    };

    let mut entries = Vec::new();
    for line in significant_lines(body) {
        let entry = format.parse_line(line, true).ok_or_else(|| {
            FtpError::protocol_error(format!("Unparseable {:?} listing line: '{}'", format, line))
        })?;
        if !is_self_reference(&entry) {
            entries.push(entry);
        }
    }
    Ok(entries)
}

fn resolve(body: &str, style: ListingStyle) -> Option<ListingFormat> {
    match style {
        ListingStyle::Auto => detect_format(body),
        ListingStyle::Forced(format) => Some(format),
    }
}

/// Non-empty lines, line endings removed, Unix `total N` summaries skipped.
fn significant_lines(body: &str) -> impl Iterator<Item = &str> {
    body.lines()
        .map(|line| line.trim_end_matches('\r').trim_start())
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !unix::is_total_line(line))
}

fn is_self_reference(entry: &FtpEntry) -> bool {
    if entry.name == "." || entry.name == ".." {
        return true;
    }
    matches!(
        entry.facts.get("type").map(|t| t.to_ascii_lowercase()).as_deref(),
        Some("cdir") | Some("pdir")
    )
}

//! DOS / IIS style lines:
//! ```text
//! 01-01-26  12:00AM       <DIR>          Directory Name
//! 01-01-2026  14:05              1234 file.txt
//! ```

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;

use crate::ftp::types::{FtpEntry, FtpEntryKind};

lazy_static! {
    static ref DATE_FIRST: Regex = Regex::new(r"^\d{2}-\d{2}-\d{2,4}\s").unwrap();
    static ref LINE: Regex = Regex::new(
        r"(?xi)
        ^(\d{2}-\d{2}-\d{2,4})\s+            # date
        (\d{1,2}:\d{2}\s*(?:AM|PM)?)\s+      # time
        (<DIR>|\S+)\s+                       # size or <DIR>
        (.+)$                                # name
        ",
    )
    .unwrap();
}

/// First token is an `MM-DD-YY` date.
pub fn matches(line: &str) -> bool {
    DATE_FIRST.is_match(line)
}

pub fn parse(line: &str, strict: bool) -> Option<FtpEntry> {
    let caps = LINE.captures(line)?;
    let date = caps.get(1)?.as_str();
    let time = caps.get(2)?.as_str();
    let size_or_dir = caps.get(3)?.as_str();
    let name = caps.get(4)?.as_str();

    let (kind, size) = if size_or_dir.eq_ignore_ascii_case("<DIR>") {
        (FtpEntryKind::Directory, 0)
    } else {
        // Some servers group digits: `1,234` or `1.234`.
        let digits: String = size_or_dir.chars().filter(|c| *c != ',' && *c != '.').collect();
        let size = match digits.parse::<u64>() {
            Ok(n) => n,
            Err(_) if strict => return None,
            Err(_) => 0,
        };
        (FtpEntryKind::File, size)
    };

    let mut entry = FtpEntry::new(name, kind);
    entry.size = size;
    entry.modified = parse_date(date, time);
    entry.modified_raw = Some(format!("{} {}", date, time));
    Some(entry)
}

fn parse_date(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let date_fmt = if date.len() == 10 { "%m-%d-%Y" } else { "%m-%d-%y" };
    let date = NaiveDate::parse_from_str(date, date_fmt).ok()?;

    let time: String = time
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase();
    let time = if time.ends_with('M') {
        NaiveTime::parse_from_str(&time, "%I:%M%p").ok()?
    } else {
        NaiveTime::parse_from_str(&time, "%H:%M").ok()?
    };
    Some(Utc.from_utc_datetime(&NaiveDateTime::new(date, time)))
}

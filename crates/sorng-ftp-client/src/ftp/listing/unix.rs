//! Unix `ls -l` lines:
//! ```text
//! drwxr-xr-x   2 user group  4096 Jan  1 12:00 dirname
//! -rw-r--r--   1 user group  1234 Jan  1  2025 file.txt
//! lrwxrwxrwx   1 user group    42 Jan  1 12:00 link -> target
//! -rw-r--r--   1 user        1234 Jan  1  2025 no-group.txt
//! ```

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;

use crate::ftp::types::{FtpEntry, FtpEntryKind};

lazy_static! {
    static ref PERMISSIONS: Regex = Regex::new(r"^[bcdelfmpSs-][rwxsStTL-]{9}").unwrap();
    static ref LINE: Regex = Regex::new(
        r"(?x)
        ^([bcdelfmpSs-][rwxsStTL-]{9})[+@.]?\s+   # permissions (+ ACL marker)
        (\d+)\s+                                   # link count
        (\S+)\s+                                   # owner
        (?:(\S+)\s+)?                              # group (optional)
        (\d+(?:,\s*\d+)?|\S+)\s+                    # size, or `major, minor` for devices
        (\w{3}\s+\d{1,2}\s+(?:\d{1,2}:\d{2}|\d{4}))\s+  # date
        (.+)$                                      # name (possibly with -> target)
        ",
    )
    .unwrap();
    static ref DEVICE_NUMBERS: Regex = Regex::new(r"^\d+,\s*\d+$").unwrap();
    static ref TOTAL: Regex = Regex::new(r"^total\s+\d+\s*$").unwrap();
}

/// First token is a permission string.
pub fn matches(line: &str) -> bool {
    PERMISSIONS.is_match(line)
}

/// `total 42` summary that precedes most `ls -l` output.
pub fn is_total_line(line: &str) -> bool {
    TOTAL.is_match(line)
}

pub fn parse(line: &str, strict: bool) -> Option<FtpEntry> {
    parse_at(line, strict, Utc::now())
}

fn parse_at(line: &str, strict: bool, now: DateTime<Utc>) -> Option<FtpEntry> {
    let caps = LINE.captures(line)?;

    let perms = caps.get(1)?.as_str();
    let size = parse_size(caps.get(5)?.as_str(), strict)?;
    let date_str = caps.get(6)?.as_str();
    let name_raw = caps.get(7)?.as_str();

    let kind = match perms.as_bytes().first() {
        Some(b'd') => FtpEntryKind::Directory,
        Some(b'l') => FtpEntryKind::Symlink,
        Some(b'-') | Some(b'f') => FtpEntryKind::File,
        _ => FtpEntryKind::Unknown,
    };

    let (name, link_target) = match (kind, name_raw.split_once(" -> ")) {
        (FtpEntryKind::Symlink, Some((name, target))) => (name, Some(target.to_string())),
        _ => (name_raw, None),
    };

    let mut entry = FtpEntry::new(name, kind);
    entry.size = size;
    entry.link_target = link_target;
    entry.permissions = Some(perms.to_string());
    entry.owner = caps.get(3).map(|m| m.as_str().to_string());
    entry.group = caps.get(4).map(|m| m.as_str().to_string());
    entry.modified = parse_date(date_str, now);
    entry.modified_raw = Some(date_str.to_string());
    Some(entry)
}

/// Device files list `major, minor` where the size goes; they have no size.
/// Anything else that is not a number is 0, or rejected in strict mode.
fn parse_size(raw: &str, strict: bool) -> Option<u64> {
    if DEVICE_NUMBERS.is_match(raw) {
        return Some(0);
    }
    match raw.parse::<u64>() {
        Ok(n) => Some(n),
        Err(_) if strict => None,
        Err(_) => Some(0),
    }
}

/// `Jan  1 12:00` (within the last year) or `Jan  1  2025`.
fn parse_date(s: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let parts: Vec<&str> = s.split_whitespace().collect();
    let [month, day, tail] = parts.as_slice() else {
        return None;
    };

    if let Some((h, m)) = tail.split_once(':') {
        let time = NaiveTime::from_hms_opt(h.parse().ok()?, m.parse().ok()?, 0)?;
        let at_year = |year: i32| {
            NaiveDate::parse_from_str(&format!("{} {} {}", month, day, year), "%b %d %Y")
                .ok()
                .map(|d| Utc.from_utc_datetime(&NaiveDateTime::new(d, time)))
        };
        let this_year = at_year(now.year())?;
        // Timestamps without a year are never in the future.
        if this_year > now + chrono::Duration::days(1) {
            return at_year(now.year() - 1);
        }
        return Some(this_year);
    }

    let date = NaiveDate::parse_from_str(&format!("{} {} {}", month, day, tail), "%b %d %Y").ok()?;
    Some(Utc.from_utc_datetime(&date.and_time(NaiveTime::from_hms_opt(0, 0, 0)?)))
}

//! MLSD fact lines (RFC 3659 §7): `fact1=val1;fact2=val2; filename`

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use crate::ftp::types::{FtpEntry, FtpEntryKind};

/// A facts part containing a `type=` fact.
pub fn matches(line: &str) -> bool {
    line.split_once(' ')
        .map(|(facts, _)| facts.to_ascii_lowercase().contains("type="))
        .unwrap_or(false)
}

pub fn parse(line: &str, strict: bool) -> Option<FtpEntry> {
    let (facts_str, name) = line.split_once(' ')?;
    if name.is_empty() || !facts_str.contains('=') {
        return None;
    }

    let mut facts: HashMap<String, String> = HashMap::new();
    for segment in facts_str.split(';').filter(|s| !s.is_empty()) {
        match segment.split_once('=') {
            Some((k, v)) => {
                facts.insert(k.to_ascii_lowercase(), v.to_string());
            }
            None if strict => return None,
            None => {}
        }
    }

    let type_fact = facts.get("type").map(|t| t.to_ascii_lowercase());
    let (kind, link_target) = match type_fact.as_deref() {
        Some("file") => (FtpEntryKind::File, None),
        Some("dir") | Some("cdir") | Some("pdir") => (FtpEntryKind::Directory, None),
        Some(t) if t.starts_with("os.unix=slink") || t.starts_with("os.unix=symlink") => {
            // Target keeps its original case.
            let target = facts
                .get("type")
                .and_then(|raw| raw.split_once(':'))
                .map(|(_, target)| target.to_string())
                .filter(|target| !target.is_empty());
            (FtpEntryKind::Symlink, target)
        }
        _ => (FtpEntryKind::Unknown, None),
    };

    let size = match facts.get("size").or_else(|| facts.get("sizd")) {
        Some(raw) => match raw.parse::<u64>() {
            Ok(n) => n,
            Err(_) if strict => return None,
            Err(_) => 0,
        },
        None => 0,
    };

    let mut entry = FtpEntry::new(name, kind);
    entry.size = size;
    entry.link_target = link_target;
    if let Some(raw) = facts.get("modify") {
        entry.modified = parse_fact_time(raw);
        entry.modified_raw = Some(raw.clone());
    }
    entry.permissions = facts
        .get("unix.mode")
        .and_then(|mode| symbolic_mode(kind, mode));
    entry.owner = first_fact(&facts, &["unix.owner", "unix.ownername", "unix.uid"]);
    entry.group = first_fact(&facts, &["unix.group", "unix.groupname", "unix.gid"]);
    entry.facts = facts;
    Some(entry)
}

fn first_fact(facts: &HashMap<String, String>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| facts.get(*k).cloned())
}

/// `YYYYMMDDHHMMSS[.fff]`, always UTC. Shared with the MDTM reply.
pub(crate) fn parse_fact_time(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    let (base, fraction) = s.split_once('.').unwrap_or((s, ""));
    if base.len() != 14 {
        return None;
    }
    let dt = NaiveDateTime::parse_from_str(base, "%Y%m%d%H%M%S").ok()?;
    let mut out = Utc.from_utc_datetime(&dt);
    if !fraction.is_empty() && fraction.bytes().all(|b| b.is_ascii_digit()) {
        let millis: String = fraction.chars().chain("000".chars()).take(3).collect();
        let millis: i64 = millis.parse().ok()?;
        out += chrono::Duration::milliseconds(millis);
    }
    Some(out)
}

/// Octal `unix.mode` → `drwxr-xr-x` style.
fn symbolic_mode(kind: FtpEntryKind, octal: &str) -> Option<String> {
    let mode = u32::from_str_radix(octal.trim(), 8).ok()?;
    let type_char = match kind {
        FtpEntryKind::Directory => 'd',
        FtpEntryKind::Symlink => 'l',
        _ => '-',
    };

    let mut out = String::with_capacity(10);
    out.push(type_char);
    let special = [(0o4000, 's', 'S'), (0o2000, 's', 'S'), (0o1000, 't', 'T')];
    for (i, (bit, set_exec, set_only)) in special.iter().enumerate() {
        let shift = 6 - 3 * i as u32;
        let triad = (mode >> shift) & 0o7;
        out.push(if triad & 0o4 != 0 { 'r' } else { '-' });
        out.push(if triad & 0o2 != 0 { 'w' } else { '-' });
        let exec = triad & 0o1 != 0;
        out.push(match (mode & bit != 0, exec) {
            (true, true) => *set_exec,
            (true, false) => *set_only,
            (false, true) => 'x',
            (false, false) => '-',
        });
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn parses_file_facts() {
        let e = parse(
            "type=file;size=1024;modify=20260101120000;UNIX.mode=0644;unix.owner=bob;unix.group=staff; example bin.txt",
            false,
        )
        .unwrap();
        assert_eq!(e.name, "example bin.txt");
        assert_eq!(e.kind, FtpEntryKind::File);
        assert_eq!(e.size, 1024);
        assert_eq!(e.permissions.as_deref(), Some("-rw-r--r--"));
        assert_eq!(e.owner.as_deref(), Some("bob"));
        assert_eq!(e.group.as_deref(), Some("staff"));
        assert_eq!(e.modified_raw.as_deref(), Some("20260101120000"));
        let m = e.modified.unwrap();
        assert_eq!((m.year(), m.month(), m.day(), m.hour()), (2026, 1, 1, 12));
        assert_eq!(e.facts.get("unix.mode").map(String::as_str), Some("0644"));
    }

    #[test]
    fn parses_symlink_target() {
        let e = parse("type=OS.unix=slink:/var/Target;size=7; link", false).unwrap();
        assert_eq!(e.kind, FtpEntryKind::Symlink);
        assert_eq!(e.link_target.as_deref(), Some("/var/Target"));

        let e = parse("type=OS.unix=symlink; other", false).unwrap();
        assert_eq!(e.kind, FtpEntryKind::Symlink);
        assert_eq!(e.link_target, None);
    }

    #[test]
    fn directory_mode_and_ids() {
        let e = parse("type=dir;unix.mode=4755;unix.uid=1000;unix.gid=100; bin", false).unwrap();
        assert_eq!(e.kind, FtpEntryKind::Directory);
        assert_eq!(e.permissions.as_deref(), Some("drwsr-xr-x"));
        assert_eq!(e.owner.as_deref(), Some("1000"));
        assert_eq!(e.group.as_deref(), Some("100"));
    }

    #[test]
    fn bad_size_is_zero_unless_strict() {
        let line = "type=file;size=lots; big.iso";
        assert_eq!(parse(line, false).unwrap().size, 0);
        assert!(parse(line, true).is_none());
        assert_eq!(parse("type=file;sizd=42; d", true).unwrap().size, 42);
    }

    #[test]
    fn fact_time_with_fraction() {
        let t = parse_fact_time("20240229235959.5").unwrap();
        assert_eq!(t.second(), 59);
        assert_eq!(t.timestamp_subsec_millis(), 500);
        assert!(parse_fact_time("2024").is_none());
        assert!(parse_fact_time("20241399000000").is_none());
    }

    #[test]
    fn matcher() {
        assert!(matches("type=file;size=1; a"));
        assert!(matches("Size=1;Type=dir; a"));
        assert!(!matches("-rw-r--r-- 1 u g 1 Jan 1 2024 type=file"));
        assert!(!matches("type=file;"));
    }
}

//! LIST / MLSD response parser.
//!
//! Supports three formats:
//! 1. **Unix-style** (`ls -l`): `-rwxr-xr-x 1 owner group 1234 Jan  1 12:00 file.txt`
//! 2. **Windows/IIS-style**: `01-01-26  12:00AM       1234 file.txt`
//! 3. **MLSD facts** (RFC 3659): `type=file;size=1234;modify=20260101120000; file.txt`
//!
//! MLSD is tried first when the line looks like a fact list, then Unix,
//! then Windows. A line matching none becomes a bare file name.

use crate::ftp::types::{Attributes, DirEntry};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

lazy_static! {
    static ref UNIX_LINE: Regex = Regex::new(
        r"(?x)
        ^([dlcbps-][rwxsStT-]{9})[+@.]?\s+  # permissions (+ optional ACL marker)
        (\d+)\s+                            # link count
        (\S+)\s+                            # owner
        (\S+)\s+                            # group
        (\d+)\s+                            # size
        (\w{3}\s+\d{1,2}\s+[\d:]+)\s        # date
        (.+)$                               # filename (possibly with -> target)
        "
    )
    .unwrap();
    static ref WINDOWS_LINE: Regex = Regex::new(
        r"(?x)
        ^(\d{2}-\d{2}-\d{2,4})\s+           # date
        (\d{1,2}:\d{2}\s?(?:AM|PM)?)\s+     # time
        (<DIR>|\d+)\s+                      # size or <DIR>
        (.+)$                               # filename
        "
    )
    .unwrap();
}

/// Parse a full LIST or MLSD response body into detailed entries.
pub fn parse_listing(raw: &str) -> Vec<DirEntry> {
    raw.lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.trim().is_empty())
        .filter(|l| !is_total_line(l))
        .filter_map(parse_line)
        .filter(|e| e.name != "." && e.name != "..")
        .collect()
}

/// `total 48` heads most Unix listings.
fn is_total_line(line: &str) -> bool {
    line.strip_prefix("total ")
        .map(|rest| rest.trim().bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false)
}

fn parse_line(line: &str) -> Option<DirEntry> {
    if looks_like_mlsd(line) {
        return parse_mlsd(line);
    }
    if let Some(e) = parse_unix(line) {
        return Some(e);
    }
    if let Some(e) = parse_windows(line) {
        return Some(e);
    }
    log::debug!("Unrecognised listing line, keeping name only: {}", line);
    Some(DirEntry::detailed(line.trim(), false, Attributes::default()))
}

// ─── MLSD parser ─────────────────────────────────────────────────────

/// A fact list is `key=value;` pairs with no whitespace before the name.
fn looks_like_mlsd(line: &str) -> bool {
    match line.find("; ") {
        Some(pos) => {
            let facts = &line[..pos];
            facts.contains('=') && !facts.contains(char::is_whitespace)
        }
        None => false,
    }
}

/// Parse MLSD fact-line: `fact1=val1;fact2=val2; filename`
fn parse_mlsd(line: &str) -> Option<DirEntry> {
    let pos = line.find("; ")?;
    let (facts_str, name) = (&line[..pos + 1], line[pos + 2..].to_string());
    if name.is_empty() {
        return None;
    }

    let mut facts: HashMap<String, String> = HashMap::new();
    for segment in facts_str.split(';') {
        if let Some((k, v)) = segment.trim().split_once('=') {
            facts.insert(k.to_lowercase(), v.to_string());
        }
    }

    let kind = facts.get("type").map(|s| s.to_lowercase());
    if matches!(kind.as_deref(), Some("cdir") | Some("pdir")) {
        return None;
    }
    let is_directory = kind.as_deref() == Some("dir");

    let attributes = Attributes {
        size: facts.get("size").and_then(|v| v.parse::<u64>().ok()),
        modified: facts.get("modify").and_then(|v| parse_mlsd_time(v)),
        permissions: facts
            .get("unix.mode")
            .or_else(|| facts.get("perm"))
            .cloned(),
        owner: facts.get("unix.owner").cloned(),
        group: facts.get("unix.group").cloned(),
        link_target: None,
    };
    Some(DirEntry::detailed(name, is_directory, attributes))
}

/// `YYYYMMDDHHmmSS[.fraction]`
fn parse_mlsd_time(s: &str) -> Option<DateTime<Utc>> {
    let base = s.get(..14).unwrap_or(s);
    NaiveDateTime::parse_from_str(base, "%Y%m%d%H%M%S")
        .ok()
        .map(|dt| Utc.from_utc_datetime(&dt))
}

// ─── Unix-style parser ───────────────────────────────────────────────

/// ```text
/// drwxr-xr-x   2 user group  4096 Jan  1 12:00 dirname
/// -rw-r--r--   1 user group  1234 Jan  1  2025 file.txt
/// lrwxrwxrwx   1 user group    42 Jan  1 12:00 link -> target
/// ```
fn parse_unix(line: &str) -> Option<DirEntry> {
    let caps = UNIX_LINE.captures(line)?;

    let perms = caps.get(1)?.as_str();
    let size = caps.get(5)?.as_str().parse::<u64>().ok();
    let date_str = caps.get(6)?.as_str();
    let name_raw = caps.get(7)?.as_str().trim_start();

    let kind = perms.as_bytes().first().copied();
    let (name, link_target) = match (kind, name_raw.find(" -> ")) {
        (Some(b'l'), Some(pos)) => (
            name_raw[..pos].to_string(),
            Some(name_raw[pos + 4..].to_string()),
        ),
        _ => (name_raw.to_string(), None),
    };

    let attributes = Attributes {
        size,
        modified: parse_unix_date(date_str, Utc::now()),
        permissions: Some(perms.to_string()),
        owner: caps.get(3).map(|m| m.as_str().to_string()),
        group: caps.get(4).map(|m| m.as_str().to_string()),
        link_target,
    };
    Some(DirEntry::detailed(name, kind == Some(b'd'), attributes))
}

/// "Jan  1 12:00" (year implied) or "Jan  1  2025". A year-less date that
/// would land in the future belongs to last year.
fn parse_unix_date(s: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let normalised = s.split_whitespace().collect::<Vec<_>>().join(" ");

    if let Ok(dt) = NaiveDateTime::parse_from_str(
        &format!("{} {}", now.year(), normalised),
        "%Y %b %d %H:%M",
    ) {
        let mut stamp = Utc.from_utc_datetime(&dt);
        if stamp > now + chrono::Duration::days(1) {
            let last_year = NaiveDateTime::parse_from_str(
                &format!("{} {}", now.year() - 1, normalised),
                "%Y %b %d %H:%M",
            )
            .ok()?;
            stamp = Utc.from_utc_datetime(&last_year);
        }
        return Some(stamp);
    }

    if let Ok(date) = NaiveDate::parse_from_str(&normalised, "%b %d %Y") {
        let dt = date.and_time(NaiveTime::from_hms_opt(0, 0, 0)?);
        return Some(Utc.from_utc_datetime(&dt));
    }

    None
}

// ─── Windows-style parser ────────────────────────────────────────────

/// ```text
/// 01-01-26  12:00AM       1234 file.txt
/// 01-01-26  12:00PM      <DIR> Directory Name
/// ```
fn parse_windows(line: &str) -> Option<DirEntry> {
    let caps = WINDOWS_LINE.captures(line)?;

    let date_str = caps.get(1)?.as_str();
    let time_str = caps.get(2)?.as_str().replace(' ', "");
    let size_or_dir = caps.get(3)?.as_str();
    let name = caps.get(4)?.as_str().to_string();

    let is_directory = size_or_dir == "<DIR>";
    let attributes = Attributes {
        size: if is_directory {
            None
        } else {
            size_or_dir.parse::<u64>().ok()
        },
        modified: parse_windows_date(date_str, &time_str),
        ..Attributes::default()
    };
    Some(DirEntry::detailed(name, is_directory, attributes))
}

fn parse_windows_date(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let combined = format!("{} {}", date, time);
    ["%m-%d-%y %I:%M%p", "%m-%d-%y %H:%M", "%m-%d-%Y %I:%M%p", "%m-%d-%Y %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&combined, fmt).ok())
        .map(|dt| Utc.from_utc_datetime(&dt))
}

//! Reference-layout timestamps.
//!
//! Layouts are written as the reference time `Mon Jan 2 15:04:05 MST 2006`
//! (e.g. `2006-01-02`, `02 Jan 06 15:04 -0700`) and translated to the strftime
//! dialect chrono understands.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};

/// Layout elements, longest first where one is a prefix of another.
const ELEMENTS: &[(&str, &str)] = &[("January", "%B"),
                                    ("Jan", "%b"),
                                    ("Monday", "%A"),
                                    ("Mon", "%a"),
                                    ("MST", "%Z"),
                                    ("2006", "%Y"),
                                    ("-07:00", "%:z"),
                                    ("-0700", "%z"),
                                    ("Z07:00", "%:z"),
                                    ("Z0700", "%z"),
                                    ("002", "%j"),
                                    ("01", "%m"),
                                    ("02", "%d"),
                                    ("_2", "%e"),
                                    ("03", "%I"),
                                    ("04", "%M"),
                                    ("05", "%S"),
                                    ("06", "%y"),
                                    ("15", "%H"),
                                    ("PM", "%p"),
                                    ("pm", "%P"),
                                    ("1", "%-m"),
                                    ("2", "%-d"),
                                    ("3", "%-I"),
                                    ("4", "%-M"),
                                    ("5", "%-S")];

/// A layout translated to strftime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub strftime:   String,
    /// Layout used `Z07:00`/`Z0700`: a literal `Z` in the input means UTC.
    pub z_for_utc:  bool,
}

/// Translate a reference layout to strftime.
pub fn translate(layout: &str) -> Layout {
    let mut strftime = String::with_capacity(layout.len() * 2);
    let mut z_for_utc = false;
    let mut rest = layout;

    'outer: while !rest.is_empty() {
        if let Some((spec, len)) = fractional_seconds(rest) {
            strftime.push_str(spec);
            rest = &rest[len..];
            continue;
        }
        for (element, spec) in ELEMENTS {
            if let Some(tail) = rest.strip_prefix(element) {
                z_for_utc |= element.starts_with('Z');
                strftime.push_str(spec);
                rest = tail;
                continue 'outer;
            }
        }
        let ch = rest.chars().next().unwrap_or_default();
        if ch == '%' {
            strftime.push_str("%%");
        } else {
            strftime.push(ch);
        }
        rest = &rest[ch.len_utf8()..];
    }

    tracing::trace!("layout {:?} -> strftime {:?}", layout, strftime);
    Layout { strftime, z_for_utc }
}

/// `.000`, `.000000`, `.000000000` give fixed digits; any run of `.9` gives trimmed digits.
fn fractional_seconds(s: &str) -> Option<(&'static str, usize)> {
    let digits = s.strip_prefix('.')?;
    let zeros = digits.bytes().take_while(|&b| b == b'0').count();
    let nines = digits.bytes().take_while(|&b| b == b'9').count();
    let followed_by_digit = |n: usize| digits.as_bytes().get(n).is_some_and(u8::is_ascii_digit);

    match (zeros, nines) {
        (3, _) if !followed_by_digit(3) => Some(("%.3f", 4)),
        (6, _) if !followed_by_digit(6) => Some(("%.6f", 7)),
        (9, _) if !followed_by_digit(9) => Some(("%.9f", 10)),
        (_, n) if n > 0 && !followed_by_digit(n) => Some(("%.f", n + 1)),
        _ => None,
    }
}

/// Parse `value` according to a reference layout.
///
/// Values without a zone are taken as UTC; date-only layouts yield midnight.
pub fn parse(layout: &str, value: &str) -> Result<DateTime<FixedOffset>, String> {
    let Layout { strftime, z_for_utc } = translate(layout);
    let value = match (z_for_utc, value.rfind('Z')) {
        (true, Some(idx)) => format!("{}+00:00{}", &value[..idx], &value[idx + 1..]),
        _ => value.to_string(),
    };
    let strftime = if z_for_utc { strftime.replace("%z", "%:z") } else { strftime };

    if let Ok(dt) = DateTime::parse_from_str(&value, &strftime) {
        return Ok(dt);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(&value, &strftime) {
        return Ok(naive.and_utc().fixed_offset());
    }
    NaiveDate::parse_from_str(&value, &strftime).map_err(|e| format!("parsing time {:?} as {:?}: {}", value, layout, e))
                                                .and_then(|date| {
                                                    date.and_hms_opt(0, 0, 0)
                                                        .map(|naive| naive.and_utc().fixed_offset())
                                                        .ok_or_else(|| format!("no midnight for {}", date))
                                                })
}

/// Format a timestamp according to a reference layout.
pub fn format(time: &DateTime<FixedOffset>, layout: &str) -> String {
    let Layout { strftime, z_for_utc } = translate(layout);
    if z_for_utc && time.offset().local_minus_utc() == 0 {
        // `Z07:00` prints a bare `Z` for UTC.
        return time.format(&strftime.replace("%:z", "Z").replace("%z", "Z")).to_string();
    }
    time.format(&strftime).to_string()
}

/// Default rendering of a timestamp when printed directly, zone name last.
///
/// Fixed offsets carry no abbreviation, so the name is `UTC` or the numeric offset again.
pub fn display(time: &DateTime<FixedOffset>) -> String {
    let stamp = time.format("%Y-%m-%d %H:%M:%S%.f %z");
    match time.offset().local_minus_utc() {
        0 => format!("{} UTC", stamp),
        _ => format!("{} {}", stamp, time.format("%z")),
    }
}

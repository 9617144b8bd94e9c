//! Time strings and timestamps.
//!
//! Display strings (`time_string`/`parse_time`) follow the length of the
//! stream: `H:MM:SS` once the maximum reaches an hour, `MM:SS` otherwise.
//! Timestamps are the text form users paste into transcripts, e.g. `#01:02.3#`.

use serde::{Deserialize, Serialize};

const ONE_HOUR_MS: u64 = 3_600_000;

/// Sub-second precision of timestamps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    Second,
    #[default]
    Tenth,
    Hundredth,
}

impl Precision {
    pub fn digits(self) -> u8 {
        match self {
            Precision::Second => 0,
            Precision::Tenth => 1,
            Precision::Hundredth => 2,
        }
    }
}

/// Characters wrapped around a timestamp.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delimiter {
    None,
    #[default]
    Hash,
    Parens,
    Brackets,
}

impl Delimiter {
    fn pair(self) -> (&'static str, &'static str) {
        match self {
            Delimiter::None => ("", ""),
            Delimiter::Hash => ("#", "#"),
            Delimiter::Parens => ("(", ")"),
            Delimiter::Brackets => ("[", "]"),
        }
    }
}

/// Separator between seconds and their fraction in a timestamp.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FractionSep {
    #[default]
    Dot,
    Dash,
}

impl FractionSep {
    fn as_char(self) -> char {
        match self {
            FractionSep::Dot => '.',
            FractionSep::Dash => '-',
        }
    }
}

/// How timestamps are rendered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimestampFormat {
    pub precision: Precision,
    /// Always `HH:MM:SS`, regardless of the stream length.
    pub fixed: bool,
    pub fraction_sep: FractionSep,
    pub delimiter: Delimiter,
}

struct Parts {
    h: u64,
    m: u64,
    s: u64,
    ms: u64,
}

fn split_ms(ms: u64) -> Parts {
    Parts {
        h: ms / ONE_HOUR_MS,
        m: (ms % ONE_HOUR_MS) / 60_000,
        s: (ms % 60_000) / 1_000,
        ms: ms % 1_000,
    }
}

/// Fraction of `ms` (0..1000) truncated to `digits` digits, or `None` for zero digits.
fn fraction(ms: u64, digits: u8) -> Option<String> {
    match digits {
        0 => None,
        1 => Some(format!("{}", ms / 100)),
        2 => Some(format!("{:02}", ms / 10)),
        _ => Some(format!("{ms:03}")),
    }
}

/// Format `ms` for display; `digits` (0..=3) sets the fractional-second suffix.
pub fn time_string(ms: u64, max_ms: u64, digits: u8) -> String {
    let p = split_ms(ms);
    let mut out = if max_ms >= ONE_HOUR_MS {
        format!("{}:{:02}:{:02}", p.h, p.m, p.s)
    } else {
        // Short form folds hours into minutes; `max_ms` is only an estimate.
        format!("{:02}:{:02}", p.h * 60 + p.m, p.s)
    };
    if let Some(frac) = fraction(p.ms, digits) {
        out.push('.');
        out.push_str(&frac);
    }
    out
}

/// Parse `[[H:]M:]S[.fff]` into milliseconds.
///
/// Fields are read right to left as seconds, minutes, hours. Only the seconds
/// field may carry a fraction.
pub fn parse_time(text: &str) -> Option<u64> {
    let text = text.trim();
    let fields: Vec<&str> = text.split(':').collect();
    if fields.is_empty() || fields.len() > 3 {
        return None;
    }

    let (secs_field, rest) = fields.split_last()?;
    let (whole, frac) = match secs_field.split_once('.') {
        Some((whole, frac)) => (whole, Some(frac)),
        None => (*secs_field, None),
    };
    let mut total = parse_digits(whole)?.checked_mul(1_000)?;
    if let Some(frac) = frac {
        if frac.is_empty() || frac.len() > 3 {
            return None;
        }
        let value = parse_digits(frac)?;
        total += value * 10u64.pow(3 - frac.len() as u32);
    }

    let mut scale = 60_000u64;
    for field in rest.iter().rev() {
        total = total.checked_add(parse_digits(field)?.checked_mul(scale)?)?;
        scale *= 60;
    }
    Some(total)
}

fn parse_digits(field: &str) -> Option<u64> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

/// Render `ms` as a timestamp; `duration_ms` picks the short or long form.
pub fn timestamp_for_time(format: &TimestampFormat, ms: u64, duration_ms: u64) -> String {
    let p = split_ms(ms);
    let (left, right) = format.delimiter.pair();

    let clock = if format.fixed {
        format!("{:02}:{:02}:{:02}", p.h, p.m, p.s)
    } else if duration_ms >= ONE_HOUR_MS {
        format!("{}:{:02}:{:02}", p.h, p.m, p.s)
    } else {
        format!("{}:{:02}", p.m, p.s)
    };

    match fraction(p.ms, format.precision.digits()) {
        Some(frac) => format!("{left}{clock}{}{frac}{right}", format.fraction_sep.as_char()),
        None => format!("{left}{clock}{right}"),
    }
}

/// Parse a timestamp in any supported format into milliseconds.
///
/// Accepts `[H]H:MM:SS` or `[M]M:SS`, optionally followed by `.` or `-` and one
/// or two fraction digits, optionally wrapped in matching `#..#`, `(..)` or
/// `[..]`. Seconds and minutes must be below 60. With `max_ms`, later times
/// are rejected.
pub fn parse_timestamp(text: &str, max_ms: Option<u64>) -> Option<u64> {
    let body = strip_delimiters(text)?;

    let (clock, frac) = match body.find(['.', '-']) {
        Some(idx) => (&body[..idx], Some(&body[idx + 1..])),
        None => (body, None),
    };

    let fields: Vec<&str> = clock.split(':').collect();
    let (h, m, s) = match fields.as_slice() {
        [h, m, s] => (*h, *m, *s),
        [m, s] => ("0", *m, *s),
        _ => return None,
    };
    let lead = if fields.len() == 3 { h } else { m };
    if !(1..=2).contains(&lead.len()) {
        return None;
    }
    if fields.len() == 3 && m.len() != 2 {
        return None;
    }
    if s.len() != 2 {
        return None;
    }

    let h = parse_digits(h)?;
    let m = parse_digits(m)?;
    let s = parse_digits(s)?;
    if s > 59 || m > 59 {
        return None;
    }

    let ms = match frac {
        None => 0,
        Some(f) if f.len() == 1 => parse_digits(f)? * 100,
        Some(f) if f.len() == 2 => parse_digits(f)? * 10,
        Some(_) => return None,
    };

    let total = (h * 3_600 + m * 60 + s) * 1_000 + ms;
    match max_ms {
        Some(max) if total > max => None,
        _ => Some(total),
    }
}

fn strip_delimiters(text: &str) -> Option<&str> {
    let close = match text.chars().next()? {
        '#' => '#',
        '(' => ')',
        '[' => ']',
        c if c.is_ascii_digit() => {
            return text.ends_with(|c: char| c.is_ascii_digit()).then_some(text);
        }
        _ => return None,
    };
    let inner = &text[1..];
    inner.strip_suffix(close)
}

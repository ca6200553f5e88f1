//! 5-field cron expression parser.
//!
//! Supports `*`, lists, ranges, steps, and three-letter month/weekday names
//! (`0 9 * * mon-fri`). Fields are compiled to bitmasks so evaluation is a
//! constant-time test per component. Parsing happens once, at job
//! add/update/import time; the evaluator assumes a valid expression.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid cron expression: {0}")]
pub struct CronParseError(pub String);

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const DOW_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// A compiled 5-field cron expression (minute, hour, day-of-month, month,
/// day-of-week; Sunday is 0, 7 is accepted as an alias).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minutes: u64,
    hours: u32,
    dom: u32,
    months: u16,
    dow: u8,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self, CronParseError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronParseError(format!(
                "expected 5 fields (minute hour day month weekday), got {}",
                fields.len()
            )));
        }

        let minutes = parse_field(fields[0], 0, 59, None)?;
        let hours = parse_field(fields[1], 0, 23, None)?;
        let dom = parse_field(fields[2], 1, 31, None)?;
        let months = parse_field(fields[3], 1, 12, Some((&MONTH_NAMES, 1)))?;
        // Accept 7 as Sunday, then fold it onto bit 0.
        let mut dow = parse_field(fields[4], 0, 7, Some((&DOW_NAMES, 0)))?;
        if dow & (1 << 7) != 0 {
            dow = (dow & !(1 << 7)) | 1;
        }

        Ok(Self {
            minutes,
            hours: hours as u32,
            dom: dom as u32,
            months: months as u16,
            dow: dow as u8,
            dom_restricted: fields[2] != "*",
            dow_restricted: fields[4] != "*",
        })
    }

    pub fn matches_minute(&self, minute: u32) -> bool {
        self.minutes & (1 << minute) != 0
    }

    pub fn matches_hour(&self, hour: u32) -> bool {
        self.hours & (1 << hour) != 0
    }

    pub fn matches_month(&self, month: u32) -> bool {
        self.months & (1 << month) != 0
    }

    /// Day match with standard cron semantics: when both day-of-month and
    /// day-of-week are restricted, either one matching makes the day match.
    pub fn matches_day(&self, dom: u32, dow: u32) -> bool {
        let dom_ok = self.dom & (1 << dom) != 0;
        let dow_ok = self.dow & (1 << dow) != 0;
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom_ok || dow_ok,
            (true, false) => dom_ok,
            (false, true) => dow_ok,
            (false, false) => true,
        }
    }
}

/// Parse one cron field into a bitmask over `[min, max]`.
fn parse_field(
    field: &str,
    min: u32,
    max: u32,
    names: Option<(&[&str], u32)>,
) -> Result<u64, CronParseError> {
    if field.is_empty() {
        return Err(CronParseError("empty field".into()));
    }

    let mut mask: u64 = 0;
    for part in field.split(',') {
        mask |= parse_part(part, min, max, names)?;
    }
    Ok(mask)
}

fn parse_part(
    part: &str,
    min: u32,
    max: u32,
    names: Option<(&[&str], u32)>,
) -> Result<u64, CronParseError> {
    let (range, step) = match part.split_once('/') {
        Some((r, s)) => {
            let step: u32 = s
                .parse()
                .map_err(|_| CronParseError(format!("bad step '{s}' in '{part}'")))?;
            if step == 0 {
                return Err(CronParseError(format!("step must be >= 1 in '{part}'")));
            }
            (r, step)
        }
        None => (part, 1),
    };

    let (lo, hi) = if range == "*" {
        (min, max)
    } else if let Some((a, b)) = range.split_once('-') {
        (parse_value(a, names)?, parse_value(b, names)?)
    } else {
        let v = parse_value(range, names)?;
        // "a/step" means a..max stepped; a bare value is just itself.
        if step > 1 { (v, max) } else { (v, v) }
    };

    if lo < min || hi > max {
        return Err(CronParseError(format!(
            "value out of range in '{part}' (allowed {min}-{max})"
        )));
    }
    if lo > hi {
        return Err(CronParseError(format!("descending range in '{part}'")));
    }

    let mut mask: u64 = 0;
    let mut v = lo;
    while v <= hi {
        mask |= 1 << v;
        v += step;
    }
    Ok(mask)
}

fn parse_value(text: &str, names: Option<(&[&str], u32)>) -> Result<u32, CronParseError> {
    if let Ok(v) = text.parse::<u32>() {
        return Ok(v);
    }
    if let Some((names, base)) = names {
        let lower = text.to_ascii_lowercase();
        if let Some(idx) = names.iter().position(|n| *n == lower) {
            return Ok(idx as u32 + base);
        }
    }
    Err(CronParseError(format!("bad value '{text}'")))
}

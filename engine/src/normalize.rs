//! Record normalizer.
//!
//! Turns arbitrarily-shaped JSON (remote spreadsheet rows, old local caches,
//! hand-edited imports) into canonical records. Nothing in here fails: bad
//! input yields a best-effort record, and [`sanitize_history`] decides what
//! is worth keeping.

use crate::schema::{self, FieldDef};
use crate::{clock, HistoryRecord, KnifeRecord, Quality};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};

/// Read-only view over a loosely-shaped remote row.
#[derive(Debug, Clone, Copy)]
pub struct RawRow<'a> {
    fields: Option<&'a Map<String, Value>>,
}

impl<'a> RawRow<'a> {
    pub fn new(raw: &'a Value) -> Self {
        Self {
            fields: raw.as_object(),
        }
    }

    /// Whether the underlying value was a JSON object at all.
    pub fn is_object(&self) -> bool {
        self.fields.is_some()
    }

    /// First non-empty value among the field's keys, as text.
    pub fn text(&self, field: &FieldDef) -> String {
        let Some(fields) = self.fields else {
            return String::new();
        };
        field
            .keys
            .iter()
            .filter_map(|key| fields.get(*key))
            .find_map(value_to_text)
            .unwrap_or_default()
    }
}

/// Render a scalar as text; containers and null have no text.
pub fn value_to_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => match n.as_f64() {
            // Spreadsheet cells arrive as floats; show 30.0 as "30" like the sheet does
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Canonicalize a sharpening-log row.
pub fn normalize_history(raw: &Value) -> HistoryRecord {
    use schema::history::*;

    let row = RawRow::new(raw);
    HistoryRecord {
        id: row.text(&ID),
        date: canonical_display_date(&row.text(&DATE)),
        updated_at: row.text(&UPDATED_AT),
        brand: row.text(&BRAND),
        series: row.text(&SERIES),
        steel: row.text(&STEEL),
        carbon: row.text(&CARBON),
        crmov: row.text(&CRMOV),
        length: row.text(&LENGTH),
        width: row.text(&WIDTH),
        angle: row.text(&ANGLE),
        honing_add: row.text(&HONING_ADD),
        bess: row.text(&BESS),
        comments: row.text(&COMMENTS),
    }
}

/// Canonicalize a catalog row.
pub fn normalize_knife(raw: &Value) -> KnifeRecord {
    use schema::knife::*;

    let row = RawRow::new(raw);
    KnifeRecord {
        brand: row.text(&BRAND),
        series: row.text(&SERIES),
        steel: row.text(&STEEL),
        carbon: row.text(&CARBON),
        crmov: row.text(&CRMOV),
        length: row.text(&LENGTH),
        width: row.text(&WIDTH),
        angle: row.text(&ANGLE),
        honing_add: row.text(&HONING_ADD),
        comments: row.text(&COMMENTS),
        category: Quality::parse(&row.text(&CATEGORY)),
    }
}

/// Normalize a batch of history rows, dropping non-objects and rows with
/// neither an id nor a brand.
pub fn sanitize_history<'a>(rows: impl IntoIterator<Item = &'a Value>) -> Vec<HistoryRecord> {
    rows.into_iter()
        .filter(|row| row.is_object())
        .map(normalize_history)
        .filter(HistoryRecord::is_valid)
        .collect()
}

/// Normalize a batch of catalog rows, dropping non-objects.
pub fn sanitize_knives<'a>(rows: impl IntoIterator<Item = &'a Value>) -> Vec<KnifeRecord> {
    rows.into_iter()
        .filter(|row| row.is_object())
        .map(normalize_knife)
        .collect()
}

/// Parse a display date: either the local `DD.MM.YYYY[, ][HH:MM[:SS]]`
/// pattern or a native date string (ISO 8601, RFC 3339, RFC 2822).
pub fn parse_display_date(raw: &str) -> Option<NaiveDateTime> {
    parse_display_parts(raw).map(|(at, _)| at)
}

/// Render a display date in the canonical local format.
pub fn format_display_date(at: NaiveDateTime, with_time: bool) -> String {
    if with_time {
        at.format("%d.%m.%Y %H:%M").to_string()
    } else {
        at.format("%d.%m.%Y").to_string()
    }
}

/// Re-render a display date canonically, or pass it through unchanged when
/// it cannot be parsed.
pub fn canonical_display_date(raw: &str) -> String {
    match parse_display_parts(raw) {
        Some((at, with_time)) => format_display_date(at, with_time),
        None => raw.to_string(),
    }
}

fn parse_display_parts(raw: &str) -> Option<(NaiveDateTime, bool)> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Some(parsed) = parse_local_pattern(raw) {
        return Some(parsed);
    }

    let has_time = raw.contains(':');
    clock::parse_instant(raw)
        .or_else(|| {
            DateTime::parse_from_rfc2822(raw)
                .ok()
                .map(|at| at.with_timezone(&Utc))
        })
        .map(|at| (at.naive_utc(), has_time))
}

fn parse_local_pattern(raw: &str) -> Option<(NaiveDateTime, bool)> {
    let (date_part, time_part) = match raw.find([' ', ',']) {
        Some(split) => (&raw[..split], raw[split..].trim_start_matches([',', ' '])),
        None => (raw, ""),
    };

    let mut parts = date_part.split('.');
    let day: u32 = parts.next()?.parse().ok()?;
    let month: u32 = parts.next()?.parse().ok()?;
    let year_text = parts.next()?;
    if parts.next().is_some() || year_text.len() != 4 {
        return None;
    }
    let year: i32 = year_text.parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, month, day)?;

    if time_part.is_empty() {
        return Some((date.and_hms_opt(0, 0, 0)?, false));
    }

    let mut clock_parts = time_part.split(':');
    let hour: u32 = clock_parts.next()?.trim().parse().ok()?;
    let minute: u32 = clock_parts.next()?.trim().parse().ok()?;
    let second: u32 = match clock_parts.next() {
        Some(s) => s.trim().parse().ok()?,
        None => 0,
    };
    if clock_parts.next().is_some() {
        return None;
    }
    Some((date.and_hms_opt(hour, minute, second)?, true))
}

//! Lenient field coercion for raw source rows.
//!
//! A CSV cell is always text while a JSON value may be a number, a string or
//! `null`. The deserializers here accept any of them for a field, map the usual
//! "not available" spellings to `None`, and coerce timestamps to `DateTime<Utc>`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::de::{self, Deserializer, Visitor};
use std::fmt;

/// Cell spellings treated as a missing value.
const NA_TOKENS: &[&str] = &[
    "", "NA", "N/A", "n/a", "NaN", "nan", "-nan", "NaT", "null", "NULL", "None", "<NA>", "#N/A",
];

/// Naive datetime layouts accepted after RFC 3339. Values without an offset are UTC.
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// A single untyped field value as seen by the deserializer.
#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Missing,
    Text(String),
    Int(i128),
    Float(f64),
    Bool(bool),
}

struct CellVisitor;

impl<'de> Visitor<'de> for CellVisitor {
    type Value = Cell;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string, number, boolean or null")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Cell, E> {
        Ok(Cell::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Cell, E> {
        Ok(Cell::Int(v.into()))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Cell, E> {
        Ok(Cell::Int(v.into()))
    }

    fn visit_i128<E: de::Error>(self, v: i128) -> Result<Cell, E> {
        Ok(Cell::Int(v))
    }

    fn visit_u128<E: de::Error>(self, v: u128) -> Result<Cell, E> {
        i128::try_from(v)
            .map(Cell::Int)
            .map_err(|_| E::custom(format!("integer {} out of range", v)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Cell, E> {
        if v.is_nan() {
            Ok(Cell::Missing)
        } else {
            Ok(Cell::Float(v))
        }
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Cell, E> {
        let trimmed = v.trim();
        if NA_TOKENS.contains(&trimmed) {
            Ok(Cell::Missing)
        } else {
            Ok(Cell::Text(trimmed.to_string()))
        }
    }

    fn visit_none<E: de::Error>(self) -> Result<Cell, E> {
        Ok(Cell::Missing)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Cell, E> {
        Ok(Cell::Missing)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Cell, D::Error> {
        deserializer.deserialize_any(CellVisitor)
    }
}

/// Deserializes an integer identifier such as `user_id`.
///
/// Accepts integers, integral floats (`7.0`, as written by tools that widen
/// integer columns holding nulls) and their textual forms.
pub fn optional_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match deserializer.deserialize_any(CellVisitor)? {
        Cell::Missing => Ok(None),
        Cell::Int(v) => i64::try_from(v)
            .map(Some)
            .map_err(|_| de::Error::custom(format!("identifier {} out of range", v))),
        Cell::Float(v) => integral(v)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("identifier {} is not an integer", v))),
        Cell::Text(s) => parse_id(&s)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("invalid identifier {:?}", s))),
        Cell::Bool(b) => Err(de::Error::custom(format!("invalid identifier {}", b))),
    }
}

/// Deserializes a free-text field. Numbers and booleans keep their textual form.
pub fn optional_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match deserializer.deserialize_any(CellVisitor)? {
        Cell::Missing => None,
        Cell::Text(s) => Some(s),
        Cell::Int(v) => Some(v.to_string()),
        Cell::Float(v) => Some(v.to_string()),
        Cell::Bool(b) => Some(b.to_string()),
    })
}

/// Deserializes a finite numeric measure.
pub fn optional_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = match deserializer.deserialize_any(CellVisitor)? {
        Cell::Missing => return Ok(None),
        Cell::Int(v) => v as f64,
        Cell::Float(v) => v,
        Cell::Text(s) => s
            .parse::<f64>()
            .map_err(|_| de::Error::custom(format!("invalid number {:?}", s)))?,
        Cell::Bool(b) => return Err(de::Error::custom(format!("invalid number {}", b))),
    };

    if value.is_finite() {
        Ok(Some(value))
    } else {
        Err(de::Error::custom(format!("non-finite number {}", value)))
    }
}

/// Deserializes a timestamp field, see [`parse_timestamp`] for accepted layouts.
///
/// An integer value is read as milliseconds since the Unix epoch.
pub fn optional_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match deserializer.deserialize_any(CellVisitor)? {
        Cell::Missing => Ok(None),
        Cell::Text(s) => parse_timestamp(&s)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("invalid timestamp {:?}", s))),
        Cell::Int(millis) => i64::try_from(millis)
            .ok()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("epoch milliseconds {} out of range", millis))),
        other => Err(de::Error::custom(format!(
            "expected a timestamp string, found {:?}",
            other
        ))),
    }
}

/// Parses a timestamp string into UTC.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS[.f][+HH:MM]`, the same with a `T`
/// separator, minute precision, and bare dates (midnight UTC).
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(ts.with_timezone(&Utc));
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn parse_id(value: &str) -> Option<i64> {
    value
        .parse::<i64>()
        .ok()
        .or_else(|| value.parse::<f64>().ok().and_then(integral))
}

fn integral(value: f64) -> Option<i64> {
    // Beyond 2^53 a float no longer maps to a unique integer.
    if value.is_finite() && value.fract() == 0.0 && value.abs() <= 9_007_199_254_740_992.0 {
        Some(value as i64)
    } else {
        None
    }
}

//! # Day Window Resolution
//!
//! Turns a `YYYY-MM-DD` target date into the inclusive hourly window
//! `[date T00:00, date T23:00]` and resolves that window against the source
//! time axis.
//!
//! The source axis is stored the CF way: raw numbers plus a `units` attribute
//! such as `"hours since 1979-10-01 00:00:00"`. [`CfTimeUnits`] decodes it.

use crate::error::{ProcessError, ProcessResult};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use std::ops::Range;

/// Parses the target date given on the command line.
pub fn parse_target_date(text: &str) -> ProcessResult<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
        .map_err(|_| ProcessError::InvalidDate(text.to_string()))
}

/// Inclusive hourly window covering one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub date: NaiveDate,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeWindow {
    pub fn for_day(date: NaiveDate) -> Self {
        let start = date.and_time(NaiveTime::MIN);
        let end = date.and_time(NaiveTime::from_hms_opt(23, 0, 0).unwrap_or(NaiveTime::MIN));
        TimeWindow { date, start, end }
    }

    /// The `(start, end)` labels used for the selection, minute precision.
    pub fn label_pair(&self) -> (String, String) {
        (
            self.start.format("%Y-%m-%dT%H:%M").to_string(),
            self.end.format("%Y-%m-%dT%H:%M").to_string(),
        )
    }

    /// Index range of `axis` whose timestamps fall inside the window.
    ///
    /// `axis` must be sorted ascending, which holds for the reanalysis time
    /// coordinate. Both ends are inclusive at minute resolution, like a label
    /// slice: the end label `23:00` covers everything up to `23:00:59.999`.
    pub fn select(&self, axis: &[NaiveDateTime]) -> Range<usize> {
        let past_end = self.end + TimeDelta::minutes(1);
        let lo = axis.partition_point(|t| *t < self.start);
        let hi = axis.partition_point(|t| *t < past_end);
        lo..hi.max(lo)
    }

    /// Like [`select`](Self::select) but an empty match is a `NoData` failure.
    pub fn select_non_empty(&self, axis: &[NaiveDateTime]) -> ProcessResult<Range<usize>> {
        let range = self.select(axis);
        if range.is_empty() {
            return Err(ProcessError::NoData);
        }
        Ok(range)
    }
}

/// Unit of a CF time offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Days,
    Hours,
    Minutes,
    Seconds,
    Milliseconds,
    Microseconds,
    Nanoseconds,
}

impl TimeUnit {
    fn parse(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "days" | "day" | "d" => Some(TimeUnit::Days),
            "hours" | "hour" | "hr" | "hrs" | "h" => Some(TimeUnit::Hours),
            "minutes" | "minute" | "min" | "mins" => Some(TimeUnit::Minutes),
            "seconds" | "second" | "sec" | "secs" | "s" => Some(TimeUnit::Seconds),
            "milliseconds" | "millisecond" | "ms" => Some(TimeUnit::Milliseconds),
            "microseconds" | "microsecond" | "us" => Some(TimeUnit::Microseconds),
            "nanoseconds" | "nanosecond" | "ns" => Some(TimeUnit::Nanoseconds),
            _ => None,
        }
    }

    fn delta(&self, value: i64) -> Option<TimeDelta> {
        match self {
            TimeUnit::Days => TimeDelta::try_days(value),
            TimeUnit::Hours => TimeDelta::try_hours(value),
            TimeUnit::Minutes => TimeDelta::try_minutes(value),
            TimeUnit::Seconds => TimeDelta::try_seconds(value),
            TimeUnit::Milliseconds => TimeDelta::try_milliseconds(value),
            TimeUnit::Microseconds => Some(TimeDelta::microseconds(value)),
            TimeUnit::Nanoseconds => Some(TimeDelta::nanoseconds(value)),
        }
    }

    fn microseconds(&self) -> f64 {
        match self {
            TimeUnit::Days => 86_400e6,
            TimeUnit::Hours => 3_600e6,
            TimeUnit::Minutes => 60e6,
            TimeUnit::Seconds => 1e6,
            TimeUnit::Milliseconds => 1e3,
            TimeUnit::Microseconds => 1.0,
            TimeUnit::Nanoseconds => 1e-3,
        }
    }
}

/// Parsed `"<unit> since <reference>"` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfTimeUnits {
    pub unit: TimeUnit,
    pub reference: NaiveDateTime,
}

const REFERENCE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

impl CfTimeUnits {
    pub fn parse(units: &str) -> ProcessResult<Self> {
        let (unit_word, reference) = units
            .split_once(" since ")
            .ok_or_else(|| ProcessError::TimeAxis(format!("unsupported time units '{}'", units)))?;

        let unit = TimeUnit::parse(unit_word.trim())
            .ok_or_else(|| ProcessError::TimeAxis(format!("unknown time unit '{}'", unit_word)))?;

        let reference = parse_reference(reference)
            .ok_or_else(|| ProcessError::TimeAxis(format!("bad reference time in '{}'", units)))?;

        Ok(CfTimeUnits { unit, reference })
    }

    pub fn decode_i64(&self, values: &[i64]) -> ProcessResult<Vec<NaiveDateTime>> {
        values
            .iter()
            .map(|&v| {
                self.unit
                    .delta(v)
                    .and_then(|d| self.reference.checked_add_signed(d))
                    .ok_or_else(|| ProcessError::TimeAxis(format!("time offset {} out of range", v)))
            })
            .collect()
    }

    pub fn decode_f64(&self, values: &[f64]) -> ProcessResult<Vec<NaiveDateTime>> {
        values
            .iter()
            .map(|&v| {
                if !v.is_finite() {
                    return Err(ProcessError::TimeAxis(format!("non-finite time offset {}", v)));
                }
                let micros = (v * self.unit.microseconds()).round() as i64;
                self.reference
                    .checked_add_signed(TimeDelta::microseconds(micros))
                    .ok_or_else(|| ProcessError::TimeAxis(format!("time offset {} out of range", v)))
            })
            .collect()
    }

    /// Offsets of `times` in this unit, for writing a time coordinate back out.
    pub fn encode(&self, times: &[NaiveDateTime]) -> Vec<f64> {
        times
            .iter()
            .map(|t| {
                let delta = *t - self.reference;
                delta.num_microseconds().unwrap_or(i64::MAX) as f64 / self.unit.microseconds()
            })
            .collect()
    }
}

fn parse_reference(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    let text = text
        .strip_suffix(" UTC")
        .or_else(|| text.strip_suffix('Z'))
        .or_else(|| text.strip_suffix("+00:00"))
        .or_else(|| text.strip_suffix(" +0000"))
        .unwrap_or(text)
        .trim();

    for format in REFERENCE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN))
}

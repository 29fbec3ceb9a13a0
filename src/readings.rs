//! Extraction of raw load readings and the generation series from CSV.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};

use chrono::NaiveDateTime;
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AlignError, Result};
use crate::template::{GenerationSeries, HOURS_PER_TEMPLATE};
use crate::tz::{LocalHour, TimeZoneConverter};

/// Readings longer than one hour cannot be placed in a single bucket.
pub const MAX_READING_SECONDS: i64 = 3600;

/// One raw fixed-duration reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalReading {
    pub start: i64,
    pub duration_seconds: i64,
    pub quantity: f64,
}

impl IntervalReading {
    pub fn new(start: i64, duration_seconds: i64, quantity: f64) -> Self {
        Self {
            start,
            duration_seconds,
            quantity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingFormat {
    /// `start_epoch_seconds,duration_seconds,quantity`
    #[default]
    Epoch,
    /// Utility-style export: local `Hour` label plus `kWh`.
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedPolicy {
    #[default]
    Skip,
    FailFast,
}

#[derive(Debug, Clone)]
pub struct ReadOptions {
    pub format: ReadingFormat,
    pub malformed: MalformedPolicy,
    /// Disclaimer lines before the header row.
    pub preamble_lines: usize,
    /// Duration assigned to rows of a [`ReadingFormat::Local`] source.
    pub local_reading_seconds: i64,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            format: ReadingFormat::Epoch,
            malformed: MalformedPolicy::Skip,
            preamble_lines: 0,
            local_reading_seconds: MAX_READING_SECONDS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rejected {
    pub line: u64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadSummary {
    pub accepted: usize,
    pub rejected: Vec<Rejected>,
    /// Local labels that fell in a spring-forward gap and were shifted.
    pub shifted: usize,
}

impl ReadSummary {
    pub fn rejected_count(&self) -> usize {
        self.rejected.len()
    }
}

#[derive(Debug, Deserialize)]
struct EpochRow {
    #[serde(alias = "startEpochSeconds", alias = "start", alias = "epoch")]
    start_epoch_seconds: i64,
    #[serde(alias = "durationSeconds", alias = "duration")]
    duration_seconds: i64,
    #[serde(alias = "kWh", alias = "kwh", alias = "value")]
    quantity: f64,
}

#[derive(Debug, Deserialize)]
struct LocalRow {
    #[serde(rename = "Hour", alias = "hour", alias = "timestamp")]
    timestamp_str: String,
    #[serde(rename = "kWh", alias = "kwh", alias = "quantity")]
    kwh: f64,
}

// Parse a local label in "%Y-%m-%d %H:%M" (seconds optional).
fn parse_local_timestamp(s: &str) -> std::result::Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
}

fn validate(reading: IntervalReading) -> std::result::Result<IntervalReading, String> {
    if !reading.quantity.is_finite() {
        return Err(format!("quantity {} is not finite", reading.quantity));
    }
    if reading.duration_seconds <= 0 || reading.duration_seconds > MAX_READING_SECONDS {
        return Err(format!(
            "duration {}s outside 1..={}s",
            reading.duration_seconds, MAX_READING_SECONDS
        ));
    }
    Ok(reading)
}

/// Tracks how often each ambiguous local label has been seen, so the first
/// row maps to the earlier instant and the second to the later one.
#[derive(Default)]
struct LocalResolver {
    seen: HashMap<NaiveDateTime, u8>,
    shifted: usize,
}

impl LocalResolver {
    fn resolve(
        &mut self,
        zone: &TimeZoneConverter,
        naive: NaiveDateTime,
    ) -> std::result::Result<i64, String> {
        match zone.resolve_local(naive) {
            LocalHour::Normal(t) => Ok(t),
            LocalHour::Ambiguous { earliest, latest } => {
                let count = self.seen.entry(naive).or_insert(0);
                *count += 1;
                match *count {
                    1 => Ok(earliest),
                    2 => Ok(latest),
                    _ => Err(format!("local time {naive} repeated more than twice")),
                }
            }
            LocalHour::Nonexistent { shifted } => {
                self.shifted += 1;
                Ok(shifted)
            }
        }
    }
}

fn skip_preamble<R: Read>(reader: R, lines: usize) -> Result<BufReader<R>> {
    let mut reader = BufReader::new(reader);
    let mut dummy = String::new();
    for _ in 0..lines {
        reader.read_line(&mut dummy)?;
        dummy.clear();
    }
    Ok(reader)
}

/// Read raw readings. Malformed rows are counted in the summary under
/// [`MalformedPolicy::Skip`] and abort the read under
/// [`MalformedPolicy::FailFast`].
pub fn read_readings<R: Read>(
    reader: R,
    zone: &TimeZoneConverter,
    opts: &ReadOptions,
) -> Result<(Vec<IntervalReading>, ReadSummary)> {
    let reader = skip_preamble(reader, opts.preamble_lines)?;
    let mut csv_reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);
    let headers = csv_reader.headers()?.clone();

    let mut readings = Vec::new();
    let mut summary = ReadSummary::default();
    let mut resolver = LocalResolver::default();

    for result in csv_reader.records() {
        let (line, parsed) = match result {
            Ok(record) => {
                let line = record_line(&record) + opts.preamble_lines as u64;
                (line, parse_row(&record, &headers, zone, opts, &mut resolver))
            }
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or(0) + opts.preamble_lines as u64;
                (line, Err(e.to_string()))
            }
        };

        match parsed.and_then(validate) {
            Ok(reading) => readings.push(reading),
            Err(reason) => {
                if opts.malformed == MalformedPolicy::FailFast {
                    return Err(AlignError::MalformedReading { line, reason });
                }
                warn!(line, %reason, "skipping malformed reading");
                summary.rejected.push(Rejected { line, reason });
            }
        }
    }

    summary.accepted = readings.len();
    summary.shifted = resolver.shifted;
    info!(
        accepted = summary.accepted,
        rejected = summary.rejected_count(),
        shifted = summary.shifted,
        "readings extracted"
    );
    Ok((readings, summary))
}

fn record_line(record: &StringRecord) -> u64 {
    record.position().map(|p| p.line()).unwrap_or(0)
}

fn parse_row(
    record: &StringRecord,
    headers: &StringRecord,
    zone: &TimeZoneConverter,
    opts: &ReadOptions,
    resolver: &mut LocalResolver,
) -> std::result::Result<IntervalReading, String> {
    match opts.format {
        ReadingFormat::Epoch => {
            let row: EpochRow = record.deserialize(Some(headers)).map_err(|e| e.to_string())?;
            Ok(IntervalReading::new(
                row.start_epoch_seconds,
                row.duration_seconds,
                row.quantity,
            ))
        }
        ReadingFormat::Local => {
            let row: LocalRow = record.deserialize(Some(headers)).map_err(|e| e.to_string())?;
            let naive = parse_local_timestamp(&row.timestamp_str)
                .map_err(|e| format!("invalid timestamp '{}': {}", row.timestamp_str, e))?;
            let start = resolver.resolve(zone, naive)?;
            Ok(IntervalReading::new(start, opts.local_reading_seconds, row.kwh))
        }
    }
}

/// Read one column of generation values. With `column = None` the
/// `ac_kWh` (or `ac`) column is used, else the first column.
pub fn read_generation_series<R: Read>(reader: R, column: Option<&str>) -> Result<Vec<f64>> {
    read_generation(reader, column, None).map(|series| series.ac_kwh)
}

/// Read AC output plus, when present, plane-of-array irradiance.
///
/// Without an explicit `poa_column` a `poa_Wm2` (or `poa`) header is picked
/// up if the file has one; a named column that is missing is an error.
pub fn read_generation<R: Read>(
    reader: R,
    ac_column: Option<&str>,
    poa_column: Option<&str>,
) -> Result<GenerationSeries> {
    let mut csv_reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(reader);
    let headers = csv_reader.headers()?.clone();
    let named = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| AlignError::Config(format!("generation column '{name}' not found")))
    };
    let detect = |names: &[&str]| {
        headers
            .iter()
            .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
    };

    let ac_index = match ac_column {
        Some(name) => named(name)?,
        None => detect(&["ac_kwh", "ac"][..]).unwrap_or(0),
    };
    let poa_index = match poa_column {
        Some(name) => Some(named(name)?),
        None if ac_column.is_none() => detect(&["poa_wm2", "poa"][..]),
        None => None,
    };

    let mut ac_kwh = Vec::with_capacity(HOURS_PER_TEMPLATE);
    let mut poa_wm2 = poa_index.map(|_| Vec::with_capacity(HOURS_PER_TEMPLATE));
    for result in csv_reader.records() {
        let record = result?;
        ac_kwh.push(generation_value(&record, ac_index)?);
        if let (Some(index), Some(values)) = (poa_index, poa_wm2.as_mut()) {
            values.push(generation_value(&record, index)?);
        }
    }
    Ok(GenerationSeries { ac_kwh, poa_wm2 })
}

fn generation_value(record: &StringRecord, index: usize) -> Result<f64> {
    let line = record_line(record);
    let raw = record.get(index).ok_or_else(|| AlignError::MalformedGeneration {
        line,
        reason: "missing value".into(),
    })?;
    let value: f64 = raw.parse().map_err(|e| AlignError::MalformedGeneration {
        line,
        reason: format!("'{raw}': {e}"),
    })?;
    if !value.is_finite() {
        return Err(AlignError::MalformedGeneration {
            line,
            reason: format!("{value} is not finite"),
        });
    }
    Ok(value)
}

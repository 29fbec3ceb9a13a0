//! Projection of a synthetic reference-year generation series onto a
//! year-independent calendar key.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use tracing::{info, warn};

use crate::config::SiteParams;
use crate::error::{AlignError, Result};
use crate::sequencer::{OccurrenceSequencer, SplitRule};
use crate::tz::TimeZoneConverter;

pub const HOURS_PER_TEMPLATE: usize = 8760;

pub fn is_leap_year(year: i32) -> bool {
    NaiveDate::from_ymd_opt(year, 2, 29).is_some()
}

/// (month, day, hour, occurrence): a local clock hour with the year removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CalendarKey {
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub occurrence: u8,
}

impl CalendarKey {
    pub fn new(month: u32, day: u32, hour: u32, occurrence: u8) -> Self {
        Self {
            month,
            day,
            hour,
            occurrence,
        }
    }

    pub fn label(&self) -> (u32, u32, u32) {
        (self.month, self.day, self.hour)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemplateHour {
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub occurrence: u8,
    pub value: f64,
    pub poa_wm2: Option<f64>,
}

/// One template slot: AC output plus plane-of-array irradiance when the
/// model provided it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemplateEntry {
    pub value: f64,
    pub poa_wm2: Option<f64>,
}

/// One reference-year model run, indexed by local-standard hour.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GenerationSeries {
    pub ac_kwh: Vec<f64>,
    /// Plane-of-array irradiance in W/m², parallel to `ac_kwh`.
    pub poa_wm2: Option<Vec<f64>>,
}

impl GenerationSeries {
    pub fn new(ac_kwh: Vec<f64>) -> Self {
        Self { ac_kwh, poa_wm2: None }
    }

    pub fn with_irradiance(ac_kwh: Vec<f64>, poa_wm2: Vec<f64>) -> Self {
        Self {
            ac_kwh,
            poa_wm2: Some(poa_wm2),
        }
    }
}

/// Immutable lookup table built from one reference year.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateMap {
    reference_year: i32,
    zone: &'static str,
    capacity_kw: f64,
    entries: BTreeMap<CalendarKey, TemplateEntry>,
    never_present: BTreeSet<(u32, u32, u32)>,
}

impl TemplateMap {
    pub fn reference_year(&self) -> i32 {
        self.reference_year
    }

    pub fn zone_name(&self) -> &'static str {
        self.zone
    }

    pub fn capacity_kw(&self) -> f64 {
        self.capacity_kw
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exact lookup.
    pub fn get(&self, key: CalendarKey) -> Option<f64> {
        self.entry(key).map(|e| e.value)
    }

    pub fn entry(&self, key: CalendarKey) -> Option<TemplateEntry> {
        self.entries.get(&key).copied()
    }

    /// Lookup used when joining target years. A 29 February key borrows the
    /// values of 28 February.
    pub fn lookup(&self, key: CalendarKey) -> Option<f64> {
        self.lookup_entry(key).map(|e| e.value)
    }

    pub fn lookup_entry(&self, key: CalendarKey) -> Option<TemplateEntry> {
        self.entry(key).or_else(|| {
            if key.month == 2 && key.day == 29 {
                self.entry(CalendarKey { day: 28, ..key })
            } else {
                None
            }
        })
    }

    /// Whether the template carries plane-of-array irradiance.
    pub fn has_irradiance(&self) -> bool {
        self.entries.values().any(|e| e.poa_wm2.is_some())
    }

    /// Whether a label was skipped by a spring-forward in the reference year.
    pub fn is_never_present(&self, month: u32, day: u32, hour: u32) -> bool {
        self.never_present.contains(&(month, day, hour))
    }

    pub fn never_present(&self) -> impl Iterator<Item = (u32, u32, u32)> + '_ {
        self.never_present.iter().copied()
    }

    /// Labels holding a second occurrence.
    pub fn repeated_labels(&self) -> Vec<(u32, u32, u32)> {
        self.entries
            .keys()
            .filter(|k| k.occurrence == 2)
            .map(CalendarKey::label)
            .collect()
    }

    pub fn hours(&self) -> impl Iterator<Item = TemplateHour> + '_ {
        self.entries.iter().map(|(k, e)| TemplateHour {
            month: k.month,
            day: k.day,
            hour: k.hour,
            occurrence: k.occurrence,
            value: e.value,
            poa_wm2: e.poa_wm2,
        })
    }

    /// Total of all template values.
    pub fn annual_total(&self) -> f64 {
        self.entries.values().map(|e| e.value).sum()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TemplateProjector {
    zone: TimeZoneConverter,
    sequencer: OccurrenceSequencer,
}

impl TemplateProjector {
    pub fn new(zone: TimeZoneConverter) -> Self {
        // The template is hourly, so the zone's own transition is the only
        // meaningful split rule here.
        Self {
            zone,
            sequencer: OccurrenceSequencer::new(zone, SplitRule::Transition),
        }
    }

    /// Index `i` of `series` is the `i`-th local-standard hour from
    /// 1 January 00:00 of `reference_year`.
    pub fn build(&self, series: &[f64], reference_year: i32, site: &SiteParams) -> Result<TemplateMap> {
        self.project(series, None, reference_year, site)
    }

    /// Like [`build`](Self::build), carrying a parallel irradiance column.
    pub fn build_with_irradiance(
        &self,
        series: &[f64],
        poa_wm2: &[f64],
        reference_year: i32,
        site: &SiteParams,
    ) -> Result<TemplateMap> {
        self.project(series, Some(poa_wm2), reference_year, site)
    }

    pub fn build_series(
        &self,
        series: &GenerationSeries,
        reference_year: i32,
        site: &SiteParams,
    ) -> Result<TemplateMap> {
        self.project(&series.ac_kwh, series.poa_wm2.as_deref(), reference_year, site)
    }

    fn project(
        &self,
        series: &[f64],
        poa_wm2: Option<&[f64]>,
        reference_year: i32,
        site: &SiteParams,
    ) -> Result<TemplateMap> {
        for column in std::iter::once(series).chain(poa_wm2) {
            if column.len() != HOURS_PER_TEMPLATE {
                return Err(AlignError::TemplateLength {
                    expected: HOURS_PER_TEMPLATE,
                    actual: column.len(),
                });
            }
        }
        if is_leap_year(reference_year) {
            return Err(AlignError::LeapReferenceYear(reference_year));
        }
        if let Some((i, &value)) = series.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(AlignError::NonFiniteValue {
                context: format!("generation series index {i}"),
                value,
            });
        }
        if let Some((i, &value)) = poa_wm2
            .into_iter()
            .flatten()
            .enumerate()
            .find(|(_, v)| !v.is_finite())
        {
            return Err(AlignError::NonFiniteValue {
                context: format!("irradiance series index {i}"),
                value,
            });
        }

        let jan1 = NaiveDate::from_ymd_opt(reference_year, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .ok_or_else(|| AlignError::Config(format!("invalid reference year {reference_year}")))?
            .and_utc()
            .timestamp();
        let standard = i64::from(self.zone.standard_offset_at(jan1)?);

        let mut labels: BTreeMap<(NaiveDate, u32), Vec<(i64, TemplateEntry)>> = BTreeMap::new();
        for (i, &value) in series.iter().enumerate() {
            let instant = jan1 + i as i64 * 3600 - standard;
            let civil = self.zone.to_civil(instant)?;
            let entry = TemplateEntry {
                value,
                poa_wm2: poa_wm2.map(|poa| poa[i]),
            };
            labels
                .entry((civil.date(), civil.hour()))
                .or_default()
                .push((instant, entry));
        }

        let mut entries = BTreeMap::new();
        for ((date, hour), members) in labels {
            let instants: Vec<i64> = members.iter().map(|(t, _)| *t).collect();
            let occurrences = self.sequencer.assign(date, hour, &instants);
            for ((_, entry), occurrence) in members.into_iter().zip(occurrences) {
                let key = CalendarKey::new(date.month(), date.day(), hour, occurrence);
                if entries.insert(key, entry).is_some() {
                    warn!(?key, "calendar key produced twice; keeping the later value");
                }
            }
        }

        let never_present = self.skipped_labels(reference_year);

        let map = TemplateMap {
            reference_year,
            zone: self.zone.name(),
            capacity_kw: site.capacity_kw,
            entries,
            never_present,
        };
        info!(
            zone = map.zone,
            reference_year,
            entries = map.len(),
            repeated = map.repeated_labels().len(),
            never_present = map.never_present.len(),
            "generation template built"
        );
        Ok(map)
    }

    fn skipped_labels(&self, year: i32) -> BTreeSet<(u32, u32, u32)> {
        let mut skipped = BTreeSet::new();
        let Some(mut day) = NaiveDate::from_ymd_opt(year, 1, 1) else {
            return skipped;
        };
        while day.year() == year {
            for hour in 0..24 {
                if self
                    .zone
                    .resolve_local_hour(day, hour)
                    .is_some_and(|h| h.is_nonexistent())
                {
                    skipped.insert((day.month(), day.day(), hour));
                }
            }
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        skipped
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    zone: &'static str,
    reference_year: i32,
    site: [u64; 6],
    ac_kwh: Vec<u64>,
    poa_wm2: Option<Vec<u64>>,
}

fn bits(values: &[f64]) -> Vec<u64> {
    values.iter().map(|v| v.to_bits()).collect()
}

/// Memoizes built templates per (site, reference year, zone, series
/// contents). Owned by the caller; nothing here is global.
#[derive(Debug, Default)]
pub struct TemplateCache {
    maps: HashMap<CacheKey, Arc<TemplateMap>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Return the cached template or build it from `series`.
    pub fn get_or_build(
        &mut self,
        projector: &TemplateProjector,
        series: &GenerationSeries,
        reference_year: i32,
        site: &SiteParams,
    ) -> Result<Arc<TemplateMap>> {
        let key = CacheKey {
            zone: projector.zone.name(),
            reference_year,
            site: site.fingerprint(),
            ac_kwh: bits(&series.ac_kwh),
            poa_wm2: series.poa_wm2.as_deref().map(bits),
        };
        if let Some(map) = self.maps.get(&key) {
            return Ok(Arc::clone(map));
        }
        let map = Arc::new(projector.build_series(series, reference_year, site)?);
        self.maps.insert(key, Arc::clone(&map));
        Ok(map)
    }
}

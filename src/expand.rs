//! Repeats one reference-year template across calendar target years.

use chrono::{Datelike, NaiveDate};
use tracing::info;

use crate::config::YearRange;
use crate::error::{AlignError, Result};
use crate::template::{CalendarKey, TemplateMap};
use crate::tz::{CivilTimestamp, LocalHour, TimeZoneConverter};

/// One civil hour of modelled generation in a target year.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationHour {
    pub epoch: i64,
    pub civil: CivilTimestamp,
    pub year: i32,
    pub occurrence: u8,
    pub value: f64,
    pub poa_wm2: Option<f64>,
    pub capacity_kw: f64,
    pub unmapped: bool,
}

/// Every existing local hour of each year in `years`, in absolute order,
/// with its template value. Hours the template cannot match get `0.0` and
/// `unmapped = true`.
pub fn expand_years(
    template: &TemplateMap,
    zone: &TimeZoneConverter,
    years: YearRange,
) -> Result<Vec<GenerationHour>> {
    if template.zone_name() != zone.name() {
        return Err(AlignError::Config(format!(
            "template was built for {} but expansion requested for {}",
            template.zone_name(),
            zone.name()
        )));
    }

    let mut rows = Vec::new();
    for year in years.years() {
        let mut day = NaiveDate::from_ymd_opt(year, 1, 1)
            .ok_or_else(|| AlignError::Config(format!("year {year} out of range")))?;
        let before = rows.len();
        while day.year() == year {
            for hour in 0..24 {
                let starts: Vec<(u8, i64)> = match zone.resolve_local_hour(day, hour) {
                    Some(LocalHour::Normal(t)) => vec![(1, t)],
                    Some(LocalHour::Ambiguous { earliest, latest }) => vec![(1, earliest), (2, latest)],
                    Some(LocalHour::Nonexistent { .. }) | None => Vec::new(),
                };
                for (occurrence, epoch) in starts {
                    let key = CalendarKey::new(day.month(), day.day(), hour, occurrence);
                    let entry = template.lookup_entry(key);
                    rows.push(GenerationHour {
                        epoch,
                        civil: zone.to_civil(epoch)?,
                        year,
                        occurrence,
                        value: entry.map_or(0.0, |e| e.value),
                        poa_wm2: entry.and_then(|e| e.poa_wm2),
                        capacity_kw: template.capacity_kw(),
                        unmapped: entry.is_none(),
                    });
                }
            }
            day = match day.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }
        let added = &rows[before..];
        info!(
            year,
            hours = added.len(),
            unmapped = added.iter().filter(|r| r.unmapped).count(),
            "generation expanded"
        );
    }
    Ok(rows)
}

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use tracing::{debug, info};

use crate::error::Result;
use crate::readings::IntervalReading;
use crate::sequencer::{OccurrenceSequencer, SplitRule};
use crate::tz::TimeZoneConverter;

/// Summed readings for one occurrence of one local clock hour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HourlyBucket {
    pub local_date: NaiveDate,
    pub hour: u32,
    pub occurrence: u8,
    pub summed_quantity: f64,
    pub reconstructed_utc_epoch: i64,
    pub reading_count: usize,
}

impl HourlyBucket {
    pub fn key(&self) -> (NaiveDate, u32, u8) {
        (self.local_date, self.hour, self.occurrence)
    }

    pub fn month(&self) -> u32 {
        self.local_date.month()
    }

    pub fn day(&self) -> u32 {
        self.local_date.day()
    }

    pub fn year(&self) -> i32 {
        self.local_date.year()
    }
}

struct Member {
    start: i64,
    hour_start: i64,
    quantity: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct IntervalAggregator {
    zone: TimeZoneConverter,
    sequencer: OccurrenceSequencer,
}

impl IntervalAggregator {
    pub fn new(zone: TimeZoneConverter, rule: SplitRule) -> Self {
        Self {
            zone,
            sequencer: OccurrenceSequencer::new(zone, rule),
        }
    }

    /// Group readings into local-hour buckets, ordered by bucket start.
    ///
    /// Skipped spring-forward hours receive no readings and so produce no
    /// bucket. A bucket's epoch is where its occurrence of the local hour
    /// begins, which for the second pass of a half-hour fall-back is the
    /// transition itself rather than a clock-hour floor.
    pub fn aggregate(&self, readings: &[IntervalReading]) -> Result<Vec<HourlyBucket>> {
        let mut groups: BTreeMap<(NaiveDate, u32), Vec<Member>> = BTreeMap::new();
        for reading in readings {
            let civil = self.zone.to_civil(reading.start)?;
            groups
                .entry((civil.date(), civil.hour()))
                .or_default()
                .push(Member {
                    start: reading.start,
                    hour_start: reading.start - civil.seconds_into_hour(),
                    quantity: reading.quantity,
                });
        }

        let mut buckets = Vec::with_capacity(groups.len());
        for ((date, hour), mut members) in groups {
            members.sort_by_key(|m| m.start);
            let starts: Vec<i64> = members.iter().map(|m| m.start).collect();
            let occurrences = self.sequencer.assign(date, hour, &starts);

            let mut current: Option<HourlyBucket> = None;
            for (member, occurrence) in members.iter().zip(occurrences) {
                if let Some(bucket) = current.as_mut().filter(|b| b.occurrence == occurrence) {
                    bucket.summed_quantity += member.quantity;
                    bucket.reading_count += 1;
                    continue;
                }
                if let Some(done) = current.take() {
                    buckets.push(done);
                }
                current = Some(HourlyBucket {
                    local_date: date,
                    hour,
                    occurrence,
                    summed_quantity: member.quantity,
                    reconstructed_utc_epoch: self
                        .zone
                        .instant_for(date, hour, occurrence)
                        .unwrap_or(member.hour_start),
                    reading_count: 1,
                });
            }
            if let Some(done) = current {
                if done.occurrence == 2 {
                    debug!(%date, hour, epoch = done.reconstructed_utc_epoch, "repeated hour bucket");
                }
                buckets.push(done);
            }
        }

        buckets.sort_by_key(|b| (b.reconstructed_utc_epoch, b.occurrence));
        info!(readings = readings.len(), buckets = buckets.len(), "readings aggregated");
        Ok(buckets)
    }
}

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregate::HourlyBucket;
use crate::error::{AlignError, Result};
use crate::template::{CalendarKey, TemplateMap};
use crate::tz::{CivilTimestamp, TimeZoneConverter};

/// What to do with a bucket whose calendar key is missing from the template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinPolicy {
    /// Keep the bucket with zero generation and flag it unmapped.
    #[default]
    FillZero,
    /// Drop the bucket.
    InnerJoin,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergedRecord {
    pub epoch: i64,
    pub civil: CivilTimestamp,
    pub occurrence: u8,
    pub load_quantity: f64,
    pub generation_quantity: f64,
    pub net_quantity: f64,
    pub unmapped: bool,
    /// Capacity of the system the template was modelled for.
    pub capacity_kw: f64,
    pub poa_wm2: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MergeOutcome {
    pub records: Vec<MergedRecord>,
    /// Buckets with no template match, kept or dropped.
    pub unmapped_count: usize,
    /// Distinct missing keys, sorted.
    pub unmapped_keys: Vec<CalendarKey>,
    /// Unmapped buckets whose label the reference year skipped at its
    /// spring-forward. These are expected when target and reference years
    /// change clocks on different dates.
    pub never_present_count: usize,
    pub dropped: usize,
}

/// Joins load buckets to a generation template by calendar key.
#[derive(Debug, Clone, Copy)]
pub struct Aligner {
    zone: TimeZoneConverter,
}

impl Aligner {
    pub fn new(zone: TimeZoneConverter) -> Self {
        Self { zone }
    }

    /// The year never takes part in the join, so one template serves every
    /// target year. Either the whole series is returned or an error is.
    pub fn merge(
        &self,
        buckets: &[HourlyBucket],
        template: &TemplateMap,
        policy: JoinPolicy,
    ) -> Result<MergeOutcome> {
        if template.zone_name() != self.zone.name() {
            return Err(AlignError::Config(format!(
                "template was built for {} but buckets are in {}",
                template.zone_name(),
                self.zone.name()
            )));
        }

        let mut seen = HashSet::with_capacity(buckets.len());
        let mut records = Vec::with_capacity(buckets.len());
        let mut missing = BTreeSet::new();
        let mut unmapped_count = 0;
        let mut never_present_count = 0;
        let mut dropped = 0;

        for bucket in buckets {
            if !seen.insert(bucket.key()) {
                return Err(AlignError::DuplicateBucket {
                    date: bucket.local_date,
                    hour: bucket.hour,
                    occurrence: bucket.occurrence,
                });
            }
            if !bucket.summed_quantity.is_finite() {
                return Err(AlignError::NonFiniteValue {
                    context: format!("load for {} hour {}", bucket.local_date, bucket.hour),
                    value: bucket.summed_quantity,
                });
            }

            let key = CalendarKey::new(bucket.month(), bucket.day(), bucket.hour, bucket.occurrence);
            let (generation, poa_wm2, unmapped) = match template.lookup_entry(key) {
                Some(entry) => (entry.value, entry.poa_wm2, false),
                None => {
                    unmapped_count += 1;
                    if template.is_never_present(key.month, key.day, key.hour) {
                        never_present_count += 1;
                    }
                    missing.insert(key);
                    match policy {
                        JoinPolicy::FillZero => (0.0, None, true),
                        JoinPolicy::InnerJoin => {
                            dropped += 1;
                            continue;
                        }
                    }
                }
            };

            records.push(MergedRecord {
                epoch: bucket.reconstructed_utc_epoch,
                civil: self.zone.to_civil(bucket.reconstructed_utc_epoch)?,
                occurrence: bucket.occurrence,
                load_quantity: bucket.summed_quantity,
                generation_quantity: generation,
                net_quantity: bucket.summed_quantity - generation,
                unmapped,
                capacity_kw: template.capacity_kw(),
                poa_wm2,
            });
        }

        records.sort_by_key(|r| r.epoch);

        if unmapped_count > 0 {
            warn!(
                unmapped = unmapped_count,
                distinct = missing.len(),
                never_present = never_present_count,
                ?policy,
                "buckets without a template match"
            );
        }
        info!(records = records.len(), dropped, "series merged");

        Ok(MergeOutcome {
            records,
            unmapped_count,
            unmapped_keys: missing.into_iter().collect(),
            never_present_count,
            dropped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::IntervalAggregator;
    use crate::config::SiteParams;
    use crate::readings::IntervalReading;
    use crate::sequencer::SplitRule;
    use crate::template::{TemplateProjector, HOURS_PER_TEMPLATE};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn zone() -> TimeZoneConverter {
        TimeZoneConverter::new("America/New_York").unwrap()
    }

    fn template() -> TemplateMap {
        let series: Vec<f64> = (0..HOURS_PER_TEMPLATE).map(|i| (i % 24) as f64 * 0.5).collect();
        TemplateProjector::new(zone())
            .build(&series, 2001, &SiteParams::default())
            .unwrap()
    }

    fn hourly(y: i32, m: u32, d: u32, hours: i64) -> Vec<HourlyBucket> {
        let start = zone()
            .instant_for(NaiveDate::from_ymd_opt(y, m, d).unwrap(), 0, 1)
            .unwrap();
        let readings: Vec<IntervalReading> = (0..hours)
            .map(|h| IntervalReading::new(start + h * 3600, 3600, 2.0))
            .collect();
        IntervalAggregator::new(zone(), SplitRule::Transition)
            .aggregate(&readings)
            .unwrap()
    }

    #[test]
    fn net_is_load_minus_generation() {
        let outcome = Aligner::new(zone())
            .merge(&hourly(2024, 6, 1, 24), &template(), JoinPolicy::FillZero)
            .unwrap();
        assert_eq!(outcome.records.len(), 24);
        assert_eq!(outcome.unmapped_count, 0);
        for r in &outcome.records {
            assert_eq!(r.net_quantity, r.load_quantity - r.generation_quantity);
            assert!(!r.unmapped);
        }
        assert!(outcome.records.windows(2).all(|w| w[0].epoch < w[1].epoch));
    }

    #[test]
    fn fill_zero_keeps_every_bucket_and_counts_missing_keys() {
        // 2024 falls back on 3 November; the 2001 template fell back on
        // 28 October, so the second 01:00 of 3 November has no match.
        let buckets = hourly(2024, 11, 3, 25);
        let outcome = Aligner::new(zone())
            .merge(&buckets, &template(), JoinPolicy::FillZero)
            .unwrap();

        assert_eq!(outcome.records.len(), buckets.len());
        assert_eq!(outcome.unmapped_count, 1);
        assert_eq!(outcome.unmapped_keys, vec![CalendarKey::new(11, 3, 1, 2)]);
        let missing: Vec<&MergedRecord> = outcome.records.iter().filter(|r| r.unmapped).collect();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].generation_quantity, 0.0);
        assert_eq!(missing[0].net_quantity, missing[0].load_quantity);
        assert_eq!(outcome.never_present_count, 0);
    }

    #[test]
    fn hours_skipped_in_the_reference_year_are_counted_separately() {
        // 2001 sprang forward on 1 April; 2024 did not, so its 02:00 on
        // 1 April has nothing to borrow from.
        let outcome = Aligner::new(zone())
            .merge(&hourly(2024, 4, 1, 24), &template(), JoinPolicy::FillZero)
            .unwrap();
        assert_eq!(outcome.records.len(), 24);
        assert_eq!(outcome.unmapped_keys, vec![CalendarKey::new(4, 1, 2, 1)]);
        assert_eq!(outcome.unmapped_count, 1);
        assert_eq!(outcome.never_present_count, 1);
    }

    #[test]
    fn records_carry_capacity_and_irradiance() {
        let series: Vec<f64> = vec![1.0; HOURS_PER_TEMPLATE];
        let poa: Vec<f64> = vec![600.0; HOURS_PER_TEMPLATE];
        let site = SiteParams {
            capacity_kw: 250.0,
            ..SiteParams::default()
        };
        let template = TemplateProjector::new(zone())
            .build_with_irradiance(&series, &poa, 2001, &site)
            .unwrap();
        let outcome = Aligner::new(zone())
            .merge(&hourly(2024, 6, 1, 3), &template, JoinPolicy::FillZero)
            .unwrap();
        assert!(outcome.records.iter().all(|r| r.capacity_kw == 250.0));
        assert!(outcome.records.iter().all(|r| r.poa_wm2 == Some(600.0)));
    }

    #[test]
    fn inner_join_drops_unmatched_buckets() {
        let buckets = hourly(2024, 11, 3, 25);
        let outcome = Aligner::new(zone())
            .merge(&buckets, &template(), JoinPolicy::InnerJoin)
            .unwrap();
        assert_eq!(outcome.records.len(), buckets.len() - 1);
        assert_eq!(outcome.dropped, 1);
        assert_eq!(outcome.unmapped_count, 1);
        assert!(outcome.records.iter().all(|r| !r.unmapped));
    }

    #[test]
    fn generation_is_identical_across_target_years() {
        let template = template();
        let aligner = Aligner::new(zone());
        let a = aligner.merge(&hourly(2023, 6, 1, 24), &template, JoinPolicy::FillZero).unwrap();
        let b = aligner.merge(&hourly(2025, 6, 1, 24), &template, JoinPolicy::FillZero).unwrap();

        let gen_a: Vec<f64> = a.records.iter().map(|r| r.generation_quantity).collect();
        let gen_b: Vec<f64> = b.records.iter().map(|r| r.generation_quantity).collect();
        assert_eq!(gen_a, gen_b);
        assert_ne!(a.records[0].epoch, b.records[0].epoch);
    }

    #[test]
    fn leap_day_is_mapped_from_february_28() {
        let outcome = Aligner::new(zone())
            .merge(&hourly(2024, 2, 29, 24), &template(), JoinPolicy::FillZero)
            .unwrap();
        assert_eq!(outcome.unmapped_count, 0);
        assert_eq!(outcome.records[13].generation_quantity, 6.5);
    }

    #[test]
    fn duplicate_buckets_fail_the_whole_merge() {
        let mut buckets = hourly(2024, 6, 1, 2);
        buckets.push(buckets[0]);
        let err = Aligner::new(zone())
            .merge(&buckets, &template(), JoinPolicy::FillZero)
            .unwrap_err();
        assert!(matches!(err, AlignError::DuplicateBucket { .. }));
    }

    #[test]
    fn template_from_another_zone_is_rejected() {
        let berlin = TimeZoneConverter::new("Europe/Berlin").unwrap();
        let err = Aligner::new(berlin)
            .merge(&[], &template(), JoinPolicy::FillZero)
            .unwrap_err();
        assert!(matches!(err, AlignError::Config(_)));
    }
}

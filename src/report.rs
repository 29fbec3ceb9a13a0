//! Annual, monthly and typical-day summaries of a merged or expanded series,
//! kept apart per modelled system capacity.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use crate::align::MergedRecord;
use crate::expand::GenerationHour;
use crate::tz::CivilTimestamp;

/// Anything with a civil hour and a generation figure.
pub trait HourlySample {
    fn civil(&self) -> &CivilTimestamp;
    fn generation(&self) -> f64;
    fn capacity_kw(&self) -> f64;
    fn load(&self) -> f64 {
        0.0
    }
}

/// System capacity used as a summary key.
#[derive(Debug, Clone, Copy)]
pub struct CapacityKw(pub f64);

impl PartialEq for CapacityKw {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CapacityKw {}

impl PartialOrd for CapacityKw {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CapacityKw {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for CapacityKw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}kw", self.0)
    }
}

impl HourlySample for MergedRecord {
    fn civil(&self) -> &CivilTimestamp {
        &self.civil
    }

    fn generation(&self) -> f64 {
        self.generation_quantity
    }

    fn capacity_kw(&self) -> f64 {
        self.capacity_kw
    }

    fn load(&self) -> f64 {
        self.load_quantity
    }
}

impl HourlySample for GenerationHour {
    fn civil(&self) -> &CivilTimestamp {
        &self.civil
    }

    fn generation(&self) -> f64 {
        self.value
    }

    fn capacity_kw(&self) -> f64 {
        self.capacity_kw
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Totals {
    pub load: f64,
    pub generation: f64,
    pub hours: usize,
}

impl Totals {
    pub fn net(&self) -> f64 {
        self.load - self.generation
    }
}

/// Sums per capacity and local calendar year.
pub fn annual_totals<S: HourlySample>(samples: &[S]) -> BTreeMap<(CapacityKw, i32), Totals> {
    let mut totals: BTreeMap<(CapacityKw, i32), Totals> = BTreeMap::new();
    for s in samples {
        let entry = totals
            .entry((CapacityKw(s.capacity_kw()), s.civil().year()))
            .or_default();
        entry.load += s.load();
        entry.generation += s.generation();
        entry.hours += 1;
    }
    totals
}

/// Mean hourly generation per capacity and month, across all years present.
pub fn monthly_profile<S: HourlySample>(samples: &[S]) -> BTreeMap<(CapacityKw, u32), f64> {
    mean_by(samples, |c| Some(c.month()))
}

/// Mean generation per capacity and local hour on one calendar day, across
/// all years.
pub fn day_profile<S: HourlySample>(
    samples: &[S],
    month: u32,
    day: u32,
) -> BTreeMap<(CapacityKw, u32), f64> {
    mean_by(samples, |c| (c.month() == month && c.day() == day).then(|| c.hour()))
}

fn mean_by<S, F>(samples: &[S], key: F) -> BTreeMap<(CapacityKw, u32), f64>
where
    S: HourlySample,
    F: Fn(&CivilTimestamp) -> Option<u32>,
{
    let mut sums: BTreeMap<(CapacityKw, u32), (f64, usize)> = BTreeMap::new();
    for s in samples {
        if let Some(k) = key(s.civil()) {
            let entry = sums
                .entry((CapacityKw(s.capacity_kw()), k))
                .or_insert((0.0, 0));
            entry.0 += s.generation();
            entry.1 += 1;
        }
    }
    sums.into_iter()
        .map(|(k, (sum, n))| (k, sum / n as f64))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tz::TimeZoneConverter;
    use pretty_assertions::assert_eq;

    fn record(zone: &TimeZoneConverter, epoch: i64, load: f64, generation: f64) -> MergedRecord {
        MergedRecord {
            epoch,
            civil: zone.to_civil(epoch).unwrap(),
            occurrence: 1,
            load_quantity: load,
            generation_quantity: generation,
            net_quantity: load - generation,
            unmapped: false,
            capacity_kw: 100.0,
            poa_wm2: None,
        }
    }

    const KW100: CapacityKw = CapacityKw(100.0);

    #[test]
    fn totals_and_profiles() {
        let zone = TimeZoneConverter::new("UTC").unwrap();
        // 2023-06-21 12:00, 2024-06-21 12:00, 2024-06-21 13:00, 2024-01-05 12:00 UTC
        let records = vec![
            record(&zone, 1_687_348_800, 3.0, 2.0),
            record(&zone, 1_718_971_200, 1.0, 4.0),
            record(&zone, 1_718_974_800, 1.0, 6.0),
            record(&zone, 1_704_456_000, 2.0, 1.0),
        ];

        let annual = annual_totals(&records);
        assert_eq!(annual[&(KW100, 2023)], Totals { load: 3.0, generation: 2.0, hours: 1 });
        assert_eq!(annual[&(KW100, 2024)].generation, 11.0);
        assert_eq!(annual[&(KW100, 2024)].net(), -7.0);

        let monthly = monthly_profile(&records);
        assert_eq!(monthly[&(KW100, 6)], 4.0);
        assert_eq!(monthly[&(KW100, 1)], 1.0);

        let solstice = day_profile(&records, 6, 21);
        assert_eq!(solstice.len(), 2);
        assert_eq!(solstice[&(KW100, 12)], 3.0);
        assert_eq!(solstice[&(KW100, 13)], 6.0);
    }

    #[test]
    fn capacities_are_summarised_separately() {
        let zone = TimeZoneConverter::new("UTC").unwrap();
        let small = record(&zone, 1_718_971_200, 1.0, 4.0);
        let large = MergedRecord {
            capacity_kw: 200.0,
            generation_quantity: 8.0,
            ..small.clone()
        };
        let annual = annual_totals(&[small, large]);

        assert_eq!(annual.len(), 2);
        assert_eq!(annual[&(KW100, 2024)].generation, 4.0);
        assert_eq!(annual[&(CapacityKw(200.0), 2024)].generation, 8.0);
        let keys: Vec<String> = annual.keys().map(|(c, _)| c.to_string()).collect();
        assert_eq!(keys, vec!["100kw", "200kw"]);
    }
}

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::tz::{LocalHour, TimeZoneConverter};

/// Rule deciding where a repeated local hour splits into its second occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum SplitRule {
    /// Use the zone's own transition: members at or after the later
    /// candidate instant of an ambiguous hour are occurrence 2.
    #[default]
    Transition,
    /// Members at least `threshold_seconds` after the label's first
    /// wall-clock start are occurrence 2. Thresholds under an hour are
    /// raised to an hour, since no single pass through a local hour lasts
    /// longer than that.
    Gap { threshold_seconds: i64 },
}

pub const DEFAULT_GAP_THRESHOLD_SECONDS: i64 = 3600;
pub const MIN_GAP_THRESHOLD_SECONDS: i64 = 3600;

/// Assigns the 1-or-2 occurrence index to members of one (date, hour) label.
#[derive(Debug, Clone, Copy)]
pub struct OccurrenceSequencer {
    zone: TimeZoneConverter,
    rule: SplitRule,
}

impl OccurrenceSequencer {
    pub fn new(zone: TimeZoneConverter, rule: SplitRule) -> Self {
        Self { zone, rule }
    }

    pub fn rule(&self) -> SplitRule {
        self.rule
    }

    /// `instants` must be sorted ascending. The result is parallel to it and
    /// is non-decreasing, starting at 1.
    pub fn assign(&self, date: NaiveDate, hour: u32, instants: &[i64]) -> Vec<u8> {
        debug_assert!(instants.windows(2).all(|w| w[0] <= w[1]));
        let Some(&first) = instants.first() else {
            return Vec::new();
        };

        let split_at = match self.rule {
            SplitRule::Transition => match self.zone.resolve_local_hour(date, hour) {
                Some(LocalHour::Ambiguous { latest, .. }) => Some(latest),
                _ => None,
            },
            SplitRule::Gap { threshold_seconds } => {
                let anchor = match self.zone.resolve_local_hour(date, hour) {
                    Some(LocalHour::Normal(t)) | Some(LocalHour::Ambiguous { earliest: t, .. }) => {
                        t.min(first)
                    }
                    _ => first,
                };
                Some(anchor + threshold_seconds.max(MIN_GAP_THRESHOLD_SECONDS))
            }
        };

        let occurrences: Vec<u8> = match split_at {
            Some(boundary) => instants
                .iter()
                .map(|&t| if t >= boundary { 2 } else { 1 })
                .collect(),
            None => vec![1; instants.len()],
        };

        if occurrences.last() == Some(&2) {
            debug!(%date, hour, members = instants.len(), "label split into two occurrences");
        }
        occurrences
    }
}

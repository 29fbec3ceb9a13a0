use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::align::JoinPolicy;
use crate::error::{AlignError, Result};
use crate::readings::{MalformedPolicy, ReadOptions, ReadingFormat, MAX_READING_SECONDS};
use crate::sequencer::{SplitRule, MIN_GAP_THRESHOLD_SECONDS};
use crate::template::is_leap_year;

/// Everything one pipeline run needs, passed in explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_zone")]
    pub zone: String,
    #[serde(default = "default_reference_year")]
    pub reference_year: i32,
    #[serde(default)]
    pub target_years: Option<YearRange>,
    #[serde(default)]
    pub join_policy: JoinPolicy,
    #[serde(default)]
    pub split_rule: SplitRule,
    #[serde(default)]
    pub readings: ReadingsConfig,
    #[serde(default)]
    pub site: SiteParams,
    /// Modelled system sizes in kW. Empty means just `site.capacity_kw`;
    /// otherwise each entry is run with the rest of `site` unchanged.
    #[serde(default)]
    pub capacities: Vec<f64>,
}

fn default_zone() -> String {
    "America/Toronto".into()
}

fn default_reference_year() -> i32 {
    2001
}

impl Default for Config {
    fn default() -> Self {
        Self {
            zone: default_zone(),
            reference_year: default_reference_year(),
            target_years: None,
            join_policy: JoinPolicy::default(),
            split_rule: SplitRule::default(),
            readings: ReadingsConfig::default(),
            site: SiteParams::default(),
            capacities: Vec::new(),
        }
    }
}

/// Inclusive range of target calendar years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    pub start: i32,
    pub end: i32,
}

impl YearRange {
    pub fn contains(&self, year: i32) -> bool {
        (self.start..=self.end).contains(&year)
    }

    pub fn years(&self) -> impl Iterator<Item = i32> {
        self.start..=self.end
    }
}

impl std::str::FromStr for YearRange {
    type Err = AlignError;

    /// Accepts "2023-2025" or a single "2024".
    fn from_str(s: &str) -> Result<Self> {
        let parse = |part: &str| {
            part.trim()
                .parse::<i32>()
                .map_err(|e| AlignError::Config(format!("invalid year '{part}': {e}")))
        };
        let range = match s.split_once('-') {
            Some((start, end)) => YearRange {
                start: parse(start)?,
                end: parse(end)?,
            },
            None => {
                let year = parse(s)?;
                YearRange { start: year, end: year }
            }
        };
        if range.start > range.end {
            return Err(AlignError::Config(format!(
                "year range {}-{} is reversed",
                range.start, range.end
            )));
        }
        Ok(range)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingsConfig {
    #[serde(default)]
    pub format: ReadingFormat,
    #[serde(default)]
    pub malformed: MalformedPolicy,
    #[serde(default)]
    pub preamble_lines: usize,
    #[serde(default = "default_local_reading_seconds")]
    pub local_reading_seconds: i64,
}

fn default_local_reading_seconds() -> i64 {
    MAX_READING_SECONDS
}

impl Default for ReadingsConfig {
    fn default() -> Self {
        Self {
            format: ReadingFormat::default(),
            malformed: MalformedPolicy::default(),
            preamble_lines: 0,
            local_reading_seconds: default_local_reading_seconds(),
        }
    }
}

impl ReadingsConfig {
    pub fn read_options(&self) -> ReadOptions {
        ReadOptions {
            format: self.format,
            malformed: self.malformed,
            preamble_lines: self.preamble_lines,
            local_reading_seconds: self.local_reading_seconds,
        }
    }
}

/// Location and panel configuration the generation series was modelled for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteParams {
    #[serde(default = "default_latitude")]
    pub latitude: f64,
    #[serde(default = "default_longitude")]
    pub longitude: f64,
    /// Rated DC capacity in kW; used in output column headers.
    #[serde(default = "default_capacity_kw")]
    pub capacity_kw: f64,
    #[serde(default = "default_tilt")]
    pub tilt: f64,
    #[serde(default = "default_azimuth")]
    pub azimuth: f64,
    /// System losses in percent.
    #[serde(default = "default_losses")]
    pub losses: f64,
}

fn default_latitude() -> f64 {
    43.653
}
fn default_longitude() -> f64 {
    -79.383
}
fn default_capacity_kw() -> f64 {
    1.0
}
fn default_tilt() -> f64 {
    35.0
}
fn default_azimuth() -> f64 {
    180.0
}
fn default_losses() -> f64 {
    14.0
}

impl Default for SiteParams {
    fn default() -> Self {
        Self {
            latitude: default_latitude(),
            longitude: default_longitude(),
            capacity_kw: default_capacity_kw(),
            tilt: default_tilt(),
            azimuth: default_azimuth(),
            losses: default_losses(),
        }
    }
}

impl SiteParams {
    /// Bitwise identity of the parameters, usable as a hash key.
    pub fn fingerprint(&self) -> [u64; 6] {
        [
            self.latitude.to_bits(),
            self.longitude.to_bits(),
            self.capacity_kw.to_bits(),
            self.tilt.to_bits(),
            self.azimuth.to_bits(),
            self.losses.to_bits(),
        ]
    }

    /// Capacity formatted for column headers, e.g. `100kw` or `2.5kw`.
    pub fn capacity_label(&self) -> String {
        format!("{}kw", self.capacity_kw)
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let cfg: Self = serde_yaml::from_str(&raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// One site per configured capacity, in configured order.
    pub fn sites(&self) -> Vec<SiteParams> {
        if self.capacities.is_empty() {
            return vec![self.site.clone()];
        }
        self.capacities
            .iter()
            .map(|&capacity_kw| SiteParams {
                capacity_kw,
                ..self.site.clone()
            })
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if is_leap_year(self.reference_year) {
            return Err(AlignError::LeapReferenceYear(self.reference_year));
        }
        if let Some(range) = self.target_years {
            if range.start > range.end {
                return Err(AlignError::Config(format!(
                    "target_years start {} is after end {}",
                    range.start, range.end
                )));
            }
        }
        for capacity in std::iter::once(self.site.capacity_kw).chain(self.capacities.iter().copied()) {
            if !(capacity.is_finite() && capacity > 0.0) {
                return Err(AlignError::Config(format!(
                    "system capacity must be positive, got {capacity}"
                )));
            }
        }
        for (i, capacity) in self.capacities.iter().enumerate() {
            if self.capacities[..i].contains(capacity) {
                return Err(AlignError::Config(format!(
                    "capacity {capacity} kW is listed twice"
                )));
            }
        }
        if let SplitRule::Gap { threshold_seconds } = self.split_rule {
            if threshold_seconds < MIN_GAP_THRESHOLD_SECONDS {
                return Err(AlignError::Config(format!(
                    "gap threshold must be at least {MIN_GAP_THRESHOLD_SECONDS}s, got {threshold_seconds}"
                )));
            }
        }
        let local = self.readings.local_reading_seconds;
        if local <= 0 || local > MAX_READING_SECONDS {
            return Err(AlignError::Config(format!(
                "readings.local_reading_seconds must be in 1..={MAX_READING_SECONDS}, got {local}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_yaml_gives_defaults() {
        let cfg: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg, Config::default());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn full_yaml_is_parsed() {
        let yaml = r#"
zone: Europe/Berlin
reference_year: 2019
target_years: { start: 2023, end: 2025 }
join_policy: inner_join
split_rule: { rule: gap, threshold_seconds: 3600 }
readings:
  format: local
  malformed: fail_fast
  preamble_lines: 2
site:
  capacity_kw: 100
  tilt: 30
capacities: [100, 250]
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.zone, "Europe/Berlin");
        assert_eq!(cfg.target_years, Some(YearRange { start: 2023, end: 2025 }));
        assert_eq!(cfg.join_policy, JoinPolicy::InnerJoin);
        assert_eq!(cfg.split_rule, SplitRule::Gap { threshold_seconds: 3600 });
        assert_eq!(cfg.readings.format, ReadingFormat::Local);
        assert_eq!(cfg.readings.malformed, MalformedPolicy::FailFast);
        assert_eq!(cfg.site.capacity_kw, 100.0);
        assert_eq!(cfg.site.azimuth, 180.0);
        assert_eq!(cfg.site.capacity_label(), "100kw");
        let sites = cfg.sites();
        assert_eq!(sites.len(), 2);
        assert_eq!(sites[1].capacity_kw, 250.0);
        assert_eq!(sites[1].tilt, 30.0);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let leap = Config {
            reference_year: 2020,
            ..Config::default()
        };
        assert!(matches!(leap.validate(), Err(AlignError::LeapReferenceYear(2020))));

        let mut gap = Config::default();
        gap.split_rule = SplitRule::Gap { threshold_seconds: 0 };
        assert!(matches!(gap.validate(), Err(AlignError::Config(_))));

        let mut capacity = Config::default();
        capacity.site.capacity_kw = 0.0;
        assert!(capacity.validate().is_err());

        let repeated = Config {
            capacities: vec![100.0, 100.0],
            ..Config::default()
        };
        assert!(repeated.validate().is_err());
        let negative = Config {
            capacities: vec![-5.0],
            ..Config::default()
        };
        assert!(negative.validate().is_err());
    }

    #[test]
    fn sub_hour_gap_threshold_is_rejected() {
        let five_minutes = Config {
            split_rule: SplitRule::Gap { threshold_seconds: 300 },
            ..Config::default()
        };
        assert!(matches!(five_minutes.validate(), Err(AlignError::Config(_))));
        let hour = Config {
            split_rule: SplitRule::Gap { threshold_seconds: 3600 },
            ..Config::default()
        };
        assert!(hour.validate().is_ok());
    }

    #[test]
    fn single_capacity_comes_from_the_site() {
        let cfg = Config::default();
        assert_eq!(cfg.sites(), vec![SiteParams::default()]);
    }

    #[test]
    fn year_range_parses_from_cli_text() {
        assert_eq!("2023-2025".parse::<YearRange>().unwrap(), YearRange { start: 2023, end: 2025 });
        assert_eq!("2024".parse::<YearRange>().unwrap(), YearRange { start: 2024, end: 2024 });
        assert!("2025-2023".parse::<YearRange>().is_err());
        assert!("soon".parse::<YearRange>().is_err());
    }
}

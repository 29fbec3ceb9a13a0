use std::sync::Arc;

use tracing::info;

use crate::aggregate::{HourlyBucket, IntervalAggregator};
use crate::align::{Aligner, MergeOutcome};
use crate::config::{Config, SiteParams};
use crate::error::{AlignError, Result};
use crate::readings::IntervalReading;
use crate::template::{GenerationSeries, TemplateCache, TemplateMap, TemplateProjector};
use crate::tz::TimeZoneConverter;

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub site: SiteParams,
    pub outcome: MergeOutcome,
    /// Buckets produced before the target-year filter.
    pub buckets: usize,
    /// Buckets whose local year fell outside the target range.
    pub out_of_range: usize,
    pub template: Arc<TemplateMap>,
}

/// One modelled system: its parameters and the reference-year series the
/// model produced for them.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteInput {
    pub site: SiteParams,
    pub series: GenerationSeries,
}

/// Readings + generation series → merged series, for one configuration.
///
/// Holds no state between runs other than the template cache, which only
/// ever returns maps identical to a fresh build.
#[derive(Debug)]
pub struct Pipeline {
    config: Config,
    zone: TimeZoneConverter,
    cache: TemplateCache,
}

impl Pipeline {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let zone = TimeZoneConverter::new(&config.zone)?;
        Ok(Self {
            config,
            zone,
            cache: TemplateCache::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn zone(&self) -> TimeZoneConverter {
        self.zone
    }

    pub fn template(&mut self, site: &SiteParams, series: &GenerationSeries) -> Result<Arc<TemplateMap>> {
        let projector = TemplateProjector::new(self.zone);
        self.cache
            .get_or_build(&projector, series, self.config.reference_year, site)
    }

    pub fn aggregate(&self, readings: &[IntervalReading]) -> Result<Vec<HourlyBucket>> {
        IntervalAggregator::new(self.zone, self.config.split_rule).aggregate(readings)
    }

    /// Single-system run against the configured site.
    pub fn run(&mut self, readings: &[IntervalReading], generation: &[f64]) -> Result<PipelineReport> {
        let input = SiteInput {
            site: self.config.site.clone(),
            series: GenerationSeries::new(generation.to_vec()),
        };
        let mut reports = self.run_sites(readings, std::slice::from_ref(&input))?;
        reports
            .pop()
            .ok_or_else(|| AlignError::Config("no site to run".into()))
    }

    /// Merges the readings once per system. Every template is built before
    /// any load work, so one bad series fails the whole run.
    pub fn run_sites(
        &mut self,
        readings: &[IntervalReading],
        inputs: &[SiteInput],
    ) -> Result<Vec<PipelineReport>> {
        let templates = inputs
            .iter()
            .map(|input| self.template(&input.site, &input.series))
            .collect::<Result<Vec<_>>>()?;

        let all = self.aggregate(readings)?;
        let total = all.len();
        let buckets: Vec<HourlyBucket> = match self.config.target_years {
            Some(range) => all.into_iter().filter(|b| range.contains(b.year())).collect(),
            None => all,
        };
        let out_of_range = total - buckets.len();
        if out_of_range > 0 {
            info!(out_of_range, "buckets outside target years ignored");
        }

        let aligner = Aligner::new(self.zone);
        let mut reports = Vec::with_capacity(inputs.len());
        for (input, template) in inputs.iter().zip(templates) {
            let outcome = aligner.merge(&buckets, &template, self.config.join_policy)?;
            info!(
                zone = self.zone.name(),
                capacity_kw = input.site.capacity_kw,
                records = outcome.records.len(),
                unmapped = outcome.unmapped_count,
                "pipeline finished"
            );
            reports.push(PipelineReport {
                site: input.site.clone(),
                outcome,
                buckets: total,
                out_of_range,
                template,
            });
        }
        Ok(reports)
    }
}

/// One-shot form of [`Pipeline::run`].
pub fn reconcile(config: &Config, readings: &[IntervalReading], generation: &[f64]) -> Result<PipelineReport> {
    Pipeline::new(config.clone())?.run(readings, generation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::YearRange;
    use crate::template::{CalendarKey, HOURS_PER_TEMPLATE};

    fn generation() -> Vec<f64> {
        (0..HOURS_PER_TEMPLATE).map(|i| ((i % 24) as f64 - 6.0).max(0.0)).collect()
    }

    fn config() -> Config {
        Config {
            zone: "America/New_York".into(),
            ..Config::default()
        }
    }

    #[test]
    fn unknown_zone_aborts_before_running() {
        let cfg = Config {
            zone: "Nowhere/Special".into(),
            ..Config::default()
        };
        assert!(matches!(Pipeline::new(cfg), Err(AlignError::ZoneResolution(_))));
    }

    #[test]
    fn short_generation_series_aborts_the_run() {
        let mut pipeline = Pipeline::new(config()).unwrap();
        let readings = vec![IntervalReading::new(1_717_243_200, 3600, 1.0)];
        let err = pipeline.run(&readings, &[1.0; 100]).unwrap_err();
        assert!(matches!(err, AlignError::TemplateLength { .. }));
    }

    #[test]
    fn target_years_filter_buckets() {
        let cfg = Config {
            target_years: Some(YearRange { start: 2024, end: 2024 }),
            ..config()
        };
        // 2023-12-31 23:00 and 2024-01-01 00:00 in New York.
        let readings = vec![
            IntervalReading::new(1_704_081_600, 3600, 1.0),
            IntervalReading::new(1_704_085_200, 3600, 2.0),
        ];
        let report = reconcile(&cfg, &readings, &generation()).unwrap();
        assert_eq!(report.buckets, 2);
        assert_eq!(report.out_of_range, 1);
        assert_eq!(report.outcome.records.len(), 1);
        assert_eq!(report.outcome.records[0].load_quantity, 2.0);
    }

    #[test]
    fn template_is_reused_across_runs() {
        let mut pipeline = Pipeline::new(config()).unwrap();
        let readings = vec![IntervalReading::new(1_717_243_200, 3600, 1.0)];
        let first = pipeline.run(&readings, &generation()).unwrap();
        let second = pipeline.run(&readings, &generation()).unwrap();
        assert!(Arc::ptr_eq(&first.template, &second.template));
        assert_eq!(first.outcome, second.outcome);
    }

    #[test]
    fn changed_series_is_not_served_from_the_cache() {
        let mut pipeline = Pipeline::new(config()).unwrap();
        // 2024-06-01 12:00 UTC, 08:00 in New York.
        let readings = vec![IntervalReading::new(1_717_243_200, 3600, 1.0)];

        let ones = pipeline.run(&readings, &[1.0; HOURS_PER_TEMPLATE]).unwrap();
        let fives = pipeline.run(&readings, &[5.0; HOURS_PER_TEMPLATE]).unwrap();
        assert_eq!(ones.outcome.records[0].generation_quantity, 1.0);
        assert_eq!(fives.outcome.records[0].generation_quantity, 5.0);
    }

    #[test]
    fn each_capacity_gets_its_own_template_and_records() {
        let cfg = Config {
            capacities: vec![100.0, 250.0],
            ..config()
        };
        let mut pipeline = Pipeline::new(cfg.clone()).unwrap();
        let inputs: Vec<SiteInput> = cfg
            .sites()
            .into_iter()
            .map(|site| {
                let scale = site.capacity_kw;
                SiteInput {
                    site,
                    series: GenerationSeries::with_irradiance(
                        vec![scale; HOURS_PER_TEMPLATE],
                        vec![700.0; HOURS_PER_TEMPLATE],
                    ),
                }
            })
            .collect();
        let readings = vec![IntervalReading::new(1_717_243_200, 3600, 1.0)];

        let reports = pipeline.run_sites(&readings, &inputs).unwrap();
        assert_eq!(reports.len(), 2);
        assert!(!Arc::ptr_eq(&reports[0].template, &reports[1].template));
        for (report, capacity) in reports.iter().zip([100.0, 250.0]) {
            assert_eq!(report.site.capacity_kw, capacity);
            assert_eq!(report.template.capacity_kw(), capacity);
            let record = &report.outcome.records[0];
            assert_eq!(record.capacity_kw, capacity);
            assert_eq!(record.generation_quantity, capacity);
            assert_eq!(record.poa_wm2, Some(700.0));
        }
        assert_eq!(
            reports[1].template.entry(CalendarKey::new(6, 1, 8, 1)).unwrap().poa_wm2,
            Some(700.0)
        );
    }

    #[test]
    fn one_bad_series_fails_every_capacity() {
        let mut pipeline = Pipeline::new(config()).unwrap();
        let inputs = vec![
            SiteInput {
                site: SiteParams::default(),
                series: GenerationSeries::new(vec![1.0; HOURS_PER_TEMPLATE]),
            },
            SiteInput {
                site: SiteParams {
                    capacity_kw: 5.0,
                    ..SiteParams::default()
                },
                series: GenerationSeries::new(vec![1.0; 10]),
            },
        ];
        let err = pipeline.run_sites(&[], &inputs).unwrap_err();
        assert!(matches!(err, AlignError::TemplateLength { actual: 10, .. }));
    }
}

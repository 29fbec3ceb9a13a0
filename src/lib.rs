//! Aligns interval load readings (UTC instants) with a synthetic
//! reference-year solar generation series (local standard time) across
//! arbitrary target years, keeping DST transitions intact.
//!
//! Flow: readings → [`IntervalAggregator`] → [`HourlyBucket`]s;
//! generation series → [`TemplateProjector`] → [`TemplateMap`];
//! both → [`Aligner`] → [`MergedRecord`]s. [`Pipeline`] wires the steps
//! together for one [`Config`], once per modelled system capacity.

pub mod aggregate;
pub mod align;
pub mod config;
pub mod error;
pub mod expand;
pub mod export;
pub mod pipeline;
pub mod readings;
pub mod report;
pub mod sequencer;
pub mod template;
pub mod tz;

pub use aggregate::{HourlyBucket, IntervalAggregator};
pub use align::{Aligner, JoinPolicy, MergeOutcome, MergedRecord};
pub use config::{Config, SiteParams, YearRange};
pub use error::{AlignError, Result};
pub use expand::{expand_years, GenerationHour};
pub use pipeline::{reconcile, Pipeline, PipelineReport, SiteInput};
pub use readings::{IntervalReading, MalformedPolicy, ReadOptions, ReadSummary, ReadingFormat};
pub use sequencer::{OccurrenceSequencer, SplitRule};
pub use report::CapacityKw;
pub use template::{
    CalendarKey, GenerationSeries, TemplateCache, TemplateEntry, TemplateHour, TemplateMap,
    TemplateProjector,
};
pub use tz::{CivilTimestamp, LocalHour, TimeZoneConverter};

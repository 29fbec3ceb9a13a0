use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use solar_load_align::readings::{read_generation, read_readings};
use solar_load_align::{
    expand_years, export, report, Config, JoinPolicy, MergedRecord, Pipeline, SiteInput, YearRange,
};

#[derive(Parser)]
#[command(name = "solar-load-align")]
#[command(version, about = "Merge interval load readings with a reference-year solar generation series")]
struct Cli {
    /// YAML configuration; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Load readings CSV
    #[arg(long)]
    readings: PathBuf,

    /// Generation series CSV with 8760 hourly values; repeat once per
    /// capacity, in capacity order
    #[arg(long, required = true)]
    generation: Vec<PathBuf>,

    /// Column of the generation CSV to use
    #[arg(long)]
    generation_column: Option<String>,

    /// Column holding plane-of-array irradiance (W/m²)
    #[arg(long)]
    poa_column: Option<String>,

    /// Override the modelled capacities in kW, e.g. 100,250
    #[arg(long, value_delimiter = ',')]
    capacities: Vec<f64>,

    /// Merged output CSV
    #[arg(long, default_value = "merged.csv")]
    output: PathBuf,

    /// Also write the generation series expanded over the target years
    #[arg(long)]
    generation_output: Option<PathBuf>,

    /// Override the configured zone, e.g. America/Toronto
    #[arg(long)]
    zone: Option<String>,

    /// Override target years, e.g. 2023-2025
    #[arg(long)]
    years: Option<YearRange>,

    /// Drop buckets without a template match instead of zero-filling
    #[arg(long)]
    inner_join: bool,

    /// Calendar day for the typical-day profile, as MM-DD
    #[arg(long, default_value = "06-21")]
    profile_day: String,
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let mut cfg = match &cli.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(zone) = cli.zone {
        cfg.zone = zone;
    }
    if let Some(years) = cli.years {
        cfg.target_years = Some(years);
    }
    if cli.inner_join {
        cfg.join_policy = JoinPolicy::InnerJoin;
    }
    if !cli.capacities.is_empty() {
        cfg.capacities = cli.capacities.clone();
    }
    let (profile_month, profile_day) = parse_month_day(&cli.profile_day)?;

    let mut pipeline = Pipeline::new(cfg.clone())?;
    info!(zone = %cfg.zone, reference_year = cfg.reference_year, "configuration ready");

    let sites = cfg.sites();
    anyhow::ensure!(
        sites.len() == cli.generation.len(),
        "{} capacities configured but {} generation files given",
        sites.len(),
        cli.generation.len()
    );
    let mut inputs = Vec::with_capacity(sites.len());
    for (site, path) in sites.into_iter().zip(&cli.generation) {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let series = read_generation(file, cli.generation_column.as_deref(), cli.poa_column.as_deref())
            .with_context(|| format!("reading {}", path.display()))?;
        inputs.push(SiteInput { site, series });
    }

    let file = File::open(&cli.readings)
        .with_context(|| format!("opening {}", cli.readings.display()))?;
    let (readings, summary) = read_readings(file, &pipeline.zone(), &cfg.readings.read_options())?;

    let runs = pipeline.run_sites(&readings, &inputs)?;
    let several = runs.len() > 1;

    for run in &runs {
        let capacity = run.site.capacity_label();
        let path = per_capacity(&cli.output, &capacity, several);
        export::write_merged(BufWriter::new(File::create(&path)?), &run.outcome.records, &capacity)?;
        info!(path = %path.display(), rows = run.outcome.records.len(), "merged series written");

        if let Some(base) = &cli.generation_output {
            let years = cfg
                .target_years
                .context("--generation-output needs target years (--years or target_years)")?;
            let rows = expand_years(&run.template, &pipeline.zone(), years)?;
            let path = per_capacity(base, &capacity, several);
            export::write_generation(BufWriter::new(File::create(&path)?), &rows, &capacity)?;
            info!(path = %path.display(), rows = rows.len(), "expanded generation written");
        }
    }

    // --- Output the summary ---
    let Some(first) = runs.first() else {
        return Ok(());
    };
    let records: Vec<MergedRecord> = runs
        .iter()
        .flat_map(|run| run.outcome.records.iter().cloned())
        .collect();
    println!("Reconciliation summary ({}, reference year {}):\n", cfg.zone, cfg.reference_year);
    println!("   Readings accepted: {}", summary.accepted);
    println!("   Readings rejected: {}", summary.rejected_count());
    for rejected in &summary.rejected {
        println!("     line {}: {}", rejected.line, rejected.reason);
    }
    println!("   Local labels shifted past a DST gap: {}", summary.shifted);
    println!("   Hour buckets: {} ({} outside target years)", first.buckets, first.out_of_range);
    for run in &runs {
        let outcome = &run.outcome;
        println!("\n   {} system:", run.site.capacity_label());
        println!("     Merged records: {}", outcome.records.len());
        println!(
            "     Unmapped buckets: {} ({} skipped in the reference year, {} dropped)",
            outcome.unmapped_count, outcome.never_present_count, outcome.dropped
        );
        for key in &outcome.unmapped_keys {
            println!(
                "       {:02}-{:02} {:02}:00 occurrence {}",
                key.month, key.day, key.hour, key.occurrence
            );
        }
    }

    println!("\nAnnual totals:");
    for ((capacity, year), totals) in report::annual_totals(&records) {
        println!(
            "   {} {}: load {:.2} kWh, generation {:.2} kWh, net {:.2} kWh over {} h",
            capacity,
            year,
            totals.load,
            totals.generation,
            totals.net(),
            totals.hours
        );
    }

    println!("\nMonthly mean hourly generation:");
    for ((capacity, month), mean) in report::monthly_profile(&records) {
        println!("   {} {:02}: {:.3} kWh", capacity, month, mean);
    }

    println!("\nTypical day profile ({:02}-{:02}):", profile_month, profile_day);
    for ((capacity, hour), mean) in report::day_profile(&records, profile_month, profile_day) {
        println!("   {} {:02}:00 {:.3} kWh", capacity, hour, mean);
    }

    Ok(())
}

/// `merged.csv` becomes `merged_100kw.csv` when several capacities run.
fn per_capacity(path: &Path, capacity: &str, several: bool) -> PathBuf {
    if !several {
        return path.to_path_buf();
    }
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("output");
    let name = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}_{capacity}.{ext}"),
        None => format!("{stem}_{capacity}"),
    };
    path.with_file_name(name)
}

fn parse_month_day(s: &str) -> anyhow::Result<(u32, u32)> {
    let (month, day) = s
        .split_once('-')
        .with_context(|| format!("expected MM-DD, got '{s}'"))?;
    let month: u32 = month.parse().with_context(|| format!("invalid month in '{s}'"))?;
    let day: u32 = day.parse().with_context(|| format!("invalid day in '{s}'"))?;
    anyhow::ensure!((1..=12).contains(&month) && (1..=31).contains(&day), "'{s}' is not a calendar day");
    Ok((month, day))
}

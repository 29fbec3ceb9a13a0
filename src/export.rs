use std::io::Write;

use csv::Writer;

use crate::align::MergedRecord;
use crate::error::Result;
use crate::expand::GenerationHour;

const IRRADIANCE_HEADERS: [&str; 2] = ["poa_Wm2", "poa_kWhm2"];

/// Column headers for merged output; generation and net columns carry the
/// site's rated capacity, e.g. `generation_kwh_100kw`.
pub fn merged_headers(capacity_label: &str) -> Vec<String> {
    vec![
        "epoch".into(),
        "civil_time".into(),
        "occurrence".into(),
        "load_kwh".into(),
        format!("generation_kwh_{capacity_label}"),
        format!("net_kwh_{capacity_label}"),
        "unmapped".into(),
    ]
}

/// Hourly irradiance in W/m² and the matching kWh/m² over the hour. Blank
/// when the hour has none.
fn irradiance_fields(poa_wm2: Option<f64>) -> [String; 2] {
    match poa_wm2 {
        Some(w) => [w.to_string(), (w / 1000.0).to_string()],
        None => [String::new(), String::new()],
    }
}

/// Irradiance columns are appended only when some record carries it.
pub fn write_merged<W: Write>(writer: W, records: &[MergedRecord], capacity_label: &str) -> Result<()> {
    let with_poa = records.iter().any(|r| r.poa_wm2.is_some());
    let mut out = Writer::from_writer(writer);
    let mut headers = merged_headers(capacity_label);
    if with_poa {
        headers.extend(IRRADIANCE_HEADERS.map(String::from));
    }
    out.write_record(headers)?;
    for r in records {
        let mut row = vec![
            r.epoch.to_string(),
            r.civil.to_string(),
            r.occurrence.to_string(),
            r.load_quantity.to_string(),
            r.generation_quantity.to_string(),
            r.net_quantity.to_string(),
            r.unmapped.to_string(),
        ];
        if with_poa {
            row.extend(irradiance_fields(r.poa_wm2));
        }
        out.write_record(row)?;
    }
    out.flush()?;
    Ok(())
}

pub fn write_generation<W: Write>(writer: W, rows: &[GenerationHour], capacity_label: &str) -> Result<()> {
    let with_poa = rows.iter().any(|r| r.poa_wm2.is_some());
    let mut out = Writer::from_writer(writer);
    let mut headers = vec![
        "epoch".to_string(),
        "civil_time".to_string(),
        "year".to_string(),
        "occurrence".to_string(),
        format!("ac_kwh_{capacity_label}"),
        "system_capacity_kw".to_string(),
        "unmapped".to_string(),
    ];
    if with_poa {
        headers.extend(IRRADIANCE_HEADERS.map(String::from));
    }
    out.write_record(headers)?;
    for r in rows {
        let mut row = vec![
            r.epoch.to_string(),
            r.civil.to_string(),
            r.year.to_string(),
            r.occurrence.to_string(),
            r.value.to_string(),
            r.capacity_kw.to_string(),
            r.unmapped.to_string(),
        ];
        if with_poa {
            row.extend(irradiance_fields(r.poa_wm2));
        }
        out.write_record(row)?;
    }
    out.flush()?;
    Ok(())
}

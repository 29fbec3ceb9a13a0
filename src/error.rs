use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlignError {
    #[error("Malformed reading at line {line}: {reason}")]
    MalformedReading { line: u64, reason: String },
    #[error("Malformed generation value at line {line}: {reason}")]
    MalformedGeneration { line: u64, reason: String },
    #[error("Unknown or unsupported time zone: {0}")]
    ZoneResolution(String),
    #[error("Generation series has {actual} entries, expected {expected}")]
    TemplateLength { expected: usize, actual: usize },
    #[error("Reference year {0} is a leap year")]
    LeapReferenceYear(i32),
    #[error("Duplicate bucket for {date} hour {hour} occurrence {occurrence}")]
    DuplicateBucket {
        date: chrono::NaiveDate,
        hour: u32,
        occurrence: u8,
    },
    #[error("Non-finite value {value} in {context}")]
    NonFiniteValue { context: String, value: f64 },
    #[error("Instant {0} is outside the supported time range")]
    InstantOutOfRange(i64),
    #[error("Config error: {0}")]
    Config(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, AlignError>;

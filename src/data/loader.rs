//! CSV loading from local files and remote URLs

use super::Dataset;
use crate::error::{FlowError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Cursor;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::info;

/// CSV reader options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadOptions {
    /// Rows used for dtype inference
    pub infer_schema_length: usize,
    /// Field separator
    pub separator: u8,
    /// Cell text read as null
    pub null_value: Option<String>,
    /// HTTP timeout for remote sources
    pub timeout_secs: u64,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            infer_schema_length: 1000,
            separator: b',',
            null_value: Some("NA".to_string()),
            timeout_secs: 60,
        }
    }
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_separator(mut self, separator: u8) -> Self {
        self.separator = separator;
        self
    }

    pub fn with_null_value(mut self, null_value: Option<String>) -> Self {
        self.null_value = null_value;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    fn read_options(&self) -> CsvReadOptions {
        let mut parse = CsvParseOptions::default().with_separator(self.separator);
        if let Some(null) = &self.null_value {
            parse = parse.with_null_values(Some(NullValues::AllColumnsSingle(null.as_str().into())));
        }
        CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(self.infer_schema_length))
            .with_parse_options(parse)
    }
}

/// Where a dataset comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataSource {
    Path { path: PathBuf },
    Url { url: String },
}

impl DataSource {
    /// `http://` and `https://` strings become URLs, everything else a path
    pub fn parse(source: &str) -> Self {
        if source.starts_with("http://") || source.starts_with("https://") {
            DataSource::Url { url: source.to_string() }
        } else {
            DataSource::Path { path: PathBuf::from(source) }
        }
    }

    pub async fn load(&self, options: &LoadOptions) -> Result<Dataset> {
        match self {
            DataSource::Path { path } => read_csv(path, options),
            DataSource::Url { url } => fetch_csv(url, options).await,
        }
    }
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataSource::Path { path } => write!(f, "{}", path.display()),
            DataSource::Url { url } => write!(f, "{}", url),
        }
    }
}

/// Read a CSV file from disk
pub fn read_csv(path: &std::path::Path, options: &LoadOptions) -> Result<Dataset> {
    let start = Instant::now();
    let file = File::open(path)?;
    let df = options.read_options().into_reader_with_file_handle(file).finish()?;
    info!(
        path = %path.display(),
        rows = df.height(),
        cols = df.width(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "loaded csv"
    );
    Dataset::new(df)
}

/// Parse CSV text held in memory
pub fn read_csv_bytes(bytes: Vec<u8>, options: &LoadOptions) -> Result<Dataset> {
    let df = options
        .read_options()
        .into_reader_with_file_handle(Cursor::new(bytes))
        .finish()?;
    Dataset::new(df)
}

/// Download a CSV over HTTP(S); the whole body is held in memory
pub async fn fetch_csv(url: &str, options: &LoadOptions) -> Result<Dataset> {
    let start = Instant::now();
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(options.timeout_secs))
        .build()?;

    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(FlowError::Http(format!("GET {} returned {}", url, status)));
    }
    let bytes = response.bytes().await?.to_vec();

    let data = read_csv_bytes(bytes, options)?;
    info!(
        url,
        rows = data.n_rows(),
        cols = data.n_cols(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "fetched remote csv"
    );
    Ok(data)
}

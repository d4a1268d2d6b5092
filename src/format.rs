//! Output format negotiation for the Query API (spec §4.I, §6.2):
//! renders a `ForecastEnsemble` as json, csv, excel, or parquet bytes.

use crate::forecasting::ForecastEnsemble;
use crate::store::artifact::ensemble_to_dataframe;
use crate::time::sample_column_names;
use polars::prelude::*;
use rust_xlsxwriter::Workbook;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Csv,
    Excel,
    Parquet,
}

impl OutputFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Json => "application/json",
            OutputFormat::Csv => "text/csv",
            OutputFormat::Excel => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            OutputFormat::Parquet => "application/octet-stream",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            "excel" | "xlsx" => Ok(OutputFormat::Excel),
            "parquet" => Ok(OutputFormat::Parquet),
            other => Err(FormatError::UnsupportedFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("unsupported output format: {0}")]
    UnsupportedFormat(String),
    #[error("polars error: {0}")]
    Polars(#[from] PolarsError),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("excel writer error: {0}")]
    Excel(#[from] rust_xlsxwriter::XlsxError),
    #[error("schema error: {0}")]
    Schema(#[from] crate::store::artifact::SchemaValidationError),
}

pub fn render(ensemble: &ForecastEnsemble, format: OutputFormat) -> Result<Vec<u8>, FormatError> {
    match format {
        OutputFormat::Json => render_json(ensemble),
        OutputFormat::Csv => render_csv(ensemble),
        OutputFormat::Excel => render_excel(ensemble),
        OutputFormat::Parquet => render_parquet(ensemble),
    }
}

fn render_json(ensemble: &ForecastEnsemble) -> Result<Vec<u8>, FormatError> {
    Ok(serde_json::to_vec_pretty(ensemble)?)
}

fn render_csv(ensemble: &ForecastEnsemble) -> Result<Vec<u8>, FormatError> {
    let sample_names = sample_column_names(ensemble.forecasts.first().map(|f| f.samples.len()).unwrap_or(0));
    let mut out = String::new();
    out.push_str("timestamp,product,point_forecast,generation_timestamp,is_fallback");
    for name in &sample_names {
        out.push(',');
        out.push_str(name);
    }
    out.push('\n');

    for forecast in &ensemble.forecasts {
        out.push_str(&forecast.timestamp.to_rfc3339());
        out.push(',');
        out.push_str(forecast.product.as_str());
        out.push(',');
        out.push_str(&forecast.point_forecast.to_string());
        out.push(',');
        out.push_str(&forecast.generation_timestamp.to_rfc3339());
        out.push(',');
        out.push_str(if forecast.is_fallback { "true" } else { "false" });
        for sample in &forecast.samples {
            out.push(',');
            out.push_str(&sample.to_string());
        }
        out.push('\n');
    }
    Ok(out.into_bytes())
}

fn render_excel(ensemble: &ForecastEnsemble) -> Result<Vec<u8>, FormatError> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    let sample_names = sample_column_names(ensemble.forecasts.first().map(|f| f.samples.len()).unwrap_or(0));

    let mut col = 0u16;
    for header in ["timestamp", "product", "point_forecast", "generation_timestamp", "is_fallback"] {
        sheet.write_string(0, col, header)?;
        col += 1;
    }
    for name in &sample_names {
        sheet.write_string(0, col, name)?;
        col += 1;
    }

    for (row_idx, forecast) in ensemble.forecasts.iter().enumerate() {
        let row = (row_idx + 1) as u32;
        let mut col = 0u16;
        sheet.write_string(row, col, forecast.timestamp.to_rfc3339())?;
        col += 1;
        sheet.write_string(row, col, forecast.product.as_str())?;
        col += 1;
        sheet.write_number(row, col, forecast.point_forecast)?;
        col += 1;
        sheet.write_string(row, col, forecast.generation_timestamp.to_rfc3339())?;
        col += 1;
        sheet.write_boolean(row, col, forecast.is_fallback)?;
        col += 1;
        for sample in &forecast.samples {
            sheet.write_number(row, col, *sample)?;
            col += 1;
        }
    }

    Ok(workbook.save_to_buffer()?)
}

fn render_parquet(ensemble: &ForecastEnsemble) -> Result<Vec<u8>, FormatError> {
    let mut df = ensemble_to_dataframe(ensemble)?;
    let mut buf = Vec::new();
    ParquetWriter::new(&mut buf).finish(&mut df)?;
    Ok(buf)
}

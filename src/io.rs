//! CSV glue for the `W1,W2,A,Y,R_A,R_Y` schema.
//!
//! Columns are located by header name, so any column order (and extra
//! columns) is accepted. In partial files a missing `A` or `Y` is written as
//! [`BinaryObservation::SENTINEL`].

use crate::estimate::EstimationError;
use crate::types::{BinaryObservation, FullDataset, PartialDataset};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use ndarray::Array1;
use std::path::Path;

pub const COLUMNS: [&str; 6] = ["W1", "W2", "A", "Y", "R_A", "R_Y"];

struct RawTable {
    headers: Vec<String>,
    records: Vec<StringRecord>,
}

impl RawTable {
    fn column_index(&self, column: &str) -> Result<usize, EstimationError> {
        self.headers
            .iter()
            .position(|h| h == column)
            .ok_or_else(|| EstimationError::MissingColumn {
                column: column.to_string(),
            })
    }

    fn numeric_column(&self, column: &str) -> Result<Array1<f64>, EstimationError> {
        let j = self.column_index(column)?;
        let mut out = Vec::with_capacity(self.records.len());
        for (i, rec) in self.records.iter().enumerate() {
            let raw = rec.get(j).map(str::trim).unwrap_or_default();
            if raw.is_empty() {
                return Err(EstimationError::Io(format!(
                    "empty field at row {}, column '{column}'",
                    i + 1
                )));
            }
            let value = raw.parse::<f64>().map_err(|e| {
                EstimationError::Io(format!(
                    "failed to parse '{raw}' at row {}, column '{column}': {e}",
                    i + 1
                ))
            })?;
            out.push(value);
        }
        Ok(Array1::from(out))
    }

    fn observation_column(
        &self,
        column: &'static str,
    ) -> Result<Array1<BinaryObservation>, EstimationError> {
        let values = self.numeric_column(column)?;
        let mut out = Vec::with_capacity(values.len());
        for (row, &value) in values.iter().enumerate() {
            let decoded = if value.fract() == 0.0 {
                BinaryObservation::from_code(value as i64)
            } else {
                None
            };
            out.push(decoded.ok_or(EstimationError::NonBinaryValue { row, column, value })?);
        }
        Ok(Array1::from(out))
    }
}

fn read_table(path: &Path) -> Result<RawTable, EstimationError> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| EstimationError::Io(format!("failed to open csv '{}': {e}", path.display())))?;

    let headers = rdr
        .headers()
        .map_err(|e| EstimationError::Io(format!("failed to read csv headers: {e}")))?
        .iter()
        .map(|s| s.trim().to_string())
        .collect::<Vec<_>>();

    let mut records = Vec::<StringRecord>::new();
    for rec in rdr.records() {
        let record =
            rec.map_err(|e| EstimationError::Io(format!("failed reading csv row: {e}")))?;
        if record.len() != headers.len() {
            return Err(EstimationError::Io(format!(
                "csv row width mismatch: got {} fields, expected {}",
                record.len(),
                headers.len()
            )));
        }
        records.push(record);
    }

    if records.is_empty() {
        return Err(EstimationError::Io(format!(
            "csv '{}' has no rows",
            path.display()
        )));
    }
    Ok(RawTable { headers, records })
}

/// Which missingness models a partial file has to support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelColumns {
    /// `W1`, `A`, `R_A`.
    Exposure,
    /// `W1`, `W2`, `Y`, `R_Y`.
    Outcome,
    /// The whole schema.
    Both,
}

impl ModelColumns {
    pub fn required(self) -> &'static [&'static str] {
        match self {
            Self::Exposure => &["W1", "A", "R_A"],
            Self::Outcome => &["W1", "W2", "Y", "R_Y"],
            Self::Both => &COLUMNS,
        }
    }
}

impl RawTable {
    fn has_column(&self, column: &str) -> bool {
        self.headers.iter().any(|h| h == column)
    }

    /// A response and its indicator, or an all-missing pair when the file does
    /// not carry both columns.
    fn response_pair(
        &self,
        column: &'static str,
        indicator: &'static str,
    ) -> Result<(Array1<BinaryObservation>, Array1<f64>), EstimationError> {
        if self.has_column(column) && self.has_column(indicator) {
            return Ok((
                self.observation_column(column)?,
                self.numeric_column(indicator)?,
            ));
        }
        log::info!("columns '{column}'/'{indicator}' absent; treating '{column}' as never observed");
        let n = self.records.len();
        Ok((
            Array1::from_elem(n, BinaryObservation::Missing),
            Array1::zeros(n),
        ))
    }
}

/// Load a partially observed dataset with the full schema; `A` and `Y` may
/// hold `0`, `1` or `-1`.
pub fn read_partial_csv(path: &Path) -> Result<PartialDataset, EstimationError> {
    read_partial_csv_for(path, ModelColumns::Both)
}

/// Load a partially observed dataset, requiring only the columns `models`
/// reads. An absent `W2` is filled with zeros; an absent response pair is
/// loaded as never observed.
pub fn read_partial_csv_for(
    path: &Path,
    models: ModelColumns,
) -> Result<PartialDataset, EstimationError> {
    let table = read_table(path)?;
    for column in models.required() {
        table.column_index(column)?;
    }
    let w2 = if table.has_column("W2") {
        table.numeric_column("W2")?
    } else {
        Array1::zeros(table.records.len())
    };
    let (a, r_a) = table.response_pair("A", "R_A")?;
    let (y, r_y) = table.response_pair("Y", "R_Y")?;
    let data = PartialDataset::new(table.numeric_column("W1")?, w2, a, y, r_a, r_y)?;
    log::info!("loaded {} rows from '{}'", data.len(), path.display());
    Ok(data)
}

/// Load a fully observed dataset; every binary column must be `0` or `1`.
pub fn read_full_csv(path: &Path) -> Result<FullDataset, EstimationError> {
    let table = read_table(path)?;
    let data = FullDataset::new(
        table.numeric_column("W1")?,
        table.numeric_column("W2")?,
        table.numeric_column("A")?,
        table.numeric_column("Y")?,
        table.numeric_column("R_A")?,
        table.numeric_column("R_Y")?,
    )?;
    log::info!("loaded {} rows from '{}'", data.len(), path.display());
    Ok(data)
}

fn write_rows<I>(path: &Path, rows: I) -> Result<(), EstimationError>
where
    I: Iterator<Item = [String; 6]>,
{
    let mut wtr = WriterBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| {
            EstimationError::Io(format!(
                "failed to create output csv '{}': {e}",
                path.display()
            ))
        })?;
    wtr.write_record(COLUMNS)
        .map_err(|e| EstimationError::Io(format!("failed writing csv header: {e}")))?;
    for (i, row) in rows.enumerate() {
        wtr.write_record(&row)
            .map_err(|e| EstimationError::Io(format!("failed writing csv row {i}: {e}")))?;
    }
    wtr.flush()
        .map_err(|e| EstimationError::Io(format!("failed to flush csv writer: {e}")))?;
    Ok(())
}

fn indicator_code(v: f64) -> String {
    if v == 1.0 { "1" } else { "0" }.to_string()
}

pub fn write_full_csv(path: &Path, data: &FullDataset) -> Result<(), EstimationError> {
    let rows = (0..data.len()).map(|i| {
        [
            format!("{:.12}", data.w1()[i]),
            format!("{:.12}", data.w2()[i]),
            indicator_code(data.exposure()[i]),
            indicator_code(data.outcome()[i]),
            indicator_code(data.exposure_indicator()[i]),
            indicator_code(data.outcome_indicator()[i]),
        ]
    });
    write_rows(path, rows)
}

pub fn write_partial_csv(path: &Path, data: &PartialDataset) -> Result<(), EstimationError> {
    let rows = (0..data.len()).map(|i| {
        [
            format!("{:.12}", data.w1()[i]),
            format!("{:.12}", data.w2()[i]),
            data.exposure()[i].code().to_string(),
            data.outcome()[i].code().to_string(),
            indicator_code(data.exposure_indicator()[i]),
            indicator_code(data.outcome_indicator()[i]),
        ]
    });
    write_rows(path, rows)
}

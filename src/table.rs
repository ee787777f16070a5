use std::fmt;
use std::io::{Read, Write};
use std::path::Path;

use chrono::NaiveDate;

use crate::error::{PipelineError, Result};

const NULL_MARKERS: [&str; 5] = ["", "na", "nan", "null", "none"];

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(value) => Some(*value as f64),
            Value::Float(value) if value.is_finite() => Some(*value),
            Value::Bool(value) => Some(if *value { 1.0 } else { 0.0 }),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value}"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Date(value) => write!(f, "{value}"),
            Value::Text(value) => f.write_str(value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Float,
    Boolean,
    Date,
    Text,
}

impl ColumnType {
    pub fn name(self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::Text => "text",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            ColumnType::Integer | ColumnType::Float | ColumnType::Boolean
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub dtype: ColumnType,
    pub values: Vec<Value>,
}

impl Column {
    pub fn null_count(&self) -> usize {
        self.values.iter().filter(|value| value.is_null()).count()
    }
}

/// Column-oriented table with one declared type per column.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    name: String,
    columns: Vec<Column>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Result<Self> {
        let name = name.into();
        if let Some(first) = columns.first() {
            let rows = first.values.len();
            if let Some(bad) = columns.iter().find(|column| column.values.len() != rows) {
                return Err(PipelineError::DataFormat(format!(
                    "{name}: column {} has {} rows, expected {rows}",
                    bad.name,
                    bad.values.len()
                )));
            }
        }
        Ok(Self { name, columns })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.columns.first().map_or(0, |column| column.values.len())
    }

    /// `(rows, columns)`
    pub fn shape(&self) -> (usize, usize) {
        (self.row_count(), self.columns.len())
    }

    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("dataset")
            .to_string();
        let file = std::fs::File::open(path)?;
        Self::from_csv_reader(name, file)
    }

    /// Reads a CSV with headers, inferring one type per column.
    pub fn from_csv_reader<R: Read>(name: impl Into<String>, reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

        let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
        for (index, record) in reader.records().enumerate() {
            let record = record?;
            if record.len() != headers.len() {
                return Err(PipelineError::DataFormat(format!(
                    "row {} has {} fields, expected {}",
                    index + 1,
                    record.len(),
                    headers.len()
                )));
            }
            for (column, field) in cells.iter_mut().zip(record.iter()) {
                column.push(field.to_string());
            }
        }

        let columns = headers
            .into_iter()
            .zip(cells)
            .map(|(name, raw)| infer_column(name, &raw))
            .collect();
        Self::new(name, columns)
    }

    /// Writes the header and at most `limit` rows as CSV.
    pub fn write_csv<W: Write>(&self, writer: W, limit: usize) -> Result<()> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(self.columns.iter().map(|column| column.name.as_str()))?;
        for row in 0..self.row_count().min(limit) {
            writer.write_record(
                self.columns
                    .iter()
                    .map(|column| column.values[row].to_string()),
            )?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn is_null_marker(raw: &str) -> bool {
    let trimmed = raw.trim().to_ascii_lowercase();
    NULL_MARKERS.contains(&trimmed.as_str())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

/// Narrowest type every non-null cell parses as; all-null columns are float.
fn infer_column(name: String, raw: &[String]) -> Column {
    let present: Vec<&str> = raw
        .iter()
        .map(String::as_str)
        .filter(|cell| !is_null_marker(cell))
        .collect();

    let dtype = if present.is_empty() {
        ColumnType::Float
    } else if present.iter().all(|cell| cell.trim().parse::<i64>().is_ok()) {
        ColumnType::Integer
    } else if present.iter().all(|cell| cell.trim().parse::<f64>().is_ok()) {
        ColumnType::Float
    } else if present.iter().all(|cell| parse_bool(cell).is_some()) {
        ColumnType::Boolean
    } else if present.iter().all(|cell| parse_date(cell).is_some()) {
        ColumnType::Date
    } else {
        ColumnType::Text
    };

    let values = raw
        .iter()
        .map(|cell| {
            if is_null_marker(cell) {
                return Value::Null;
            }
            let trimmed = cell.trim();
            let parsed = match dtype {
                ColumnType::Integer => trimmed.parse().ok().map(Value::Int),
                ColumnType::Float => trimmed.parse().ok().map(Value::Float),
                ColumnType::Boolean => parse_bool(trimmed).map(Value::Bool),
                ColumnType::Date => parse_date(trimmed).map(Value::Date),
                ColumnType::Text => Some(Value::Text(cell.clone())),
            };
            parsed.unwrap_or(Value::Null)
        })
        .collect();

    Column {
        name,
        dtype,
        values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
country,year,deaths,vaccinated,reported
Lithuania,2021,3000.5,true,2021-01-31
Latvia,2021,,false,2021-02-28
Estonia,NA,1200,true,
";

    #[test]
    fn infers_column_types() {
        let table = Table::from_csv_reader("sample", CSV.as_bytes()).unwrap();
        let types: Vec<ColumnType> = table.columns().iter().map(|c| c.dtype).collect();
        assert_eq!(
            types,
            vec![
                ColumnType::Text,
                ColumnType::Integer,
                ColumnType::Float,
                ColumnType::Boolean,
                ColumnType::Date,
            ]
        );
        assert_eq!(table.shape(), (3, 5));
    }

    #[test]
    fn null_markers_become_nulls() {
        let table = Table::from_csv_reader("sample", CSV.as_bytes()).unwrap();
        let nulls: Vec<usize> = table.columns().iter().map(Column::null_count).collect();
        assert_eq!(nulls, vec![0, 1, 1, 0, 1]);
        assert_eq!(table.columns()[2].values[2], Value::Float(1200.0));
    }

    #[test]
    fn ragged_columns_are_rejected() {
        let columns = vec![
            Column {
                name: "a".to_string(),
                dtype: ColumnType::Integer,
                values: vec![Value::Int(1), Value::Int(2)],
            },
            Column {
                name: "b".to_string(),
                dtype: ColumnType::Integer,
                values: vec![Value::Int(1)],
            },
        ];
        assert!(matches!(Table::new("bad", columns), Err(PipelineError::DataFormat(_))));
    }

    #[test]
    fn writes_limited_csv() {
        let table = Table::from_csv_reader("sample", CSV.as_bytes()).unwrap();
        let mut out = Vec::new();
        table.write_csv(&mut out, 1).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "country,year,deaths,vaccinated,reported\nLithuania,2021,3000.5,true,2021-01-31\n"
        );
    }
}

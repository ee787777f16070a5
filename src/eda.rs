use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::table::{Column, ColumnType, Table, Value};

pub const PREVIEW_ROWS: usize = 50;

/// `describe`-style statistics for one column.
///
/// Numeric columns fill the moment and quantile fields; other columns fill
/// `unique`/`top`/`freq`. Fields that do not apply are omitted.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ColumnStats {
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freq: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(rename = "25%", skip_serializing_if = "Option::is_none")]
    pub q25: Option<f64>,
    #[serde(rename = "50%", skip_serializing_if = "Option::is_none")]
    pub q50: Option<f64>,
    #[serde(rename = "75%", skip_serializing_if = "Option::is_none")]
    pub q75: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdaSummary {
    pub shape: (usize, usize),
    pub columns: BTreeMap<String, String>,
    pub missing_values: BTreeMap<String, usize>,
    pub summary_stats: BTreeMap<String, ColumnStats>,
    pub correlations: BTreeMap<String, BTreeMap<String, Option<f64>>>,
    pub preview_file: Option<String>,
}

/// Linear interpolation between closest ranks, on sorted input.
fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let weight = position - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

fn numeric_stats(values: &[f64]) -> ColumnStats {
    let count = values.len();
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mean = (count > 0).then(|| values.iter().sum::<f64>() / count as f64);
    let std = match (mean, count) {
        (Some(mean), n) if n > 1 => {
            let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
            Some((ss / (n - 1) as f64).sqrt())
        }
        _ => None,
    };

    ColumnStats {
        count,
        mean,
        std,
        min: sorted.first().copied(),
        q25: quantile(&sorted, 0.25),
        q50: quantile(&sorted, 0.5),
        q75: quantile(&sorted, 0.75),
        max: sorted.last().copied(),
        ..ColumnStats::default()
    }
}

fn categorical_stats(values: &[&Value]) -> ColumnStats {
    // (first position, count) per rendered value
    let mut counts: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    for (position, value) in values.iter().enumerate() {
        counts
            .entry(value.to_string())
            .or_insert((position, 0))
            .1 += 1;
    }
    let top = counts
        .iter()
        .max_by(|a, b| a.1 .1.cmp(&b.1 .1).then(b.1 .0.cmp(&a.1 .0)))
        .map(|(value, (_, freq))| (value.clone(), *freq));

    ColumnStats {
        count: values.len(),
        unique: Some(counts.len()),
        top: top.as_ref().map(|(value, _)| value.clone()),
        freq: top.map(|(_, freq)| freq),
        ..ColumnStats::default()
    }
}

fn column_stats(column: &Column) -> ColumnStats {
    if column.dtype.is_numeric() && column.dtype != ColumnType::Boolean {
        let values: Vec<f64> = column.values.iter().filter_map(Value::as_f64).collect();
        numeric_stats(&values)
    } else {
        let values: Vec<&Value> = column.values.iter().filter(|v| !v.is_null()).collect();
        categorical_stats(&values)
    }
}

/// Pearson correlation over rows where both cells are present.
fn pearson(a: &[Value], b: &[Value]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b)
        .filter_map(|(x, y)| Some((x.as_f64()?, y.as_f64()?)))
        .collect();
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in &pairs {
        sxy += (x - mean_x) * (y - mean_y);
        sxx += (x - mean_x).powi(2);
        syy += (y - mean_y).powi(2);
    }
    if sxx == 0.0 || syy == 0.0 {
        return None;
    }
    Some((sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0))
}

fn correlations(table: &Table) -> BTreeMap<String, BTreeMap<String, Option<f64>>> {
    let numeric: Vec<&Column> = table
        .columns()
        .iter()
        .filter(|column| column.dtype.is_numeric())
        .collect();

    let mut matrix = BTreeMap::new();
    for left in &numeric {
        let row: BTreeMap<String, Option<f64>> = numeric
            .iter()
            .map(|right| (right.name.clone(), pearson(&left.values, &right.values)))
            .collect();
        matrix.insert(left.name.clone(), row);
    }
    matrix
}

/// Shape, types, missingness, summary statistics and numeric correlations.
pub fn describe(table: &Table) -> EdaSummary {
    let columns = table
        .columns()
        .iter()
        .map(|column| (column.name.clone(), column.dtype.name().to_string()))
        .collect();
    let missing_values = table
        .columns()
        .iter()
        .map(|column| (column.name.clone(), column.null_count()))
        .collect();
    let summary_stats = table
        .columns()
        .iter()
        .map(|column| (column.name.clone(), column_stats(column)))
        .collect();

    EdaSummary {
        shape: table.shape(),
        columns,
        missing_values,
        summary_stats,
        correlations: correlations(table),
        preview_file: None,
    }
}

pub fn safe_name(name: &str) -> String {
    name.replace(['.', ' ', '/', '\\'], "_")
}

/// Writes the first rows of `table` to `dir/eda_<name>_preview.csv`.
pub fn write_preview(table: &Table, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("eda_{}_preview.csv", safe_name(table.name())));
    let file = std::fs::File::create(&path)?;
    table.write_csv(file, PREVIEW_ROWS)?;
    Ok(path)
}

/// `describe` plus a preview file; a failed preview is logged, not returned.
pub fn describe_with_preview(table: &Table, dir: &Path) -> EdaSummary {
    let mut summary = describe(table);
    match write_preview(table, dir) {
        Ok(path) => summary.preview_file = Some(path.display().to_string()),
        Err(err) => warn!(table = table.name(), error = %err, "could not write preview"),
    }
    summary
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn cell(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.2}")).unwrap_or_default()
}

/// Standalone HTML profile of a table.
pub fn detailed_report(table: &Table, summary: &EdaSummary) -> Vec<u8> {
    let mut html = String::new();
    let title = escape(table.name());
    let _ = writeln!(html, "<!DOCTYPE html>");
    let _ = writeln!(html, "<html><head><meta charset=\"utf-8\"><title>EDA Report for {title}</title>");
    let _ = writeln!(
        html,
        "<style>body{{font-family:sans-serif;margin:2em}}table{{border-collapse:collapse;margin-bottom:2em}}td,th{{border:1px solid #ccc;padding:4px 8px;text-align:right}}</style>"
    );
    let _ = writeln!(html, "</head><body>");
    let _ = writeln!(html, "<h1>EDA Report for {title}</h1>");
    let _ = writeln!(
        html,
        "<p>{} rows &times; {} columns</p>",
        summary.shape.0, summary.shape.1
    );

    let _ = writeln!(html, "<h2>Columns</h2>");
    let _ = writeln!(
        html,
        "<table><tr><th>Column</th><th>Type</th><th>Missing</th><th>Missing %</th><th>Count</th><th>Unique</th><th>Top</th><th>Mean</th><th>Std</th><th>Min</th><th>25%</th><th>50%</th><th>75%</th><th>Max</th></tr>"
    );
    for column in table.columns() {
        let stats = summary.summary_stats.get(&column.name).cloned().unwrap_or_default();
        let missing = summary.missing_values.get(&column.name).copied().unwrap_or(0);
        let missing_pct = if summary.shape.0 == 0 {
            0.0
        } else {
            missing as f64 / summary.shape.0 as f64 * 100.0
        };
        let _ = writeln!(
            html,
            "<tr><th>{}</th><td>{}</td><td>{missing}</td><td>{missing_pct:.1}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape(&column.name),
            column.dtype.name(),
            stats.count,
            stats.unique.map(|u| u.to_string()).unwrap_or_default(),
            escape(stats.top.as_deref().unwrap_or("")),
            cell(stats.mean),
            cell(stats.std),
            cell(stats.min),
            cell(stats.q25),
            cell(stats.q50),
            cell(stats.q75),
            cell(stats.max),
        );
    }
    let _ = writeln!(html, "</table>");

    let _ = writeln!(html, "<h2>Correlations</h2>");
    if summary.correlations.is_empty() {
        let _ = writeln!(html, "<p>No numeric columns.</p>");
    } else {
        let _ = write!(html, "<table><tr><th></th>");
        for name in summary.correlations.keys() {
            let _ = write!(html, "<th>{}</th>", escape(name));
        }
        let _ = writeln!(html, "</tr>");
        for (name, row) in &summary.correlations {
            let _ = write!(html, "<tr><th>{}</th>", escape(name));
            for value in row.values() {
                let _ = write!(html, "<td>{}</td>", cell(*value));
            }
            let _ = writeln!(html, "</tr>");
        }
        let _ = writeln!(html, "</table>");
    }

    let _ = writeln!(html, "<h2>Sample</h2><table><tr>");
    for column in table.columns() {
        let _ = write!(html, "<th>{}</th>", escape(&column.name));
    }
    let _ = writeln!(html, "</tr>");
    for row in 0..table.row_count().min(10) {
        let _ = write!(html, "<tr>");
        for column in table.columns() {
            let _ = write!(html, "<td>{}</td>", escape(&column.values[row].to_string()));
        }
        let _ = writeln!(html, "</tr>");
    }
    let _ = writeln!(html, "</table></body></html>");
    html.into_bytes()
}

/// Saves a rendered HTML profile as `dir/eda_<name>_report.html`.
///
/// Best effort: failures are logged and yield `None`.
pub fn write_report(dir: &Path, name: &str, html: &[u8]) -> Option<PathBuf> {
    let path = dir.join(format!("eda_{}_report.html", safe_name(name)));
    let result = std::fs::create_dir_all(dir).and_then(|_| std::fs::write(&path, html));
    match result {
        Ok(()) => {
            info!(path = %path.display(), "detailed EDA report saved");
            Some(path)
        }
        Err(err) => {
            warn!(table = name, error = %err, "skipping detailed EDA report");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
country,year,deaths,cases,flag
Lithuania,2020,10,100,true
Latvia,2021,20,200,false
Estonia,2022,,300,true
Lithuania,2023,40,400,
";

    fn sample() -> Table {
        Table::from_csv_reader("sample", CSV.as_bytes()).unwrap()
    }

    #[test]
    fn shape_and_missing_counts_match_input() {
        let summary = describe(&sample());
        assert_eq!(summary.shape, (4, 5));
        assert_eq!(summary.missing_values["deaths"], 1);
        assert_eq!(summary.missing_values["flag"], 1);
        assert_eq!(summary.missing_values["country"], 0);
        assert_eq!(summary.columns["country"], "text");
        assert_eq!(summary.columns["deaths"], "integer");
        assert_eq!(summary.columns["flag"], "boolean");
    }

    #[test]
    fn numeric_summary_matches_describe() {
        let summary = describe(&sample());
        let cases = &summary.summary_stats["cases"];
        assert_eq!(cases.count, 4);
        assert_eq!(cases.mean, Some(250.0));
        assert!((cases.std.unwrap() - 129.09944487358058).abs() < 1e-9);
        assert_eq!(cases.min, Some(100.0));
        assert_eq!(cases.q25, Some(175.0));
        assert_eq!(cases.q50, Some(250.0));
        assert_eq!(cases.q75, Some(325.0));
        assert_eq!(cases.max, Some(400.0));
        assert_eq!(cases.top, None);

        assert_eq!(summary.summary_stats["deaths"].count, 3);
    }

    #[test]
    fn text_summary_counts_frequencies() {
        let summary = describe(&sample());
        let country = &summary.summary_stats["country"];
        assert_eq!(country.count, 4);
        assert_eq!(country.unique, Some(3));
        assert_eq!(country.top.as_deref(), Some("Lithuania"));
        assert_eq!(country.freq, Some(2));
        assert_eq!(country.mean, None);
    }

    #[test]
    fn correlations_cover_numeric_columns_only() {
        let summary = describe(&sample());
        assert!(!summary.correlations.contains_key("country"));
        let year_cases = summary.correlations["year"]["cases"].unwrap();
        assert!((year_cases - 1.0).abs() < 1e-12);
        let deaths_cases = summary.correlations["deaths"]["cases"].unwrap();
        assert!((deaths_cases - 1.0).abs() < 1e-12);
        assert!(summary.correlations.contains_key("flag"));
    }

    #[test]
    fn summary_serializes_to_plain_json() {
        let summary = describe(&sample());
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["shape"], serde_json::json!([4, 5]));
        assert_eq!(json["summary_stats"]["cases"]["25%"], serde_json::json!(175.0));
        assert!(json["summary_stats"]["country"].get("mean").is_none());
    }

    #[test]
    fn preview_is_written_next_to_summary() {
        let dir = tempfile::tempdir().unwrap();
        let summary = describe_with_preview(&sample(), dir.path());
        let path = PathBuf::from(summary.preview_file.unwrap());
        assert!(path.ends_with("eda_sample_preview.csv"));
        let text = std::fs::read_to_string(path).unwrap();
        assert_eq!(text.lines().count(), 5);
    }

    #[test]
    fn detailed_report_is_html() {
        let table = sample();
        let summary = describe(&table);
        let html = String::from_utf8(detailed_report(&table, &summary)).unwrap();
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("EDA Report for sample"));
        assert!(html.contains("<th>cases</th>"));

        let dir = tempfile::tempdir().unwrap();
        let path = write_report(dir.path(), table.name(), html.as_bytes()).unwrap();
        assert!(path.ends_with("eda_sample_report.html"));
    }

    #[test]
    fn safe_names_strip_separators() {
        assert_eq!(safe_name("covid.ecdc global"), "covid_ecdc_global");
    }
}

//! CSV export of stored results.
//!
//! One row per (company, indicator), unextracted indicators included with
//! an empty value. Fields are quoted per RFC 4180 when needed.

use std::io::Write;
use std::path::Path;

use tracing::info;

use crate::error::ExportError;
use crate::traits::store::ResultStore;
use crate::types::observation::AggregatedResult;

/// Header row of the export.
pub const CSV_HEADER: [&str; 9] = [
    "company",
    "report_year",
    "indicator_id",
    "indicator_name",
    "value",
    "unit",
    "confidence_score",
    "source_page",
    "notes",
];

/// Render results as CSV text (header included).
pub fn to_csv(results: &[AggregatedResult]) -> String {
    let mut out = String::new();
    push_record(&mut out, CSV_HEADER.iter().map(|s| s.to_string()));

    for r in results {
        push_record(
            &mut out,
            [
                r.company.clone(),
                r.report_year.to_string(),
                r.indicator_id.clone(),
                r.indicator_name.clone(),
                r.value.map(format_number).unwrap_or_default(),
                r.unit.clone(),
                format_number(r.confidence),
                r.source_page.map(|p| p.to_string()).unwrap_or_default(),
                r.notes.clone().unwrap_or_default(),
            ],
        );
    }

    out
}

/// Write the store's results (optionally filtered) to `path`.
///
/// Parent directories are created. Returns the number of data rows.
pub async fn export_csv(
    store: &dyn ResultStore,
    path: &Path,
    company: Option<&str>,
    report_year: Option<i32>,
) -> Result<usize, ExportError> {
    let results = store.results(company, report_year).await?;
    let csv = to_csv(&results);

    let io_err = |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut file = std::fs::File::create(path).map_err(io_err)?;
    file.write_all(csv.as_bytes()).map_err(io_err)?;

    info!(rows = results.len(), path = %path.display(), "Exported results");
    Ok(results.len())
}

fn push_record(out: &mut String, fields: impl IntoIterator<Item = String>) {
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&escape_field(&field));
    }
    out.push_str("\r\n");
}

fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Integers without a trailing `.0`, everything else as-is.
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

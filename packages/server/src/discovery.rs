//! Finding company documents to process.
//!
//! Reports are named `<company>_<year>.<ext>` in the raw-data directory.
//! A name without a year suffix uses the default report year.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use csrd_extraction::CompanyJob;

const DOCUMENT_EXTENSIONS: [&str; 4] = ["pdf", "md", "markdown", "txt"];

/// Every supported document in `dir`, sorted by company name.
pub fn discover_jobs(dir: &Path, default_year: i32) -> Result<Vec<CompanyJob>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read data directory {}", dir.display()))?;

    let mut jobs = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() || !is_document(&path) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let (company, year) = split_stem(stem, default_year);
        jobs.push(CompanyJob::new(company, year, path.clone()));
    }

    jobs.sort_by(|a, b| a.company.cmp(&b.company).then(a.report_year.cmp(&b.report_year)));
    Ok(jobs)
}

/// Parse a `NAME=PATH` argument.
pub fn parse_company_arg(arg: &str, year: i32) -> Result<CompanyJob> {
    let Some((name, path)) = arg.split_once('=') else {
        bail!("expected NAME=PATH, got {:?}", arg);
    };
    let (name, path) = (name.trim(), path.trim());
    if name.is_empty() || path.is_empty() {
        bail!("expected NAME=PATH, got {:?}", arg);
    }
    Ok(CompanyJob::new(name, year, PathBuf::from(path)))
}

fn is_document(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| DOCUMENT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn split_stem(stem: &str, default_year: i32) -> (String, i32) {
    if let Some((company, suffix)) = stem.rsplit_once('_') {
        if suffix.len() == 4 && !company.is_empty() {
            if let Ok(year) = suffix.parse::<i32>() {
                return (company.to_string(), year);
            }
        }
    }
    (stem.to_string(), default_year)
}

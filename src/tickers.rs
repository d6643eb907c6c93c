//! Ticker list files
//!
//! One ticker per line; only the first CSV column is read. Blank lines and
//! lines starting with `#` are ignored. Tickers are upper-cased, given the
//! exchange suffix when they lack one, and de-duplicated keeping the first
//! occurrence.

use anyhow::{bail, Context, Result};
use itertools::Itertools;
use std::fs;
use std::io::Read;
use std::path::Path;

use crate::dataset::write_atomic;
use crate::Symbol;

/// Parse ticker list contents
pub fn parse_tickers(reader: impl Read, suffix: &str) -> Result<Vec<Symbol>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut raw = Vec::new();
    for record in csv_reader.records() {
        let record = record.context("Failed to read ticker list")?;
        let Some(first) = record.get(0) else {
            continue;
        };
        if first.is_empty() || first.starts_with('#') {
            continue;
        }
        raw.push(Symbol::normalize(first, suffix));
    }

    Ok(raw.into_iter().unique().collect())
}

/// Load a ticker list file. A missing file or a list with no tickers is an error.
pub fn load_tickers(path: &Path, suffix: &str) -> Result<Vec<Symbol>> {
    let file = fs::File::open(path)
        .with_context(|| format!("Symbols file '{}' was not found", path.display()))?;
    let symbols = parse_tickers(file, suffix)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    if symbols.is_empty() {
        bail!("No symbols found in '{}'", path.display());
    }
    Ok(symbols)
}

/// Write one ticker per line
pub fn write_tickers(path: &Path, symbols: &[Symbol]) -> Result<()> {
    let mut contents = symbols.iter().map(Symbol::as_str).join("\n");
    contents.push('\n');
    write_atomic(path, contents.as_bytes())
        .with_context(|| format!("Failed to write {}", path.display()))
}

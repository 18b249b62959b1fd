use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use thiserror::Error;
use tracing::warn;

use super::{normalize_name, Catalog, IngredientRecord, Nutrient, NAME_COL};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("ingredient file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not decode {path} with any supported encoding ({reason})")]
    Decode { path: PathBuf, reason: String },
    #[error("missing mandatory column '{0}'")]
    MissingIdentityColumn(&'static str),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Loads the ingredient table, returning the catalog plus the nutrient
/// columns actually present in the file.
///
/// Numeric cells may use a comma decimal separator; unparseable cells
/// coerce to 0.0 rather than failing the row. Rows with an empty name
/// are dropped.
pub fn load_catalog(path: &Path) -> Result<(Catalog, Vec<Nutrient>), CatalogError> {
    if !path.exists() {
        return Err(CatalogError::NotFound(path.to_path_buf()));
    }
    let bytes = std::fs::read(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let text = decode_with_fallback(&bytes).map_err(|reason| CatalogError::Decode {
        path: path.to_path_buf(),
        reason,
    })?;

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_reader(Cursor::new(text));
    let headers = reader.headers()?.clone();

    let name_idx = headers
        .iter()
        .position(|h| h == NAME_COL)
        .ok_or(CatalogError::MissingIdentityColumn(NAME_COL))?;

    // Columns declared but absent degrade to a warning; the catalog must
    // stay usable on partial data.
    let mut columns: Vec<(Nutrient, usize)> = Vec::new();
    for nutrient in Nutrient::ALL {
        match headers.iter().position(|h| h == nutrient.column_header()) {
            Some(idx) => columns.push((nutrient, idx)),
            None => warn!(
                column = nutrient.column_header(),
                "nutrient column missing from catalog, dropping it"
            ),
        }
    }

    let mut records = Vec::new();
    for result in reader.records() {
        let row = result?;
        let name = row.get(name_idx).unwrap_or("").trim();
        if name.is_empty() {
            continue;
        }
        let mut nutrients = HashMap::with_capacity(columns.len());
        for &(nutrient, idx) in &columns {
            nutrients.insert(nutrient, row.get(idx).map_or(0.0, parse_decimal));
        }
        records.push(IngredientRecord {
            name: name.to_string(),
            normalized_key: normalize_name(name),
            nutrients,
        });
    }

    let available = columns.iter().map(|&(n, _)| n).collect();
    Ok((Catalog::from_records(records), available))
}

/// Parses a numeric cell, accepting a comma as the decimal separator.
/// Anything unparseable reads as 0.0.
pub(crate) fn parse_decimal(raw: &str) -> f32 {
    raw.trim().replace(',', ".").parse().unwrap_or(0.0)
}

/// Tries UTF-8 first, then two Latin-derived fallbacks, and reports the
/// failures if no encoding in the chain accepts the bytes.
pub(crate) fn decode_with_fallback(bytes: &[u8]) -> Result<String, String> {
    let utf8_error = match std::str::from_utf8(bytes) {
        Ok(text) => return Ok(text.to_string()),
        Err(err) => format!("utf-8: {err}"),
    };
    if let Some(text) = decode_windows_1252(bytes) {
        return Ok(text);
    }
    if let Some(text) = decode_latin_1(bytes) {
        return Ok(text);
    }
    Err(format!("{utf8_error}; windows-1252: undefined byte"))
}

fn decode_latin_1(bytes: &[u8]) -> Option<String> {
    Some(bytes.iter().map(|&b| b as char).collect())
}

fn decode_windows_1252(bytes: &[u8]) -> Option<String> {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        let ch = match b {
            // 0x80..=0x9F diverges from Latin-1.
            0x80 => '\u{20AC}',
            0x82 => '\u{201A}',
            0x83 => '\u{0192}',
            0x84 => '\u{201E}',
            0x85 => '\u{2026}',
            0x86 => '\u{2020}',
            0x87 => '\u{2021}',
            0x88 => '\u{02C6}',
            0x89 => '\u{2030}',
            0x8A => '\u{0160}',
            0x8B => '\u{2039}',
            0x8C => '\u{0152}',
            0x8E => '\u{017D}',
            0x91 => '\u{2018}',
            0x92 => '\u{2019}',
            0x93 => '\u{201C}',
            0x94 => '\u{201D}',
            0x95 => '\u{2022}',
            0x96 => '\u{2013}',
            0x97 => '\u{2014}',
            0x98 => '\u{02DC}',
            0x99 => '\u{2122}',
            0x9A => '\u{0161}',
            0x9B => '\u{203A}',
            0x9C => '\u{0153}',
            0x9E => '\u{017E}',
            0x9F => '\u{0178}',
            0x81 | 0x8D | 0x8F | 0x90 | 0x9D => return None,
            _ => b as char,
        };
        out.push(ch);
    }
    Some(out)
}

//! Lenient local validation of PDB structure files.
//!
//! The remote service rejects files it cannot parse only after a full upload,
//! so a cheap syntactic pre-check runs first. The check is deliberately
//! permissive: it accepts any file containing at least one coordinate record
//! with parseable x/y/z values and only reports (rather than rejects)
//! malformed records alongside valid ones.

use std::fs;
use std::path::{Path, PathBuf};

/// Errors raised while reading a structure file. Parse problems are not
/// errors here; they land in the [`ValidationReport`].
#[derive(Debug, thiserror::Error)]
pub enum StructureError {
    /// The structure file does not exist.
    #[error("PDB file not found: {0}")]
    NotFound(PathBuf),
    /// The structure file could not be read.
    #[error("Failed to read PDB file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Outcome of the permissive pre-upload check.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    /// Whether the file is acceptable for upload.
    pub ok: bool,
    /// Human-readable diagnostic.
    pub message: String,
    /// Number of coordinate records that parsed cleanly.
    pub atom_records: usize,
}

/// Check that `path` looks like a PDB structure worth uploading.
pub fn verify_structure(path: &Path) -> Result<ValidationReport, StructureError> {
    if !path.exists() {
        return Err(StructureError::NotFound(path.to_path_buf()));
    }
    let raw = fs::read(path).map_err(|source| StructureError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let text = String::from_utf8_lossy(&raw);

    let mut atom_records = 0usize;
    let mut malformed = 0usize;
    for line in text.lines() {
        if !is_coordinate_record(line) {
            continue;
        }
        if parse_coordinates(line).is_some() {
            atom_records += 1;
        } else {
            malformed += 1;
        }
    }

    let report = if atom_records == 0 {
        ValidationReport {
            ok: false,
            message: format!(
                "No parseable ATOM/HETATM records found in {} ({malformed} malformed)",
                path.display()
            ),
            atom_records,
        }
    } else if malformed > 0 {
        ValidationReport {
            ok: true,
            message: format!(
                "PDB structure is validated ({atom_records} atoms, {malformed} malformed records ignored)."
            ),
            atom_records,
        }
    } else {
        ValidationReport {
            ok: true,
            message: "PDB structure is validated.".to_string(),
            atom_records,
        }
    };
    Ok(report)
}

fn is_coordinate_record(line: &str) -> bool {
    line.starts_with("ATOM") || line.starts_with("HETATM")
}

/// Extract x/y/z from a coordinate record.
///
/// Tries the fixed PDB column layout (columns 31-54) first, then falls back
/// to scanning whitespace-separated tokens for three consecutive reals, which
/// tolerates the loosely aligned files some tools emit.
fn parse_coordinates(line: &str) -> Option<(f64, f64, f64)> {
    if let Some(coords) = fixed_column_coordinates(line) {
        return Some(coords);
    }
    let tokens: Vec<&str> = line.split_whitespace().collect();
    for window in tokens.windows(3) {
        let parsed: Vec<f64> = window.iter().filter_map(|t| t.parse().ok()).collect();
        if parsed.len() == 3 {
            return Some((parsed[0], parsed[1], parsed[2]));
        }
    }
    None
}

fn fixed_column_coordinates(line: &str) -> Option<(f64, f64, f64)> {
    if !line.is_ascii() || line.len() < 54 {
        return None;
    }
    let field = |range: std::ops::Range<usize>| line[range].trim().parse::<f64>().ok();
    Some((field(30..38)?, field(38..46)?, field(46..54)?))
}

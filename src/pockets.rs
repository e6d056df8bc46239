//! `.poc` table decoding and pocket coordinate summaries.
//!
//! The result archive contains `<jobid>.poc`: a headerless, whitespace
//! delimited table with a fixed twelve-column schema. Only rows belonging to
//! pocket 1 (the service's top-ranked pocket) are carried downstream; that
//! selection is deliberate, not a filtering bug.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::client::JobId;

/// The pocket id every downstream artifact is filtered to.
pub const SELECTED_POCKET_ID: u32 = 1;

/// One decoded row of a `.poc` table.
#[derive(Debug, Clone, PartialEq)]
pub struct PocketRecord {
    /// Record tag, normally `ATOM`.
    pub atom_tag: String,
    /// Atom serial number.
    pub atom_no: u32,
    /// Residue name, e.g. `SER`.
    pub residue_name: String,
    /// Atom name, e.g. `CA`.
    pub atom_name: String,
    /// Residue sequence number.
    pub residue_number: i32,
    /// Orthogonal coordinates in Ångström.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Z coordinate.
    pub z: f64,
    /// Per-atom value column reported by the service.
    pub value: f64,
    /// Per-atom percentage column.
    pub percentage: f64,
    /// Pocket the atom belongs to; positive integer.
    pub pocket_id: u32,
    /// Trailing pocket tag, normally `POC`.
    pub pocket_tag: String,
}

/// A row failed to decode against the twelve-column schema.
#[derive(Debug, thiserror::Error)]
#[error("line {line}, field `{field}`: {reason}")]
pub struct DecodeError {
    /// 1-based line number in the `.poc` file.
    pub line: usize,
    /// Name of the offending column.
    pub field: &'static str,
    /// What went wrong.
    pub reason: String,
}

/// Errors from locating, decoding, or summarizing a `.poc` file.
#[derive(Debug, thiserror::Error)]
pub enum PocketError {
    /// The archive did not contain the expected results file. Fatal: the
    /// remote job produced unexpected output, re-reading will not help.
    #[error("Missing .poc file: {0}")]
    MissingPocFile(PathBuf),
    /// A row did not match the schema.
    #[error("Failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        source: DecodeError,
    },
    /// Filesystem failure.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failure writing the coordinate table.
    #[error("CSV error writing {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },
}

/// Projection written to `<jobid>_pockets.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinateRow {
    pub residue_name: String,
    pub atom_name: String,
    pub residue_number: i32,
    pub x_coord: f64,
    pub y_coord: f64,
    pub z_coord: f64,
}

/// Paths and aggregates produced by [`compute_pockets`].
#[derive(Debug, Clone)]
pub struct PocketOutputs {
    /// Filtered coordinate table.
    pub pockets_csv: PathBuf,
    /// Mean-coordinate summary.
    pub pockets_txt: PathBuf,
    /// Number of pocket-1 atoms retained.
    pub pocket_atoms: usize,
    /// Arithmetic mean of x/y/z over the retained atoms; NaN when none.
    pub mean: (f64, f64, f64),
}

/// Ordered cursor over one row's whitespace-separated fields, attributing
/// every failure to a named column and line.
struct FieldCursor<'a> {
    line: usize,
    fields: std::str::SplitWhitespace<'a>,
}

impl<'a> FieldCursor<'a> {
    fn new(line: usize, text: &'a str) -> Self {
        Self {
            line,
            fields: text.split_whitespace(),
        }
    }

    fn take(&mut self, field: &'static str) -> Result<&'a str, DecodeError> {
        self.fields.next().ok_or(DecodeError {
            line: self.line,
            field,
            reason: "missing field".to_string(),
        })
    }

    fn parse<T>(&mut self, field: &'static str) -> Result<T, DecodeError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let raw = self.take(field)?;
        raw.parse().map_err(|err| DecodeError {
            line: self.line,
            field,
            reason: format!("invalid value `{raw}`: {err}"),
        })
    }

    fn finish(mut self) -> Result<(), DecodeError> {
        match self.fields.next() {
            None => Ok(()),
            Some(extra) => Err(DecodeError {
                line: self.line,
                field: "pocket_tag",
                reason: format!("unexpected trailing field `{extra}`"),
            }),
        }
    }
}

fn decode_record(line: usize, text: &str) -> Result<PocketRecord, DecodeError> {
    let mut cursor = FieldCursor::new(line, text);
    let record = PocketRecord {
        atom_tag: cursor.take("atom_tag")?.to_string(),
        atom_no: cursor.parse("atom_no")?,
        residue_name: cursor.take("residue_name")?.to_string(),
        atom_name: cursor.take("atom_name")?.to_string(),
        residue_number: cursor.parse("residue_number")?,
        x: cursor.parse("x_coord")?,
        y: cursor.parse("y_coord")?,
        z: cursor.parse("z_coord")?,
        value: cursor.parse("value")?,
        percentage: cursor.parse("percentage")?,
        pocket_id: cursor.parse("pocket_id")?,
        pocket_tag: cursor.take("pocket_tag")?.to_string(),
    };
    cursor.finish()?;
    Ok(record)
}

/// Decode a whole `.poc` table. Blank lines are skipped; any other malformed
/// row is an error naming its line and column.
pub fn parse_poc(text: &str) -> Result<Vec<PocketRecord>, DecodeError> {
    let mut records = Vec::new();
    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        records.push(decode_record(index + 1, line)?);
    }
    Ok(records)
}

/// Retain the pocket-1 rows, projected to the coordinate columns.
pub fn pocket_one_rows(records: &[PocketRecord]) -> Vec<CoordinateRow> {
    records
        .iter()
        .filter(|record| record.pocket_id == SELECTED_POCKET_ID)
        .map(|record| CoordinateRow {
            residue_name: record.residue_name.clone(),
            atom_name: record.atom_name.clone(),
            residue_number: record.residue_number,
            x_coord: record.x,
            y_coord: record.y,
            z_coord: record.z,
        })
        .collect()
}

/// Arithmetic mean of the projected coordinates; NaN per axis when empty.
pub fn mean_xyz(rows: &[CoordinateRow]) -> (f64, f64, f64) {
    if rows.is_empty() {
        return (f64::NAN, f64::NAN, f64::NAN);
    }
    let count = rows.len() as f64;
    let (sx, sy, sz) = rows.iter().fold((0.0, 0.0, 0.0), |(x, y, z), row| {
        (x + row.x_coord, y + row.y_coord, z + row.z_coord)
    });
    (sx / count, sy / count, sz / count)
}

/// Read `<extract_path>/<jobid>.poc`, filter to pocket 1, and write the
/// coordinate CSV and mean summary next to it.
pub fn compute_pockets(
    extract_path: &Path,
    jobid: &JobId,
) -> Result<PocketOutputs, PocketError> {
    let poc_path = extract_path.join(format!("{jobid}.poc"));
    if !poc_path.exists() {
        return Err(PocketError::MissingPocFile(poc_path));
    }
    let text = fs::read_to_string(&poc_path).map_err(|source| PocketError::Io {
        path: poc_path.clone(),
        source,
    })?;
    let records = parse_poc(&text).map_err(|source| PocketError::Decode {
        path: poc_path.clone(),
        source,
    })?;
    let rows = pocket_one_rows(&records);
    let mean = mean_xyz(&rows);

    let pockets_csv = extract_path.join(format!("{jobid}_pockets.csv"));
    write_coordinate_csv(&pockets_csv, &rows)?;

    let pockets_txt = extract_path.join(format!("{jobid}_xyz.txt"));
    write_mean_summary(&pockets_txt, mean)?;

    tracing::info!(
        atoms = rows.len(),
        csv = %pockets_csv.display(),
        summary = %pockets_txt.display(),
        "pocket coordinates extracted"
    );
    Ok(PocketOutputs {
        pockets_csv,
        pockets_txt,
        pocket_atoms: rows.len(),
        mean,
    })
}

fn write_coordinate_csv(path: &Path, rows: &[CoordinateRow]) -> Result<(), PocketError> {
    let mut writer = csv::Writer::from_path(path).map_err(|source| PocketError::Csv {
        path: path.to_path_buf(),
        source,
    })?;
    if rows.is_empty() {
        // serialize() only emits the header once it sees a row.
        writer
            .write_record([
                "residue_name",
                "atom_name",
                "residue_number",
                "x_coord",
                "y_coord",
                "z_coord",
            ])
            .map_err(|source| PocketError::Csv {
                path: path.to_path_buf(),
                source,
            })?;
    }
    for row in rows {
        writer.serialize(row).map_err(|source| PocketError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
    }
    writer.flush().map_err(|source| PocketError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

fn write_mean_summary(path: &Path, mean: (f64, f64, f64)) -> Result<(), PocketError> {
    let mut file = fs::File::create(path).map_err(|source| PocketError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let (x, y, z) = mean;
    write!(file, "x_coord    {x:.6}\ny_coord    {y:.6}\nz_coord    {z:.6}\n").map_err(
        |source| PocketError::Io {
            path: path.to_path_buf(),
            source,
        },
    )?;
    Ok(())
}

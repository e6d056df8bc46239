//! Persisting and unpacking downloaded result archives.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use crate::client::JobId;

/// Errors while persisting or extracting a result archive.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// Filesystem failure at a specific path.
    #[error("I/O error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    /// The downloaded bytes are not a readable zip archive.
    #[error("Invalid zip archive: {0}")]
    Zip(String),
}

/// On-disk locations produced by [`materialize`].
#[derive(Debug, Clone)]
pub struct MaterializedArchive {
    /// The raw archive written as `<jobid>.zip`.
    pub zip_path: PathBuf,
    /// Directory the archive entries were extracted into.
    pub extract_path: PathBuf,
}

/// Write `bytes` as `<jobid>.zip` under `out_dir` and extract every entry
/// into `out_dir/<jobid>/`.
///
/// Directory creation is idempotent. An existing `<jobid>.zip` from a
/// previous run is silently overwritten; re-materializing a job id is treated
/// as a refresh of the same result.
pub fn materialize(
    bytes: &[u8],
    out_dir: &Path,
    jobid: &JobId,
) -> Result<MaterializedArchive, ArchiveError> {
    fs::create_dir_all(out_dir).map_err(|source| io_error(out_dir, source))?;
    let zip_path = out_dir.join(format!("{jobid}.zip"));
    fs::write(&zip_path, bytes).map_err(|source| io_error(&zip_path, source))?;

    let extract_path = out_dir.join(jobid.as_str());
    fs::create_dir_all(&extract_path).map_err(|source| io_error(&extract_path, source))?;
    unzip_to_dir(&zip_path, &extract_path)?;
    tracing::info!(
        zip = %zip_path.display(),
        extracted = %extract_path.display(),
        "result archive materialized"
    );
    Ok(MaterializedArchive {
        zip_path,
        extract_path,
    })
}

/// Extract all archive entries into `dest_dir`, skipping entries whose names
/// would escape it.
fn unzip_to_dir(zip_path: &Path, dest_dir: &Path) -> Result<(), ArchiveError> {
    let file = File::open(zip_path).map_err(|source| io_error(zip_path, source))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|err| ArchiveError::Zip(err.to_string()))?;
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|err| ArchiveError::Zip(err.to_string()))?;
        let outpath = match entry.enclosed_name() {
            Some(path) => dest_dir.join(path),
            None => continue,
        };
        if entry.name().ends_with('/') {
            fs::create_dir_all(&outpath).map_err(|source| io_error(&outpath, source))?;
            continue;
        }
        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent).map_err(|source| io_error(parent, source))?;
        }
        let mut outfile = File::create(&outpath).map_err(|source| io_error(&outpath, source))?;
        io::copy(&mut entry, &mut outfile).map_err(|source| io_error(&outpath, source))?;
    }
    Ok(())
}

fn io_error(path: &Path, source: io::Error) -> ArchiveError {
    ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut cursor = io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated);
            for (name, data) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn materialize_writes_zip_and_extracts_entries() {
        let dir = tempdir().unwrap();
        let jobid = JobId::new("j_1");
        let bytes = zip_bytes(&[("j_1.poc", b"row"), ("nested/readme.txt", b"info")]);
        let result = materialize(&bytes, dir.path(), &jobid).unwrap();
        assert_eq!(result.zip_path, dir.path().join("j_1.zip"));
        assert_eq!(result.extract_path, dir.path().join("j_1"));
        assert_eq!(
            fs::read(result.extract_path.join("j_1.poc")).unwrap(),
            b"row"
        );
        assert_eq!(
            fs::read(result.extract_path.join("nested/readme.txt")).unwrap(),
            b"info"
        );
    }

    #[test]
    fn materialize_creates_missing_output_tree() {
        let dir = tempdir().unwrap();
        let out_dir = dir.path().join("deep/output");
        let bytes = zip_bytes(&[("j_2.poc", b"row")]);
        let result = materialize(&bytes, &out_dir, &JobId::new("j_2")).unwrap();
        assert!(result.extract_path.join("j_2.poc").exists());
    }

    #[test]
    fn materialize_overwrites_previous_archive() {
        let dir = tempdir().unwrap();
        let jobid = JobId::new("j_3");
        let first = zip_bytes(&[("j_3.poc", b"old")]);
        let second = zip_bytes(&[("j_3.poc", b"new")]);
        materialize(&first, dir.path(), &jobid).unwrap();
        let result = materialize(&second, dir.path(), &jobid).unwrap();
        assert_eq!(fs::read(result.zip_path).unwrap(), second);
        assert_eq!(
            fs::read(result.extract_path.join("j_3.poc")).unwrap(),
            b"new"
        );
    }

    #[test]
    fn materialize_skips_entries_escaping_destination() {
        let dir = tempdir().unwrap();
        let bytes = zip_bytes(&[("../escape.txt", b"nope"), ("ok.txt", b"fine")]);
        let result = materialize(&bytes, dir.path(), &JobId::new("j_4")).unwrap();
        assert!(result.extract_path.join("ok.txt").exists());
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[test]
    fn materialize_rejects_non_zip_bytes() {
        let dir = tempdir().unwrap();
        let err = materialize(b"<html>pending</html>", dir.path(), &JobId::new("j_5"))
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Zip(_)));
    }
}

//! Mode sequencing for submit/download runs.
//!
//! A run is a single linear pass over the pipeline: validate, submit, poll,
//! materialize, extract. Artifacts written by completed steps are never
//! rolled back when a later step fails, so a re-run can resume from the
//! furthest completed step (typically with the download-only mode).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::archive;
use crate::client::{JobId, PocketService, SubmitError, SubmitRequest};
use crate::pockets;
use crate::poll::{self, PollError, PollSchedule};
use crate::structure::{self, StructureError};

/// How a run enters the pipeline.
#[derive(Debug, Clone)]
pub enum RunMode {
    /// Validate and submit, record the job id, stop before any download.
    SubmitOnly,
    /// Full pipeline: submit, then poll and unpack the result.
    SubmitAndDownload,
    /// Fetch a previously submitted job; no validation or submission.
    DownloadOnly {
        /// Job id recorded by an earlier submit run.
        jobid: JobId,
    },
}

/// Caller-tunable inputs for a run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Structure file; required for the submit modes.
    pub pdb: Option<PathBuf>,
    /// Output directory; defaults to the structure file's parent.
    pub out_dir: Option<PathBuf>,
    /// Probe radius forwarded to the service.
    pub radius: f64,
    /// Contact email forwarded to the service.
    pub email: String,
    /// Wait/retry timing for result retrieval.
    pub schedule: PollSchedule,
    /// Whether to reduce the `.poc` table to coordinate outputs.
    pub compute_pockets: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            pdb: None,
            out_dir: None,
            radius: 1.4,
            email: "N/A".to_string(),
            schedule: PollSchedule::default(),
            compute_pockets: false,
        }
    }
}

/// Every artifact a run produced; optional fields are `None` when the
/// corresponding step did not execute.
#[derive(Debug, Clone)]
pub struct ResultPaths {
    /// Job id for the computation, issued now or supplied by the caller.
    pub jobid: JobId,
    /// Submission log recording the job id, for submit modes.
    pub submit_log: Option<PathBuf>,
    /// Raw downloaded archive.
    pub zip_path: Option<PathBuf>,
    /// Extracted archive contents.
    pub extract_path: Option<PathBuf>,
    /// Filtered coordinate table.
    pub pockets_csv: Option<PathBuf>,
    /// Mean-coordinate summary.
    pub pockets_txt: Option<PathBuf>,
}

/// Any failure along the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// A submit mode was requested without a structure file.
    #[error("A PDB file is required to submit a job")]
    MissingPdb,
    /// The local pre-upload check rejected the structure file.
    #[error("PDB verification failed: {0}")]
    Validation(String),
    /// The structure file could not be read for validation.
    #[error(transparent)]
    Structure(#[from] StructureError),
    /// Submission failed.
    #[error(transparent)]
    Submit(#[from] SubmitError),
    /// The retrieval schedule failed or was exhausted.
    #[error(transparent)]
    Poll(#[from] PollError),
    /// Persisting or extracting the archive failed.
    #[error(transparent)]
    Archive(#[from] archive::ArchiveError),
    /// Pocket extraction failed.
    #[error(transparent)]
    Pockets(#[from] pockets::PocketError),
    /// The submission log could not be written.
    #[error("Failed to write submission log {path}: {source}")]
    SubmitLog { path: PathBuf, source: io::Error },
}

/// Run the pipeline, sleeping with [`thread::sleep`] between poll attempts.
pub fn run<S>(
    service: &S,
    mode: RunMode,
    options: &RunOptions,
) -> Result<ResultPaths, WorkflowError>
where
    S: PocketService + ?Sized,
{
    run_with_sleeper(service, mode, options, thread::sleep)
}

/// Run the pipeline with an injected sleeper; tests pass a recorder.
pub fn run_with_sleeper<S, F>(
    service: &S,
    mode: RunMode,
    options: &RunOptions,
    sleep: F,
) -> Result<ResultPaths, WorkflowError>
where
    S: PocketService + ?Sized,
    F: FnMut(Duration),
{
    let submit_only = matches!(mode, RunMode::SubmitOnly);
    match mode {
        RunMode::DownloadOnly { jobid } => {
            let out_dir = options
                .out_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from("."));
            let bytes = poll::download_archive(service, &jobid, &options.schedule, sleep)?;
            finish_download(bytes, &out_dir, jobid, None, options.compute_pockets)
        }
        RunMode::SubmitOnly | RunMode::SubmitAndDownload => {
            let pdb = options.pdb.as_deref().ok_or(WorkflowError::MissingPdb)?;
            let report = structure::verify_structure(pdb)?;
            if !report.ok {
                return Err(WorkflowError::Validation(report.message));
            }
            tracing::info!("{}", report.message);

            let jobid = service.submit(&SubmitRequest {
                pdb_path: pdb.to_path_buf(),
                radius: options.radius,
                email: options.email.clone(),
            })?;
            let file_name = display_file_name(pdb);
            tracing::info!(job = %jobid, file = %file_name, "job submitted");

            let out_dir = resolve_out_dir(options.out_dir.as_deref(), pdb);
            let submit_log = write_submit_log(&out_dir, &file_name, &jobid)?;
            tracing::info!(log = %submit_log.display(), "job id recorded");

            if submit_only {
                return Ok(ResultPaths {
                    jobid,
                    submit_log: Some(submit_log),
                    zip_path: None,
                    extract_path: None,
                    pockets_csv: None,
                    pockets_txt: None,
                });
            }
            let bytes = poll::download_archive(service, &jobid, &options.schedule, sleep)?;
            finish_download(
                bytes,
                &out_dir,
                jobid,
                Some(submit_log),
                options.compute_pockets,
            )
        }
    }
}

fn finish_download(
    bytes: Vec<u8>,
    out_dir: &Path,
    jobid: JobId,
    submit_log: Option<PathBuf>,
    compute_pockets: bool,
) -> Result<ResultPaths, WorkflowError> {
    let materialized = archive::materialize(&bytes, out_dir, &jobid)?;
    let mut paths = ResultPaths {
        jobid,
        submit_log,
        zip_path: Some(materialized.zip_path),
        extract_path: Some(materialized.extract_path.clone()),
        pockets_csv: None,
        pockets_txt: None,
    };
    if compute_pockets {
        let outputs = pockets::compute_pockets(&materialized.extract_path, &paths.jobid)?;
        paths.pockets_csv = Some(outputs.pockets_csv);
        paths.pockets_txt = Some(outputs.pockets_txt);
    }
    Ok(paths)
}

/// Default the output directory to the structure file's parent.
fn resolve_out_dir(out_dir: Option<&Path>, pdb: &Path) -> PathBuf {
    match out_dir {
        Some(dir) => dir.to_path_buf(),
        None => {
            let parent = pdb.parent().unwrap_or(Path::new("."));
            if parent.as_os_str().is_empty() {
                PathBuf::from(".")
            } else {
                parent.to_path_buf()
            }
        }
    }
}

fn display_file_name(pdb: &Path) -> String {
    pdb.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| pdb.display().to_string())
}

fn write_submit_log(
    out_dir: &Path,
    file_name: &str,
    jobid: &JobId,
) -> Result<PathBuf, WorkflowError> {
    let path = out_dir.join(format!("{file_name}_submit.log"));
    let log_io = |source| WorkflowError::SubmitLog {
        path: path.clone(),
        source,
    };
    fs::create_dir_all(out_dir).map_err(log_io)?;
    fs::write(
        &path,
        format!("PDB file name : {file_name}\nJOB ID : {jobid}\n"),
    )
    .map_err(log_io)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_dir_defaults_to_pdb_parent() {
        let resolved = resolve_out_dir(None, Path::new("/data/structures/prot.pdb"));
        assert_eq!(resolved, PathBuf::from("/data/structures"));
    }

    #[test]
    fn out_dir_falls_back_to_current_dir_for_bare_names() {
        let resolved = resolve_out_dir(None, Path::new("prot.pdb"));
        assert_eq!(resolved, PathBuf::from("."));
    }

    #[test]
    fn explicit_out_dir_wins() {
        let resolved = resolve_out_dir(Some(Path::new("/out")), Path::new("/data/prot.pdb"));
        assert_eq!(resolved, PathBuf::from("/out"));
    }
}

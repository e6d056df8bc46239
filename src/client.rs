//! HTTP access to the CASTpFold submission and download endpoints.
//!
//! The remote job is an external state machine (pending, ready, expired) this
//! crate cannot control, so the network surface is kept behind the
//! [`PocketService`] trait: one call to enqueue a computation, one call to
//! probe for its packaged result. Everything above this module can run
//! against a fake service.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

use crate::http_client;

/// Production submission endpoint.
pub const SUBMIT_URL: &str = "https://cfold.bme.uic.edu/castpfold/submit_calc.php";
/// Production download URL template; `{jobid}` is substituted twice.
pub const DOWNLOAD_URL_TEMPLATE: &str =
    "https://cfold.bme.uic.edu/castpfold/data/tmppdb/{jobid}/processed/{jobid}.zip";

/// The service rejects uploads larger than 2 MiB; enforced locally so an
/// oversized file never leaves the machine.
pub const MAX_STRUCTURE_BYTES: u64 = 2 * 1024 * 1024;
/// Probe radius bounds accepted by the service, inclusive.
pub const RADIUS_RANGE: std::ops::RangeInclusive<f64> = 0.0..=5.0;

const ARCHIVE_CONTENT_TYPE: &str = "application/zip";
const MAX_ARCHIVE_BYTES: usize = 256 * 1024 * 1024;
const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:102.0) Gecko/20100101 Firefox/102.0";

/// Opaque server-issued identifier for one submitted computation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId(String);

impl JobId {
    /// Wrap a raw identifier string.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The identifier as issued by the server.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parameters for one submission attempt.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    /// Path to the structure file to upload.
    pub pdb_path: PathBuf,
    /// Probe radius in Ångström, within [`RADIUS_RANGE`].
    pub radius: f64,
    /// Contact email forwarded to the server unchanged; `"N/A"` when unset.
    pub email: String,
}

/// Result of one download attempt for a job's archive.
#[derive(Debug)]
pub enum ArchiveProbe {
    /// The archive was produced; raw zip bytes.
    Ready(Vec<u8>),
    /// The server has not produced the archive yet.
    NotReady {
        /// HTTP status of the last response, when one arrived.
        status: Option<u16>,
        /// Content type of the last response, when present.
        content_type: Option<String>,
    },
}

/// Errors from a submission attempt. Validation variants are raised before
/// any network traffic and are never retried; submission itself is never
/// retried automatically since a resubmit may enqueue a duplicate job.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// The probe radius falls outside the accepted range.
    #[error("Probe radius {0} must be between 0.0 and 5.0 (Å)")]
    RadiusOutOfRange(f64),
    /// The structure file does not exist.
    #[error("PDB file not found: {0}")]
    PdbNotFound(PathBuf),
    /// The structure file exceeds the service upload limit.
    #[error("PDB file {path} is {size} bytes; the service limit is {MAX_STRUCTURE_BYTES} bytes")]
    PdbTooLarge { path: PathBuf, size: u64 },
    /// The structure file could not be read.
    #[error("Failed to read PDB file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Transport failure or non-2xx response from the submission endpoint.
    #[error("HTTP error submitting job: {0}")]
    Http(String),
    /// The submission response body was not the expected JSON shape.
    #[error("Invalid submission response: {0}")]
    Json(String),
    /// The server accepted the upload but issued no usable job id.
    #[error("Server did not issue a job id (response: {0}); submit the PDB file again")]
    Rejected(String),
}

/// Errors from an archive download attempt. A missing or not-yet-ready
/// archive is not an error; see [`ArchiveProbe::NotReady`].
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Transport failure reaching the download endpoint.
    #[error("HTTP error fetching archive: {0}")]
    Http(String),
    /// Failure while reading the response body.
    #[error("Failed to read archive body: {0}")]
    Io(#[from] std::io::Error),
}

/// Capability interface over the remote pocket-detection service.
pub trait PocketService {
    /// Upload a structure and enqueue a computation, returning its job id.
    fn submit(&self, request: &SubmitRequest) -> Result<JobId, SubmitError>;
    /// Attempt to download the result archive for `jobid` once.
    fn probe_archive(&self, jobid: &JobId) -> Result<ArchiveProbe, FetchError>;
}

/// Endpoint pair used by [`CastpFoldClient`]; injectable for tests.
#[derive(Debug, Clone)]
pub struct ServiceEndpoints {
    /// Submission endpoint URL.
    pub submit_url: String,
    /// Download URL with a `{jobid}` placeholder.
    pub download_url_template: String,
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        Self {
            submit_url: SUBMIT_URL.to_string(),
            download_url_template: DOWNLOAD_URL_TEMPLATE.to_string(),
        }
    }
}

/// Blocking HTTP implementation of [`PocketService`].
#[derive(Debug, Default)]
pub struct CastpFoldClient {
    endpoints: ServiceEndpoints,
}

impl CastpFoldClient {
    /// Client against the production endpoints.
    pub fn new() -> Self {
        Self::default()
    }

    /// Client against custom endpoints.
    pub fn with_endpoints(endpoints: ServiceEndpoints) -> Self {
        Self { endpoints }
    }
}

impl PocketService for CastpFoldClient {
    fn submit(&self, request: &SubmitRequest) -> Result<JobId, SubmitError> {
        if !RADIUS_RANGE.contains(&request.radius) {
            return Err(SubmitError::RadiusOutOfRange(request.radius));
        }
        let path = request.pdb_path.as_path();
        if !path.exists() {
            return Err(SubmitError::PdbNotFound(path.to_path_buf()));
        }
        let size = fs::metadata(path)
            .map_err(|source| io_error(path, source))?
            .len();
        if size > MAX_STRUCTURE_BYTES {
            return Err(SubmitError::PdbTooLarge {
                path: path.to_path_buf(),
                size,
            });
        }
        let file_bytes = fs::read(path).map_err(|source| io_error(path, source))?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("structure.pdb");

        let boundary = multipart_boundary();
        let body = multipart_body(
            &boundary,
            request.radius,
            &request.email,
            file_name,
            &file_bytes,
        );
        tracing::debug!(
            url = %self.endpoints.submit_url,
            file = file_name,
            radius = request.radius,
            "submitting structure"
        );
        let response = http_client::agent()
            .post(&self.endpoints.submit_url)
            .set("User-Agent", USER_AGENT)
            .set("Accept", "*/*")
            .set("X-Requested-With", "XMLHttpRequest")
            .set("Origin", "https://cfold.bme.uic.edu")
            .set("Referer", "https://cfold.bme.uic.edu/castpfold/compute")
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={boundary}"),
            )
            .send_bytes(&body)
            .map_err(|err| SubmitError::Http(err.to_string()))?;
        let payload: Value = response
            .into_json()
            .map_err(|err| SubmitError::Json(err.to_string()))?;
        extract_jobid(&payload)
    }

    fn probe_archive(&self, jobid: &JobId) -> Result<ArchiveProbe, FetchError> {
        let url = self
            .endpoints
            .download_url_template
            .replace("{jobid}", jobid.as_str());
        tracing::debug!(url = %url, "probing for result archive");
        match http_client::agent()
            .get(&url)
            .set("User-Agent", USER_AGENT)
            .call()
        {
            Ok(response) => {
                let content_type = response.header("Content-Type").map(str::to_string);
                let status = response.status();
                let is_archive = content_type
                    .as_deref()
                    .is_some_and(|value| value.starts_with(ARCHIVE_CONTENT_TYPE));
                if status == 200 && is_archive {
                    let bytes = http_client::read_response_bytes(response, MAX_ARCHIVE_BYTES)?;
                    if bytes.is_empty() {
                        return Ok(ArchiveProbe::NotReady {
                            status: Some(status),
                            content_type,
                        });
                    }
                    Ok(ArchiveProbe::Ready(bytes))
                } else {
                    Ok(ArchiveProbe::NotReady {
                        status: Some(status),
                        content_type,
                    })
                }
            }
            // Non-2xx responses mean the pipeline has not published the
            // archive yet, not that the request failed.
            Err(ureq::Error::Status(code, response)) => Ok(ArchiveProbe::NotReady {
                status: Some(code),
                content_type: response.header("Content-Type").map(str::to_string),
            }),
            Err(err) => Err(FetchError::Http(err.to_string())),
        }
    }
}

fn io_error(path: &Path, source: std::io::Error) -> SubmitError {
    SubmitError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Pull the job id out of the submission response, rejecting the sentinel
/// values the server uses when it could not enqueue a computation.
fn extract_jobid(payload: &Value) -> Result<JobId, SubmitError> {
    let raw = match payload.get("jobid") {
        None | Some(Value::Null) => {
            return Err(SubmitError::Rejected(payload.to_string()));
        }
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
        return Err(SubmitError::Rejected(payload.to_string()));
    }
    Ok(JobId::new(trimmed))
}

fn multipart_boundary() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or(0);
    format!("----castpfold{nanos:x}")
}

/// Assemble a multipart/form-data body carrying the probe radius, email, and
/// the structure file (content type matches what the web form sends).
fn multipart_body(
    boundary: &str,
    radius: f64,
    email: &str,
    file_name: &str,
    file_bytes: &[u8],
) -> Vec<u8> {
    let mut body = Vec::with_capacity(file_bytes.len() + 512);
    let text_field = |body: &mut Vec<u8>, name: &str, value: &str| {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
        );
        body.extend_from_slice(value.as_bytes());
        body.extend_from_slice(b"\r\n");
    };
    text_field(&mut body, "probe", &radius.to_string());
    text_field(&mut body, "email", email);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/vnd.palm\r\n\r\n");
    body.extend_from_slice(file_bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

//! Client library for the CASTpFold pocket-detection web service.
/// Persisting and unpacking downloaded result archives.
pub mod archive;
/// HTTP submission and archive-probe endpoints.
pub mod client;
pub(crate) mod http_client;
/// Tracing setup for the command-line binary.
pub mod logging;
/// `.poc` table decoding and pocket coordinate summaries.
pub mod pockets;
/// Bounded wait/retry schedule for result retrieval.
pub mod poll;
/// Local pre-upload PDB validation.
pub mod structure;
/// Mode sequencing for submit/download runs.
pub mod workflow;

//! Bounded wait/retry schedule for fetching job results.
//!
//! Completion latency on the remote compute pipeline is highly variable, so
//! retrieval follows a two-phase schedule: one long initial wait before the
//! first attempt, a second longer wait after a miss, then a short run of
//! closely spaced retries. The schedule itself is a pure function of how many
//! attempts have been made; sleeping is injected so tests never block.

use std::time::Duration;

use crate::client::{ArchiveProbe, FetchError, JobId, PocketService};

/// Timing policy for archive retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    /// Wait before the first download attempt.
    pub initial_wait: Duration,
    /// Wait after the first attempt misses.
    pub extra_wait: Duration,
    /// Extra attempts after the post-miss wait; clamped to at least one.
    pub max_retries: usize,
    /// Pause between the extra attempts.
    pub retry_pause: Duration,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            initial_wait: Duration::from_secs(20),
            extra_wait: Duration::from_secs(30),
            max_retries: 1,
            retry_pause: Duration::from_secs(2),
        }
    }
}

/// What to do before the next download attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStep {
    /// Sleep for the given duration, then attempt a download.
    Wait(Duration),
    /// The schedule is exhausted.
    GiveUp,
}

impl PollSchedule {
    /// Next action given how many download attempts have already been made.
    pub fn next_step(&self, attempts_made: usize) -> PollStep {
        let extra_attempts = self.max_retries.max(1);
        match attempts_made {
            0 => PollStep::Wait(self.initial_wait),
            1 => PollStep::Wait(self.extra_wait),
            n if n <= extra_attempts => PollStep::Wait(self.retry_pause),
            _ => PollStep::GiveUp,
        }
    }
}

/// Terminal failure of the retrieval schedule.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    /// Every scheduled attempt found the archive unpublished. The job may
    /// still complete; retry later with the download-only mode.
    #[error(
        "Archive not ready for job {jobid}; last check: status={status:?}, \
         content_type={content_type:?}. Use the download-only mode to fetch it later."
    )]
    NotReady {
        jobid: String,
        status: Option<u16>,
        content_type: Option<String>,
    },
    /// A download attempt failed at the transport level.
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Drive the schedule against `service` until the archive arrives or the
/// schedule gives up. `sleep` receives every scheduled wait.
pub fn download_archive<S, F>(
    service: &S,
    jobid: &JobId,
    schedule: &PollSchedule,
    mut sleep: F,
) -> Result<Vec<u8>, PollError>
where
    S: PocketService + ?Sized,
    F: FnMut(Duration),
{
    let mut attempts_made = 0usize;
    let mut last_status = None;
    let mut last_content_type = None;
    loop {
        match schedule.next_step(attempts_made) {
            PollStep::Wait(duration) => {
                if !duration.is_zero() {
                    tracing::info!(
                        job = %jobid,
                        seconds = duration.as_secs(),
                        "waiting for the remote job"
                    );
                }
                sleep(duration);
            }
            PollStep::GiveUp => {
                return Err(PollError::NotReady {
                    jobid: jobid.to_string(),
                    status: last_status,
                    content_type: last_content_type,
                });
            }
        }
        attempts_made += 1;
        match service.probe_archive(jobid)? {
            ArchiveProbe::Ready(bytes) => {
                tracing::info!(job = %jobid, bytes = bytes.len(), "result archive downloaded");
                return Ok(bytes);
            }
            ArchiveProbe::NotReady {
                status,
                content_type,
            } => {
                tracing::info!(job = %jobid, status = ?status, "archive not ready yet");
                last_status = status;
                last_content_type = content_type;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{SubmitError, SubmitRequest};
    use std::cell::RefCell;

    struct ScriptedService {
        probes: RefCell<Vec<ArchiveProbe>>,
        probe_count: RefCell<usize>,
    }

    impl ScriptedService {
        fn new(probes: Vec<ArchiveProbe>) -> Self {
            Self {
                probes: RefCell::new(probes),
                probe_count: RefCell::new(0),
            }
        }
    }

    impl PocketService for ScriptedService {
        fn submit(&self, _request: &SubmitRequest) -> Result<JobId, SubmitError> {
            unreachable!("polling never submits");
        }

        fn probe_archive(&self, _jobid: &JobId) -> Result<ArchiveProbe, FetchError> {
            *self.probe_count.borrow_mut() += 1;
            Ok(self.probes.borrow_mut().remove(0))
        }
    }

    fn not_ready() -> ArchiveProbe {
        ArchiveProbe::NotReady {
            status: Some(404),
            content_type: Some("text/html".to_string()),
        }
    }

    fn schedule() -> PollSchedule {
        PollSchedule {
            initial_wait: Duration::from_secs(20),
            extra_wait: Duration::from_secs(30),
            max_retries: 1,
            retry_pause: Duration::from_secs(2),
        }
    }

    #[test]
    fn schedule_defaults_match_service_latency_profile() {
        let schedule = PollSchedule::default();
        assert_eq!(schedule.next_step(0), PollStep::Wait(Duration::from_secs(20)));
        assert_eq!(schedule.next_step(1), PollStep::Wait(Duration::from_secs(30)));
        assert_eq!(schedule.next_step(2), PollStep::GiveUp);
    }

    #[test]
    fn schedule_clamps_retries_to_at_least_one() {
        let schedule = PollSchedule {
            max_retries: 0,
            ..PollSchedule::default()
        };
        assert_eq!(schedule.next_step(1), PollStep::Wait(Duration::from_secs(30)));
        assert_eq!(schedule.next_step(2), PollStep::GiveUp);
    }

    #[test]
    fn schedule_paces_extra_retries() {
        let schedule = PollSchedule {
            max_retries: 3,
            ..PollSchedule::default()
        };
        assert_eq!(schedule.next_step(2), PollStep::Wait(Duration::from_secs(2)));
        assert_eq!(schedule.next_step(3), PollStep::Wait(Duration::from_secs(2)));
        assert_eq!(schedule.next_step(4), PollStep::GiveUp);
    }

    #[test]
    fn first_attempt_success_sleeps_once() {
        let service = ScriptedService::new(vec![ArchiveProbe::Ready(vec![1, 2, 3])]);
        let mut slept = Vec::new();
        let bytes = download_archive(&service, &JobId::new("j_1"), &schedule(), |d| {
            slept.push(d)
        })
        .unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
        assert_eq!(slept, vec![Duration::from_secs(20)]);
        assert_eq!(*service.probe_count.borrow(), 1);
    }

    #[test]
    fn miss_then_success_uses_extra_wait() {
        let service =
            ScriptedService::new(vec![not_ready(), ArchiveProbe::Ready(vec![9])]);
        let mut slept = Vec::new();
        let bytes = download_archive(&service, &JobId::new("j_1"), &schedule(), |d| {
            slept.push(d)
        })
        .unwrap();
        assert_eq!(bytes, vec![9]);
        assert_eq!(
            slept,
            vec![Duration::from_secs(20), Duration::from_secs(30)]
        );
        assert_eq!(*service.probe_count.borrow(), 2);
    }

    #[test]
    fn exhausted_schedule_reports_job_and_last_probe() {
        let service = ScriptedService::new(vec![not_ready(), not_ready()]);
        let mut slept = Vec::new();
        let err = download_archive(&service, &JobId::new("j_68e"), &schedule(), |d| {
            slept.push(d)
        })
        .unwrap_err();
        match &err {
            PollError::NotReady {
                jobid,
                status,
                content_type,
            } => {
                assert_eq!(jobid, "j_68e");
                assert_eq!(*status, Some(404));
                assert_eq!(content_type.as_deref(), Some("text/html"));
            }
            other => panic!("expected not-ready, got {other:?}"),
        }
        let message = err.to_string();
        assert!(message.contains("j_68e"));
        assert!(message.contains("download-only"));
        assert_eq!(
            slept,
            vec![Duration::from_secs(20), Duration::from_secs(30)]
        );
    }

    #[test]
    fn transport_errors_abort_immediately() {
        struct FailingService;
        impl PocketService for FailingService {
            fn submit(&self, _request: &SubmitRequest) -> Result<JobId, SubmitError> {
                unreachable!();
            }
            fn probe_archive(&self, _jobid: &JobId) -> Result<ArchiveProbe, FetchError> {
                Err(FetchError::Http("connection refused".to_string()))
            }
        }
        let err =
            download_archive(&FailingService, &JobId::new("j_1"), &schedule(), |_| {})
                .unwrap_err();
        assert!(matches!(err, PollError::Fetch(_)));
    }
}

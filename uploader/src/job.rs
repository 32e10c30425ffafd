//! Upload job state machine.
//!
//! ```text
//! Idle ─read─▶ Reading ─preview─▶ Previewed ─upload─▶ Uploading ─▶ Succeeded
//!               ▲   │                                           ├─▶ PartiallyFailed
//!               └───┘ (retry after a parse error)               └─▶ Cancelled
//! ```
//!
//! The job owns its file, lines and summary. Observers never mutate it: they
//! subscribe to a [`watch`] channel and receive a fresh [`JobSnapshot`] after
//! every transition and every settled chunk.

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::aggregate::{JobState, UploadSummary};
use crate::api::logs::log_error;
use crate::client::{IngestClient, UploadParams};
use crate::error::{JobError, JobResult};
use crate::plan::{plan_chunks, ChunkPlan};
use crate::preview::{build_preview, Preview};
use crate::reader::{read_lines, FilePurpose, LineSet, RawFile};
use crate::upload::Orchestrator;

/// What observers see of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: Uuid,
    pub file_name: String,
    pub file_size: usize,
    pub state: JobState,
    /// Present once the upload has started
    pub summary: Option<UploadSummary>,
}

/// One file, from selection to final summary.
#[derive(Debug)]
pub struct UploadJob {
    id: Uuid,
    file: RawFile,
    state: JobState,
    lines: Option<LineSet>,
    preview: Option<Preview>,
    summary: Option<UploadSummary>,
    snapshots: watch::Sender<JobSnapshot>,
}

impl UploadJob {
    pub fn new(file: RawFile) -> Self {
        let id = Uuid::new_v4();
        let (snapshots, _) = watch::channel(JobSnapshot {
            job_id: id,
            file_name: file.name().to_string(),
            file_size: file.size(),
            state: JobState::Idle,
            summary: None,
        });

        Self {
            id,
            file,
            state: JobState::Idle,
            lines: None,
            preview: None,
            summary: None,
            snapshots,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn file(&self) -> &RawFile {
        &self.file
    }

    pub fn lines(&self) -> Option<&LineSet> {
        self.lines.as_ref()
    }

    pub fn preview(&self) -> Option<&Preview> {
        self.preview.as_ref()
    }

    pub fn summary(&self) -> Option<&UploadSummary> {
        self.summary.as_ref()
    }

    /// Receive a snapshot after every change.
    pub fn subscribe(&self) -> watch::Receiver<JobSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.id,
            file_name: self.file.name().to_string(),
            file_size: self.file.size(),
            state: self.state,
            summary: self.summary.clone(),
        }
    }

    fn set_state(&mut self, state: JobState) {
        self.state = state;
        self.snapshots.send_replace(self.snapshot());
    }

    fn invalid(&self, action: &'static str) -> JobError {
        JobError::InvalidTransition {
            from: self.state.to_string(),
            action,
        }
    }

    /// `Idle | Reading → Reading`: split the file into lines.
    ///
    /// On failure the job stays in `Reading` and the read can be retried.
    pub fn read(&mut self) -> JobResult<&LineSet> {
        if !matches!(self.state, JobState::Idle | JobState::Reading) {
            return Err(self.invalid("read"));
        }
        self.set_state(JobState::Reading);

        let result = self
            .file
            .ensure_supported(FilePurpose::Upload)
            .and_then(|_| read_lines(&self.file));

        match result {
            Ok(lines) => Ok(&*self.lines.insert(lines)),
            Err(e) => {
                log_error(format!("Cannot read {}: {}", self.file.name(), e));
                self.lines = None;
                Err(e.into())
            }
        }
    }

    /// `Reading → Previewed`: detect the separator and sample rows.
    pub fn build_preview(&mut self) -> JobResult<&Preview> {
        if self.state != JobState::Reading {
            return Err(self.invalid("preview"));
        }
        let lines = self.lines.as_ref().ok_or_else(|| self.invalid("preview"))?;
        let preview = build_preview(lines).map_err(|e| {
            log_error(format!("Preview failed: {}", e));
            JobError::from(e)
        })?;

        self.preview = Some(preview);
        self.set_state(JobState::Previewed);
        self.preview.as_ref().ok_or_else(|| self.invalid("preview"))
    }

    /// Read and preview in one step.
    pub fn prepare(&mut self) -> JobResult<&Preview> {
        self.read()?;
        self.build_preview()
    }

    /// Chunk plan for the lines read so far.
    pub fn plan(&self) -> JobResult<ChunkPlan<'_>> {
        self.lines
            .as_ref()
            .map(|lines| plan_chunks(lines))
            .ok_or_else(|| self.invalid("plan"))
    }

    /// `Previewed → Uploading → terminal`: send every chunk.
    ///
    /// Only pre-upload problems are errors; chunk failures end up in the
    /// returned summary.
    pub async fn upload<C: IngestClient>(
        &mut self,
        orchestrator: &Orchestrator<C>,
        params: &UploadParams,
        cancel: &CancellationToken,
    ) -> JobResult<UploadSummary> {
        if self.state != JobState::Previewed {
            return Err(self.invalid("upload"));
        }
        self.set_state(JobState::Uploading);

        let id = self.id;
        let file_name = self.file.name().to_string();
        let file_size = self.file.size();
        let snapshots = &self.snapshots;
        let lines = self.lines.as_ref().map(|l| l.as_slice()).unwrap_or(&[]);
        let plan = plan_chunks(lines);

        let summary = orchestrator
            .run(&plan, params, cancel, |summary| {
                snapshots.send_replace(JobSnapshot {
                    job_id: id,
                    file_name: file_name.clone(),
                    file_size,
                    state: summary.state,
                    summary: Some(summary.clone()),
                });
            })
            .await;

        self.summary = Some(summary.clone());
        self.set_state(summary.state);
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ChunkRequest, IngestCounts};
    use crate::error::{ParseError, TransportResult};
    use crate::upload::RetryPolicy;
    use std::time::Duration;

    struct AllValid;

    impl IngestClient for AllValid {
        async fn upload_chunk(&self, request: &ChunkRequest) -> TransportResult<IngestCounts> {
            Ok(IngestCounts::new(request.line_count, 0, 0))
        }
    }

    fn orchestrator() -> Orchestrator<AllValid> {
        Orchestrator::with_settings(
            AllValid,
            Duration::from_secs(5),
            Duration::ZERO,
            RetryPolicy::none(),
        )
    }

    fn job(name: &str, content: &str) -> UploadJob {
        UploadJob::new(RawFile::from_bytes(name, content.as_bytes().to_vec()))
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let mut job = job("lista.txt", "11999990001\n11999990002\n11999990003\n");
        let rx = job.subscribe();
        assert_eq!(job.state(), JobState::Idle);

        let preview = job.prepare().unwrap();
        assert_eq!(preview.headers, vec!["telefone"]);
        assert_eq!(job.state(), JobState::Previewed);

        let summary = job
            .upload(&orchestrator(), &UploadParams::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.state, JobState::Succeeded);
        assert_eq!(summary.valid_total, 3);
        assert_eq!(job.state(), JobState::Succeeded);

        let last = rx.borrow().clone();
        assert_eq!(last.state, JobState::Succeeded);
        assert_eq!(last.summary.unwrap().processed_lines, 3);
    }

    #[test]
    fn test_empty_file_stops_in_reading() {
        let mut job = job("vazia.txt", "\n\n");
        let err = job.read().unwrap_err();
        assert!(matches!(err, JobError::Parse(ParseError::EmptyFile)));
        assert_eq!(job.state(), JobState::Reading);
        assert!(job.plan().is_err());

        // read may be retried, preview may not run without lines
        assert!(job.read().is_err());
        assert!(job.build_preview().is_err());
        assert_eq!(job.state(), JobState::Reading);
    }

    #[test]
    fn test_tsv_rejected_for_upload() {
        let mut job = job("lista.tsv", "telefone\tnome\n");
        assert!(matches!(
            job.read(),
            Err(JobError::Parse(ParseError::UnsupportedExtension(_)))
        ));
    }

    #[tokio::test]
    async fn test_upload_requires_preview() {
        let mut job = job("lista.txt", "11999990001\n");
        job.read().unwrap();

        let err = job
            .upload(&orchestrator(), &UploadParams::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidTransition { action: "upload", .. }));
        assert_eq!(job.state(), JobState::Reading);
    }

    #[tokio::test]
    async fn test_terminal_job_rejects_new_upload() {
        let mut job = job("lista.txt", "11999990001\n");
        job.prepare().unwrap();
        let orch = orchestrator();
        job.upload(&orch, &UploadParams::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(job.read().is_err());
        assert!(job
            .upload(&orch, &UploadParams::default(), &CancellationToken::new())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let mut job = job("lista.txt", "11999990001\n11999990002\n");
        job.prepare().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = job
            .upload(&orchestrator(), &UploadParams::default(), &cancel)
            .await
            .unwrap();
        assert_eq!(summary.state, JobState::Cancelled);
        assert_eq!(summary.processed_lines, 0);
    }

    #[test]
    fn test_plan_after_read() {
        let content: String = (0..1_500).map(|i| format!("11{:09}\n", i)).collect();
        let mut job = job("lista.csv", &content);
        job.read().unwrap();
        let plan = job.plan().unwrap();
        assert_eq!(plan.sizes(), vec![1_000, 500]);
    }
}

//! Upload orchestrator.
//!
//! Walks a [`ChunkPlan`] strictly in order, one request in flight at a time:
//!
//! 1. materialize the chunk as its own text file with the job parameters
//! 2. send it under a per-request timeout, retrying transient failures
//! 3. fold the counts (or the whole chunk as invalid) into the summary
//! 4. pause before the next chunk, except after the last one
//!
//! A failed chunk never stops the job. A cancelled token stops dispatch
//! before the next chunk; an in-flight request is allowed to settle.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::aggregate::{Aggregator, ChunkOutcome, UploadSummary};
use crate::api::logs::{
    log_error, log_info, log_info_indent, log_success, log_warning, log_warning_indent,
};
use crate::client::{chunk_file_name, ChunkRequest, IngestClient, IngestCounts, UploadParams};
use crate::config::UploaderConfig;
use crate::error::{ChunkTransportError, TransportResult};
use crate::plan::{Chunk, ChunkPlan};

use super::retry::RetryPolicy;

/// Drives the chunks of one job through an [`IngestClient`].
#[derive(Debug, Clone)]
pub struct Orchestrator<C> {
    client: C,
    request_timeout: Duration,
    chunk_pause: Duration,
    retry: RetryPolicy,
}

impl<C: IngestClient> Orchestrator<C> {
    /// Orchestrator using the timeout, pause and retry settings of `config`.
    pub fn new(client: C, config: &UploaderConfig) -> Self {
        Self::with_settings(client, config.request_timeout, config.chunk_pause, config.retry)
    }

    pub fn with_settings(
        client: C,
        request_timeout: Duration,
        chunk_pause: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            request_timeout,
            chunk_pause,
            retry,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Upload every chunk of `plan` and return the terminal summary.
    ///
    /// `on_progress` sees the summary after every settled chunk and once more
    /// in its terminal state.
    pub async fn run<F>(
        &self,
        plan: &ChunkPlan<'_>,
        params: &UploadParams,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> UploadSummary
    where
        F: FnMut(&UploadSummary),
    {
        let mut aggregator = Aggregator::new(plan.total_lines, plan.len());
        on_progress(aggregator.summary());

        log_info(format!(
            "📤 Uploading {} lines in {} chunk(s) of up to {} lines",
            plan.total_lines,
            plan.len(),
            plan.chunk_size
        ));

        let mut cancelled = false;
        for chunk in plan.iter() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let request = self.materialize(chunk, params);
            let outcome = self.dispatch(&request, cancel).await;
            on_progress(aggregator.record(&outcome));

            let is_last = chunk.index + 1 == plan.len();
            if !is_last && !self.chunk_pause.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.chunk_pause) => {}
                }
            }
        }

        if cancelled {
            log_warning("Upload cancelled, no further chunks will be sent");
        }

        let summary = aggregator.finish(cancelled);
        if summary.failed_chunks > 0 {
            log_warning(&summary.status_message);
        } else {
            log_success(&summary.status_message);
        }
        on_progress(&summary);
        summary
    }

    /// Turn a chunk into a standalone request carrying the job parameters.
    fn materialize(&self, chunk: &Chunk<'_>, params: &UploadParams) -> ChunkRequest {
        ChunkRequest {
            chunk_index: chunk.index,
            file_name: chunk_file_name(&params.file_name, chunk.index),
            payload: chunk.to_payload(),
            line_count: chunk.size(),
            params: params.clone(),
        }
    }

    /// Send one chunk, retrying transient failures, and settle it.
    async fn dispatch(&self, request: &ChunkRequest, cancel: &CancellationToken) -> ChunkOutcome {
        let index = request.chunk_index;
        let size = request.line_count;
        let max_attempts = self.retry.max_attempts();
        let mut attempts = 0;

        loop {
            attempts += 1;
            log_info_indent(
                format!(
                    "→ Chunk {} ({} lines), attempt {}/{}",
                    index + 1,
                    size,
                    attempts,
                    max_attempts
                ),
                1,
            );

            let error = match self.attempt(request).await {
                Ok(counts) => {
                    check_counts(index, size, &counts);
                    return ChunkOutcome::succeeded(index, size, &counts, attempts);
                }
                Err(e) => e,
            };

            let give_up =
                attempts >= max_attempts || !error.is_retryable() || cancel.is_cancelled();
            if give_up {
                log_error(format!(
                    "Chunk {} failed after {} attempt(s): {}. Counting {} lines as invalid",
                    index + 1,
                    attempts,
                    error,
                    size
                ));
                return ChunkOutcome::failed(index, size, error.to_string(), attempts);
            }

            let delay = self.retry.delay_for(attempts);
            log_warning_indent(
                format!(
                    "Chunk {} attempt {} failed: {}. Retrying in {:?}",
                    index + 1,
                    attempts,
                    error,
                    delay
                ),
                1,
            );
            tokio::select! {
                _ = cancel.cancelled() => {
                    log_error(format!("Chunk {} abandoned on cancel: {}", index + 1, error));
                    return ChunkOutcome::failed(index, size, error.to_string(), attempts);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One request, bounded by the per-request timeout.
    async fn attempt(&self, request: &ChunkRequest) -> TransportResult<IngestCounts> {
        match tokio::time::timeout(self.request_timeout, self.client.upload_chunk(request)).await {
            Ok(result) => result,
            Err(_) => Err(ChunkTransportError::Timeout(self.request_timeout)),
        }
    }
}

/// Warn about responses that do not account for the chunk cleanly.
fn check_counts(index: usize, size: usize, counts: &IngestCounts) {
    if !counts.missing_fields.is_empty() {
        log_warning_indent(
            format!(
                "Chunk {}: response missing {}, counted as 0",
                index + 1,
                counts.missing_fields.join(", ")
            ),
            1,
        );
    }
    if counts.total() != size {
        log_warning_indent(
            format!(
                "Chunk {}: endpoint accounted for {} of {} lines",
                index + 1,
                counts.total(),
                size
            ),
            1,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::JobState;
    use crate::plan::plan_chunks;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// Scripted reply for one request.
    #[derive(Clone)]
    enum Reply {
        Counts(IngestCounts),
        Fail(ChunkTransportError),
        Hang,
    }

    /// In-memory endpoint: every line valid unless a reply is scripted.
    #[derive(Default)]
    struct FakeClient {
        script: Mutex<HashMap<usize, VecDeque<Reply>>>,
        calls: Mutex<Vec<ChunkRequest>>,
    }

    impl FakeClient {
        fn script(self, chunk: usize, replies: Vec<Reply>) -> Self {
            self.script.lock().unwrap().insert(chunk, replies.into());
            self
        }

        fn called_indexes(&self) -> Vec<usize> {
            self.calls.lock().unwrap().iter().map(|r| r.chunk_index).collect()
        }
    }

    impl IngestClient for FakeClient {
        async fn upload_chunk(&self, request: &ChunkRequest) -> TransportResult<IngestCounts> {
            self.calls.lock().unwrap().push(request.clone());
            let reply = self
                .script
                .lock()
                .unwrap()
                .get_mut(&request.chunk_index)
                .and_then(|q| q.pop_front());

            match reply {
                None => Ok(IngestCounts::new(request.line_count, 0, 0)),
                Some(Reply::Counts(c)) => Ok(c),
                Some(Reply::Fail(e)) => Err(e),
                Some(Reply::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3_600)).await;
                    Ok(IngestCounts::new(request.line_count, 0, 0))
                }
            }
        }
    }

    fn lines(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("11{:09}", i)).collect()
    }

    fn orchestrator(client: FakeClient, retry: RetryPolicy) -> Orchestrator<FakeClient> {
        Orchestrator::with_settings(
            client,
            Duration::from_secs(30),
            Duration::from_millis(500),
            retry,
        )
    }

    fn server_error() -> ChunkTransportError {
        ChunkTransportError::Status {
            status: 503,
            body: "busy".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunks_sent_in_order() {
        let data = lines(2_500);
        let plan = plan_chunks(&data);
        let orch = orchestrator(FakeClient::default(), RetryPolicy::none());

        let summary = orch
            .run(&plan, &UploadParams::default(), &CancellationToken::new(), |_| {})
            .await;

        assert_eq!(orch.client().called_indexes(), vec![0, 1, 2]);
        assert_eq!(summary.state, JobState::Succeeded);
        assert_eq!(summary.valid_total, 2_500);
        assert_eq!(summary.percent_complete, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_isolated_to_one_chunk() {
        let data = lines(1_500);
        let plan = plan_chunks(&data); // 1_000 + 500
        let client = FakeClient::default().script(0, vec![Reply::Hang]);
        let orch = orchestrator(client, RetryPolicy::none());

        let summary = orch
            .run(&plan, &UploadParams::default(), &CancellationToken::new(), |_| {})
            .await;

        assert_eq!(summary.state, JobState::PartiallyFailed);
        assert_eq!(summary.invalid_total, 1_000);
        assert_eq!(summary.valid_total, 500);
        assert_eq!(summary.processed_lines, 1_500);
        assert_eq!(summary.failed_chunks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retried() {
        let data = lines(800);
        let plan = plan_chunks(&data);
        let client = FakeClient::default().script(
            1,
            vec![
                Reply::Fail(server_error()),
                Reply::Counts(IngestCounts::new(290, 5, 5)),
            ],
        );
        let orch = orchestrator(
            client,
            RetryPolicy {
                max_retries: 2,
                initial_backoff: Duration::from_millis(100),
            },
        );

        let summary = orch
            .run(&plan, &UploadParams::default(), &CancellationToken::new(), |_| {})
            .await;

        assert_eq!(orch.client().called_indexes(), vec![0, 1, 1]);
        assert_eq!(summary.state, JobState::Succeeded);
        assert_eq!(summary.valid_total, 790);
        assert_eq!(summary.duplicate_total, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let data = lines(300);
        let plan = plan_chunks(&data);
        let client = FakeClient::default().script(
            0,
            vec![Reply::Fail(server_error()), Reply::Hang, Reply::Fail(server_error())],
        );
        let orch = orchestrator(
            client,
            RetryPolicy {
                max_retries: 2,
                initial_backoff: Duration::from_millis(100),
            },
        );

        let summary = orch
            .run(&plan, &UploadParams::default(), &CancellationToken::new(), |_| {})
            .await;

        assert_eq!(orch.client().called_indexes(), vec![0, 0, 0]);
        assert_eq!(summary.invalid_total, 300);
        assert_eq!(summary.state, JobState::PartiallyFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_not_retried() {
        let data = lines(100);
        let plan = plan_chunks(&data);
        let client = FakeClient::default().script(
            0,
            vec![Reply::Fail(ChunkTransportError::Status {
                status: 422,
                body: String::new(),
            })],
        );
        let orch = orchestrator(client, RetryPolicy::default());

        let summary = orch
            .run(&plan, &UploadParams::default(), &CancellationToken::new(), |_| {})
            .await;

        assert_eq!(orch.client().called_indexes(), vec![0]);
        assert_eq!(summary.invalid_total, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_between_chunks_only() {
        let data = lines(1_000);
        let plan = plan_chunks(&data); // 2 chunks of 500, one pause
        assert_eq!(plan.len(), 2);

        let orch = orchestrator(FakeClient::default(), RetryPolicy::none());
        let start = tokio::time::Instant::now();
        orch.run(&plan, &UploadParams::default(), &CancellationToken::new(), |_| {})
            .await;
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(500));
        assert!(elapsed < Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_dispatch_keeps_totals() {
        let data = lines(1_000);
        let plan = plan_chunks(&data); // 2 chunks of 500
        let cancel = CancellationToken::new();
        let orch = orchestrator(FakeClient::default(), RetryPolicy::none());

        let summary = orch
            .run(&plan, &UploadParams::default(), &cancel, |s| {
                if s.chunks_done == 1 {
                    cancel.cancel();
                }
            })
            .await;

        assert_eq!(orch.client().called_indexes(), vec![0]);
        assert_eq!(summary.state, JobState::Cancelled);
        assert_eq!(summary.valid_total, 500);
        assert!(summary.percent_complete < 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_reported_per_chunk() {
        let data = lines(25_000);
        let plan = plan_chunks(&data); // 13 chunks of up to 2_000
        let orch = orchestrator(FakeClient::default(), RetryPolicy::none());
        let mut seen = Vec::new();

        orch.run(&plan, &UploadParams::default(), &CancellationToken::new(), |s| {
            seen.push(s.percent_complete)
        })
        .await;

        // initial + one per chunk + terminal
        assert_eq!(seen.len(), plan.len() + 2);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(seen.iter().filter(|p| **p == 100).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_carry_job_params() {
        let data = lines(600);
        let plan = plan_chunks(&data);
        let params = UploadParams {
            campaign_id: Some("42".into()),
            country: "BR".into(),
            include_name: true,
            file_name: "lista.csv".into(),
        };
        let orch = orchestrator(FakeClient::default(), RetryPolicy::none());
        orch.run(&plan, &params, &CancellationToken::new(), |_| {}).await;

        let calls = orch.client().calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].file_name, "lista_part0002.csv");
        assert_eq!(calls[1].line_count, 100);
        assert!(calls.iter().all(|c| c.params == params));
    }
}

//! Result aggregation and progress reporting.
//!
//! Folds per-chunk outcomes, in chunk order, into a running
//! [`UploadSummary`]. Pure accumulation: the aggregator has no side effects,
//! callers decide how to publish each new summary.

use std::fmt;

use serde::Serialize;

use crate::client::IngestCounts;

/// Lifecycle of one upload job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Reading,
    Previewed,
    Uploading,
    /// Every chunk was accepted by the endpoint
    Succeeded,
    /// All chunks settled, at least one failed
    PartiallyFailed,
    /// Stopped before all chunks were dispatched
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::PartiallyFailed | JobState::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Idle => "idle",
            JobState::Reading => "reading",
            JobState::Previewed => "previewed",
            JobState::Uploading => "uploading",
            JobState::Succeeded => "succeeded",
            JobState::PartiallyFailed => "partially_failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one chunk once its request(s) settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkOutcome {
    pub chunk_index: usize,
    /// Lines in the chunk
    pub size: usize,
    pub valid_count: usize,
    pub invalid_count: usize,
    pub duplicate_count: usize,
    pub failed: bool,
    /// Requests issued for this chunk, retries included
    pub attempts: u32,
    /// Last transport error when `failed`
    pub error: Option<String>,
}

impl ChunkOutcome {
    pub fn succeeded(
        chunk_index: usize,
        size: usize,
        counts: &IngestCounts,
        attempts: u32,
    ) -> Self {
        Self {
            chunk_index,
            size,
            valid_count: counts.valid,
            invalid_count: counts.invalid,
            duplicate_count: counts.duplicate,
            failed: false,
            attempts,
            error: None,
        }
    }

    /// A failed chunk counts every one of its lines as invalid.
    pub fn failed(
        chunk_index: usize,
        size: usize,
        error: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self {
            chunk_index,
            size,
            valid_count: 0,
            invalid_count: size,
            duplicate_count: 0,
            failed: true,
            attempts,
            error: Some(error.into()),
        }
    }
}

/// Progress indicator payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
    pub percent: u8,
    pub status: String,
}

/// Running, then final, totals of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    pub total_lines: usize,
    pub processed_lines: usize,
    pub valid_total: usize,
    pub invalid_total: usize,
    pub duplicate_total: usize,
    pub percent_complete: u8,
    pub status_message: String,
    pub total_chunks: usize,
    pub chunks_done: usize,
    pub failed_chunks: usize,
    pub state: JobState,
}

impl UploadSummary {
    pub fn new(total_lines: usize, total_chunks: usize) -> Self {
        Self {
            total_lines,
            processed_lines: 0,
            valid_total: 0,
            invalid_total: 0,
            duplicate_total: 0,
            percent_complete: 0,
            status_message: format!("Uploading {} lines in {} chunks", total_lines, total_chunks),
            total_chunks,
            chunks_done: 0,
            failed_chunks: 0,
            state: JobState::Uploading,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Share of all lines accepted as valid, in percent.
    pub fn success_rate(&self) -> f64 {
        if self.total_lines == 0 {
            return 0.0;
        }
        self.valid_total as f64 / self.total_lines as f64 * 100.0
    }

    pub fn progress(&self) -> Progress {
        Progress {
            current: self.processed_lines,
            total: self.total_lines,
            percent: self.percent_complete,
            status: self.status_message.clone(),
        }
    }

    /// Final message shown in the summary panel.
    pub fn completion_message(&self) -> String {
        let totals = format!(
            "{} valid, {} invalid, {} duplicates ({:.1}% success)",
            self.valid_total,
            self.invalid_total,
            self.duplicate_total,
            self.success_rate()
        );
        match self.state {
            JobState::Succeeded => {
                format!("Upload complete: {} lines processed, {}", self.processed_lines, totals)
            }
            JobState::PartiallyFailed => format!(
                "Upload complete with {} failed chunk(s): {} lines processed, {}",
                self.failed_chunks, self.processed_lines, totals
            ),
            JobState::Cancelled => format!(
                "Upload cancelled after {} of {} chunks: {} of {} lines processed, {}",
                self.chunks_done, self.total_chunks, self.processed_lines, self.total_lines, totals
            ),
            _ => self.status_message.clone(),
        }
    }
}

/// `round(processed / total * 100)`, held below 100 until the job is terminal.
pub fn percent_complete(processed: usize, total: usize, terminal: bool) -> u8 {
    if total == 0 {
        return if terminal { 100 } else { 0 };
    }
    let percent = ((processed as f64 / total as f64) * 100.0).round().min(100.0) as u8;
    if terminal {
        percent
    } else {
        percent.min(99)
    }
}

/// Accumulates chunk outcomes into an [`UploadSummary`].
#[derive(Debug, Clone)]
pub struct Aggregator {
    summary: UploadSummary,
}

impl Aggregator {
    pub fn new(total_lines: usize, total_chunks: usize) -> Self {
        Self {
            summary: UploadSummary::new(total_lines, total_chunks),
        }
    }

    pub fn summary(&self) -> &UploadSummary {
        &self.summary
    }

    /// Fold one outcome in. Outcomes arriving after the job is terminal
    /// are ignored.
    pub fn record(&mut self, outcome: &ChunkOutcome) -> &UploadSummary {
        if self.summary.is_terminal() {
            return &self.summary;
        }

        let mut next = self.summary.clone();
        next.processed_lines += outcome.size;
        next.valid_total += outcome.valid_count;
        next.invalid_total += outcome.invalid_count;
        next.duplicate_total += outcome.duplicate_count;
        next.chunks_done += 1;
        if outcome.failed {
            next.failed_chunks += 1;
        }
        next.percent_complete = percent_complete(next.processed_lines, next.total_lines, false);
        next.status_message = format!(
            "Chunk {}/{} {} ({}/{} lines)",
            outcome.chunk_index + 1,
            next.total_chunks,
            if outcome.failed { "failed" } else { "sent" },
            next.processed_lines,
            next.total_lines
        );

        self.summary = next;
        &self.summary
    }

    /// Freeze the summary in its terminal state.
    pub fn finish(&mut self, cancelled: bool) -> UploadSummary {
        if !self.summary.is_terminal() {
            let state = if cancelled && self.summary.chunks_done < self.summary.total_chunks {
                JobState::Cancelled
            } else if self.summary.failed_chunks > 0 {
                JobState::PartiallyFailed
            } else {
                JobState::Succeeded
            };

            self.summary.state = state;
            self.summary.percent_complete =
                percent_complete(self.summary.processed_lines, self.summary.total_lines, true);
            self.summary.status_message = self.summary.completion_message();
        }
        self.summary.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(index: usize, size: usize, valid: usize, invalid: usize, dup: usize) -> ChunkOutcome {
        ChunkOutcome::succeeded(index, size, &IngestCounts::new(valid, invalid, dup), 1)
    }

    #[test]
    fn test_running_sums() {
        let mut agg = Aggregator::new(1_500, 2);
        agg.record(&ok(0, 1_000, 950, 40, 10));
        let s = agg.record(&ok(1, 500, 490, 10, 0)).clone();

        assert_eq!(s.processed_lines, 1_500);
        assert_eq!(s.valid_total, 1_440);
        assert_eq!(s.invalid_total, 50);
        assert_eq!(s.duplicate_total, 10);
        assert_eq!(s.state, JobState::Uploading);
        assert_eq!(s.percent_complete, 99);

        let done = agg.finish(false);
        assert_eq!(done.state, JobState::Succeeded);
        assert_eq!(done.percent_complete, 100);
        assert_eq!(done.valid_total + done.invalid_total + done.duplicate_total, 1_500);
    }

    #[test]
    fn test_failed_chunk_counts_as_invalid() {
        let mut agg = Aggregator::new(1_000, 2);
        agg.record(&ok(0, 500, 500, 0, 0));
        agg.record(&ChunkOutcome::failed(1, 500, "HTTP 504", 3));

        let done = agg.finish(false);
        assert_eq!(done.invalid_total, 500);
        assert_eq!(done.failed_chunks, 1);
        assert_eq!(done.processed_lines, 1_000);
        assert_eq!(done.state, JobState::PartiallyFailed);
        assert!(done.status_message.contains("1 failed chunk"));
    }

    #[test]
    fn test_fully_failed_job_reports_all_invalid() {
        let mut agg = Aggregator::new(700, 2);
        agg.record(&ChunkOutcome::failed(0, 500, "timeout", 1));
        agg.record(&ChunkOutcome::failed(1, 200, "timeout", 1));
        let done = agg.finish(false);
        assert_eq!(done.invalid_total, done.total_lines);
        assert_eq!(done.success_rate(), 0.0);
    }

    #[test]
    fn test_percent_monotonic_and_100_only_when_terminal() {
        // 100_001 lines in 5_000-line chunks: the last chunk holds 1 line
        let total = 100_001;
        let mut agg = Aggregator::new(total, 21);
        let mut last = 0;
        for i in 0..21 {
            let size = if i == 20 { 1 } else { 5_000 };
            let s = agg.record(&ok(i, size, size, 0, 0));
            assert!(s.percent_complete >= last);
            assert!(s.percent_complete < 100);
            last = s.percent_complete;
        }
        assert_eq!(agg.finish(false).percent_complete, 100);
    }

    #[test]
    fn test_cancelled_keeps_partial_totals() {
        let mut agg = Aggregator::new(1_500, 3);
        agg.record(&ok(0, 500, 480, 20, 0));
        let done = agg.finish(true);

        assert_eq!(done.state, JobState::Cancelled);
        assert_eq!(done.valid_total, 480);
        assert_eq!(done.processed_lines, 500);
        assert_eq!(done.percent_complete, 33);
        assert!(done.status_message.contains("cancelled after 1 of 3"));
    }

    #[test]
    fn test_terminal_summary_is_frozen() {
        let mut agg = Aggregator::new(500, 1);
        agg.record(&ok(0, 500, 500, 0, 0));
        let done = agg.finish(false);
        let after = agg.record(&ok(1, 500, 500, 0, 0)).clone();
        assert_eq!(after, done);
    }

    #[test]
    fn test_percent_rounding() {
        assert_eq!(percent_complete(1, 3, false), 33);
        assert_eq!(percent_complete(2, 3, false), 67);
        assert_eq!(percent_complete(3, 3, false), 99);
        assert_eq!(percent_complete(3, 3, true), 100);
        assert_eq!(percent_complete(0, 0, true), 100);
    }

    #[test]
    fn test_progress_payload() {
        let mut agg = Aggregator::new(1_000, 2);
        let progress = agg.record(&ok(0, 500, 500, 0, 0)).progress();
        assert_eq!(progress.current, 500);
        assert_eq!(progress.total, 1_000);
        assert_eq!(progress.percent, 50);
        assert!(progress.status.starts_with("Chunk 1/2"));
    }
}

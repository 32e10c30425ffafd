//! Chunk planning.
//!
//! Splits a [`LineSet`](crate::reader::LineSet) into contiguous, ordered,
//! fixed-size chunks. The chunk size depends only on the total line count,
//! through a small tier table: large files get fewer, bigger chunks; small
//! files get small chunks so a failed request loses little.
//!
//! | total lines `N`          | chunk size |
//! |--------------------------|-----------:|
//! | `N > 100_000`            | 5_000      |
//! | `10_000 < N <= 100_000`  | 2_000      |
//! | `1_000 < N <= 10_000`    | 1_000      |
//! | `N <= 1_000`             | 500        |

use serde::Serialize;

/// One row of the tier table: files with more than `above` lines use
/// chunks of `chunk_size` lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkTier {
    pub above: usize,
    pub chunk_size: usize,
}

/// Tier table, highest threshold first. The last row must have `above == 0`.
pub const CHUNK_TIERS: [ChunkTier; 4] = [
    ChunkTier {
        above: 100_000,
        chunk_size: 5_000,
    },
    ChunkTier {
        above: 10_000,
        chunk_size: 2_000,
    },
    ChunkTier {
        above: 1_000,
        chunk_size: 1_000,
    },
    ChunkTier {
        above: 0,
        chunk_size: 500,
    },
];

/// Chunk size for a file of `total_lines` lines.
pub fn chunk_size_for(total_lines: usize) -> usize {
    CHUNK_TIERS
        .iter()
        .find(|tier| total_lines > tier.above)
        .map(|tier| tier.chunk_size)
        .unwrap_or(CHUNK_TIERS[CHUNK_TIERS.len() - 1].chunk_size)
}

/// A contiguous slice of the file's lines, sent as one upload request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    /// 0-based position in the plan
    pub index: usize,
    /// Index of the first line of this chunk in the whole file
    pub offset: usize,
    pub lines: &'a [String],
}

impl<'a> Chunk<'a> {
    pub fn size(&self) -> usize {
        self.lines.len()
    }

    /// Materialize the chunk as UTF-8 text, one record per line.
    pub fn to_payload(&self) -> Vec<u8> {
        let capacity = self.lines.iter().map(|l| l.len() + 1).sum();
        let mut payload = Vec::with_capacity(capacity);
        for line in self.lines {
            payload.extend_from_slice(line.as_bytes());
            payload.push(b'\n');
        }
        payload
    }
}

/// The full, ordered list of chunks for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan<'a> {
    pub total_lines: usize,
    pub chunk_size: usize,
    pub chunks: Vec<Chunk<'a>>,
}

impl<'a> ChunkPlan<'a> {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Chunk<'a>> {
        self.chunks.iter()
    }

    /// Size of every chunk, in order.
    pub fn sizes(&self) -> Vec<usize> {
        self.chunks.iter().map(Chunk::size).collect()
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            total_lines: self.total_lines,
            chunk_size: self.chunk_size,
            total_chunks: self.chunks.len(),
            last_chunk_size: self.chunks.last().map(Chunk::size).unwrap_or(0),
        }
    }
}

/// Serializable description of a plan, for the CLI and the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    pub total_lines: usize,
    pub chunk_size: usize,
    pub total_chunks: usize,
    pub last_chunk_size: usize,
}

/// Partition `lines` into `ceil(N / C)` chunks of `C = chunk_size_for(N)`
/// lines, the last one holding the remainder.
///
/// Deterministic: the same input always yields the same boundaries.
pub fn plan_chunks(lines: &[String]) -> ChunkPlan<'_> {
    let total_lines = lines.len();
    let chunk_size = chunk_size_for(total_lines);

    let chunks = lines
        .chunks(chunk_size)
        .enumerate()
        .map(|(index, slice)| Chunk {
            index,
            offset: index * chunk_size,
            lines: slice,
        })
        .collect();

    ChunkPlan {
        total_lines,
        chunk_size,
        chunks,
    }
}

//! Core data types and structures for chunked raster processing

use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Numeric type of every band value
pub type Sample = f64;

/// Sentinel marking an absent or invalid band value
pub const NODATA: Sample = f64::NAN;

/// 3D raster (band x row x column)
pub type Raster = Array3<Sample>;

/// Batch of pixel-vectors (band x pixel) as seen by a transform
pub type BandVectors = Array2<Sample>;

/// Rectangular region of the row/column plane. The band axis is always full depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Chunk {
    pub col_off: usize,
    pub row_off: usize,
    pub cols: usize,
    pub rows: usize,
}

impl Chunk {
    pub fn new(col_off: usize, row_off: usize, cols: usize, rows: usize) -> Self {
        Self { col_off, row_off, cols, rows }
    }

    /// One past the last row, or `None` if it does not fit in `usize`
    pub fn row_end(&self) -> Option<usize> {
        self.row_off.checked_add(self.rows)
    }

    /// One past the last column, or `None` if it does not fit in `usize`
    pub fn col_end(&self) -> Option<usize> {
        self.col_off.checked_add(self.cols)
    }

    /// Rows covered by this chunk
    pub fn row_range(&self) -> Range<usize> {
        self.row_off..self.row_off.saturating_add(self.rows)
    }

    /// Columns covered by this chunk
    pub fn col_range(&self) -> Range<usize> {
        self.col_off..self.col_off.saturating_add(self.cols)
    }

    /// True if the chunk lies inside a `rows` x `cols` plane
    pub fn fits_within(&self, rows: usize, cols: usize) -> bool {
        matches!((self.row_end(), self.col_end()), (Some(r), Some(c)) if r <= rows && c <= cols)
    }

    /// Degenerate chunks produce no work
    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }

    pub fn pixel_count(&self) -> usize {
        self.rows * self.cols
    }
}

impl From<(usize, usize, usize, usize)> for Chunk {
    fn from((col_off, row_off, cols, rows): (usize, usize, usize, usize)) -> Self {
        Self::new(col_off, row_off, cols, rows)
    }
}

impl From<Chunk> for (usize, usize, usize, usize) {
    fn from(chunk: Chunk) -> Self {
        (chunk.col_off, chunk.row_off, chunk.cols, chunk.rows)
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rows {}..{} cols {}..{}",
            self.row_off,
            self.row_off.saturating_add(self.rows),
            self.col_off,
            self.col_off.saturating_add(self.cols)
        )
    }
}

/// Lifecycle of a single chunk inside a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Pending,
    Reading,
    Processing,
    Writing,
    Done,
}

impl fmt::Display for ChunkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkState::Pending => write!(f, "pending"),
            ChunkState::Reading => write!(f, "reading"),
            ChunkState::Processing => write!(f, "processing"),
            ChunkState::Writing => write!(f, "writing"),
            ChunkState::Done => write!(f, "done"),
        }
    }
}

/// A chunk whose transform failed; its output region was left as no data
#[derive(Debug, Clone)]
pub struct ChunkFailure {
    pub chunk: Chunk,
    /// Stage the chunk was in when it failed
    pub state: ChunkState,
    /// One-line error text
    pub message: String,
    /// Full diagnostic: error chain with backtrace, or panic payload
    pub detail: String,
}

impl fmt::Display for ChunkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunk {} ({}): {}", self.chunk, self.state, self.message)
    }
}

/// Outcome of one run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Number of chunks dispatched, including empty ones
    pub chunks: usize,
    pub empty_chunks: usize,
    pub failures: Vec<ChunkFailure>,
}

impl RunSummary {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Error types for chunked processing
#[derive(Debug, thiserror::Error)]
pub enum MultiToolError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Shared buffer name already in use: {0}")]
    NameCollision(String),

    #[error("Shared buffer not found: {0}")]
    BufferNotFound(String),

    #[error("Shared buffer allocation failed: {0}")]
    Allocation(String),

    #[error("Region mismatch: {0}")]
    RegionMismatch(String),

    #[error("Failed to read chunk {chunk}: {source:#}")]
    Read {
        chunk: Chunk,
        source: anyhow::Error,
    },

    #[error("Failed to write chunk {chunk}: {source:#}")]
    Write {
        chunk: Chunk,
        source: anyhow::Error,
    },

    #[error("Worker pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("Chunk processing failed: {0}")]
    ChunkFailed(ChunkFailure),
}

/// Result type for multitool operations
pub type MtResult<T> = Result<T, MultiToolError>;

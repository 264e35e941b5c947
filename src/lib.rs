//! multitool: chunked parallel processing of multi-band raster arrays
//!
//! A (band, row, column) array is split into row chunks. Each chunk is read,
//! masked for no data, passed through a user-supplied pixel-wise transform on
//! a pool of worker threads, and written into a shared output buffer. A chunk
//! whose transform fails is logged and left as no data; the rest of the run
//! carries on.
//!
//! ```no_run
//! use multitool::{ElementWise, MultiTool, MultiToolParams};
//! use ndarray::Array3;
//!
//! let input = Array3::<f64>::zeros((10, 100, 100));
//! let params = MultiToolParams { bands_out: 10, chunks: 100, workers: 2, ..Default::default() };
//! let tool = MultiTool::with_params(ElementWise(|x: f64| x.sqrt() + 1.0), params);
//! let output = tool.process_array(&input)?;
//! assert_eq!(output.dim(), (10, 100, 100));
//! # Ok::<(), multitool::MultiToolError>(())
//! ```

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    Chunk, ChunkFailure, ChunkState, MtResult, MultiToolError, Raster, RunSummary, Sample, NODATA,
};

pub use io::{ArrayReader, ChunkReader, ChunkWriter};

pub use crate::core::{
    chunk_rows, ElementWise, MultiTool, MultiToolParams, Passthrough, PixelTransform, SharedArray,
    SharedArrayRegistry,
};

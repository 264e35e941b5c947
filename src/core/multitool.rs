use crate::core::chunk::chunk_rows;
use crate::core::shared_array::{BufferLease, SharedArrayRegistry};
use crate::core::transform::PixelTransform;
use crate::core::worker::{ChunkOutcome, WorkerContext};
use crate::io::{ArrayReader, ChunkReader, ChunkWriter};
use crate::types::{Chunk, MtResult, MultiToolError, Raster, RunSummary, Sample};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Run configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiToolParams {
    /// Number of output bands; output is (bands_out x rows x cols)
    pub bands_out: usize,
    /// Number of row chunks
    pub chunks: usize,
    /// Number of worker threads (1 = sequential, no pool)
    pub workers: usize,
    /// Skip pixels where any band is no data
    pub drop_nodata: bool,
    /// Abort the run on the first failed chunk instead of leaving it as no data
    pub fail_fast: bool,
}

impl Default for MultiToolParams {
    fn default() -> Self {
        Self {
            bands_out: 1,
            chunks: 100,
            workers: 2,
            drop_nodata: false,
            fail_fast: false,
        }
    }
}

impl MultiToolParams {
    pub fn validate(&self) -> MtResult<()> {
        if self.bands_out == 0 {
            return Err(MultiToolError::InvalidConfig(
                "number of output bands must be at least 1".to_string(),
            ));
        }
        if self.chunks == 0 {
            return Err(MultiToolError::InvalidConfig(
                "chunk count must be at least 1".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(MultiToolError::InvalidConfig(
                "worker count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Applies a pixel-wise transform to a (band, row, col) array, chunk by chunk
pub struct MultiTool<T> {
    transform: T,
    params: MultiToolParams,
    registry: Arc<SharedArrayRegistry>,
}

impl<T: PixelTransform> MultiTool<T> {
    /// Create a processor with default parameters
    pub fn new(transform: T) -> Self {
        Self::with_params(transform, MultiToolParams::default())
    }

    /// Create a processor with custom parameters
    pub fn with_params(transform: T, params: MultiToolParams) -> Self {
        Self {
            transform,
            params,
            registry: Arc::new(SharedArrayRegistry::new()),
        }
    }

    /// Allocate output buffers in `registry` instead of a private one
    pub fn with_registry(mut self, registry: Arc<SharedArrayRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn params(&self) -> &MultiToolParams {
        &self.params
    }

    pub fn registry(&self) -> &Arc<SharedArrayRegistry> {
        &self.registry
    }

    /// Number of CPUs available to this process
    pub fn cpu_count() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Row chunks for an array of `shape` (bands, rows, cols)
    pub fn chunk(shape: (usize, usize, usize), nchunks: usize) -> MtResult<Vec<Chunk>> {
        chunk_rows(shape, nchunks)
    }

    /// Process an in-memory array
    pub fn process_array(&self, input: &Array3<Sample>) -> MtResult<Raster> {
        let reader = ArrayReader::new(input.view());
        self.read_and_process(input.dim(), &reader)
    }

    /// Process an array of `shape` (bands, rows, cols) whose regions come from `reader`.
    ///
    /// Output goes to a freshly allocated shared buffer which is copied out and
    /// freed before returning, including when the run fails.
    pub fn read_and_process<R: ChunkReader>(
        &self,
        shape: (usize, usize, usize),
        reader: &R,
    ) -> MtResult<Raster> {
        self.params.validate()?;

        let (_, rows, cols) = shape;
        let name = format!("multitool-{}", Uuid::new_v4());
        let output = BufferLease::acquire(&self.registry, &name, (self.params.bands_out, rows, cols))?;

        let summary = self.run(shape, reader, &*output)?;
        if !summary.is_complete() {
            log::warn!(
                "{} of {} chunks failed and were left as no data",
                summary.failures.len(),
                summary.chunks
            );
        }

        let result = output.to_array();
        drop(output);
        Ok(result)
    }

    /// Process with a caller-supplied write path. No buffer is allocated or freed.
    pub fn read_and_process_into<R: ChunkReader, W: ChunkWriter>(
        &self,
        shape: (usize, usize, usize),
        reader: &R,
        writer: &W,
    ) -> MtResult<RunSummary> {
        self.params.validate()?;
        self.run(shape, reader, writer)
    }

    fn run(
        &self,
        shape: (usize, usize, usize),
        reader: &dyn ChunkReader,
        writer: &dyn ChunkWriter,
    ) -> MtResult<RunSummary> {
        let (bands, rows, cols) = shape;
        let chunks = chunk_rows(shape, self.params.chunks)?;

        log::info!(
            "Processing {}x{} array ({} -> {} bands) in {} chunks with {} workers",
            rows,
            cols,
            bands,
            self.params.bands_out,
            chunks.len(),
            self.params.workers
        );
        let start = Instant::now();

        let ctx = WorkerContext::new(
            reader,
            &self.transform,
            writer,
            self.params.bands_out,
            self.params.drop_nodata,
        );

        let outcomes = if self.params.workers == 1 {
            self.process_sequential(&ctx, &chunks)?
        } else {
            self.process_parallel(&ctx, &chunks)?
        };

        let mut summary = RunSummary {
            chunks: chunks.len(),
            ..RunSummary::default()
        };
        for outcome in outcomes {
            match outcome {
                ChunkOutcome::Empty => summary.empty_chunks += 1,
                ChunkOutcome::Done => {}
                ChunkOutcome::Failed(failure) => summary.failures.push(failure),
            }
        }

        log::info!(
            "Processed {} chunks in {:.3}s ({} empty, {} failed)",
            summary.chunks,
            start.elapsed().as_secs_f64(),
            summary.empty_chunks,
            summary.failures.len()
        );

        Ok(summary)
    }

    fn check(&self, outcome: MtResult<ChunkOutcome>) -> MtResult<ChunkOutcome> {
        match outcome? {
            ChunkOutcome::Failed(failure) if self.params.fail_fast => {
                Err(MultiToolError::ChunkFailed(failure))
            }
            other => Ok(other),
        }
    }

    /// Process chunks one after another in the calling thread
    fn process_sequential(
        &self,
        ctx: &WorkerContext<'_>,
        chunks: &[Chunk],
    ) -> MtResult<Vec<ChunkOutcome>> {
        log::debug!("Running {} chunks sequentially", chunks.len());
        chunks
            .iter()
            .map(|chunk| self.check(ctx.process_chunk(chunk)))
            .collect()
    }

    /// Process chunks on a dedicated pool of `workers` threads
    #[cfg(feature = "parallel")]
    fn process_parallel(
        &self,
        ctx: &WorkerContext<'_>,
        chunks: &[Chunk],
    ) -> MtResult<Vec<ChunkOutcome>> {
        use rayon::prelude::*;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.params.workers)
            .thread_name(|i| format!("multitool-worker-{}", i))
            .build()?;

        log::debug!(
            "Dispatching {} chunks to {} worker threads",
            chunks.len(),
            pool.current_num_threads()
        );

        pool.install(|| {
            chunks
                .par_iter()
                .with_max_len(1)
                .map(|chunk| self.check(ctx.process_chunk(chunk)))
                .collect()
        })
    }

    #[cfg(not(feature = "parallel"))]
    fn process_parallel(
        &self,
        ctx: &WorkerContext<'_>,
        chunks: &[Chunk],
    ) -> MtResult<Vec<ChunkOutcome>> {
        log::warn!(
            "Built without the parallel feature; running {} workers' chunks sequentially",
            self.params.workers
        );
        self.process_sequential(ctx, chunks)
    }
}

//! Per-chunk execution: read, mask, transform, write back

use crate::core::transform::PixelTransform;
use crate::io::{ChunkReader, ChunkWriter};
use crate::types::{
    BandVectors, Chunk, ChunkFailure, ChunkState, MtResult, MultiToolError, Raster, Sample, NODATA,
};
use ndarray::{Array2, Array3, ArrayD, ArrayView2, ArrayView3, Axis, Ix3};
use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

thread_local! {
    // Panic location and stack recorded by the hook, before unwinding starts
    static PANIC_TRACE: RefCell<Option<String>> = RefCell::new(None);
}

static PANIC_RECORDER: Once = Once::new();

/// Chain a panic hook that keeps the panicking thread's backtrace for the worker
fn install_panic_recorder() {
    PANIC_RECORDER.call_once(|| {
        let default_hook = panic::take_hook();
        panic::set_hook(Box::new(move |panic_info| {
            let location = panic_info
                .location()
                .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
                .unwrap_or_else(|| "unknown location".to_string());
            let trace = format!(
                "panicked at {}\nstack backtrace:\n{}",
                location,
                Backtrace::force_capture()
            );
            let _ = PANIC_TRACE.try_with(|slot| *slot.borrow_mut() = Some(trace));

            default_hook(panic_info);
        }));
    });
}

/// Result of processing one chunk
#[derive(Debug, Clone)]
pub enum ChunkOutcome {
    /// Zero-sized chunk; nothing was read or written
    Empty,
    Done,
    /// The transform failed and the region was written as no data
    Failed(ChunkFailure),
}

/// Everything a worker needs, built once per run and shared by every worker thread
pub struct WorkerContext<'a> {
    reader: &'a dyn ChunkReader,
    transform: &'a dyn PixelTransform,
    writer: &'a dyn ChunkWriter,
    bands_out: usize,
    drop_nodata: bool,
}

impl<'a> WorkerContext<'a> {
    pub fn new(
        reader: &'a dyn ChunkReader,
        transform: &'a dyn PixelTransform,
        writer: &'a dyn ChunkWriter,
        bands_out: usize,
        drop_nodata: bool,
    ) -> Self {
        install_panic_recorder();
        Self {
            reader,
            transform,
            writer,
            bands_out,
            drop_nodata,
        }
    }

    /// Run one chunk through read, transform and write.
    ///
    /// Transform failures are logged and reported as [`ChunkOutcome::Failed`];
    /// read and write failures abort the run.
    pub fn process_chunk(&self, chunk: &Chunk) -> MtResult<ChunkOutcome> {
        trace_state(chunk, ChunkState::Pending);
        if chunk.is_empty() {
            log::trace!("Skipping empty chunk {}", chunk);
            return Ok(ChunkOutcome::Empty);
        }

        trace_state(chunk, ChunkState::Reading);
        let data = self
            .reader
            .read(chunk)
            .map_err(|source| MultiToolError::Read { chunk: *chunk, source })?;
        let data = normalize_region(data, chunk)?;

        trace_state(chunk, ChunkState::Processing);
        let mut output = Array3::from_elem((self.bands_out, chunk.rows, chunk.cols), NODATA);
        let valid = valid_mask(data.view(), self.drop_nodata);

        let failure = match self.transform_valid(data.view(), valid.view(), &mut output) {
            Ok(()) => None,
            Err((message, detail)) => {
                log::error!("Error processing chunk {}: {}\n{}", chunk, message, detail);
                Some(ChunkFailure {
                    chunk: *chunk,
                    state: ChunkState::Processing,
                    message,
                    detail,
                })
            }
        };

        trace_state(chunk, ChunkState::Writing);
        self.writer
            .write(output.view(), chunk)
            .map_err(|source| MultiToolError::Write { chunk: *chunk, source })?;

        trace_state(chunk, ChunkState::Done);
        Ok(match failure {
            Some(failure) => ChunkOutcome::Failed(failure),
            None => ChunkOutcome::Done,
        })
    }

    /// Transform the valid pixel-vectors of `data` and scatter them into `output`.
    /// `output` is left untouched on failure.
    fn transform_valid(
        &self,
        data: ArrayView3<'_, Sample>,
        valid: ArrayView2<'_, bool>,
        output: &mut Raster,
    ) -> Result<(), (String, String)> {
        let (pixels, positions) = gather_valid(data, valid);
        if positions.is_empty() {
            return Ok(());
        }

        let result = invoke(self.transform, pixels.view())?;

        let expected = (self.bands_out, positions.len());
        if result.dim() != expected {
            let message = format!(
                "transform returned shape {:?}, expected {:?} (output bands x valid pixels)",
                result.dim(),
                expected
            );
            return Err((message.clone(), message));
        }

        for (i, &(row, col)) in positions.iter().enumerate() {
            for band in 0..self.bands_out {
                output[[band, row, col]] = result[[band, i]];
            }
        }

        Ok(())
    }
}

fn trace_state(chunk: &Chunk, state: ChunkState) {
    log::trace!("Chunk {} -> {}", chunk, state);
}

/// Call the transform, turning both errors and panics into (message, detail)
fn invoke(
    transform: &dyn PixelTransform,
    pixels: ArrayView2<'_, Sample>,
) -> Result<BandVectors, (String, String)> {
    PANIC_TRACE.with(|slot| slot.borrow_mut().take());

    match panic::catch_unwind(AssertUnwindSafe(|| transform.apply(pixels))) {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(err)) => {
            let message = format!("{:#}", err);
            let detail = match err.backtrace().status() {
                BacktraceStatus::Captured => format!("{:?}", err),
                _ => format!(
                    "{:?}\n\nstack backtrace:\n{}",
                    err,
                    Backtrace::force_capture()
                ),
            };
            Err((message, detail))
        }
        Err(payload) => {
            let message = format!("transform panicked: {}", panic_message(&*payload));
            let trace = PANIC_TRACE
                .with(|slot| slot.borrow_mut().take())
                .unwrap_or_else(|| format!("stack backtrace:\n{}", Backtrace::force_capture()));
            Err((message.clone(), format!("{}\n{}", message, trace)))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Bring a read region to (band, row, col) and check it covers `chunk`
pub fn normalize_region(data: ArrayD<Sample>, chunk: &Chunk) -> MtResult<Raster> {
    let data = match data.ndim() {
        2 => data.insert_axis(Axis(0)),
        3 => data,
        n => {
            return Err(MultiToolError::RegionMismatch(format!(
                "reader returned a {}-dimensional array for chunk {}",
                n, chunk
            )))
        }
    };

    let data = data
        .into_dimensionality::<Ix3>()
        .map_err(|e| MultiToolError::RegionMismatch(e.to_string()))?;

    let (_, rows, cols) = data.dim();
    if rows != chunk.rows || cols != chunk.cols {
        return Err(MultiToolError::RegionMismatch(format!(
            "reader returned {}x{} pixels for chunk {}",
            rows, cols, chunk
        )));
    }

    Ok(data)
}

/// Per-pixel validity. With `drop_nodata` a pixel is valid only if no band is NaN.
pub fn valid_mask(data: ArrayView3<'_, Sample>, drop_nodata: bool) -> Array2<bool> {
    if drop_nodata {
        data.map_axis(Axis(0), |pixel| pixel.iter().all(|v| !v.is_nan()))
    } else {
        let (_, rows, cols) = data.dim();
        Array2::from_elem((rows, cols), true)
    }
}

/// Collect valid pixel-vectors into a (bands, count) array, with their (row, col) positions
fn gather_valid(
    data: ArrayView3<'_, Sample>,
    valid: ArrayView2<'_, bool>,
) -> (BandVectors, Vec<(usize, usize)>) {
    let positions: Vec<(usize, usize)> = valid
        .indexed_iter()
        .filter(|(_, is_valid)| **is_valid)
        .map(|(pos, _)| pos)
        .collect();

    let bands = data.len_of(Axis(0));
    let pixels = Array2::from_shape_fn((bands, positions.len()), |(band, i)| {
        let (row, col) = positions[i];
        data[[band, row, col]]
    });

    (pixels, positions)
}

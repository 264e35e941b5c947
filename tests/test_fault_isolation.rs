use multitool::{
    ArrayReader, Chunk, ChunkState, MultiTool, MultiToolError, MultiToolParams, SharedArrayRegistry,
};
use ndarray::{Array, Array2, Array3, ArrayD, ArrayView2};
use std::sync::Arc;

/// Marker value planted in exactly one chunk's rows
const POISON: f64 = -1.0;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 100 rows in 10 chunks; rows 40..50 hold the poison marker
fn poisoned_input() -> Array3<f64> {
    Array::from_shape_fn((2, 100, 16), |(_, r, c)| {
        if (40..50).contains(&r) {
            POISON
        } else {
            (r * 16 + c) as f64
        }
    })
}

fn params(workers: usize) -> MultiToolParams {
    MultiToolParams {
        bands_out: 2,
        chunks: 10,
        workers,
        ..MultiToolParams::default()
    }
}

fn reject_poison(pixels: ArrayView2<'_, f64>) -> anyhow::Result<Array2<f64>> {
    if pixels.iter().any(|&v| v == POISON) {
        anyhow::bail!("negative reflectance in input");
    }
    Ok(pixels.mapv(|x| x.sqrt() + 1.0))
}

fn panic_on_poison(pixels: ArrayView2<'_, f64>) -> anyhow::Result<Array2<f64>> {
    assert!(pixels.iter().all(|&v| v != POISON), "poisoned pixels reached the model");
    Ok(pixels.mapv(|x| x.sqrt() + 1.0))
}

fn assert_only_poisoned_chunk_missing(input: &Array3<f64>, output: &Array3<f64>) {
    for ((band, row, col), value) in output.indexed_iter() {
        if (40..50).contains(&row) {
            assert!(value.is_nan(), "row {} should be no data", row);
        } else {
            assert_eq!(*value, input[[band, row, col]].sqrt() + 1.0);
        }
    }
}

#[test]
fn test_failing_chunk_left_as_nodata() {
    init_logging();
    let input = poisoned_input();

    for workers in [1, 2, 4] {
        let output = MultiTool::with_params(reject_poison, params(workers))
            .process_array(&input)
            .expect("chunk failures must not fail the run");
        assert_only_poisoned_chunk_missing(&input, &output);
    }
}

#[test]
fn test_panicking_chunk_left_as_nodata() {
    init_logging();
    let input = poisoned_input();

    for workers in [1, 3] {
        let output = MultiTool::with_params(panic_on_poison, params(workers))
            .process_array(&input)
            .expect("a panicking transform must not fail the run");
        assert_only_poisoned_chunk_missing(&input, &output);
    }
}

#[test]
fn test_summary_reports_failed_region() {
    init_logging();
    let input = poisoned_input();
    let registry = SharedArrayRegistry::new();
    let sink = registry.create("summary", (2, 100, 16)).unwrap();
    let reader = ArrayReader::new(input.view());

    let summary = MultiTool::with_params(reject_poison, params(2))
        .read_and_process_into(input.dim(), &reader, &*sink)
        .unwrap();

    assert_eq!(summary.chunks, 10);
    assert_eq!(summary.failures.len(), 1);
    let failure = &summary.failures[0];
    assert_eq!(failure.chunk, Chunk::new(0, 40, 16, 10));
    assert!(failure.message.contains("negative reflectance"));
    assert_eq!(failure.state, ChunkState::Processing);
    assert_only_poisoned_chunk_missing(&input, &sink.to_array());
}

#[test]
fn test_failure_detail_includes_stack_trace() {
    init_logging();
    let input = poisoned_input();
    let registry = SharedArrayRegistry::new();
    let sink = registry.create("trace", (2, 100, 16)).unwrap();
    let reader = ArrayReader::new(input.view());
    let params = MultiToolParams {
        chunks: 1,
        ..params(1)
    };

    let summary = MultiTool::with_params(reject_poison, params)
        .read_and_process_into(input.dim(), &reader, &*sink)
        .unwrap();

    assert_eq!(summary.failures.len(), 1);
    let detail = summary.failures[0].detail.to_lowercase();
    assert!(detail.contains("negative reflectance"));
    assert!(detail.contains("stack backtrace:"), "no trace in {:?}", detail);
}

#[test]
fn test_fail_fast_turns_chunk_failure_fatal() {
    init_logging();
    let input = poisoned_input();
    let registry = Arc::new(SharedArrayRegistry::new());

    for workers in [1, 2] {
        let params = MultiToolParams {
            fail_fast: true,
            ..params(workers)
        };
        let tool = MultiTool::with_params(reject_poison, params).with_registry(Arc::clone(&registry));

        match tool.process_array(&input) {
            Err(MultiToolError::ChunkFailed(failure)) => {
                assert_eq!(failure.chunk.row_off, 40);
            }
            other => panic!("expected ChunkFailed, got {:?}", other.map(|a| a.dim())),
        }
        assert!(registry.is_empty(), "buffer must be freed on the abort path");
    }
}

#[test]
fn test_read_failure_aborts_run_and_frees_buffer() {
    init_logging();
    let registry = Arc::new(SharedArrayRegistry::new());
    let reader = |chunk: &Chunk| -> anyhow::Result<ArrayD<f64>> {
        if chunk.row_off >= 50 {
            anyhow::bail!("tile {} is missing", chunk.row_off);
        }
        Ok(Array::zeros((1, chunk.rows, chunk.cols)).into_dyn())
    };

    for workers in [1, 2] {
        let tool = MultiTool::with_params(reject_poison, MultiToolParams { bands_out: 1, ..params(workers) })
            .with_registry(Arc::clone(&registry));

        let result = tool.read_and_process((1, 100, 16), &reader);
        assert!(matches!(result, Err(MultiToolError::Read { .. })));
        assert!(registry.is_empty());
    }
}

#[test]
fn test_name_collision_is_fatal() {
    init_logging();
    let registry = SharedArrayRegistry::new();
    registry.create("taken", (1, 1, 1)).unwrap();
    assert!(matches!(
        registry.create("taken", (1, 1, 1)),
        Err(MultiToolError::NameCollision(_))
    ));
    // The existing buffer is untouched
    assert!(registry.attach("taken").unwrap().to_array()[[0, 0, 0]].is_nan());
}

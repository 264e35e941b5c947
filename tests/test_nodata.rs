use multitool::{ElementWise, MultiTool, MultiToolParams, NODATA};
use ndarray::{Array, Array2, ArrayView2};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn masked_input() -> ndarray::Array3<f64> {
    let mut input = Array::from_shape_fn((3, 20, 8), |(b, r, c)| (b + r + c) as f64);
    // One band missing is enough to drop the pixel
    input[[0, 2, 3]] = NODATA;
    input[[2, 11, 0]] = NODATA;
    input[[1, 19, 7]] = NODATA;
    for band in 0..3 {
        input[[band, 5, 5]] = NODATA;
    }
    input
}

fn params(workers: usize, drop_nodata: bool) -> MultiToolParams {
    MultiToolParams {
        bands_out: 3,
        chunks: 6,
        workers,
        drop_nodata,
        ..MultiToolParams::default()
    }
}

/// Produces a defined value for every pixel, even NaN input
fn constant(pixels: ArrayView2<'_, f64>) -> anyhow::Result<Array2<f64>> {
    Ok(Array2::from_elem(pixels.dim(), 42.0))
}

#[test]
fn test_nodata_pixels_stay_nodata() {
    init_logging();
    let input = masked_input();
    let dropped = [(2, 3), (11, 0), (19, 7), (5, 5)];

    for workers in [1, 2] {
        let output = MultiTool::with_params(constant, params(workers, true))
            .process_array(&input)
            .unwrap();

        for ((_, row, col), value) in output.indexed_iter() {
            if dropped.contains(&(row, col)) {
                assert!(value.is_nan(), "pixel ({}, {}) should be no data", row, col);
            } else {
                assert_eq!(*value, 42.0);
            }
        }
    }
}

#[test]
fn test_without_dropping_every_pixel_reaches_the_transform() {
    init_logging();
    let input = masked_input();
    let output = MultiTool::with_params(constant, params(2, false))
        .process_array(&input)
        .unwrap();
    assert!(output.iter().all(|&v| v == 42.0));
}

#[test]
fn test_partial_bands_are_not_transformed() {
    init_logging();
    let input = masked_input();
    let output = MultiTool::with_params(ElementWise(|x: f64| x * 2.0), params(2, true))
        .process_array(&input)
        .unwrap();

    // Surviving band values of a dropped pixel are not copied through
    assert!(output[[1, 2, 3]].is_nan());
    assert_eq!(output[[1, 2, 4]], input[[1, 2, 4]] * 2.0);
}

#[test]
fn test_all_nodata_chunk_skips_transform() {
    init_logging();
    let input = Array::from_elem((2, 10, 4), NODATA);
    fn never_called(_: ArrayView2<'_, f64>) -> anyhow::Result<Array2<f64>> {
        anyhow::bail!("transform should not run on an empty pixel set")
    }

    let params = MultiToolParams {
        bands_out: 2,
        chunks: 2,
        workers: 1,
        drop_nodata: true,
        fail_fast: true,
    };

    let output = MultiTool::with_params(never_called, params)
        .process_array(&input)
        .unwrap();
    assert!(output.iter().all(|v| v.is_nan()));
}

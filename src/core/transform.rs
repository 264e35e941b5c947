use crate::types::{BandVectors, Sample};
use ndarray::ArrayView2;

/// Pixel-wise processing function.
///
/// Receives the valid pixel-vectors of one chunk as a (input bands, pixels)
/// array and must return a (output bands, pixels) array with the pixels in
/// the same order. Implementations are shared by every worker thread and may
/// be called many times concurrently.
pub trait PixelTransform: Send + Sync {
    fn apply(&self, pixels: ArrayView2<'_, Sample>) -> anyhow::Result<BandVectors>;
}

impl<F> PixelTransform for F
where
    F: Fn(ArrayView2<'_, Sample>) -> anyhow::Result<BandVectors> + Send + Sync,
{
    fn apply(&self, pixels: ArrayView2<'_, Sample>) -> anyhow::Result<BandVectors> {
        self(pixels)
    }
}

/// Returns the input unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl PixelTransform for Passthrough {
    fn apply(&self, pixels: ArrayView2<'_, Sample>) -> anyhow::Result<BandVectors> {
        Ok(pixels.to_owned())
    }
}

/// Applies a scalar function to every band value independently
#[derive(Debug, Clone, Copy)]
pub struct ElementWise<F>(pub F);

impl<F> PixelTransform for ElementWise<F>
where
    F: Fn(Sample) -> Sample + Send + Sync,
{
    fn apply(&self, pixels: ArrayView2<'_, Sample>) -> anyhow::Result<BandVectors> {
        Ok(pixels.mapv(&self.0))
    }
}

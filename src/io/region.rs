use crate::types::{Chunk, Sample};
use ndarray::{s, ArrayD, ArrayView3};

/// Source of input regions.
///
/// `read` returns the band values of exactly the chunk's region, either as a
/// (band, row, col) array or as a (row, col) array for single-band sources.
pub trait ChunkReader: Send + Sync {
    fn read(&self, chunk: &Chunk) -> anyhow::Result<ArrayD<Sample>>;
}

/// Sink for processed regions of shape (output bands, chunk rows, chunk cols)
pub trait ChunkWriter: Send + Sync {
    fn write(&self, output: ArrayView3<'_, Sample>, chunk: &Chunk) -> anyhow::Result<()>;
}

impl<F> ChunkReader for F
where
    F: Fn(&Chunk) -> anyhow::Result<ArrayD<Sample>> + Send + Sync,
{
    fn read(&self, chunk: &Chunk) -> anyhow::Result<ArrayD<Sample>> {
        self(chunk)
    }
}

impl<F> ChunkWriter for F
where
    F: Fn(ArrayView3<'_, Sample>, &Chunk) -> anyhow::Result<()> + Send + Sync,
{
    fn write(&self, output: ArrayView3<'_, Sample>, chunk: &Chunk) -> anyhow::Result<()> {
        self(output, chunk)
    }
}

/// Reads regions by slicing an in-memory array
#[derive(Debug, Clone)]
pub struct ArrayReader<'a> {
    data: ArrayView3<'a, Sample>,
}

impl<'a> ArrayReader<'a> {
    pub fn new(data: ArrayView3<'a, Sample>) -> Self {
        Self { data }
    }
}

impl ChunkReader for ArrayReader<'_> {
    fn read(&self, chunk: &Chunk) -> anyhow::Result<ArrayD<Sample>> {
        let (_, rows, cols) = self.data.dim();
        anyhow::ensure!(
            chunk.fits_within(rows, cols),
            "chunk {} is outside the {}x{} input",
            chunk,
            rows,
            cols
        );

        let region = self.data.slice(s![.., chunk.row_range(), chunk.col_range()]);
        Ok(region.to_owned().into_dyn())
    }
}

use crate::types::{Chunk, MtResult, MultiToolError};

/// Divide the row dimension of a (bands, rows, cols) array into `nchunks` row ranges.
///
/// Every chunk spans all columns. The first `nchunks - remainder` chunks get
/// `rows / nchunks` rows and the last `remainder` chunks get one more, so larger
/// chunks always sit at the end of the sequence. When `nchunks` exceeds the row
/// count the leading chunks are empty.
pub fn chunk_rows(shape: (usize, usize, usize), nchunks: usize) -> MtResult<Vec<Chunk>> {
    if nchunks == 0 {
        return Err(MultiToolError::InvalidConfig(
            "chunk count must be at least 1".to_string(),
        ));
    }

    let (_, rows, cols) = shape;
    let base = rows / nchunks;
    let remainder = rows - base * nchunks;
    let first_larger = nchunks - remainder;

    log::debug!(
        "Partitioning {} rows into {} chunks ({} of {} rows, {} of {} rows)",
        rows,
        nchunks,
        first_larger,
        base,
        remainder,
        base + 1
    );

    let mut chunks = Vec::with_capacity(nchunks);
    let mut row_off = 0;
    for i in 0..nchunks {
        let extent = if i < first_larger { base } else { base + 1 };
        chunks.push(Chunk::new(0, row_off, cols, extent));
        row_off += extent;
    }

    Ok(chunks)
}

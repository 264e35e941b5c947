//! Process-wide named output buffers
//!
//! A [`SharedArray`] is a fixed-shape (band, row, column) buffer that many
//! worker threads write into at once. Cells are stored as the bit patterns of
//! `f64` values in `AtomicU64`s, so a worker only needs a shared reference to
//! commit its region. Workers always write disjoint row ranges, which means no
//! lock is taken on the write path; the pool's join point orders every write
//! before the final read-back.
//!
//! Buffers are allocated and freed by name through a [`SharedArrayRegistry`].
//! The registry lock only guards the name table.

use crate::io::ChunkWriter;
use crate::types::{Chunk, MtResult, MultiToolError, Raster, Sample, NODATA};
use ndarray::{Array3, ArrayView3};
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Named (band, row, column) buffer writable through shared references
pub struct SharedArray {
    name: String,
    shape: (usize, usize, usize),
    cells: Box<[AtomicU64]>,
}

impl SharedArray {
    fn new(name: &str, shape: (usize, usize, usize)) -> MtResult<Self> {
        let (bands, rows, cols) = shape;
        let len = bands
            .checked_mul(rows)
            .and_then(|n| n.checked_mul(cols))
            .ok_or_else(|| {
                MultiToolError::InvalidConfig(format!("buffer shape {:?} is too large", shape))
            })?;

        let mut cells = Vec::new();
        cells.try_reserve_exact(len).map_err(|e| {
            MultiToolError::Allocation(format!("{} cells for '{}': {}", len, name, e))
        })?;
        let nodata_bits = NODATA.to_bits();
        cells.extend((0..len).map(|_| AtomicU64::new(nodata_bits)));

        Ok(Self {
            name: name.to_string(),
            shape,
            cells: cells.into_boxed_slice(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Buffer shape as (bands, rows, cols)
    pub fn shape(&self) -> (usize, usize, usize) {
        self.shape
    }

    #[inline]
    fn index(&self, band: usize, row: usize, col: usize) -> usize {
        let (_, rows, cols) = self.shape;
        (band * rows + row) * cols + col
    }

    fn check_bounds(&self, chunk: &Chunk) -> MtResult<()> {
        let (_, rows, cols) = self.shape;
        if !chunk.fits_within(rows, cols) {
            return Err(MultiToolError::RegionMismatch(format!(
                "chunk {} lies outside buffer '{}' of {} rows x {} cols",
                chunk, self.name, rows, cols
            )));
        }
        Ok(())
    }

    /// Overwrite exactly the cells of `chunk` with `data` (bands x chunk rows x chunk cols).
    ///
    /// Concurrent calls are safe as long as their regions are disjoint.
    pub fn write_region(&self, chunk: &Chunk, data: ArrayView3<'_, Sample>) -> MtResult<()> {
        self.check_bounds(chunk)?;

        let expected = (self.shape.0, chunk.rows, chunk.cols);
        if data.dim() != expected {
            return Err(MultiToolError::RegionMismatch(format!(
                "data of shape {:?} does not fit chunk {} of buffer '{}' (expected {:?})",
                data.dim(),
                chunk,
                self.name,
                expected
            )));
        }

        for ((band, row, col), value) in data.indexed_iter() {
            let idx = self.index(band, chunk.row_off + row, chunk.col_off + col);
            self.cells[idx].store(value.to_bits(), Ordering::Relaxed);
        }

        Ok(())
    }

    /// Copy the cells of `chunk` into an owned array
    pub fn read_region(&self, chunk: &Chunk) -> MtResult<Raster> {
        self.check_bounds(chunk)?;

        let shape = (self.shape.0, chunk.rows, chunk.cols);
        Ok(Array3::from_shape_fn(shape, |(band, row, col)| {
            self.load(band, chunk.row_off + row, chunk.col_off + col)
        }))
    }

    /// Copy the whole buffer into an owned array
    pub fn to_array(&self) -> Raster {
        Array3::from_shape_fn(self.shape, |(band, row, col)| self.load(band, row, col))
    }

    #[inline]
    fn load(&self, band: usize, row: usize, col: usize) -> Sample {
        Sample::from_bits(self.cells[self.index(band, row, col)].load(Ordering::Relaxed))
    }
}

impl fmt::Debug for SharedArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedArray")
            .field("name", &self.name)
            .field("shape", &self.shape)
            .finish()
    }
}

impl ChunkWriter for SharedArray {
    fn write(&self, output: ArrayView3<'_, Sample>, chunk: &Chunk) -> anyhow::Result<()> {
        self.write_region(chunk, output)?;
        Ok(())
    }
}

/// Name table for shared output buffers
#[derive(Debug, Default)]
pub struct SharedArrayRegistry {
    buffers: Mutex<HashMap<String, Arc<SharedArray>>>,
}

impl SharedArrayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave the map half-updated.
    fn table(&self) -> MutexGuard<'_, HashMap<String, Arc<SharedArray>>> {
        self.buffers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Allocate a buffer filled with no data. Fails if `name` is already registered.
    pub fn create(&self, name: &str, shape: (usize, usize, usize)) -> MtResult<Arc<SharedArray>> {
        let mut table = self.table();
        if table.contains_key(name) {
            return Err(MultiToolError::NameCollision(name.to_string()));
        }

        let buffer = Arc::new(SharedArray::new(name, shape)?);
        table.insert(name.to_string(), Arc::clone(&buffer));
        log::debug!("Allocated shared buffer '{}' with shape {:?}", name, shape);

        Ok(buffer)
    }

    /// Look up a buffer allocated by another run or component
    pub fn attach(&self, name: &str) -> MtResult<Arc<SharedArray>> {
        self.table()
            .get(name)
            .cloned()
            .ok_or_else(|| MultiToolError::BufferNotFound(name.to_string()))
    }

    /// Free a buffer by name. Outstanding `Arc`s keep the memory alive until dropped.
    pub fn delete(&self, name: &str) -> MtResult<()> {
        match self.table().remove(name) {
            Some(_) => {
                log::debug!("Freed shared buffer '{}'", name);
                Ok(())
            }
            None => Err(MultiToolError::BufferNotFound(name.to_string())),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }
}

/// Buffer allocated for the duration of one run; freed from the registry on drop
pub(crate) struct BufferLease<'a> {
    registry: &'a SharedArrayRegistry,
    buffer: Arc<SharedArray>,
}

impl<'a> BufferLease<'a> {
    pub(crate) fn acquire(
        registry: &'a SharedArrayRegistry,
        name: &str,
        shape: (usize, usize, usize),
    ) -> MtResult<Self> {
        let buffer = registry.create(name, shape)?;
        Ok(Self { registry, buffer })
    }
}

impl Deref for BufferLease<'_> {
    type Target = SharedArray;

    fn deref(&self) -> &SharedArray {
        &self.buffer
    }
}

impl Drop for BufferLease<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.registry.delete(self.buffer.name()) {
            log::warn!("Shared buffer was already released: {}", e);
        }
    }
}

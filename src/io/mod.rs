//! Region readers and writers plugged into the workers

pub mod region;

pub use region::{ArrayReader, ChunkReader, ChunkWriter};

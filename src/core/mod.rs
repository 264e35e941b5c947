//! Core chunked processing modules

pub mod chunk;
pub mod multitool;
pub mod shared_array;
pub mod transform;
pub mod worker;

// Re-export main types
pub use chunk::chunk_rows;
pub use multitool::{MultiTool, MultiToolParams};
pub use shared_array::{SharedArray, SharedArrayRegistry};
pub use transform::{ElementWise, Passthrough, PixelTransform};
pub use worker::{ChunkOutcome, WorkerContext};

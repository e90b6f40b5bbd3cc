//! Pooled buffers and the [`MultiBuffer`] run type that flows through the
//! dispatch pipeline.

mod multi;
mod pool;

pub use multi::MultiBuffer;
pub use pool::{Buffer, BufferPool, PoolStats, DEFAULT_BUFFER_CAPACITY};

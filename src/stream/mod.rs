//! Chunk streaming: fetching, residency, scheduling and accounting.

pub mod buffer_manager;
pub mod loader;
pub mod performance;
pub mod scheduler;
pub mod source;
pub mod store;

pub use buffer_manager::{BufferManager, TickReport};
pub use loader::{ChunkLoader, TrackContext};
pub use performance::{CounterSnapshot, MemoryUsage, PerformanceCounters, PerformanceStats, ProcessMonitor};
pub use scheduler::{PlaybackScheduler, ScheduledSegment};
pub use source::{ByteSource, HttpSource, RangeResponse};
pub use store::ChunkStore;

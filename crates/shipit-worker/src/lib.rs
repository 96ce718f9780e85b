//! Per-queue worker pools that claim jobs and run the registered processor.

pub mod pool;

pub use pool::WorkerPool;

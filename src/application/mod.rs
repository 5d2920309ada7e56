//! Application layer - Generic services that use ports.

pub mod worker;
pub mod worker_loop;

pub use worker::{JobOutcome, JobSettings, JobWorker};
pub use worker_loop::{Backoff, Iteration, LoopSettings, LoopStats, WorkerLoop, WorkerPool};

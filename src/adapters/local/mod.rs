//! Local adapters for development runs and tests.

pub mod fs;
pub mod memory;

pub use fs::FsAdapter;
pub use memory::MemoryQueue;

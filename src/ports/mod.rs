//! Ports - Trait definitions for the worker's collaborators.

pub mod queue;
pub mod storage;
pub mod transcoder;

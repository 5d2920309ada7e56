//! Domain layer - Pure job and profile logic.

pub mod jobs;
pub mod profile;

// Re-export all model types for ease of use

pub mod job;

pub use job::*;

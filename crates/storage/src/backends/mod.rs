//! Storage backends.

pub mod chunks;
pub mod filesystem;

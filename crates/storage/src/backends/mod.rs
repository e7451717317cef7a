//! Chunk store backends.

pub mod filesystem;

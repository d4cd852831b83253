//! Shared helpers for the boltstore benchmarks.

pub mod utils;

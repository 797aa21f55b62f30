//! Compute module - Centroid generation, archive and search.

pub mod evolution;
mod rng;

pub use rng::RandomKey;

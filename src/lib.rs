//! CVT MAP-Elites - Quality-diversity search over a centroidal Voronoi tessellation.
//!
//! MAP-Elites keeps the best solution found so far in each niche of a
//! behaviour-descriptor space. With a centroidal Voronoi tessellation (CVT)
//! the number of niches stays fixed however many descriptor dimensions
//! there are.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Run configuration and report types
//! - `compute`: Random keys, centroids, repertoire, emitters and the search loop
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use cvt_map_elites::compute::evolution::{MapElites, QdMetrics, random_parameters};
//! use cvt_map_elites::schema::QdConfig;
//!
//! let config = QdConfig::default();
//! config.validate().unwrap();
//!
//! let key = config.random_key();
//! let scoring = config.scoring();
//! let (centroids, key) = config
//!     .centroids
//!     .build(scoring.descriptor_dimension(), key)
//!     .unwrap();
//! let emitter = config.emitter.build().unwrap();
//! let search = MapElites::new(scoring, emitter, QdMetrics::new(config.qd_offset()));
//!
//! let (initial, key) = random_parameters(100, 8, 0.0, 1.0, key);
//! let state = search.init(&initial, Arc::new(centroids), key).unwrap();
//! let (state, _) = search.run(state, 50).unwrap();
//!
//! println!("Occupied niches: {}", state.repertoire.occupied_count());
//! ```

pub mod compute;
pub mod schema;

// Re-export commonly used types
pub use compute::RandomKey;
pub use compute::evolution::{Centroids, MapElites, Repertoire, SearchState};
pub use schema::QdConfig;

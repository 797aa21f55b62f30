//! CVT MAP-Elites quality-diversity search.
//!
//! The search keeps one elite per niche of a fixed tessellation of the
//! behaviour-descriptor space and tries to fill and improve every niche.
//!
//! # Overview
//!
//! - **Centroids** (`centroids`): CVT (k-means) and grid tessellations
//! - **Repertoire** (`archive`): one elite per niche, competitive insertion
//! - **Operators** (`genome`): mutation and variation over genotypes
//! - **Emitters** (`emitter`): candidate generation from the repertoire
//! - **Scoring** (`fitness`): fitness and descriptors, plus benchmark tasks
//! - **Metrics** (`metrics`): QD-score, coverage and fitness summaries
//! - **Search** (`search`): the init / update / run loop
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use cvt_map_elites::compute::RandomKey;
//! use cvt_map_elites::compute::evolution::{
//!     BenchmarkScoring, CvtParams, DescriptorBounds, GaussianMutation, IsolineVariation,
//!     MapElites, MixingEmitter, QdMetrics, compute_cvt_centroids, random_parameters,
//! };
//! use cvt_map_elites::schema::BenchmarkTask;
//!
//! let key = RandomKey::new(0);
//! let bounds = DescriptorBounds::uniform(2, 0.0, 1.0).unwrap();
//! let (centroids, key) = compute_cvt_centroids(&CvtParams::new(50, 1000, bounds), key).unwrap();
//!
//! let scoring = BenchmarkScoring::new(BenchmarkTask::Rastrigin);
//! let emitter = MixingEmitter::new(
//!     GaussianMutation::new(0.05).with_clip(0.0, 1.0),
//!     IsolineVariation::new(0.05, 0.1).with_clip(0.0, 1.0),
//!     0.5,
//!     64,
//! )
//! .unwrap();
//! let metrics = QdMetrics::new(-scoring.min_fitness(8));
//! let search = MapElites::new(scoring, emitter, metrics);
//!
//! let (initial, key) = random_parameters(100, 8, 0.0, 1.0, key);
//! let state = search.init(&initial, Arc::new(centroids), key).unwrap();
//! let (state, history) = search.run(state, 100).unwrap();
//!
//! println!("coverage: {:.1}%", history.last().unwrap()["coverage"]);
//! println!("best: {:?}", state.repertoire.best().map(|e| e.fitness));
//! ```

mod archive;
mod centroids;
mod emitter;
mod fitness;
mod genome;
mod metrics;
mod search;

pub use archive::{Elite, InsertReport, Repertoire, RepertoireError, RepertoireSnapshot};
pub use centroids::{
    CentroidError, Centroids, CvtParams, DEFAULT_MAX_ITERATIONS, DEFAULT_TOLERANCE,
    DescriptorBounds, compute_cvt_centroids, compute_grid_centroids, squared_distance,
};
pub use emitter::{Emitter, EmitterError, MixingEmitter};
pub use fitness::{BenchmarkScoring, Evaluations, ScoringFunction, TaskError};
pub use genome::{
    GaussianMutation, Genotype, IsolineVariation, Mutation, MutationOperator, Parameters,
    PolynomialMutation, Variation, identity_mutation, random_parameters,
};
pub use metrics::{
    COVERAGE, MAX_FITNESS, MEAN_FITNESS, Metrics, MetricsFunction, QD_SCORE, QdMetrics,
};
pub use search::{MapElites, SearchError, SearchState};

//! Configuration types for CVT MAP-Elites runs.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::compute::RandomKey;
use crate::compute::evolution::{
    BenchmarkScoring, CentroidError, Centroids, CvtParams, DEFAULT_MAX_ITERATIONS,
    DEFAULT_TOLERANCE, DescriptorBounds, EmitterError, GaussianMutation, IsolineVariation,
    MixingEmitter, MutationOperator, PolynomialMutation, compute_cvt_centroids,
    compute_grid_centroids,
};

/// Top-level run configuration. Every section has defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QdConfig {
    /// Niche tessellation.
    #[serde(default)]
    pub centroids: CentroidConfig,
    /// Candidate generation.
    #[serde(default)]
    pub emitter: EmitterConfig,
    /// Benchmark task and initial population.
    #[serde(default)]
    pub task: TaskConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub run: RunConfig,
}

/// How the descriptor space is partitioned into niches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CentroidMethod {
    /// Centroidal Voronoi tessellation computed with k-means.
    #[default]
    Cvt,
    /// Regular grid; `num_centroids` is ignored.
    Grid { cells_per_dimension: Vec<usize> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CentroidConfig {
    #[serde(default)]
    pub method: CentroidMethod,
    /// Number of niches (K).
    #[serde(default = "default_num_centroids")]
    pub num_centroids: usize,
    /// Uniform samples clustered by k-means (S >= K).
    #[serde(default = "default_num_init_samples")]
    pub num_init_samples: usize,
    /// Lower descriptor bound, shared by every dimension.
    #[serde(default)]
    pub descriptor_min: f32,
    /// Upper descriptor bound, shared by every dimension.
    #[serde(default = "default_descriptor_max")]
    pub descriptor_max: f32,
    /// k-means iteration cap.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// k-means stops once no centroid moves further than this.
    #[serde(default = "default_tolerance")]
    pub tolerance: f32,
}

impl Default for CentroidConfig {
    fn default() -> Self {
        Self {
            method: CentroidMethod::default(),
            num_centroids: default_num_centroids(),
            num_init_samples: default_num_init_samples(),
            descriptor_min: 0.0,
            descriptor_max: default_descriptor_max(),
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
        }
    }
}

fn default_num_centroids() -> usize {
    50
}
fn default_num_init_samples() -> usize {
    1000
}
fn default_descriptor_max() -> f32 {
    1.0
}
fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}
fn default_tolerance() -> f32 {
    DEFAULT_TOLERANCE
}

impl CentroidConfig {
    pub fn bounds(&self, dimension: usize) -> Result<DescriptorBounds, ConfigError> {
        Ok(DescriptorBounds::uniform(
            dimension,
            self.descriptor_min,
            self.descriptor_max,
        )?)
    }

    /// Build the niche centroids for a `dimension`-dimensional descriptor space.
    pub fn build(
        &self,
        dimension: usize,
        key: RandomKey,
    ) -> Result<(Centroids, RandomKey), ConfigError> {
        let bounds = self.bounds(dimension)?;
        match &self.method {
            CentroidMethod::Cvt => {
                let params = CvtParams::new(self.num_centroids, self.num_init_samples, bounds)
                    .with_max_iterations(self.max_iterations)
                    .with_tolerance(self.tolerance);
                Ok(compute_cvt_centroids(&params, key)?)
            }
            CentroidMethod::Grid {
                cells_per_dimension,
            } => Ok((compute_grid_centroids(cells_per_dimension, &bounds)?, key)),
        }
    }

    fn validate(&self, dimension: usize) -> Result<(), ConfigError> {
        self.bounds(dimension)?;
        match &self.method {
            CentroidMethod::Cvt => {
                if self.num_centroids == 0 {
                    return Err(CentroidError::NoCentroids.into());
                }
                if self.num_init_samples < self.num_centroids {
                    return Err(CentroidError::TooFewSamples {
                        num_centroids: self.num_centroids,
                        num_samples: self.num_init_samples,
                    }
                    .into());
                }
                if self.max_iterations == 0 {
                    return Err(ConfigError::InvalidIterations);
                }
                if self.tolerance.is_nan() || self.tolerance < 0.0 {
                    return Err(ConfigError::InvalidTolerance(self.tolerance));
                }
            }
            CentroidMethod::Grid {
                cells_per_dimension,
            } => {
                if cells_per_dimension.len() != dimension {
                    return Err(CentroidError::GridShapeMismatch {
                        shape: cells_per_dimension.len(),
                        bounds: dimension,
                    }
                    .into());
                }
                if cells_per_dimension.contains(&0) {
                    return Err(CentroidError::NoCentroids.into());
                }
            }
        }
        Ok(())
    }
}

/// Single-parent operator of the mixing emitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MutationConfig {
    Gaussian {
        #[serde(default = "default_mutation_sigma")]
        sigma: f32,
    },
    Polynomial {
        #[serde(default = "default_eta")]
        eta: f32,
        #[serde(default = "default_proportion_to_mutate")]
        proportion_to_mutate: f32,
    },
    Identity,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self::Gaussian {
            sigma: default_mutation_sigma(),
        }
    }
}

fn default_mutation_sigma() -> f32 {
    0.05
}
fn default_eta() -> f32 {
    0.05
}
fn default_proportion_to_mutate() -> f32 {
    0.1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmitterConfig {
    /// Candidates per generation (B).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Probability of using the variation operator for a child.
    #[serde(default = "default_variation_percentage")]
    pub variation_percentage: f32,
    #[serde(default = "default_iso_sigma")]
    pub iso_sigma: f32,
    #[serde(default = "default_line_sigma")]
    pub line_sigma: f32,
    #[serde(default)]
    pub mutation: MutationConfig,
    /// Children are clipped into `[genotype_min, genotype_max]`.
    #[serde(default)]
    pub genotype_min: f32,
    #[serde(default = "default_genotype_max")]
    pub genotype_max: f32,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            variation_percentage: default_variation_percentage(),
            iso_sigma: default_iso_sigma(),
            line_sigma: default_line_sigma(),
            mutation: MutationConfig::default(),
            genotype_min: 0.0,
            genotype_max: default_genotype_max(),
        }
    }
}

fn default_batch_size() -> usize {
    10
}
fn default_variation_percentage() -> f32 {
    0.5
}
fn default_iso_sigma() -> f32 {
    0.05
}
fn default_line_sigma() -> f32 {
    0.1
}
fn default_genotype_max() -> f32 {
    1.0
}

impl EmitterConfig {
    pub fn mutation_operator(&self) -> MutationOperator {
        match self.mutation {
            MutationConfig::Gaussian { sigma } => MutationOperator::Gaussian(
                GaussianMutation::new(sigma).with_clip(self.genotype_min, self.genotype_max),
            ),
            MutationConfig::Polynomial {
                eta,
                proportion_to_mutate,
            } => MutationOperator::Polynomial(PolynomialMutation {
                eta,
                proportion_to_mutate,
                min: self.genotype_min,
                max: self.genotype_max,
            }),
            MutationConfig::Identity => MutationOperator::Identity,
        }
    }

    pub fn variation_operator(&self) -> IsolineVariation {
        IsolineVariation::new(self.iso_sigma, self.line_sigma)
            .with_clip(self.genotype_min, self.genotype_max)
    }

    pub fn build(&self) -> Result<MixingEmitter<MutationOperator, IsolineVariation>, ConfigError> {
        Ok(MixingEmitter::new(
            self.mutation_operator(),
            self.variation_operator(),
            self.variation_percentage,
            self.batch_size,
        )?)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(EmitterError::ZeroBatchSize.into());
        }
        if !(0.0..=1.0).contains(&self.variation_percentage) {
            return Err(EmitterError::InvalidVariationPercentage(self.variation_percentage).into());
        }
        check_non_negative("iso_sigma", self.iso_sigma)?;
        check_non_negative("line_sigma", self.line_sigma)?;
        match self.mutation {
            MutationConfig::Gaussian { sigma } => check_non_negative("sigma", sigma)?,
            MutationConfig::Polynomial {
                eta,
                proportion_to_mutate,
            } => {
                check_non_negative("eta", eta)?;
                if !(0.0..=1.0).contains(&proportion_to_mutate) {
                    return Err(ConfigError::InvalidProportion(proportion_to_mutate));
                }
            }
            MutationConfig::Identity => {}
        }
        if !(self.genotype_min < self.genotype_max)
            || !self.genotype_min.is_finite()
            || !self.genotype_max.is_finite()
        {
            return Err(ConfigError::InvalidGenotypeBounds {
                min: self.genotype_min,
                max: self.genotype_max,
            });
        }
        Ok(())
    }
}

fn check_non_negative(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NegativeParameter { name, value })
    }
}

/// Reference benchmark tasks over genotypes in `[0, 1]^n`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BenchmarkTask {
    /// Negated sphere function; descriptor = means of the two parameter halves.
    #[default]
    Sphere,
    /// Negated Rastrigin function; descriptor = means of the two parameter halves.
    Rastrigin,
    /// Planar arm; fitness = -std of joint angles, descriptor = end effector.
    Arm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    #[serde(default)]
    pub task: BenchmarkTask,
    /// Parameters per genotype.
    #[serde(default = "default_genotype_size")]
    pub genotype_size: usize,
    /// Random genotypes scored to seed the repertoire.
    #[serde(default = "default_initial_batch_size")]
    pub initial_batch_size: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            task: BenchmarkTask::default(),
            genotype_size: default_genotype_size(),
            initial_batch_size: default_initial_batch_size(),
        }
    }
}

fn default_genotype_size() -> usize {
    8
}
fn default_initial_batch_size() -> usize {
    100
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Added to each fitness in the QD-score. Defaults to the magnitude of
    /// the task's worst fitness.
    #[serde(default)]
    pub qd_offset: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Generations after initialisation.
    #[serde(default = "default_iterations")]
    pub iterations: usize,
    /// Random seed for reproducibility; OS entropy when absent.
    #[serde(default)]
    pub random_seed: Option<u64>,
    /// Print progress every this many generations (0 disables).
    #[serde(default = "default_log_interval")]
    pub log_interval: usize,
    /// Where to write the final repertoire, if anywhere.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            random_seed: None,
            log_interval: default_log_interval(),
            snapshot_path: None,
        }
    }
}

fn default_iterations() -> usize {
    100
}
fn default_log_interval() -> usize {
    10
}

impl QdConfig {
    pub fn scoring(&self) -> BenchmarkScoring {
        BenchmarkScoring::new(self.task.task)
    }

    /// Configured QD-score offset, or the task's worst-fitness magnitude.
    pub fn qd_offset(&self) -> f32 {
        self.metrics
            .qd_offset
            .unwrap_or_else(|| -self.scoring().min_fitness(self.task.genotype_size))
    }

    /// Random key for the run.
    pub fn random_key(&self) -> RandomKey {
        self.run
            .random_seed
            .map(RandomKey::new)
            .unwrap_or_else(RandomKey::from_entropy)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let scoring = self.scoring();
        self.centroids.validate(scoring.descriptor_dimension())?;
        self.emitter.validate()?;

        let min_size = scoring.min_genotype_size();
        if self.task.genotype_size < min_size {
            return Err(ConfigError::GenotypeTooSmall {
                task: self.task.task,
                size: self.task.genotype_size,
                min: min_size,
            });
        }
        if self.task.initial_batch_size == 0 {
            return Err(ConfigError::EmptyInitialBatch);
        }
        if let Some(offset) = self.metrics.qd_offset
            && !offset.is_finite()
        {
            return Err(ConfigError::InvalidQdOffset(offset));
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid centroid configuration: {0}")]
    Centroids(#[from] CentroidError),
    #[error("Invalid emitter configuration: {0}")]
    Emitter(#[from] EmitterError),
    #[error("k-means iteration cap must be non-zero")]
    InvalidIterations,
    #[error("k-means tolerance must be non-negative, got {0}")]
    InvalidTolerance(f32),
    #[error("{name} must be non-negative, got {value}")]
    NegativeParameter { name: &'static str, value: f32 },
    #[error("Proportion to mutate must be in [0, 1], got {0}")]
    InvalidProportion(f32),
    #[error("Invalid genotype bounds: min {min} must be below max {max}")]
    InvalidGenotypeBounds { min: f32, max: f32 },
    #[error("{task:?} needs at least {min} parameters per genotype, got {size}")]
    GenotypeTooSmall {
        task: BenchmarkTask,
        size: usize,
        min: usize,
    },
    #[error("Initial batch size must be non-zero")]
    EmptyInitialBatch,
    #[error("QD-score offset must be finite, got {0}")]
    InvalidQdOffset(f32),
}

//! Scoring functions: genotype batch to fitness and behaviour descriptors.
//!
//! Any closure `Fn(&[G], RandomKey) -> Result<(Evaluations, RandomKey), E>`
//! is a scoring function. [`BenchmarkScoring`] provides the reference tasks
//! used by the command line runner.

use std::f32::consts::PI;

#[cfg(not(target_arch = "wasm32"))]
use rayon::prelude::*;

use crate::compute::RandomKey;
use crate::schema::BenchmarkTask;

/// Scores of one batch, index-aligned with the genotypes that produced them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluations {
    pub fitnesses: Vec<f32>,
    pub descriptors: Vec<Vec<f32>>,
}

impl Evaluations {
    pub fn len(&self) -> usize {
        self.fitnesses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fitnesses.is_empty()
    }

    pub fn push(&mut self, fitness: f32, descriptor: Vec<f32>) {
        self.fitnesses.push(fitness);
        self.descriptors.push(descriptor);
    }
}

impl FromIterator<(f32, Vec<f32>)> for Evaluations {
    fn from_iter<I: IntoIterator<Item = (f32, Vec<f32>)>>(iter: I) -> Self {
        let (fitnesses, descriptors) = iter.into_iter().unzip();
        Self {
            fitnesses,
            descriptors,
        }
    }
}

/// Evaluates a whole batch at once.
///
/// Failures are returned to the caller untouched; the search loop never
/// retries or skips candidates.
pub trait ScoringFunction<G> {
    type Error: std::error::Error + Send + Sync + 'static;

    fn score(
        &self,
        genotypes: &[G],
        key: RandomKey,
    ) -> Result<(Evaluations, RandomKey), Self::Error>;
}

impl<G, F, E> ScoringFunction<G> for F
where
    F: Fn(&[G], RandomKey) -> Result<(Evaluations, RandomKey), E>,
    E: std::error::Error + Send + Sync + 'static,
{
    type Error = E;

    fn score(&self, genotypes: &[G], key: RandomKey) -> Result<(Evaluations, RandomKey), E> {
        self(genotypes, key)
    }
}

/// Benchmark task errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("Genotype {index} has {len} parameters, {task:?} needs at least {min}")]
    GenotypeTooShort {
        task: BenchmarkTask,
        index: usize,
        len: usize,
        min: usize,
    },
}

/// Half-width of the search domain the unit genotype is mapped onto.
const DOMAIN_HALF_WIDTH: f32 = 5.12;

/// Deterministic reference tasks over genotypes in `[0, 1]^n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BenchmarkScoring {
    task: BenchmarkTask,
}

impl BenchmarkScoring {
    pub fn new(task: BenchmarkTask) -> Self {
        Self { task }
    }

    pub fn task(&self) -> BenchmarkTask {
        self.task
    }

    /// Descriptor dimension of every task.
    pub fn descriptor_dimension(&self) -> usize {
        2
    }

    /// Smallest number of parameters the task accepts.
    pub fn min_genotype_size(&self) -> usize {
        match self.task {
            BenchmarkTask::Sphere | BenchmarkTask::Rastrigin => 2,
            BenchmarkTask::Arm => 1,
        }
    }

    /// Lower bound of the task fitness for `genotype_size` parameters in `[0, 1]`.
    ///
    /// Its magnitude is the natural QD-score offset.
    pub fn min_fitness(&self, genotype_size: usize) -> f32 {
        let n = genotype_size as f32;
        let x2 = DOMAIN_HALF_WIDTH * DOMAIN_HALF_WIDTH;
        match self.task {
            BenchmarkTask::Sphere => -n * x2,
            BenchmarkTask::Rastrigin => -n * (x2 + 20.0),
            BenchmarkTask::Arm => -0.5,
        }
    }

    /// Fitness and descriptor of a single genotype.
    pub fn evaluate(&self, params: &[f32]) -> (f32, Vec<f32>) {
        match self.task {
            BenchmarkTask::Sphere => {
                let fitness = -params
                    .iter()
                    .map(|&g| to_domain(g).powi(2))
                    .sum::<f32>();
                (fitness, half_means(params))
            }
            BenchmarkTask::Rastrigin => {
                let n = params.len() as f32;
                let sum = params
                    .iter()
                    .map(|&g| {
                        let x = to_domain(g);
                        x * x - 10.0 * (2.0 * PI * x).cos()
                    })
                    .sum::<f32>();
                (-(10.0 * n + sum), half_means(params))
            }
            BenchmarkTask::Arm => (-std_dev(params), arm_end_effector(params)),
        }
    }

    fn check(&self, genotypes: &[Vec<f32>]) -> Result<(), TaskError> {
        let min = self.min_genotype_size();
        match genotypes.iter().position(|g| g.len() < min) {
            Some(index) => Err(TaskError::GenotypeTooShort {
                task: self.task,
                index,
                len: genotypes[index].len(),
                min,
            }),
            None => Ok(()),
        }
    }
}

impl ScoringFunction<Vec<f32>> for BenchmarkScoring {
    type Error = TaskError;

    fn score(
        &self,
        genotypes: &[Vec<f32>],
        key: RandomKey,
    ) -> Result<(Evaluations, RandomKey), TaskError> {
        self.check(genotypes)?;
        Ok((self.evaluate_batch(genotypes), key))
    }
}

impl BenchmarkScoring {
    #[cfg(not(target_arch = "wasm32"))]
    fn evaluate_batch(&self, genotypes: &[Vec<f32>]) -> Evaluations {
        let scored: Vec<(f32, Vec<f32>)> =
            genotypes.par_iter().map(|g| self.evaluate(g)).collect();
        scored.into_iter().collect()
    }

    #[cfg(target_arch = "wasm32")]
    fn evaluate_batch(&self, genotypes: &[Vec<f32>]) -> Evaluations {
        genotypes.iter().map(|g| self.evaluate(g)).collect()
    }
}

fn to_domain(g: f32) -> f32 {
    (2.0 * g - 1.0) * DOMAIN_HALF_WIDTH
}

/// Means of the first and second half of the parameters, clipped to `[0, 1]`.
fn half_means(params: &[f32]) -> Vec<f32> {
    let (first, second) = params.split_at(params.len() / 2);
    vec![mean(first).clamp(0.0, 1.0), mean(second).clamp(0.0, 1.0)]
}

fn mean(values: &[f32]) -> f32 {
    values.iter().sum::<f32>() / values.len() as f32
}

fn std_dev(values: &[f32]) -> f32 {
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f32>() / values.len() as f32).sqrt()
}

/// End effector of a planar arm with unit total length, mapped into `[0, 1]^2`.
///
/// Each parameter is a joint angle relative to the previous segment.
fn arm_end_effector(params: &[f32]) -> Vec<f32> {
    let segment = 1.0 / params.len() as f32;
    let mut angle = 0.0f32;
    let (mut x, mut y) = (0.0f32, 0.0f32);
    for &g in params {
        angle += (g - 0.5) * 2.0 * PI;
        x += segment * angle.cos();
        y += segment * angle.sin();
    }
    vec![(0.5 * x + 0.5).clamp(0.0, 1.0), (0.5 * y + 0.5).clamp(0.0, 1.0)]
}

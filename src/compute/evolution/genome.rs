//! Genotype capabilities and variation operators.
//!
//! The archive never looks inside a genotype: it only clones, selects and
//! overwrites whole values. Operators that need arithmetic ask for the
//! [`Parameters`] capability instead.

use rand::Rng;
use rand::seq::index;
use rand_distr::StandardNormal;

use crate::compute::RandomKey;

/// Anything that can be stored in a repertoire and shipped across threads.
pub trait Genotype: Clone + Send + Sync {}

impl<T: Clone + Send + Sync> Genotype for T {}

/// Flat view over a real-valued genotype.
pub trait Parameters: Genotype {
    fn parameters(&self) -> &[f32];
    fn parameters_mut(&mut self) -> &mut [f32];
}

impl Parameters for Vec<f32> {
    fn parameters(&self) -> &[f32] {
        self
    }

    fn parameters_mut(&mut self) -> &mut [f32] {
        self
    }
}

/// Single-parent operator: `(genotype, key) -> (child, key)`.
pub trait Mutation<G>: Send + Sync {
    fn mutate(&self, genotype: &G, key: RandomKey) -> (G, RandomKey);
}

impl<G, F> Mutation<G> for F
where
    F: Fn(&G, RandomKey) -> (G, RandomKey) + Send + Sync,
{
    fn mutate(&self, genotype: &G, key: RandomKey) -> (G, RandomKey) {
        self(genotype, key)
    }
}

/// Two-parent operator: `(first, second, key) -> (child, key)`.
pub trait Variation<G>: Send + Sync {
    fn vary(&self, first: &G, second: &G, key: RandomKey) -> (G, RandomKey);
}

impl<G, F> Variation<G> for F
where
    F: Fn(&G, &G, RandomKey) -> (G, RandomKey) + Send + Sync,
{
    fn vary(&self, first: &G, second: &G, key: RandomKey) -> (G, RandomKey) {
        self(first, second, key)
    }
}

/// `count` real-valued genotypes of `size` parameters drawn uniformly in `[min, max)`.
pub fn random_parameters(
    count: usize,
    size: usize,
    min: f32,
    max: f32,
    key: RandomKey,
) -> (Vec<Vec<f32>>, RandomKey) {
    let (key, subkey) = key.split();
    let mut rng = subkey.rng();
    let genotypes = (0..count)
        .map(|_| (0..size).map(|_| rng.gen_range(min..max)).collect())
        .collect();
    (genotypes, key)
}

/// Returns the parent unchanged.
pub fn identity_mutation<G: Clone>(genotype: &G, key: RandomKey) -> (G, RandomKey) {
    (genotype.clone(), key)
}

/// Isoline (Iso+LineDD) variation.
///
/// `child = x + iso_sigma * N(0, I) + line_sigma * N(0, 1) * (y - x)`, with a
/// single line coefficient per child. Both parents must have the same number
/// of parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IsolineVariation {
    /// Standard deviation of the isotropic noise.
    pub iso_sigma: f32,
    /// Standard deviation of the line coefficient.
    pub line_sigma: f32,
    /// Optional `(min, max)` clipping of every parameter.
    pub clip: Option<(f32, f32)>,
}

impl IsolineVariation {
    pub fn new(iso_sigma: f32, line_sigma: f32) -> Self {
        Self {
            iso_sigma,
            line_sigma,
            clip: None,
        }
    }

    pub fn with_clip(mut self, min: f32, max: f32) -> Self {
        self.clip = Some((min, max));
        self
    }
}

impl<G: Parameters> Variation<G> for IsolineVariation {
    fn vary(&self, first: &G, second: &G, key: RandomKey) -> (G, RandomKey) {
        debug_assert_eq!(first.parameters().len(), second.parameters().len());
        let (key, subkey) = key.split();
        let mut rng = subkey.rng();

        let line = rng.sample::<f32, _>(StandardNormal) * self.line_sigma;
        let mut child = first.clone();
        for (value, &other) in child.parameters_mut().iter_mut().zip(second.parameters()) {
            let iso = rng.sample::<f32, _>(StandardNormal) * self.iso_sigma;
            let x = *value;
            *value = x + iso + line * (other - x);
        }
        clip(child.parameters_mut(), self.clip);

        (child, key)
    }
}

/// Additive Gaussian noise on every parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianMutation {
    pub sigma: f32,
    pub clip: Option<(f32, f32)>,
}

impl GaussianMutation {
    pub fn new(sigma: f32) -> Self {
        Self { sigma, clip: None }
    }

    pub fn with_clip(mut self, min: f32, max: f32) -> Self {
        self.clip = Some((min, max));
        self
    }
}

impl<G: Parameters> Mutation<G> for GaussianMutation {
    fn mutate(&self, genotype: &G, key: RandomKey) -> (G, RandomKey) {
        let (key, subkey) = key.split();
        let mut rng = subkey.rng();

        let mut child = genotype.clone();
        for value in child.parameters_mut() {
            *value += rng.sample::<f32, _>(StandardNormal) * self.sigma;
        }
        clip(child.parameters_mut(), self.clip);

        (child, key)
    }
}

/// Bounded polynomial mutation applied to a random subset of parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolynomialMutation {
    /// Distribution index; larger values keep children closer to the parent.
    pub eta: f32,
    /// Fraction of parameters mutated per call.
    pub proportion_to_mutate: f32,
    pub min: f32,
    pub max: f32,
}

impl<G: Parameters> Mutation<G> for PolynomialMutation {
    fn mutate(&self, genotype: &G, key: RandomKey) -> (G, RandomKey) {
        let (key, subkey) = key.split();
        let mut rng = subkey.rng();

        let mut child = genotype.clone();
        let params = child.parameters_mut();
        let amount = ((params.len() as f32 * self.proportion_to_mutate) as usize).min(params.len());
        let range = self.max - self.min;
        let mutation_power = 1.0 / (1.0 + self.eta);

        for position in index::sample(&mut rng, params.len(), amount) {
            let x = params[position];
            let delta_1 = (x - self.min) / range;
            let delta_2 = (self.max - x) / range;
            let u: f32 = rng.r#gen();

            let delta_q = if u < 0.5 {
                let xy = 1.0 - delta_1;
                let val = 2.0 * u + (1.0 - 2.0 * u) * xy.powf(self.eta + 1.0);
                val.powf(mutation_power) - 1.0
            } else {
                let xy = 1.0 - delta_2;
                let val = 2.0 * (1.0 - u) + 2.0 * (u - 0.5) * xy.powf(self.eta + 1.0);
                1.0 - val.powf(mutation_power)
            };

            params[position] = (x + delta_q * range).clamp(self.min, self.max);
        }

        (child, key)
    }
}

/// Mutation chosen at run time, e.g. from a configuration file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MutationOperator {
    Gaussian(GaussianMutation),
    Polynomial(PolynomialMutation),
    Identity,
}

impl<G: Parameters> Mutation<G> for MutationOperator {
    fn mutate(&self, genotype: &G, key: RandomKey) -> (G, RandomKey) {
        match self {
            MutationOperator::Gaussian(op) => op.mutate(genotype, key),
            MutationOperator::Polynomial(op) => op.mutate(genotype, key),
            MutationOperator::Identity => identity_mutation(genotype, key),
        }
    }
}

fn clip(values: &mut [f32], bounds: Option<(f32, f32)>) {
    if let Some((min, max)) = bounds {
        for v in values {
            *v = v.clamp(min, max);
        }
    }
}

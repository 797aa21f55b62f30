//! Emitters: policies proposing new candidates from the current repertoire.

#[cfg(not(target_arch = "wasm32"))]
use rayon::prelude::*;

use rand::Rng;

use super::archive::{Repertoire, RepertoireError};
use super::fitness::Evaluations;
use super::genome::{Genotype, Mutation, Variation};
use crate::compute::RandomKey;

/// Emitter errors.
#[derive(Debug, thiserror::Error)]
pub enum EmitterError {
    #[error("Variation percentage must be in [0, 1], got {0}")]
    InvalidVariationPercentage(f32),
    #[error("Emitter batch size must be non-zero")]
    ZeroBatchSize,
    #[error("Parent selection failed: {0}")]
    Selection(#[from] RepertoireError),
}

/// A candidate-generation policy.
///
/// The emitter's memory lives in [`Emitter::State`]. The search loop creates
/// it once with [`Emitter::init_state`] and afterwards only threads it
/// through [`Emitter::emit`] and [`Emitter::state_update`].
pub trait Emitter<G: Genotype> {
    /// Emitter memory; `()` for stateless emitters.
    type State: Clone + Send + Sync;

    /// Number of candidates produced by each call to [`Emitter::emit`].
    fn batch_size(&self) -> usize;

    /// Initial memory, built from the initial repertoire.
    fn init_state(&self, repertoire: &Repertoire<G>, key: RandomKey) -> (Self::State, RandomKey);

    /// Propose a batch of new genotypes.
    fn emit(
        &self,
        repertoire: &Repertoire<G>,
        state: &Self::State,
        key: RandomKey,
    ) -> Result<(Vec<G>, RandomKey), EmitterError>;

    /// Learn from the scored batch. Stateless emitters return `state` as is.
    fn state_update(
        &self,
        state: Self::State,
        _repertoire: &Repertoire<G>,
        _genotypes: &[G],
        _evaluations: &Evaluations,
    ) -> Self::State {
        state
    }
}

/// Mixes a two-parent variation operator with a single-parent mutation.
///
/// Each emitted child independently goes through the variation operator with
/// probability `variation_percentage`, otherwise through the mutation.
#[derive(Debug, Clone)]
pub struct MixingEmitter<M, V> {
    mutation: M,
    variation: V,
    variation_percentage: f32,
    batch_size: usize,
}

impl<M, V> MixingEmitter<M, V> {
    pub fn new(
        mutation: M,
        variation: V,
        variation_percentage: f32,
        batch_size: usize,
    ) -> Result<Self, EmitterError> {
        if !(0.0..=1.0).contains(&variation_percentage) {
            return Err(EmitterError::InvalidVariationPercentage(
                variation_percentage,
            ));
        }
        if batch_size == 0 {
            return Err(EmitterError::ZeroBatchSize);
        }

        Ok(Self {
            mutation,
            variation,
            variation_percentage,
            batch_size,
        })
    }

    pub fn variation_percentage(&self) -> f32 {
        self.variation_percentage
    }

    pub fn mutation(&self) -> &M {
        &self.mutation
    }

    pub fn variation(&self) -> &V {
        &self.variation
    }
}

impl<M, V> MixingEmitter<M, V> {
    fn breed<G>(&self, first: &G, second: &G, key: RandomKey) -> G
    where
        M: Mutation<G>,
        V: Variation<G>,
    {
        let (choice_key, operator_key) = key.split();
        let u: f32 = choice_key.rng().r#gen();
        if u < self.variation_percentage {
            self.variation.vary(first, second, operator_key).0
        } else {
            self.mutation.mutate(first, operator_key).0
        }
    }
}

impl<G, M, V> Emitter<G> for MixingEmitter<M, V>
where
    G: Genotype,
    M: Mutation<G>,
    V: Variation<G>,
{
    type State = ();

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn init_state(&self, _repertoire: &Repertoire<G>, key: RandomKey) -> ((), RandomKey) {
        ((), key)
    }

    fn emit(
        &self,
        repertoire: &Repertoire<G>,
        _state: &(),
        key: RandomKey,
    ) -> Result<(Vec<G>, RandomKey), EmitterError> {
        let (key, first_key) = key.split();
        let (key, second_key) = key.split();
        let (key, breed_key) = key.split();

        let (first, _) = repertoire.sample(self.batch_size, first_key)?;
        let (second, _) = repertoire.sample(self.batch_size, second_key)?;
        let keys = breed_key.split_n(self.batch_size);

        Ok((self.breed_all(&first, &second, &keys), key))
    }
}

impl<M, V> MixingEmitter<M, V> {
    #[cfg(not(target_arch = "wasm32"))]
    fn breed_all<G>(&self, first: &[G], second: &[G], keys: &[RandomKey]) -> Vec<G>
    where
        G: Genotype,
        M: Mutation<G>,
        V: Variation<G>,
    {
        (0..keys.len())
            .into_par_iter()
            .map(|i| self.breed(&first[i], &second[i], keys[i]))
            .collect()
    }

    #[cfg(target_arch = "wasm32")]
    fn breed_all<G>(&self, first: &[G], second: &[G], keys: &[RandomKey]) -> Vec<G>
    where
        G: Genotype,
        M: Mutation<G>,
        V: Variation<G>,
    {
        (0..keys.len())
            .map(|i| self.breed(&first[i], &second[i], keys[i]))
            .collect()
    }
}

//! Niche-indexed repertoire of elites.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

#[cfg(not(target_arch = "wasm32"))]
use rayon::prelude::*;

use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::centroids::{CentroidError, Centroids};
use super::genome::Genotype;
use crate::compute::RandomKey;

/// Repertoire errors. All of them indicate a caller or configuration bug.
#[derive(Debug, thiserror::Error)]
pub enum RepertoireError {
    #[error(
        "Batch length mismatch: {genotypes} genotypes, {fitnesses} fitnesses, {descriptors} descriptors"
    )]
    BatchLengthMismatch {
        genotypes: usize,
        fitnesses: usize,
        descriptors: usize,
    },
    #[error("Descriptor {index} has dimension {found}, expected {expected}")]
    DescriptorDimension {
        index: usize,
        expected: usize,
        found: usize,
    },
    #[error("Descriptor {index} has a non-finite coordinate")]
    NonFiniteDescriptor { index: usize },
    #[error("Cannot sample from an empty repertoire")]
    Empty,
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),
    #[error("Invalid snapshot centroids: {0}")]
    Centroids(#[from] CentroidError),
    #[error("Snapshot I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("Snapshot serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Fixed-capacity archive holding at most one elite per niche.
///
/// Values are never mutated once built; [`Repertoire::insert`] returns a new
/// repertoire and leaves the receiver untouched. The centroid set is shared
/// between all repertoires of a lineage.
#[derive(Debug, Clone, PartialEq)]
pub struct Repertoire<G> {
    centroids: Arc<Centroids>,
    /// Occupant per niche; `None` for empty niches.
    genotypes: Vec<Option<G>>,
    /// Occupant fitness per niche; `-inf` for empty niches.
    fitnesses: Vec<f32>,
    /// Row-major occupant descriptors; zeros for empty niches.
    descriptors: Vec<f32>,
}

/// Borrowed view of one occupied niche.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Elite<'a, G> {
    /// Index of the niche (and of its centroid).
    pub niche: usize,
    /// Occupant genotype.
    pub genotype: &'a G,
    /// Occupant fitness.
    pub fitness: f32,
    /// Occupant descriptor.
    pub descriptor: &'a [f32],
}

/// What an insertion did to the archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertReport {
    /// Candidates that filled a previously empty niche.
    pub added: usize,
    /// Candidates that replaced a weaker occupant.
    pub improved: usize,
    /// Candidates discarded (lost in their batch or to the occupant).
    pub rejected: usize,
}

impl InsertReport {
    /// Number of niches changed by the insertion.
    pub fn accepted(&self) -> usize {
        self.added + self.improved
    }
}

impl<G: Genotype> Repertoire<G> {
    /// A repertoire with every niche empty.
    pub fn empty(centroids: Arc<Centroids>) -> Self {
        let capacity = centroids.len();
        let dimension = centroids.dimension();
        Self {
            centroids,
            genotypes: vec![None; capacity],
            fitnesses: vec![f32::NEG_INFINITY; capacity],
            descriptors: vec![0.0; capacity * dimension],
        }
    }

    /// Build a repertoire from an initial scored batch.
    ///
    /// Capacity is the number of centroids. The batch may be larger, smaller
    /// or empty.
    pub fn init(
        genotypes: &[G],
        fitnesses: &[f32],
        descriptors: &[Vec<f32>],
        centroids: Arc<Centroids>,
    ) -> Result<Self, RepertoireError> {
        Self::empty(centroids).insert(genotypes, fitnesses, descriptors)
    }

    /// Competitive insertion of a scored batch.
    ///
    /// Each candidate goes to its nearest niche. Within the batch only the
    /// fittest candidate per niche is eligible (earliest wins on equal
    /// fitness), and it replaces the occupant only with strictly greater
    /// fitness. NaN fitness never enters the archive; a batch with a
    /// non-finite descriptor is rejected.
    pub fn insert(
        &self,
        genotypes: &[G],
        fitnesses: &[f32],
        descriptors: &[Vec<f32>],
    ) -> Result<Self, RepertoireError> {
        self.insert_with_report(genotypes, fitnesses, descriptors)
            .map(|(repertoire, _)| repertoire)
    }

    /// Same as [`Repertoire::insert`], also reporting what changed.
    pub fn insert_with_report(
        &self,
        genotypes: &[G],
        fitnesses: &[f32],
        descriptors: &[Vec<f32>],
    ) -> Result<(Self, InsertReport), RepertoireError> {
        self.check_batch(genotypes.len(), fitnesses.len(), descriptors)?;

        let niches = assign_niches(&self.centroids, descriptors);

        // Batch-local competition: niche -> index of its best candidate.
        let mut winners: BTreeMap<usize, usize> = BTreeMap::new();
        for (i, &niche) in niches.iter().enumerate() {
            if fitnesses[i].is_nan() {
                continue;
            }
            match winners.entry(niche) {
                Entry::Vacant(slot) => {
                    slot.insert(i);
                }
                Entry::Occupied(mut slot) => {
                    if fitnesses[i] > fitnesses[*slot.get()] {
                        slot.insert(i);
                    }
                }
            }
        }

        let dimension = self.dimension();
        let mut next = self.clone();
        let mut report = InsertReport::default();

        for (niche, i) in winners {
            let current = next.fitnesses[niche];
            if fitnesses[i] > current {
                if current == f32::NEG_INFINITY {
                    report.added += 1;
                } else {
                    report.improved += 1;
                }
                next.fitnesses[niche] = fitnesses[i];
                next.genotypes[niche] = Some(genotypes[i].clone());
                next.descriptors[niche * dimension..(niche + 1) * dimension]
                    .copy_from_slice(&descriptors[i]);
            }
        }
        report.rejected = genotypes.len() - report.accepted();

        log::trace!(
            "insert: batch={} added={} improved={} rejected={}",
            genotypes.len(),
            report.added,
            report.improved,
            report.rejected
        );

        Ok((next, report))
    }

    /// Draw `count` occupants uniformly over occupied niches, with replacement.
    pub fn sample(
        &self,
        count: usize,
        key: RandomKey,
    ) -> Result<(Vec<G>, RandomKey), RepertoireError> {
        if count == 0 {
            return Ok((Vec::new(), key));
        }

        let pool: Vec<&G> = self.genotypes.iter().flatten().collect();
        if pool.is_empty() {
            return Err(RepertoireError::Empty);
        }

        let (key, subkey) = key.split();
        let mut rng = subkey.rng();
        let samples = (0..count)
            .map(|_| pool[rng.gen_range(0..pool.len())].clone())
            .collect();

        Ok((samples, key))
    }

    fn check_batch(
        &self,
        genotypes: usize,
        fitnesses: usize,
        descriptors: &[Vec<f32>],
    ) -> Result<(), RepertoireError> {
        if genotypes != fitnesses || genotypes != descriptors.len() {
            return Err(RepertoireError::BatchLengthMismatch {
                genotypes,
                fitnesses,
                descriptors: descriptors.len(),
            });
        }

        let expected = self.dimension();
        if let Some((index, d)) = descriptors
            .iter()
            .enumerate()
            .find(|(_, d)| d.len() != expected)
        {
            return Err(RepertoireError::DescriptorDimension {
                index,
                expected,
                found: d.len(),
            });
        }

        if let Some(index) = descriptors
            .iter()
            .position(|d| d.iter().any(|x| !x.is_finite()))
        {
            return Err(RepertoireError::NonFiniteDescriptor { index });
        }
        Ok(())
    }
}

impl<G> Repertoire<G> {
    /// Number of niches.
    pub fn capacity(&self) -> usize {
        self.fitnesses.len()
    }

    /// Descriptor dimension.
    pub fn dimension(&self) -> usize {
        self.centroids.dimension()
    }

    pub fn centroids(&self) -> &Arc<Centroids> {
        &self.centroids
    }

    pub fn genotypes(&self) -> &[Option<G>] {
        &self.genotypes
    }

    pub fn fitnesses(&self) -> &[f32] {
        &self.fitnesses
    }

    /// Row-major descriptors, `capacity * dimension` values.
    pub fn descriptors(&self) -> &[f32] {
        &self.descriptors
    }

    /// Descriptor stored at `niche`.
    pub fn descriptor(&self, niche: usize) -> Option<&[f32]> {
        let d = self.dimension();
        self.descriptors.get(niche * d..(niche + 1) * d)
    }

    pub fn is_occupied(&self, niche: usize) -> bool {
        self.fitnesses
            .get(niche)
            .is_some_and(|&f| f != f32::NEG_INFINITY)
    }

    pub fn occupied_mask(&self) -> Vec<bool> {
        self.fitnesses
            .iter()
            .map(|&f| f != f32::NEG_INFINITY)
            .collect()
    }

    pub fn occupied_count(&self) -> usize {
        self.fitnesses
            .iter()
            .filter(|&&f| f != f32::NEG_INFINITY)
            .count()
    }

    /// Iterate occupied niches in index order.
    pub fn elites(&self) -> impl Iterator<Item = Elite<'_, G>> {
        let d = self.dimension();
        self.genotypes
            .iter()
            .enumerate()
            .filter_map(move |(niche, genotype)| {
                genotype.as_ref().map(|genotype| Elite {
                    niche,
                    genotype,
                    fitness: self.fitnesses[niche],
                    descriptor: &self.descriptors[niche * d..(niche + 1) * d],
                })
            })
    }

    /// The fittest elite, lowest niche on ties.
    pub fn best(&self) -> Option<Elite<'_, G>> {
        self.elites()
            .reduce(|best, e| if best.fitness >= e.fitness { best } else { e })
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn assign_niches(centroids: &Centroids, descriptors: &[Vec<f32>]) -> Vec<usize> {
    descriptors.par_iter().map(|d| centroids.nearest(d)).collect()
}

#[cfg(target_arch = "wasm32")]
fn assign_niches(centroids: &Centroids, descriptors: &[Vec<f32>]) -> Vec<usize> {
    descriptors.iter().map(|d| centroids.nearest(d)).collect()
}

// ============================================================================
// Persistence
// ============================================================================

/// Serializable form of a repertoire: the three niche arrays plus centroids.
///
/// Empty niches are stored as `None` fitness, since JSON has no infinity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepertoireSnapshot<G> {
    /// Descriptor dimension.
    pub dimension: usize,
    /// Row-major centroid coordinates.
    pub centroids: Vec<f32>,
    /// Occupant per niche.
    pub genotypes: Vec<Option<G>>,
    /// Occupant fitness per niche; `None` for empty niches.
    pub fitnesses: Vec<Option<f32>>,
    /// Row-major occupant descriptors.
    pub descriptors: Vec<f32>,
}

impl<G: Genotype> Repertoire<G> {
    /// Copy the niche arrays into their serializable form.
    pub fn to_snapshot(&self) -> RepertoireSnapshot<G> {
        RepertoireSnapshot {
            dimension: self.dimension(),
            centroids: self.centroids.as_flat().to_vec(),
            genotypes: self.genotypes.clone(),
            fitnesses: self
                .fitnesses
                .iter()
                .map(|&f| (f != f32::NEG_INFINITY).then_some(f))
                .collect(),
            descriptors: self.descriptors.clone(),
        }
    }

    /// Rebuild a repertoire, checking that the arrays are consistent.
    pub fn from_snapshot(snapshot: RepertoireSnapshot<G>) -> Result<Self, RepertoireError> {
        let centroids = Centroids::from_flat(snapshot.dimension, snapshot.centroids)?;
        let capacity = centroids.len();

        if snapshot.genotypes.len() != capacity
            || snapshot.fitnesses.len() != capacity
            || snapshot.descriptors.len() != capacity * snapshot.dimension
        {
            return Err(RepertoireError::InvalidSnapshot(format!(
                "expected {} niches of dimension {}, got {} genotypes, {} fitnesses, {} descriptor values",
                capacity,
                snapshot.dimension,
                snapshot.genotypes.len(),
                snapshot.fitnesses.len(),
                snapshot.descriptors.len()
            )));
        }

        for (niche, (genotype, fitness)) in snapshot
            .genotypes
            .iter()
            .zip(&snapshot.fitnesses)
            .enumerate()
        {
            if genotype.is_some() != fitness.is_some() {
                return Err(RepertoireError::InvalidSnapshot(format!(
                    "niche {niche} has a genotype without a fitness or vice versa"
                )));
            }
        }

        Ok(Self {
            centroids: Arc::new(centroids),
            genotypes: snapshot.genotypes,
            fitnesses: snapshot
                .fitnesses
                .into_iter()
                .map(|f| f.unwrap_or(f32::NEG_INFINITY))
                .collect(),
            descriptors: snapshot.descriptors,
        })
    }
}

impl<G: Genotype + Serialize> Repertoire<G> {
    /// Write the repertoire as pretty JSON.
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), RepertoireError> {
        let json = serde_json::to_string_pretty(&self.to_snapshot())?;
        fs::write(path, json)?;
        Ok(())
    }
}

impl<G: Genotype + DeserializeOwned> Repertoire<G> {
    /// Load a repertoire written by [`Repertoire::save_json`].
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, RepertoireError> {
        let content = fs::read_to_string(path)?;
        let snapshot: RepertoireSnapshot<G> = serde_json::from_str(&content)?;
        Self::from_snapshot(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::evolution::centroids::{DescriptorBounds, compute_grid_centroids};
    use proptest::prelude::*;
    use tempfile::tempdir;

    /// 4x4 grid over the unit square; niche 0 is centred at (0.125, 0.125).
    fn grid() -> Arc<Centroids> {
        let bounds = DescriptorBounds::uniform(2, 0.0, 1.0).unwrap();
        Arc::new(compute_grid_centroids(&[4, 4], &bounds).unwrap())
    }

    fn empty() -> Repertoire<u32> {
        Repertoire::empty(grid())
    }

    #[test]
    fn test_empty_repertoire() {
        let r = empty();
        assert_eq!(r.capacity(), 16);
        assert_eq!(r.occupied_count(), 0);
        assert!(r.occupied_mask().iter().all(|o| !o));
        assert!(r.best().is_none());
        assert!(r.fitnesses().iter().all(|&f| f == f32::NEG_INFINITY));
    }

    #[test]
    fn test_batch_local_tie_rule() {
        let d = vec![vec![0.1, 0.1], vec![0.12, 0.13]];
        for (fitnesses, winner) in [([5.0, 7.0], 2u32), ([7.0, 5.0], 1u32)] {
            let r = empty().insert(&[1, 2], &fitnesses, &d).unwrap();
            assert_eq!(r.occupied_count(), 1);
            assert_eq!(r.fitnesses()[0], 7.0);
            assert_eq!(r.genotypes()[0], Some(winner));

            // An equal challenger does not replace the occupant.
            let again = r.insert(&[99], &[7.0], &[vec![0.1, 0.1]]).unwrap();
            assert_eq!(again, r);
            assert_eq!(again.genotypes()[0], Some(winner));
        }
    }

    #[test]
    fn test_equal_fitness_in_batch_keeps_first() {
        let d = vec![vec![0.1, 0.1], vec![0.11, 0.1]];
        let r = empty().insert(&[1, 2], &[3.0, 3.0], &d).unwrap();
        assert_eq!(r.genotypes()[0], Some(1));
    }

    #[test]
    fn test_insert_does_not_touch_receiver() {
        let r0 = empty();
        let r1 = r0.insert(&[1], &[1.0], &[vec![0.9, 0.9]]).unwrap();
        assert_eq!(r0.occupied_count(), 0);
        assert_eq!(r1.occupied_count(), 1);
        assert!(r1.is_occupied(15));
        assert_eq!(r1.descriptor(15).unwrap(), &[0.9f32, 0.9][..]);
    }

    #[test]
    fn test_init_collisions_keep_fitter() {
        // 10 distinct descriptors, several sharing a niche.
        let descriptors: Vec<Vec<f32>> = (0..10)
            .map(|i| vec![0.05 + 0.09 * i as f32, 0.1])
            .collect();
        let fitnesses: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let genotypes: Vec<u32> = (0..10).collect();

        let r = Repertoire::init(&genotypes, &fitnesses, &descriptors, grid()).unwrap();
        assert!(r.occupied_count() <= 10);
        for elite in r.elites() {
            // Winner is the fittest candidate mapping to that niche.
            let best = descriptors
                .iter()
                .zip(&fitnesses)
                .filter(|(d, _)| r.centroids().nearest(d) == elite.niche)
                .map(|(_, &f)| f)
                .fold(f32::NEG_INFINITY, f32::max);
            assert_eq!(elite.fitness, best);
        }
    }

    #[test]
    fn test_init_empty_batch() {
        let r = Repertoire::<u32>::init(&[], &[], &[], grid()).unwrap();
        assert_eq!(r.occupied_count(), 0);
    }

    #[test]
    fn test_nan_and_neg_infinity_never_enter() {
        let d = vec![vec![0.1, 0.1], vec![0.1, 0.1], vec![0.9, 0.9]];
        let r = empty()
            .insert(&[1, 2, 3], &[f32::NAN, 1.0, f32::NEG_INFINITY], &d)
            .unwrap();
        assert_eq!(r.occupied_count(), 1);
        assert_eq!(r.genotypes()[0], Some(2));
    }

    #[test]
    fn test_insert_report() {
        let r = empty().insert(&[1], &[1.0], &[vec![0.1, 0.1]]).unwrap();
        let d = vec![vec![0.1, 0.1], vec![0.9, 0.9], vec![0.9, 0.91], vec![0.5, 0.6]];
        let (_, report) = r
            .insert_with_report(&[2, 3, 4, 5], &[2.0, 1.0, 0.5, -1.0], &d)
            .unwrap();
        assert_eq!(
            report,
            InsertReport {
                added: 2,
                improved: 1,
                rejected: 1
            }
        );
    }

    #[test]
    fn test_batch_length_mismatch() {
        let err = empty()
            .insert(&[1, 2], &[1.0], &[vec![0.1, 0.1], vec![0.2, 0.2]])
            .unwrap_err();
        assert!(matches!(
            err,
            RepertoireError::BatchLengthMismatch {
                genotypes: 2,
                fitnesses: 1,
                descriptors: 2
            }
        ));
    }

    #[test]
    fn test_descriptor_dimension_mismatch() {
        let err = empty()
            .insert(&[1, 2], &[1.0, 2.0], &[vec![0.1, 0.1], vec![0.2]])
            .unwrap_err();
        assert!(matches!(
            err,
            RepertoireError::DescriptorDimension {
                index: 1,
                expected: 2,
                found: 1
            }
        ));
    }

    #[test]
    fn test_non_finite_descriptor_rejected() {
        let r = empty();
        for bad in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            let d = vec![vec![0.1, 0.1], vec![bad, 0.9]];
            let err = r.insert(&[1, 2], &[1.0, 2.0], &d).unwrap_err();
            assert!(matches!(
                err,
                RepertoireError::NonFiniteDescriptor { index: 1 }
            ));
        }
        assert_eq!(r.occupied_count(), 0);
    }

    #[test]
    fn test_sample_only_occupied() {
        let d = vec![vec![0.1, 0.1], vec![0.9, 0.9]];
        let r = empty().insert(&[10, 20], &[1.0, 2.0], &d).unwrap();
        let key = RandomKey::new(5);
        let (samples, next) = r.sample(64, key).unwrap();
        assert_eq!(samples.len(), 64);
        assert!(samples.iter().all(|g| *g == 10 || *g == 20));
        assert_ne!(next, key);
        assert_eq!(r.sample(64, key).unwrap().0, samples);
    }

    #[test]
    fn test_sample_empty_fails() {
        assert!(matches!(
            empty().sample(3, RandomKey::new(0)),
            Err(RepertoireError::Empty)
        ));
    }

    #[test]
    fn test_best() {
        let d = vec![vec![0.1, 0.1], vec![0.9, 0.9], vec![0.5, 0.1]];
        let r = empty().insert(&[1, 2, 3], &[1.0, 4.0, 4.0], &d).unwrap();
        let best = r.best().unwrap();
        assert_eq!(best.fitness, 4.0);
        assert_eq!(*best.genotype, 3);
    }

    #[test]
    fn test_snapshot_file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("repertoire.json");

        let d = vec![vec![0.1, 0.1], vec![0.9, 0.9]];
        let r = empty().insert(&[1, 2], &[-1.5, 2.0], &d).unwrap();
        r.save_json(&path).unwrap();

        let loaded = Repertoire::<u32>::load_json(&path).unwrap();
        assert_eq!(loaded, r);
    }

    #[test]
    fn test_snapshot_rejects_inconsistent_arrays() {
        let mut snapshot = empty().to_snapshot();
        snapshot.fitnesses[3] = Some(1.0);
        assert!(matches!(
            Repertoire::from_snapshot(snapshot),
            Err(RepertoireError::InvalidSnapshot(_))
        ));

        let mut snapshot = empty().to_snapshot();
        snapshot.descriptors.pop();
        assert!(matches!(
            Repertoire::from_snapshot(snapshot),
            Err(RepertoireError::InvalidSnapshot(_))
        ));
    }

    fn batch_strategy() -> impl Strategy<Value = Vec<(f32, [f32; 2])>> {
        prop::collection::vec(
            (-10.0f32..10.0, prop::array::uniform2(0.0f32..1.0)),
            0..24,
        )
    }

    fn split(batch: &[(f32, [f32; 2])], offset: u32) -> (Vec<u32>, Vec<f32>, Vec<Vec<f32>>) {
        let genotypes = (0..batch.len() as u32).map(|i| i + offset).collect();
        let fitnesses = batch.iter().map(|(f, _)| *f).collect();
        let descriptors = batch.iter().map(|(_, d)| d.to_vec()).collect();
        (genotypes, fitnesses, descriptors)
    }

    proptest! {
        #[test]
        fn prop_capacity_and_monotone_fitness(batches in prop::collection::vec(batch_strategy(), 1..6)) {
            let mut r = empty();
            for (round, batch) in batches.iter().enumerate() {
                let (g, f, d) = split(batch, round as u32 * 100);
                let next = r.insert(&g, &f, &d).unwrap();

                prop_assert!(next.occupied_count() <= next.capacity());
                for (before, after) in r.fitnesses().iter().zip(next.fitnesses()) {
                    prop_assert!(after >= before);
                }
                r = next;
            }
        }

        #[test]
        fn prop_occupants_sit_in_their_nearest_niche(batch in batch_strategy()) {
            let (g, f, d) = split(&batch, 0);
            let r = empty().insert(&g, &f, &d).unwrap();
            for elite in r.elites() {
                prop_assert_eq!(r.centroids().nearest(elite.descriptor), elite.niche);
            }
        }

        #[test]
        fn prop_no_improvement_is_identity(batch in batch_strategy(), penalty in 0.0f32..5.0) {
            let (g, f, d) = split(&batch, 0);
            let r = empty().insert(&g, &f, &d).unwrap();

            // Re-insert every occupant's descriptor with fitness <= occupant.
            let elites: Vec<_> = r.elites().collect();
            let genotypes: Vec<u32> = elites.iter().map(|e| e.genotype + 1000).collect();
            let fitnesses: Vec<f32> = elites.iter().map(|e| e.fitness - penalty).collect();
            let descriptors: Vec<Vec<f32>> = elites.iter().map(|e| e.descriptor.to_vec()).collect();

            let again = r.insert(&genotypes, &fitnesses, &descriptors).unwrap();
            prop_assert_eq!(again, r);
        }
    }
}

//! MAP-Elites search loop.

use std::marker::PhantomData;
use std::sync::Arc;

use super::archive::{Repertoire, RepertoireError};
use super::centroids::Centroids;
use super::emitter::{Emitter, EmitterError};
use super::fitness::ScoringFunction;
use super::genome::Genotype;
use super::metrics::{COVERAGE, MAX_FITNESS, Metrics, MetricsFunction, QD_SCORE};
use crate::compute::RandomKey;

/// Everything that changes from one generation to the next.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchState<G, S> {
    pub repertoire: Repertoire<G>,
    pub emitter_state: S,
    pub key: RandomKey,
    /// Completed generations since `init`.
    pub generation: usize,
}

/// Search errors. Scoring failures are carried unmodified.
#[derive(Debug, thiserror::Error)]
pub enum SearchError<E>
where
    E: std::error::Error + 'static,
{
    #[error("Scoring failed: {0}")]
    Scoring(#[source] E),
    #[error("Repertoire error: {0}")]
    Repertoire(#[from] RepertoireError),
    #[error("Emitter error: {0}")]
    Emitter(#[from] EmitterError),
}

/// CVT MAP-Elites: a scoring function, an emitter and a metrics function.
///
/// The search owns no mutable state. Every step takes a [`SearchState`] and
/// returns a new one, so a state can be kept, cloned or retried freely.
pub struct MapElites<G, S, E, M> {
    scoring: S,
    emitter: E,
    metrics: M,
    _genotype: PhantomData<fn() -> G>,
}

impl<G, S, E, M> MapElites<G, S, E, M> {
    pub fn new(scoring: S, emitter: E, metrics: M) -> Self {
        Self {
            scoring,
            emitter,
            metrics,
            _genotype: PhantomData,
        }
    }

    pub fn scoring(&self) -> &S {
        &self.scoring
    }

    pub fn emitter(&self) -> &E {
        &self.emitter
    }
}

impl<G, S, E, M> MapElites<G, S, E, M>
where
    G: Genotype,
    S: ScoringFunction<G>,
    E: Emitter<G>,
    M: MetricsFunction<G>,
{
    /// Score the initial batch and build the first state.
    pub fn init(
        &self,
        genotypes: &[G],
        centroids: Arc<Centroids>,
        key: RandomKey,
    ) -> Result<SearchState<G, E::State>, SearchError<S::Error>> {
        let (key, score_key) = key.split();
        let (evaluations, _) = self
            .scoring
            .score(genotypes, score_key)
            .map_err(SearchError::Scoring)?;

        let repertoire = Repertoire::init(
            genotypes,
            &evaluations.fitnesses,
            &evaluations.descriptors,
            centroids,
        )?;
        if repertoire.occupied_count() == 0 {
            log::warn!(
                "Initial repertoire is empty ({} candidates); emitting will fail",
                genotypes.len()
            );
        }

        let (key, emitter_key) = key.split();
        let (emitter_state, _) = self.emitter.init_state(&repertoire, emitter_key);

        log::debug!(
            "Initialized repertoire: {}/{} niches occupied",
            repertoire.occupied_count(),
            repertoire.capacity()
        );

        Ok(SearchState {
            repertoire,
            emitter_state,
            key,
            generation: 0,
        })
    }

    /// One generation: emit, score, insert, update the emitter, measure.
    ///
    /// `state` is left untouched; on error it is still a valid state.
    pub fn update(
        &self,
        state: &SearchState<G, E::State>,
    ) -> Result<(SearchState<G, E::State>, Metrics), SearchError<S::Error>> {
        let (key, emit_key) = state.key.split();
        let (genotypes, _) = self
            .emitter
            .emit(&state.repertoire, &state.emitter_state, emit_key)?;

        let (key, score_key) = key.split();
        let (evaluations, _) = self
            .scoring
            .score(&genotypes, score_key)
            .map_err(SearchError::Scoring)?;

        let (repertoire, report) = state.repertoire.insert_with_report(
            &genotypes,
            &evaluations.fitnesses,
            &evaluations.descriptors,
        )?;

        let emitter_state = self.emitter.state_update(
            state.emitter_state.clone(),
            &repertoire,
            &genotypes,
            &evaluations,
        );
        let metrics = self.metrics.compute(&repertoire);
        let generation = state.generation + 1;

        log::debug!(
            "Generation {}: added={} improved={} occupied={}/{}",
            generation,
            report.added,
            report.improved,
            repertoire.occupied_count(),
            repertoire.capacity()
        );

        Ok((
            SearchState {
                repertoire,
                emitter_state,
                key,
                generation,
            },
            metrics,
        ))
    }

    /// Run `iterations` generations, calling `callback` after each one.
    ///
    /// Returns the final state and the metrics of every generation in order.
    pub fn run_with_callback<F>(
        &self,
        state: SearchState<G, E::State>,
        iterations: usize,
        mut callback: F,
    ) -> Result<(SearchState<G, E::State>, Vec<Metrics>), SearchError<S::Error>>
    where
        F: FnMut(&SearchState<G, E::State>, &Metrics),
    {
        let start_time = std::time::Instant::now();

        let (state, history) = (0..iterations).try_fold(
            (state, Vec::with_capacity(iterations)),
            |(state, mut history), _| {
                let (next, metrics) = self.update(&state)?;
                callback(&next, &metrics);
                history.push(metrics);
                Ok::<_, SearchError<S::Error>>((next, history))
            },
        )?;

        if let Some(last) = history.last() {
            log::info!(
                "Finished {} generations in {:.2}s: qd_score={:.3} coverage={:.1}% max_fitness={:.4}",
                iterations,
                start_time.elapsed().as_secs_f64(),
                last.get(QD_SCORE).copied().unwrap_or(0.0),
                last.get(COVERAGE).copied().unwrap_or(0.0),
                last.get(MAX_FITNESS).copied().unwrap_or(f32::NEG_INFINITY)
            );
        }

        Ok((state, history))
    }

    /// Run `iterations` generations.
    pub fn run(
        &self,
        state: SearchState<G, E::State>,
        iterations: usize,
    ) -> Result<(SearchState<G, E::State>, Vec<Metrics>), SearchError<S::Error>> {
        self.run_with_callback(state, iterations, |_, _| {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::evolution::centroids::{
        CvtParams, DescriptorBounds, compute_cvt_centroids, compute_grid_centroids,
    };
    use crate::compute::evolution::emitter::MixingEmitter;
    use crate::compute::evolution::fitness::{BenchmarkScoring, Evaluations};
    use crate::compute::evolution::genome::{
        GaussianMutation, IsolineVariation, random_parameters,
    };
    use crate::compute::evolution::metrics::QdMetrics;
    use crate::schema::BenchmarkTask;

    type Mixing = MixingEmitter<GaussianMutation, IsolineVariation>;

    fn emitter(batch_size: usize) -> Mixing {
        MixingEmitter::new(
            GaussianMutation::new(0.05).with_clip(0.0, 1.0),
            IsolineVariation::new(0.05, 0.1).with_clip(0.0, 1.0),
            0.5,
            batch_size,
        )
        .unwrap()
    }

    fn sphere(batch_size: usize) -> MapElites<Vec<f32>, BenchmarkScoring, Mixing, QdMetrics> {
        let scoring = BenchmarkScoring::new(BenchmarkTask::Sphere);
        let metrics = QdMetrics::new(-scoring.min_fitness(4));
        MapElites::new(scoring, emitter(batch_size), metrics)
    }

    fn grid() -> Arc<Centroids> {
        let bounds = DescriptorBounds::uniform(2, 0.0, 1.0).unwrap();
        Arc::new(compute_grid_centroids(&[5, 5], &bounds).unwrap())
    }

    #[derive(Debug, thiserror::Error)]
    #[error("simulator crashed")]
    struct Crash;

    #[test]
    fn test_init_scenario() {
        let bounds = DescriptorBounds::uniform(2, 0.0, 1.0).unwrap();
        let (centroids, key) =
            compute_cvt_centroids(&CvtParams::new(50, 1000, bounds), RandomKey::new(0)).unwrap();
        let centroids = Arc::new(centroids);
        let (genotypes, key) = random_parameters(10, 4, 0.0, 1.0, key);

        let search = sphere(8);
        let state = search.init(&genotypes, centroids.clone(), key).unwrap();
        assert_eq!(state.generation, 0);
        assert!(state.repertoire.occupied_count() <= 10);
        assert!(state.repertoire.occupied_count() > 0);

        // every occupant is the fittest candidate mapped to its niche
        let scoring = BenchmarkScoring::new(BenchmarkTask::Sphere);
        for elite in state.repertoire.elites() {
            let best = genotypes
                .iter()
                .map(|g| scoring.evaluate(g))
                .filter(|(_, d)| centroids.nearest(d) == elite.niche)
                .map(|(f, _)| f)
                .fold(f32::NEG_INFINITY, f32::max);
            assert_eq!(elite.fitness, best);
        }
    }

    #[test]
    fn test_update_leaves_input_state_untouched() {
        let search = sphere(4);
        let (genotypes, key) = random_parameters(20, 4, 0.0, 1.0, RandomKey::new(1));
        let state = search.init(&genotypes, grid(), key).unwrap();
        let before = state.clone();

        let (next, metrics) = search.update(&state).unwrap();
        assert_eq!(state, before);
        assert_eq!(next.generation, 1);
        assert_ne!(next.key, state.key);
        assert!(metrics.contains_key(QD_SCORE));
    }

    #[test]
    fn test_run_deterministic() {
        let search = sphere(16);
        let (genotypes, key) = random_parameters(32, 4, 0.0, 1.0, RandomKey::new(7));

        let run = || {
            let state = search.init(&genotypes, grid(), key).unwrap();
            search.run(state, 10).unwrap()
        };
        let (state_a, history_a) = run();
        let (state_b, history_b) = run();
        assert_eq!(state_a, state_b);
        assert_eq!(history_a, history_b);
        assert_eq!(history_a.len(), 10);
    }

    #[test]
    fn test_stored_fitness_never_decreases() {
        let search = sphere(1);
        let (genotypes, key) = random_parameters(10, 4, 0.0, 1.0, RandomKey::new(3));
        let mut state = search.init(&genotypes, grid(), key).unwrap();

        for _ in 0..5 {
            let (next, _) = search.update(&state).unwrap();
            for (before, after) in state
                .repertoire
                .fitnesses()
                .iter()
                .zip(next.repertoire.fitnesses())
            {
                assert!(after >= before);
            }
            state = next;
        }
        assert_eq!(state.generation, 5);
    }

    #[test]
    fn test_qd_score_and_coverage_grow() {
        let search = sphere(32);
        let (genotypes, key) = random_parameters(16, 4, 0.0, 1.0, RandomKey::new(9));
        let state = search.init(&genotypes, grid(), key).unwrap();

        let mut seen = Vec::new();
        let (_, history) = search
            .run_with_callback(state, 20, |s, m| seen.push((s.generation, m[COVERAGE])))
            .unwrap();

        assert_eq!(seen.len(), 20);
        assert_eq!(seen.first().map(|(g, _)| *g), Some(1));
        for pair in history.windows(2) {
            assert!(pair[1][QD_SCORE] >= pair[0][QD_SCORE]);
            assert!(pair[1][COVERAGE] >= pair[0][COVERAGE]);
            assert!((0.0..=100.0).contains(&pair[1][COVERAGE]));
        }
    }

    #[test]
    fn test_scoring_failure_propagates() {
        let good = sphere(4);
        let (genotypes, key) = random_parameters(10, 4, 0.0, 1.0, RandomKey::new(2));
        let state = good.init(&genotypes, grid(), key).unwrap();

        let crash = |_: &[Vec<f32>], _: RandomKey| Err::<(Evaluations, RandomKey), _>(Crash);
        let failing = MapElites::new(crash, emitter(4), QdMetrics::default());
        assert!(matches!(failing.update(&state), Err(SearchError::Scoring(Crash))));

        // the prior state is still usable
        let (next, _) = good.update(&state).unwrap();
        assert_eq!(next.generation, 1);
    }

    #[test]
    fn test_scoring_length_mismatch_is_rejected() {
        let truncating = |batch: &[Vec<f32>], key: RandomKey| {
            let scoring = BenchmarkScoring::new(BenchmarkTask::Sphere);
            let evals: Evaluations = batch.iter().skip(1).map(|g| scoring.evaluate(g)).collect();
            Ok::<_, Crash>((evals, key))
        };
        let search = MapElites::new(truncating, emitter(4), QdMetrics::default());
        let genotypes = vec![vec![0.5; 4]; 3];
        assert!(matches!(
            search.init(&genotypes, grid(), RandomKey::new(0)),
            Err(SearchError::Repertoire(
                RepertoireError::BatchLengthMismatch { .. }
            ))
        ));
    }

    #[test]
    fn test_empty_initial_repertoire_cannot_emit() {
        let search = sphere(4);
        let state = search.init(&[], grid(), RandomKey::new(0)).unwrap();
        assert_eq!(state.repertoire.occupied_count(), 0);
        assert!(matches!(
            search.update(&state),
            Err(SearchError::Emitter(EmitterError::Selection(
                RepertoireError::Empty
            )))
        ));
    }

    /// Counts how many batches it has learned from.
    struct CountingEmitter(Mixing);

    impl Emitter<Vec<f32>> for CountingEmitter {
        type State = usize;

        fn batch_size(&self) -> usize {
            Emitter::<Vec<f32>>::batch_size(&self.0)
        }

        fn init_state(&self, _: &Repertoire<Vec<f32>>, key: RandomKey) -> (usize, RandomKey) {
            (0, key)
        }

        fn emit(
            &self,
            repertoire: &Repertoire<Vec<f32>>,
            _: &usize,
            key: RandomKey,
        ) -> Result<(Vec<Vec<f32>>, RandomKey), EmitterError> {
            self.0.emit(repertoire, &(), key)
        }

        fn state_update(
            &self,
            state: usize,
            _: &Repertoire<Vec<f32>>,
            genotypes: &[Vec<f32>],
            evaluations: &Evaluations,
        ) -> usize {
            assert_eq!(genotypes.len(), evaluations.len());
            state + 1
        }
    }

    #[test]
    fn test_emitter_state_is_threaded() {
        let scoring = BenchmarkScoring::new(BenchmarkTask::Sphere);
        let search = MapElites::new(scoring, CountingEmitter(emitter(2)), QdMetrics::default());
        let (genotypes, key) = random_parameters(5, 4, 0.0, 1.0, RandomKey::new(5));
        let state = search.init(&genotypes, grid(), key).unwrap();
        let (state, _) = search.run(state, 3).unwrap();
        assert_eq!(state.emitter_state, 3);
        assert_eq!(state.generation, 3);
    }
}

//! Result types written at the end of a run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::QdConfig;
use crate::compute::evolution::{
    COVERAGE, Genotype, MAX_FITNESS, Metrics, QD_SCORE, Repertoire,
};

/// Per-metric history, one value per generation.
///
/// Non-finite values (e.g. `max_fitness` of an empty archive) are stored as
/// `None`; JSON has no encoding for infinities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunHistory {
    /// Metric name to its series.
    pub metrics: BTreeMap<String, Vec<Option<f32>>>,
}

impl RunHistory {
    pub fn from_metrics(history: &[Metrics]) -> Self {
        let mut out = Self::default();
        for metrics in history {
            out.push(metrics);
        }
        out
    }

    /// Append one generation. Metrics missing from earlier generations are
    /// back-filled with `None`.
    pub fn push(&mut self, metrics: &Metrics) {
        let generations = self.len();
        for (name, &value) in metrics {
            let series = self
                .metrics
                .entry(name.clone())
                .or_insert_with(|| vec![None; generations]);
            series.push(value.is_finite().then_some(value));
        }
        for series in self.metrics.values_mut() {
            series.resize(generations + 1, None);
        }
    }

    /// Number of recorded generations.
    pub fn len(&self) -> usize {
        self.metrics.values().map(Vec::len).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn series(&self, name: &str) -> Option<&[Option<f32>]> {
        self.metrics.get(name).map(Vec::as_slice)
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    /// Generations run after initialisation.
    pub generations: usize,
    /// Scored candidates, including the initial batch.
    pub total_evaluations: u64,
    /// Niches holding an elite at the end of the run.
    pub occupied_niches: usize,
    /// Total number of niches.
    pub capacity: usize,
    /// Occupied niches as a percentage of capacity.
    pub coverage: f32,
    /// Final QD-score, offset applied.
    pub qd_score: f32,
    /// `None` when the archive is empty.
    pub max_fitness: Option<f32>,
    /// Wall-clock time of initialisation plus search.
    pub elapsed_seconds: f64,
    pub evaluations_per_second: f64,
}

/// The best elite of the final archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EliteSummary<G> {
    /// Niche index.
    pub niche: usize,
    /// Elite fitness.
    pub fitness: f32,
    /// Elite descriptor.
    pub descriptor: Vec<f32>,
    /// Elite genotype.
    pub genotype: G,
}

/// Everything the command line runner writes out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport<G = Vec<f32>> {
    /// Configuration the run was started with.
    pub config: QdConfig,
    pub stats: RunStats,
    /// Metrics per generation.
    pub history: RunHistory,
    /// `None` when the archive is empty.
    pub best: Option<EliteSummary<G>>,
}

impl<G: Genotype> RunReport<G> {
    pub fn new(
        config: QdConfig,
        repertoire: &Repertoire<G>,
        history: &[Metrics],
        total_evaluations: u64,
        elapsed_seconds: f64,
    ) -> Self {
        let last = history.last();
        let metric = |name: &str, fallback: f32| {
            last.and_then(|m| m.get(name).copied()).unwrap_or(fallback)
        };
        let max_fitness = metric(MAX_FITNESS, f32::NEG_INFINITY);

        let stats = RunStats {
            generations: history.len(),
            total_evaluations,
            occupied_niches: repertoire.occupied_count(),
            capacity: repertoire.capacity(),
            coverage: metric(COVERAGE, 0.0),
            qd_score: metric(QD_SCORE, 0.0),
            max_fitness: max_fitness.is_finite().then_some(max_fitness),
            elapsed_seconds,
            evaluations_per_second: if elapsed_seconds > 0.0 {
                total_evaluations as f64 / elapsed_seconds
            } else {
                0.0
            },
        };

        let best = repertoire.best().map(|elite| EliteSummary {
            niche: elite.niche,
            fitness: elite.fitness,
            descriptor: elite.descriptor.to_vec(),
            genotype: elite.genotype.clone(),
        });

        Self {
            config,
            stats,
            history: RunHistory::from_metrics(history),
            best,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::compute::evolution::{DescriptorBounds, compute_grid_centroids};

    fn metrics(qd: f32, max: f32) -> Metrics {
        Metrics::from([(QD_SCORE.to_string(), qd), (MAX_FITNESS.to_string(), max)])
    }

    #[test]
    fn test_history_maps_non_finite_to_none() {
        let history = RunHistory::from_metrics(&[
            metrics(0.0, f32::NEG_INFINITY),
            metrics(2.0, -1.0),
        ]);
        assert_eq!(history.len(), 2);
        assert_eq!(history.series(MAX_FITNESS), Some(&[None, Some(-1.0)][..]));
        assert_eq!(history.series(QD_SCORE), Some(&[Some(0.0), Some(2.0)][..]));
    }

    #[test]
    fn test_history_backfills_missing_metrics() {
        let mut history = RunHistory::default();
        history.push(&metrics(1.0, 1.0));
        history.push(&Metrics::from([("late".to_string(), 3.0)]));
        assert_eq!(history.series("late"), Some(&[None, Some(3.0)][..]));
        assert_eq!(history.series(QD_SCORE), Some(&[Some(1.0), None][..]));
    }

    #[test]
    fn test_report_roundtrip() {
        let bounds = DescriptorBounds::uniform(2, 0.0, 1.0).unwrap();
        let centroids = Arc::new(compute_grid_centroids(&[2, 2], &bounds).unwrap());
        let repertoire = Repertoire::init(
            &[vec![0.1f32, 0.2], vec![0.9, 0.9]],
            &[-1.0, -0.5],
            &[vec![0.1, 0.2], vec![0.9, 0.9]],
            centroids,
        )
        .unwrap();

        let history = vec![metrics(1.0, f32::NEG_INFINITY), metrics(3.5, -0.5)];
        let report = RunReport::new(QdConfig::default(), &repertoire, &history, 30, 1.5);

        assert_eq!(report.stats.generations, 2);
        assert_eq!(report.stats.occupied_niches, 2);
        assert_eq!(report.stats.qd_score, 3.5);
        assert_eq!(report.stats.max_fitness, Some(-0.5));
        assert_eq!(report.stats.evaluations_per_second, 20.0);
        let best = report.best.as_ref().unwrap();
        assert_eq!(best.niche, 3);
        assert_eq!(best.genotype, vec![0.9, 0.9]);

        let json = serde_json::to_string(&report).unwrap();
        let back: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }
}

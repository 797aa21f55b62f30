//! Repertoire summary metrics.

use std::collections::BTreeMap;

use super::archive::Repertoire;

/// Named scalar metrics of one generation.
pub type Metrics = BTreeMap<String, f32>;

pub const QD_SCORE: &str = "qd_score";
pub const COVERAGE: &str = "coverage";
pub const MAX_FITNESS: &str = "max_fitness";
pub const MEAN_FITNESS: &str = "mean_fitness";

/// Summarises a repertoire into [`Metrics`].
pub trait MetricsFunction<G> {
    fn compute(&self, repertoire: &Repertoire<G>) -> Metrics;
}

impl<G, F> MetricsFunction<G> for F
where
    F: Fn(&Repertoire<G>) -> Metrics,
{
    fn compute(&self, repertoire: &Repertoire<G>) -> Metrics {
        self(repertoire)
    }
}

/// The standard quality-diversity metrics.
///
/// - `qd_score`: sum over occupied niches of `fitness + qd_offset`
/// - `coverage`: percentage of occupied niches
/// - `max_fitness`, `mean_fitness`: over occupied niches, `-inf` when empty
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QdMetrics {
    /// Added to each fitness so that QD-scores stay non-negative.
    pub qd_offset: f32,
}

impl QdMetrics {
    pub fn new(qd_offset: f32) -> Self {
        Self { qd_offset }
    }
}

impl<G> MetricsFunction<G> for QdMetrics {
    fn compute(&self, repertoire: &Repertoire<G>) -> Metrics {
        let occupied: Vec<f32> = repertoire.elites().map(|e| e.fitness).collect();
        let count = occupied.len();

        let sum: f32 = occupied.iter().sum();
        let qd_score: f32 = occupied.iter().map(|f| f + self.qd_offset).sum();
        let coverage = if repertoire.capacity() == 0 {
            0.0
        } else {
            100.0 * count as f32 / repertoire.capacity() as f32
        };
        let max_fitness = occupied.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mean_fitness = if count == 0 {
            f32::NEG_INFINITY
        } else {
            sum / count as f32
        };

        Metrics::from([
            (QD_SCORE.to_string(), qd_score),
            (COVERAGE.to_string(), coverage),
            (MAX_FITNESS.to_string(), max_fitness),
            (MEAN_FITNESS.to_string(), mean_fitness),
        ])
    }
}

//! Niche centroids partitioning the descriptor space.
//!
//! Two generators are provided: a centroidal Voronoi tessellation built by
//! k-means over uniform samples, and a regular grid.

use std::cmp::Ordering;

#[cfg(not(target_arch = "wasm32"))]
use rayon::prelude::*;

use rand::Rng;

use crate::compute::RandomKey;

/// Default k-means iteration cap.
pub const DEFAULT_MAX_ITERATIONS: usize = 300;

/// Default convergence tolerance on the largest centroid shift.
pub const DEFAULT_TOLERANCE: f32 = 1e-4;

/// Errors raised while building a centroid set.
#[derive(Debug, thiserror::Error)]
pub enum CentroidError {
    #[error("Number of centroids must be non-zero")]
    NoCentroids,
    #[error("Descriptor dimension must be non-zero")]
    ZeroDimension,
    #[error("Cannot build {num_centroids} centroids from {num_samples} samples")]
    TooFewSamples {
        num_centroids: usize,
        num_samples: usize,
    },
    #[error("Invalid bounds for descriptor dimension {dimension}: [{min}, {max}]")]
    InvalidBounds { dimension: usize, min: f32, max: f32 },
    #[error("Bounds have {min} minimum values but {max} maximum values")]
    BoundsLengthMismatch { min: usize, max: usize },
    #[error("Centroid data length {len} is not a multiple of dimension {dimension}")]
    RaggedData { len: usize, dimension: usize },
    #[error("Centroids {first} and {second} are identical")]
    Degenerate { first: usize, second: usize },
    #[error("Grid shape has {shape} dimensions but bounds have {bounds}")]
    GridShapeMismatch { shape: usize, bounds: usize },
}

/// Axis-aligned box bounding the descriptor space.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorBounds {
    min: Vec<f32>,
    max: Vec<f32>,
}

impl DescriptorBounds {
    /// Per-dimension bounds.
    pub fn new(min: Vec<f32>, max: Vec<f32>) -> Result<Self, CentroidError> {
        if min.len() != max.len() {
            return Err(CentroidError::BoundsLengthMismatch {
                min: min.len(),
                max: max.len(),
            });
        }
        if min.is_empty() {
            return Err(CentroidError::ZeroDimension);
        }
        for (dimension, (&lo, &hi)) in min.iter().zip(&max).enumerate() {
            if !lo.is_finite() || !hi.is_finite() || lo >= hi {
                return Err(CentroidError::InvalidBounds {
                    dimension,
                    min: lo,
                    max: hi,
                });
            }
        }
        Ok(Self { min, max })
    }

    /// The same `[min, max]` range on every one of `dimension` axes.
    pub fn uniform(dimension: usize, min: f32, max: f32) -> Result<Self, CentroidError> {
        Self::new(vec![min; dimension], vec![max; dimension])
    }

    pub fn dimension(&self) -> usize {
        self.min.len()
    }

    pub fn min(&self) -> &[f32] {
        &self.min
    }

    pub fn max(&self) -> &[f32] {
        &self.max
    }

    /// Whether `point` lies inside the box (inclusive).
    pub fn contains(&self, point: &[f32]) -> bool {
        point.len() == self.dimension()
            && point
                .iter()
                .zip(self.min.iter().zip(&self.max))
                .all(|(&x, (&lo, &hi))| x >= lo && x <= hi)
    }
}

/// Immutable, ordered set of niche centroids.
#[derive(Debug, Clone, PartialEq)]
pub struct Centroids {
    dimension: usize,
    /// Row-major `len * dimension` coordinates.
    points: Vec<f32>,
}

impl Centroids {
    /// Build from flat row-major coordinates.
    pub fn from_flat(dimension: usize, points: Vec<f32>) -> Result<Self, CentroidError> {
        if dimension == 0 {
            return Err(CentroidError::ZeroDimension);
        }
        if points.is_empty() {
            return Err(CentroidError::NoCentroids);
        }
        if points.len() % dimension != 0 {
            return Err(CentroidError::RaggedData {
                len: points.len(),
                dimension,
            });
        }

        let centroids = Self { dimension, points };
        centroids.check_distinct()?;
        Ok(centroids)
    }

    /// Build from one vector per centroid.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self, CentroidError> {
        let dimension = rows.first().map(Vec::len).ok_or(CentroidError::NoCentroids)?;
        let mut points = Vec::with_capacity(rows.len() * dimension);
        for row in rows {
            if row.len() != dimension {
                return Err(CentroidError::RaggedData {
                    len: row.len(),
                    dimension,
                });
            }
            points.extend_from_slice(row);
        }
        Self::from_flat(dimension, points)
    }

    /// Number of centroids (niches).
    pub fn len(&self) -> usize {
        self.points.len() / self.dimension
    }

    /// Always false for a constructed set.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Descriptor dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Coordinates of centroid `index`.
    pub fn get(&self, index: usize) -> Option<&[f32]> {
        let start = index.checked_mul(self.dimension)?;
        self.points.get(start..start + self.dimension)
    }

    /// Iterate centroid coordinates in index order.
    pub fn iter(&self) -> impl Iterator<Item = &[f32]> {
        self.points.chunks_exact(self.dimension)
    }

    /// Flat row-major coordinates.
    pub fn as_flat(&self) -> &[f32] {
        &self.points
    }

    /// Index of the centroid nearest to `point` (Euclidean), lowest index on ties.
    ///
    /// `point` must have `self.dimension()` coordinates.
    pub fn nearest(&self, point: &[f32]) -> usize {
        debug_assert_eq!(point.len(), self.dimension);
        nearest_in(&self.points, self.dimension, point).0
    }

    fn check_distinct(&self) -> Result<(), CentroidError> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by(|&a, &b| compare_rows(self.row(a), self.row(b)).then(a.cmp(&b)));

        for pair in order.windows(2) {
            if compare_rows(self.row(pair[0]), self.row(pair[1])) == Ordering::Equal {
                return Err(CentroidError::Degenerate {
                    first: pair[0].min(pair[1]),
                    second: pair[0].max(pair[1]),
                });
            }
        }
        Ok(())
    }

    fn row(&self, index: usize) -> &[f32] {
        &self.points[index * self.dimension..(index + 1) * self.dimension]
    }
}

fn compare_rows(a: &[f32], b: &[f32]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| x.total_cmp(y))
        .find(|o| *o != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

/// Squared Euclidean distance.
#[inline]
pub fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Nearest row of a flat point set and its squared distance.
fn nearest_in(points: &[f32], dimension: usize, point: &[f32]) -> (usize, f32) {
    let mut best = 0;
    let mut best_distance = f32::INFINITY;
    for (i, centroid) in points.chunks_exact(dimension).enumerate() {
        let d = squared_distance(point, centroid);
        if d < best_distance {
            best = i;
            best_distance = d;
        }
    }
    (best, best_distance)
}

/// Parameters for CVT centroid generation.
#[derive(Debug, Clone)]
pub struct CvtParams {
    /// Number of niches K.
    pub num_centroids: usize,
    /// Number of uniform samples S clustered into K centroids.
    pub num_init_samples: usize,
    /// Descriptor space bounds.
    pub bounds: DescriptorBounds,
    /// k-means iteration cap.
    pub max_iterations: usize,
    /// Stop once no centroid moves further than this.
    pub tolerance: f32,
}

impl CvtParams {
    pub fn new(num_centroids: usize, num_init_samples: usize, bounds: DescriptorBounds) -> Self {
        Self {
            num_centroids,
            num_init_samples,
            bounds,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f32) -> Self {
        self.tolerance = tolerance;
        self
    }
}

/// Compute CVT centroids: sample the box uniformly and cluster with k-means.
///
/// Returns the centroids and the remainder of `key`.
pub fn compute_cvt_centroids(
    params: &CvtParams,
    key: RandomKey,
) -> Result<(Centroids, RandomKey), CentroidError> {
    let k = params.num_centroids;
    let s = params.num_init_samples;
    let dim = params.bounds.dimension();

    if k == 0 {
        return Err(CentroidError::NoCentroids);
    }
    if k > s {
        return Err(CentroidError::TooFewSamples {
            num_centroids: k,
            num_samples: s,
        });
    }

    let (key, sample_key) = key.split();
    let (key, init_key) = key.split();

    let samples = sample_uniform(&params.bounds, s, sample_key);

    // Seed from k distinct samples (partial Fisher-Yates).
    let mut rng = init_key.rng();
    let mut order: Vec<usize> = (0..s).collect();
    for i in 0..k {
        let j = rng.gen_range(i..s);
        order.swap(i, j);
    }
    let mut centroids: Vec<f32> = order[..k]
        .iter()
        .flat_map(|&i| samples[i * dim..(i + 1) * dim].iter().copied())
        .collect();

    let mut iterations = 0;
    let mut converged = false;
    while iterations < params.max_iterations {
        iterations += 1;

        let assignments = assign(&samples, &centroids, dim);

        let mut sums = vec![0.0f64; k * dim];
        let mut counts = vec![0usize; k];
        for (sample, &(cluster, _)) in samples.chunks_exact(dim).zip(&assignments) {
            counts[cluster] += 1;
            for (acc, &x) in sums[cluster * dim..(cluster + 1) * dim].iter_mut().zip(sample) {
                *acc += x as f64;
            }
        }

        let mut next = vec![0.0f32; k * dim];
        let mut empty = Vec::new();
        for cluster in 0..k {
            let row = cluster * dim..(cluster + 1) * dim;
            if counts[cluster] == 0 {
                empty.push(cluster);
                next[row.clone()].copy_from_slice(&centroids[row]);
            } else {
                let n = counts[cluster] as f64;
                for (dst, &acc) in next[row.clone()].iter_mut().zip(&sums[row]) {
                    *dst = (acc / n) as f32;
                }
            }
        }

        if !empty.is_empty() {
            log::debug!(
                "k-means iteration {}: re-seeding {} empty clusters",
                iterations,
                empty.len()
            );
            reseed_empty(&mut next, &empty, &samples, &assignments, &counts, dim);
        }

        let shift = centroids
            .chunks_exact(dim)
            .zip(next.chunks_exact(dim))
            .map(|(a, b)| squared_distance(a, b))
            .fold(0.0f32, f32::max)
            .sqrt();

        centroids = next;

        if empty.is_empty() && shift <= params.tolerance {
            converged = true;
            break;
        }
    }

    log::debug!(
        "CVT: {} centroids in {} dims from {} samples, {} iterations (converged: {})",
        k,
        dim,
        s,
        iterations,
        converged
    );

    Ok((Centroids::from_flat(dim, centroids)?, key))
}

/// Centroids at the centres of a regular grid with `cells_per_dimension[d]`
/// cells along axis `d`. The last axis varies fastest.
pub fn compute_grid_centroids(
    cells_per_dimension: &[usize],
    bounds: &DescriptorBounds,
) -> Result<Centroids, CentroidError> {
    let dim = bounds.dimension();
    if cells_per_dimension.len() != dim {
        return Err(CentroidError::GridShapeMismatch {
            shape: cells_per_dimension.len(),
            bounds: dim,
        });
    }
    if cells_per_dimension.contains(&0) {
        return Err(CentroidError::NoCentroids);
    }

    let total: usize = cells_per_dimension.iter().product();
    let mut points = Vec::with_capacity(total * dim);
    let mut index = vec![0usize; dim];

    for _ in 0..total {
        for d in 0..dim {
            let width = (bounds.max[d] - bounds.min[d]) / cells_per_dimension[d] as f32;
            points.push(bounds.min[d] + (index[d] as f32 + 0.5) * width);
        }
        // Advance the mixed-radix counter.
        for d in (0..dim).rev() {
            index[d] += 1;
            if index[d] < cells_per_dimension[d] {
                break;
            }
            index[d] = 0;
        }
    }

    Centroids::from_flat(dim, points)
}

fn sample_uniform(bounds: &DescriptorBounds, count: usize, key: RandomKey) -> Vec<f32> {
    let mut rng = key.rng();
    let mut samples = Vec::with_capacity(count * bounds.dimension());
    for _ in 0..count {
        for (&lo, &hi) in bounds.min.iter().zip(&bounds.max) {
            samples.push(rng.gen_range(lo..hi));
        }
    }
    samples
}

#[cfg(not(target_arch = "wasm32"))]
fn assign(samples: &[f32], centroids: &[f32], dim: usize) -> Vec<(usize, f32)> {
    samples
        .par_chunks_exact(dim)
        .map(|sample| nearest_in(centroids, dim, sample))
        .collect()
}

#[cfg(target_arch = "wasm32")]
fn assign(samples: &[f32], centroids: &[f32], dim: usize) -> Vec<(usize, f32)> {
    samples
        .chunks_exact(dim)
        .map(|sample| nearest_in(centroids, dim, sample))
        .collect()
}

/// Move each empty cluster onto the sample farthest from its current
/// centroid. Every re-seeded cluster takes a different sample, and a sample
/// is never taken from a cluster it would leave empty.
fn reseed_empty(
    centroids: &mut [f32],
    empty: &[usize],
    samples: &[f32],
    assignments: &[(usize, f32)],
    counts: &[usize],
    dim: usize,
) {
    let mut members = counts.to_vec();

    let mut distances: Vec<f32> = assignments.iter().map(|&(_, d)| d).collect();
    for &cluster in empty {
        let mut farthest = None;
        let mut farthest_distance = f32::NEG_INFINITY;
        for (i, &d) in distances.iter().enumerate() {
            if members[assignments[i].0] > 1 && d > farthest_distance {
                farthest = Some(i);
                farthest_distance = d;
            }
        }
        let Some(farthest) = farthest else {
            break;
        };
        centroids[cluster * dim..(cluster + 1) * dim]
            .copy_from_slice(&samples[farthest * dim..(farthest + 1) * dim]);
        members[assignments[farthest].0] -= 1;
        distances[farthest] = f32::NEG_INFINITY;
    }
}

//! Detection-to-track association
//!
//! Costs are Euclidean distances in (x, y, area) space between each track's
//! predicted observation and each detection. The assignment minimizing the
//! total cost is found with the Hungarian (Kuhn-Munkres) algorithm, then pairs
//! whose cost reaches the gate are discarded.

use storm_core::DetectedCell;
use tracing::trace;

/// Cost used in place of non-finite distances; always rejected by the gate
const UNREACHABLE_COST: f64 = 1e12;

/// Dense row-major cost matrix (rows = tracks, columns = detections)
#[derive(Debug, Clone, PartialEq)]
pub struct CostMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl CostMatrix {
    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> f64) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for i in 0..rows {
            for j in 0..cols {
                let cost = f(i, j);
                data.push(if cost.is_finite() { cost } else { UNREACHABLE_COST });
            }
        }
        Self { rows, cols, data }
    }

    pub fn from_rows(rows: &[Vec<f64>]) -> Self {
        let cols = rows.first().map_or(0, Vec::len);
        Self::from_fn(rows.len(), cols, |i, j| rows[i][j])
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    /// Total cost of a set of (row, col) pairs
    pub fn total(&self, pairs: &[(usize, usize)]) -> f64 {
        pairs.iter().map(|&(r, c)| self.get(r, c)).sum()
    }
}

/// Result of associating one frame's detections with the active tracks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Association {
    /// (track index, detection index) pairs within the gate
    pub matches: Vec<(usize, usize)>,
    pub unmatched_tracks: Vec<usize>,
    pub unmatched_detections: Vec<usize>,
}

/// Euclidean distance between two (x, y, area) vectors
pub fn euclidean_cost(a: [f64; 3], b: [f64; 3]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(p, q)| (p - q) * (p - q))
        .sum::<f64>()
        .sqrt()
}

/// Cost matrix between predicted track observations and detections
pub fn build_cost_matrix(predictions: &[[f64; 3]], detections: &[DetectedCell]) -> CostMatrix {
    CostMatrix::from_fn(predictions.len(), detections.len(), |i, j| {
        euclidean_cost(predictions[i], detections[j].observation())
    })
}

/// Associate detections with predicted tracks, rejecting pairs at or above `gate`
pub fn associate(predictions: &[[f64; 3]], detections: &[DetectedCell], gate: f64) -> Association {
    let cost = build_cost_matrix(predictions, detections);
    gate_assignment(&cost, &solve_assignment(&cost), gate)
}

/// Split an assignment into gated matches and leftovers
pub fn gate_assignment(cost: &CostMatrix, pairs: &[(usize, usize)], gate: f64) -> Association {
    let mut track_matched = vec![false; cost.rows()];
    let mut detection_matched = vec![false; cost.cols()];
    let mut matches = Vec::with_capacity(pairs.len());

    for &(t, d) in pairs {
        let c = cost.get(t, d);
        if c < gate {
            track_matched[t] = true;
            detection_matched[d] = true;
            matches.push((t, d));
        } else {
            trace!("Rejected pair ({}, {}) with cost {:.2} above gate {:.2}", t, d, c, gate);
        }
    }

    Association {
        matches,
        unmatched_tracks: (0..cost.rows()).filter(|&t| !track_matched[t]).collect(),
        unmatched_detections: (0..cost.cols()).filter(|&d| !detection_matched[d]).collect(),
    }
}

/// Minimum total cost assignment on a rectangular matrix
///
/// Returns `min(rows, cols)` (row, col) pairs sorted by row. The matrix is
/// padded to square with zero-cost dummy entries, which does not change the
/// optimum over the real entries.
pub fn solve_assignment(cost: &CostMatrix) -> Vec<(usize, usize)> {
    if cost.rows() == 0 || cost.cols() == 0 {
        return Vec::new();
    }

    let n = cost.rows().max(cost.cols());
    let padded = |i: usize, j: usize| {
        if i < cost.rows() && j < cost.cols() {
            cost.get(i, j)
        } else {
            0.0
        }
    };

    let row_assign = run_hungarian(n, padded);

    row_assign
        .into_iter()
        .enumerate()
        .filter(|&(r, c)| r < cost.rows() && c < cost.cols())
        .collect()
}

/// Hungarian algorithm on a square n x n matrix with potentials
///
/// Returns `row_assign[row] = col`.
fn run_hungarian(n: usize, cost: impl Fn(usize, usize) -> f64) -> Vec<usize> {
    // Potentials for rows (u) and columns (v), 1-indexed with a sentinel at 0
    let mut u = vec![0.0f64; n + 1];
    let mut v = vec![0.0f64; n + 1];
    // p[j] = row assigned to column j (0 = none)
    let mut p = vec![0usize; n + 1];
    // way[j] = previous column on the augmenting path
    let mut way = vec![0usize; n + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0usize;
        let mut minv = vec![f64::INFINITY; n + 1];
        let mut used = vec![false; n + 1];

        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0;
            for j in 1..=n {
                if !used[j] {
                    let reduced = cost(i0 - 1, j - 1) - u[i0] - v[j];
                    if reduced < minv[j] {
                        minv[j] = reduced;
                        way[j] = j0;
                    }
                    if minv[j] < delta {
                        delta = minv[j];
                        j1 = j;
                    }
                }
            }
            for j in 0..=n {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }
            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }

        // Augment along the path
        loop {
            let j1 = way[j0];
            p[j0] = p[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut row_assign = vec![0usize; n];
    for j in 1..=n {
        if p[j] != 0 {
            row_assign[p[j] - 1] = j - 1;
        }
    }
    row_assign
}

/// Greedy nearest-per-row assignment, kept as a baseline for comparison
pub fn greedy_assignment(cost: &CostMatrix) -> Vec<(usize, usize)> {
    let mut taken = vec![false; cost.cols()];
    let mut pairs = Vec::new();
    for r in 0..cost.rows() {
        let best = (0..cost.cols())
            .filter(|&c| !taken[c])
            .min_by(|&a, &b| cost.get(r, a).total_cmp(&cost.get(r, b)));
        if let Some(c) = best {
            taken[c] = true;
            pairs.push((r, c));
        }
    }
    pairs
}

// ============================================================================
// TESTS
// ============================================================================

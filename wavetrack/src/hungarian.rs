//! Hungarian algorithm implementation for optimal assignment
//!
//! Used both for frame-level detection-to-identity assignment and for the
//! track-level fragment linking of the cleanup engine. Entries that are not
//! finite or exceed the gating threshold are disallowed and never returned.

use ndarray::ArrayView2;
use pathfinding::prelude::{kuhn_munkres_min, Matrix};
use rayon::prelude::*;

/// Resolution of the integer costs handed to the solver
const COST_SCALE: f64 = 1_000_000.0;

/// Result of Hungarian assignment algorithm
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentResult {
    /// Assignments as (row_idx, col_idx) pairs, ascending by row
    pub assignments: Vec<(usize, usize)>,
    /// Indices of unassigned rows
    pub unassigned_rows: Vec<usize>,
    /// Indices of unassigned columns
    pub unassigned_cols: Vec<usize>,
    /// Total cost of the accepted assignments
    pub total_cost: f64,
}

impl AssignmentResult {
    fn empty(num_rows: usize, num_cols: usize) -> Self {
        AssignmentResult {
            assignments: Vec::new(),
            unassigned_rows: (0..num_rows).collect(),
            unassigned_cols: (0..num_cols).collect(),
            total_cost: 0.0,
        }
    }

    /// Column assigned to every row
    pub fn row_to_col(&self, num_rows: usize) -> Vec<Option<usize>> {
        let mut assignment_vector = vec![None; num_rows];
        for &(row, col) in &self.assignments {
            assignment_vector[row] = Some(col);
        }
        assignment_vector
    }
}

/// Hungarian assignment solver
pub struct HungarianSolver;

impl HungarianSolver {
    /// Solve the minimum-cost assignment problem
    ///
    /// # Arguments
    /// * `cost_matrix` - cost_matrix\[i\]\[j\] is the cost of assigning row i to column j
    /// * `threshold` - Maximum allowed cost for a valid assignment
    ///
    /// Among all matchings, the one with the most allowed pairs wins; ties in
    /// cardinality are decided by the lowest total cost.
    pub fn solve(cost_matrix: ArrayView2<f64>, threshold: f64) -> AssignmentResult {
        let num_rows = cost_matrix.nrows();
        let num_cols = cost_matrix.ncols();

        if num_rows == 0 || num_cols == 0 {
            return AssignmentResult::empty(num_rows, num_cols);
        }

        let allowed = |cost: f64| cost.is_finite() && cost <= threshold;

        // The sentinel outweighs any sum of allowed costs, so cardinality dominates
        let size = num_rows.max(num_cols);
        let max_allowed = (threshold.max(0.0) * COST_SCALE).ceil() as i64;
        let sentinel = max_allowed.saturating_add(1).saturating_mul(size as i64 + 1);
        let mut int_cost_matrix = Matrix::new(size, size, sentinel);

        // Parallel filling of the actual costs
        let cost_data: Vec<(usize, usize, i64)> = (0..num_rows)
            .into_par_iter()
            .flat_map_iter(|i| {
                (0..num_cols).filter_map(move |j| {
                    let cost = cost_matrix[[i, j]];
                    if allowed(cost) {
                        Some((i, j, (cost.max(0.0) * COST_SCALE).round() as i64))
                    } else {
                        None
                    }
                })
            })
            .collect();

        // Apply costs to matrix (sequential, as Matrix is not thread-safe for writes)
        for (i, j, cost) in cost_data {
            int_cost_matrix[(i, j)] = cost;
        }

        let (_, raw_assignments) = kuhn_munkres_min(&int_cost_matrix);

        let assignments: Vec<(usize, usize)> = raw_assignments
            .iter()
            .enumerate()
            .filter(|&(row, &col)| row < num_rows && col < num_cols && allowed(cost_matrix[[row, col]]))
            .map(|(row, &col)| (row, col))
            .collect();

        let mut assigned_rows = vec![false; num_rows];
        let mut assigned_cols = vec![false; num_cols];
        for &(row, col) in &assignments {
            assigned_rows[row] = true;
            assigned_cols[col] = true;
        }

        let total_cost = assignments
            .iter()
            .map(|&(row, col)| cost_matrix[[row, col]])
            .sum();

        AssignmentResult {
            unassigned_rows: (0..num_rows).filter(|&i| !assigned_rows[i]).collect(),
            unassigned_cols: (0..num_cols).filter(|&j| !assigned_cols[j]).collect(),
            assignments,
            total_cost,
        }
    }

    /// Pairs of assignments whose exchange keeps the total cost within `tolerance`
    ///
    /// Returns `(a, b, cost_difference)` with `a < b` indexing `result.assignments`.
    pub fn tied_exchanges(
        cost_matrix: ArrayView2<f64>,
        result: &AssignmentResult,
        threshold: f64,
        tolerance: f64,
    ) -> Vec<(usize, usize, f64)> {
        let allowed = |cost: f64| cost.is_finite() && cost <= threshold;
        let pairs = &result.assignments;

        (0..pairs.len())
            .into_par_iter()
            .flat_map_iter(|a| {
                (a + 1..pairs.len()).filter_map(move |b| {
                    let (ra, ca) = pairs[a];
                    let (rb, cb) = pairs[b];
                    let swapped_a = cost_matrix[[ra, cb]];
                    let swapped_b = cost_matrix[[rb, ca]];
                    if !allowed(swapped_a) || !allowed(swapped_b) {
                        return None;
                    }
                    let current = cost_matrix[[ra, ca]] + cost_matrix[[rb, cb]];
                    let diff = (swapped_a + swapped_b - current).abs();
                    (diff <= tolerance).then_some((a, b, diff))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_optimal_beats_greedy() {
        // Greedy would take (0, 0) at cost 1 and force (1, 1) at cost 10
        let cost = array![[1.0, 2.0], [2.0, 10.0]];
        let result = HungarianSolver::solve(cost.view(), 100.0);
        assert_eq!(result.assignments, vec![(0, 1), (1, 0)]);
        assert!((result.total_cost - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_gated_entries_are_never_assigned() {
        let cost = array![[0.5, f64::INFINITY], [f64::INFINITY, 3.0]];
        let result = HungarianSolver::solve(cost.view(), 1.0);
        assert_eq!(result.assignments, vec![(0, 0)]);
        assert_eq!(result.unassigned_rows, vec![1]);
        assert_eq!(result.unassigned_cols, vec![1]);
    }

    #[test]
    fn test_cardinality_dominates_cost() {
        // Taking (0, 0) alone is cheaper but leaves row 1 unmatched
        let cost = array![[0.1, 0.9], [0.2, f64::INFINITY]];
        let result = HungarianSolver::solve(cost.view(), 1.0);
        assert_eq!(result.assignments, vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn test_rectangular_matrices() {
        let cost = array![[0.3, 0.1, 0.7]];
        let result = HungarianSolver::solve(cost.view(), 1.0);
        assert_eq!(result.assignments, vec![(0, 1)]);
        assert_eq!(result.unassigned_cols, vec![0, 2]);

        let tall = array![[0.3], [0.1], [0.7]];
        let result = HungarianSolver::solve(tall.view(), 1.0);
        assert_eq!(result.assignments, vec![(1, 0)]);
        assert_eq!(result.row_to_col(3), vec![None, Some(0), None]);
    }

    #[test]
    fn test_empty_matrix() {
        let cost = ndarray::Array2::<f64>::zeros((0, 3));
        let result = HungarianSolver::solve(cost.view(), 1.0);
        assert!(result.assignments.is_empty());
        assert_eq!(result.unassigned_cols, vec![0, 1, 2]);
    }

    #[test]
    fn test_tied_exchanges() {
        let cost = array![[0.5, 0.5], [0.5, 0.5]];
        let result = HungarianSolver::solve(cost.view(), 1.0);
        let ties = HungarianSolver::tied_exchanges(cost.view(), &result, 1.0, 1e-9);
        assert_eq!(ties.len(), 1);

        let clear = array![[0.1, 0.9], [0.9, 0.1]];
        let result = HungarianSolver::solve(clear.view(), 1.0);
        assert!(HungarianSolver::tied_exchanges(clear.view(), &result, 1.0, 1e-9).is_empty());
    }
}

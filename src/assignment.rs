//! Bipartite assignment solvers: Hungarian (optimal) and greedy.
//!
//! [`pathfinding::kuhn_munkres_min`] only accepts `Ord` weights, so costs
//! are bridged through a scaled `i64` matrix (mirroring how IoU scores get
//! bridged through a fixed multiplier elsewhere), and rows/columns are
//! transposed when there are more rows than columns since the solver
//! requires `rows <= columns`.

use std::collections::HashSet;

use pathfinding::prelude::{Matrix, kuhn_munkres_min};

/// Scale applied before bridging `f64` costs into the integer weights the
/// Hungarian solver requires.
const COST_SCALE: f64 = 10_000.0;

/// Sentinel standing in for `+∞` in the scaled integer matrix. Must stay
/// far below `i64::MAX / rows` so the solver's internal label sums cannot
/// overflow, and strictly larger than any real scaled cost so forbidden
/// edges are never preferred over a real one.
const FORBIDDEN_SCALED: i64 = 1_000_000_000;

/// A dense `f64` cost matrix, `+∞` marking a forbidden pair.
#[derive(Debug, Clone)]
pub struct CostMatrix {
    pub rows: usize,
    pub cols: usize,
    data: Vec<f64>,
}

impl CostMatrix {
    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> f64) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                data.push(f(r, c));
            }
        }
        Self { rows, cols, data }
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    fn scaled(&self, row: usize, col: usize) -> i64 {
        let v = self.get(row, col);
        if v.is_infinite() || v.is_nan() {
            FORBIDDEN_SCALED
        } else {
            (v * COST_SCALE).round() as i64
        }
    }
}

/// Minimum-cost assignment on a (possibly rectangular) cost matrix.
/// Forbidden (`+∞`) pairs never appear in the output.
pub fn hungarian_matching(cost: &CostMatrix) -> Vec<(usize, usize)> {
    if cost.rows == 0 || cost.cols == 0 {
        return Vec::new();
    }

    let mut scaled = Matrix::new(cost.rows, cost.cols, 0i64);
    for r in 0..cost.rows {
        for c in 0..cost.cols {
            scaled[(r, c)] = cost.scaled(r, c);
        }
    }

    let transpose = scaled.rows > scaled.columns;
    let weights = if transpose {
        scaled.transposed()
    } else {
        scaled
    };
    let (_, assignment) = kuhn_munkres_min(&weights);

    assignment
        .into_iter()
        .enumerate()
        .filter_map(|(i, j)| {
            let (row, col) = if transpose { (j, i) } else { (i, j) };
            if cost.get(row, col).is_infinite() {
                None
            } else {
                Some((row, col))
            }
        })
        .collect()
}

/// Repeatedly picks the globally lowest-cost remaining edge, then removes
/// its row and column. Ties broken by ascending row-major order of the
/// cost matrix. Forbidden (`+∞`) pairs never appear in the output.
pub fn greedy_matching(cost: &CostMatrix) -> Vec<(usize, usize)> {
    let mut edges: Vec<(usize, usize)> = (0..cost.rows)
        .flat_map(|r| (0..cost.cols).map(move |c| (r, c)))
        .collect();

    // `sort_by` is stable, so ties keep the row-major enumeration order above.
    edges.sort_by(|&(r1, c1), &(r2, c2)| {
        cost.get(r1, c1)
            .partial_cmp(&cost.get(r2, c2))
            .expect("cost matrix must not contain NaN")
    });

    let mut used_rows = HashSet::new();
    let mut used_cols = HashSet::new();
    let mut matches = Vec::new();

    for (row, col) in edges {
        if cost.get(row, col).is_infinite() {
            continue;
        }
        if used_rows.contains(&row) || used_cols.contains(&col) {
            continue;
        }
        used_rows.insert(row);
        used_cols.insert(col);
        matches.push((row, col));
    }

    matches
}

/// Closed set of matching policies, dispatched at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchingKind {
    Hungarian,
    Greedy,
}

impl MatchingKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "hungarian" => Some(Self::Hungarian),
            "greedy" => Some(Self::Greedy),
            _ => None,
        }
    }

    pub fn solve(&self, cost: &CostMatrix) -> Vec<(usize, usize)> {
        match self {
            MatchingKind::Hungarian => hungarian_matching(cost),
            MatchingKind::Greedy => greedy_matching(cost),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_repeats(matches: &[(usize, usize)]) -> bool {
        let rows: HashSet<_> = matches.iter().map(|&(r, _)| r).collect();
        let cols: HashSet<_> = matches.iter().map(|&(_, c)| c).collect();
        rows.len() == matches.len() && cols.len() == matches.len()
    }

    #[test]
    fn hungarian_minimizes_total_cost() {
        // Optimal assignment is (0,1) + (1,0) = 1 + 1 = 2, not the diagonal (10+10).
        let cost = CostMatrix::from_fn(2, 2, |r, c| match (r, c) {
            (0, 0) => 10.0,
            (0, 1) => 1.0,
            (1, 0) => 1.0,
            (1, 1) => 10.0,
            _ => unreachable!(),
        });
        let matches = hungarian_matching(&cost);
        assert!(no_repeats(&matches));
        let total: f64 = matches.iter().map(|&(r, c)| cost.get(r, c)).sum();
        assert_eq!(total, 2.0);
    }

    #[test]
    fn forbidden_pairs_never_appear() {
        let cost = CostMatrix::from_fn(2, 2, |r, c| if r == c { f64::INFINITY } else { 0.0 });
        for matches in [hungarian_matching(&cost), greedy_matching(&cost)] {
            for (r, c) in matches {
                assert_ne!(r, c);
            }
        }
    }

    #[test]
    fn greedy_is_a_valid_matching_with_cost_not_below_hungarian() {
        let cost = CostMatrix::from_fn(3, 3, |r, c| ((r as f64) - (c as f64) * 1.7).abs());
        let greedy = greedy_matching(&cost);
        let hungarian = hungarian_matching(&cost);
        assert!(no_repeats(&greedy));

        let greedy_cost: f64 = greedy.iter().map(|&(r, c)| cost.get(r, c)).sum();
        let hungarian_cost: f64 = hungarian.iter().map(|&(r, c)| cost.get(r, c)).sum();
        assert!(greedy_cost >= hungarian_cost - 1e-9);
    }

    #[test]
    fn greedy_breaks_ties_in_row_major_order() {
        // All-zero matrix: every edge ties, so greedy must pick (0,0) first,
        // then (1,1) is the only remaining row/col-disjoint zero edge.
        let cost = CostMatrix::from_fn(2, 2, |_, _| 0.0);
        assert_eq!(greedy_matching(&cost), vec![(0, 0), (1, 1)]);
    }
}

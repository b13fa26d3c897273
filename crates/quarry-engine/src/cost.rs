//! Page-based cost model.
//!
//! Costs are unitless and only meaningful relative to each other. They
//! are computed from row estimates alone and never look at executor state.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const PAGE_SIZE: f64 = 8192.0;
/// Rows above this count sort with external merge passes
pub const EXTERNAL_SORT_THRESHOLD: f64 = 10_000.0;
const MERGE_FAN_IN: f64 = 16.0;

/// Tunable cost factors
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostFactors {
    pub seq_page: f64,
    pub random_page: f64,
    pub cpu_tuple: f64,
    pub cpu_index_tuple: f64,
    pub cpu_operator: f64,
    pub hash_mem: f64,
    pub sort_mem: f64,
}

impl Default for CostFactors {
    fn default() -> Self {
        Self {
            seq_page: 1.0,
            random_page: 4.0,
            cpu_tuple: 0.01,
            cpu_index_tuple: 0.005,
            cpu_operator: 0.0025,
            hash_mem: 0.002,
            sort_mem: 0.002,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinAlgorithm {
    NestedLoop,
    IndexedNestedLoop,
    Hash,
    Merge,
}

impl JoinAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            JoinAlgorithm::NestedLoop => "nested_loop",
            JoinAlgorithm::IndexedNestedLoop => "indexed_nested_loop",
            JoinAlgorithm::Hash => "hash",
            JoinAlgorithm::Merge => "merge",
        }
    }
}

impl fmt::Display for JoinAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn log2(n: f64) -> f64 {
    if n <= 1.0 {
        0.0
    } else {
        n.log2()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CostModel {
    pub factors: CostFactors,
}

impl CostModel {
    pub fn new(factors: CostFactors) -> Self {
        Self { factors }
    }

    pub fn pages(&self, rows: f64, row_size: f64) -> f64 {
        (rows.max(0.0) * row_size / PAGE_SIZE).ceil().max(1.0)
    }

    pub fn seq_scan(&self, rows: f64, row_size: f64) -> f64 {
        let f = &self.factors;
        self.pages(rows, row_size) * f.seq_page + rows * f.cpu_tuple
    }

    pub fn index_scan(&self, rows: f64, row_size: f64, selectivity: f64) -> f64 {
        let f = &self.factors;
        (self.pages(rows, row_size) * selectivity) * f.random_page
            + (rows * selectivity) * f.cpu_index_tuple
    }

    pub fn nested_loop(&self, left: f64, right: f64) -> f64 {
        left * right * self.factors.cpu_operator
    }

    /// One index probe per outer row
    pub fn indexed_nested_loop(&self, outer: f64, inner: f64) -> f64 {
        let f = &self.factors;
        outer * ((log2(inner) + 1.0) * f.cpu_index_tuple + f.cpu_operator)
    }

    pub fn hash_join(&self, left: f64, right: f64) -> f64 {
        let f = &self.factors;
        (left + right) * f.cpu_operator + left * f.hash_mem
    }

    pub fn merge_join(&self, left: f64, right: f64) -> f64 {
        let f = &self.factors;
        left * log2(left) * f.cpu_operator
            + right * log2(right) * f.cpu_operator
            + (left + right) * f.cpu_operator
            + (left + right) * f.sort_mem
    }

    pub fn join(&self, algorithm: JoinAlgorithm, outer: f64, inner: f64) -> f64 {
        match algorithm {
            JoinAlgorithm::NestedLoop => self.nested_loop(outer, inner),
            JoinAlgorithm::IndexedNestedLoop => self.indexed_nested_loop(outer, inner),
            JoinAlgorithm::Hash => self.hash_join(outer, inner),
            JoinAlgorithm::Merge => self.merge_join(outer, inner),
        }
    }

    pub fn sort(&self, rows: f64, columns: usize, row_size: f64) -> f64 {
        let f = &self.factors;
        let mut cost = rows * log2(rows) * f.cpu_operator + rows * columns.max(1) as f64 * f.sort_mem;
        if rows > EXTERNAL_SORT_THRESHOLD {
            let pages = self.pages(rows, row_size);
            let passes = (pages.ln() / MERGE_FAN_IN.ln()).ceil().max(1.0);
            cost += 2.0 * pages * passes * f.seq_page;
        }
        cost
    }

    /// Grouped aggregation hashes every row; a single aggregate adds nothing
    pub fn aggregate(&self, rows: f64, grouped: bool) -> f64 {
        if grouped {
            rows * (self.factors.cpu_operator + self.factors.hash_mem)
        } else {
            0.0
        }
    }

    /// Per-row predicate or projection evaluation
    pub fn per_row(&self, rows: f64) -> f64 {
        rows * self.factors.cpu_operator
    }

    /// Algorithm choice by input sizes
    pub fn choose_join(&self, outer: f64, inner: f64, inner_indexed: bool) -> JoinAlgorithm {
        if inner_indexed && outer < 1000.0 {
            JoinAlgorithm::IndexedNestedLoop
        } else if outer < 10.0 || inner < 10.0 {
            JoinAlgorithm::NestedLoop
        } else if outer > 10_000.0 && inner > 10_000.0 {
            JoinAlgorithm::Merge
        } else {
            JoinAlgorithm::Hash
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_seq_scan_cost() {
        let model = CostModel::default();
        // 1000 rows of 100 bytes fill 13 pages
        assert!(close(model.seq_scan(1000.0, 100.0), 13.0 + 10.0));
    }

    #[test]
    fn test_index_scan_beats_seq_scan_for_selective_predicates() {
        let model = CostModel::default();
        let seq = model.seq_scan(1000.0, 100.0);
        let idx = model.index_scan(1000.0, 100.0, 0.01);
        assert!(close(idx, 13.0 * 0.01 * 4.0 + 10.0 * 0.005));
        assert!(idx < seq);
    }

    #[test]
    fn test_join_formulas() {
        let model = CostModel::default();
        assert!(close(model.nested_loop(10.0, 20.0), 200.0 * 0.0025));
        assert!(close(model.hash_join(100.0, 50.0), 150.0 * 0.0025 + 100.0 * 0.002));
        let expected = 8.0 * 3.0 * 0.0025 + 4.0 * 2.0 * 0.0025 + 12.0 * 0.0025 + 12.0 * 0.002;
        assert!(close(model.merge_join(8.0, 4.0), expected));
    }

    #[test]
    fn test_external_sort_adds_io() {
        let model = CostModel::default();
        let small = model.sort(10_000.0, 1, 100.0);
        let large = model.sort(10_001.0, 1, 100.0);
        assert!(large - small > 100.0);
    }

    #[test]
    fn test_aggregate_cost() {
        let model = CostModel::default();
        assert!(close(model.aggregate(100.0, true), 100.0 * 0.0045));
        assert_eq!(model.aggregate(100.0, false), 0.0);
    }

    #[test_case(500.0, 5000.0, true => JoinAlgorithm::IndexedNestedLoop; "small outer with index")]
    #[test_case(5.0, 5000.0, false => JoinAlgorithm::NestedLoop; "tiny side")]
    #[test_case(20_000.0, 30_000.0, false => JoinAlgorithm::Merge; "both large")]
    #[test_case(2000.0, 3000.0, false => JoinAlgorithm::Hash; "otherwise hash")]
    #[test_case(2000.0, 3000.0, true => JoinAlgorithm::Hash; "index ignored for large outer")]
    fn test_choose_join(outer: f64, inner: f64, indexed: bool) -> JoinAlgorithm {
        CostModel::default().choose_join(outer, inner, indexed)
    }
}

//! Brute-force Euclidean nearest neighbours over row indices.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Distance-index pair ordered by distance, then index.
#[derive(Debug, Clone, Copy)]
struct DistIdx(f64, usize);

impl PartialEq for DistIdx {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DistIdx {}

impl PartialOrd for DistIdx {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DistIdx {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0).then(self.1.cmp(&other.1))
    }
}

pub(crate) fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

/// The `k` candidates closest to `rows[query]`, nearest first. The query row
/// itself is never returned.
pub(crate) fn nearest(rows: &[Vec<f64>], query: usize, candidates: &[usize], k: usize) -> Vec<usize> {
    if k == 0 {
        return Vec::new();
    }
    let point = &rows[query];
    let mut heap: BinaryHeap<DistIdx> = BinaryHeap::with_capacity(k + 1);
    for &c in candidates {
        if c == query {
            continue;
        }
        let entry = DistIdx(squared_distance(point, &rows[c]), c);
        if heap.len() < k {
            heap.push(entry);
        } else if let Some(top) = heap.peek()
            && entry < *top
        {
            heap.pop();
            heap.push(entry);
        }
    }
    heap.into_sorted_vec().into_iter().map(|DistIdx(_, i)| i).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearest_excludes_query_and_sorts() {
        let rows = vec![vec![0.0], vec![1.0], vec![5.0], vec![2.0]];
        let all: Vec<usize> = (0..rows.len()).collect();
        assert_eq!(nearest(&rows, 0, &all, 2), vec![1, 3]);
        assert_eq!(nearest(&rows, 2, &all, 10), vec![3, 1, 0]);
        assert!(nearest(&rows, 0, &all, 0).is_empty());
    }

    #[test]
    fn equal_distances_prefer_lower_index() {
        let rows = vec![vec![0.0], vec![1.0], vec![-1.0]];
        assert_eq!(nearest(&rows, 0, &[2, 1], 1), vec![1]);
    }
}

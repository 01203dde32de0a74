//! Ranking utilities over walk results.

use crate::walk::NodeVec;
use ordered_float::NotNan;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// The `k` nodes with the largest finite, positive mass, best first.
///
/// Ties are broken by ascending node id so the order is deterministic.
pub fn top_k(scores: &NodeVec, k: usize) -> Vec<(usize, f64)> {
    if k == 0 || scores.is_empty() {
        return Vec::new();
    }
    let mut heap = BinaryHeap::with_capacity(k + 1);
    for (&node, &score) in scores {
        if !score.is_finite() || score <= 0.0 {
            continue;
        }
        let Ok(s) = NotNan::new(score) else { continue };
        let key = (s, Reverse(node));
        if heap.len() < k {
            heap.push(Reverse(key));
        } else if let Some(Reverse(min)) = heap.peek() {
            if key > *min {
                heap.pop();
                heap.push(Reverse(key));
            }
        }
    }
    let mut results: Vec<(NotNan<f64>, Reverse<usize>)> = heap.into_iter().map(|Reverse(k)| k).collect();
    results.sort_unstable_by(|a, b| b.cmp(a));
    results.into_iter().map(|(s, Reverse(n))| (n, s.into_inner())).collect()
}

/// Nodes whose mass is at least `threshold`, in ascending id order.
pub fn above_threshold(scores: &NodeVec, threshold: f64) -> Vec<usize> {
    let mut nodes: Vec<usize> = scores
        .iter()
        .filter(|(_, &m)| m >= threshold)
        .map(|(&n, _)| n)
        .collect();
    nodes.sort_unstable();
    nodes
}

/// Rescale to sum 1. A zero-sum vector is left untouched.
pub fn normalize(scores: &mut NodeVec) {
    let sum: f64 = scores.values().sum();
    if sum > 0.0 {
        for s in scores.values_mut() {
            *s /= sum;
        }
    }
}

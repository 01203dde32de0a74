//! Random walk with reset over feature-weighted edges, and its derivative.
//!
//! Restart links are explicit edges in the graph, so a walk step is a plain
//! redistribution of mass along normalized edge weights. The number of steps is
//! fixed; there is no convergence test.

use crate::graph::{Feature, FeatureGraph};
use crate::params::ParamVector;
use crate::weighting::WeightingScheme;
use std::collections::HashMap;
use tracing::{debug, info};

/// Sparse node -> mass vector.
pub type NodeVec = HashMap<usize, f64>;

/// Sparse node -> feature -> partial derivative of that node's mass.
pub type NodeFeatureVec = HashMap<usize, HashMap<Feature, f64>>;

/// Weight of edge `source -> target`; 0 when the edge does not exist.
///
/// `+inf` is reported as `f64::MAX` so downstream ratios stay finite.
pub fn edge_weight<G: FeatureGraph + ?Sized>(
    graph: &G,
    source: usize,
    target: usize,
    scheme: &dyn WeightingScheme,
    params: &ParamVector,
) -> f64 {
    match graph.features(source, target) {
        Some(phi) => finite(scheme.edge_weight(params, phi)),
        None => 0.0,
    }
}

/// Sum of outgoing edge weights of `node`, saturating at `f64::MAX`.
pub fn total_edge_weight<G: FeatureGraph + ?Sized>(
    graph: &G,
    node: usize,
    scheme: &dyn WeightingScheme,
    params: &ParamVector,
) -> f64 {
    let (_, phis) = graph.edges_ref(node);
    finite(phis.iter().map(|phi| finite(scheme.edge_weight(params, phi))).sum())
}

fn finite(w: f64) -> f64 {
    if w.is_infinite() {
        f64::MAX
    } else {
        w
    }
}

/// Outgoing weights of `node` and their sum, computed once per step.
fn outgoing<G: FeatureGraph + ?Sized>(
    graph: &G,
    node: usize,
    scheme: &dyn WeightingScheme,
    params: &ParamVector,
) -> (Vec<f64>, f64) {
    let (_, phis) = graph.edges_ref(node);
    let weights: Vec<f64> = phis.iter().map(|phi| finite(scheme.edge_weight(params, phi))).collect();
    let z = finite(weights.iter().sum());
    (weights, z)
}

/// Outgoing scores of `node`, with the weights and their sum derived from them.
fn outgoing_scored<G: FeatureGraph + ?Sized>(
    graph: &G,
    node: usize,
    scheme: &dyn WeightingScheme,
    params: &ParamVector,
) -> (Vec<f64>, Vec<f64>, f64) {
    let (_, phis) = graph.edges_ref(node);
    let scores: Vec<f64> = phis.iter().map(|phi| scheme.edge_score(params, phi)).collect();
    let weights: Vec<f64> = scores
        .iter()
        .map(|&s| finite(scheme.edge_weight_function(s).max(0.0)))
        .collect();
    let z = finite(weights.iter().sum());
    (scores, weights, z)
}

/// One step: every node with mass pushes it to its neighbors in proportion to
/// `edge_weight / total_edge_weight`.
///
/// Nodes with zero mass or zero outgoing weight contribute nothing; their mass is
/// dropped, not retained. The result never aliases `vec` and holds no zero entries.
pub fn walk_once<G: FeatureGraph + ?Sized>(
    graph: &G,
    vec: &NodeVec,
    scheme: &dyn WeightingScheme,
    params: &ParamVector,
) -> NodeVec {
    let mut next = NodeVec::with_capacity(vec.len());
    for (&u, &mass) in vec {
        if mass == 0.0 {
            info!(node = u, "zero node mass; skipping");
            continue;
        }
        let (weights, z) = outgoing(graph, u, scheme, params);
        if z == 0.0 {
            info!(node = u, "zero total edge weight; skipping");
            continue;
        }
        let nbrs = graph.near(u);
        for (&v, &w) in nbrs.iter().zip(&weights) {
            let inc = mass * w / z;
            if inc != 0.0 {
                *next.entry(v).or_insert(0.0) += inc;
            }
        }
    }
    next.retain(|_, m| *m != 0.0);
    if next.is_empty() && !vec.is_empty() {
        debug!("walk step left no mass");
    }
    next
}

/// Random walk with reset from `start`, exactly `max_t` steps.
pub fn rwr<G: FeatureGraph + ?Sized>(
    graph: &G,
    start: &NodeVec,
    scheme: &dyn WeightingScheme,
    params: &ParamVector,
    max_t: usize,
) -> NodeVec {
    let mut vec = start.clone();
    for _ in 0..max_t {
        if vec.is_empty() {
            break;
        }
        vec = walk_once(graph, &vec, scheme, params);
    }
    vec
}

/// Final mass vector together with its derivative with respect to each trainable feature.
#[derive(Debug, Clone, Default)]
pub struct WalkDerivatives {
    pub mass: NodeVec,
    pub derivatives: NodeFeatureVec,
    /// Number of non-finite partials that were clamped to zero.
    pub clamped: usize,
}

impl WalkDerivatives {
    pub fn mass_at(&self, node: usize) -> f64 {
        self.mass.get(&node).copied().unwrap_or(0.0)
    }

    pub fn derivative_at(&self, node: usize) -> Option<&HashMap<Feature, f64>> {
        self.derivatives.get(&node)
    }
}

/// [`rwr`] with the derivative of every node's mass carried forward in lockstep.
///
/// For a step from \((p, d)\) to \((p', d')\):
///
/// \[
///   d'_v[f] = \sum_u P_{uv}\, d_u[f] + p_u \frac{\partial P_{uv}}{\partial \theta_f},
///   \qquad
///   \frac{\partial P_{uv}}{\partial \theta_f}
///     = \frac{\partial_f w_{uv} - P_{uv} \sum_k \partial_f w_{uk}}{Z_u}
/// \]
///
/// where \(\partial_f w_{uv} = g'(s_{uv})\,\phi_{uv}[f]\) and \(s_{uv}\) is the edge score.
/// Only features accepted by `trainable` get partials.
pub fn rwr_with_derivatives<G, T>(
    graph: &G,
    start: &NodeVec,
    scheme: &dyn WeightingScheme,
    params: &ParamVector,
    max_t: usize,
    trainable: T,
) -> WalkDerivatives
where
    G: FeatureGraph + ?Sized,
    T: Fn(&str) -> bool,
{
    let mut p = start.clone();
    let mut d = NodeFeatureVec::new();
    let mut clamped = 0usize;

    for step in 0..max_t {
        if p.is_empty() && d.is_empty() {
            break;
        }
        let mut p_next = NodeVec::with_capacity(p.len());
        let mut d_next = NodeFeatureVec::with_capacity(d.len());

        let sources: Vec<usize> = {
            let mut s: Vec<usize> = p.keys().chain(d.keys()).copied().collect();
            s.sort_unstable();
            s.dedup();
            s
        };

        for u in sources {
            let pu = p.get(&u).copied().unwrap_or(0.0);
            let (scores, weights, z) = outgoing_scored(graph, u, scheme, params);
            if z == 0.0 {
                continue;
            }
            let (nbrs, phis) = graph.edges_ref(u);

            // \partial_f w_{uk} per outgoing edge, and their sum over k.
            let edge_derivs: Vec<Vec<(&Feature, f64)>> = phis
                .iter()
                .zip(&scores)
                .map(|(phi, &score)| {
                    let slope = scheme.deriv_edge_weight(score);
                    phi.iter()
                        .filter(|(f, _)| trainable(f))
                        .map(|(f, x)| (f, slope * x))
                        .collect()
                })
                .collect();
            let mut total_deriv: HashMap<&Feature, f64> = HashMap::new();
            for derivs in &edge_derivs {
                for &(f, g) in derivs {
                    *total_deriv.entry(f).or_insert(0.0) += g;
                }
            }
            let du = d.get(&u);

            for ((&v, &w), derivs) in nbrs.iter().zip(&weights).zip(&edge_derivs) {
                let prob = w / z;
                if pu > 0.0 && prob != 0.0 {
                    *p_next.entry(v).or_insert(0.0) += pu * prob;
                }

                let dv = d_next.entry(v).or_default();
                if let Some(du) = du {
                    for (f, &df) in du {
                        let inc = accumulate(prob * df, &mut clamped, u, v, f);
                        *dv.entry(f.clone()).or_insert(0.0) += inc;
                    }
                }
                if pu > 0.0 {
                    for (&f, &tot) in &total_deriv {
                        let own = derivs.iter().find(|(g, _)| *g == f).map_or(0.0, |(_, x)| *x);
                        let dprob = (own - prob * tot) / z;
                        let inc = accumulate(pu * dprob, &mut clamped, u, v, f);
                        *dv.entry(f.clone()).or_insert(0.0) += inc;
                    }
                }
            }
        }

        p_next.retain(|_, m| *m != 0.0);
        d_next.retain(|_, dv| !dv.is_empty());
        debug!(step, nodes = p_next.len(), "derivative walk step");
        p = p_next;
        d = d_next;
    }

    WalkDerivatives {
        mass: p,
        derivatives: d,
        clamped,
    }
}

fn accumulate(value: f64, clamped: &mut usize, u: usize, v: usize, f: &Feature) -> f64 {
    if value.is_finite() {
        value
    } else {
        *clamped += 1;
        debug!(source = u, target = v, feature = %f, value, "non-finite partial clamped to 0");
        0.0
    }
}

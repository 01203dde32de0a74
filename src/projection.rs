//! Feasibility projection: keep every local restart probability at or above `alpha`.
//!
//! After a gradient step, for each node `u` with a restart edge to a query node `q`,
//! \(w_{uq} / Z_u \ge \alpha\) must hold. Violations are repaired by rewriting
//! parameters directly in the shared vector.

use crate::graph::{Feature, FeatureGraph};
use crate::params::ParamVector;
use crate::srw::{Diagnostic, Srw};
use crate::walk::{self, NodeVec};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// How to repair a node whose competing edges carry more than one non-fact feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProjectionStrategy {
    /// Solve for the booster feature on the restart edge, holding everything else fixed.
    ///
    /// The booster is not regularized, so its weight can grow without bound across
    /// epochs; nothing here clamps it.
    Boost,
    /// Shrink every competing trainable feature by the same ratio.
    ///
    /// Approximate: untrainable features on competing edges (such as `id(trueLoop)`)
    /// are left as they are, so the weight they carry still competes with the restart
    /// edge and the local restart probability can stay below `alpha`.
    #[default]
    Suppress,
}

/// What a single-node projection did.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// At most one non-fact feature competes: closed form via `WeightingScheme::projection`.
    SingleFeature { value: f64, competing_edges: usize },
    Boost { value: f64 },
    Suppress { values: Vec<(Feature, f64)> },
}

impl Srw {
    /// Enforce the minimum restart probability at every node of `graph` for every
    /// query node it can restart to.
    ///
    /// Returns the number of nodes that were projected.
    pub fn project_to_feasible<G: FeatureGraph + ?Sized>(
        &self,
        graph: &G,
        params: &ParamVector,
        query: &NodeVec,
    ) -> usize {
        let mut queries: Vec<usize> = query.keys().copied().collect();
        queries.sort_unstable();
        let mut projected = 0usize;
        for &u in graph.node_ids() {
            for &q in &queries {
                if self.project_node(graph, params, u, q).is_some() {
                    projected += 1;
                }
            }
        }
        projected
    }

    /// Check and, if violated, repair the restart probability of `u -> q`.
    pub fn project_node<G: FeatureGraph + ?Sized>(
        &self,
        graph: &G,
        params: &ParamVector,
        u: usize,
        q: usize,
    ) -> Option<Projection> {
        let config = self.config();
        let restart = graph.features(u, q)?;
        if !restart.contains(&config.restart_feature) && !restart.contains(&config.booster_feature) {
            return None;
        }
        let scheme = self.scheme();
        let z = walk::total_edge_weight(graph, u, scheme, params);
        let rw = walk::edge_weight(graph, u, q, scheme, params);
        if !(rw / z < config.alpha) {
            return None;
        }
        let projection = self.project_one_node(graph, params, u, q, z, rw);
        if tracing::enabled!(tracing::Level::DEBUG) {
            let z = walk::total_edge_weight(graph, u, scheme, params);
            let rw = walk::edge_weight(graph, u, q, scheme, params);
            debug!(node = u, query = q, local_alpha = rw / z, "local alpha adjusted");
        }
        Some(projection)
    }

    fn project_one_node<G: FeatureGraph + ?Sized>(
        &self,
        graph: &G,
        params: &ParamVector,
        u: usize,
        q: usize,
        z: f64,
        rw: f64,
    ) -> Projection {
        let config = self.config();
        let scheme = self.scheme();
        let alpha = config.alpha;

        let (nbrs, phis) = graph.edges_ref(u);
        let mut competing: BTreeSet<&Feature> = BTreeSet::new();
        let mut competing_edges = 0usize;
        for (&v, phi) in nbrs.iter().zip(phis) {
            if v == q {
                continue;
            }
            competing_edges += 1;
            competing.extend(phi.features());
        }
        let non_facts = competing
            .iter()
            .filter(|f| !f.starts_with(config.fact_prefix.as_str()))
            .count();
        let trainable: Vec<&Feature> = competing.iter().copied().filter(|f| self.trainable(f)).collect();

        if non_facts <= 1 {
            let value = scheme.projection(rw, alpha, competing_edges);
            for f in &trainable {
                params.set(Feature::clone(f), value);
            }
            debug!(node = u, value, competing_edges, "min-alpha projection: single-feature closed form");
            return Projection::SingleFeature { value, competing_edges };
        }

        let booster_phi = graph
            .features(u, q)
            .and_then(|phi| phi.get(&config.booster_feature))
            .filter(|x| *x != 0.0);
        let projection = match (config.projection, booster_phi) {
            (ProjectionStrategy::Boost, Some(phi_ab)) => {
                // Restart weight w' with w' / (w' + Z - w) = alpha, solved for the booster.
                let target = scheme.inverse_edge_weight_function(alpha / (1.0 - alpha) * (z - rw));
                let default = scheme.default_weight();
                let others: f64 = graph
                    .features(u, q)
                    .map(|phi| {
                        phi.iter()
                            .filter(|(f, _)| ***f != *config.booster_feature)
                            .map(|(f, x)| x * params.get_or(f, default))
                            .sum()
                    })
                    .unwrap_or(0.0);
                let value = (target - others) / phi_ab;
                params.set(config.booster_feature.as_str(), value);
                Projection::Boost { value }
            }
            (strategy, _) => {
                if strategy == ProjectionStrategy::Boost {
                    warn!(node = u, query = q, "restart edge has no booster feature; suppressing instead");
                }
                let default = scheme.default_weight();
                let values: Vec<(Feature, f64)> = trainable
                    .iter()
                    .map(|&f| {
                        let ratio = scheme.edge_weight_function(params.get_or(f, default)) / (z - rw);
                        let value = scheme.inverse_edge_weight_function(ratio * (1.0 - alpha) * rw / alpha);
                        (Feature::clone(f), value)
                    })
                    .collect();
                for (f, value) in &values {
                    params.set(Feature::clone(f), *value);
                }
                Projection::Suppress { values }
            }
        };

        if self.note_violation(Diagnostic::Alpha) {
            warn!(
                node = u,
                query = q,
                local_alpha = rw / z,
                alpha,
                non_facts,
                projection = ?projection,
                "min-alpha assumption violated; using approximate projection"
            );
        }
        projection
    }
}

//! Feature graph adapter traits and the default sparse representation.
//!
//! Every edge `u -> v` carries a sparse feature vector instead of a fixed weight;
//! the walk turns it into a weight using the current parameter vector.

use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// A feature name. Shared between every edge (and the parameter vector) that mentions it.
pub type Feature = Arc<str>;

/// Sparse `feature -> value` map attached to one edge. Read-only once built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureVector {
    entries: Vec<(Feature, f64)>,
}

impl FeatureVector {
    pub fn new(mut entries: Vec<(Feature, f64)>) -> Self {
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.dedup_by(|later, earlier| {
            if later.0 == earlier.0 {
                earlier.1 += later.1;
                true
            } else {
                false
            }
        });
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, feature: &str) -> Option<f64> {
        self.entries
            .binary_search_by(|(f, _)| (**f).cmp(feature))
            .ok()
            .map(|i| self.entries[i].1)
    }

    pub fn contains(&self, feature: &str) -> bool {
        self.get(feature).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Feature, f64)> + '_ {
        self.entries.iter().map(|(f, w)| (f, *w))
    }

    pub fn features(&self) -> impl Iterator<Item = &Feature> + '_ {
        self.entries.iter().map(|(f, _)| f)
    }
}

/// Read-only view of a directed feature graph, consumed (never mutated) by the walk.
///
/// This is the "CSR-style" adapter: a node exposes a contiguous neighbor list and a
/// contiguous feature-vector list with matching indices.
pub trait FeatureGraph {
    /// All node ids that have at least one outgoing edge or are the target of one.
    fn node_ids(&self) -> &[usize];

    /// Return `(neighbors, features)` for the outgoing edges of `node`.
    ///
    /// Requirements:
    /// - `neighbors.len() == features.len()`
    /// - `neighbors` is sorted ascending (so [`FeatureGraph::features`] can binary search)
    fn edges_ref(&self, node: usize) -> (&[usize], &[FeatureVector]);

    /// Every distinct feature name appearing on some edge.
    fn feature_names(&self) -> &[Feature];

    fn near(&self, node: usize) -> &[usize] {
        self.edges_ref(node).0
    }

    fn out_degree(&self, node: usize) -> usize {
        self.edges_ref(node).0.len()
    }

    fn features(&self, source: usize, target: usize) -> Option<&FeatureVector> {
        let (nbrs, phis) = self.edges_ref(source);
        nbrs.binary_search(&target).ok().map(|i| &phis[i])
    }
}

#[derive(Debug, Clone, Default)]
struct Adjacency {
    targets: Vec<usize>,
    features: Vec<FeatureVector>,
}

/// Adjacency-list feature graph keyed by (possibly sparse) integer node ids.
#[derive(Debug, Clone, Default)]
pub struct SparseFeatureGraph {
    nodes: Vec<usize>,
    out: HashMap<usize, Adjacency>,
    feature_names: Vec<Feature>,
    edge_count: usize,
}

impl SparseFeatureGraph {
    /// Build a graph from `(source, target, [(feature, value)])` triples.
    pub fn from_edges<'a, I, F>(edges: I) -> Self
    where
        I: IntoIterator<Item = (usize, usize, F)>,
        F: IntoIterator<Item = (&'a str, f64)>,
    {
        let mut builder = GraphBuilder::new();
        for (u, v, phi) in edges {
            builder.add_edge(u, v, phi);
        }
        builder.build()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Parse the tab-separated text encoding:
    ///
    /// ```text
    /// node_count \t edge_count \t f1:f2:... \t u->v:fid[@w],fid[@w] \t ...
    /// ```
    ///
    /// Feature ids are 1-based indices into the feature list; a missing `@w` means 1.0.
    /// Node ids must lie in `1..=node_count`.
    pub fn deserialize(text: &str) -> Result<Self> {
        let mut parts = text.trim().split('\t');
        let node_count: usize = parse_field(parts.next(), "node count")?;
        let edge_count: usize = parse_field(parts.next(), "edge count")?;
        let names: Vec<&str> = match parts.next() {
            Some(s) if !s.is_empty() => s.split(':').collect(),
            Some(_) => Vec::new(),
            None => return Err(Error::GraphFormat("missing feature list".to_string())),
        };

        let mut builder = GraphBuilder::new();
        let mut seen = 0usize;
        for token in parts.filter(|t| !t.is_empty()) {
            let (u, v, phi) = parse_edge(token, &names)?;
            for node in [u, v] {
                if node == 0 || node > node_count {
                    return Err(Error::GraphFormat(format!(
                        "node {node} out of range 1..={node_count} in edge '{token}'"
                    )));
                }
            }
            builder.add_edge(u, v, phi);
            seen += 1;
        }
        if seen != edge_count {
            return Err(Error::GraphFormat(format!(
                "declared {edge_count} edges but found {seen}"
            )));
        }
        Ok(builder.build())
    }

    /// Inverse of [`SparseFeatureGraph::deserialize`].
    pub fn serialize(&self) -> String {
        let index: HashMap<&str, usize> = self
            .feature_names
            .iter()
            .enumerate()
            .map(|(i, f)| (&**f, i + 1))
            .collect();
        let max_node = self.nodes.last().copied().unwrap_or(0);
        let mut out = format!("{max_node}\t{}\t", self.edge_count);
        let names: Vec<&str> = self.feature_names.iter().map(|f| &**f).collect();
        out.push_str(&names.join(":"));
        for &u in &self.nodes {
            let (nbrs, phis) = self.edges_ref(u);
            for (v, phi) in nbrs.iter().zip(phis) {
                let feats: Vec<String> = phi
                    .iter()
                    .map(|(f, w)| format!("{}@{}", index[&**f], w))
                    .collect();
                out.push_str(&format!("\t{u}->{v}:{}", feats.join(",")));
            }
        }
        out
    }
}

fn parse_field<T: std::str::FromStr>(field: Option<&str>, what: &str) -> Result<T> {
    let raw = field.ok_or_else(|| Error::GraphFormat(format!("missing {what}")))?;
    raw.trim()
        .parse()
        .map_err(|_| Error::GraphFormat(format!("bad {what}: '{raw}'")))
}

fn parse_edge<'n>(token: &str, names: &[&'n str]) -> Result<(usize, usize, Vec<(&'n str, f64)>)> {
    let bad = |why: &str| Error::GraphFormat(format!("{why} in edge '{token}'"));
    let (endpoints, feats) = token.split_once(':').ok_or_else(|| bad("missing ':'"))?;
    let (u, v) = endpoints.split_once("->").ok_or_else(|| bad("missing '->'"))?;
    let u: usize = u.trim().parse().map_err(|_| bad("bad source node"))?;
    let v: usize = v.trim().parse().map_err(|_| bad("bad target node"))?;

    let mut phi = Vec::new();
    for item in feats.split(',').filter(|s| !s.is_empty()) {
        let (fid, w) = match item.split_once('@') {
            Some((fid, w)) => (fid, w.parse::<f64>().map_err(|_| bad("bad feature weight"))?),
            None => (item, 1.0),
        };
        let fid: usize = fid.parse().map_err(|_| bad("bad feature id"))?;
        if fid == 0 || fid > names.len() {
            return Err(bad("feature id out of range"));
        }
        if !w.is_finite() || w < 0.0 {
            return Err(bad("feature weight must be finite and non-negative"));
        }
        phi.push((names[fid - 1], w));
    }
    if phi.is_empty() {
        return Err(bad("edge has no features"));
    }
    Ok((u, v, phi))
}

impl FeatureGraph for SparseFeatureGraph {
    fn node_ids(&self) -> &[usize] {
        &self.nodes
    }

    fn edges_ref(&self, node: usize) -> (&[usize], &[FeatureVector]) {
        match self.out.get(&node) {
            Some(adj) => (&adj.targets, &adj.features),
            None => (&[], &[]),
        }
    }

    fn feature_names(&self) -> &[Feature] {
        &self.feature_names
    }
}

/// Incremental builder. Repeated edges between the same pair merge their features
/// (values for a repeated feature are summed).
#[derive(Debug, Default)]
pub struct GraphBuilder {
    interned: HashMap<String, Feature>,
    edges: BTreeMap<usize, BTreeMap<usize, Vec<(Feature, f64)>>>,
    nodes: BTreeSet<usize>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn intern(&mut self, name: &str) -> Feature {
        if let Some(f) = self.interned.get(name) {
            return Arc::clone(f);
        }
        let f: Feature = Arc::from(name);
        self.interned.insert(name.to_string(), Arc::clone(&f));
        f
    }

    pub fn add_edge<'a, F>(&mut self, source: usize, target: usize, features: F) -> &mut Self
    where
        F: IntoIterator<Item = (&'a str, f64)>,
    {
        let phi: Vec<(Feature, f64)> = features
            .into_iter()
            .map(|(name, w)| (self.intern(name), w))
            .collect();
        self.nodes.insert(source);
        self.nodes.insert(target);
        self.edges
            .entry(source)
            .or_default()
            .entry(target)
            .or_default()
            .extend(phi);
        self
    }

    pub fn build(self) -> SparseFeatureGraph {
        let mut feature_names: Vec<Feature> = self.interned.into_values().collect();
        feature_names.sort();

        let mut edge_count = 0usize;
        let mut out = HashMap::with_capacity(self.edges.len());
        for (u, targets) in self.edges {
            let mut adj = Adjacency::default();
            for (v, phi) in targets {
                adj.targets.push(v);
                adj.features.push(FeatureVector::new(phi));
                edge_count += 1;
            }
            out.insert(u, adj);
        }
        SparseFeatureGraph {
            nodes: self.nodes.into_iter().collect(),
            out,
            feature_names,
            edge_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> SparseFeatureGraph {
        SparseFeatureGraph::from_edges([
            (1, 2, vec![("assoc", 1.0)]),
            (2, 1, vec![("assoc", 1.0)]),
            (1, 1, vec![("restart", 1.0)]),
        ])
    }

    #[test]
    fn builder_shares_feature_names_across_edges() {
        let g = triangle();
        let a = g.features(1, 2).unwrap().features().next().unwrap().clone();
        let b = g.features(2, 1).unwrap().features().next().unwrap().clone();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(g.feature_names().len(), 2);
        assert_eq!(g.edge_count(), 3);
        assert_eq!(g.near(1), &[1, 2]);
    }

    #[test]
    fn repeated_edge_merges_features() {
        let mut b = GraphBuilder::new();
        b.add_edge(1, 2, [("a", 1.0)]).add_edge(1, 2, [("a", 0.5), ("b", 2.0)]);
        let g = b.build();
        let phi = g.features(1, 2).unwrap();
        assert_eq!(phi.get("a"), Some(1.5));
        assert_eq!(phi.get("b"), Some(2.0));
        assert_eq!(g.out_degree(1), 1);
    }

    #[test]
    fn missing_node_has_no_edges() {
        let g = triangle();
        assert!(g.near(99).is_empty());
        assert!(g.features(2, 2).is_none());
    }

    #[test]
    fn deserialize_reads_edges_and_default_weights() {
        let g = SparseFeatureGraph::deserialize("2\t3\tassoc:restart\t1->2:1\t2->1:1@0.5\t1->1:2").unwrap();
        assert_eq!(g.edge_count(), 3);
        assert_eq!(g.features(1, 2).unwrap().get("assoc"), Some(1.0));
        assert_eq!(g.features(2, 1).unwrap().get("assoc"), Some(0.5));
        assert_eq!(g.features(1, 1).unwrap().get("restart"), Some(1.0));
    }

    #[test]
    fn deserialize_rejects_malformed_input() {
        for bad in [
            "",
            "x\t1\ta\t1->2:1",
            "2\t2\ta\t1->2:1",
            "2\t1\ta\t1->3:1",
            "2\t1\ta\t1->2:2",
            "2\t1\ta\t1-2:1",
            "2\t1\ta\t1->2:1@-1",
        ] {
            let err = SparseFeatureGraph::deserialize(bad).unwrap_err();
            assert!(matches!(err, Error::GraphFormat(_)), "{bad:?} -> {err}");
        }
    }

    #[test]
    fn serialize_then_deserialize_preserves_structure() {
        let g = triangle();
        let back = SparseFeatureGraph::deserialize(&g.serialize()).unwrap();
        assert_eq!(back.node_ids(), g.node_ids());
        for &u in g.node_ids() {
            assert_eq!(back.near(u), g.near(u));
            for &v in g.near(u) {
                assert_eq!(back.features(u, v), g.features(u, v));
            }
        }
    }
}

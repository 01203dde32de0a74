use proptest::prelude::*;
use srw::{
    rwr, rwr_with_derivatives, walk_once, FeatureGraph, NodeVec, ParamVector, Relu, Softplus,
    SparseFeatureGraph, Srw, SrwConfig, WeightingScheme,
};

fn start(nodes: &[(usize, f64)]) -> NodeVec {
    nodes.iter().copied().collect()
}

fn params(pairs: &[(&str, f64)]) -> ParamVector {
    pairs.iter().copied().collect()
}

fn mass(v: &NodeVec) -> f64 {
    v.values().sum()
}

fn assert_vec_sane(v: &NodeVec) {
    for (&n, &m) in v {
        assert!(m.is_finite(), "non-finite mass at {n}: {m}");
        assert!(m > 0.0, "zero or negative entry kept at {n}: {m}");
    }
}

#[test]
fn self_loop_conserves_mass() {
    let g = SparseFeatureGraph::from_edges([(1, 1, vec![("loop", 1.0)])]);
    let p = params(&[("loop", 0.7)]);
    for t in 1..=5 {
        let out = rwr(&g, &start(&[(1, 0.8)]), &Relu, &p, t);
        assert!((mass(&out) - 0.8).abs() < 1e-12, "t={t}: {out:?}");
        assert_eq!(out.len(), 1);
    }
}

#[test]
fn dead_end_drops_mass() {
    // A -> B, and B has no outgoing edges.
    let g = SparseFeatureGraph::from_edges([(1, 2, vec![("next", 1.0)])]);
    let p = params(&[("next", 1.0)]);
    let s = start(&[(1, 1.0)]);

    let one = rwr(&g, &s, &Relu, &p, 1);
    assert_eq!(one.len(), 1);
    assert!((one[&2] - 1.0).abs() < 1e-12);

    let two = rwr(&g, &s, &Relu, &p, 2);
    assert!(two.is_empty());
    assert_eq!(mass(&two), 0.0);
}

#[test]
fn zero_weight_node_contributes_nothing() {
    let g = SparseFeatureGraph::from_edges([
        (1, 2, vec![("a", 1.0)]),
        (2, 3, vec![("off", 1.0)]),
    ]);
    let p = params(&[("a", 1.0), ("off", 0.0)]);
    let out = rwr(&g, &start(&[(1, 1.0)]), &Relu, &p, 2);
    assert!(out.is_empty());
}

#[test]
fn restart_scenario_splits_evenly() {
    let g = SparseFeatureGraph::from_edges([
        (1, 2, vec![("assoc", 1.0)]),
        (2, 1, vec![("assoc", 1.0)]),
        (1, 1, vec![("restart", 1.0)]),
    ]);
    let p = params(&[("assoc", 1.0), ("restart", 1.0)]);
    let out = rwr(&g, &start(&[(1, 1.0)]), &Relu, &p, 1);
    assert_eq!(out.len(), 2);
    assert!((out[&1] - 0.5).abs() < 1e-12);
    assert!((out[&2] - 0.5).abs() < 1e-12);
}

#[test]
fn empty_start_stays_empty() {
    let g = SparseFeatureGraph::from_edges([(1, 1, vec![("loop", 1.0)])]);
    let p = params(&[("loop", 1.0)]);
    assert!(rwr(&g, &NodeVec::new(), &Relu, &p, 10).is_empty());
    let d = rwr_with_derivatives(&g, &NodeVec::new(), &Relu, &p, 10, |_| true);
    assert!(d.mass.is_empty());
    assert!(d.derivatives.is_empty());
}

#[test]
fn walk_once_never_aliases_input() {
    let g = SparseFeatureGraph::from_edges([(1, 2, vec![("a", 1.0)]), (2, 1, vec![("a", 1.0)])]);
    let p = params(&[("a", 1.0)]);
    let s = start(&[(1, 1.0)]);
    let next = walk_once(&g, &s, &Relu, &p);
    assert_eq!(s[&1], 1.0);
    assert!(!next.contains_key(&1));
    assert_eq!(next[&2], 1.0);
}

#[test]
fn unseen_features_walk_at_default_weight() {
    let g = SparseFeatureGraph::from_edges([(1, 2, vec![("a", 1.0)]), (1, 3, vec![("b", 1.0)])]);
    let p = params(&[("a", Relu.default_weight())]);
    let out = rwr(&g, &start(&[(1, 1.0)]), &Relu, &p, 1);
    assert!((out[&2] - out[&3]).abs() < 1e-12);
}

#[test]
fn derivative_mass_sums_to_zero_without_dead_ends() {
    // Mass is conserved on a graph without dead ends, so the derivative of total mass
    // with respect to any feature must vanish.
    let g = SparseFeatureGraph::from_edges([
        (1, 1, vec![("restart", 1.0)]),
        (1, 2, vec![("a", 1.0)]),
        (1, 3, vec![("b", 2.0)]),
        (2, 1, vec![("restart", 1.0)]),
        (2, 3, vec![("a", 0.5), ("b", 0.5)]),
        (3, 1, vec![("restart", 1.0)]),
    ]);
    let p = params(&[("restart", 1.0), ("a", 1.3), ("b", 0.6)]);
    let out = rwr_with_derivatives(&g, &start(&[(1, 1.0)]), &Softplus, &p, 6, |f| f != "restart");
    assert!((mass(&out.mass) - 1.0).abs() < 1e-12);
    for f in ["a", "b"] {
        let total: f64 = out
            .derivatives
            .values()
            .filter_map(|dv| dv.get(f))
            .sum();
        assert!(total.abs() < 1e-12, "d(total mass)/d{f} = {total}");
    }
}

#[test]
fn overflowing_partials_are_clamped_and_counted() {
    // Both edge weights are near f64::MAX, so their summed derivative overflows.
    let g = SparseFeatureGraph::from_edges([(1, 2, vec![("a", 1e308)]), (1, 3, vec![("a", 1e308)])]);
    let p = params(&[("a", 1.0)]);
    let s = start(&[(1, 1.0)]);

    let out = rwr_with_derivatives(&g, &s, &Relu, &p, 1, |_| true);
    assert!(out.clamped > 0);
    assert!(out.mass.values().all(|m| m.is_finite()));
    for v in [2, 3] {
        let dv = out.derivative_at(v).unwrap();
        assert!(dv.values().all(|d| d.is_finite()), "node {v}: {dv:?}");
    }

    let srw = Srw::new(SrwConfig {
        max_t: 1,
        ..SrwConfig::default()
    })
    .unwrap();
    assert_eq!(srw.nan_clamps(), 0);
    let out = srw.rwr_with_derivatives(&g, &s, &p);
    assert!(out.clamped > 0);
    assert_eq!(srw.nan_clamps(), 1);
    srw.rwr_with_derivatives(&g, &s, &p);
    assert_eq!(srw.nan_clamps(), 2);
}

proptest! {
    // Property: a walk step never creates mass, never produces non-finite or zero
    // entries, and only moves mass along edges.
    #[test]
    fn prop_walk_never_creates_mass(
        edges in prop::collection::vec((1usize..8, 1usize..8, 0usize..3, 0.0f64..3.0), 0..30),
        weights in prop::collection::vec(0.0f64..5.0, 3),
        t in 1usize..6,
    ) {
        let names = ["f0", "f1", "f2"];
        let g = SparseFeatureGraph::from_edges(
            edges.iter().map(|&(u, v, f, x)| (u, v, vec![(names[f], x)])),
        );
        let p: ParamVector = names.iter().zip(&weights).map(|(n, w)| (*n, *w)).collect();
        let s = start(&[(1, 1.0)]);

        let mut prev = s.clone();
        for _ in 0..t {
            let next = walk_once(&g, &prev, &Relu, &p);
            assert_vec_sane(&next);
            prop_assert!(mass(&next) <= mass(&prev) + 1e-9);
            for v in next.keys() {
                prop_assert!(prev.keys().any(|u| g.features(*u, *v).is_some()));
            }
            prev = next;
        }
        let direct = rwr(&g, &s, &Relu, &p, t);
        prop_assert!((mass(&direct) - mass(&prev)).abs() < 1e-9);
    }
}

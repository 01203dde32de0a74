use srw::{
    Example, FeatureGraph, LossConfig, ParamVector, SparseFeatureGraph, Srw, SrwConfig,
    WeightingKind, FEATURE_RESTART,
};
use std::sync::Arc;

/// Five nodes, restart edges back to the query, edges carrying one or two features.
fn example() -> Example {
    let g = SparseFeatureGraph::from_edges([
        (1, 1, vec![(FEATURE_RESTART, 1.0)]),
        (1, 2, vec![("near", 1.0), ("kind", 0.5)]),
        (1, 3, vec![("far", 1.0)]),
        (2, 1, vec![(FEATURE_RESTART, 1.0)]),
        (2, 4, vec![("near", 2.0)]),
        (2, 5, vec![("kind", 1.0), ("far", 0.3)]),
        (3, 1, vec![(FEATURE_RESTART, 1.0)]),
        (3, 5, vec![("near", 1.0)]),
        (4, 1, vec![(FEATURE_RESTART, 1.0)]),
        (4, 3, vec![("kind", 1.0)]),
        (5, 1, vec![(FEATURE_RESTART, 1.0)]),
    ]);
    Example::new(
        Arc::new(g),
        [(1, 1.0)].into_iter().collect(),
        vec![4, 5],
        vec![2, 3],
    )
}

fn params() -> ParamVector {
    [
        (FEATURE_RESTART, 1.0),
        ("near", 0.7),
        ("kind", 1.4),
        ("far", 2.0),
    ]
    .into_iter()
    .collect()
}

fn assert_gradient_matches(weighting: WeightingKind, loss: LossConfig, ex: &Example, p: &ParamVector) {
    let srw = Srw::new(SrwConfig {
        loss,
        weighting,
        max_t: 6,
        ..SrwConfig::default()
    })
    .unwrap();
    let before = p.snapshot();
    let (gradient, _) = srw.gradient(p, ex);
    assert!(!gradient.contains_key(FEATURE_RESTART));

    let checks = srw.check_gradient(p, ex, &gradient);
    assert_eq!(checks.len(), ex.graph().feature_names().len() - 1, "{checks:?}");
    for c in &checks {
        let close = (c.empirical - c.predicted).abs() < 1e-10 || c.relative_error() < 1e-3;
        assert!(close, "{weighting:?} {loss:?}: {c:?} (rel err {})", c.relative_error());
    }
    // Finite differences do not touch the shared parameters.
    assert_eq!(p.snapshot(), before);
}

#[test]
fn hinge_gradient_matches_finite_differences() {
    let loss = LossConfig::PairwiseHinge { margin: 0.5 };
    assert_gradient_matches(WeightingKind::Relu, loss, &example(), &params());
}

#[test]
fn logistic_gradient_matches_finite_differences() {
    let loss = LossConfig::PairwiseLogistic { width: 0.2 };
    assert_gradient_matches(WeightingKind::Relu, loss, &example(), &params());
}

#[test]
fn log_loss_gradient_matches_finite_differences() {
    assert_gradient_matches(WeightingKind::Relu, LossConfig::PosNegLog, &example(), &params());
}

#[test]
fn softplus_gradient_matches_on_scaled_and_shared_features() {
    for loss in [
        LossConfig::PairwiseHinge { margin: 0.5 },
        LossConfig::PairwiseLogistic { width: 0.2 },
        LossConfig::PosNegLog,
    ] {
        assert_gradient_matches(WeightingKind::Softplus, loss, &example(), &params());
    }
}

#[test]
fn softplus_gradient_matches_on_two_feature_edge() {
    // One edge scales its feature by 2, the other sums two features.
    let g = SparseFeatureGraph::from_edges([
        (1, 1, vec![(FEATURE_RESTART, 1.0)]),
        (1, 2, vec![("near", 2.0)]),
        (1, 3, vec![("far", 1.0), ("near", 1.0)]),
        (2, 1, vec![(FEATURE_RESTART, 1.0)]),
        (3, 1, vec![(FEATURE_RESTART, 1.0)]),
    ]);
    let ex = Example::new(Arc::new(g), [(1, 1.0)].into_iter().collect(), vec![2], vec![3]);
    let p: ParamVector = [(FEATURE_RESTART, 1.0), ("near", 0.4), ("far", -0.3)]
        .into_iter()
        .collect();
    let loss = LossConfig::PairwiseHinge { margin: 0.5 };
    assert_gradient_matches(WeightingKind::Softplus, loss, &ex, &p);
}

#[test]
fn inactive_hinge_leaves_only_regularization() {
    // Margin 0 and positives far ahead of negatives: the ranking term is inactive.
    let g = SparseFeatureGraph::from_edges([
        (1, 1, vec![(FEATURE_RESTART, 1.0)]),
        (1, 2, vec![("good", 1.0)]),
        (1, 3, vec![("bad", 1.0)]),
        (2, 1, vec![(FEATURE_RESTART, 1.0)]),
        (3, 1, vec![(FEATURE_RESTART, 1.0)]),
    ]);
    let ex = Example::new(Arc::new(g), [(1, 1.0)].into_iter().collect(), vec![2], vec![3]);
    let p: ParamVector = [(FEATURE_RESTART, 1.0), ("good", 5.0), ("bad", 0.1)]
        .into_iter()
        .collect();
    let srw = Srw::new(SrwConfig {
        loss: LossConfig::PairwiseHinge { margin: 0.0 },
        mu: 0.01,
        ..SrwConfig::default()
    })
    .unwrap();
    let (gradient, loss) = srw.gradient(&p, &ex);
    assert!((gradient["good"] - 2.0 * 0.01 * 5.0).abs() < 1e-12);
    assert!((gradient["bad"] - 2.0 * 0.01 * 0.1).abs() < 1e-12);
    let expected_reg = 0.01 * (5.0 * 5.0 + 0.1 * 0.1);
    assert!((loss.total() - expected_reg).abs() < 1e-12, "{loss}");
}

#[test]
fn empty_label_sets_give_zero_ranking_loss() {
    let ex = example();
    let unlabeled = Example::new(
        Arc::new(ex.graph().clone()),
        ex.query().clone(),
        Vec::new(),
        Vec::new(),
    );
    let srw = Srw::new(SrwConfig {
        mu: 0.0,
        ..SrwConfig::default()
    })
    .unwrap();
    let (gradient, loss) = srw.gradient(&params(), &unlabeled);
    assert!(gradient.values().all(|g| *g == 0.0));
    assert_eq!(loss.total(), 0.0);
}

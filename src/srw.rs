//! Supervised random walk learner.
//!
//! SGD over edge-feature parameters of a random walk with reset, following
//! Backstrom & Leskovec (WSDM 2011) but with restart links represented as
//! explicit edges and a per-example update instead of batch L-BFGS.

use crate::example::Example;
use crate::graph::{Feature, FeatureGraph};
use crate::loss::{Gradient, LossComponent, LossConfig, LossData, LossFunction};
use crate::params::ParamVector;
use crate::projection::ProjectionStrategy;
use crate::walk::{self, NodeVec, WalkDerivatives};
use crate::weighting::{WeightingKind, WeightingScheme};
use crate::{Error, Result};
use parking_lot::Mutex;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

pub const FEATURE_RESTART: &str = "id(restart)";
pub const FEATURE_TRUE_LOOP: &str = "id(trueLoop)";
pub const FEATURE_ALPHA_BOOSTER: &str = "id(alphaBooster)";

/// Step used by [`Srw::check_gradient`].
pub const PERTURB_EPSILON: f64 = 1e-6;

/// Bound on projection / NaN diagnostics emitted per epoch.
pub(crate) const MAX_VIOLATION_MESSAGES: usize = 5;

/// Scale of the random perturbation added to a new trainable feature's default weight.
const DEFAULT_WEIGHT_JITTER: f64 = 0.01;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SrwConfig {
    /// Number of walk steps.
    pub max_t: usize,
    /// Base learning rate; the rate at epoch `e` is `eta / e^2`.
    pub eta: f64,
    /// L2 regularization strength.
    pub mu: f64,
    /// Minimum local restart probability. `0` disables the projection.
    pub alpha: f64,
    pub projection: ProjectionStrategy,
    pub weighting: WeightingKind,
    pub loss: LossConfig,
    pub restart_feature: String,
    pub booster_feature: String,
    /// Features whose name starts with this prefix are fact-derived.
    pub fact_prefix: String,
    /// Never moved by gradient descent.
    pub untrained_features: BTreeSet<String>,
    pub seed: u64,
}

impl Default for SrwConfig {
    fn default() -> Self {
        Self {
            max_t: 10,
            eta: 1.0,
            mu: 0.001,
            alpha: 0.1,
            projection: ProjectionStrategy::default(),
            weighting: WeightingKind::default(),
            loss: LossConfig::default(),
            restart_feature: FEATURE_RESTART.to_string(),
            booster_feature: FEATURE_ALPHA_BOOSTER.to_string(),
            fact_prefix: "db(".to_string(),
            untrained_features: [FEATURE_RESTART, FEATURE_TRUE_LOOP, FEATURE_ALPHA_BOOSTER]
                .into_iter()
                .map(String::from)
                .collect(),
            seed: 42,
        }
    }
}

impl SrwConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_t == 0 {
            return Err(Error::InvalidParameter("max_t must be > 0".to_string()));
        }
        if !self.eta.is_finite() || self.eta <= 0.0 {
            return Err(Error::InvalidParameter(
                "eta must be finite and > 0".to_string(),
            ));
        }
        if !self.mu.is_finite() || self.mu < 0.0 {
            return Err(Error::InvalidParameter(
                "mu must be finite and >= 0".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.alpha) {
            return Err(Error::InvalidParameter(
                "alpha must be in [0,1)".to_string(),
            ));
        }
        match self.loss {
            LossConfig::PairwiseHinge { margin } if !margin.is_finite() || margin < 0.0 => {
                return Err(Error::InvalidParameter(
                    "hinge margin must be finite and >= 0".to_string(),
                ));
            }
            LossConfig::PairwiseLogistic { width } if !width.is_finite() || width <= 0.0 => {
                return Err(Error::InvalidParameter(
                    "logistic width must be finite and > 0".to_string(),
                ));
            }
            _ => {}
        }
        Ok(())
    }
}

/// Finite-difference comparison for one feature.
#[derive(Debug, Clone)]
pub struct GradientCheck {
    pub feature: Feature,
    /// `loss(theta + eps * e_f) - loss(theta)`.
    pub empirical: f64,
    /// `eps * gradient[f]`.
    pub predicted: f64,
}

impl GradientCheck {
    pub fn relative_error(&self) -> f64 {
        let scale = self.empirical.abs().max(self.predicted.abs());
        if scale == 0.0 {
            0.0
        } else {
            (self.empirical - self.predicted).abs() / scale
        }
    }
}

/// The learner. Shared by reference across all training tasks of an epoch.
#[derive(Debug)]
pub struct Srw {
    config: SrwConfig,
    scheme: Box<dyn WeightingScheme>,
    loss: Box<dyn LossFunction>,
    epoch: AtomicUsize,
    alpha_violations: AtomicUsize,
    nan_clamps: AtomicUsize,
    rng: Mutex<ChaCha8Rng>,
}

impl Srw {
    pub fn new(config: SrwConfig) -> Result<Self> {
        let scheme = config.weighting.build();
        Self::with_scheme(config, scheme)
    }

    /// Use a custom weighting scheme instead of `config.weighting`.
    pub fn with_scheme(config: SrwConfig, scheme: Box<dyn WeightingScheme>) -> Result<Self> {
        config.validate()?;
        let loss = config.loss.build();
        let rng = Mutex::new(ChaCha8Rng::seed_from_u64(config.seed));
        Ok(Self {
            config,
            scheme,
            loss,
            epoch: AtomicUsize::new(1),
            alpha_violations: AtomicUsize::new(0),
            nan_clamps: AtomicUsize::new(0),
            rng,
        })
    }

    pub fn config(&self) -> &SrwConfig {
        &self.config
    }

    pub fn scheme(&self) -> &dyn WeightingScheme {
        self.scheme.as_ref()
    }

    pub fn trainable(&self, feature: &str) -> bool {
        !self.config.untrained_features.contains(feature)
    }

    pub fn epoch(&self) -> usize {
        self.epoch.load(Ordering::Relaxed)
    }

    /// Start epoch `e` (1-based); resets the per-epoch diagnostic counters.
    pub fn set_epoch(&self, e: usize) {
        self.epoch.store(e.max(1), Ordering::Relaxed);
        self.alpha_violations.store(0, Ordering::Relaxed);
        self.nan_clamps.store(0, Ordering::Relaxed);
    }

    /// `eta / epoch^2`.
    pub fn learning_rate(&self) -> f64 {
        let e = self.epoch() as f64;
        self.config.eta / (e * e)
    }

    /// Projection fallbacks taken so far this epoch.
    pub fn alpha_violations(&self) -> usize {
        self.alpha_violations.load(Ordering::Relaxed)
    }

    /// Non-finite partials clamped so far this epoch.
    pub fn nan_clamps(&self) -> usize {
        self.nan_clamps.load(Ordering::Relaxed)
    }

    /// Bump a per-epoch diagnostic counter; returns whether a message should be emitted.
    pub(crate) fn note_violation(&self, counter: Diagnostic) -> bool {
        let c = match counter {
            Diagnostic::Alpha => &self.alpha_violations,
            Diagnostic::NanClamp => &self.nan_clamps,
        };
        let n = c.fetch_add(1, Ordering::Relaxed);
        if n + 1 == MAX_VIOLATION_MESSAGES {
            warn!(kind = ?counter, "further messages of this kind suppressed for this epoch");
        }
        n < MAX_VIOLATION_MESSAGES
    }

    /// Inference: random walk with reset from `start` for `max_t` steps.
    pub fn rwr<G: FeatureGraph + ?Sized>(&self, graph: &G, start: &NodeVec, params: &ParamVector) -> NodeVec {
        walk::rwr(graph, start, self.scheme(), params, self.config.max_t)
    }

    pub fn rwr_with_derivatives<G: FeatureGraph + ?Sized>(
        &self,
        graph: &G,
        start: &NodeVec,
        params: &ParamVector,
    ) -> WalkDerivatives {
        let out = walk::rwr_with_derivatives(graph, start, self.scheme(), params, self.config.max_t, |f| {
            self.trainable(f)
        });
        if out.clamped > 0 && self.note_violation(Diagnostic::NanClamp) {
            warn!(count = out.clamped, "non-finite partial derivatives clamped to 0");
        }
        out
    }

    /// Initialize every feature of `graph` missing from `params` to the default weight,
    /// plus a small random perturbation for trainable features.
    pub fn add_default_weights<G: FeatureGraph + ?Sized>(&self, graph: &G, params: &ParamVector) {
        let default = self.scheme.default_weight();
        for f in graph.feature_names() {
            let jitter = self.trainable(f);
            params.insert_if_absent(f, || {
                if jitter {
                    default + DEFAULT_WEIGHT_JITTER * self.rng.lock().random::<f64>()
                } else {
                    default
                }
            });
        }
    }

    /// Loss gradient of one example at `params`, plus its loss components.
    pub fn gradient<G: FeatureGraph + ?Sized>(&self, params: &ParamVector, example: &Example<G>) -> (Gradient, LossData) {
        let walk = self.rwr_with_derivatives(example.graph(), example.query(), params);
        let assembled = self.loss.assemble(&walk, example.positives(), example.negatives());
        let mut gradient = assembled.gradient;
        let mut loss = LossData::default();
        loss.add(self.loss.component(), assembled.loss);

        if self.config.mu > 0.0 {
            let default = self.scheme.default_weight();
            let mut reg = 0.0;
            for f in example.graph().feature_names() {
                if !self.trainable(f) {
                    continue;
                }
                let w = params.get_or(f, default);
                reg += self.config.mu * w * w;
                *gradient.entry(f.clone()).or_insert(0.0) += 2.0 * self.config.mu * w;
            }
            loss.add(LossComponent::Regularization, reg);
        }
        (gradient, loss)
    }

    /// Apply `params[f] -= rate * gradient[f]`.
    ///
    /// Rejects the whole update, writing nothing, if it names an untrainable feature.
    pub fn descend(&self, params: &ParamVector, gradient: &Gradient, rate: f64) -> Result<()> {
        if let Some(f) = gradient.keys().find(|f| !self.trainable(f)) {
            return Err(Error::UntrainableUpdate(f.to_string()));
        }
        for (f, &g) in gradient {
            params.increment(f, -rate * g);
        }
        Ok(())
    }

    /// One SGD step on `example`, followed by the feasibility projection.
    pub fn train_on_example<G: FeatureGraph + ?Sized>(&self, params: &ParamVector, example: &Example<G>) -> Result<LossData> {
        self.add_default_weights(example.graph(), params);
        let (gradient, loss) = self.gradient(params, example);
        let rate = self.learning_rate();
        debug!(rate, features = gradient.len(), label = example.label().unwrap_or(""), "gradient step");
        if tracing::enabled!(tracing::Level::TRACE) {
            self.check_gradient(params, example, &gradient);
        }
        self.descend(params, &gradient, rate)?;
        if self.config.alpha > 0.0 {
            self.project_to_feasible(example.graph(), params, example.query());
        }
        Ok(loss)
    }

    /// Total loss of `example` at `params`, with no side effects on shared state.
    pub fn empirical_loss<G: FeatureGraph + ?Sized>(&self, params: &ParamVector, example: &Example<G>) -> f64 {
        self.gradient(params, example).1.total()
    }

    /// Mean per-example loss (each normalized by example length) over `examples`.
    pub fn average_loss<'a, G, I>(&self, params: &ParamVector, examples: I) -> f64
    where
        G: FeatureGraph + ?Sized + 'a,
        I: IntoIterator<Item = &'a Example<G>>,
    {
        let mut total = 0.0;
        let mut count = 0usize;
        for example in examples {
            self.add_default_weights(example.graph(), params);
            total += self.empirical_loss(params, example) / example.length().max(1) as f64;
            count += 1;
        }
        if count == 0 {
            0.0
        } else {
            total / count as f64
        }
    }

    /// Compare `gradient` against one-sided finite differences of the empirical loss,
    /// perturbing each trainable feature independently by [`PERTURB_EPSILON`].
    pub fn check_gradient<G: FeatureGraph + ?Sized>(
        &self,
        params: &ParamVector,
        example: &Example<G>,
        gradient: &Gradient,
    ) -> Vec<GradientCheck> {
        let base = self.empirical_loss(params, example);
        let mut checks: Vec<GradientCheck> = gradient
            .iter()
            .filter(|(f, _)| self.trainable(f))
            .map(|(f, &g)| {
                let perturbed = params.copy();
                perturbed.increment(f, PERTURB_EPSILON);
                let empirical = self.empirical_loss(&perturbed, example) - base;
                GradientCheck {
                    feature: f.clone(),
                    empirical,
                    predicted: PERTURB_EPSILON * g,
                }
            })
            .collect();
        checks.sort_by(|a, b| a.feature.cmp(&b.feature));
        for c in &checks {
            debug!(
                feature = %c.feature,
                empirical = c.empirical,
                predicted = c.predicted,
                rel_err = c.relative_error(),
                "gradient check"
            );
        }
        checks
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Diagnostic {
    Alpha,
    NanClamp,
}

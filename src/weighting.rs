//! Edge weighting schemes.
//!
//! A scheme maps the linear score \(s = \sum_f \theta_f \phi_f\) of an edge to a
//! non-negative unnormalized edge weight \(g(s)\). The projection step needs the
//! exact algebraic inverse of \(g\), so every scheme documents its closed forms.

use crate::graph::FeatureVector;
use crate::params::ParamVector;

/// Capability set every weighting function must provide.
pub trait WeightingScheme: Send + Sync + std::fmt::Debug {
    /// \(g(s)\). Must never be negative.
    fn edge_weight_function(&self, score: f64) -> f64;

    /// \(g'(s)\) at an edge score. The partial of an edge weight with respect to
    /// \(\theta_f\) is `deriv_edge_weight(s) * phi[f]`.
    fn deriv_edge_weight(&self, score: f64) -> f64;

    /// \(g^{-1}(w)\) on the effective domain of \(g\).
    fn inverse_edge_weight_function(&self, weight: f64) -> f64;

    /// Initial parameter value for a feature seen for the first time.
    fn default_weight(&self) -> f64 {
        1.0
    }

    /// Closed-form parameter value for the single-feature projection.
    ///
    /// With `n` competing edges each weighted \(g(\theta)\) and a restart edge of
    /// weight `restart_weight`, the local restart probability is exactly `alpha` when
    /// \(g(\theta) = r (1-\alpha) / (\alpha n)\).
    fn projection(&self, restart_weight: f64, alpha: f64, num_competing: usize) -> f64 {
        self.inverse_edge_weight_function(
            restart_weight * (1.0 - alpha) / (alpha * num_competing.max(1) as f64),
        )
    }

    /// Linear score \(\sum_f \theta_f \phi_f\); unseen features count at [`Self::default_weight`].
    fn edge_score(&self, params: &ParamVector, phi: &FeatureVector) -> f64 {
        let default = self.default_weight();
        phi.iter().map(|(f, x)| params.get_or(f, default) * x).sum()
    }

    /// Weight of an edge under `params`.
    fn edge_weight(&self, params: &ParamVector, phi: &FeatureVector) -> f64 {
        self.edge_weight_function(self.edge_score(params, phi)).max(0.0)
    }
}

/// \(g(s) = \max(0, s)\); \(g'(s) = [s > 0]\); \(g^{-1}(w) = w\) for \(w \ge 0\).
#[derive(Debug, Clone, Copy, Default)]
pub struct Relu;

impl WeightingScheme for Relu {
    fn edge_weight_function(&self, score: f64) -> f64 {
        score.max(0.0)
    }

    fn deriv_edge_weight(&self, score: f64) -> f64 {
        if score > 0.0 {
            1.0
        } else {
            0.0
        }
    }

    fn inverse_edge_weight_function(&self, weight: f64) -> f64 {
        weight.max(0.0)
    }
}

/// Identity on the score, clipped at zero so weights stay non-negative.
///
/// Unlike [`Relu`] the derivative is 1 everywhere, so an edge whose score is driven
/// below zero still receives gradient. That gradient is a surrogate: the clipped weight
/// is flat there. \(g^{-1}(w) = w\).
#[derive(Debug, Clone, Copy, Default)]
pub struct Linear;

impl WeightingScheme for Linear {
    fn edge_weight_function(&self, score: f64) -> f64 {
        score.max(0.0)
    }

    fn deriv_edge_weight(&self, _score: f64) -> f64 {
        1.0
    }

    fn inverse_edge_weight_function(&self, weight: f64) -> f64 {
        weight
    }
}

/// Smooth rectifier \(g(s) = \ln(1 + e^s)\); \(g' = \sigma\); \(g^{-1}(w) = w + \ln(1 - e^{-w})\).
#[derive(Debug, Clone, Copy, Default)]
pub struct Softplus;

/// Below this the softplus is zero in `f64`; used as the inverse of a zero weight.
const SOFTPLUS_FLOOR: f64 = -745.0;

impl WeightingScheme for Softplus {
    fn edge_weight_function(&self, score: f64) -> f64 {
        if score > 35.0 {
            score
        } else {
            score.exp().ln_1p()
        }
    }

    fn deriv_edge_weight(&self, score: f64) -> f64 {
        1.0 / (1.0 + (-score).exp())
    }

    fn inverse_edge_weight_function(&self, weight: f64) -> f64 {
        if weight <= 0.0 {
            return SOFTPLUS_FLOOR;
        }
        if weight > 35.0 {
            return weight;
        }
        (weight + (-(-weight).exp_m1()).ln()).max(SOFTPLUS_FLOOR)
    }
}

/// Configuration-time selector for the built-in schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WeightingKind {
    #[default]
    Relu,
    Linear,
    Softplus,
}

impl WeightingKind {
    pub fn build(self) -> Box<dyn WeightingScheme> {
        match self {
            WeightingKind::Relu => Box::new(Relu),
            WeightingKind::Linear => Box::new(Linear),
            WeightingKind::Softplus => Box::new(Softplus),
        }
    }
}

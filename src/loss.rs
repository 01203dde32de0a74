//! Per-example losses over the final walk distribution, and the loss accumulator.

use crate::graph::Feature;
use crate::walk::WalkDerivatives;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Per-feature gradient of an example's loss.
pub type Gradient = HashMap<Feature, f64>;

/// Named loss components tracked for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LossComponent {
    Ranking,
    Log,
    Regularization,
}

impl fmt::Display for LossComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LossComponent::Ranking => "ranking",
            LossComponent::Log => "log",
            LossComponent::Regularization => "regularization",
        })
    }
}

/// Running totals of loss components.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LossData {
    components: BTreeMap<LossComponent, f64>,
}

impl LossData {
    pub fn add(&mut self, component: LossComponent, value: f64) {
        *self.components.entry(component).or_insert(0.0) += value;
    }

    pub fn merge(&mut self, other: &LossData) {
        for (&c, &v) in &other.components {
            self.add(c, v);
        }
    }

    pub fn get(&self, component: LossComponent) -> f64 {
        self.components.get(&component).copied().unwrap_or(0.0)
    }

    pub fn total(&self) -> f64 {
        self.components.values().sum()
    }

    pub fn clear(&mut self) {
        self.components.clear();
    }

    /// `self - previous`, per component.
    pub fn diff(&self, previous: &LossData) -> LossData {
        let mut out = self.clone();
        for (&c, &v) in &previous.components {
            out.add(c, -v);
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = (LossComponent, f64)> + '_ {
        self.components.iter().map(|(&c, &v)| (c, v))
    }
}

impl fmt::Display for LossData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "total {:+.6e}", self.total())?;
        for (c, v) in self.iter() {
            write!(f, " {c} {v:+.6e}")?;
        }
        Ok(())
    }
}

/// Loss and gradient of one example, before regularization.
#[derive(Debug, Clone, Default)]
pub struct ExampleLoss {
    pub gradient: Gradient,
    pub loss: f64,
    /// Number of contrasted units (pairs or labeled nodes) the loss was averaged over.
    pub length: usize,
}

/// A loss family over the final walk distribution.
pub trait LossFunction: Send + Sync + fmt::Debug {
    fn component(&self) -> LossComponent;

    fn assemble(&self, walk: &WalkDerivatives, positives: &[usize], negatives: &[usize]) -> ExampleLoss;
}

/// Shape of a pairwise ranking loss \(h(\delta)\), \(\delta = p_{neg} - p_{pos}\).
trait PairShape {
    fn value(&self, delta: f64) -> f64;
    fn slope(&self, delta: f64) -> f64;
}

fn assemble_pairwise<S: PairShape>(
    shape: &S,
    walk: &WalkDerivatives,
    positives: &[usize],
    negatives: &[usize],
) -> ExampleLoss {
    let pairs = positives.len() * negatives.len();
    let mut out = ExampleLoss {
        length: pairs,
        ..ExampleLoss::default()
    };
    if pairs == 0 {
        return out;
    }
    let scale = 1.0 / pairs as f64;
    for &pos in positives {
        for &neg in negatives {
            let delta = walk.mass_at(neg) - walk.mass_at(pos);
            out.loss += scale * shape.value(delta);
            let slope = scale * shape.slope(delta);
            if slope == 0.0 {
                continue;
            }
            if let Some(dn) = walk.derivative_at(neg) {
                for (f, &x) in dn {
                    *out.gradient.entry(f.clone()).or_insert(0.0) += slope * x;
                }
            }
            if let Some(dp) = walk.derivative_at(pos) {
                for (f, &x) in dp {
                    *out.gradient.entry(f.clone()).or_insert(0.0) -= slope * x;
                }
            }
        }
    }
    out
}

/// Squared hinge \(h(\delta) = \max(0, \delta + m)^2\).
#[derive(Debug, Clone, Copy)]
pub struct PairwiseHinge {
    pub margin: f64,
}

impl PairShape for PairwiseHinge {
    fn value(&self, delta: f64) -> f64 {
        let x = (delta + self.margin).max(0.0);
        x * x
    }

    fn slope(&self, delta: f64) -> f64 {
        2.0 * (delta + self.margin).max(0.0)
    }
}

impl LossFunction for PairwiseHinge {
    fn component(&self) -> LossComponent {
        LossComponent::Ranking
    }

    fn assemble(&self, walk: &WalkDerivatives, positives: &[usize], negatives: &[usize]) -> ExampleLoss {
        assemble_pairwise(self, walk, positives, negatives)
    }
}

/// Wilcoxon-Mann-Whitney style sigmoid \(h(\delta) = 1 / (1 + e^{-\delta / b})\).
#[derive(Debug, Clone, Copy)]
pub struct PairwiseLogistic {
    pub width: f64,
}

impl PairShape for PairwiseLogistic {
    fn value(&self, delta: f64) -> f64 {
        1.0 / (1.0 + (-delta / self.width).exp())
    }

    fn slope(&self, delta: f64) -> f64 {
        let h = self.value(delta);
        h * (1.0 - h) / self.width
    }
}

impl LossFunction for PairwiseLogistic {
    fn component(&self) -> LossComponent {
        LossComponent::Ranking
    }

    fn assemble(&self, walk: &WalkDerivatives, positives: &[usize], negatives: &[usize]) -> ExampleLoss {
        assemble_pairwise(self, walk, positives, negatives)
    }
}

/// Per-node log loss: \(-\ln p\) for positives, \(-\ln(1-p)\) for negatives.
#[derive(Debug, Clone, Copy, Default)]
pub struct PosNegLog;

/// Probabilities are kept inside `[BOUND, 1 - BOUND]` before taking logs.
const BOUND: f64 = 1e-10;

impl LossFunction for PosNegLog {
    fn component(&self) -> LossComponent {
        LossComponent::Log
    }

    fn assemble(&self, walk: &WalkDerivatives, positives: &[usize], negatives: &[usize]) -> ExampleLoss {
        let length = positives.len() + negatives.len();
        let mut out = ExampleLoss {
            length,
            ..ExampleLoss::default()
        };
        if length == 0 {
            return out;
        }
        let scale = 1.0 / length as f64;
        let labeled = positives
            .iter()
            .map(|&n| (n, true))
            .chain(negatives.iter().map(|&n| (n, false)));
        for (node, positive) in labeled {
            let raw = walk.mass_at(node);
            let p = raw.clamp(BOUND, 1.0 - BOUND);
            let (loss, slope) = if positive {
                (-p.ln(), -1.0 / p)
            } else {
                (-(1.0 - p).ln(), 1.0 / (1.0 - p))
            };
            out.loss += scale * loss;
            // The clamped loss is flat in `raw`.
            if p != raw {
                continue;
            }
            if let Some(dv) = walk.derivative_at(node) {
                for (f, &x) in dv {
                    *out.gradient.entry(f.clone()).or_insert(0.0) += scale * slope * x;
                }
            }
        }
        out
    }
}

/// Configuration-time selector for the built-in loss functions.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LossConfig {
    PairwiseHinge { margin: f64 },
    PairwiseLogistic { width: f64 },
    PosNegLog,
}

impl Default for LossConfig {
    fn default() -> Self {
        LossConfig::PairwiseHinge { margin: 0.01 }
    }
}

impl LossConfig {
    pub fn build(self) -> Box<dyn LossFunction> {
        match self {
            LossConfig::PairwiseHinge { margin } => Box::new(PairwiseHinge { margin }),
            LossConfig::PairwiseLogistic { width } => Box::new(PairwiseLogistic { width }),
            LossConfig::PosNegLog => Box::new(PosNegLog),
        }
    }
}

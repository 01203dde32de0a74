//! `srw`: supervised random walks with reset over feature-labeled graphs.
//!
//! Learns a weight per edge feature so that a personalized-PageRank-style walk from
//! the query nodes ranks positive targets above negative ones.
//!
//! Public invariants (must not drift):
//! - **Fixed-step walk**: [`rwr`] applies exactly `max_t` steps; there is no convergence test.
//! - **Dead ends lose mass**: a node with no positive outgoing weight drops its mass.
//! - **Exact gradient**: derivatives are carried forward alongside the walk, not estimated.
//! - **Untrainable features** never move under gradient descent; only the projection
//!   step may write them.
//! - **Restart floor**: after each update, every restart edge that a trained example can
//!   reach keeps local probability at least `alpha` (see [`projection`]).
//!
//! Swappable (allowed to change without breaking the contract):
//! - weighting scheme and loss family (trait objects chosen at configuration time)
//! - thread count and in-flight window of the trainer

pub mod example;
pub mod graph;
pub mod loss;
pub mod params;
pub mod projection;
pub mod ranking;
pub mod srw;
pub mod trainer;
pub mod walk;
pub mod weighting;

pub use example::{parse_example, Example, ExampleSet, ExampleSource, ExampleStreamer};
pub use graph::{Feature, FeatureGraph, FeatureVector, GraphBuilder, SparseFeatureGraph};
pub use loss::{
    ExampleLoss, Gradient, LossComponent, LossConfig, LossData, LossFunction, PairwiseHinge,
    PairwiseLogistic, PosNegLog,
};
pub use params::ParamVector;
pub use projection::{Projection, ProjectionStrategy};
pub use ranking::{above_threshold, normalize, top_k};
pub use srw::{
    GradientCheck, Srw, SrwConfig, FEATURE_ALPHA_BOOSTER, FEATURE_RESTART, FEATURE_TRUE_LOOP,
    PERTURB_EPSILON,
};
pub use trainer::{EpochStats, Trainer, TrainerConfig};
pub use walk::{
    edge_weight, rwr, rwr_with_derivatives, total_edge_weight, walk_once, NodeFeatureVec,
    NodeVec, WalkDerivatives,
};
pub use weighting::{Linear, Relu, Softplus, WeightingKind, WeightingScheme};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("graph format: {0}")]
    GraphFormat(String),
    #[error("example format (line {line}): {message}")]
    ExampleFormat { line: usize, message: String },
    #[error("params format (line {line}): {message}")]
    ParamsFormat { line: usize, message: String },
    #[error("attempted gradient update of untrainable feature {0}")]
    UntrainableUpdate(String),
    #[error("training task {index} failed: {message}")]
    TaskFailed { index: usize, message: String },
    #[error("no example was trained successfully")]
    NoExamples,
    #[error("thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

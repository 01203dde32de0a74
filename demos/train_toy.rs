//! End-to-end sketch: train edge-feature weights on a small citation-style graph,
//! then rank candidates for a query with the learned weights.
//!
//! The graph has two relations out of every paper:
//! - `cites(P,Q)`: the paper cites `Q` (usually relevant)
//! - `sameVenue(P,Q)`: `Q` appeared at the same venue (usually noise)
//!
//! Training examples say "from paper `p`, the cited papers should outrank the
//! same-venue ones". After a few epochs `cites` should outweigh `sameVenue`.
//!
//! Run with `RUST_LOG=srw=info cargo run --example train_toy [-- out.params]`.

use std::path::PathBuf;
use std::sync::Arc;

use srw::{
    above_threshold, top_k, Example, ExampleSet, GraphBuilder, NodeVec, ParamVector,
    SparseFeatureGraph, Srw, SrwConfig, Trainer, TrainerConfig, FEATURE_RESTART,
};
use tracing_subscriber::EnvFilter;

const PAPERS: usize = 12;

fn citation_graph() -> SparseFeatureGraph {
    let mut b = GraphBuilder::new();
    for p in 1..=PAPERS {
        // Every paper restarts to itself; queries are single papers.
        b.add_edge(p, p, [(FEATURE_RESTART, 1.0)]);
        for step in [1, 2] {
            let cited = (p + step - 1) % PAPERS + 1;
            b.add_edge(p, cited, [("cites", 1.0)]);
        }
        for step in [5, 6, 7] {
            let venue = (p + step - 1) % PAPERS + 1;
            b.add_edge(p, venue, [("sameVenue", 1.0)]);
        }
    }
    b.build()
}

fn main() -> srw::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let out = std::env::args().nth(1).map(PathBuf::from);
    let graph = Arc::new(citation_graph());

    let examples: Vec<Example> = (1..=PAPERS)
        .map(|p| {
            let query: NodeVec = [(p, 1.0)].into_iter().collect();
            let cited = vec![p % PAPERS + 1, (p + 1) % PAPERS + 1];
            let venue = vec![(p + 4) % PAPERS + 1, (p + 5) % PAPERS + 1];
            Example::new(Arc::clone(&graph), query, cited, venue).with_label(format!("paper({p})"))
        })
        .collect();
    let mut examples = ExampleSet::new(examples);

    let config = SrwConfig {
        max_t: 6,
        alpha: 0.2,
        ..SrwConfig::default()
    };
    let srw = Srw::new(config)?;
    let mut trainer = Trainer::new(srw, TrainerConfig::default())?;

    let initial = ParamVector::new();
    trainer.srw().add_default_weights(graph.as_ref(), &initial);
    let before = trainer.srw().average_loss(&initial, examples.iter());
    let params = trainer.train(&mut examples, initial.copy(), 8, true)?;
    let after = trainer.srw().average_loss(&params, examples.iter());

    println!("average loss: {before:.6} -> {after:.6}");
    for (name, value) in params.snapshot() {
        println!("  {name:<16} {value:+.4}");
    }

    let query: NodeVec = [(1, 1.0)].into_iter().collect();
    let scores = trainer.srw().rwr(graph.as_ref(), &query, &params);
    println!("top 5 from paper(1):");
    for (node, score) in top_k(&scores, 5) {
        println!("  paper({node})  {score:.4}");
    }
    println!("papers above 0.1: {:?}", above_threshold(&scores, 0.1));

    if let Some(path) = out {
        params.save(&path)?;
        println!("saved parameters to {}", path.display());
    }
    Ok(())
}

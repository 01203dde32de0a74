//! Training examples and the sources that stream them.

use crate::graph::{FeatureGraph, SparseFeatureGraph};
use crate::walk::NodeVec;
use crate::{Error, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One labeled query: walk from `query` over `graph`, rank `positives` above `negatives`.
#[derive(Debug)]
pub struct Example<G: ?Sized = SparseFeatureGraph> {
    graph: Arc<G>,
    query: NodeVec,
    positives: Vec<usize>,
    negatives: Vec<usize>,
    label: Option<String>,
}

impl<G: ?Sized> Clone for Example<G> {
    fn clone(&self) -> Self {
        Self {
            graph: Arc::clone(&self.graph),
            query: self.query.clone(),
            positives: self.positives.clone(),
            negatives: self.negatives.clone(),
            label: self.label.clone(),
        }
    }
}

impl<G: FeatureGraph + ?Sized> Example<G> {
    pub fn new(graph: Arc<G>, query: NodeVec, positives: Vec<usize>, negatives: Vec<usize>) -> Self {
        Self {
            graph,
            query,
            positives,
            negatives,
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }

    pub fn query(&self) -> &NodeVec {
        &self.query
    }

    pub fn positives(&self) -> &[usize] {
        &self.positives
    }

    pub fn negatives(&self) -> &[usize] {
        &self.negatives
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Number of labeled nodes.
    pub fn length(&self) -> usize {
        self.positives.len() + self.negatives.len()
    }
}

/// Pull-based, rewindable stream of examples.
///
/// `Ok(None)` means the stream is exhausted for this epoch. `Err` is fatal for the
/// whole run; malformed individual examples are skipped by the source itself.
pub trait ExampleSource {
    type Graph: FeatureGraph + ?Sized;

    fn next_example(&mut self) -> Result<Option<Example<Self::Graph>>>;

    /// Restart from the first example for the next epoch.
    fn rewind(&mut self) -> Result<()>;
}

/// In-memory examples, yielded in order.
#[derive(Debug, Clone)]
pub struct ExampleSet<G: ?Sized = SparseFeatureGraph> {
    examples: Vec<Example<G>>,
    cursor: usize,
}

impl<G: FeatureGraph + ?Sized> ExampleSet<G> {
    pub fn new(examples: Vec<Example<G>>) -> Self {
        Self { examples, cursor: 0 }
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Example<G>> {
        self.examples.iter()
    }
}

impl<G: FeatureGraph + ?Sized> ExampleSource for ExampleSet<G> {
    type Graph = G;

    fn next_example(&mut self) -> Result<Option<Example<G>>> {
        let next = self.examples.get(self.cursor).cloned();
        if next.is_some() {
            self.cursor += 1;
        }
        Ok(next)
    }

    fn rewind(&mut self) -> Result<()> {
        self.cursor = 0;
        Ok(())
    }
}

/// Parse one example line:
///
/// ```text
/// label \t q1,q2 \t pos1,pos2 \t neg1 \t <graph encoding>
/// ```
///
/// Query nodes get mass 1.0 each.
pub fn parse_example(line: &str) -> Result<Example> {
    let parts: Vec<&str> = line.trim_end_matches(['\r', '\n']).splitn(5, '\t').collect();
    if parts.len() != 5 {
        return Err(Error::ExampleFormat {
            line: 0,
            message: format!("expected 5 tab-separated fields, found {}", parts.len()),
        });
    }
    let ids = |field: &str, what: &str| -> Result<Vec<usize>> {
        field
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| {
                s.trim().parse::<usize>().map_err(|_| Error::ExampleFormat {
                    line: 0,
                    message: format!("bad {what} node id '{s}'"),
                })
            })
            .collect()
    };
    let query: NodeVec = ids(parts[1], "query")?.into_iter().map(|u| (u, 1.0)).collect();
    let positives = ids(parts[2], "positive")?;
    let negatives = ids(parts[3], "negative")?;
    let graph = SparseFeatureGraph::deserialize(parts[4])?;
    let mut example = Example::new(Arc::new(graph), query, positives, negatives);
    if !parts[0].is_empty() {
        example = example.with_label(parts[0]);
    }
    Ok(example)
}

/// Streams examples from a text file, one per line.
///
/// Blank lines and `#` comments are ignored. Lines that fail to parse, and examples
/// with no labeled nodes, are logged and skipped. I/O errors are returned.
#[derive(Debug)]
pub struct ExampleStreamer {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_number: usize,
    parse_errors: usize,
}

impl ExampleStreamer {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        info!(path = %path.display(), "importing examples");
        let lines = BufReader::new(File::open(&path)?).lines();
        Ok(Self {
            path,
            lines,
            line_number: 0,
            parse_errors: 0,
        })
    }

    /// Malformed lines skipped since the streamer was opened.
    pub fn parse_errors(&self) -> usize {
        self.parse_errors
    }
}

impl ExampleSource for ExampleStreamer {
    type Graph = SparseFeatureGraph;

    fn next_example(&mut self) -> Result<Option<Example>> {
        loop {
            let Some(line) = self.lines.next() else {
                return Ok(None);
            };
            let line = line?;
            self.line_number += 1;
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            debug!(line = self.line_number, "importing example");
            match parse_example(&line) {
                Ok(example) if example.length() == 0 => {
                    warn!(line = self.line_number, "no labeled solutions for example; skipping");
                }
                Ok(example) => return Ok(Some(example)),
                Err(e @ (Error::ExampleFormat { .. } | Error::GraphFormat(_))) => {
                    self.parse_errors += 1;
                    warn!(
                        path = %self.path.display(),
                        line = self.line_number,
                        error = %e,
                        "parse error; skipping example"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn rewind(&mut self) -> Result<()> {
        self.lines = BufReader::new(File::open(&self.path)?).lines();
        self.line_number = 0;
        Ok(())
    }
}

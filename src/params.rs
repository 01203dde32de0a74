//! Shared edge-feature parameter vector.
//!
//! Written concurrently by every training task in an epoch without a global lock:
//! each per-key update is a single read-modify-write under the owning shard, so
//! increments to the same feature are combined and increments to different
//! features never contend. Races *between* a task's read and a later write of the
//! same feature are accepted (asynchronous SGD).

use crate::graph::Feature;
use crate::{Error, Result};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct ParamVector {
    weights: DashMap<Feature, f64>,
}

impl ParamVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn contains(&self, feature: &str) -> bool {
        self.weights.contains_key(feature)
    }

    pub fn get(&self, feature: &str) -> Option<f64> {
        self.weights.get(feature).map(|w| *w)
    }

    /// Value of `feature`, or `default` when it has never been set.
    pub fn get_or(&self, feature: &str, default: f64) -> f64 {
        self.get(feature).unwrap_or(default)
    }

    pub fn set(&self, feature: impl Into<Feature>, value: f64) {
        self.weights.insert(feature.into(), value);
    }

    /// Atomically add `delta` to `feature` (starting from 0.0 if absent).
    pub fn increment(&self, feature: &Feature, delta: f64) {
        self.weights
            .entry(Arc::clone(feature))
            .and_modify(|w| *w += delta)
            .or_insert(delta);
    }

    /// Insert `init()` for `feature` unless some value is already present.
    ///
    /// Returns `true` when this call inserted the value.
    pub fn insert_if_absent(&self, feature: &Feature, init: impl FnOnce() -> f64) -> bool {
        if self.weights.contains_key(&**feature) {
            return false;
        }
        let mut inserted = false;
        self.weights.entry(Arc::clone(feature)).or_insert_with(|| {
            inserted = true;
            init()
        });
        inserted
    }

    /// Point-in-time copy, sorted by feature name.
    pub fn snapshot(&self) -> BTreeMap<String, f64> {
        self.weights
            .iter()
            .map(|e| (e.key().to_string(), *e.value()))
            .collect()
    }

    /// Independent copy (used for finite-difference perturbation).
    pub fn copy(&self) -> Self {
        let weights = DashMap::with_capacity(self.weights.len());
        for e in self.weights.iter() {
            weights.insert(Arc::clone(e.key()), *e.value());
        }
        Self { weights }
    }

    /// Write one `name<TAB>value` line per feature, sorted by name.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut out = BufWriter::new(File::create(path.as_ref())?);
        writeln!(out, "#\tsrw parameters ({} features)", self.len())?;
        for (name, value) in self.snapshot() {
            writeln!(out, "{name}\t{value}")?;
        }
        out.flush()?;
        Ok(())
    }

    /// Read a file written by [`ParamVector::save`]. Lines starting with `#` are ignored.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let params = Self::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let bad = |message: &str| Error::ParamsFormat {
                line: i + 1,
                message: message.to_string(),
            };
            let (name, value) = line.rsplit_once('\t').ok_or_else(|| bad("expected name<TAB>value"))?;
            let value: f64 = value.trim().parse().map_err(|_| bad("value is not a number"))?;
            if !value.is_finite() {
                return Err(bad("value must be finite"));
            }
            params.set(name, value);
        }
        Ok(params)
    }
}

impl<S: AsRef<str>> FromIterator<(S, f64)> for ParamVector {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        let params = Self::new();
        for (name, value) in iter {
            params.set(name.as_ref(), value);
        }
        params
    }
}

//! Multithreaded epoch loop.
//!
//! Each epoch streams examples on the calling thread and fans them out to a fixed
//! rayon pool, one task per example. At most `throttle` tasks are in flight; when the
//! window is full the caller blocks on completed results (the cleanup phase) before
//! submitting more. Loss totals and counters are only touched during cleanup, so they
//! are exact even though parameter updates race.

use crate::example::{Example, ExampleSource};
use crate::loss::LossData;
use crate::params::ParamVector;
use crate::srw::Srw;
use crate::{Error, Result};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::time::Instant;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrainerConfig {
    /// Worker threads in the pool.
    pub num_threads: usize,
    /// Maximum number of examples submitted but not yet cleaned up.
    pub throttle: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        let num_threads = std::thread::available_parallelism().map_or(1, |n| n.get());
        Self {
            num_threads,
            throttle: 4 * num_threads,
        }
    }
}

impl TrainerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_threads == 0 {
            return Err(Error::InvalidParameter(
                "num_threads must be > 0".to_string(),
            ));
        }
        if self.throttle == 0 {
            return Err(Error::InvalidParameter("throttle must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Per-epoch results gathered during cleanup.
#[derive(Debug, Clone, Default)]
pub struct EpochStats {
    pub epoch: usize,
    pub examples: usize,
    pub failures: usize,
    pub loss: LossData,
}

struct TaskOutcome {
    index: usize,
    label: Option<String>,
    result: Result<LossData>,
}

#[derive(Debug)]
pub struct Trainer {
    srw: Srw,
    config: TrainerConfig,
    history: Vec<EpochStats>,
}

impl Trainer {
    pub fn new(srw: Srw, config: TrainerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            srw,
            config,
            history: Vec::new(),
        })
    }

    pub fn srw(&self) -> &Srw {
        &self.srw
    }

    /// Stats of every epoch run by the last call to [`Trainer::train`].
    pub fn history(&self) -> &[EpochStats] {
        &self.history
    }

    /// Run `num_epochs` passes of SGD over `examples`, starting from `params`.
    ///
    /// Fails if the source errors, or if the first epoch trains no example successfully.
    /// With `trace_losses`, each epoch's loss and its change from the previous epoch
    /// are logged at `info`.
    pub fn train<S>(
        &mut self,
        examples: &mut S,
        params: ParamVector,
        num_epochs: usize,
        trace_losses: bool,
    ) -> Result<ParamVector>
    where
        S: ExampleSource,
        S::Graph: Send + Sync,
    {
        if num_epochs == 0 {
            return Err(Error::InvalidParameter("num_epochs must be >= 1".to_string()));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.num_threads)
            .thread_name(|i| format!("srw-train-{i}"))
            .build()?;

        self.history.clear();
        let started = Instant::now();
        for epoch in 1..=num_epochs {
            if epoch > 1 {
                examples.rewind()?;
            }
            self.srw.set_epoch(epoch);
            let stats = self.run_epoch(&pool, examples, &params, epoch)?;
            if epoch == 1 && stats.examples == stats.failures {
                return Err(Error::NoExamples);
            }
            if trace_losses {
                match self.history.last() {
                    Some(prev) => info!(
                        epoch,
                        loss = %stats.loss,
                        delta = %stats.loss.diff(&prev.loss),
                        "epoch finished"
                    ),
                    None => info!(epoch, loss = %stats.loss, "epoch finished"),
                }
            }
            info!(
                epoch,
                examples = stats.examples,
                failures = stats.failures,
                alpha_violations = self.srw.alpha_violations(),
                nan_clamps = self.srw.nan_clamps(),
                rate = self.srw.learning_rate(),
                "epoch summary"
            );
            self.history.push(stats);
        }
        info!(epochs = num_epochs, elapsed_ms = started.elapsed().as_millis() as u64, "training finished");
        Ok(params)
    }

    fn run_epoch<S>(
        &self,
        pool: &rayon::ThreadPool,
        examples: &mut S,
        params: &ParamVector,
        epoch: usize,
    ) -> Result<EpochStats>
    where
        S: ExampleSource,
        S::Graph: Send + Sync,
    {
        let srw = &self.srw;
        let throttle = self.config.throttle;
        let mut stats = EpochStats {
            epoch,
            ..EpochStats::default()
        };
        let (tx, rx) = mpsc::channel::<TaskOutcome>();

        pool.in_place_scope(|scope| -> Result<()> {
            let mut in_flight = 0usize;
            let mut index = 0usize;
            let mut streamed = Ok(());
            loop {
                let example: Example<S::Graph> = match examples.next_example() {
                    Ok(Some(example)) => example,
                    Ok(None) => break,
                    Err(e) => {
                        // Fatal, but let submitted tasks finish before reporting it.
                        streamed = Err(e);
                        break;
                    }
                };
                while in_flight >= throttle {
                    let Ok(outcome) = rx.recv() else { break };
                    cleanup(&mut stats, outcome);
                    in_flight -= 1;
                }
                let tx = tx.clone();
                scope.spawn(move |_| {
                    let label = example.label().map(String::from);
                    let result = panic::catch_unwind(AssertUnwindSafe(|| srw.train_on_example(params, &example)))
                        .unwrap_or_else(|payload| {
                            Err(Error::TaskFailed {
                                index,
                                message: panic_message(payload.as_ref()),
                            })
                        });
                    let _ = tx.send(TaskOutcome { index, label, result });
                });
                in_flight += 1;
                index += 1;
                debug!(index, in_flight, "submitted example");
            }
            while in_flight > 0 {
                let Ok(outcome) = rx.recv() else { break };
                cleanup(&mut stats, outcome);
                in_flight -= 1;
            }
            streamed
        })?;
        Ok(stats)
    }
}

fn cleanup(stats: &mut EpochStats, outcome: TaskOutcome) {
    stats.examples += 1;
    match outcome.result {
        Ok(loss) => stats.loss.merge(&loss),
        Err(e) => {
            stats.failures += 1;
            error!(
                epoch = stats.epoch,
                index = outcome.index,
                label = outcome.label.as_deref().unwrap_or(""),
                error = %e,
                "training task failed"
            );
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

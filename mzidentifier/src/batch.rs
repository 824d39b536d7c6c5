//! Applying a per-file pipeline to many peak lists with a fixed pool of workers.
//!
//! A feeder thread fills a bounded work queue and closes it by dropping its
//! sender. Workers on a dedicated [`rayon::ThreadPool`] drain the queue and send
//! one [`ItemReport`] per item to an aggregator thread, which tallies outcomes
//! and drives a progress bar until every worker has hung up.
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use mzidentify::search::SearchState;

use crate::progress::{BatchSummary, ProgressRecord};
use crate::types::{BUFFER_SIZE, DEFAULT_WORKERS};

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("An IO error occurred: {0}")]
    Io(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("Failed to build the worker pool: {0}")]
    ThreadPool(
        #[source]
        #[from]
        rayon::ThreadPoolBuildError,
    ),
    #[error("A worker panicked, the batch was aborted after {0} items")]
    WorkerPanicked(usize),
    #[error("The progress aggregator panicked")]
    AggregatorPanicked,
}

/// What became of one batch item
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Completed {
        best_match: Option<String>,
        state: SearchState,
    },
    /// The input file does not exist
    Missing,
    /// The input file held no usable peaks
    NoPeaks,
    Failed(String),
}

impl ItemOutcome {
    fn progress(&self) -> ProgressRecord {
        let mut record = ProgressRecord::default();
        match self {
            ItemOutcome::Completed { state, .. } => {
                record.completed = 1;
                if *state == SearchState::Degraded {
                    record.degraded = 1;
                }
            }
            ItemOutcome::Missing => record.missing = 1,
            ItemOutcome::NoPeaks => record.no_peaks = 1,
            ItemOutcome::Failed(_) => record.failed = 1,
        }
        record
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemReport {
    pub path: PathBuf,
    pub worker: usize,
    pub outcome: ItemOutcome,
}

/// The work done for each batch item. Shared by every worker at once.
pub trait ItemProcessor: Sync {
    fn process(&self, path: &Path) -> ItemOutcome;
}

#[derive(Debug, Clone, Copy)]
pub struct BatchRunner {
    pub workers: usize,
    pub queue_size: usize,
    /// Whether to draw a progress bar on STDERR as items finish
    pub show_progress: bool,
}

impl Default for BatchRunner {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}

fn worker_loop<P: ItemProcessor + ?Sized>(
    worker: usize,
    work: &Receiver<PathBuf>,
    results: &Sender<ItemReport>,
    processor: &P,
    abort: &AtomicBool,
) {
    while !abort.load(Ordering::Acquire) {
        let Ok(path) = work.recv() else {
            break;
        };
        debug!(worker, "Processing {}", path.display());
        let outcome = processor.process(&path);
        if results
            .send(ItemReport {
                path,
                worker,
                outcome,
            })
            .is_err()
        {
            break;
        }
    }
}

const PROGRESS_TEMPLATE: &str = "Finished processing {pos} of {len} ({percent}%) items.";

fn progress_bar(total: usize, show_progress: bool) -> ProgressBar {
    let target = if show_progress {
        ProgressDrawTarget::stderr()
    } else {
        ProgressDrawTarget::hidden()
    };
    let style = ProgressStyle::with_template(PROGRESS_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    ProgressBar::with_draw_target(Some(total as u64), target).with_style(style)
}

fn log_outcome(report: &ItemReport) {
    let path = report.path.display();
    match &report.outcome {
        ItemOutcome::Completed {
            best_match: Some(best),
            state,
        } => info!("{path}: best match {best} ({state:?})"),
        ItemOutcome::Completed {
            best_match: None, ..
        } => warn!("{path}: no candidate could be scored"),
        ItemOutcome::Missing => warn!("{path}: file not found"),
        ItemOutcome::NoPeaks => warn!("{path}: no peaks found"),
        ItemOutcome::Failed(reason) => error!("{path}: {reason}"),
    }
}

fn aggregate(results: Receiver<ItemReport>, total: usize, progress: ProgressBar) -> BatchSummary {
    let mut summary = BatchSummary::new(total);
    for report in results.iter() {
        progress.suspend(|| log_outcome(&report));
        summary.progress += report.outcome.progress();
        progress.inc(1);
    }
    progress.finish();
    summary
}

impl BatchRunner {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            queue_size: BUFFER_SIZE,
            show_progress: true,
        }
    }

    pub fn quiet(mut self) -> Self {
        self.show_progress = false;
        self
    }

    fn num_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(DEFAULT_WORKERS)
        }
    }

    /// Process every path in `paths` with `processor`.
    ///
    /// Each item produces exactly one report unless a worker panics, in which
    /// case the remaining items are abandoned and [`BatchError::WorkerPanicked`]
    /// is returned.
    pub fn run<P: ItemProcessor>(
        &self,
        paths: Vec<PathBuf>,
        processor: &P,
    ) -> Result<BatchSummary, BatchError> {
        let total = paths.len();
        let workers = self.num_workers();
        info!("Processing {total} peak lists with {workers} workers");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("mzidentifier-worker-{i}"))
            .build()?;

        let abort = AtomicBool::new(false);
        let (work_tx, work_rx) = bounded::<PathBuf>(self.queue_size.max(1));
        let (result_tx, result_rx) = unbounded::<ItemReport>();

        let progress = progress_bar(total, self.show_progress);
        let aggregator = thread::spawn(move || aggregate(result_rx, total, progress));

        // Each worker owns its own handles, so the channels disconnect once the
        // feeder and every worker are done.
        let handles: Vec<_> = (0..workers)
            .map(|_| (work_rx.clone(), result_tx.clone()))
            .collect();
        drop(work_rx);
        drop(result_tx);

        thread::scope(|scope| {
            let abort = &abort;
            scope.spawn(move || {
                for path in paths {
                    if abort.load(Ordering::Acquire) || work_tx.send(path).is_err() {
                        break;
                    }
                }
            });

            pool.scope(|s| {
                for (worker, (work, results)) in handles.into_iter().enumerate() {
                    s.spawn(move |_| {
                        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                            worker_loop(worker, &work, &results, processor, abort)
                        }));
                        if outcome.is_err() {
                            error!("Worker {worker} panicked, aborting the batch");
                            abort.store(true, Ordering::Release);
                        }
                    });
                }
            });
        });

        let summary = aggregator
            .join()
            .map_err(|_| BatchError::AggregatorPanicked)?;
        if abort.load(Ordering::Acquire) {
            return Err(BatchError::WorkerPanicked(summary.processed()));
        }
        info!("{}", summary.status_line());
        Ok(summary)
    }
}

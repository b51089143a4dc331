use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use mediagen_contracts::naming::NamedOutput;
use mediagen_contracts::GenerationError;
use mediagen_engine::JobFailure;

/// What a pool run produced, in completion order.
#[derive(Debug, Default)]
pub struct PoolReport {
    pub saved: Vec<NamedOutput>,
    pub empty_jobs: usize,
    pub failed_jobs: usize,
    pub precondition: Option<GenerationError>,
}

/// Raises `flag` if the pool is still running after `after`.
#[derive(Debug, Clone)]
pub struct Deadline {
    pub after: Duration,
    pub flag: Arc<AtomicBool>,
}

/// Runs `jobs` invocations of `job` over at most `workers` threads. Job
/// indices are handed out from a shared counter; a failing or panicking job
/// never stops its siblings.
pub fn run_pool<F>(jobs: usize, workers: usize, deadline: Option<Deadline>, job: F) -> PoolReport
where
    F: Fn(usize) -> Result<Vec<NamedOutput>, JobFailure> + Sync,
{
    if jobs == 0 {
        return PoolReport::default();
    }
    let report = Mutex::new(PoolReport::default());
    let threads = workers.clamp(1, jobs);
    let next = AtomicUsize::new(0);
    let (done_tx, done_rx) = mpsc::channel::<()>();

    thread::scope(|scope| {
        if let Some(deadline) = deadline {
            scope.spawn(move || {
                if let Err(mpsc::RecvTimeoutError::Timeout) = done_rx.recv_timeout(deadline.after)
                {
                    tracing::warn!(after = ?deadline.after, "deadline reached; cancelling jobs");
                    deadline.flag.store(true, Ordering::SeqCst);
                }
            });
        }

        let handles: Vec<_> = (0..threads)
            .map(|worker| {
                let next = &next;
                let report = &report;
                let job = &job;
                scope.spawn(move || loop {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    if index >= jobs {
                        break;
                    }
                    tracing::debug!(worker, job = index + 1, "starting job");
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| job(index)));
                    let mut guard = match report.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    record_outcome(&mut guard, index, outcome);
                })
            })
            .collect();
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }
        drop(done_tx);
    });

    match report.into_inner() {
        Ok(report) => report,
        Err(poisoned) => poisoned.into_inner(),
    }
}

type Outcome = thread::Result<Result<Vec<NamedOutput>, JobFailure>>;

fn record_outcome(report: &mut PoolReport, index: usize, outcome: Outcome) {
    let failure = match outcome {
        Ok(Ok(saved)) if saved.is_empty() => {
            report.empty_jobs += 1;
            return;
        }
        Ok(Ok(saved)) => {
            report.saved.extend(saved);
            return;
        }
        Ok(Err(failure)) => failure,
        Err(_) => {
            tracing::error!(job = index + 1, "job panicked");
            report.failed_jobs += 1;
            return;
        }
    };

    report.failed_jobs += 1;
    report.saved.extend(failure.saved);
    let err = failure.error;
    if err.is_precondition() {
        tracing::error!(job = index + 1, error = %err, "job rejected");
        if report.precondition.is_none() {
            report.precondition = Some(err);
        }
    } else {
        tracing::error!(job = index + 1, error = %err, "job failed");
    }
}

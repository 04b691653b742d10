//! Worker pool (C6)
//!
//! Bounded parallel execution of per-file scan+route tasks. For
//! `max_scan_threads == 1`, tasks run sequentially in submission order;
//! otherwise a `rayon` thread pool sized to `max_scan_threads` processes
//! them, and `par_iter().map(...).collect()` preserves the submission
//! order of the result `Vec` regardless of completion order.

use rayon::prelude::*;
use rayon::ThreadPoolBuildError;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to build worker pool: {0}")]
    Build(#[from] ThreadPoolBuildError),
    #[error("a worker task panicked; pool drained without scheduling further work")]
    WorkerPanicked,
}

/// Runs `f` over every item in `tasks`, in a bounded pool of `max_threads`
/// workers (or sequentially when `max_threads <= 1`). If any task panics,
/// no further tasks are scheduled on any worker and the run reports a
/// pool-level error; results already produced by other workers are
/// discarded along with it, matching the orchestrator's "drain without
/// scheduling new tasks" contract for worker exceptions.
pub fn run_bounded<T, R, F>(tasks: Vec<T>, max_threads: usize, f: F) -> Result<Vec<R>, PoolError>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    if max_threads <= 1 {
        return Ok(tasks.into_iter().map(f).collect());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(max_threads)
        .build()?;

    let poisoned = AtomicBool::new(false);

    pool.install(|| {
        let results: Vec<Option<R>> = tasks
            .into_par_iter()
            .map(|task| {
                if poisoned.load(Ordering::SeqCst) {
                    return None;
                }
                match catch_unwind(AssertUnwindSafe(|| f(task))) {
                    Ok(result) => Some(result),
                    Err(_) => {
                        poisoned.store(true, Ordering::SeqCst);
                        None
                    }
                }
            })
            .collect();

        if poisoned.load(Ordering::SeqCst) {
            Err(PoolError::WorkerPanicked)
        } else {
            Ok(results.into_iter().map(|r| r.expect("non-poisoned pool yields all results")).collect())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_preserves_order() {
        let tasks = vec![1, 2, 3, 4, 5];
        let results = run_bounded(tasks, 1, |n| n * 10).unwrap();
        assert_eq!(results, vec![10, 20, 30, 40, 50]);
    }

    #[test]
    fn test_parallel_preserves_submission_order() {
        let tasks: Vec<i32> = (0..50).collect();
        let results = run_bounded(tasks.clone(), 4, |n| n * 2).unwrap();
        let expected: Vec<i32> = tasks.iter().map(|n| n * 2).collect();
        assert_eq!(results, expected);
    }

    #[test]
    fn test_panic_in_worker_reports_pool_error() {
        let tasks = vec![1, 2, 3];
        let result: Result<Vec<i32>, PoolError> = run_bounded(tasks, 2, |n| {
            if n == 2 {
                panic!("simulated worker failure");
            }
            n
        });
        assert!(matches!(result, Err(PoolError::WorkerPanicked)));
    }
}

//! Parallel hash prefill
//!
//! Hashes every matching (label, configuration) pair before the working tree
//! mutates for the next checkout. A fixed pool of workers drains a bounded
//! queue; the cache's own per-entry locking makes concurrent producers safe,
//! and because the hash function's inputs are ordered, results do not depend
//! on scheduling.

use crossbeam_channel::bounded;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use targetscope_core::{Configuration, Label};

use crate::query::MatchingTargets;
use crate::target_hash::{HashError, TargetHashCache};

/// Overrides the worker count, which defaults to `8 * num_cpus`.
pub const WORKER_COUNT_ENV: &str = "TD_WORKER_COUNT";

#[derive(Debug, Error)]
pub enum PrefillError {
    #[error("could not parse the {WORKER_COUNT_ENV} env var into a positive int: {value:?}")]
    InvalidWorkerCount { value: String },

    #[error(transparent)]
    Hash(#[from] HashError),
}

fn worker_count() -> Result<usize, PrefillError> {
    match std::env::var(WORKER_COUNT_ENV) {
        Ok(value) => value
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|count| *count >= 1)
            .ok_or(PrefillError::InvalidWorkerCount { value }),
        Err(_) => Ok(num_cpus::get() * 8),
    }
}

/// Hash every matching pair, then freeze the cache.
///
/// The matching set is fed in label sort order; completion order is not
/// observable. The first error is recorded once, stops the feed, and is
/// returned after the remaining workers drain.
pub(crate) fn prefill(cache: &TargetHashCache, matching: &MatchingTargets) -> Result<(), PrefillError> {
    let workers = worker_count()?;
    debug!(workers, "prefilling target hashes");

    let (sender, receiver) = bounded::<(Label, Configuration)>(workers);
    let first_error: Mutex<Option<HashError>> = Mutex::new(None);

    std::thread::scope(|scope| {
        for _ in 0..workers {
            let receiver = receiver.clone();
            let first_error = &first_error;
            scope.spawn(move || {
                for (label, configuration) in receiver.iter() {
                    if let Err(err) = cache.hash(&label, &configuration) {
                        let mut slot = first_error.lock();
                        if slot.is_none() {
                            *slot = Some(err);
                        }
                    }
                }
            });
        }

        'feed: for label in matching.labels().iter() {
            let configurations = matching.configurations_for(label);
            for configuration in configurations.iter() {
                if first_error.lock().is_some() {
                    break 'feed;
                }
                if sender.send((label.clone(), configuration.clone())).is_err() {
                    break 'feed;
                }
            }
        }
        drop(sender);
    });

    match first_error.into_inner() {
        Some(err) => Err(err.into()),
        None => {
            // The filesystem may be about to change; any read after this
            // point would be invalid, so the cache becomes a pure lookup.
            cache.freeze();
            Ok(())
        }
    }
}

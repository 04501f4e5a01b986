//! Fixed-size worker pool over a shared work list.
//!
//! Every worker walks the whole list and takes the items it manages to
//! claim, so each item is checked by exactly one worker. A worker that hits
//! a soft problem stops; the others carry on. A fatal error stops all of
//! them.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::fs::FileEntry;
use crate::utils::{CatalogError, Result};

/// An item that a single worker can take ownership of.
pub trait Claim {
    /// `true` for exactly one caller until the claim is released.
    fn try_claim(&self) -> bool;
}

impl Claim for FileEntry {
    fn try_claim(&self) -> bool {
        FileEntry::try_claim(self)
    }
}

/// Outcome of checking one item.
#[derive(Debug)]
pub enum Step<P> {
    Next,
    /// Stop this worker, reporting a problem.
    Stop(P),
}

/// Run `check` over `items` on `workers` blocking threads.
///
/// Returns the problems reported by stopped workers, or the first error.
/// Tripping `cancel` makes the run fail with [`CatalogError::Interrupted`].
pub async fn run<T, P, F>(
    items: Arc<Vec<T>>,
    workers: usize,
    cancel: &CancellationToken,
    check: F,
) -> Result<Vec<P>>
where
    T: Claim + Send + Sync + 'static,
    P: Send + 'static,
    F: Fn(usize, &T) -> Result<Step<P>> + Send + Sync + 'static,
{
    let check = Arc::new(check);
    let abort = CancellationToken::new();

    let mut handles = Vec::with_capacity(workers.max(1));
    for worker in 0..workers.max(1) {
        let items = Arc::clone(&items);
        let check = Arc::clone(&check);
        let cancel = cancel.clone();
        let abort = abort.clone();

        handles.push(tokio::task::spawn_blocking(move || -> Result<Option<P>> {
            for (index, item) in items.iter().enumerate() {
                if !item.try_claim() {
                    continue;
                }
                if cancel.is_cancelled() {
                    abort.cancel();
                    return Err(CatalogError::Interrupted);
                }
                if abort.is_cancelled() {
                    debug!("worker {} stopped after another worker failed", worker);
                    return Ok(None);
                }
                match check(index, item) {
                    Ok(Step::Next) => {}
                    Ok(Step::Stop(problem)) => return Ok(Some(problem)),
                    Err(e) => {
                        abort.cancel();
                        return Err(e);
                    }
                }
            }
            Ok(None)
        }));
    }

    let mut problems = Vec::new();
    let mut failure = None;
    for handle in handles {
        match handle.await {
            Ok(Ok(Some(problem))) => problems.push(problem),
            Ok(Ok(None)) => {}
            Ok(Err(e)) => {
                failure.get_or_insert(e);
            }
            Err(e) => {
                failure.get_or_insert(CatalogError::Worker(e.to_string()));
            }
        }
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(problems),
    }
}

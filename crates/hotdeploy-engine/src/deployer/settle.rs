//! Bounded-retry settling of a deploy queue.
//!
//! Bundles don't declare what they depend on. Instead the queue is retried:
//! a bundle that fails goes to the back and gets another chance once the
//! others have had theirs. With N bundles, at most `N * (N + 1) / 2`
//! attempts are needed if every pass settles at least one bundle; anything
//! still queued after that is reported as unresolved.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::debug;

use crate::bundle::Bundle;
use crate::container::ModuleContainer;
use crate::error::DeployError;

/// Something the settler can try to deploy.
pub trait Deployable {
    type Output;

    /// Name used in logs and in [`DeployError::SettlingExceeded`].
    fn label(&self) -> String;

    fn try_deploy(&self) -> Result<Self::Output, DeployError>;

    /// Remember why the last attempt failed.
    fn record_failure(&self, error: DeployError);
}

impl Deployable for Arc<Bundle> {
    type Output = Vec<Arc<ModuleContainer>>;

    fn label(&self) -> String {
        self.name().to_string()
    }

    fn try_deploy(&self) -> Result<Self::Output, DeployError> {
        self.load()
    }

    fn record_failure(&self, error: DeployError) {
        self.set_last_error(Some(error));
    }
}

/// Attempt budget for a queue of `n` items: `n * (n / 2 + 0.5)`.
pub fn max_attempts(n: usize) -> usize {
    n * (n + 1) / 2
}

/// Result of settling one queue.
#[derive(Debug)]
pub struct SettleReport<D: Deployable> {
    /// Deployed items with their output, in the order they succeeded
    pub settled: Vec<(D, D::Output)>,
    /// Items still failing when the budget ran out, in queue order
    pub unresolved: Vec<D>,
    pub attempts: usize,
    pub max_attempts: usize,
}

impl<D: Deployable> SettleReport<D> {
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }

    /// The error describing what is left, if anything is.
    pub fn exceeded(&self) -> Option<DeployError> {
        if self.is_complete() {
            return None;
        }
        Some(DeployError::SettlingExceeded {
            attempts: self.attempts,
            unresolved: self.unresolved.iter().map(Deployable::label).collect(),
        })
    }
}

/// Deploy everything in `queue`, retrying failures at the back of the queue.
pub fn settle<D: Deployable>(queue: impl IntoIterator<Item = D>) -> SettleReport<D> {
    let mut queue: VecDeque<D> = queue.into_iter().collect();
    let max_attempts = max_attempts(queue.len());
    let mut attempts = 0;
    let mut settled = Vec::with_capacity(queue.len());

    while let Some(item) = queue.pop_front() {
        if attempts >= max_attempts {
            queue.push_front(item);
            break;
        }
        attempts += 1;
        match item.try_deploy() {
            Ok(output) => {
                debug!(bundle = %item.label(), attempt = attempts, "Deployed");
                settled.push((item, output));
            }
            Err(e) => {
                debug!(bundle = %item.label(), attempt = attempts, error = %e, "Deploy failed, requeued");
                item.record_failure(e);
                queue.push_back(item);
            }
        }
    }

    SettleReport {
        settled,
        unresolved: queue.into(),
        attempts,
        max_attempts,
    }
}

// src/controller/mod.rs

//! Reconcilers
//!
//! A reconciler drives one object toward its declared state in a single,
//! level-triggered pass. Passes are idempotent: running one again against
//! unchanged inputs changes nothing. The [`crate::manager`] decides when a
//! pass runs; the reconciler only reports when it would like to run again.
//!
//! - [`PackageReconciler`] registers a package in the ledger and makes sure
//!   a revision exists for the content it resolves to
//! - [`RevisionReconciler`] applies a revision's resources with ownership
//!   matching its desired state

mod package;
mod revision;

pub use package::{PackagePhase, PackageReconciler};
pub use revision::{RevisionPhase, RevisionReconciler};

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// Requeue delay after a failed pass
pub const DEFAULT_SHORT_WAIT: Duration = Duration::from_secs(30);

/// Requeue delay after a successful pass
pub const DEFAULT_RESYNC_PERIOD: Duration = Duration::from_secs(60);

/// Upper bound on a single pass
pub const DEFAULT_RECONCILE_TIMEOUT: Duration = Duration::from_secs(60);

/// Time budget and requeue delays shared by all reconcilers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub reconcile_timeout: Duration,
    pub short_wait: Duration,
    pub resync_period: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            reconcile_timeout: DEFAULT_RECONCILE_TIMEOUT,
            short_wait: DEFAULT_SHORT_WAIT,
            resync_period: DEFAULT_RESYNC_PERIOD,
        }
    }
}

impl Timings {
    /// Run `work` under the reconcile timeout
    async fn bounded(&self, work: impl Future<Output = Result<Reconciled>>) -> Result<Reconciled> {
        tokio::time::timeout(self.reconcile_timeout, work)
            .await
            .unwrap_or(Err(Error::Timeout {
                secs: self.reconcile_timeout.as_secs(),
            }))
    }
}

/// Event reason for a pass that ran out of time
const REASON_TIMEOUT: &str = "ReconcileTimeout";

/// Why a pass failed: the event reason and the error
struct Failure {
    reason: &'static str,
    error: Error,
}

impl Failure {
    fn new(reason: &'static str, error: impl Into<Error>) -> Self {
        Self {
            reason,
            error: error.into(),
        }
    }

    fn timeout(budget: Duration) -> Self {
        Self::new(REASON_TIMEOUT, Error::Timeout { secs: budget.as_secs() })
    }
}

/// Outcome of one reconciliation pass
///
/// A failed pass is still a completed pass: its status and event have been
/// written. `Err` from [`Reconciler::reconcile`] means even that was not
/// possible.
#[derive(Debug)]
pub enum Reconciled {
    /// Converged; check again after the resync period
    Available { requeue_after: Duration },
    /// Did not converge; retry after a short wait
    Failed { error: Error, requeue_after: Duration },
    /// The object no longer exists; stop
    Gone,
}

impl Reconciled {
    /// Delay before the next pass, if any
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            Self::Available { requeue_after } | Self::Failed { requeue_after, .. } => {
                Some(*requeue_after)
            }
            Self::Gone => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available { .. })
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// A reconciler the manager can schedule
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    /// Kind of the objects this reconciler handles
    fn kind(&self) -> &'static str;

    /// Run one pass for the named object
    async fn reconcile(&self, name: &str) -> Result<Reconciled>;
}

//! Three-tier sync: coordinators, fallbacks, and background reconcile.

mod coordinator;
mod fallback;
mod scheduler;

pub use coordinator::{
    ChangeEvent, ReadOutcome, ReadSource, ReconcileReport, RemoteApplyOutcome, SyncCoordinator,
};
pub use fallback::{
    call_remote, with_fallback, BoxFuture, FallbackOutcome, Lookup, LookupHit, RetryPolicy, Tier,
};
pub use scheduler::{reconcile_all, ReconcileScheduler};

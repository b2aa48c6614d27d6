//! Bounded remote calls and tiered fallbacks

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::remote::{RemoteError, RemoteResult};

/// Boxed future used by lookup layers
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How many times to try a remote call and how long each attempt may take
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, timeout: Duration) -> Self {
        Self { attempts, timeout }
    }

    /// Single attempt bounded by `timeout`
    pub const fn once(timeout: Duration) -> Self {
        Self::new(1, timeout)
    }
}

/// Run `call` under `policy`.
///
/// Each attempt is bounded by `tokio::time::timeout`. A timed-out attempt is
/// dropped, which cancels the request on this side only; the server may
/// still apply it. Permanent errors stop retrying immediately.
pub async fn call_remote<T, F, Fut>(policy: RetryPolicy, mut call: F) -> RemoteResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RemoteResult<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut last_error = RemoteError::Timeout(policy.timeout);

    for attempt in 1..=attempts {
        match tokio::time::timeout(policy.timeout, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(error)) if error.is_permanent() => return Err(error),
            Ok(Err(error)) => {
                tracing::debug!("Remote attempt {attempt}/{attempts} failed: {error}");
                last_error = error;
            }
            Err(_) => {
                tracing::debug!(
                    "Remote attempt {attempt}/{attempts} timed out after {:?}",
                    policy.timeout
                );
                last_error = RemoteError::Timeout(policy.timeout);
            }
        }
    }

    Err(last_error)
}

/// Which tier produced a fallback result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Primary,
    Secondary,
    Missing,
}

#[derive(Debug)]
pub struct FallbackOutcome<T> {
    pub value: Option<T>,
    pub tier: Tier,
    /// Why the primary tier did not answer, when it failed
    pub primary_error: Option<RemoteError>,
}

impl<T> FallbackOutcome<T> {
    pub const fn served_by_primary(&self) -> bool {
        matches!(self.tier, Tier::Primary)
    }
}

/// Ask the remote tier under `policy`; on error or miss ask `secondary`.
pub async fn with_fallback<T, P, PF, S, SF>(
    policy: RetryPolicy,
    primary: P,
    secondary: S,
) -> FallbackOutcome<T>
where
    P: FnMut() -> PF,
    PF: Future<Output = RemoteResult<Option<T>>>,
    S: FnOnce() -> SF,
    SF: Future<Output = Option<T>>,
{
    let primary_error = match call_remote(policy, primary).await {
        Ok(Some(value)) => {
            return FallbackOutcome {
                value: Some(value),
                tier: Tier::Primary,
                primary_error: None,
            };
        }
        Ok(None) => None,
        Err(error) => {
            tracing::warn!("Primary tier failed, falling back: {error}");
            Some(error)
        }
    };

    let value = secondary().await;
    let tier = if value.is_some() {
        Tier::Secondary
    } else {
        Tier::Missing
    };
    FallbackOutcome {
        value,
        tier,
        primary_error,
    }
}

type Probe<'a, T> = Box<dyn FnOnce() -> BoxFuture<'a, Option<T>> + Send + 'a>;

/// Value found by a `Lookup`, with the name of the layer that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct LookupHit<T> {
    pub layer: String,
    pub value: T,
}

/// Ordered list of named probes; the first one to return a value wins.
pub struct Lookup<'a, T> {
    name: String,
    layers: Vec<(String, Probe<'a, T>)>,
}

impl<'a, T: Send + 'a> Lookup<'a, T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layers: Vec::new(),
        }
    }

    #[must_use]
    pub fn layer<F, Fut>(mut self, name: impl Into<String>, probe: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = Option<T>> + Send + 'a,
    {
        let probe: Probe<'a, T> = Box::new(move || Box::pin(probe()));
        self.layers.push((name.into(), probe));
        self
    }

    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Evaluate layers in order, stopping at the first hit.
    pub async fn run(self) -> Option<LookupHit<T>> {
        for (layer, probe) in self.layers {
            if let Some(value) = probe().await {
                tracing::debug!("{} lookup hit in {layer}", self.name);
                return Some(LookupHit { layer, value });
            }
        }
        tracing::debug!("{} lookup missed every layer", self.name);
        None
    }
}

//! Ordered fallback ladders.
//!
//! A [`FallbackChain`] holds tiers from best to worst. Tiers are started
//! lazily, one at a time; each result is validated before acceptance and a
//! failed attempt or failed validation moves on to the next tier. Only when
//! every tier has failed does the chain return an error, unless a tier fails
//! with an error that [`StemmixError::advances_tier`] rejects: that error is
//! returned as-is and lower tiers are not started.

use crate::error::{Result, StemmixError};
use std::future::Future;
use std::pin::Pin;
use tracing::{info, warn};

/// Boxed future produced by a tier.
pub type TierFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

type TierFn<'a, T> = Box<dyn FnOnce() -> TierFuture<'a, T> + Send + 'a>;

/// Outcome of a chain that found an acceptable tier.
#[derive(Debug)]
pub struct Resolved<T> {
    pub value: T,
    /// Name of the tier that produced `value`.
    pub tier: &'static str,
    /// Failures of higher tiers, in order.
    pub skipped: Vec<String>,
}

impl<T> Resolved<T> {
    /// True when the best tier was not the one that succeeded.
    pub fn degraded(&self) -> bool {
        !self.skipped.is_empty()
    }
}

/// Ordered strategy chain with a validate-or-advance contract.
pub struct FallbackChain<'a, T> {
    stage: &'static str,
    tiers: Vec<(&'static str, TierFn<'a, T>)>,
}

impl<'a, T: Send + 'a> FallbackChain<'a, T> {
    pub fn new(stage: &'static str) -> Self {
        Self {
            stage,
            tiers: Vec::new(),
        }
    }

    /// Append a tier; earlier tiers are preferred.
    pub fn tier<F, Fut>(mut self, name: &'static str, start: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = Result<T>> + Send + 'a,
    {
        self.tiers
            .push((name, Box::new(move || Box::pin(start()) as TierFuture<'a, T>)));
        self
    }

    /// Run tiers until one produces a value that passes `validate`.
    ///
    /// Tool, validation and I/O failures advance to the next tier. Any other
    /// error (bad input, configuration) aborts the chain and is returned
    /// unchanged.
    pub async fn run(self, validate: impl Fn(&T) -> Result<()>) -> Result<Resolved<T>> {
        let mut skipped = Vec::new();
        for (name, start) in self.tiers {
            match start().await {
                Ok(value) => match validate(&value) {
                    Ok(()) => {
                        if skipped.is_empty() {
                            info!(stage = self.stage, tier = name, "Tier succeeded");
                        } else {
                            warn!(
                                stage = self.stage,
                                tier = name,
                                skipped = skipped.len(),
                                "Fell back to lower tier"
                            );
                        }
                        return Ok(Resolved {
                            value,
                            tier: name,
                            skipped,
                        });
                    }
                    Err(e) if !e.advances_tier() => return Err(e),
                    Err(e) => {
                        warn!(stage = self.stage, tier = name, error = %e, "Tier output rejected");
                        skipped.push(format!("{name}: {e}"));
                    }
                },
                Err(e) if !e.advances_tier() => {
                    warn!(stage = self.stage, tier = name, error = %e, "Tier aborted the chain");
                    return Err(e);
                }
                Err(e) if e.is_unavailable() => {
                    info!(stage = self.stage, tier = name, error = %e, "Tier unavailable");
                    skipped.push(format!("{name}: {e}"));
                }
                Err(e) => {
                    warn!(stage = self.stage, tier = name, error = %e, "Tier failed");
                    skipped.push(format!("{name}: {e}"));
                }
            }
        }
        Err(StemmixError::FallbackExhausted {
            stage: self.stage,
            attempts: skipped,
        })
    }
}

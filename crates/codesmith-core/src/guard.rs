//! Guarded model calls: mandatory timeout, cancellation, per-provider circuit breaker.
//!
//! Every model invocation in the engine goes through [`ModelGateway::call`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::capabilities::{CallOptions, ModelCaller, ModelError, ProviderId};
use crate::config::BreakerConfig;
use crate::error::{OrchestratorError, Result};

/// Circuit breaker that opens after N consecutive failures.
///
/// Resets on success. Once open it rejects calls until `cooldown` has
/// elapsed since the last failure, then lets one trial call through.
#[derive(Debug)]
pub struct CircuitBreaker {
    consecutive_failures: AtomicU32,
    threshold: u32,
    cooldown: Duration,
    last_failure: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            threshold: threshold.max(1),
            cooldown,
            last_failure: Mutex::new(None),
        }
    }

    /// Returns `true` if calls should currently be skipped.
    pub fn is_open(&self) -> bool {
        if self.consecutive_failures.load(Ordering::Relaxed) < self.threshold {
            return false;
        }
        match *self.last_failure.lock().unwrap_or_else(|e| e.into_inner()) {
            Some(at) => at.elapsed() < self.cooldown,
            None => false,
        }
    }

    /// Record a failure. Returns current consecutive failure count.
    pub fn record_failure(&self) -> u32 {
        *self.last_failure.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }
}

/// A [`ModelCaller`] wrapped with timeout, cancellation and breaker controls.
pub struct ModelGateway {
    caller: Arc<dyn ModelCaller>,
    config: BreakerConfig,
    breakers: Mutex<HashMap<ProviderId, Arc<CircuitBreaker>>>,
}

impl ModelGateway {
    pub fn new(caller: Arc<dyn ModelCaller>, config: BreakerConfig) -> Self {
        Self {
            caller,
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Breaker for `provider`, created on first use.
    pub fn breaker(&self, provider: &ProviderId) -> Arc<CircuitBreaker> {
        let mut map = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(provider.clone())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    self.config.failure_threshold,
                    Duration::from_secs(self.config.cooldown_secs),
                ))
            })
            .clone()
    }

    /// Call `provider` with a hard timeout, giving up early on cancellation.
    ///
    /// Timeouts and provider errors count against the provider's breaker;
    /// cancellation does not.
    pub async fn call(
        &self,
        provider: &ProviderId,
        prompt: &str,
        options: CallOptions,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        let breaker = self.breaker(provider);
        if breaker.is_open() {
            debug!(provider = %provider, "circuit open, skipping call");
            return Err(OrchestratorError::CircuitOpen {
                provider: provider.clone(),
                consecutive_failures: breaker.failure_count(),
            });
        }

        let call = tokio::time::timeout(
            options.timeout(),
            self.caller.call(provider, prompt, options),
        );
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
            outcome = call => outcome,
        };

        match outcome {
            Ok(Ok(text)) => {
                breaker.record_success();
                Ok(text)
            }
            Ok(Err(ModelError::Provider(message))) => {
                let failures = breaker.record_failure();
                warn!(provider = %provider, failures, error = %message, "model call failed");
                Err(OrchestratorError::Provider {
                    provider: provider.clone(),
                    message,
                })
            }
            Ok(Err(ModelError::Timeout)) | Err(_) => {
                let failures = breaker.record_failure();
                warn!(provider = %provider, failures, timeout_ms = options.timeout_ms, "model call timed out");
                Err(OrchestratorError::ModelTimeout {
                    provider: provider.clone(),
                    timeout_ms: options.timeout_ms,
                })
            }
        }
    }
}

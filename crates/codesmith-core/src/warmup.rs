//! Keep-warm task: periodic tiny prompts so cold providers don't stall routing.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::capabilities::CallOptions;
use crate::config::KeepWarmConfig;
use crate::guard::ModelGateway;

const PING_PROMPT: &str = "Reply with the single word: ok";
const PING_TIMEOUT_MS: u64 = 5_000;

/// Owned handle to the background pinger. Stopped on [`KeepWarm::stop`] or drop.
#[derive(Debug)]
pub struct KeepWarm {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl KeepWarm {
    /// Spawn the pinger. Must be called inside a tokio runtime.
    pub fn start(gateway: Arc<ModelGateway>, config: &KeepWarmConfig) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let providers = config.providers.clone();
        let period = Duration::from_secs(config.interval_secs.max(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(providers = providers.len(), period_secs = period.as_secs(), "keep-warm started");
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                for provider in &providers {
                    let options = CallOptions::text(4, PING_TIMEOUT_MS);
                    match gateway.call(provider, PING_PROMPT, options, &token).await {
                        Ok(_) => debug!(provider = %provider, "keep-warm ping ok"),
                        Err(e) if e.is_cancelled() => break,
                        Err(e) => debug!(provider = %provider, error = %e, "keep-warm ping failed"),
                    }
                }
            }
            debug!("keep-warm stopped");
        });

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancel the pinger and wait for it to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for KeepWarm {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::ProviderId;
    use crate::config::BreakerConfig;
    use crate::fakes::ScriptedModelCaller;

    #[tokio::test(start_paused = true)]
    async fn test_pings_each_interval_until_stopped() {
        let caller = Arc::new(ScriptedModelCaller::new());
        caller.set_fallback("ok");
        let gateway = Arc::new(ModelGateway::new(caller.clone(), BreakerConfig::default()));
        let config = KeepWarmConfig {
            enabled: true,
            interval_secs: 10,
            providers: vec![ProviderId::new("fast")],
        };

        let warm = KeepWarm::start(gateway, &config);
        // First tick fires immediately, then every 10s.
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert!(warm.is_running());
        warm.stop().await;

        let pings = caller.call_count();
        assert_eq!(pings, 3);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(caller.call_count(), pings);
    }
}

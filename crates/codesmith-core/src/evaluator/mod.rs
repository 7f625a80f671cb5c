//! Adversarial evaluation: critic and defender review independently and
//! concurrently; the controller reconciles them.
//!
//! # Modules
//!
//! - [`review`]     — reviewer output parsing and the sentiment heuristic
//! - [`controller`] — scoring, banding, merged-code validation

pub mod controller;
pub mod review;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::agents::Agents;
use crate::capabilities::{CallOptions, ProviderId};
use crate::domain::bundle::CodeBundle;
use crate::domain::review::{EvaluationResult, Review, ReviewerId};
use crate::error::{OrchestratorError, Result};
use crate::prompts;

pub use controller::{band, confidence, final_score};
pub use review::{heuristic_review, parse_review};

const REVIEW_MAX_TOKENS: u32 = 2_048;

impl Agents {
    /// Evaluate `code` against `request`. Fails only on cancellation.
    #[instrument(skip_all, fields(files = code.files.len()))]
    pub async fn evaluate(
        &self,
        code: &CodeBundle,
        request: &str,
        context: &str,
        cancel: &CancellationToken,
    ) -> Result<EvaluationResult> {
        let (critic, defender) = tokio::join!(
            self.review(ReviewerId::Critic, code, request, context, cancel),
            self.review(ReviewerId::Defender, code, request, context, cancel),
        );
        let critic = critic?;
        let defender = defender?;
        let controller = self.control(request, code, &critic, &defender, cancel).await?;
        Ok(EvaluationResult {
            critic,
            defender,
            controller,
        })
    }

    async fn review(
        &self,
        reviewer: ReviewerId,
        code: &CodeBundle,
        request: &str,
        context: &str,
        cancel: &CancellationToken,
    ) -> Result<Review> {
        let cfg = &self.config;
        let provider: &ProviderId = match reviewer {
            ReviewerId::Critic => &cfg.providers.critic,
            ReviewerId::Defender => &cfg.providers.defender,
        };
        let raw = match self
            .gateway
            .call(
                provider,
                &prompts::review(reviewer, request, code, context),
                CallOptions::json(REVIEW_MAX_TOKENS, cfg.timeouts.review_ms),
                cancel,
            )
            .await
        {
            Ok(raw) => raw,
            Err(OrchestratorError::Cancelled) => return Err(OrchestratorError::Cancelled),
            Err(e) => {
                debug!(%reviewer, error = %e, "review call failed; scoring heuristically");
                String::new()
            }
        };
        Ok(parse_review(reviewer, &raw, &cfg.evaluator, cfg.bundle)
            .unwrap_or_else(|| heuristic_review(reviewer, &raw, &cfg.evaluator)))
    }
}

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::api::{
    ApiError, EnhanceRequest, EnhanceResponse, EnhancementApi, FeedbackSubmission, PromptExchange,
};
use crate::button::{ButtonDriver, ButtonEvent};
use crate::cues::{CueController, CueKind};
use crate::metrics::RuntimeMetrics;
use crate::session::SessionContext;
use crate::storage::ProfileStore;
use crate::utils::now_epoch_ms;

#[derive(Debug, Error)]
pub enum EnhanceError {
    #[error("an enhancement is already in flight")]
    InFlight,
    #[error("nothing to enhance: the input surface is empty")]
    EmptyInput,
    #[error("anonymous usage cap reached; sign in to continue")]
    NotEligible,
    #[error("enhancement dispatch failed: {0}")]
    Dispatch(#[from] ApiError),
}

#[derive(Debug, Clone)]
pub struct EnhanceOutcome {
    pub enhanced_prompt: String,
    pub suggested_llm: Option<String>,
    pub processing_time_ms: Option<u64>,
}

/// Re-enables the trigger on every exit path, including early returns.
struct TriggerGuard<'a>(&'a AtomicBool);

impl Drop for TriggerGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Runs the end-to-end enhance action: eligibility gate, dispatch, result
/// application into the button machine and the surface, and asynchronous
/// persistence.
pub struct EnhanceOrchestrator {
    api: Arc<dyn EnhancementApi>,
    profile: ProfileStore,
    button: Arc<ButtonDriver>,
    cues: Arc<CueController>,
    session: Arc<SessionContext>,
    metrics: Arc<Mutex<RuntimeMetrics>>,
    anonymous_cap: u32,
    in_flight: AtomicBool,
}

impl EnhanceOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        api: Arc<dyn EnhancementApi>,
        profile: ProfileStore,
        button: Arc<ButtonDriver>,
        cues: Arc<CueController>,
        session: Arc<SessionContext>,
        metrics: Arc<Mutex<RuntimeMetrics>>,
        anonymous_cap: u32,
    ) -> Arc<Self> {
        Arc::new(Self {
            api,
            profile,
            button,
            cues,
            session,
            metrics,
            anonymous_cap,
            in_flight: AtomicBool::new(false),
        })
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub async fn enhance(&self) -> Result<EnhanceOutcome, EnhanceError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(EnhanceError::InFlight);
        }
        let _guard = TriggerGuard(&self.in_flight);

        let auth_token = self.profile.auth_token();
        if auth_token.is_none() {
            let uses = self.profile.anonymous_uses();
            if uses >= self.anonymous_cap {
                // blocked before any network call; the credits affordance
                // gets its own cue, not a generic error
                info!(uses, cap = self.anonymous_cap, "anonymous enhancement blocked");
                self.cues.show(CueKind::Credits).await;
                return Err(EnhanceError::NotEligible);
            }
        }

        let prompt = self.session.surface.read_text().trim().to_string();
        if prompt.is_empty() {
            // the button machine redirects this entry attempt to idle
            self.button.handle(ButtonEvent::EnhanceDispatched).await;
            return Err(EnhanceError::EmptyInput);
        }

        if auth_token.is_none() {
            let uses = self.profile.record_anonymous_use();
            info!(uses, "anonymous enhancement use recorded");
        }

        self.button.handle(ButtonEvent::EnhanceDispatched).await;

        let intent = self.session.last_intent.lock().await.clone();
        let request = EnhanceRequest {
            prompt: prompt.clone(),
            style: self.profile.selected_style(),
            platform: self
                .profile
                .selected_platform()
                .unwrap_or_else(|| self.session.platform.clone()),
            user_id: self.profile.user_id(),
            intent: intent.as_ref().map(|intent| intent.category.clone()),
            intent_description: intent.as_ref().map(|intent| intent.description.clone()),
        };

        let started = Instant::now();
        let result = self.api.enhance(&request).await;
        self.metrics
            .lock()
            .await
            .record_enhance(started.elapsed().as_millis() as u64);

        match result {
            Ok(response) => {
                self.apply_result(&prompt, &request, &response).await;
                Ok(EnhanceOutcome {
                    enhanced_prompt: response.enhanced_prompt,
                    suggested_llm: response.suggested_llm,
                    processing_time_ms: response.processing_time_ms,
                })
            }
            Err(err) => {
                warn!("enhancement dispatch failed: {err}");
                self.cues.show(CueKind::Input).await;
                self.button.handle(ButtonEvent::EnhanceFailed).await;
                Err(EnhanceError::Dispatch(err))
            }
        }
    }

    async fn apply_result(&self, prompt: &str, request: &EnhanceRequest, response: &EnhanceResponse) {
        // the one place any component writes to the surface
        self.session.surface.replace_text(&response.enhanced_prompt);
        self.button.handle(ButtonEvent::EnhanceReady).await;

        // persistence runs off the hot path; failures are logged only
        let api = Arc::clone(&self.api);
        let exchange = PromptExchange {
            prompt: prompt.to_string(),
            enhanced_prompt: response.enhanced_prompt.clone(),
            style: request.style.clone(),
            platform: request.platform.clone(),
            user_id: request.user_id.clone(),
            client_timestamp: now_epoch_ms(),
        };
        tokio::spawn(async move {
            if let Err(err) = api.persist_exchange(&exchange).await {
                warn!("failed to persist prompt exchange: {err}");
            }
        });
    }

    /// Forwards like/dislike feedback for a stored review.
    pub fn submit_feedback(&self, prompt_review_id: impl Into<String>, liked: bool) {
        let api = Arc::clone(&self.api);
        let submission = FeedbackSubmission {
            prompt_review_id: prompt_review_id.into(),
            feedback: liked,
        };
        tokio::spawn(async move {
            if let Err(err) = api.submit_feedback(&submission).await {
                warn!("failed to submit review feedback: {err}");
            }
        });
    }

    /// The host reports the review surface dismissed.
    pub async fn review_closed(&self) {
        self.button.handle(ButtonEvent::ReviewClosed).await;
    }
}

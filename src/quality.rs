use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use tracing::debug;

use crate::metrics::RuntimeMetrics;
use crate::network::AnalysisEvent;
use crate::session::SessionContext;

pub const SCORE_OK_THRESHOLD: f32 = 0.4;
pub const SCORE_GOOD_THRESHOLD: f32 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    Idle,
    Bad,
    Ok,
    Good,
}

/// The rendered indicator. "Analyzing" is a flag on idle, not a separate
/// visual state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityIndicatorState {
    pub level: QualityLevel,
    pub is_analyzing: bool,
}

impl QualityIndicatorState {
    pub fn idle() -> Self {
        Self {
            level: QualityLevel::Idle,
            is_analyzing: false,
        }
    }

    pub fn analyzing() -> Self {
        Self {
            level: QualityLevel::Idle,
            is_analyzing: true,
        }
    }
}

/// Rendering seam supplied by the host: exactly one indicator, plus an
/// optional richer feedback panel that is refreshed only while open.
pub trait QualityView: Send + Sync {
    fn render_indicator(&self, state: QualityIndicatorState);
    fn panel_open(&self) -> bool {
        false
    }
    fn refresh_panel(&self, _state: QualityIndicatorState) {}
}

pub fn level_for_score(score: f32) -> QualityLevel {
    if score < SCORE_OK_THRESHOLD {
        QualityLevel::Bad
    } else if score < SCORE_GOOD_THRESHOLD {
        QualityLevel::Ok
    } else {
        QualityLevel::Good
    }
}

/// Renders analysis results while tolerating out-of-order responses.
/// Empty content always wins over anything in flight.
pub struct QualityStateMachine {
    session: Arc<SessionContext>,
    view: Arc<dyn QualityView>,
    presence: watch::Receiver<bool>,
    state: Mutex<QualityIndicatorState>,
    dispatched_at: Mutex<Option<Instant>>,
    metrics: Arc<Mutex<RuntimeMetrics>>,
}

impl QualityStateMachine {
    pub fn new(
        session: Arc<SessionContext>,
        view: Arc<dyn QualityView>,
        presence: watch::Receiver<bool>,
        metrics: Arc<Mutex<RuntimeMetrics>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            session,
            view,
            presence,
            state: Mutex::new(QualityIndicatorState::idle()),
            dispatched_at: Mutex::new(None),
            metrics,
        })
    }

    pub async fn current(&self) -> QualityIndicatorState {
        *self.state.lock().await
    }

    pub async fn on_content_emptied(&self) {
        *self.dispatched_at.lock().await = None;
        self.apply(QualityIndicatorState::idle()).await;
    }

    /// A request for the current text just went out; keep the last level
    /// visible but mark it as being re-evaluated.
    pub async fn on_request_dispatched(&self) {
        *self.dispatched_at.lock().await = Some(Instant::now());
        let next = {
            let state = self.state.lock().await;
            QualityIndicatorState {
                level: state.level,
                is_analyzing: true,
            }
        };
        self.apply(next).await;
    }

    pub async fn on_analysis_event(&self, event: AnalysisEvent) {
        if !*self.presence.borrow() {
            self.apply(QualityIndicatorState::idle()).await;
            return;
        }

        // a result keyed to superseded text is discarded without effect
        if let Some(prompt) = event.prompt.as_deref() {
            let current = self.session.last_analyzed().await;
            if prompt.trim() != current {
                debug!("discarded stale analysis result");
                self.metrics.lock().await.record_stale_result();
                return;
            }
        }

        if let Some(intent) = event.main_intent.clone() {
            *self.session.last_intent.lock().await = Some(intent);
        }

        let next = match event.quality_metrics.as_ref() {
            Some(metrics) => QualityIndicatorState {
                level: level_for_score(metrics.mean_score()),
                is_analyzing: false,
            },
            // no metrics on non-empty input means the service is still
            // thinking, not that something failed
            None => QualityIndicatorState::analyzing(),
        };

        if event.quality_metrics.is_some() {
            if let Some(started) = self.dispatched_at.lock().await.take() {
                self.metrics
                    .lock()
                    .await
                    .record_analysis_roundtrip(started.elapsed().as_millis() as u64);
            }
        }

        self.apply(next).await;
    }

    async fn apply(&self, next: QualityIndicatorState) {
        {
            let mut state = self.state.lock().await;
            if *state == next {
                return;
            }
            *state = next;
        }
        self.view.render_indicator(next);
        if self.view.panel_open() {
            self.view.refresh_panel(next);
        }
    }
}

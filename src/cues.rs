use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

/// The two user-visible failure cues. They never stack: showing one
/// replaces whatever is currently visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CueKind {
    /// Transient dispatch-failure cue anchored to the text input.
    Input,
    /// Eligibility cue anchored to the login/credits affordance.
    Credits,
}

/// Drives the self-clearing visual cues. The host renders whatever the
/// watch channel currently holds.
pub struct CueController {
    clear_after: Duration,
    active_timer: Mutex<Option<JoinHandle<()>>>,
    cue: watch::Sender<Option<CueKind>>,
}

impl CueController {
    pub fn new(clear_after: Duration) -> Arc<Self> {
        let (cue, _) = watch::channel(None);
        Arc::new(Self {
            clear_after,
            active_timer: Mutex::new(None),
            cue,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<CueKind>> {
        self.cue.subscribe()
    }

    pub fn active(&self) -> Option<CueKind> {
        *self.cue.subscribe().borrow()
    }

    /// Shows a cue, replacing any visible one and restarting the clear
    /// timer.
    pub async fn show(self: &Arc<Self>, kind: CueKind) {
        let mut active_timer = self.active_timer.lock().await;
        if let Some(timer) = active_timer.take() {
            timer.abort();
        }
        self.cue.send_replace(Some(kind));
        debug!(?kind, "cue shown");

        let controller = Arc::downgrade(self);
        let clear_after = self.clear_after;
        *active_timer = Some(tokio::spawn(async move {
            sleep(clear_after).await;
            if let Some(controller) = controller.upgrade() {
                controller.clear().await;
            }
        }));
    }

    pub async fn clear(&self) {
        let mut active_timer = self.active_timer.lock().await;
        if let Some(timer) = active_timer.take() {
            timer.abort();
        }
        self.cue.send_replace(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn cues_clear_themselves_after_the_delay() {
        let cues = CueController::new(Duration::from_secs(3));

        cues.show(CueKind::Input).await;
        assert_eq!(cues.active(), Some(CueKind::Input));

        tokio::time::sleep(Duration::from_millis(3_100)).await;
        assert_eq!(cues.active(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn a_new_cue_replaces_the_old_one_and_restarts_the_timer() {
        let cues = CueController::new(Duration::from_secs(3));

        cues.show(CueKind::Input).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        cues.show(CueKind::Credits).await;
        assert_eq!(cues.active(), Some(CueKind::Credits));

        // the original timer would have fired here; the restart kept it up
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(cues.active(), Some(CueKind::Credits));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(cues.active(), None);
    }
}

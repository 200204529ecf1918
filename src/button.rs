use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ButtonState {
    Idle,
    Typing,
    TypingStopped,
    Loading,
    SuccessWithReview,
    SuccessIdle,
}

impl ButtonState {
    pub fn is_success(self) -> bool {
        matches!(self, Self::SuccessWithReview | Self::SuccessIdle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    /// A raw edit landed while content is present.
    EditObserved,
    /// Editing paused for the quiet window with content still present.
    QuietElapsed,
    ContentEmptied,
    EnhanceDispatched,
    EnhanceReady,
    EnhanceFailed,
    /// The host dismissed the review surface.
    ReviewClosed,
    /// Recurring empty-check while in a success state.
    EmptyCheckTick,
    /// Recurring re-affirmation tick while in successIdle.
    ReaffirmTick,
}

/// Pure transition core. Rendering and timers live in `ButtonDriver`.
#[derive(Debug)]
pub struct ButtonStateMachine {
    state: ButtonState,
}

impl ButtonStateMachine {
    pub fn new() -> Self {
        Self {
            state: ButtonState::Idle,
        }
    }

    pub fn state(&self) -> ButtonState {
        self.state
    }

    pub fn is_success_state(&self) -> bool {
        self.state.is_success()
    }

    /// Applies one event and returns `Some((from, to))` when the state
    /// changes. Any entry attempt while content is empty lands on Idle.
    pub fn apply(
        &mut self,
        event: ButtonEvent,
        has_content: bool,
    ) -> Option<(ButtonState, ButtonState)> {
        use ButtonState::*;

        let current = self.state;
        let target = match (current, event) {
            (Idle, ButtonEvent::EditObserved) if has_content => Some(Typing),
            (TypingStopped, ButtonEvent::EditObserved) if has_content => Some(Typing),
            (Typing, ButtonEvent::QuietElapsed) => Some(TypingStopped),
            (_, ButtonEvent::EnhanceDispatched) if current != Loading => Some(Loading),
            (Loading, ButtonEvent::EnhanceReady) => Some(SuccessWithReview),
            (Loading, ButtonEvent::EnhanceFailed) => {
                Some(if has_content { TypingStopped } else { Idle })
            }
            (SuccessWithReview, ButtonEvent::ReviewClosed) => Some(SuccessIdle),
            (SuccessWithReview | SuccessIdle, ButtonEvent::EmptyCheckTick) if !has_content => {
                Some(Idle)
            }
            (_, ButtonEvent::ContentEmptied) if current != Idle => Some(Idle),
            _ => None,
        }?;

        let target = if !has_content && target != Idle {
            Idle
        } else {
            target
        };
        if target == current {
            return None;
        }
        self.state = target;
        Some((current, target))
    }
}

impl Default for ButtonStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Rendering seam for the floating control.
pub trait ButtonView: Send + Sync {
    fn enter(&self, state: ButtonState);
    fn exit(&self, state: ButtonState);
    /// Called once per Loading → SuccessWithReview transition, before the
    /// success state is entered.
    fn open_review(&self) {}
}

#[derive(Debug, Clone)]
pub struct ButtonTimerConfig {
    pub success_check_interval: Duration,
    pub reaffirm_interval: Duration,
}

struct DriverState {
    machine: ButtonStateMachine,
    timers: Vec<JoinHandle<()>>,
}

/// Async wrapper around the pure core. The driver — never per-state code —
/// owns every timer handle started for a state and aborts them all before
/// the next state's `enter` runs, so a tick can never fire into a state it
/// no longer belongs to. `exit(old)` always completes before `enter(new)`
/// and exactly one state is entered at a time.
pub struct ButtonDriver {
    view: Arc<dyn ButtonView>,
    presence: watch::Receiver<bool>,
    config: ButtonTimerConfig,
    inner: Mutex<DriverState>,
}

impl ButtonDriver {
    pub fn new(
        view: Arc<dyn ButtonView>,
        presence: watch::Receiver<bool>,
        config: ButtonTimerConfig,
    ) -> Arc<Self> {
        view.enter(ButtonState::Idle);
        Arc::new(Self {
            view,
            presence,
            config,
            inner: Mutex::new(DriverState {
                machine: ButtonStateMachine::new(),
                timers: Vec::new(),
            }),
        })
    }

    pub async fn state(&self) -> ButtonState {
        self.inner.lock().await.machine.state()
    }

    pub async fn is_success_state(&self) -> bool {
        self.inner.lock().await.machine.is_success_state()
    }

    pub async fn handle(self: &Arc<Self>, event: ButtonEvent) {
        let has_content = *self.presence.borrow();
        let mut inner = self.inner.lock().await;

        if event == ButtonEvent::ReaffirmTick {
            if inner.machine.state() == ButtonState::SuccessIdle {
                // re-invoke enter-time behavior without leaving the state
                self.view.enter(ButtonState::SuccessIdle);
            }
            return;
        }

        let Some((from, to)) = inner.machine.apply(event, has_content) else {
            return;
        };

        for timer in inner.timers.drain(..) {
            timer.abort();
        }
        self.view.exit(from);
        if to == ButtonState::SuccessWithReview {
            self.view.open_review();
        }
        self.view.enter(to);
        self.spawn_state_timers(&mut inner, to);
        debug!(?from, ?to, "button state changed");
    }

    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        for timer in inner.timers.drain(..) {
            timer.abort();
        }
    }

    fn spawn_state_timers(self: &Arc<Self>, inner: &mut DriverState, state: ButtonState) {
        if state.is_success() {
            inner.timers.push(self.spawn_repeating(
                self.config.success_check_interval,
                ButtonEvent::EmptyCheckTick,
            ));
        }
        if state == ButtonState::SuccessIdle {
            inner
                .timers
                .push(self.spawn_repeating(self.config.reaffirm_interval, ButtonEvent::ReaffirmTick));
        }
    }

    fn spawn_repeating(self: &Arc<Self>, every: Duration, event: ButtonEvent) -> JoinHandle<()> {
        let driver = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                sleep(every).await;
                let Some(driver) = driver.upgrade() else {
                    return;
                };
                driver.handle(event).await;
            }
        })
    }
}

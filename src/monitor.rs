use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::debug;

use crate::session::SessionContext;
use crate::surface::EditableSurface;
use crate::utils::now_epoch_ms;

/// One analysis-worthy submission, keyed to the exact text it was
/// computed against.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub text: String,
    pub client_timestamp: u64,
    pub platform: String,
}

/// Something on the surface may have changed. Strategies only report the
/// fact; the monitor re-reads the surface itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeNotice {
    /// A native edit event (input, paste, cut, delete-style key-up) or a
    /// structural mutation reported by the host.
    Edit,
    /// The periodic poll observed text drift.
    Drift,
}

/// A pluggable change-detection strategy. All strategies feed one merged
/// channel; the monitor composes them once.
pub trait ChangeSource: Send + 'static {
    fn spawn(self: Box<Self>, notices: mpsc::Sender<ChangeNotice>) -> JoinHandle<()>;
}

/// Forwards change notifications pushed by the host (native listeners and
/// the structural-mutation watch both enter through this channel).
pub struct HostEventSource {
    pub receiver: mpsc::Receiver<ChangeNotice>,
}

impl ChangeSource for HostEventSource {
    fn spawn(mut self: Box<Self>, notices: mpsc::Sender<ChangeNotice>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(notice) = self.receiver.recv().await {
                if notices.send(notice).await.is_err() {
                    break;
                }
            }
        })
    }
}

/// Low-frequency fallback poll for hosts whose edit events are unreliable.
pub struct PollSource {
    pub surface: Arc<dyn EditableSurface>,
    pub session: Arc<SessionContext>,
    pub interval: Duration,
}

impl ChangeSource for PollSource {
    fn spawn(self: Box<Self>, notices: mpsc::Sender<ChangeNotice>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                sleep(self.interval).await;
                let text = self.surface.read_text();
                let drifted = {
                    let mut last = self.session.last_observed_text.lock().await;
                    if *last == text {
                        false
                    } else {
                        *last = text;
                        true
                    }
                };
                if drifted && notices.send(ChangeNotice::Drift).await.is_err() {
                    break;
                }
            }
        })
    }
}

#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// A raw edit landed while content is non-empty; fires before the
    /// debounce settles.
    Editing,
    /// Content became empty or whitespace. Bypasses the debounce.
    Emptied,
    /// The debounce window elapsed with content still present.
    Quiescent,
    /// The settled text differs from the last analyzed text.
    Settled(AnalysisRequest),
}

/// Debounces the merged change stream into at most one analysis-worthy
/// signal per quiescent period. Owns no network or rendering state.
pub struct InputMonitor {
    events: broadcast::Sender<MonitorEvent>,
    presence: watch::Receiver<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl InputMonitor {
    pub fn spawn(
        session: Arc<SessionContext>,
        sources: Vec<Box<dyn ChangeSource>>,
        debounce: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        let (presence_tx, presence_rx) = watch::channel(false);
        let (notice_tx, notice_rx) = mpsc::channel(64);

        let mut tasks: Vec<JoinHandle<()>> = sources
            .into_iter()
            .map(|source| source.spawn(notice_tx.clone()))
            .collect();
        drop(notice_tx);
        tasks.push(tokio::spawn(debounce_loop(
            session,
            notice_rx,
            events.clone(),
            presence_tx,
            debounce,
        )));

        Self {
            events,
            presence: presence_rx,
            tasks,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    /// The shared read-only content-presence signal.
    pub fn presence(&self) -> watch::Receiver<bool> {
        self.presence.clone()
    }

    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

async fn debounce_loop(
    session: Arc<SessionContext>,
    mut notices: mpsc::Receiver<ChangeNotice>,
    events: broadcast::Sender<MonitorEvent>,
    presence: watch::Sender<bool>,
    debounce: Duration,
) {
    let mut deadline: Option<Instant> = None;
    loop {
        tokio::select! {
            notice = notices.recv() => {
                if notice.is_none() {
                    break;
                }
                let text = session.surface.read_text();
                {
                    let mut last = session.last_observed_text.lock().await;
                    *last = text.clone();
                }
                if text.trim().is_empty() {
                    // empty bypasses the debounce and cancels the pending cycle
                    deadline = None;
                    handle_emptied(&session, &events, &presence).await;
                } else {
                    presence.send_replace(true);
                    let _ = events.send(MonitorEvent::Editing);
                    deadline = Some(Instant::now() + debounce);
                }
            }
            _ = wait_for(deadline) => {
                deadline = None;
                let text = session.surface.read_text();
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    handle_emptied(&session, &events, &presence).await;
                    continue;
                }
                let _ = events.send(MonitorEvent::Quiescent);
                let changed = {
                    let mut analyzed = session.last_analyzed_text.lock().await;
                    if *analyzed == trimmed {
                        false
                    } else {
                        *analyzed = trimmed.to_string();
                        true
                    }
                };
                if changed {
                    debug!(chars = trimmed.chars().count(), "settled text queued for analysis");
                    let _ = events.send(MonitorEvent::Settled(AnalysisRequest {
                        text: trimmed.to_string(),
                        client_timestamp: now_epoch_ms(),
                        platform: session.platform.clone(),
                    }));
                }
            }
        }
    }
}

async fn handle_emptied(
    session: &Arc<SessionContext>,
    events: &broadcast::Sender<MonitorEvent>,
    presence: &watch::Sender<bool>,
) {
    {
        let mut analyzed = session.last_analyzed_text.lock().await;
        analyzed.clear();
    }
    let had_content = presence.send_replace(false);
    if had_content {
        let _ = events.send(MonitorEvent::Emptied);
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

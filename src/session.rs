use std::sync::Arc;

use anyhow::Context as _;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::EnhancementApi;
use crate::button::{ButtonDriver, ButtonEvent, ButtonTimerConfig, ButtonView};
use crate::config::FeedbackConfig;
use crate::cues::CueController;
use crate::metrics::{FeedbackReport, RuntimeMetrics};
use crate::monitor::{ChangeNotice, ChangeSource, HostEventSource, InputMonitor, MonitorEvent, PollSource};
use crate::network::{
    ConnectionManager, IntentClassification, OutboundFrame, StreamConfig, StreamEvent,
    StreamTransport,
};
use crate::orchestrator::EnhanceOrchestrator;
use crate::quality::{QualityStateMachine, QualityView};
use crate::storage::{ProfileStore, StateStore};
use crate::surface::{EditableSurface, SurfaceLocator, locate_surface};

/// Per-session shared state. One instance exists per active session,
/// created by the composition root and passed by reference to each
/// component — there is no module-scoped singleton.
pub struct SessionContext {
    pub platform: String,
    pub surface: Arc<dyn EditableSurface>,
    pub last_observed_text: Mutex<String>,
    pub last_analyzed_text: Mutex<String>,
    pub last_intent: Mutex<Option<IntentClassification>>,
}

impl SessionContext {
    pub fn new(platform: impl Into<String>, surface: Arc<dyn EditableSurface>) -> Arc<Self> {
        Arc::new(Self {
            platform: platform.into(),
            surface,
            last_observed_text: Mutex::new(String::new()),
            last_analyzed_text: Mutex::new(String::new()),
            last_intent: Mutex::new(None),
        })
    }

    pub async fn last_analyzed(&self) -> String {
        self.last_analyzed_text.lock().await.clone()
    }
}

/// Everything the host supplies: where the text lives, how results are
/// rendered, and the external collaborators.
pub struct HostBindings {
    pub locator: Arc<dyn SurfaceLocator>,
    /// Native edit events and structural mutations, pushed by the host.
    pub edit_events: mpsc::Receiver<ChangeNotice>,
    pub quality_view: Arc<dyn QualityView>,
    pub button_view: Arc<dyn ButtonView>,
    pub api: Arc<dyn EnhancementApi>,
    pub store: Arc<dyn StateStore>,
    pub transport: Arc<dyn StreamTransport>,
}

/// The composition root: locates the surface, wires every component and
/// runs the dispatcher loop until `shutdown`.
pub struct FeedbackRuntime {
    pub session: Arc<SessionContext>,
    pub connection: Arc<ConnectionManager>,
    pub quality: Arc<QualityStateMachine>,
    pub button: Arc<ButtonDriver>,
    pub orchestrator: Arc<EnhanceOrchestrator>,
    pub cues: Arc<CueController>,
    metrics: Arc<Mutex<RuntimeMetrics>>,
    monitor: InputMonitor,
    dispatcher: JoinHandle<()>,
}

impl FeedbackRuntime {
    pub async fn start(config: FeedbackConfig, bindings: HostBindings) -> anyhow::Result<Self> {
        let surface = locate_surface(
            bindings.locator.as_ref(),
            config.locate_attempts,
            config.locate_delay(),
        )
        .await
        .context("editable surface was never located")?;

        let session = SessionContext::new(config.platform.clone(), surface.clone());
        let metrics = Arc::new(Mutex::new(RuntimeMetrics::new()));
        let connection = ConnectionManager::new(
            StreamConfig::from(&config),
            bindings.transport,
            Arc::clone(&metrics),
        );

        let sources: Vec<Box<dyn ChangeSource>> = vec![
            Box::new(HostEventSource {
                receiver: bindings.edit_events,
            }),
            Box::new(PollSource {
                surface: surface.clone(),
                session: session.clone(),
                interval: config.poll_interval(),
            }),
        ];
        let monitor = InputMonitor::spawn(session.clone(), sources, config.debounce());

        let quality = QualityStateMachine::new(
            session.clone(),
            bindings.quality_view,
            monitor.presence(),
            Arc::clone(&metrics),
        );
        let button = ButtonDriver::new(
            bindings.button_view,
            monitor.presence(),
            ButtonTimerConfig {
                success_check_interval: config.success_check_interval(),
                reaffirm_interval: config.reaffirm_interval(),
            },
        );
        let cues = CueController::new(config.cue_clear());
        let orchestrator = EnhanceOrchestrator::new(
            bindings.api,
            ProfileStore::new(bindings.store),
            button.clone(),
            cues.clone(),
            session.clone(),
            Arc::clone(&metrics),
            config.anonymous_cap,
        );

        let dispatcher = spawn_dispatcher(
            monitor.subscribe(),
            connection.subscribe(),
            quality.clone(),
            button.clone(),
            connection.clone(),
            Arc::clone(&metrics),
        );

        {
            let connection = connection.clone();
            tokio::spawn(async move { connection.connect().await });
        }

        info!(platform = session.platform.as_str(), "feedback runtime started");
        Ok(Self {
            session,
            connection,
            quality,
            button,
            orchestrator,
            cues,
            metrics,
            monitor,
            dispatcher,
        })
    }

    pub async fn report(&self) -> FeedbackReport {
        self.metrics.lock().await.report()
    }

    /// Unload: dispatcher and monitors stop, per-state timers are
    /// aborted, the socket closes and queued frames are dropped.
    pub async fn shutdown(mut self) {
        self.dispatcher.abort();
        self.monitor.shutdown();
        self.button.shutdown().await;
        self.connection.shutdown().await;
        info!("feedback runtime shut down");
    }
}

fn spawn_dispatcher(
    mut monitor_rx: broadcast::Receiver<MonitorEvent>,
    mut stream_rx: broadcast::Receiver<StreamEvent>,
    quality: Arc<QualityStateMachine>,
    button: Arc<ButtonDriver>,
    connection: Arc<ConnectionManager>,
    metrics: Arc<Mutex<RuntimeMetrics>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = monitor_rx.recv() => match event {
                    Ok(MonitorEvent::Editing) => {
                        button.handle(ButtonEvent::EditObserved).await;
                    }
                    Ok(MonitorEvent::Emptied) => {
                        quality.on_content_emptied().await;
                        button.handle(ButtonEvent::ContentEmptied).await;
                    }
                    Ok(MonitorEvent::Quiescent) => {
                        button.handle(ButtonEvent::QuietElapsed).await;
                    }
                    Ok(MonitorEvent::Settled(request)) => {
                        quality.on_request_dispatched().await;
                        metrics.lock().await.record_analysis_request();
                        connection.send(OutboundFrame::analysis(&request)).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("monitor dispatcher lagged, skipped {skipped} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                event = stream_rx.recv() => match event {
                    Ok(StreamEvent::Analysis(analysis)) => {
                        quality.on_analysis_event(analysis).await;
                    }
                    Ok(StreamEvent::Opened) => {
                        debug!("quality stream opened");
                    }
                    Ok(StreamEvent::Degraded) => {
                        warn!("quality stream degraded; live feedback paused");
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("stream dispatcher lagged, skipped {skipped} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    })
}

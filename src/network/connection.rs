use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

use super::NetworkError;
use super::protocol::{AnalysisEvent, OutboundFrame, parse_inbound};
use super::transport::{FrameReader, FrameWriter, InboundFrame, StreamPair, StreamTransport};
use crate::config::FeedbackConfig;
use crate::metrics::RuntimeMetrics;

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub url: String,
    pub open_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u8,
    pub module: String,
    pub platform: String,
}

impl From<&FeedbackConfig> for StreamConfig {
    fn from(config: &FeedbackConfig) -> Self {
        Self {
            url: config.stream_url.clone(),
            open_timeout: config.open_timeout(),
            heartbeat_interval: config.heartbeat_interval(),
            reconnect_delay: config.reconnect_delay(),
            max_reconnect_attempts: config.max_reconnect_attempts,
            module: config.module.clone(),
            platform: config.platform.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

#[derive(Debug, Clone)]
pub enum StreamEvent {
    Opened,
    Analysis(AnalysisEvent),
    /// The reconnect cap is exhausted; live analysis stays off until the
    /// host explicitly calls `connect()` again.
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkSnapshot {
    pub status: LinkStatus,
    pub reconnect_attempts: u8,
    pub degraded: bool,
    pub queued_frames: usize,
    pub last_error: Option<String>,
}

struct PendingMessage {
    payload: String,
    enqueued_at: Instant,
}

struct LinkState {
    status: LinkStatus,
    reconnect_attempts: u8,
    degraded: bool,
    last_error: Option<String>,
    queue: VecDeque<PendingMessage>,
    writer: Option<Box<dyn FrameWriter>>,
    tasks: Vec<JoinHandle<()>>,
}

/// Owns the one logical stream to the analysis service. Transient
/// failures are retried behind the scenes; callers of `send()` never see
/// a transport error and queued frames survive until they flush.
pub struct ConnectionManager {
    config: StreamConfig,
    transport: Arc<dyn StreamTransport>,
    state: Mutex<LinkState>,
    events: broadcast::Sender<StreamEvent>,
    metrics: Arc<Mutex<RuntimeMetrics>>,
    generation: AtomicU64,
}

impl ConnectionManager {
    pub fn new(
        config: StreamConfig,
        transport: Arc<dyn StreamTransport>,
        metrics: Arc<Mutex<RuntimeMetrics>>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            config,
            transport,
            state: Mutex::new(LinkState {
                status: LinkStatus::Disconnected,
                reconnect_attempts: 0,
                degraded: false,
                last_error: None,
                queue: VecDeque::new(),
                writer: None,
                tasks: Vec::new(),
            }),
            events,
            metrics,
            generation: AtomicU64::new(0),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> LinkSnapshot {
        let state = self.state.lock().await;
        LinkSnapshot {
            status: state.status,
            reconnect_attempts: state.reconnect_attempts,
            degraded: state.degraded,
            queued_frames: state.queue.len(),
            last_error: state.last_error.clone(),
        }
    }

    /// Opens the stream. A no-op while an attempt is underway, the link is
    /// already open, or the manager has been shut down. An explicit call
    /// is also the only way to clear the degraded latch — automatic
    /// reconnects never reset the attempt budget.
    pub async fn connect(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().await;
            match state.status {
                LinkStatus::Connecting | LinkStatus::Open | LinkStatus::Closing => return,
                LinkStatus::Disconnected => {}
            }
            state.degraded = false;
            state.reconnect_attempts = 0;
            state.status = LinkStatus::Connecting;
        }
        self.try_open().await;
    }

    /// Sends one frame. Transmits immediately when open; otherwise the
    /// frame joins the FIFO queue and a connection attempt starts unless
    /// one is running or the link is degraded.
    pub async fn send(self: &Arc<Self>, frame: OutboundFrame) {
        let payload = match serde_json::to_string(&frame) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("failed to serialize outbound frame: {err}");
                return;
            }
        };

        let mut send_error = None;
        {
            let mut state = self.state.lock().await;
            if state.status == LinkStatus::Open {
                if let Some(writer) = state.writer.as_mut() {
                    match writer.send_text(payload.clone()).await {
                        Ok(()) => return,
                        Err(err) => send_error = Some(err.to_string()),
                    }
                }
            }
            state.queue.push_back(PendingMessage {
                payload,
                enqueued_at: Instant::now(),
            });
        }

        match send_error {
            Some(error) => self.register_failure(error).await,
            None => self.ensure_connecting().await,
        }
    }

    /// Tears the link down for good: reader and heartbeat stop, the socket
    /// closes, and queued frames are dropped without being flushed.
    pub async fn shutdown(&self) {
        let (writer, tasks) = {
            let mut state = self.state.lock().await;
            state.status = LinkStatus::Closing;
            state.queue.clear();
            (state.writer.take(), std::mem::take(&mut state.tasks))
        };
        for task in tasks {
            task.abort();
        }
        if let Some(mut writer) = writer {
            if let Err(err) = writer.close().await {
                warn!("failed to close stream writer: {err}");
            }
        }
        info!("quality stream shut down");
    }

    async fn ensure_connecting(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        if state.degraded || state.status != LinkStatus::Disconnected {
            return;
        }
        state.status = LinkStatus::Connecting;
        state.tasks.retain(|task| !task.is_finished());
        let manager = Arc::downgrade(self);
        state.tasks.push(tokio::spawn(async move {
            if let Some(manager) = manager.upgrade() {
                manager.try_open().await;
            }
        }));
    }

    async fn try_open(self: &Arc<Self>) {
        let attempt = timeout(
            self.config.open_timeout,
            self.transport.connect(&self.config.url),
        )
        .await;
        match attempt {
            Ok(Ok(pair)) => self.handle_open(pair).await,
            Ok(Err(err)) => self.register_failure(err.to_string()).await,
            // dropping the pending connect future is the force-close
            Err(_) => {
                self.register_failure(NetworkError::OpenTimeout.to_string())
                    .await
            }
        }
    }

    async fn handle_open(self: &Arc<Self>, pair: StreamPair) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let StreamPair { mut writer, reader } = pair;

        let mut state = self.state.lock().await;
        if state.status == LinkStatus::Closing {
            drop(state);
            let _ = writer.close().await;
            return;
        }

        // queued frames flush strictly in enqueue order before any newly
        // issued send can reach the writer
        while let Some(pending) = state.queue.pop_front() {
            debug!(
                queued_ms = pending.enqueued_at.elapsed().as_millis() as u64,
                "flushing queued frame"
            );
            if let Err(err) = writer.send_text(pending.payload.clone()).await {
                state.queue.push_front(pending);
                state.status = LinkStatus::Disconnected;
                drop(state);
                let _ = writer.close().await;
                self.register_failure(err.to_string()).await;
                return;
            }
        }

        state.status = LinkStatus::Open;
        state.reconnect_attempts = 0;
        state.last_error = None;
        state.writer = Some(writer);
        state.tasks.retain(|task| !task.is_finished());
        let weak = Arc::downgrade(self);
        state
            .tasks
            .push(tokio::spawn(read_loop(weak.clone(), reader, generation)));
        state.tasks.push(tokio::spawn(heartbeat_loop(
            weak,
            generation,
            self.config.heartbeat_interval,
        )));
        drop(state);

        info!("quality stream connected");
        let _ = self.events.send(StreamEvent::Opened);
    }

    /// Every failed attempt, unclean close, or broken send lands here.
    async fn register_failure(self: &Arc<Self>, error: String) {
        let mut became_degraded = false;
        {
            let mut state = self.state.lock().await;
            if state.status == LinkStatus::Closing {
                return;
            }
            state.status = LinkStatus::Disconnected;
            state.writer = None;
            state.last_error = Some(error.clone());
            state.reconnect_attempts = state.reconnect_attempts.saturating_add(1);
            let attempts = state.reconnect_attempts;

            if attempts <= self.config.max_reconnect_attempts {
                warn!(attempts, "stream connection lost: {error}; retrying");
                state.tasks.retain(|task| !task.is_finished());
                let manager = Arc::downgrade(self);
                let delay = self.config.reconnect_delay;
                state.tasks.push(tokio::spawn(async move {
                    sleep(delay).await;
                    if let Some(manager) = manager.upgrade() {
                        manager.reconnect().await;
                    }
                }));
            } else if !state.degraded {
                state.degraded = true;
                became_degraded = true;
                warn!("stream reconnect cap exhausted; quality feedback degraded");
                let _ = self.events.send(StreamEvent::Degraded);
            }
        }

        let mut metrics = self.metrics.lock().await;
        metrics.record_stream_failure();
        if became_degraded {
            metrics.mark_stream_degraded();
        }
    }

    // Boxed to a concrete `Send` future to break the recursive-async cycle
    // (`register_failure` spawns `reconnect` -> `try_open` -> `handle_open`
    // -> `register_failure`); otherwise the spawn can't prove `Send`.
    fn reconnect(
        self: &Arc<Self>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        let manager = Arc::clone(self);
        Box::pin(async move {
            {
                let mut state = manager.state.lock().await;
                if state.degraded || state.status != LinkStatus::Disconnected {
                    return;
                }
                state.status = LinkStatus::Connecting;
            }
            manager.try_open().await;
        })
    }

    async fn handle_link_down(self: &Arc<Self>, generation: u64, reason: String) {
        // a reader or heartbeat from a superseded connection must not
        // schedule another reconnect
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        self.register_failure(reason).await;
    }

    async fn handle_payload(self: &Arc<Self>, payload: &str) {
        match parse_inbound(payload) {
            Some(event) => {
                let _ = self.events.send(StreamEvent::Analysis(event));
            }
            None => {
                let mut metrics = self.metrics.lock().await;
                metrics.record_malformed_frame();
            }
        }
    }

    /// Returns false when the keep-alive could not be written; the caller
    /// then tears the link down proactively instead of waiting for the
    /// transport to notice.
    async fn send_heartbeat(self: &Arc<Self>) -> bool {
        let frame = OutboundFrame::heartbeat(&self.config.module, &self.config.platform);
        let payload = match serde_json::to_string(&frame) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("failed to serialize heartbeat frame: {err}");
                return true;
            }
        };

        let mut state = self.state.lock().await;
        if state.status != LinkStatus::Open {
            return true;
        }
        let Some(writer) = state.writer.as_mut() else {
            return true;
        };
        match writer.send_text(payload).await {
            Ok(()) => {
                debug!("heartbeat sent");
                true
            }
            Err(err) => {
                warn!("heartbeat send failed: {err}");
                false
            }
        }
    }
}

async fn read_loop(
    manager: Weak<ConnectionManager>,
    mut reader: Box<dyn FrameReader>,
    generation: u64,
) {
    loop {
        let frame = reader.next_frame().await;
        let Some(manager) = manager.upgrade() else {
            return;
        };
        match frame {
            Some(Ok(InboundFrame::Text(payload))) => manager.handle_payload(&payload).await,
            Some(Ok(InboundFrame::Ignored)) => {}
            Some(Ok(InboundFrame::Closed(reason))) => {
                let reason = reason
                    .filter(|reason| !reason.trim().is_empty())
                    .unwrap_or_else(|| "remote closed".to_string());
                manager.handle_link_down(generation, reason).await;
                return;
            }
            Some(Err(err)) => {
                manager.handle_link_down(generation, err.to_string()).await;
                return;
            }
            None => {
                manager
                    .handle_link_down(generation, "stream ended".to_string())
                    .await;
                return;
            }
        }
    }
}

async fn heartbeat_loop(manager: Weak<ConnectionManager>, generation: u64, interval: Duration) {
    loop {
        sleep(interval).await;
        let Some(manager) = manager.upgrade() else {
            return;
        };
        if manager.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        if !manager.send_heartbeat().await {
            manager
                .handle_link_down(generation, "heartbeat send failed".to_string())
                .await;
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::AnalysisRequest;
    use crate::testing::{MockTransport, drain};

    fn stream_config() -> StreamConfig {
        StreamConfig::from(&FeedbackConfig::default())
    }

    fn manager_with(transport: Arc<MockTransport>) -> Arc<ConnectionManager> {
        ConnectionManager::new(
            stream_config(),
            transport,
            Arc::new(Mutex::new(RuntimeMetrics::new())),
        )
    }

    fn analysis_frame(text: &str) -> OutboundFrame {
        OutboundFrame::analysis(&AnalysisRequest {
            text: text.to_string(),
            client_timestamp: 1_700_000_000_000,
            platform: "web".to_string(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_stop_after_the_cap_and_send_still_queues() {
        let transport = MockTransport::always_failing();
        let manager = manager_with(transport.clone());
        let mut events = manager.subscribe();

        manager.connect().await;
        tokio::time::sleep(Duration::from_secs(30)).await;

        // initial attempt plus exactly five scheduled reconnects
        assert_eq!(transport.connect_count(), 6);
        let snapshot = manager.snapshot().await;
        assert!(snapshot.degraded);
        assert_eq!(snapshot.status, LinkStatus::Disconnected);
        assert!(
            drain(&mut events)
                .iter()
                .any(|event| matches!(event, StreamEvent::Degraded))
        );

        // degraded feature still accepts sends without throwing
        manager.send(analysis_frame("still here")).await;
        let snapshot = manager.snapshot().await;
        assert_eq!(snapshot.queued_frames, 1);
        assert_eq!(transport.connect_count(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_frames_flush_in_enqueue_order_on_reconnect() {
        let transport = MockTransport::failing_first(1);
        let manager = manager_with(transport.clone());

        manager.send(analysis_frame("first")).await;
        manager.send(analysis_frame("second")).await;
        manager.send(analysis_frame("third")).await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        manager.send(analysis_frame("fourth")).await;

        let sent = transport.sent_frames();
        let order: Vec<usize> = ["first", "second", "third", "fourth"]
            .iter()
            .map(|needle| {
                sent.iter()
                    .position(|frame| frame.contains(needle))
                    .expect("frame should have been delivered")
            })
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
        assert_eq!(manager.snapshot().await.queued_frames, 0);
        assert_eq!(manager.snapshot().await.status, LinkStatus::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_flow_on_a_fixed_interval() {
        let transport = MockTransport::new();
        let manager = manager_with(transport.clone());

        manager.connect().await;
        tokio::time::sleep(Duration::from_secs(61)).await;

        let heartbeats = transport
            .sent_frames()
            .iter()
            .filter(|frame| frame.contains("\"type\":\"heartbeat\""))
            .count();
        assert_eq!(heartbeats, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_send_failure_triggers_proactive_reconnect() {
        let transport = MockTransport::new();
        let manager = manager_with(transport.clone());

        manager.connect().await;
        assert_eq!(transport.connect_count(), 1);

        transport.fail_writes(true);
        tokio::time::sleep(Duration::from_secs(31)).await;
        transport.fail_writes(false);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(transport.connect_count(), 2);
        assert_eq!(manager.snapshot().await.status, LinkStatus::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn open_timeout_counts_as_a_failed_attempt() {
        let transport = MockTransport::pending();
        let manager = manager_with(transport.clone());

        manager.connect().await;

        let snapshot = manager.snapshot().await;
        assert_eq!(transport.connect_count(), 1);
        assert_eq!(snapshot.reconnect_attempts, 1);
        assert!(snapshot.last_error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_connect_clears_the_degraded_latch() {
        let transport = MockTransport::failing_first(6);
        let manager = manager_with(transport.clone());

        manager.send(analysis_frame("held back")).await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(manager.snapshot().await.degraded);

        manager.connect().await;

        let snapshot = manager.snapshot().await;
        assert!(!snapshot.degraded);
        assert_eq!(snapshot.status, LinkStatus::Open);
        assert!(
            transport
                .sent_frames()
                .iter()
                .any(|frame| frame.contains("held back"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_payloads_are_broadcast_and_malformed_ones_dropped() {
        let (transport, inbound) = MockTransport::with_inbound();
        let metrics = Arc::new(Mutex::new(RuntimeMetrics::new()));
        let manager = ConnectionManager::new(stream_config(), transport, Arc::clone(&metrics));
        let mut events = manager.subscribe();

        manager.connect().await;
        inbound
            .send(InboundFrame::Text("{\"prompt\": \"abc\"}".to_string()))
            .expect("inbound channel should accept frames");
        inbound
            .send(InboundFrame::Text("garbage".to_string()))
            .expect("inbound channel should accept frames");
        tokio::time::sleep(Duration::from_millis(50)).await;

        let analysis_events = drain(&mut events)
            .into_iter()
            .filter(|event| matches!(event, StreamEvent::Analysis(_)))
            .count();
        assert_eq!(analysis_events, 1);
        assert_eq!(metrics.lock().await.report().malformed_frames, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drops_the_queue_without_flushing() {
        let transport = MockTransport::failing_first(1);
        let manager = manager_with(transport.clone());

        manager.send(analysis_frame("doomed")).await;
        assert_eq!(manager.snapshot().await.queued_frames, 1);

        manager.shutdown().await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(manager.snapshot().await.queued_frames, 0);
        assert!(transport.sent_frames().is_empty());
        assert_eq!(manager.snapshot().await.status, LinkStatus::Closing);
    }
}

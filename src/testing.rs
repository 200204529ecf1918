//! Test doubles shared across unit tests.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::{Notify, broadcast, mpsc};

use crate::api::{
    ApiError, EnhanceRequest, EnhanceResponse, EnhancementApi, FeedbackSubmission, PromptExchange,
};
use crate::button::{ButtonState, ButtonView};
use crate::network::{
    FrameReader, FrameWriter, InboundFrame, NetworkError, StreamPair, StreamTransport,
};
use crate::quality::{QualityIndicatorState, QualityView};
use crate::surface::EditableSurface;

pub(crate) struct StubSurface {
    text: StdMutex<String>,
}

impl StubSurface {
    pub fn new(initial: &str) -> Arc<Self> {
        Arc::new(Self {
            text: StdMutex::new(initial.to_string()),
        })
    }

    pub fn set_text(&self, text: &str) {
        if let Ok(mut current) = self.text.lock() {
            *current = text.to_string();
        }
    }
}

impl EditableSurface for StubSurface {
    fn read_text(&self) -> String {
        self.text.lock().map(|text| text.clone()).unwrap_or_default()
    }

    fn replace_text(&self, text: &str) {
        self.set_text(text);
    }
}

pub(crate) struct RecordingQualityView {
    pub rendered: StdMutex<Vec<QualityIndicatorState>>,
    pub panel_open: AtomicBool,
    pub panel_refreshes: AtomicU32,
}

impl RecordingQualityView {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rendered: StdMutex::new(Vec::new()),
            panel_open: AtomicBool::new(false),
            panel_refreshes: AtomicU32::new(0),
        })
    }

    pub fn last(&self) -> Option<QualityIndicatorState> {
        self.rendered
            .lock()
            .ok()
            .and_then(|rendered| rendered.last().copied())
    }
}

impl QualityView for RecordingQualityView {
    fn render_indicator(&self, state: QualityIndicatorState) {
        if let Ok(mut rendered) = self.rendered.lock() {
            rendered.push(state);
        }
    }

    fn panel_open(&self) -> bool {
        self.panel_open.load(Ordering::SeqCst)
    }

    fn refresh_panel(&self, _state: QualityIndicatorState) {
        self.panel_refreshes.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) struct RecordingButtonView {
    log: StdMutex<Vec<String>>,
}

impl RecordingButtonView {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            log: StdMutex::new(Vec::new()),
        })
    }

    pub fn entries(&self) -> Vec<String> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    fn push(&self, entry: String) {
        if let Ok(mut log) = self.log.lock() {
            log.push(entry);
        }
    }
}

impl ButtonView for RecordingButtonView {
    fn enter(&self, state: ButtonState) {
        self.push(format!("enter:{state:?}"));
    }

    fn exit(&self, state: ButtonState) {
        self.push(format!("exit:{state:?}"));
    }

    fn open_review(&self) {
        self.push("open_review".to_string());
    }
}

pub(crate) struct MockApi {
    enhance_calls: AtomicU32,
    persist_calls: AtomicU32,
    feedback_calls: AtomicU32,
    should_fail: AtomicBool,
    gate: StdMutex<Option<Arc<Notify>>>,
}

impl MockApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            enhance_calls: AtomicU32::new(0),
            persist_calls: AtomicU32::new(0),
            feedback_calls: AtomicU32::new(0),
            should_fail: AtomicBool::new(false),
            gate: StdMutex::new(None),
        })
    }

    pub fn enhance_call_count(&self) -> u32 {
        self.enhance_calls.load(Ordering::SeqCst)
    }

    pub fn persist_call_count(&self) -> u32 {
        self.persist_calls.load(Ordering::SeqCst)
    }

    pub fn feedback_call_count(&self) -> u32 {
        self.feedback_calls.load(Ordering::SeqCst)
    }

    pub fn fail_enhance(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    /// Makes the next enhance call block until the returned handle is
    /// notified.
    pub fn hold_enhance(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        if let Ok(mut slot) = self.gate.lock() {
            *slot = Some(gate.clone());
        }
        gate
    }
}

#[async_trait]
impl EnhancementApi for MockApi {
    async fn enhance(&self, request: &EnhanceRequest) -> Result<EnhanceResponse, ApiError> {
        self.enhance_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().ok().and_then(|mut slot| slot.take());
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(ApiError::Status(503));
        }
        Ok(EnhanceResponse {
            enhanced_prompt: format!("enhanced: {}", request.prompt),
            suggested_llm: None,
            processing_time_ms: Some(12),
            relevance_analysis: None,
        })
    }

    async fn persist_exchange(&self, _exchange: &PromptExchange) -> Result<(), ApiError> {
        self.persist_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn submit_feedback(&self, _submission: &FeedbackSubmission) -> Result<(), ApiError> {
        self.feedback_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) struct MockTransport {
    fail_connects: AtomicU32,
    always_fail: AtomicBool,
    pend_connect: AtomicBool,
    connects: AtomicU32,
    sent: Arc<StdMutex<Vec<String>>>,
    write_failure: Arc<AtomicBool>,
    inbound: StdMutex<Option<mpsc::UnboundedReceiver<InboundFrame>>>,
}

impl MockTransport {
    fn build() -> Self {
        Self {
            fail_connects: AtomicU32::new(0),
            always_fail: AtomicBool::new(false),
            pend_connect: AtomicBool::new(false),
            connects: AtomicU32::new(0),
            sent: Arc::new(StdMutex::new(Vec::new())),
            write_failure: Arc::new(AtomicBool::new(false)),
            inbound: StdMutex::new(None),
        }
    }

    pub fn new() -> Arc<Self> {
        Arc::new(Self::build())
    }

    pub fn always_failing() -> Arc<Self> {
        let transport = Self::build();
        transport.always_fail.store(true, Ordering::SeqCst);
        Arc::new(transport)
    }

    pub fn failing_first(failures: u32) -> Arc<Self> {
        let transport = Self::build();
        transport.fail_connects.store(failures, Ordering::SeqCst);
        Arc::new(transport)
    }

    pub fn pending() -> Arc<Self> {
        let transport = Self::build();
        transport.pend_connect.store(true, Ordering::SeqCst);
        Arc::new(transport)
    }

    pub fn with_inbound() -> (Arc<Self>, mpsc::UnboundedSender<InboundFrame>) {
        let transport = Self::build();
        let (sender, receiver) = mpsc::unbounded_channel();
        if let Ok(mut inbound) = transport.inbound.lock() {
            *inbound = Some(receiver);
        }
        (Arc::new(transport), sender)
    }

    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn sent_frames(&self) -> Vec<String> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.write_failure.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StreamTransport for MockTransport {
    async fn connect(&self, _url: &str) -> Result<StreamPair, NetworkError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.pend_connect.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.always_fail.load(Ordering::SeqCst) {
            return Err(NetworkError::ConnectFailed("connection refused".to_string()));
        }
        let remaining = self.fail_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_connects.store(remaining - 1, Ordering::SeqCst);
            return Err(NetworkError::ConnectFailed("connection refused".to_string()));
        }

        let reader: Box<dyn FrameReader> = match self.inbound.lock().ok().and_then(|mut i| i.take())
        {
            Some(receiver) => Box::new(ChannelReader(receiver)),
            None => Box::new(PendingReader),
        };
        Ok(StreamPair {
            writer: Box::new(RecordingWriter {
                sent: Arc::clone(&self.sent),
                write_failure: Arc::clone(&self.write_failure),
            }),
            reader,
        })
    }
}

struct RecordingWriter {
    sent: Arc<StdMutex<Vec<String>>>,
    write_failure: Arc<AtomicBool>,
}

#[async_trait]
impl FrameWriter for RecordingWriter {
    async fn send_text(&mut self, payload: String) -> Result<(), NetworkError> {
        if self.write_failure.load(Ordering::SeqCst) {
            return Err(NetworkError::Send("broken pipe".to_string()));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(payload);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), NetworkError> {
        Ok(())
    }
}

struct ChannelReader(mpsc::UnboundedReceiver<InboundFrame>);

#[async_trait]
impl FrameReader for ChannelReader {
    async fn next_frame(&mut self) -> Option<Result<InboundFrame, NetworkError>> {
        match self.0.recv().await {
            Some(frame) => Some(Ok(frame)),
            // keep the link quiet instead of reporting a close at test end
            None => std::future::pending().await,
        }
    }
}

struct PendingReader;

#[async_trait]
impl FrameReader for PendingReader {
    async fn next_frame(&mut self) -> Option<Result<InboundFrame, NetworkError>> {
        std::future::pending().await
    }
}

pub(crate) fn drain<T: Clone>(receiver: &mut broadcast::Receiver<T>) -> Vec<T> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

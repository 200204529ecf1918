mod connection;
mod protocol;
mod transport;

use thiserror::Error;

pub use connection::{ConnectionManager, LinkSnapshot, LinkStatus, StreamConfig, StreamEvent};
pub use protocol::{
    AnalysisEvent, IntentClassification, OutboundFrame, QualityMetrics, parse_inbound,
};
pub use transport::{
    FrameReader, FrameWriter, InboundFrame, StreamPair, StreamTransport, TungsteniteTransport,
};

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("failed to build websocket request: {0}")]
    RequestBuild(String),
    #[error("failed to connect websocket: {0}")]
    ConnectFailed(String),
    #[error("timed out waiting for websocket open")]
    OpenTimeout,
    #[error("failed to send websocket payload: {0}")]
    Send(String),
    #[error("failed to close websocket connection: {0}")]
    Close(String),
    #[error("websocket stream ended: {0}")]
    Closed(String),
}

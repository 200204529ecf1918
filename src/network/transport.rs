use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::NetworkError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One inbound transport frame, already stripped of websocket plumbing.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    Text(String),
    /// Binary payloads and ping/pong control frames carry nothing for us.
    Ignored,
    Closed(Option<String>),
}

#[async_trait]
pub trait FrameWriter: Send {
    async fn send_text(&mut self, payload: String) -> Result<(), NetworkError>;
    async fn close(&mut self) -> Result<(), NetworkError>;
}

#[async_trait]
pub trait FrameReader: Send {
    /// `None` when the underlying stream ends without a close frame.
    async fn next_frame(&mut self) -> Option<Result<InboundFrame, NetworkError>>;
}

pub struct StreamPair {
    pub writer: Box<dyn FrameWriter>,
    pub reader: Box<dyn FrameReader>,
}

/// The connection manager owns exactly one of these and hides every
/// transport detail behind it.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<StreamPair, NetworkError>;
}

pub struct TungsteniteTransport;

#[async_trait]
impl StreamTransport for TungsteniteTransport {
    async fn connect(&self, url: &str) -> Result<StreamPair, NetworkError> {
        let request = url
            .into_client_request()
            .map_err(|err| NetworkError::RequestBuild(err.to_string()))?;
        let (stream, _) = connect_async(request)
            .await
            .map_err(|err| NetworkError::ConnectFailed(err.to_string()))?;
        let (writer, reader) = stream.split();
        Ok(StreamPair {
            writer: Box::new(WsWriter(writer)),
            reader: Box::new(WsReader(reader)),
        })
    }
}

struct WsWriter(futures_util::stream::SplitSink<WsStream, Message>);

#[async_trait]
impl FrameWriter for WsWriter {
    async fn send_text(&mut self, payload: String) -> Result<(), NetworkError> {
        self.0
            .send(Message::Text(payload.into()))
            .await
            .map_err(|err| NetworkError::Send(err.to_string()))
    }

    async fn close(&mut self) -> Result<(), NetworkError> {
        match self.0.send(Message::Close(None)).await {
            Ok(()) => Ok(()),
            Err(err) if is_expected_close_error(&err) => Ok(()),
            Err(err) => Err(NetworkError::Close(err.to_string())),
        }
    }
}

struct WsReader(futures_util::stream::SplitStream<WsStream>);

#[async_trait]
impl FrameReader for WsReader {
    async fn next_frame(&mut self) -> Option<Result<InboundFrame, NetworkError>> {
        match self.0.next().await? {
            Ok(Message::Text(text)) => Some(Ok(InboundFrame::Text(text.to_string()))),
            Ok(Message::Binary(_))
            | Ok(Message::Ping(_))
            | Ok(Message::Pong(_))
            | Ok(Message::Frame(_)) => Some(Ok(InboundFrame::Ignored)),
            Ok(Message::Close(frame)) => {
                let reason = frame.map(|close| close.reason.to_string());
                Some(Ok(InboundFrame::Closed(reason)))
            }
            Err(err) => Some(Err(NetworkError::Closed(err.to_string()))),
        }
    }
}

fn is_expected_close_error(err: &tungstenite::Error) -> bool {
    matches!(
        err,
        tungstenite::Error::AlreadyClosed | tungstenite::Error::ConnectionClosed
    ) || err
        .to_string()
        .contains("Sending after closing is not allowed")
}

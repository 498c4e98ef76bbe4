use std::{pin::Pin, time::Duration};

use futures::{Sink, SinkExt as _, Stream, StreamExt as _};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};

/// One frame read from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    /// websocket level ping/pong, answered by the transport itself
    Control,
    Close,
}

pub type FrameSink = Pin<Box<dyn Sink<String, Error = anyhow::Error> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = anyhow::Result<Frame>> + Send>>;

/// An open transport: every item sent on `sink` is written as a single text frame.
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

#[async_trait::async_trait]
pub trait Dialer
where
    Self: Send + Sync + 'static,
{
    async fn dial(&self, address: &str) -> anyhow::Result<Transport>;
}

/// Twitch's websocket endpoint.
#[derive(Copy, Clone, Debug, Default)]
pub struct WebSocket;

#[async_trait::async_trait]
impl Dialer for WebSocket {
    async fn dial(&self, address: &str) -> anyhow::Result<Transport> {
        let (stream, _resp) = tokio_tungstenite::connect_async(address).await?;
        let (sink, stream) = stream.split();

        let sink = sink
            .sink_map_err(anyhow::Error::from)
            .with(|line: String| futures::future::ok::<_, anyhow::Error>(WsMessage::Text(line)));

        let stream = stream.map(|msg| match msg {
            Ok(WsMessage::Text(data)) => Ok(Frame::Text(data)),
            Ok(WsMessage::Binary(data)) => Ok(Frame::Binary(data)),
            Ok(WsMessage::Ping(..) | WsMessage::Pong(..) | WsMessage::Frame(..)) => {
                Ok(Frame::Control)
            }
            Ok(WsMessage::Close(..)) | Err(WsError::ConnectionClosed) => Ok(Frame::Close),
            Err(err) => Err(err.into()),
        });

        Ok(Transport {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

/// Dials `address`, retrying with a linearly growing delay between attempts.
pub(crate) async fn dial_with_backoff(
    dialer: &dyn Dialer,
    address: &str,
    attempts: usize,
) -> anyhow::Result<Transport> {
    let backoff = std::iter::successors(Some(0), |n| Some(n + 3))
        .map(Duration::from_secs)
        .take(attempts.max(1));

    let mut last = None;
    for delay in backoff {
        tokio::time::sleep(delay).await;

        match tokio::time::timeout(Duration::from_secs(5), dialer.dial(address)).await {
            Ok(Ok(transport)) => return Ok(transport),
            Ok(Err(err)) => {
                log::warn!("could not connect to {address}: {err}");
                last.replace(err);
            }
            Err(..) => log::warn!("connection attempt to {address} timed out"),
        }
    }

    let err = last.unwrap_or_else(|| anyhow::anyhow!("timed out"));
    Err(err.context(format!("could not connect to {address}")))
}

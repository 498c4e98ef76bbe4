use lurk_twitch::ChatEvent;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt as _},
    sync::Mutex,
};

use crate::config::Format;

/// Where chat events end up.
#[async_trait::async_trait]
pub trait Sink
where
    Self: Send + Sync,
{
    async fn publish(&self, event: &ChatEvent) -> anyhow::Result<()>;
}

pub fn from_format(format: Format) -> Box<dyn Sink> {
    match format {
        Format::Log => Box::new(LogSink),
        Format::Json => Box::new(JsonLines::new(tokio::io::stdout())),
    }
}

/// Writes every event to the log
#[derive(Copy, Clone, Debug, Default)]
pub struct LogSink;

#[async_trait::async_trait]
impl Sink for LogSink {
    async fn publish(&self, event: &ChatEvent) -> anyhow::Result<()> {
        if event.action {
            log::info!(target: "lurk::chat", "#{} * {} {}", event.channel, event.user, event.text);
        } else {
            log::info!(target: "lurk::chat", "#{} <{}> {}", event.channel, event.user, event.text);
        }
        Ok(())
    }
}

/// Writes every event as a line of json
pub struct JsonLines<W> {
    out: Mutex<W>,
}

impl<W> JsonLines<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

#[async_trait::async_trait]
impl<W> Sink for JsonLines<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn publish(&self, event: &ChatEvent) -> anyhow::Result<()> {
        let mut data = serde_json::to_vec(event)?;
        data.push(b'\n');

        let mut out = self.out.lock().await;
        out.write_all(&data).await?;
        out.flush().await?;
        Ok(())
    }
}

use std::sync::Arc;

use lurk_twitch::{normalize_channel, ChannelRecord, Manager, Roster};
use tokio::{
    io::{AsyncBufReadExt as _, AsyncWrite, AsyncWriteExt as _, BufReader},
    net::{TcpListener, TcpStream},
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Join(&'a str),
    Part(&'a str),
    List,
}

impl<'a> Command<'a> {
    fn parse(line: &'a str) -> anyhow::Result<Self> {
        let (head, tail) = line
            .trim()
            .split_once(' ')
            .map_or((line.trim(), ""), |(head, tail)| (head, tail.trim()));

        Ok(match (&*head.to_ascii_uppercase(), tail) {
            ("JOIN" | "PART", "") => anyhow::bail!("a channel is required"),
            ("JOIN", channel) => Self::Join(channel),
            ("PART", channel) => Self::Part(channel),
            ("LIST", ..) => Self::List,
            ("", ..) => anyhow::bail!("empty command"),
            (cmd, ..) => anyhow::bail!("unknown command: {cmd}"),
        })
    }
}

/// Applies control commands to the pool and the roster.
#[derive(Clone)]
pub struct Controller {
    manager: Manager,
    roster: Arc<dyn Roster>,
}

impl Controller {
    pub fn new(manager: Manager, roster: Arc<dyn Roster>) -> Self {
        Self { manager, roster }
    }

    /// Runs a single command line, returning the lines to reply with.
    ///
    /// The last line is always either `ok` or `error: <reason>`.
    pub async fn execute(&self, line: &str) -> Vec<String> {
        let mut out = vec![];
        match self.dispatch(line, &mut out).await {
            Ok(()) => out.push(String::from("ok")),
            Err(err) => out.push(format!("error: {err:#}")),
        }
        out
    }

    async fn dispatch(&self, line: &str, out: &mut Vec<String>) -> anyhow::Result<()> {
        match Command::parse(line)? {
            Command::Join(channel) => self.join(channel).await,
            Command::Part(channel) => self.part(channel).await,
            Command::List => {
                out.extend(self.manager.connections().into_iter().map(|conn| {
                    format!(
                        "{} {:?} {}",
                        conn.id(),
                        conn.state(),
                        conn.channels().join(",")
                    )
                }));
                Ok(())
            }
        }
    }

    async fn join(&self, channel: &str) -> anyhow::Result<()> {
        let channel = normalize_channel(channel);
        anyhow::ensure!(!channel.is_empty(), "a channel is required");

        if self.roster.find_by_name(&channel).await?.is_none() {
            log::info!("adding {channel} to the roster");
            self.roster.save(ChannelRecord::new(&channel)).await?;
        }
        self.manager.join_channel(&channel).await
    }

    async fn part(&self, channel: &str) -> anyhow::Result<()> {
        let channel = normalize_channel(channel);
        anyhow::ensure!(!channel.is_empty(), "a channel is required");

        self.manager.leave_channel(&channel).await?;
        if self.roster.remove(&channel).await? {
            log::info!("removed {channel} from the roster");
        }
        Ok(())
    }
}

/// Accepts control clients until `shutdown` is cancelled.
pub async fn serve(listener: TcpListener, controller: Controller, shutdown: CancellationToken) {
    loop {
        let (client, addr) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    log::warn!("could not accept a control client: {err}");
                    continue;
                }
            }
        };

        log::debug!("got control client: {addr}");
        tokio::spawn(handle(client, controller.clone(), shutdown.clone()));
    }
    log::debug!("end of the control listener");
}

async fn handle(mut client: TcpStream, controller: Controller, shutdown: CancellationToken) {
    let (read, mut write) = client.split();
    let mut lines = BufReader::new(read).lines();

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(err) => {
                    log::debug!("control client went away: {err}");
                    break;
                }
            }
        };

        let reply = controller.execute(&line).await;
        if let Err(err) = send_lines(&mut write, &reply).await {
            log::debug!("could not reply to a control client: {err}");
            break;
        }
    }
}

async fn send_lines(
    mut w: impl AsyncWrite + Send + Unpin,
    lines: &[String],
) -> tokio::io::Result<()> {
    for line in lines {
        w.write_all(line.as_bytes()).await?;
        w.write_all(b"\n").await?;
    }
    w.flush().await
}

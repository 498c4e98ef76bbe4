use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Context as _;
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    oneshot,
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config, connection::Subscriber, normalize_channel, roster::Roster, transport::Dialer,
    Connection, Privmsg,
};

/// Every chat line seen by every connection in the pool.
pub type Messages = ReceiverStream<Privmsg>;

#[derive(Debug)]
enum Request {
    Join { channel: String },
    Part { channel: String },
}

type Responder = oneshot::Sender<anyhow::Result<()>>;
type Connections = Arc<Mutex<Vec<Connection>>>;

/// Spreads channels over as many connections as needed.
///
/// Joins and parts go through a single worker, so they're applied in the order they were requested.
#[derive(Clone)]
pub struct Manager {
    requests: mpsc::Sender<(Request, Responder)>,
    connections: Connections,
}

impl Manager {
    pub fn new(
        config: Config,
        dialer: Arc<dyn Dialer>,
        shutdown: CancellationToken,
    ) -> (Self, Messages) {
        let (messages, recv) = mpsc::channel(config.queue_depth.max(1));
        let subscriber: Subscriber = Arc::new(move |pm: Privmsg| match messages.try_send(pm) {
            Ok(()) => {}
            Err(TrySendError::Full(pm)) => {
                log::warn!("message queue is full, dropping a message in {}", pm.channel)
            }
            Err(TrySendError::Closed(..)) => {}
        });

        let connections = Connections::default();
        let (requests, queue) = mpsc::channel(16);

        let worker = Worker {
            config: Arc::new(config),
            dialer,
            subscriber,
            connections: Arc::clone(&connections),
            next_id: 0,
            shutdown,
        };
        tokio::spawn(worker.run(queue));

        let this = Self {
            requests,
            connections,
        };
        (this, ReceiverStream::new(recv))
    }

    pub async fn join_channel(&self, name: &str) -> anyhow::Result<()> {
        let channel = name.to_string();
        self.request(Request::Join { channel }).await
    }

    pub async fn leave_channel(&self, name: &str) -> anyhow::Result<()> {
        let channel = name.to_string();
        self.request(Request::Part { channel }).await
    }

    /// Joins every channel in the roster, in order, stopping at the first failure.
    pub async fn connect_all_from_roster(&self, roster: &dyn Roster) -> anyhow::Result<()> {
        let records = roster.list_all().await.context("could not list the roster")?;
        log::info!("joining {} channels from the roster", records.len());

        for record in records {
            self.join_channel(&record.name)
                .await
                .with_context(|| format!("could not join {}", record.name))?;
        }
        Ok(())
    }

    /// The connections in the pool, oldest first
    pub fn connections(&self) -> Vec<Connection> {
        lock(&self.connections).clone()
    }

    async fn request(&self, req: Request) -> anyhow::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send((req, tx))
            .await
            .map_err(|_| anyhow::anyhow!("the connection pool has shut down"))?;
        rx.await
            .map_err(|_| anyhow::anyhow!("the connection pool has shut down"))?
    }
}

struct Worker {
    config: Arc<Config>,
    dialer: Arc<dyn Dialer>,
    subscriber: Subscriber,
    connections: Connections,
    next_id: usize,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(mut self, mut queue: mpsc::Receiver<(Request, Responder)>) {
        loop {
            let (req, out) = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                Some(req) = queue.recv() => req,
                else => break,
            };

            log::debug!("handling {req:?}");
            let resp = match req {
                Request::Join { channel } => self.handle_join(&channel).await,
                Request::Part { channel } => self.handle_part(&channel).await,
            };
            let _ = out.send(resp);
        }

        log::debug!("end of the connection pool loop");
        let connections = std::mem::take(&mut *lock(&self.connections));
        for conn in connections {
            conn.disconnect().await;
        }
    }

    async fn handle_join(&mut self, channel: &str) -> anyhow::Result<()> {
        let channel = normalize_channel(channel);
        if channel.is_empty() {
            return Ok(());
        }

        let orphans = self.prune().await;
        self.adopt(orphans).await;
        self.assign(&channel).await
    }

    async fn assign(&mut self, channel: &str) -> anyhow::Result<()> {
        if let Some(conn) = self.holder(channel) {
            log::debug!("{channel} is already on connection {}", conn.id());
            return Ok(());
        }

        let conn = match self.first_fit() {
            Some(conn) => conn,
            None => self.spawn_connection().await?,
        };

        log::info!("joining {channel} on connection {}", conn.id());
        conn.join(channel).await
    }

    async fn handle_part(&mut self, channel: &str) -> anyhow::Result<()> {
        let channel = normalize_channel(channel);
        let orphans = self.prune().await;
        self.adopt(orphans.into_iter().filter(|c| *c != channel)).await;

        let Some(conn) = self.holder(&channel) else {
            log::info!("not in {channel}, nothing to leave");
            return Ok(());
        };

        log::info!("leaving {channel} on connection {}", conn.id());
        conn.part(&channel).await
    }

    /// Drops connections that won't come back, returning the channels they held.
    async fn prune(&mut self) -> Vec<String> {
        let dead = {
            let mut connections = lock(&self.connections);
            let (dead, alive) = std::mem::take(&mut *connections)
                .into_iter()
                .partition::<Vec<_>, _>(Connection::is_terminated);
            *connections = alive;
            dead
        };

        let mut orphans = vec![];
        for conn in dead {
            let channels = conn.channels();
            log::warn!(
                "connection {} gave up, moving its {} channels",
                conn.id(),
                channels.len()
            );
            orphans.extend(channels);
            conn.disconnect().await;
        }
        orphans
    }

    async fn adopt(&mut self, orphans: impl IntoIterator<Item = String>) {
        for channel in orphans {
            if let Err(err) = self.assign(&channel).await {
                log::error!("could not move {channel} to another connection: {err:#}");
            }
        }
    }

    fn holder(&self, channel: &str) -> Option<Connection> {
        lock(&self.connections)
            .iter()
            .find(|conn| conn.holds(channel))
            .cloned()
    }

    fn first_fit(&self) -> Option<Connection> {
        let cap = self.config.channel_cap.max(1);
        lock(&self.connections)
            .iter()
            .find(|conn| conn.is_ready() && conn.load() < cap)
            .cloned()
    }

    async fn spawn_connection(&mut self) -> anyhow::Result<Connection> {
        let id = self.next_id;
        self.next_id += 1;

        let conn = Connection::new(
            id,
            Arc::clone(&self.config),
            Arc::clone(&self.dialer),
            Some(Arc::clone(&self.subscriber)),
            self.shutdown.clone(),
        );

        if let Err(err) = conn.connect().await {
            conn.disconnect().await;
            return Err(err.context(format!("could not start connection {id}")));
        }

        lock(&self.connections).push(conn.clone());
        Ok(conn)
    }
}

fn lock(connections: &Mutex<Vec<Connection>>) -> MutexGuard<'_, Vec<Connection>> {
    connections.lock().unwrap_or_else(PoisonError::into_inner)
}

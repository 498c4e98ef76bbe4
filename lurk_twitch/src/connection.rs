use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use anyhow::Context as _;
use futures::{SinkExt as _, StreamExt as _};
use tokio::{
    sync::{oneshot, watch, Notify},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    normalize_channel, parse_line,
    transport::{dial_with_backoff, Dialer, FrameSink, FrameStream},
    Frame, Message, Privmsg, Transport,
};

/// Called from the read loop for every chat line.
pub type Subscriber = Arc<dyn Fn(Privmsg) + Send + Sync>;

const CAPABILITIES: &str = "CAP REQ :twitch.tv/tags twitch.tv/membership";
const PING_PAYLOAD: &str = "lurk";
const SERVER_HOST: &str = "tmi.twitch.tv";
const AUTH_FAILED: &[&str] = &["Login authentication failed", "Improperly formatted auth"];

/// Pause between reconnect rounds once every dial in a round has failed
pub(crate) const RETRY_DELAY: Duration = Duration::from_secs(15);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    Disconnected,
    Handshaking,
    Ready,
    Reconnecting,
}

#[derive(Default)]
struct Channels {
    joined: BTreeSet<String>,
    pending: BTreeSet<String>,
}

impl Channels {
    fn held(&self) -> BTreeSet<String> {
        self.joined.union(&self.pending).cloned().collect()
    }

    fn clear(&mut self) {
        self.joined.clear();
        self.pending.clear();
    }
}

struct Inner {
    id: usize,
    config: Arc<Config>,
    dialer: Arc<dyn Dialer>,
    subscriber: Option<Subscriber>,

    writer: tokio::sync::Mutex<Option<FrameSink>>,
    channels: Mutex<Channels>,
    state: watch::Sender<State>,

    activity: watch::Sender<()>,
    pong: Notify,

    tasks: Mutex<Vec<JoinHandle<()>>>,
    reconnecting: AtomicBool,
    auth_failed: AtomicBool,
    closed: AtomicBool,
    reconnects: AtomicUsize,

    shutdown: CancellationToken,
}

/// A single websocket session to chat, holding up to `channel_cap` channels.
///
/// Cloning is cheap, all clones share the same session.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("channels", &self.channels())
            .finish()
    }
}

impl Connection {
    pub fn new(
        id: usize,
        config: Arc<Config>,
        dialer: Arc<dyn Dialer>,
        subscriber: Option<Subscriber>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id,
                config,
                dialer,
                subscriber,
                writer: tokio::sync::Mutex::new(None),
                channels: Mutex::default(),
                state: watch::channel(State::Disconnected).0,
                activity: watch::channel(()).0,
                pong: Notify::new(),
                tasks: Mutex::default(),
                reconnecting: AtomicBool::new(false),
                auth_failed: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                reconnects: AtomicUsize::new(0),
                shutdown,
            }),
        }
    }

    pub fn id(&self) -> usize {
        self.inner.id
    }

    pub fn state(&self) -> State {
        *self.inner.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == State::Ready
    }

    /// How many times this connection has been re-established
    pub fn reconnects(&self) -> usize {
        self.inner.reconnects.load(Ordering::SeqCst)
    }

    /// Whether the server has confirmed we're in `channel`
    pub fn is_connected_to_channel(&self, channel: &str) -> bool {
        self.lock_channels()
            .joined
            .contains(&normalize_channel(channel))
    }

    /// Whether `channel` is joined, or a join for it is in flight
    pub fn holds(&self, channel: &str) -> bool {
        let channel = normalize_channel(channel);
        let channels = self.lock_channels();
        channels.joined.contains(&channel) || channels.pending.contains(&channel)
    }

    pub fn load(&self) -> usize {
        let channels = self.lock_channels();
        channels.joined.union(&channels.pending).count()
    }

    pub fn channels(&self) -> Vec<String> {
        self.lock_channels().held().into_iter().collect()
    }

    /// Dials the server, registers and waits for the end of the greeting.
    pub async fn connect(&self) -> anyhow::Result<()> {
        let id = self.id();
        anyhow::ensure!(
            !self.inner.closed.load(Ordering::SeqCst),
            "connection {id} was disconnected"
        );

        self.inner.auth_failed.store(false, Ordering::SeqCst);
        self.set_state(State::Handshaking);

        log::info!("[{id}] connecting to {}", self.inner.config.address);
        let transport = dial_with_backoff(
            &*self.inner.dialer,
            &self.inner.config.address,
            self.inner.config.dial_attempts,
        )
        .await;

        let Transport { sink, stream } = match transport {
            Ok(transport) => transport,
            Err(err) => {
                self.set_state(State::Disconnected);
                return Err(err);
            }
        };

        if let Err(err) = self.handshake(sink, stream).await {
            self.teardown().await;
            self.set_state(State::Disconnected);
            return Err(err);
        }

        log::info!("[{id}] connected as {}", self.inner.config.name);
        Ok(())
    }

    async fn handshake(&self, sink: FrameSink, stream: FrameStream) -> anyhow::Result<()> {
        *self.inner.writer.lock().await = Some(sink);

        let (ready, wait) = oneshot::channel();
        let read = tokio::spawn(self.clone().read_loop(stream, ready));
        let keepalive = tokio::spawn(self.clone().keepalive());
        self.lock_tasks().extend([read, keepalive]);

        let reg = self.inner.config.registration();
        for line in [
            format!("PASS {}", reg.pass),
            format!("NICK {}", reg.name),
            String::from(CAPABILITIES),
        ] {
            self.send(&line).await?;
        }

        tokio::select! {
            _ = self.inner.shutdown.cancelled() => anyhow::bail!("shutting down"),
            ready = wait => {
                if ready.is_ok() {
                    return Ok(())
                }
                if self.inner.auth_failed.load(Ordering::SeqCst) {
                    anyhow::bail!("authentication failed for {}", reg.name)
                }
                anyhow::bail!("connection closed before the handshake finished")
            }
        }
    }

    /// Requests to join `channel`. Membership is confirmed once the server echoes it.
    pub async fn join(&self, channel: &str) -> anyhow::Result<()> {
        let channel = normalize_channel(channel);
        if channel.is_empty() {
            return Ok(());
        }

        self.lock_channels().pending.insert(channel.clone());
        if let Err(err) = self.send(&format!("JOIN #{channel}")).await {
            self.lock_channels().pending.remove(&channel);
            return Err(err);
        }
        Ok(())
    }

    pub async fn part(&self, channel: &str) -> anyhow::Result<()> {
        let channel = normalize_channel(channel);
        if channel.is_empty() {
            return Ok(());
        }

        self.lock_channels().pending.remove(&channel);

        // nothing to leave while the session is down, dropping it is enough
        // to keep it from being rejoined
        if self.inner.writer.lock().await.is_none() {
            self.lock_channels().joined.remove(&channel);
            log::debug!("[{}] dropped {channel} while disconnected", self.id());
            return Ok(());
        }
        self.send(&format!("PART #{channel}")).await
    }

    /// Writes a single command as one frame.
    pub async fn send(&self, raw: &str) -> anyhow::Result<()> {
        let id = self.id();
        let mut writer = self.inner.writer.lock().await;
        let sink = writer
            .as_mut()
            .with_context(|| format!("connection {id} is not connected"))?;

        if raw.starts_with("PASS ") {
            log::trace!(target: "lurk::twitch", "[{id}] -> PASS ***");
        } else {
            log::trace!(target: "lurk::twitch", "[{id}] -> {}", raw.escape_debug());
        }

        sink.send(raw.to_string())
            .await
            .with_context(|| format!("connection {id} could not send"))
    }

    /// Tears down the session and establishes a new one, rejoining every held channel.
    ///
    /// Held channels stay pending the whole time. Failed attempts are retried
    /// every [`RETRY_DELAY`] until shutdown, unless the server rejected the login.
    /// Concurrent calls collapse into the one already running.
    pub async fn reconnect(&self) -> anyhow::Result<()> {
        let Some(_guard) = Reentrancy::enter(&self.inner.reconnecting) else {
            log::debug!("[{}] already reconnecting", self.id());
            return Ok(());
        };

        let id = self.id();
        anyhow::ensure!(
            !self.inner.closed.load(Ordering::SeqCst),
            "connection {id} was disconnected"
        );

        self.set_state(State::Reconnecting);
        self.inner.reconnects.fetch_add(1, Ordering::SeqCst);

        let held = {
            let mut channels = self.lock_channels();
            let joined = std::mem::take(&mut channels.joined);
            channels.pending.extend(joined);
            channels.pending.len()
        };

        log::info!("[{id}] reconnecting, holding {held} channels");
        self.teardown().await;

        let mut attempt = 0;
        while let Err(err) = self.connect().await {
            if self.gave_up() || self.inner.shutdown.is_cancelled() {
                return Err(err);
            }

            attempt += 1;
            log::warn!(
                "[{id}] reconnect attempt {attempt} failed, retrying in {RETRY_DELAY:?}: {err:#}"
            );
            self.set_state(State::Reconnecting);

            tokio::select! {
                _ = self.inner.shutdown.cancelled() => {
                    self.set_state(State::Disconnected);
                    return Err(err)
                }
                _ = tokio::time::sleep(RETRY_DELAY) => {}
            }
        }

        // parts during the outage already dropped out of pending
        let rejoin = self.lock_channels().pending.clone();
        for channel in &rejoin {
            self.send(&format!("JOIN #{channel}")).await?;
        }
        Ok(())
    }

    /// Whether this connection is down for good and its channels need a new home
    pub fn is_terminated(&self) -> bool {
        self.state() == State::Disconnected
            && !self.inner.reconnecting.load(Ordering::SeqCst)
            && self.gave_up()
    }

    fn gave_up(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst) || self.inner.auth_failed.load(Ordering::SeqCst)
    }

    /// Closes the session for good.
    pub async fn disconnect(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.teardown().await;
        self.lock_channels().clear();
        self.set_state(State::Disconnected);
        log::debug!("[{}] disconnected", self.id());
    }

    async fn teardown(&self) {
        let tasks = std::mem::take(&mut *self.lock_tasks());
        for task in tasks {
            task.abort();
        }

        let sink = self.inner.writer.lock().await.take();
        if let Some(mut sink) = sink {
            match tokio::time::timeout(Duration::from_secs(1), sink.close()).await {
                Ok(Err(err)) => log::debug!("[{}] could not close cleanly: {err}", self.id()),
                Err(..) => log::debug!("[{}] timed out closing the transport", self.id()),
                Ok(Ok(())) => {}
            }
        }
    }

    fn spawn_reconnect(&self) {
        if self.inner.closed.load(Ordering::SeqCst)
            || self.inner.auth_failed.load(Ordering::SeqCst)
            || self.inner.shutdown.is_cancelled()
        {
            return;
        }

        let this = self.clone();
        tokio::spawn(async move {
            if let Err(err) = this.reconnect().await {
                log::error!("[{}] could not reconnect: {err:#}", this.id());
            }
        });
    }

    async fn read_loop(self, mut stream: FrameStream, ready: oneshot::Sender<()>) {
        let id = self.id();
        let mut ready = Some(ready);

        loop {
            let frame = tokio::select! {
                _ = self.inner.shutdown.cancelled() => return,
                frame = stream.next() => frame,
            };

            match frame {
                Some(Ok(Frame::Text(text))) => {
                    self.inner.activity.send_replace(());
                    for line in text.split("\r\n").filter(|s| !s.is_empty()) {
                        log::trace!(target: "lurk::twitch", "[{id}] <- {}", line.escape_debug());
                        self.dispatch(parse_line(line), &mut ready).await;
                    }
                }
                Some(Ok(Frame::Binary(data))) => {
                    self.inner.activity.send_replace(());
                    log::warn!("[{id}] ignoring a binary frame ({} bytes)", data.len());
                }
                Some(Ok(Frame::Control)) => {
                    self.inner.activity.send_replace(());
                }
                Some(Ok(Frame::Close)) | None => {
                    log::info!("[{id}] server closed the connection");
                    break;
                }
                Some(Err(err)) => {
                    log::warn!("[{id}] read error: {err:#}");
                    break;
                }
            }
        }

        self.set_state(State::Disconnected);

        // a pending handshake is failed by dropping `ready`
        if ready.is_none() {
            self.spawn_reconnect();
        }
    }

    async fn dispatch(&self, msg: Message, ready: &mut Option<oneshot::Sender<()>>) {
        let id = self.id();
        match msg {
            Message::Privmsg(pm) => {
                if let Some(subscriber) = &self.inner.subscriber {
                    subscriber(pm)
                }
            }

            Message::Ping(ping) => {
                let payload = if ping.payload.is_empty() {
                    SERVER_HOST
                } else {
                    &*ping.payload
                };
                if let Err(err) = self.send(&format!("PONG :{payload}")).await {
                    log::warn!("[{id}] could not reply to ping: {err:#}");
                }
            }

            Message::Pong(..) => self.inner.pong.notify_waiters(),

            Message::Reconnect(..) => {
                log::info!("[{id}] server asked us to reconnect");
                self.spawn_reconnect();
            }

            Message::EndOfMotd(..) => {
                if let Some(ready) = ready.take() {
                    self.set_state(State::Ready);
                    let _ = ready.send(());
                }
            }

            Message::Notice(notice) => {
                if AUTH_FAILED.iter().any(|p| notice.data.starts_with(p)) {
                    log::error!("[{id}] authentication failed: {}", notice.data);
                    self.inner.auth_failed.store(true, Ordering::SeqCst);
                    return;
                }

                if notice.msg_id() == Some("msg_channel_suspended") {
                    let channel = normalize_channel(&notice.channel);
                    if self.lock_channels().pending.remove(&channel) {
                        log::warn!("[{id}] cannot join {channel}: {}", notice.data);
                    }
                    return;
                }

                log::debug!("[{id}] notice in {}: {}", notice.channel, notice.data);
            }

            Message::Join(membership) if self.is_own_nick(&membership.user) => {
                let channel = normalize_channel(&membership.channel);
                log::debug!("[{id}] joined {channel}");
                let mut channels = self.lock_channels();
                channels.pending.remove(&channel);
                channels.joined.insert(channel);
            }

            Message::Part(membership) if self.is_own_nick(&membership.user) => {
                let channel = normalize_channel(&membership.channel);
                log::debug!("[{id}] left {channel}");
                let mut channels = self.lock_channels();
                channels.pending.remove(&channel);
                channels.joined.remove(&channel);
            }

            Message::Join(..) | Message::Part(..) | Message::Raw(..) => {}
        }
    }

    async fn keepalive(self) {
        let id = self.id();
        let idle = self.inner.config.idle_interval();
        let timeout = self.inner.config.pong_timeout();
        let mut activity = self.inner.activity.subscribe();

        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => return,
                changed = activity.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    continue;
                }
                _ = tokio::time::sleep(idle) => {}
            }

            let pong = self.inner.pong.notified();
            tokio::pin!(pong);
            pong.as_mut().enable();

            if let Err(err) = self.send(&format!("PING :{PING_PAYLOAD}")).await {
                log::warn!("[{id}] could not send a ping: {err:#}");
                self.spawn_reconnect();
                return;
            }

            tokio::select! {
                _ = self.inner.shutdown.cancelled() => return,
                _ = &mut pong => {}
                _ = tokio::time::sleep(timeout) => {
                    log::warn!("[{id}] no pong within {timeout:?}");
                    self.spawn_reconnect();
                    return;
                }
            }
        }
    }

    fn is_own_nick(&self, nick: &str) -> bool {
        nick.eq_ignore_ascii_case(&self.inner.config.name)
    }

    fn set_state(&self, state: State) {
        let old = self.inner.state.send_replace(state);
        if old != state {
            log::debug!("[{}] {old:?} -> {state:?}", self.id());
        }
    }

    fn lock_channels(&self) -> MutexGuard<'_, Channels> {
        self.inner
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

struct Reentrancy<'a>(&'a AtomicBool);

impl<'a> Reentrancy<'a> {
    fn enter(flag: &'a AtomicBool) -> Option<Self> {
        (!flag.swap(true, Ordering::SeqCst)).then_some(Self(flag))
    }
}

impl Drop for Reentrancy<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{wait_until, MockDialer};

    fn connection(dialer: &MockDialer, subscriber: Option<Subscriber>) -> Connection {
        Connection::new(
            0,
            Arc::new(Config::default()),
            Arc::new(dialer.clone()),
            subscriber,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn handshake() {
        let dialer = MockDialer::new();
        let conn = connection(&dialer, None);
        assert_eq!(conn.state(), State::Disconnected);

        conn.connect().await.unwrap();
        assert_eq!(conn.state(), State::Ready);

        assert_eq!(
            dialer.sent(),
            [
                "PASS lurk",
                "NICK justinfan12345",
                "CAP REQ :twitch.tv/tags twitch.tv/membership"
            ]
        );
    }

    #[tokio::test]
    async fn auth_failure() {
        let dialer = MockDialer::new().rejecting_login();
        let conn = connection(&dialer, None);

        let err = conn.connect().await.unwrap_err();
        assert!(err.to_string().contains("authentication failed"), "{err}");
        assert_eq!(conn.state(), State::Disconnected);
        assert_eq!(conn.reconnects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dial_failure() {
        let dialer = MockDialer::new().failing(usize::MAX);
        let conn = connection(&dialer, None);

        assert!(conn.connect().await.is_err());
        assert_eq!(dialer.dials(), Config::default().dial_attempts);
        assert_eq!(conn.state(), State::Disconnected);
    }

    #[tokio::test]
    async fn membership_follows_echo() {
        let dialer = MockDialer::new().without_echo();
        let conn = connection(&dialer, None);
        conn.connect().await.unwrap();

        conn.join("#Forsen").await.unwrap();
        assert!(dialer.sent().contains(&String::from("JOIN #forsen")));
        assert!(conn.holds("forsen"));
        assert!(!conn.is_connected_to_channel("forsen"));
        assert_eq!(conn.load(), 1);

        // someone else joining doesn't count
        dialer.inject(":someone!someone@someone.tmi.twitch.tv JOIN #forsen");
        dialer.inject(":JustinFan12345!justinfan12345@justinfan12345.tmi.twitch.tv JOIN #forsen");
        wait_until(|| conn.is_connected_to_channel("forsen")).await;
        assert_eq!(conn.load(), 1);

        conn.part("forsen").await.unwrap();
        assert!(conn.is_connected_to_channel("forsen"));
        dialer.inject(":justinfan12345!justinfan12345@justinfan12345.tmi.twitch.tv PART #forsen");
        wait_until(|| !conn.holds("forsen")).await;
        assert_eq!(conn.load(), 0);
    }

    #[tokio::test]
    async fn empty_channel_is_ignored() {
        let dialer = MockDialer::new();
        let conn = connection(&dialer, None);
        conn.connect().await.unwrap();

        conn.join("#").await.unwrap();
        conn.part("").await.unwrap();
        assert_eq!(dialer.sent().len(), 3);
    }

    #[tokio::test]
    async fn send_without_transport() {
        let dialer = MockDialer::new();
        let conn = connection(&dialer, None);
        assert!(conn.send("JOIN #forsen").await.is_err());
        assert!(conn.join("forsen").await.is_err());
        assert!(!conn.holds("forsen"));
    }

    #[tokio::test]
    async fn suspended_channel_drops_pending() {
        let dialer = MockDialer::new().without_echo();
        let conn = connection(&dialer, None);
        conn.connect().await.unwrap();

        conn.join("banned").await.unwrap();
        assert!(conn.holds("banned"));
        dialer.inject(
            "@msg-id=msg_channel_suspended :tmi.twitch.tv NOTICE #banned :This channel does not exist or has been suspended.",
        );
        wait_until(|| !conn.holds("banned")).await;
    }

    #[tokio::test]
    async fn answers_ping() {
        let dialer = MockDialer::new();
        let conn = connection(&dialer, None);
        conn.connect().await.unwrap();

        dialer.inject("PING :tmi.twitch.tv");
        dialer.inject("PING");
        wait_until(|| dialer.sent().iter().filter(|s| s.starts_with("PONG")).count() == 2).await;

        let pongs = dialer
            .sent()
            .into_iter()
            .filter(|s| s.starts_with("PONG"))
            .collect::<Vec<_>>();
        assert_eq!(pongs, ["PONG :tmi.twitch.tv", "PONG :tmi.twitch.tv"]);
    }

    #[tokio::test]
    async fn subscriber_sees_privmsgs() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let subscriber: Subscriber = Arc::new(move |pm| {
            let _ = tx.send(pm);
        });

        let dialer = MockDialer::new();
        let conn = connection(&dialer, Some(subscriber));
        conn.connect().await.unwrap();

        dialer.inject(
            ":a!a@a.tmi.twitch.tv PRIVMSG #forsen :first\r\n:b!b@b.tmi.twitch.tv PRIVMSG #forsen :\x01ACTION second\x01\r\n",
        );

        let first = rx.recv().await.unwrap();
        assert_eq!((&*first.user, &*first.data), ("a", "first"));
        let second = rx.recv().await.unwrap();
        assert_eq!((&*second.user, &*second.data), ("b", "second"));
        assert!(second.is_action());
    }

    #[tokio::test]
    async fn reconnects_once_on_close() {
        let dialer = MockDialer::new();
        let conn = connection(&dialer, None);
        conn.connect().await.unwrap();

        conn.join("a").await.unwrap();
        conn.join("b").await.unwrap();
        wait_until(|| conn.is_connected_to_channel("a") && conn.is_connected_to_channel("b"))
            .await;

        dialer.close();
        wait_until(|| dialer.dials() == 2 && conn.is_ready()).await;
        wait_until(|| conn.is_connected_to_channel("a") && conn.is_connected_to_channel("b"))
            .await;

        assert_eq!(conn.reconnects(), 1);
        assert_eq!(dialer.dials(), 2);
        let joins = dialer
            .sent()
            .into_iter()
            .filter(|s| s.starts_with("JOIN"))
            .count();
        assert_eq!(joins, 4);
    }

    #[tokio::test]
    async fn membership_is_empty_until_echoed_again() {
        let dialer = MockDialer::new();
        let conn = connection(&dialer, None);
        conn.connect().await.unwrap();
        conn.join("a").await.unwrap();
        wait_until(|| conn.is_connected_to_channel("a")).await;

        let dialer = dialer.without_echo();
        dialer.inject(":tmi.twitch.tv RECONNECT");
        wait_until(|| dialer.dials() == 2 && conn.is_ready()).await;
        wait_until(|| dialer.sent().iter().filter(|s| *s == "JOIN #a").count() == 2).await;

        assert!(!conn.is_connected_to_channel("a"));
        assert!(conn.holds("a"));
        assert_eq!(conn.reconnects(), 1);
    }

    #[tokio::test]
    async fn no_reconnect_after_disconnect() {
        let dialer = MockDialer::new();
        let conn = connection(&dialer, None);
        conn.connect().await.unwrap();
        conn.join("a").await.unwrap();

        conn.disconnect().await;
        assert_eq!(conn.state(), State::Disconnected);
        assert_eq!(conn.load(), 0);
        assert!(conn.reconnect().await.is_err());
        assert!(conn.connect().await.is_err());
        assert_eq!(dialer.dials(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn channels_stay_held_while_reconnecting() {
        let dialer = MockDialer::new();
        let conn = connection(&dialer, None);
        conn.connect().await.unwrap();
        conn.join("a").await.unwrap();
        conn.join("b").await.unwrap();
        wait_until(|| conn.is_connected_to_channel("b")).await;

        let dialer = dialer.failing(1);
        dialer.close();
        wait_until(|| dialer.dials() == 2).await;

        // the first redial failed, the next one is a few seconds out
        assert!(!conn.is_ready());
        assert!(conn.holds("a") && conn.holds("b"));
        assert!(!conn.is_connected_to_channel("a"));
        assert_eq!(conn.load(), 2);

        conn.part("a").await.unwrap();
        assert!(!conn.holds("a"));

        wait_until(|| conn.is_ready() && conn.is_connected_to_channel("b")).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        let sent = dialer.sent();
        assert_eq!(sent.iter().filter(|s| *s == "JOIN #a").count(), 1);
        assert_eq!(sent.iter().filter(|s| *s == "JOIN #b").count(), 2);
        assert!(!sent.iter().any(|s| s.starts_with("PART")));
        assert_eq!(conn.channels(), ["b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_retries_until_shutdown() {
        let dialer = MockDialer::new();
        let shutdown = CancellationToken::new();
        let conn = Connection::new(
            0,
            Arc::new(Config::default()),
            Arc::new(dialer.clone()),
            None,
            shutdown.clone(),
        );
        conn.connect().await.unwrap();
        conn.join("a").await.unwrap();

        let dialer = dialer.failing(usize::MAX);
        dialer.close();

        let attempts = Config::default().dial_attempts;
        tokio::time::sleep(RETRY_DELAY * 8).await;
        wait_until(|| dialer.dials() > 1 + attempts * 2).await;
        assert!(conn.holds("a"));
        assert!(!conn.is_terminated());
        assert_eq!(conn.reconnects(), 1);

        shutdown.cancel();
        wait_until(|| conn.state() == State::Disconnected).await;
        let dials = dialer.dials();
        tokio::time::sleep(RETRY_DELAY * 4).await;
        assert_eq!(dialer.dials(), dials);
    }

    #[tokio::test]
    async fn rejected_login_on_reconnect_gives_up() {
        let dialer = MockDialer::new();
        let conn = connection(&dialer, None);
        conn.connect().await.unwrap();
        conn.join("a").await.unwrap();
        wait_until(|| conn.is_connected_to_channel("a")).await;
        assert!(!conn.is_terminated());

        let dialer = dialer.rejecting_login();
        dialer.close();
        wait_until(|| conn.is_terminated()).await;

        assert_eq!(dialer.dials(), 2);
        assert_eq!(conn.reconnects(), 1);
        // left pending so the pool can move them elsewhere
        assert_eq!(conn.channels(), ["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_pings_when_idle() {
        let dialer = MockDialer::new();
        let conn = connection(&dialer, None);
        conn.connect().await.unwrap();

        tokio::time::sleep(Config::default().idle_interval() + Duration::from_secs(1)).await;
        wait_until(|| dialer.sent().contains(&format!("PING :{PING_PAYLOAD}"))).await;

        tokio::time::sleep(Config::default().pong_timeout() * 2).await;
        assert_eq!(conn.reconnects(), 0);
        assert!(conn.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_reconnects_without_pong() {
        let dialer = MockDialer::new().without_pong();
        let conn = connection(&dialer, None);
        conn.connect().await.unwrap();

        let config = Config::default();
        tokio::time::sleep(config.idle_interval() + config.pong_timeout()).await;
        wait_until(|| conn.reconnects() == 1 && conn.is_ready()).await;
        assert_eq!(dialer.dials(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn activity_defers_keepalive() {
        let dialer = MockDialer::new();
        let conn = connection(&dialer, None);
        conn.connect().await.unwrap();

        let half = Config::default().idle_interval() / 2;
        for _ in 0..4 {
            tokio::time::sleep(half).await;
            dialer.inject(":tmi.twitch.tv NOTICE * :still here");
        }
        tokio::task::yield_now().await;
        assert!(!dialer.sent().iter().any(|s| s.starts_with("PING")));
    }
}

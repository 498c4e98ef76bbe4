use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use futures::channel::mpsc::{unbounded, UnboundedSender};

use crate::{transport::Dialer, Frame, Transport};

type ToClient = UnboundedSender<anyhow::Result<Frame>>;

struct Script {
    echo: bool,
    pong: bool,
    reject_login: bool,
    failures: usize,
    dials: usize,
    sent: Vec<String>,
    sessions: Vec<ToClient>,
}

/// An in-memory chat server.
///
/// Greets after `NICK`, echoes `JOIN`/`PART` and answers `PING` unless told otherwise.
#[derive(Clone)]
pub struct MockDialer {
    script: Arc<Mutex<Script>>,
}

impl Default for MockDialer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDialer {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                echo: true,
                pong: true,
                reject_login: false,
                failures: 0,
                dials: 0,
                sent: vec![],
                sessions: vec![],
            })),
        }
    }

    pub fn without_echo(self) -> Self {
        self.lock().echo = false;
        self
    }

    pub fn without_pong(self) -> Self {
        self.lock().pong = false;
        self
    }

    pub fn rejecting_login(self) -> Self {
        self.lock().reject_login = true;
        self
    }

    pub fn accepting_login(self) -> Self {
        self.lock().reject_login = false;
        self
    }

    /// Fails the next `n` dials
    pub fn failing(self, n: usize) -> Self {
        self.lock().failures = n;
        self
    }

    pub fn dials(&self) -> usize {
        self.lock().dials
    }

    /// Every line any client has sent, across all sessions
    pub fn sent(&self) -> Vec<String> {
        self.lock().sent.clone()
    }

    /// Sends `line` to the most recent session
    pub fn inject(&self, line: &str) {
        self.to_latest(Frame::Text(format!("{line}\r\n")))
    }

    /// Closes the most recent session from the server side
    pub fn close(&self) {
        self.to_latest(Frame::Close)
    }

    fn to_latest(&self, frame: Frame) {
        let script = self.lock();
        let session = script.sessions.last().expect("no session was dialed");
        let _ = session.unbounded_send(Ok(frame));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }
}

fn respond(script: &Mutex<Script>, to_client: &ToClient, nick: &mut Option<String>, line: String) {
    let mut script = script.lock().unwrap();
    let reply = |data: String| {
        let _ = to_client.unbounded_send(Ok(Frame::Text(data)));
    };

    if let Some(name) = line.strip_prefix("NICK ") {
        nick.replace(name.to_string());
        if script.reject_login {
            reply(String::from(
                ":tmi.twitch.tv NOTICE * :Login authentication failed\r\n",
            ));
            let _ = to_client.unbounded_send(Ok(Frame::Close));
        } else {
            reply(format!(
                ":tmi.twitch.tv 001 {name} :Welcome, GLHF!\r\n:tmi.twitch.tv 376 {name} :>\r\n"
            ));
        }
    }

    let nick = nick.as_deref().unwrap_or("unknown");
    for command in ["JOIN", "PART"] {
        if let Some(channel) = line.strip_prefix(command).map(str::trim) {
            if script.echo {
                reply(format!(
                    ":{nick}!{nick}@{nick}.tmi.twitch.tv {command} {channel}\r\n"
                ));
            }
        }
    }

    if let Some(payload) = line.strip_prefix("PING :") {
        if script.pong {
            reply(format!(":tmi.twitch.tv PONG tmi.twitch.tv :{payload}\r\n"));
        }
    }

    script.sent.push(line);
}

#[async_trait::async_trait]
impl Dialer for MockDialer {
    async fn dial(&self, _address: &str) -> anyhow::Result<Transport> {
        let (to_client, stream) = unbounded();
        {
            let mut script = self.lock();
            script.dials += 1;
            if script.failures > 0 {
                script.failures -= 1;
                anyhow::bail!("connection refused");
            }
            script.sessions.push(to_client.clone());
        }

        let script = Arc::clone(&self.script);
        let sink = futures::sink::unfold(None::<String>, move |mut nick, line: String| {
            respond(&script, &to_client, &mut nick, line);
            futures::future::ok::<_, anyhow::Error>(nick)
        });

        Ok(Transport {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

/// Polls `cond` until it holds, panicking after a while.
pub async fn wait_until(cond: impl Fn() -> bool) {
    let poll = async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(30), poll)
        .await
        .expect("condition was never met")
}

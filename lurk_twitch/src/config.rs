use std::time::Duration;

use lurk_config::{Assign, FromEnv, Secret};

pub const TWITCH_WEBSOCKET: &str = "wss://irc-ws.chat.twitch.tv:443";

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    pub address: String,
    pub name: String,
    pub password: Secret<String>,
    /// how many channels a single connection may hold
    pub channel_cap: usize,
    pub idle_interval_secs: u64,
    pub pong_timeout_secs: u64,
    pub dial_attempts: usize,
    /// depth of the merged message queue
    pub queue_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: String::from(TWITCH_WEBSOCKET),
            name: String::from("justinfan12345"),
            password: Secret::from("lurk"),
            channel_cap: 100,
            idle_interval_secs: 4 * 60,
            pong_timeout_secs: 10,
            dial_attempts: 5,
            queue_depth: 50,
        }
    }
}

impl Config {
    pub const fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_interval_secs)
    }

    pub const fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }

    pub fn registration(&self) -> Registration<'_> {
        Registration {
            name: &self.name,
            pass: &self.password,
        }
    }
}

impl FromEnv for Config {
    const KEYS: &'static [(&'static str, Assign<Self>)] = &[
        ("LURK_TWITCH_ADDRESS", |t, v| t.address = v),
        ("LURK_TWITCH_NAME", |t, v| t.name = v),
        ("LURK_TWITCH_PASSWORD", |t, v| t.password = Secret(v)),
    ];
}

#[derive(Copy, Clone)]
pub struct Registration<'a> {
    pub name: &'a str,
    pub pass: &'a str,
}

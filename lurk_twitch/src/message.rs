use std::sync::Arc;

use super::Tags;

/// A parsed line from the server.
///
/// Every variant keeps the line it was parsed from, see [`Message::raw`].
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Privmsg(Privmsg),
    Ping(Ping),
    Pong(Pong),
    Reconnect(Reconnect),
    Notice(Notice),
    EndOfMotd(EndOfMotd),
    Join(Membership),
    Part(Membership),
    Raw(Raw),
}

impl Message {
    pub fn raw(&self) -> &str {
        match self {
            Self::Privmsg(Privmsg { raw, .. })
            | Self::Ping(Ping { raw, .. })
            | Self::Pong(Pong { raw, .. })
            | Self::Reconnect(Reconnect { raw })
            | Self::Notice(Notice { raw, .. })
            | Self::EndOfMotd(EndOfMotd { raw, .. })
            | Self::Join(Membership { raw, .. })
            | Self::Part(Membership { raw, .. })
            | Self::Raw(Raw { raw, .. }) => &**raw,
        }
    }
}

/// A chat line.
#[derive(Debug, Clone, PartialEq)]
pub struct Privmsg {
    pub raw: Arc<str>,
    pub tags: Tags,
    pub user: Arc<str>,
    pub channel: Arc<str>,
    pub data: Arc<str>,
    pub action: bool,
}

impl Privmsg {
    pub fn user_id(&self) -> Option<&str> {
        self.tags.get("user-id").filter(|s| !s.is_empty())
    }

    /// When the server received this, in milliseconds since the unix epoch
    pub fn sent_at(&self) -> Option<u64> {
        self.tags.get_parsed("tmi-sent-ts").ok()
    }

    /// Whether this was sent with `/me`
    pub const fn is_action(&self) -> bool {
        self.action
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ping {
    pub raw: Arc<str>,
    pub payload: Arc<str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pong {
    pub raw: Arc<str>,
    pub payload: Arc<str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconnect {
    pub raw: Arc<str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub raw: Arc<str>,
    pub tags: Tags,
    pub channel: Arc<str>,
    pub data: Arc<str>,
}

impl Notice {
    pub fn msg_id(&self) -> Option<&str> {
        self.tags.get("msg-id")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EndOfMotd {
    pub raw: Arc<str>,
    pub user: Arc<str>,
    pub data: Arc<str>,
}

/// A `JOIN` or `PART` for `user` in `channel`
#[derive(Debug, Clone, PartialEq)]
pub struct Membership {
    pub raw: Arc<str>,
    pub user: Arc<str>,
    pub channel: Arc<str>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Raw {
    pub raw: Arc<str>,
    pub command: Arc<str>,
}

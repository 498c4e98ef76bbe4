use std::sync::Arc;

use super::{
    message::{EndOfMotd, Membership, Notice, Ping, Pong, Privmsg, Raw, Reconnect},
    Message, Tags,
};

/// Parses a single line (without the trailing `\r\n`).
///
/// This never fails: anything that isn't understood becomes [`Message::Raw`].
pub fn parse_line(line: &str) -> Message {
    let raw = Arc::<str>::from(line);
    let Some(Line {
        tags,
        source,
        command,
        params,
    }) = Line::split(line)
    else {
        return Message::Raw(Raw {
            raw,
            command: Arc::from(""),
        });
    };

    let nick = source.map(|s| s.nick).unwrap_or_default();

    match (command, &*params) {
        ("376", [user, data, ..]) => Message::EndOfMotd(EndOfMotd {
            raw,
            user: channel(user),
            data: Arc::from(*data),
        }),

        ("NOTICE", [target, data, ..]) => Message::Notice(Notice {
            raw,
            tags,
            channel: channel(target),
            data: Arc::from(*data),
        }),

        ("PING", params) => Message::Ping(Ping {
            raw,
            payload: match params {
                [payload] => Arc::from(*payload),
                _ => Arc::from(""),
            },
        }),

        ("PONG", params) => Message::Pong(Pong {
            raw,
            payload: match params {
                [_, payload] => Arc::from(*payload),
                _ => Arc::from(""),
            },
        }),

        ("PRIVMSG", [target, data, ..]) => {
            let (data, action) = match unwrap_action(data) {
                Some(data) => (data, true),
                None => (*data, false),
            };
            Message::Privmsg(Privmsg {
                raw,
                tags,
                user: Arc::from(nick),
                channel: channel(target),
                data: Arc::from(data),
                action,
            })
        }

        ("RECONNECT", _) => Message::Reconnect(Reconnect { raw }),

        ("JOIN", [target, ..]) => Message::Join(Membership {
            raw,
            user: Arc::from(nick),
            channel: channel(target),
        }),

        ("PART", [target, ..]) => Message::Part(Membership {
            raw,
            user: Arc::from(nick),
            channel: channel(target),
        }),

        (command, ..) => Message::Raw(Raw {
            raw,
            command: Arc::from(command),
        }),
    }
}

fn channel(param: &str) -> Arc<str> {
    Arc::from(param.strip_prefix('#').unwrap_or(param))
}

// CTCP `/me`: \x01ACTION text\x01
fn unwrap_action(data: &str) -> Option<&str> {
    data.strip_prefix("\x01ACTION ")?.strip_suffix('\x01')
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct Source<'a> {
    nick: &'a str,
    user: Option<&'a str>,
    host: Option<&'a str>,
}

impl<'a> Source<'a> {
    fn parse(token: &'a str) -> Self {
        let token = token.strip_prefix(':').unwrap_or(token);
        match token.split_once('!') {
            Some((nick, tail)) => {
                let (user, host) = match tail.split_once('@') {
                    Some((user, host)) => (user, Some(host)),
                    None => (tail, None),
                };
                Self {
                    nick,
                    user: Some(user),
                    host,
                }
            }
            None => Self {
                nick: token,
                ..Self::default()
            },
        }
    }
}

struct Line<'a> {
    tags: Tags,
    source: Option<Source<'a>>,
    command: &'a str,
    params: Vec<&'a str>,
}

impl<'a> Line<'a> {
    fn split(mut input: &'a str) -> Option<Self> {
        let input = &mut input;

        let tags = if input.starts_with('@') {
            token(input).map(Tags::parse).unwrap_or_default()
        } else {
            Tags::default()
        };

        let source = if input.starts_with(':') {
            token(input).map(Source::parse)
        } else {
            None
        };

        let command = token(input).filter(|s| !s.is_empty())?;

        let mut params = vec![];
        loop {
            if let Some(trailing) = input.strip_prefix(':') {
                params.push(trailing);
                break;
            }
            match token(input) {
                Some(param) => params.push(param),
                None => break,
            }
        }

        Some(Self {
            tags,
            source,
            command,
            params,
        })
    }
}

fn token<'a>(input: &mut &'a str) -> Option<&'a str> {
    if input.is_empty() {
        return None;
    }
    let (head, tail) = input.split_once(' ').unwrap_or((*input, ""));
    *input = tail;
    Some(head)
}

use super::Privmsg;

/// A chat line, normalized for downstream consumers.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChatEvent {
    pub channel: String,
    pub user: String,
    pub text: String,
    pub user_id: Option<String>,
    #[serde(default)]
    pub action: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<u64>,
}

impl From<&Privmsg> for ChatEvent {
    fn from(pm: &Privmsg) -> Self {
        Self {
            channel: pm.channel.to_string(),
            user: pm.user.to_string(),
            text: pm.data.to_string(),
            user_id: pm.user_id().map(ToString::to_string),
            action: pm.is_action(),
            sent_at: pm.sent_at(),
        }
    }
}

/// Lowercases a channel name and strips a leading `#`
pub fn normalize_channel(channel: &str) -> String {
    let channel = channel.trim();
    channel
        .strip_prefix('#')
        .unwrap_or(channel)
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parse_line, Message};

    #[test]
    fn from_privmsg() {
        let Message::Privmsg(pm) = parse_line(
            "@tmi-sent-ts=1666921189173;user-id=145484970 :alyjiaht_t!alyjiaht_t@alyjiaht_t.tmi.twitch.tv PRIVMSG #brian6932 :hi brian",
        ) else {
            panic!("expected a privmsg")
        };

        assert_eq!(
            ChatEvent::from(&pm),
            ChatEvent {
                channel: String::from("brian6932"),
                user: String::from("alyjiaht_t"),
                text: String::from("hi brian"),
                user_id: Some(String::from("145484970")),
                action: false,
                sent_at: Some(1666921189173),
            }
        );
    }

    #[test]
    fn bad_timestamp_is_absent() {
        let Message::Privmsg(pm) =
            parse_line("@tmi-sent-ts=soon :a!a@a.tmi.twitch.tv PRIVMSG #forsen :hi")
        else {
            panic!("expected a privmsg")
        };
        assert_eq!(ChatEvent::from(&pm).sent_at, None);
    }

    #[test]
    fn normalize() {
        assert_eq!(normalize_channel("#Forsen"), "forsen");
        assert_eq!(normalize_channel(" forsen "), "forsen");
        assert_eq!(normalize_channel("#"), "");
        assert_eq!(normalize_channel(""), "");
    }
}

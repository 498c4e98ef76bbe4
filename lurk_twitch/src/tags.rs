use std::{collections::HashMap, str::FromStr};

use anyhow::Context;

/// IRCv3 message tags, kept as a flat map of strings.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Tags {
    map: HashMap<Box<str>, Box<str>>,
}

impl Tags {
    /// Parses a tag token such as `@badges=;color=#FF0000;mod`. The leading
    /// `@` is optional. A key without `=` gets an empty value.
    pub fn parse(input: &str) -> Self {
        let input = input.strip_prefix('@').unwrap_or(input);
        let map = input
            .split(';')
            .filter(|s| !s.is_empty())
            .map(|tag| tag.split_once('=').unwrap_or((tag, "")))
            .map(|(key, val)| (Box::from(key), Box::from(val)))
            .collect();
        Self { map }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|s| &**s)
    }

    pub fn get_parsed<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: FromStr,
        T::Err: Into<anyhow::Error>,
    {
        self.get(key)
            .with_context(|| anyhow::anyhow!("missing tag '{key}'"))?
            .parse::<T>()
            .map_err(Into::into)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        let tags = Tags::parse("@k1=v1;k2=v2");
        assert_eq!(tags.len(), 2);
        assert_eq!(tags.get("k1"), Some("v1"));
        assert_eq!(tags.get("k2"), Some("v2"));
        assert_eq!(tags.get("k3"), None);
    }

    #[test]
    fn empty_values() {
        let tags = Tags::parse("@emotes=;mod;user-type=");
        assert_eq!(tags.get("emotes"), Some(""));
        assert_eq!(tags.get("mod"), Some(""));
        assert_eq!(tags.get("user-type"), Some(""));
    }

    #[test]
    fn value_keeps_later_equals() {
        let tags = Tags::parse("@reply-parent-msg-body=a=b;color=#FF0000");
        assert_eq!(tags.get("reply-parent-msg-body"), Some("a=b"));
        assert_eq!(tags.get("color"), Some("#FF0000"));
    }

    #[test]
    fn parsed() {
        let tags = Tags::parse("@user-id=88492428;mod=x");
        assert_eq!(tags.get_parsed::<u64>("user-id").unwrap(), 88492428);
        assert!(tags.get_parsed::<u64>("mod").is_err());
        assert!(tags.get_parsed::<u64>("room-id").is_err());
    }

    #[test]
    fn nothing() {
        assert!(Tags::parse("@").is_empty());
        assert!(Tags::parse("").is_empty());
    }
}

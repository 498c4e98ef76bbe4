use std::collections::HashSet;

use regex::Regex;

use crate::config;

// well-known bot accounts, matched against the lowercased login
const BOTS: &str = r"bo?t{1,2}(?:(?:ard)?o|\d|_)*$|^(?:fembajs|veryhag|scriptorex|apulxd|qdc26534|linestats|pepegaboat|sierrapine|charlestonbieber|icecreamdatabase|chatvote|localaniki|rewardmore|gorenmu|0weebs|befriendlier|electricbodybuilder|o?bot(?:bear1{3}0|2465|menti|e|nextdoor)|stream(?:elements|labs))$";

/// Decides which users' chat lines get dropped.
#[derive(Debug)]
pub struct BotFilter {
    bots: Option<Regex>,
    ignore: HashSet<String>,
}

impl BotFilter {
    pub fn new(config: &config::Filter) -> anyhow::Result<Self> {
        let bots = config.ignore_bots.then(|| Regex::new(BOTS)).transpose()?;
        let ignore = config
            .ignore
            .iter()
            .map(|name| name.trim().to_ascii_lowercase())
            .filter(|name| !name.is_empty())
            .collect();
        Ok(Self { bots, ignore })
    }

    pub fn is_ignored(&self, user: &str) -> bool {
        let user = user.to_ascii_lowercase();
        self.ignore.contains(&user) || self.bots.as_ref().map_or(false, |re| re.is_match(&user))
    }
}

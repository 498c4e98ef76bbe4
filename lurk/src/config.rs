use std::path::{Path, PathBuf};

use lurk_config::{Assign, FromEnv};

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
#[serde(default)]
pub struct Roster {
    /// where the json list of channels is kept
    pub path: PathBuf,
}

impl Default for Roster {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/channels.json"),
        }
    }
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Control {
    /// the local control listener is only started when this is set
    pub address: Option<String>,
}

impl FromEnv for Control {
    const KEYS: &'static [(&'static str, Assign<Self>)] =
        &[("LURK_CONTROL_ADDRESS", |t, v| t.address = Some(v))];
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Copy, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Log,
    Json,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Sink {
    pub format: Format,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
#[serde(default)]
pub struct Filter {
    pub ignore_bots: bool,
    pub ignore: Vec<String>,
}

impl Default for Filter {
    fn default() -> Self {
        Self {
            ignore_bots: true,
            ignore: vec![],
        }
    }
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub twitch: lurk_twitch::config::Config,
    pub roster: self::Roster,
    pub control: self::Control,
    pub sink: self::Sink,
    pub filter: self::Filter,
}

impl Config {
    /// Loads the file at `path` (or the defaults, if it doesn't exist), then applies the environment.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let mut this: Self = lurk_config::load_from_file(path)?;
        this.twitch.apply_env();
        this.control.apply_env();
        Ok(this)
    }
}

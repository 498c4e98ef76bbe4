use std::path::{Path, PathBuf};

use anyhow::Context as _;
use lurk_twitch::{ChannelRecord, Roster};
use tokio::sync::Mutex;

/// A roster kept as a json array on disk, rewritten after every change.
pub struct JsonRoster {
    path: PathBuf,
    records: Mutex<Vec<ChannelRecord>>,
}

impl JsonRoster {
    pub async fn load(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let records = match tokio::fs::read(&path).await {
            Ok(data) => serde_json::from_slice(&data)
                .with_context(|| format!("cannot parse {}", path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::info!("{} does not exist, starting with no channels", path.display());
                vec![]
            }
            Err(err) => {
                return Err(err).with_context(|| format!("cannot read {}", path.display()));
            }
        };

        log::debug!("loaded {} channels from {}", records.len(), path.display());
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, records: &[ChannelRecord]) -> anyhow::Result<()> {
        if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("cannot create {}", dir.display()))?;
        }

        let data = serde_json::to_vec_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data)
            .await
            .with_context(|| format!("cannot write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("cannot replace {}", self.path.display()))
    }
}

#[async_trait::async_trait]
impl Roster for JsonRoster {
    async fn find_by_name(&self, name: &str) -> anyhow::Result<Option<ChannelRecord>> {
        let records = self.records.lock().await;
        Ok(records.iter().find(|r| r.name == name).cloned())
    }

    async fn list_all(&self) -> anyhow::Result<Vec<ChannelRecord>> {
        Ok(self.records.lock().await.clone())
    }

    async fn save(&self, record: ChannelRecord) -> anyhow::Result<()> {
        let mut records = self.records.lock().await;
        match records.iter_mut().find(|r| r.name == record.name) {
            Some(old) => *old = record,
            None => records.push(record),
        }
        self.persist(&records).await
    }

    async fn remove(&self, name: &str) -> anyhow::Result<bool> {
        let mut records = self.records.lock().await;
        let len = records.len();
        records.retain(|r| r.name != name);
        if records.len() == len {
            return Ok(false);
        }
        self.persist(&records).await?;
        Ok(true)
    }
}

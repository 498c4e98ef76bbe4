use tokio::sync::RwLock;

/// A channel the pool is responsible for.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChannelRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl ChannelRecord {
    pub fn new(name: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            id: None,
        }
    }
}

/// The persisted list of channels to join.
#[async_trait::async_trait]
pub trait Roster
where
    Self: Send + Sync,
{
    async fn find_by_name(&self, name: &str) -> anyhow::Result<Option<ChannelRecord>>;
    async fn list_all(&self) -> anyhow::Result<Vec<ChannelRecord>>;
    async fn save(&self, record: ChannelRecord) -> anyhow::Result<()>;
    async fn remove(&self, name: &str) -> anyhow::Result<bool>;
}

/// A roster that only lives in memory. Listing is in insertion order.
#[derive(Default)]
pub struct MemoryRoster {
    records: RwLock<Vec<ChannelRecord>>,
}

impl MemoryRoster {
    pub fn new(records: impl IntoIterator<Item = ChannelRecord>) -> Self {
        Self {
            records: RwLock::new(records.into_iter().collect()),
        }
    }
}

#[async_trait::async_trait]
impl Roster for MemoryRoster {
    async fn find_by_name(&self, name: &str) -> anyhow::Result<Option<ChannelRecord>> {
        let records = self.records.read().await;
        Ok(records.iter().find(|r| r.name == name).cloned())
    }

    async fn list_all(&self) -> anyhow::Result<Vec<ChannelRecord>> {
        Ok(self.records.read().await.clone())
    }

    async fn save(&self, record: ChannelRecord) -> anyhow::Result<()> {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|r| r.name == record.name) {
            Some(old) => *old = record,
            None => records.push(record),
        }
        Ok(())
    }

    async fn remove(&self, name: &str) -> anyhow::Result<bool> {
        let mut records = self.records.write().await;
        let len = records.len();
        records.retain(|r| r.name != name);
        Ok(records.len() != len)
    }
}

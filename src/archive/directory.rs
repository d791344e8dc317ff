use crate::error::ArchiveError;
use crate::slack::ChatApi;
use anyhow::Result;
use std::collections::BTreeMap;
use tracing::info;

/// Channel name to id map, fetched once per run.
#[derive(Debug, Clone, Default)]
pub struct ChannelDirectory {
    ids: BTreeMap<String, String>,
}

impl ChannelDirectory {
    pub fn resolve(api: &dyn ChatApi) -> Result<Self> {
        let channels = api
            .list_channels()
            .map_err(|err| ArchiveError::DirectoryResolution(format!("{err:#}")))?;
        let ids: BTreeMap<String, String> = channels
            .into_iter()
            .map(|entry| (entry.name, entry.id))
            .collect();
        info!(channels = ids.len(), "resolved channel directory");
        Ok(Self { ids })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn id_for(&self, name: &str) -> Result<&str, ArchiveError> {
        let key = name.trim().trim_start_matches('#');
        self.ids
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| ArchiveError::ChannelNotFound(key.to_string()))
    }
}

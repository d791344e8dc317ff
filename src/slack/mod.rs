pub mod client;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEntry {
    pub name: String,
    pub id: String,
}

/// The chat platform calls an archive run depends on.
///
/// Message payloads stay as raw JSON so snapshots can pass them through
/// unmodified.
pub trait ChatApi {
    fn list_channels(&self) -> Result<Vec<ChannelEntry>>;
    fn get_history(&self, channel_id: &str) -> Result<Vec<Value>>;
    fn get_thread_replies(&self, channel_id: &str, thread_ts: &str) -> Result<Vec<Value>>;
    fn get_user(&self, user_id: &str) -> Result<String>;
}

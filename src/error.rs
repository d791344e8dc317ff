use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("config file not found; looked in: {}", format_candidates(.0))]
    ConfigMissing(Vec<PathBuf>),
    #[error("config file invalid or unreadable: {0}")]
    InvalidConfig(String),
    #[error("channel directory could not be resolved: {0}")]
    DirectoryResolution(String),
    #[error("channel `{0}` is not present in the channel directory")]
    ChannelNotFound(String),
    #[error("chat api call `{method}` failed: {reason}")]
    ChatApi { method: String, reason: String },
    #[error("persisted table `{sheet}` is malformed: {reason}")]
    MalformedPersistedState { sheet: String, reason: String },
    #[error("spreadsheet call failed: {0}")]
    Sheet(String),
    #[error("another archive run holds the lock at {0}")]
    Locked(PathBuf),
}

fn format_candidates(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl ArchiveError {
    pub fn chat_api(method: &str, reason: impl Into<String>) -> Self {
        Self::ChatApi {
            method: method.to_string(),
            reason: reason.into(),
        }
    }

    /// Errors that must stop the whole run rather than a single channel.
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigMissing(_)
                | Self::InvalidConfig(_)
                | Self::DirectoryResolution(_)
                | Self::Locked(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::ArchiveError;
    use std::path::PathBuf;

    #[test]
    fn config_missing_lists_every_candidate() {
        let err = ArchiveError::ConfigMissing(vec![
            PathBuf::from("config.yaml"),
            PathBuf::from("config.toml"),
        ]);
        assert_eq!(
            err.to_string(),
            "config file not found; looked in: config.yaml, config.toml"
        );
    }

    #[test]
    fn only_run_level_kinds_are_run_fatal() {
        assert!(ArchiveError::DirectoryResolution("boom".into()).is_run_fatal());
        assert!(!ArchiveError::ChannelNotFound("general".into()).is_run_fatal());
        assert!(!ArchiveError::chat_api("conversations.history", "not_in_channel").is_run_fatal());
    }
}

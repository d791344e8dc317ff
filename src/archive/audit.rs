use crate::archive::paths::ArchivePaths;
use crate::archive::util::now_epoch_secs;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub at_epoch_secs: u64,
    pub channel: String,
    pub phase: String,
    pub status: String,
    pub message: String,
}

pub fn append_event(
    paths: &ArchivePaths,
    channel: &str,
    phase: &str,
    status: &str,
    message: &str,
) -> Result<()> {
    fs::create_dir_all(&paths.logs_dir)
        .with_context(|| format!("failed to create {}", paths.logs_dir.display()))?;
    let event = AuditEvent {
        at_epoch_secs: now_epoch_secs()?,
        channel: channel.to_string(),
        phase: phase.to_string(),
        status: status.to_string(),
        message: message.to_string(),
    };

    let line = format!("{}\n", serde_json::to_string(&event)?);
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&paths.audit_log)
        .with_context(|| format!("failed to open {}", paths.audit_log.display()))?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn appends_one_json_line_per_event() {
        let tmp = tempdir().expect("tempdir");
        let paths = ArchivePaths::new(tmp.path().to_path_buf());
        append_event(&paths, "general", "fetch", "ok", "12 messages").expect("first");
        append_event(&paths, "general", "merge", "failed", "boom").expect("second");

        let raw = fs::read_to_string(&paths.audit_log).expect("read");
        let events: Vec<AuditEvent> = raw
            .lines()
            .map(|l| serde_json::from_str(l).expect("event"))
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].phase, "merge");
        assert_eq!(events[1].status, "failed");
    }
}

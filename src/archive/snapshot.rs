use crate::archive::paths::ArchivePaths;
use crate::archive::util::{sha256_hex, write_atomic};
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    ConversationHistory,
    ConversationReplies,
}

impl SnapshotKind {
    pub fn type_tag(self) -> &'static str {
        match self {
            Self::ConversationHistory => "conversation_history",
            Self::ConversationReplies => "conversation_replies",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotOutcome {
    pub path: PathBuf,
    pub bytes: usize,
    pub sha256: String,
}

#[derive(Serialize)]
struct SnapshotDocument<'a, T: Serialize> {
    channel_name: &'a str,
    channel_id: &'a str,
    messages: &'a T,
}

fn render<T: Serialize>(doc: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut ser = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
    doc.serialize(&mut ser)
        .context("failed to encode snapshot")?;
    buf.push(b'\n');
    Ok(buf)
}

/// Writes `<output_root>/<run_date>/<channel>_<type_tag>.json`, replacing any
/// snapshot of the same kind already written that day.
pub fn write_snapshot<T: Serialize>(
    paths: &ArchivePaths,
    run_date: &str,
    channel_name: &str,
    channel_id: &str,
    kind: SnapshotKind,
    messages: &T,
) -> Result<SnapshotOutcome> {
    let path = paths.snapshot_file(run_date, channel_name, kind.type_tag());
    let raw = render(&SnapshotDocument {
        channel_name,
        channel_id,
        messages,
    })?;
    write_atomic(&path, &raw)?;

    Ok(SnapshotOutcome {
        bytes: raw.len(),
        sha256: sha256_hex(&raw),
        path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn history_snapshot_has_expected_shape_and_path() {
        let tmp = tempdir().expect("tempdir");
        let paths = ArchivePaths::new(tmp.path().to_path_buf());
        let messages = vec![json!({"ts": "100.000200", "text": "hi", "blocks": [1, 2]})];

        let out = write_snapshot(
            &paths,
            "2024-05-01",
            "general",
            "C1",
            SnapshotKind::ConversationHistory,
            &messages,
        )
        .expect("write");

        assert_eq!(
            out.path,
            tmp.path().join("2024-05-01/general_conversation_history.json")
        );
        let raw = fs::read_to_string(&out.path).expect("read");
        assert!(raw.contains("\n    \"channel_name\": \"general\""));
        assert_eq!(out.bytes, raw.len());

        let parsed: Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(parsed["channel_name"], "general");
        assert_eq!(parsed["channel_id"], "C1");
        assert_eq!(parsed["messages"], json!(messages));
    }

    #[test]
    fn rewriting_same_day_overwrites() {
        let tmp = tempdir().expect("tempdir");
        let paths = ArchivePaths::new(tmp.path().to_path_buf());
        let first = vec![vec![json!({"ts": "1"})]];
        let second: Vec<Vec<Value>> = Vec::new();

        let a = write_snapshot(&paths, "2024-05-01", "dev", "C9", SnapshotKind::ConversationReplies, &first)
            .expect("first");
        let b = write_snapshot(&paths, "2024-05-01", "dev", "C9", SnapshotKind::ConversationReplies, &second)
            .expect("second");

        assert_eq!(a.path, b.path);
        assert_ne!(a.sha256, b.sha256);
        let parsed: Value =
            serde_json::from_str(&fs::read_to_string(&b.path).expect("read")).expect("json");
        assert_eq!(parsed["messages"], json!([]));
    }
}

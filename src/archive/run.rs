use crate::archive::audit;
use crate::archive::directory::ChannelDirectory;
use crate::archive::fetch::{FetchResult, fetch};
use crate::archive::merge::{MergePolicy, merge};
use crate::archive::paths::ArchivePaths;
use crate::archive::snapshot::{SnapshotKind, write_snapshot};
use crate::archive::table::{self, ChannelTable, WindowBounds};
use crate::error::ArchiveError;
use crate::sheets::SheetStore;
use crate::sheets::cell::CellRef;
use crate::slack::ChatApi;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

/// Header row of every canonical channel sheet; rows 1 and 2 hold the marker.
pub const CANONICAL_START_ROW: u32 = 3;
pub const STAGING_SUFFIX: &str = "_new";
pub const UPDATED_MARKER: &str = "Last updated on:";
pub const MERGED_MARKER: &str = "Last merged on:";

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub run_date: String,
    pub staging_start: CellRef,
    pub policy: MergePolicy,
}

/// Everything one channel's steps need, passed along instead of kept on the run.
#[derive(Debug, Clone)]
pub struct ChannelContext {
    pub channel_name: String,
    pub channel_id: String,
    pub fetched_table: ChannelTable,
    pub bounds: Option<WindowBounds>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChannelOutcome {
    pub channel: String,
    pub ok: bool,
    pub fetched: usize,
    pub threads: usize,
    pub merged_rows: usize,
    pub gap_lost: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunOutcome {
    pub run_date: String,
    pub channels: Vec<ChannelOutcome>,
}

impl RunOutcome {
    pub fn failed(&self) -> usize {
        self.channels.iter().filter(|c| !c.ok).count()
    }

    #[cfg(test)]
    pub fn is_ok(&self) -> bool {
        self.failed() == 0
    }
}

pub struct ArchiveRun<'a> {
    pub api: &'a dyn ChatApi,
    pub sheets: &'a dyn SheetStore,
    pub paths: &'a ArchivePaths,
    pub settings: RunSettings,
}

fn channel_key(name: &str) -> String {
    name.trim().trim_start_matches('#').to_string()
}

fn marker(label: &str, date: &str) -> [String; 2] {
    [label.to_string(), date.to_string()]
}

impl ArchiveRun<'_> {
    fn audit(&self, channel: &str, phase: &str, status: &str, message: &str) {
        if let Err(err) = audit::append_event(self.paths, channel, phase, status, message) {
            warn!(channel, phase, error = %format!("{err:#}"), "audit append failed");
        }
    }

    /// Archives every channel in order. Only run-level failures surface as
    /// `Err`; a channel failure is recorded in its outcome and the loop moves on.
    pub fn run(&self, channels: &[String]) -> Result<RunOutcome> {
        let directory = match ChannelDirectory::resolve(self.api) {
            Ok(directory) => directory,
            Err(err) => {
                self.audit("*", "directory", "failed", &format!("{err:#}"));
                return Err(err);
            }
        };

        info!(
            requested = channels.len(),
            known = directory.len(),
            "archiving channels"
        );
        let mut outcome = RunOutcome {
            run_date: self.settings.run_date.clone(),
            channels: Vec::with_capacity(channels.len()),
        };
        for name in channels {
            let channel = channel_key(name);
            match self.archive_channel(&directory, &channel) {
                Ok(done) => {
                    self.audit(&channel, "channel", "ok", &format!("{} rows", done.merged_rows));
                    outcome.channels.push(done);
                }
                Err(err) => {
                    let fatal = err
                        .downcast_ref::<ArchiveError>()
                        .is_some_and(ArchiveError::is_run_fatal);
                    let message = format!("{err:#}");
                    error!(channel = %channel, error = %message, "channel archive failed");
                    self.audit(&channel, "channel", "failed", &message);
                    if fatal {
                        return Err(err);
                    }
                    outcome.channels.push(ChannelOutcome {
                        channel,
                        ok: false,
                        error: Some(message),
                        ..ChannelOutcome::default()
                    });
                }
            }
        }

        info!(
            channels = outcome.channels.len(),
            failed = outcome.failed(),
            "archive run finished"
        );
        Ok(outcome)
    }

    pub fn archive_channel(
        &self,
        directory: &ChannelDirectory,
        channel_name: &str,
    ) -> Result<ChannelOutcome> {
        let channel_id = directory.id_for(channel_name)?.to_string();
        let archive_time = Utc::now();

        let fetched = fetch(self.api, &channel_id)
            .with_context(|| format!("failed to fetch #{channel_name}"))?;
        self.audit(
            channel_name,
            "fetch",
            "ok",
            &format!(
                "{} messages, {} threads",
                fetched.history.len(),
                fetched.threads.len()
            ),
        );
        self.write_snapshots(channel_name, &channel_id, &fetched)?;

        let fetched_table = table::enrich(&fetched.history, archive_time, self.api)?;
        let ctx = ChannelContext {
            channel_name: channel_name.to_string(),
            channel_id,
            bounds: fetched_table.bounds(),
            fetched_table,
        };

        self.stage(&ctx)?;
        let fetched_rows = ctx.fetched_table.len();
        let (merged_rows, gap_lost) = self.merge_canonical(ctx)?;

        Ok(ChannelOutcome {
            channel: channel_name.to_string(),
            ok: true,
            fetched: fetched_rows,
            threads: fetched.threads.len(),
            merged_rows,
            gap_lost,
            error: None,
        })
    }

    fn write_snapshots(&self, channel_name: &str, channel_id: &str, fetched: &FetchResult) -> Result<()> {
        let date = &self.settings.run_date;
        let history = write_snapshot(
            self.paths,
            date,
            channel_name,
            channel_id,
            SnapshotKind::ConversationHistory,
            &fetched.history,
        )?;
        let replies = write_snapshot(
            self.paths,
            date,
            channel_name,
            channel_id,
            SnapshotKind::ConversationReplies,
            &fetched.threads.as_snapshot_messages(),
        )?;
        for out in [&history, &replies] {
            self.audit(
                channel_name,
                "snapshot",
                "ok",
                &format!("{} bytes={} sha256={}", out.path.display(), out.bytes, out.sha256),
            );
        }
        Ok(())
    }

    fn stage(&self, ctx: &ChannelContext) -> Result<()> {
        let sheet = format!("{}{STAGING_SUFFIX}", ctx.channel_name);
        self.sheets
            .write_table(
                &table::to_sheet(&ctx.fetched_table),
                &sheet,
                self.settings.staging_start,
                true,
            )
            .with_context(|| format!("failed to stage {sheet}"))?;
        self.sheets.update_cells(
            &sheet,
            CellRef::new(0, 1),
            &marker(UPDATED_MARKER, &self.settings.run_date),
        )?;
        self.audit(
            &ctx.channel_name,
            "stage",
            "ok",
            &format!(
                "{} rows from {} to {sheet}",
                ctx.fetched_table.len(),
                ctx.channel_id
            ),
        );
        Ok(())
    }

    fn merge_canonical(&self, ctx: ChannelContext) -> Result<(usize, usize)> {
        let sheet = ctx.channel_name.as_str();
        let persisted = self
            .sheets
            .read_table(sheet, CANONICAL_START_ROW)
            .with_context(|| format!("failed to read {sheet}"))?;
        let previous = table::from_sheet(sheet, &persisted)?;

        let outcome = merge(
            previous,
            ctx.fetched_table,
            ctx.bounds.as_ref(),
            self.settings.policy,
        );
        if outcome.gap_lost > 0 {
            warn!(
                channel = sheet,
                gap_lost = outcome.gap_lost,
                "rows between the previous and current windows were dropped"
            );
        }
        info!(
            channel = sheet,
            policy = self.settings.policy.as_str(),
            retained = outcome.retained,
            superseded = outcome.superseded,
            total = outcome.table.len(),
            "merged channel table"
        );

        self.sheets
            .write_table(
                &table::to_sheet(&outcome.table),
                sheet,
                CellRef::new(0, CANONICAL_START_ROW),
                true,
            )
            .with_context(|| format!("failed to write {sheet}"))?;
        self.sheets.update_cells(
            sheet,
            CellRef::new(0, 1),
            &marker(MERGED_MARKER, &self.settings.run_date),
        )?;
        self.audit(
            sheet,
            "merge",
            "ok",
            &format!(
                "{} retained, {} superseded, {} total",
                outcome.retained,
                outcome.superseded,
                outcome.table.len()
            ),
        );
        Ok((outcome.table.len(), outcome.gap_lost))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheets::SheetTable;
    use crate::sheets::local::LocalSheets;
    use crate::slack::ChannelEntry;
    use serde_json::{Value, json};
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::{TempDir, tempdir};

    #[derive(Default)]
    struct FakeSlack {
        channels: Option<Vec<ChannelEntry>>,
        history: BTreeMap<String, Vec<Value>>,
    }

    impl FakeSlack {
        fn with_channel(mut self, name: &str, id: &str, history: Vec<Value>) -> Self {
            self.channels.get_or_insert_with(Vec::new).push(ChannelEntry {
                name: name.to_string(),
                id: id.to_string(),
            });
            self.history.insert(id.to_string(), history);
            self
        }

        /// Listed in the directory, but every history call fails.
        fn with_unreadable_channel(mut self, name: &str, id: &str) -> Self {
            self.channels.get_or_insert_with(Vec::new).push(ChannelEntry {
                name: name.to_string(),
                id: id.to_string(),
            });
            self
        }
    }

    impl ChatApi for FakeSlack {
        fn list_channels(&self) -> Result<Vec<ChannelEntry>> {
            self.channels
                .clone()
                .ok_or_else(|| ArchiveError::chat_api("conversations.list", "ratelimited").into())
        }

        fn get_history(&self, channel_id: &str) -> Result<Vec<Value>> {
            self.history
                .get(channel_id)
                .cloned()
                .ok_or_else(|| ArchiveError::chat_api("conversations.history", "not_in_channel").into())
        }

        fn get_thread_replies(&self, _channel_id: &str, thread_ts: &str) -> Result<Vec<Value>> {
            Ok(vec![json!({"ts": thread_ts, "text": "root"})])
        }

        fn get_user(&self, user_id: &str) -> Result<String> {
            Ok(format!("name-{user_id}"))
        }
    }

    struct Harness {
        tmp: TempDir,
        paths: ArchivePaths,
        sheets: LocalSheets,
    }

    impl Harness {
        fn new() -> Self {
            let tmp = tempdir().expect("tempdir");
            let paths = ArchivePaths::new(tmp.path().join("out"));
            let sheets = LocalSheets::new(tmp.path().join("sheets"), "doc");
            Self { tmp, paths, sheets }
        }

        fn run(&self, api: &FakeSlack, channels: &[&str]) -> Result<RunOutcome> {
            let runner = ArchiveRun {
                api,
                sheets: &self.sheets,
                paths: &self.paths,
                settings: RunSettings {
                    run_date: "2024-05-01".to_string(),
                    staging_start: CellRef::new(0, 3),
                    policy: MergePolicy::Boundary,
                },
            };
            let names: Vec<String> = channels.iter().map(|c| c.to_string()).collect();
            runner.run(&names)
        }

        fn canonical_ts(&self, sheet: &str) -> Vec<String> {
            let table = self.sheets.read_table(sheet, CANONICAL_START_ROW).expect("read");
            let col = table.column("ts").expect("ts column");
            table.rows.iter().map(|r| r[col].clone()).collect()
        }
    }

    fn messages(ts: &[&str]) -> Vec<Value> {
        ts.iter()
            .map(|t| json!({"ts": t, "user": "U1", "text": format!("msg {t}")}))
            .collect()
    }

    #[test]
    fn archives_channel_into_snapshots_staging_and_canonical_sheets() {
        let h = Harness::new();
        let mut history = messages(&["200.000001", "100.5"]);
        history.push(json!({"ts": "150.0", "thread_ts": "100.5", "text": "reply"}));
        let api = FakeSlack::default().with_channel("general", "C1", history);

        let out = h.run(&api, &["#general"]).expect("run");
        assert!(out.is_ok());
        assert_eq!(out.channels[0].fetched, 3);
        assert_eq!(out.channels[0].threads, 1);

        let day = h.paths.snapshot_dir("2024-05-01");
        assert!(day.join("general_conversation_history.json").is_file());
        let replies: Value = serde_json::from_str(
            &fs::read_to_string(day.join("general_conversation_replies.json")).expect("read"),
        )
        .expect("json");
        assert_eq!(replies["messages"][0][0]["ts"], "100.5");

        assert_eq!(h.canonical_ts("general"), vec!["100.5", "150.0", "200.000001"]);
        assert_eq!(h.canonical_ts("general_new"), vec!["100.5", "150.0", "200.000001"]);
        let marker = h.sheets.read_table("general", 1).expect("marker");
        assert_eq!(marker.header, vec!["Last merged on:", "2024-05-01"]);
        let staged_marker = h.sheets.read_table("general_new", 1).expect("marker");
        assert_eq!(staged_marker.header, vec!["Last updated on:", "2024-05-01"]);

        let audit = fs::read_to_string(&h.paths.audit_log).expect("audit");
        assert!(audit.contains("\"phase\":\"merge\""));
    }

    #[test]
    fn second_window_is_merged_at_the_boundary() {
        let h = Harness::new();
        let first = FakeSlack::default().with_channel("general", "C1", messages(&["100", "200", "300"]));
        h.run(&first, &["general"]).expect("first run");

        let second = FakeSlack::default().with_channel("general", "C1", messages(&["250", "400"]));
        let out = h.run(&second, &["general"]).expect("second run");

        assert_eq!(h.canonical_ts("general"), vec!["100", "200", "250", "400"]);
        assert_eq!(out.channels[0].gap_lost, 1);
        assert_eq!(h.canonical_ts("general_new"), vec!["250", "400"]);
    }

    #[test]
    fn rerunning_the_same_window_is_idempotent() {
        let h = Harness::new();
        let api = FakeSlack::default().with_channel("general", "C1", messages(&["100", "200"]));
        h.run(&api, &["general"]).expect("first");
        h.run(&api, &["general"]).expect("second");
        assert_eq!(h.canonical_ts("general"), vec!["100", "200"]);
    }

    #[test]
    fn channel_failures_are_recorded_and_the_run_continues() {
        let h = Harness::new();
        let api = FakeSlack::default().with_channel("random", "C2", messages(&["10"]));

        let out = h.run(&api, &["missing", "random"]).expect("run");
        assert_eq!(out.failed(), 1);
        assert!(!out.channels[0].ok);
        assert!(out.channels[0].error.as_deref().unwrap_or_default().contains("missing"));
        assert!(out.channels[1].ok);
        assert_eq!(h.canonical_ts("random"), vec!["10"]);
    }

    #[test]
    fn history_failure_fails_only_that_channel() {
        let h = Harness::new();
        let api = FakeSlack::default()
            .with_unreadable_channel("broken", "C1")
            .with_channel("random", "C2", messages(&["10", "20"]));

        let out = h.run(&api, &["broken", "random"]).expect("run");
        assert_eq!(out.failed(), 1);
        let err = out.channels[0].error.as_deref().unwrap_or_default();
        assert!(err.contains("conversations.history"));
        assert!(err.contains("not_in_channel"));
        assert!(out.channels[1].ok);
        assert_eq!(h.canonical_ts("random"), vec!["10", "20"]);

        assert!(!h.paths.snapshot_file("2024-05-01", "broken", "conversation_history").exists());
        assert!(h.sheets.read_table("broken_new", 1).expect("read").is_empty());
        assert!(h.sheets.read_table("broken", 1).expect("read").is_empty());
    }

    #[test]
    fn snapshot_write_failure_fails_the_channel_before_any_sheet_write() {
        let h = Harness::new();
        // A regular file where the output directory should be.
        fs::write(&h.paths.output_root, b"not a directory").expect("block output root");
        let api = FakeSlack::default().with_channel("general", "C1", messages(&["100"]));

        let out = h.run(&api, &["general"]).expect("run");
        assert_eq!(out.failed(), 1);
        assert!(out.channels[0].error.as_deref().unwrap_or_default().contains("2024-05-01"));
        assert!(!h.tmp.path().join("sheets").exists());
    }

    #[test]
    fn malformed_canonical_sheet_fails_that_channel_without_touching_it() {
        let h = Harness::new();
        let bogus = SheetTable {
            header: vec!["when".to_string(), "text".to_string()],
            rows: vec![vec!["yesterday".to_string(), "hi".to_string()]],
        };
        h.sheets
            .write_table(&bogus, "general", CellRef::new(0, CANONICAL_START_ROW), true)
            .expect("seed");
        let api = FakeSlack::default().with_channel("general", "C1", messages(&["100"]));

        let out = h.run(&api, &["general"]).expect("run");
        assert!(!out.is_ok());
        assert!(
            out.channels[0]
                .error
                .as_deref()
                .unwrap_or_default()
                .contains("malformed")
        );
        let still = h.sheets.read_table("general", CANONICAL_START_ROW).expect("read");
        assert_eq!(still, bogus);
    }

    #[test]
    fn directory_failure_aborts_the_run() {
        let h = Harness::new();
        let err = h.run(&FakeSlack::default(), &["general"]).expect_err("should fail");
        assert!(matches!(
            err.downcast_ref::<ArchiveError>(),
            Some(ArchiveError::DirectoryResolution(_))
        ));
        assert!(!h.tmp.path().join("out/2024-05-01").exists());
    }
}

use anyhow::Result;
use chrono::Utc;
use tracing::info;

use crate::archive::config::load_config;
use crate::archive::lock::RunLock;
use crate::archive::paths::resolve_paths;
use crate::archive::run::{ArchiveRun, RunSettings};
use crate::commands::CommandReport;
use crate::sheets::build_store;
use crate::slack::client::SlackClient;

pub fn run() -> Result<CommandReport> {
    let (config_path, cfg) = load_config()?;
    let paths = resolve_paths(&cfg);
    let lock = RunLock::acquire(&paths)?;
    info!(
        config = %config_path.display(),
        output_root = %paths.output_root.display(),
        lock = %lock.path().display(),
        channels = cfg.channels_to_archive.len(),
        "starting archive run"
    );

    let api = SlackClient::new(
        &cfg.slack.api_base,
        &cfg.bot_token,
        cfg.slack.history_limit,
        cfg.http.timeout_secs,
    )?;
    let sheets = build_store(&cfg)?;
    let settings = RunSettings {
        run_date: cfg.run_date(Utc::now())?,
        staging_start: cfg.staging_start()?,
        policy: cfg.merge.policy,
    };
    let runner = ArchiveRun {
        api: &api,
        sheets: sheets.as_ref(),
        paths: &paths,
        settings,
    };
    let outcome = runner.run(&cfg.channels_to_archive)?;
    drop(lock);

    let mut report = CommandReport::new("run");
    report.detail(format!("run_date={}", outcome.run_date));
    report.detail(format!("merge_policy={}", cfg.merge.policy.as_str()));
    report.detail(format!("output_root={}", paths.output_root.display()));
    for channel in &outcome.channels {
        match &channel.error {
            None => report.detail(format!(
                "{}: fetched={} threads={} merged_rows={} gap_lost={}",
                channel.channel, channel.fetched, channel.threads, channel.merged_rows, channel.gap_lost
            )),
            Some(err) => report.issue(format!("{}: {err}", channel.channel)),
        }
    }
    Ok(report)
}

use anyhow::Result;
use std::env;

use crate::archive::config::{SheetBackend, load_config};
use crate::archive::lock;
use crate::archive::paths::resolve_paths;
use crate::commands::CommandReport;

mod generated {
    include!(concat!(env!("OUT_DIR"), "/archiver_env_keys.rs"));
}

const CREDENTIAL_KEYS: &[&str] = &["SLACK_BOT_TOKEN", "GSHEET_ACCESS_TOKEN"];

fn env_is_set(key: &str) -> bool {
    env::var(key).is_ok_and(|v| !v.trim().is_empty())
}

pub fn run() -> Result<CommandReport> {
    let mut report = CommandReport::new("status");
    report.detail(format!("build={}", env!("BUILD_UUID")));

    let (config_path, cfg) = match load_config() {
        Ok(loaded) => loaded,
        Err(err) => {
            report.issue(format!("{err:#}"));
            return Ok(report);
        }
    };
    let paths = resolve_paths(&cfg);

    report.detail(format!("config={}", config_path.display()));
    report.detail(format!("channels={}", cfg.channels_to_archive.join(",")));
    report.detail(format!("spreadsheet={}", cfg.gsheet_name));
    match cfg.gsheet.backend {
        SheetBackend::Google => report.detail(format!("backend=google api_base={}", cfg.gsheet.api_base)),
        SheetBackend::Local => report.detail(format!(
            "backend=local dir={}",
            cfg.gsheet
                .local_dir
                .as_deref()
                .map(|d| d.display().to_string())
                .unwrap_or_default()
        )),
    }
    report.detail(format!("merge_policy={}", cfg.merge.policy.as_str()));
    report.detail(format!("output_root={}", paths.output_root.display()));
    report.detail(format!("audit_log={}", paths.audit_log.display()));

    for key in CREDENTIAL_KEYS.iter().chain(generated::GENERATED_ENV_KEYS) {
        if env_is_set(key) {
            report.detail(format!("env {key}=set"));
        }
    }

    if lock::is_held(&paths) {
        report.issue(format!(
            "an archive run is in progress (lock held at {})",
            paths.lock_file.display()
        ));
    }

    Ok(report)
}

use crate::archive::merge::MergePolicy;
use crate::error::ArchiveError;
use crate::sheets::cell::CellRef;
use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILENAMES: &[&str] = &["config.yaml", "config.yml", "config.toml"];
const DEFAULT_SLACK_API_BASE: &str = "https://slack.com/api";
const DEFAULT_SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4";
const MAX_HISTORY_LIMIT: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SheetBackend {
    #[default]
    Google,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GsheetConfig {
    pub cell_start: String,
    pub backend: SheetBackend,
    pub access_token: Option<String>,
    pub api_base: String,
    pub local_dir: Option<PathBuf>,
}

impl Default for GsheetConfig {
    fn default() -> Self {
        Self {
            cell_start: "A3".to_string(),
            backend: SheetBackend::Google,
            access_token: None,
            api_base: DEFAULT_SHEETS_API_BASE.to_string(),
            local_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    pub api_base: String,
    pub history_limit: u32,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_SLACK_API_BASE.to_string(),
            history_limit: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MergeConfig {
    pub policy: MergePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

fn default_output_root() -> PathBuf {
    PathBuf::from("./output")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiverConfig {
    pub channels_to_archive: Vec<String>,
    #[serde(default)]
    pub bot_token: String,
    #[serde(rename = "GSHEET_NAME", alias = "gsheet_name", default)]
    pub gsheet_name: String,
    #[serde(default)]
    pub gsheet: GsheetConfig,
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

impl ArchiverConfig {
    pub fn staging_start(&self) -> Result<CellRef> {
        self.gsheet
            .cell_start
            .parse::<CellRef>()
            .map_err(|err| ArchiveError::InvalidConfig(format!("gsheet.cell_start: {err}")).into())
    }

    /// Calendar day used for snapshot directories and sheet markers.
    pub fn run_date(&self, now: DateTime<Utc>) -> Result<String> {
        match self.timezone.as_deref() {
            Some(name) => {
                let tz = parse_timezone(name)?;
                Ok(now.with_timezone(&tz).format("%Y-%m-%d").to_string())
            }
            None => Ok(now.with_timezone(&Local).format("%Y-%m-%d").to_string()),
        }
    }
}

fn parse_timezone(name: &str) -> Result<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| ArchiveError::InvalidConfig(format!("unknown timezone `{name}`")).into())
}

fn env_non_empty(var: &str) -> Option<String> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

fn env_csv(var: &str) -> Option<Vec<String>> {
    let raw = env_non_empty(var)?;
    let out = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect::<Vec<_>>();
    if out.is_empty() { None } else { Some(out) }
}

fn invalid(msg: impl Into<String>) -> anyhow::Error {
    ArchiveError::InvalidConfig(msg.into()).into()
}

pub fn validate(cfg: &ArchiverConfig) -> Result<()> {
    if cfg.channels_to_archive.is_empty() {
        return Err(invalid("channels_to_archive must list at least one channel"));
    }
    if cfg
        .channels_to_archive
        .iter()
        .any(|name| name.trim().is_empty())
    {
        return Err(invalid("channels_to_archive cannot contain empty names"));
    }
    if cfg.bot_token.trim().is_empty() {
        return Err(invalid("bot_token is required (or set SLACK_BOT_TOKEN)"));
    }
    if cfg.gsheet_name.trim().is_empty() {
        return Err(invalid("GSHEET_NAME is required"));
    }
    let start = cfg.staging_start()?;
    if start.row < 2 {
        return Err(invalid(
            "gsheet.cell_start must start at row 2 or below; row 1 holds the run marker",
        ));
    }
    if cfg.slack.history_limit == 0 || cfg.slack.history_limit > MAX_HISTORY_LIMIT {
        return Err(invalid(format!(
            "slack.history_limit must be between 1 and {MAX_HISTORY_LIMIT}"
        )));
    }
    if cfg.http.timeout_secs == 0 {
        return Err(invalid("http.timeout_secs must be >= 1"));
    }
    if let Some(name) = cfg.timezone.as_deref() {
        parse_timezone(name)?;
    }
    match cfg.gsheet.backend {
        SheetBackend::Local if cfg.gsheet.local_dir.is_none() => {
            return Err(invalid("gsheet.local_dir is required for the local backend"));
        }
        SheetBackend::Google
            if cfg
                .gsheet
                .access_token
                .as_deref()
                .is_none_or(|t| t.trim().is_empty()) =>
        {
            return Err(invalid(
                "gsheet.access_token is required for the google backend (or set GSHEET_ACCESS_TOKEN)",
            ));
        }
        _ => {}
    }
    Ok(())
}

pub fn config_candidates(cwd: &Path) -> Vec<PathBuf> {
    if let Some(custom) = env_non_empty("ARCHIVER_CONFIG_PATH") {
        return vec![PathBuf::from(custom)];
    }
    CONFIG_FILENAMES.iter().map(|name| cwd.join(name)).collect()
}

pub fn resolve_config_path(cwd: &Path) -> Result<PathBuf> {
    let candidates = config_candidates(cwd);
    if let Some(found) = candidates.iter().find(|p| p.is_file()) {
        return Ok(found.clone());
    }
    Err(ArchiveError::ConfigMissing(candidates).into())
}

pub fn parse_config(raw: &str, path: &Path) -> Result<ArchiverConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("yaml");
    let parsed = match ext {
        "yaml" | "yml" => serde_yaml::from_str(raw)
            .map_err(|err| invalid(format!("failed to parse {}: {err}", path.display())))?,
        "toml" => toml::from_str(raw)
            .map_err(|err| invalid(format!("failed to parse {}: {err}", path.display())))?,
        _ => return Err(invalid(format!("unsupported config format: .{ext}"))),
    };
    Ok(parsed)
}

fn apply_env_overrides(cfg: &mut ArchiverConfig) {
    if let Some(token) = env_non_empty("SLACK_BOT_TOKEN") {
        cfg.bot_token = token;
    }
    if let Some(token) = env_non_empty("GSHEET_ACCESS_TOKEN") {
        cfg.gsheet.access_token = Some(token);
    }
    if let Some(root) = env_non_empty("ARCHIVER_OUTPUT_ROOT") {
        cfg.output_root = PathBuf::from(root);
    }
    if let Some(channels) = env_csv("ARCHIVER_CHANNELS") {
        cfg.channels_to_archive = channels;
    }
}

pub fn load_config_from(path: &Path) -> Result<ArchiverConfig> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mut cfg = parse_config(&raw, path)?;
    apply_env_overrides(&mut cfg);
    validate(&cfg)?;
    Ok(cfg)
}

pub fn load_config() -> Result<(PathBuf, ArchiverConfig)> {
    let cwd = env::current_dir().context("failed to resolve working directory")?;
    let path = resolve_config_path(&cwd)?;
    let cfg = load_config_from(&path)?;
    Ok((path, cfg))
}

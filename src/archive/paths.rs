use crate::archive::config::ArchiverConfig;
use crate::archive::util::file_safe_name;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ArchivePaths {
    pub output_root: PathBuf,
    pub logs_dir: PathBuf,
    pub audit_log: PathBuf,
    pub lock_file: PathBuf,
}

impl ArchivePaths {
    pub fn new(output_root: PathBuf) -> Self {
        let logs_dir = output_root.join("logs");
        Self {
            audit_log: logs_dir.join("audit.log"),
            lock_file: output_root.join(".archive.lock"),
            logs_dir,
            output_root,
        }
    }

    pub fn snapshot_dir(&self, run_date: &str) -> PathBuf {
        self.output_root.join(run_date)
    }

    pub fn snapshot_file(&self, run_date: &str, channel_name: &str, type_tag: &str) -> PathBuf {
        self.snapshot_dir(run_date)
            .join(format!("{}_{type_tag}.json", file_safe_name(channel_name)))
    }
}

pub fn resolve_paths(cfg: &ArchiverConfig) -> ArchivePaths {
    ArchivePaths::new(cfg.output_root.clone())
}

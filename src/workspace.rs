//! Run-scoped directories: one for the log, one for measurement files.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::PathsConfig;

pub const LOG_FILE_NAME: &str = "output.log";

#[derive(Debug, Clone)]
pub struct RunPaths {
    pub run_dir: PathBuf,
    pub files_dir: PathBuf,
}

impl RunPaths {
    /// Create both directories under `base`, purge the measurement files of
    /// the previous run and drop its log.
    pub fn prepare(config: &PathsConfig, base: &Path) -> Result<Self> {
        let paths = Self {
            run_dir: base.join(&config.output_run),
            files_dir: base.join(&config.output_files),
        };

        for dir in [&paths.run_dir, &paths.files_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }

        purge_dir(&paths.files_dir)?;

        let log = paths.log_file();
        if log.exists() {
            std::fs::remove_file(&log)
                .with_context(|| format!("failed to remove {}", log.display()))?;
        }

        Ok(paths)
    }

    pub fn log_file(&self) -> PathBuf {
        self.run_dir.join(LOG_FILE_NAME)
    }

}

/// Where the measurement for `ip` lands inside `files_dir`.
pub fn measurement_path(files_dir: &Path, ip: &str) -> PathBuf {
    files_dir.join(ip)
}

fn purge_dir(dir: &Path) -> Result<()> {
    let entries = std::fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        let removed = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        removed.with_context(|| format!("failed to purge {}", path.display()))?;
    }
    Ok(())
}

use crate::error::ArchiveError;
use anyhow::{Context, Result};
use std::env;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ArchivePaths {
    pub base_dir: PathBuf,
    pub out_dir: PathBuf,
    pub data_dir: PathBuf,
    pub files_dir: PathBuf,
    pub avatars_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub token_file: PathBuf,
}

impl ArchivePaths {
    pub fn under(base_dir: &Path) -> Self {
        Self::with_dirs(
            base_dir.to_path_buf(),
            base_dir.join("slack-archive"),
            base_dir.join("backup"),
        )
    }

    fn with_dirs(base_dir: PathBuf, out_dir: PathBuf, backup_dir: PathBuf) -> Self {
        let data_dir = out_dir.join("data");
        let files_dir = out_dir.join("files");
        let avatars_dir = out_dir.join("avatars");
        let token_file = base_dir.join(".token");
        Self {
            base_dir,
            out_dir,
            data_dir,
            files_dir,
            avatars_dir,
            backup_dir,
            token_file,
        }
    }

    pub fn channels_file(&self) -> PathBuf {
        self.data_dir.join("channels.json")
    }

    pub fn users_file(&self) -> PathBuf {
        self.data_dir.join("users.json")
    }

    pub fn archive_data_file(&self) -> PathBuf {
        self.data_dir.join("slack-archive.json")
    }

    pub fn search_file(&self) -> PathBuf {
        self.data_dir.join("search.json")
    }

    pub fn last_run_file(&self) -> PathBuf {
        self.out_dir.join(".last-successful-run")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.out_dir.join(".lock")
    }

    pub fn channel_file(&self, channel_id: &str) -> PathBuf {
        self.data_dir.join(format!("{channel_id}.json"))
    }

    pub fn channel_files_dir(&self, channel_id: &str) -> PathBuf {
        self.files_dir.join(channel_id)
    }

    /// Snapshots copy `out_dir` wholesale and `--fresh` empties it, so the
    /// backup dir has to live outside of it.
    pub fn check_layout(&self) -> Result<()> {
        let out_dir = normalize(&self.out_dir);
        let backup_dir = normalize(&self.backup_dir);
        if backup_dir.starts_with(&out_dir) {
            return Err(ArchiveError::InvalidConfig(format!(
                "backup dir {} must not be inside the output dir {}",
                self.backup_dir.display(),
                self.out_dir.display()
            ))
            .into());
        }
        Ok(())
    }
}

/// Lexical cleanup of `.` and `..`; the directories may not exist yet.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Slack ids (`C0123`, `U0456`, `F0789`) are upper-case alphanumeric; only
/// those are ever used as file names.
pub fn is_safe_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<ArchivePaths> {
    let cwd = env::current_dir().context("current directory could not be resolved")?;
    let base_dir = cwd.join(env_or_default_path("SLACK_ARCHIVE_HOME", cwd.clone()));
    let out_dir = base_dir.join(env_or_default_path(
        "SLACK_ARCHIVE_OUT_DIR",
        base_dir.join("slack-archive"),
    ));
    let backup_dir = base_dir.join(env_or_default_path(
        "SLACK_ARCHIVE_BACKUP_DIR",
        base_dir.join("backup"),
    ));

    let paths = ArchivePaths::with_dirs(base_dir, out_dir, backup_dir);
    paths.check_layout()?;
    Ok(paths)
}

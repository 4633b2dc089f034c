use crate::archive::paths::ArchivePaths;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const BACKUP_PREFIX: &str = "backup-";
const STAMP_FORMAT: &str = "%Y%m%d-%H%M%S-%3f";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupPhase {
    Idle,
    Snapshotted(PathBuf),
    Committed,
    RolledBack(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub keep: usize,
    pub max_age_hours: Option<u64>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep: 3,
            max_age_hours: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    pub name: String,
    pub path: PathBuf,
    pub taken_at: Option<DateTime<Utc>>,
}

/// Owns the pre-run snapshot of the output directory.
///
/// `Idle -> Snapshotted -> Committed` on the normal path. A snapshot left in
/// `Snapshotted` after a failed run stays on disk for `restore`.
#[derive(Debug)]
pub struct BackupGuardian {
    out_dir: PathBuf,
    backup_dir: PathBuf,
    lock_file: PathBuf,
    policy: RetentionPolicy,
    phase: BackupPhase,
}

fn snapshot_name(now: DateTime<Utc>) -> String {
    format!("{BACKUP_PREFIX}{}", now.format(STAMP_FORMAT))
}

fn parse_snapshot_time(name: &str) -> Option<DateTime<Utc>> {
    let stamp = name.strip_prefix(BACKUP_PREFIX)?;
    // Same-millisecond collisions get a `-N` suffix.
    let stamp = stamp.get(..19).unwrap_or(stamp);
    NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

fn dir_is_empty(dir: &Path, skip: &Path) -> Result<bool> {
    if !dir.exists() {
        return Ok(true);
    }
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        if entry?.path() != skip {
            return Ok(false);
        }
    }
    Ok(true)
}

fn copy_dir_recursive(from: &Path, to: &Path, skip: &Path) -> Result<usize> {
    fs::create_dir_all(to).with_context(|| format!("failed to create {}", to.display()))?;
    let mut copied = 0usize;
    for entry in fs::read_dir(from).with_context(|| format!("failed to read {}", from.display()))? {
        let entry = entry?;
        let path = entry.path();
        if path == skip {
            continue;
        }
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copied += copy_dir_recursive(&path, &target, skip)?;
        } else {
            fs::copy(&path, &target).with_context(|| {
                format!("failed to copy {} to {}", path.display(), target.display())
            })?;
            copied += 1;
        }
    }
    Ok(copied)
}

pub fn list_backups(backup_dir: &Path) -> Result<Vec<BackupEntry>> {
    if !backup_dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in fs::read_dir(backup_dir)
        .with_context(|| format!("failed to read {}", backup_dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
            continue;
        };
        if !name.starts_with(BACKUP_PREFIX) {
            continue;
        }
        out.push(BackupEntry {
            taken_at: parse_snapshot_time(&name),
            name,
            path,
        });
    }
    // Names embed a sortable timestamp; newest first.
    out.sort_by(|a, b| b.name.cmp(&a.name));
    Ok(out)
}

impl BackupGuardian {
    pub fn new(paths: &ArchivePaths, policy: RetentionPolicy) -> Self {
        Self {
            out_dir: paths.out_dir.clone(),
            backup_dir: paths.backup_dir.clone(),
            lock_file: paths.lock_file(),
            policy,
            phase: BackupPhase::Idle,
        }
    }

    pub fn phase(&self) -> &BackupPhase {
        &self.phase
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        match &self.phase {
            BackupPhase::Snapshotted(path) => Some(path),
            _ => None,
        }
    }

    /// Copies the output directory into a fresh timestamped snapshot. Does
    /// nothing when there is no archive yet.
    pub fn create_backup(&mut self) -> Result<Option<PathBuf>> {
        if self.phase != BackupPhase::Idle {
            anyhow::bail!("backup already taken for this run ({:?})", self.phase);
        }
        if dir_is_empty(&self.out_dir, &self.lock_file)? {
            debug!(out_dir = %self.out_dir.display(), "nothing to back up");
            return Ok(None);
        }

        fs::create_dir_all(&self.backup_dir)
            .with_context(|| format!("failed to create {}", self.backup_dir.display()))?;
        let base = snapshot_name(Utc::now());
        let mut target = self.backup_dir.join(&base);
        let mut suffix = 1u32;
        while target.exists() {
            target = self.backup_dir.join(format!("{base}-{suffix}"));
            suffix += 1;
        }

        let files = match copy_dir_recursive(&self.out_dir, &target, &self.lock_file) {
            Ok(files) => files,
            Err(err) => {
                if let Err(cleanup) = fs::remove_dir_all(&target) {
                    warn!(backup = %target.display(), error = %cleanup, "failed to remove partial backup");
                }
                return Err(err);
            }
        };
        info!(backup = %target.display(), files, "created backup");
        self.phase = BackupPhase::Snapshotted(target.clone());
        Ok(Some(target))
    }

    /// Discards this run's snapshot.
    pub fn delete_backup(&mut self) -> Result<()> {
        if let BackupPhase::Snapshotted(path) = &self.phase {
            if path.exists() {
                fs::remove_dir_all(path)
                    .with_context(|| format!("failed to remove {}", path.display()))?;
            }
            debug!(backup = %path.display(), "deleted backup");
        }
        self.phase = BackupPhase::Committed;
        Ok(())
    }

    /// Retention sweep over every snapshot in the backup directory. The
    /// snapshot still owned by this run is never touched.
    pub fn delete_older_backups(&self) -> Result<usize> {
        let now = Utc::now();
        let current = self.snapshot_path();
        let mut removed = 0usize;

        for (idx, entry) in list_backups(&self.backup_dir)?.into_iter().enumerate() {
            if current == Some(entry.path.as_path()) {
                continue;
            }
            let too_many = idx >= self.policy.keep;
            let too_old = match (self.policy.max_age_hours, entry.taken_at) {
                (Some(hours), Some(taken_at)) => {
                    now.signed_duration_since(taken_at).num_hours() >= hours as i64
                }
                _ => false,
            };
            if !too_many && !too_old {
                continue;
            }
            fs::remove_dir_all(&entry.path)
                .with_context(|| format!("failed to remove {}", entry.path.display()))?;
            removed += 1;
        }

        if removed > 0 {
            info!(removed, keep = self.policy.keep, "pruned old backups");
        }
        Ok(removed)
    }

    /// Replaces the output directory with `snapshot`. Only reached through
    /// the manual `restore` command.
    pub fn restore_from(&mut self, snapshot: &Path) -> Result<usize> {
        if !snapshot.is_dir() {
            anyhow::bail!("backup snapshot not found: {}", snapshot.display());
        }
        if self.out_dir.exists() {
            for entry in fs::read_dir(&self.out_dir)
                .with_context(|| format!("failed to read {}", self.out_dir.display()))?
            {
                let path = entry?.path();
                if path == self.lock_file {
                    continue;
                }
                if path.is_dir() {
                    fs::remove_dir_all(&path)
                } else {
                    fs::remove_file(&path)
                }
                .with_context(|| format!("failed to remove {}", path.display()))?;
            }
        }
        let files = copy_dir_recursive(snapshot, &self.out_dir, &self.lock_file)?;
        info!(backup = %snapshot.display(), files, "restored backup");
        self.phase = BackupPhase::RolledBack(snapshot.to_path_buf());
        Ok(files)
    }
}

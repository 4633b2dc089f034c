use anyhow::Result;

use crate::archive::backup::{BackupGuardian, list_backups};
use crate::archive::config::load_config;
use crate::archive::lock::ArchiveLock;
use crate::archive::paths::resolve_paths;
use crate::commands::CommandReport;

/// Copies a snapshot back over the output directory. The snapshot itself
/// is left in place.
pub fn run(name: Option<&str>) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let cfg = load_config(&paths)?;
    let mut report = CommandReport::new("restore");

    let backups = list_backups(&paths.backup_dir)?;
    let chosen = match name {
        Some(name) => backups.iter().find(|b| b.name == name),
        None => backups.first(),
    };
    let Some(entry) = chosen else {
        match name {
            Some(name) => report.issue(format!(
                "backup {name} not found in {}",
                paths.backup_dir.display()
            )),
            None => report.issue(format!("no backups found in {}", paths.backup_dir.display())),
        }
        return Ok(report);
    };

    let _lock = ArchiveLock::acquire(&paths.lock_file())?;
    let mut guardian = BackupGuardian::new(&paths, cfg.backup.retention());
    let files = guardian.restore_from(&entry.path)?;

    report.detail(format!("restored={}", entry.name));
    report.detail(format!("files={files}"));
    report.detail(format!("out_dir={}", paths.out_dir.display()));
    Ok(report)
}

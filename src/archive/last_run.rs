use crate::archive::paths::ArchivePaths;
use anyhow::{Context, Result};
use chrono::{DateTime, Local, SecondsFormat, Utc};
use std::fs;

/// Reads the last-successful-run marker. A missing or unparseable marker just
/// means no run is known.
pub fn read(paths: &ArchivePaths) -> Option<DateTime<Utc>> {
    let raw = fs::read_to_string(paths.last_run_file()).ok()?;
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn write(paths: &ArchivePaths, at: DateTime<Utc>) -> Result<()> {
    let file = paths.last_run_file();
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(&file, at.to_rfc3339_opts(SecondsFormat::Millis, true))
        .with_context(|| format!("failed to write {}", file.display()))?;
    Ok(())
}

pub fn greeting(paths: &ArchivePaths) -> String {
    match read(paths) {
        Some(at) => format!(
            "Welcome to slack-archive. Last successful run: {}",
            at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        ),
        None => "Welcome to slack-archive".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn marker_round_trips_as_iso_8601() {
        let tmp = tempdir().expect("tempdir");
        let paths = ArchivePaths::under(tmp.path());
        let at = DateTime::parse_from_rfc3339("2024-05-01T12:30:00.250Z")
            .expect("parse")
            .with_timezone(&Utc);
        write(&paths, at).expect("write");

        let raw = fs::read_to_string(paths.last_run_file()).expect("read");
        assert_eq!(raw, "2024-05-01T12:30:00.250Z");
        assert_eq!(read(&paths), Some(at));
        assert!(greeting(&paths).contains("Last successful run"));
    }

    #[test]
    fn malformed_marker_is_ignored() {
        let tmp = tempdir().expect("tempdir");
        let paths = ArchivePaths::under(tmp.path());
        assert_eq!(read(&paths), None);

        fs::create_dir_all(&paths.out_dir).expect("mkdir");
        fs::write(paths.last_run_file(), "yesterday-ish").expect("write");
        assert_eq!(read(&paths), None);
        assert_eq!(greeting(&paths), "Welcome to slack-archive");
    }
}

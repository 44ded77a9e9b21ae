use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use glob::Pattern;
use tracing::debug;
use walkdir::WalkDir;

const LOCAL_TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

/// Epoch seconds; bare values are read in the local timezone, 0 when unparseable.
pub fn parse_timestamp(text: &str) -> i64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return parsed.timestamp();
    }

    for format in LOCAL_TIMESTAMP_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format)
            && let Some(local) = Local.from_local_datetime(&naive).earliest()
        {
            return local.timestamp();
        }
    }

    debug!(timestamp = trimmed, "unparseable timestamp");
    0
}

pub fn file_mod_time(path: &Path) -> i64 {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map(system_time_to_epoch)
        .unwrap_or(0)
}

/// Walks `root` recursively and returns the newest regular file whose name
/// matches `pattern` (shell glob, e.g. `*.jsonl`).
///
/// Equal modification times keep whichever file the walk yielded first.
pub fn find_most_recent_file(root: &Path, pattern: &str) -> Option<PathBuf> {
    let matcher = match Pattern::new(pattern) {
        Ok(matcher) => matcher,
        Err(err) => {
            debug!(pattern, error = %err, "invalid file pattern");
            return None;
        }
    };
    if !root.is_dir() {
        return None;
    }

    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for entry in WalkDir::new(root)
        .into_iter()
        .filter_map(std::result::Result::ok)
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if !matcher.matches(name) {
            continue;
        }
        let Some(modified) = entry.metadata().ok().and_then(|meta| meta.modified().ok()) else {
            continue;
        };
        let is_newer = newest
            .as_ref()
            .is_none_or(|(current, _)| modified > *current);
        if is_newer {
            newest = Some((modified, entry.into_path()));
        }
    }

    newest.map(|(_, path)| path)
}

pub fn find_file_named(root: &Path, file_name: &str) -> Option<PathBuf> {
    if file_name.is_empty() || !root.is_dir() {
        return None;
    }
    WalkDir::new(root)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .find(|entry| entry.file_type().is_file() && entry.file_name() == file_name)
        .map(walkdir::DirEntry::into_path)
}

pub fn is_regular_file(path: &Path) -> bool {
    fs::metadata(path).map(|meta| meta.is_file()).unwrap_or(false)
}

fn system_time_to_epoch(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_secs() as i64,
        Err(before) => -(before.duration().as_secs() as i64),
    }
}

#[cfg(test)]
pub(crate) fn set_mtime(path: &Path, epoch_secs: u64) {
    use std::time::Duration;

    let file = fs::File::options()
        .write(true)
        .open(path)
        .expect("open for mtime");
    file.set_modified(UNIX_EPOCH + Duration::from_secs(epoch_secs))
        .expect("set mtime");
}

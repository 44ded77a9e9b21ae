use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;
use walkdir::WalkDir;

use crate::platform::{find_file_named, find_most_recent_file, is_regular_file};

const TRANSCRIPT_PATTERN: &str = "*.jsonl";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    ExplicitPath,
    SessionId,
    ProjectDirectory,
    MostRecent,
}

impl ResolutionSource {
    pub fn label(self) -> &'static str {
        match self {
            Self::ExplicitPath => "explicit transcript path",
            Self::SessionId => "session id lookup",
            Self::ProjectDirectory => "newest in project directory",
            Self::MostRecent => "newest transcript overall",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ResolvedTranscript {
    pub path: PathBuf,
    pub source: ResolutionSource,
}

#[derive(Debug, Clone)]
pub struct SessionResolver {
    search_root: PathBuf,
}

impl SessionResolver {
    pub fn new(search_root: impl Into<PathBuf>) -> Self {
        Self {
            search_root: search_root.into(),
        }
    }

    pub fn search_root(&self) -> &Path {
        &self.search_root
    }

    /// Resolves the current transcript. Steps run in order and the first hit
    /// wins: explicit path, `{session_id}.jsonl`, newest transcript in a
    /// directory named after `working_dir`, newest transcript anywhere.
    pub fn resolve(
        &self,
        session_id: Option<&str>,
        transcript_path: Option<&Path>,
        working_dir: &Path,
    ) -> Option<ResolvedTranscript> {
        if let Some(path) = transcript_path
            && is_regular_file(path)
        {
            return Some(ResolvedTranscript {
                path: path.to_path_buf(),
                source: ResolutionSource::ExplicitPath,
            });
        }
        if let Some(path) = transcript_path {
            debug!(path = %path.display(), "explicit transcript path is not a file");
        }

        if !self.search_root.is_dir() {
            debug!(root = %self.search_root.display(), "transcript search root missing");
            return None;
        }

        if let Some(id) = session_id.map(str::trim).filter(|id| !id.is_empty())
            && let Some(path) = find_file_named(&self.search_root, &format!("{id}.jsonl"))
        {
            return Some(ResolvedTranscript {
                path,
                source: ResolutionSource::SessionId,
            });
        }

        if let Some(path) = self.newest_in_project_dirs(working_dir) {
            return Some(ResolvedTranscript {
                path,
                source: ResolutionSource::ProjectDirectory,
            });
        }

        find_most_recent_file(&self.search_root, TRANSCRIPT_PATTERN).map(|path| {
            ResolvedTranscript {
                path,
                source: ResolutionSource::MostRecent,
            }
        })
    }

    fn newest_in_project_dirs(&self, working_dir: &Path) -> Option<PathBuf> {
        let key = project_key(working_dir);
        if key.is_empty() {
            return None;
        }

        WalkDir::new(&self.search_root)
            .min_depth(1)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_dir())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.contains(&key))
            })
            .find_map(|entry| find_most_recent_file(entry.path(), TRANSCRIPT_PATTERN))
    }
}

pub fn project_key(working_dir: &Path) -> String {
    working_dir
        .to_string_lossy()
        .chars()
        .map(|ch| if ch == '/' || ch == '\\' { '-' } else { ch })
        .collect()
}

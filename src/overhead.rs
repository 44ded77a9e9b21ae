use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::config::{Calibration, Environment};
use crate::platform::is_regular_file;

const MEMORY_FILE_NAMES: [&str; 2] = ["CLAUDE.md", "CLAUDE.local.md"];
const MCP_CONFIG_FILE_NAMES: [&str; 4] = [
    "settings.json",
    "settings.local.json",
    "mcp.json",
    ".mcp.json",
];
const GLOBAL_MCP_DOTFILES: [&str; 2] = [".claude.json", ".mcp.json"];
const SETTINGS_FILE_NAMES: [&str; 2] = ["settings.json", "settings.local.json"];
const ANCESTOR_DEPTH: usize = 3;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct Overhead {
    pub system_prompt: u64,
    pub system_tools: u64,
    pub mcp: u64,
    pub memory: u64,
    pub settings: u64,
    pub mcp_matches: usize,
    pub memory_files: Vec<PathBuf>,
    pub settings_files: Vec<PathBuf>,
}

impl Overhead {
    pub fn total(&self) -> u64 {
        [self.system_tools, self.mcp, self.memory, self.settings]
            .into_iter()
            .fold(self.system_prompt, u64::saturating_add)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OverheadScope<'a> {
    pub working_dir: &'a Path,
    pub project_dir: &'a Path,
    pub home_dir: &'a Path,
    pub claude_dir: &'a Path,
}

impl<'a> From<&'a Environment> for OverheadScope<'a> {
    fn from(env: &'a Environment) -> Self {
        Self {
            working_dir: &env.working_dir,
            project_dir: &env.project_dir,
            home_dir: &env.home_dir,
            claude_dir: &env.claude_dir,
        }
    }
}

pub fn compute_overhead(scope: OverheadScope<'_>, calibration: &Calibration) -> Overhead {
    let mcp_matches = count_mcp_evidence(scope);
    let memory_files = discover_memory_files(scope);
    let settings_files = discover_settings_files(scope);

    Overhead {
        system_prompt: calibration.system_prompt,
        system_tools: calibration.system_tools,
        mcp: if mcp_matches > 0 { calibration.mcp } else { 0 },
        memory: (memory_files.len() as u64).saturating_mul(calibration.memory_per_file),
        settings: (settings_files.len() as u64).saturating_mul(calibration.settings_per_file),
        mcp_matches,
        memory_files,
        settings_files,
    }
}

fn count_mcp_evidence(scope: OverheadScope<'_>) -> usize {
    let config_dirs = [
        scope.project_dir.join(".claude"),
        scope.working_dir.join(".claude"),
        scope.claude_dir.to_path_buf(),
    ];

    let mut matches = 0;
    for dir in &config_dirs {
        for name in MCP_CONFIG_FILE_NAMES {
            let path = dir.join(name);
            if mentions_mcp(&path) {
                debug!(path = %path.display(), "mcp config detected");
                matches += 1;
            }
        }
    }
    for name in GLOBAL_MCP_DOTFILES {
        if is_regular_file(&scope.home_dir.join(name)) {
            matches += 1;
        }
    }
    matches
}

fn mentions_mcp(path: &Path) -> bool {
    if !is_regular_file(path) {
        return false;
    }
    match fs::read_to_string(path) {
        Ok(raw) => raw.to_ascii_lowercase().contains("mcp"),
        Err(err) => {
            debug!(path = %path.display(), error = %err, "unreadable config file");
            false
        }
    }
}

// The same file reached through two legs (e.g. project directory and
// ancestor walk) is counted twice.
fn discover_memory_files(scope: OverheadScope<'_>) -> Vec<PathBuf> {
    memory_search_dirs(scope)
        .iter()
        .flat_map(|dir| MEMORY_FILE_NAMES.iter().map(move |name| dir.join(name)))
        .filter(|path| is_regular_file(path))
        .collect()
}

fn memory_search_dirs(scope: OverheadScope<'_>) -> Vec<PathBuf> {
    let mut dirs = vec![
        scope.claude_dir.to_path_buf(),
        scope.project_dir.to_path_buf(),
        scope.project_dir.join(".claude"),
    ];
    dirs.extend(
        scope
            .working_dir
            .ancestors()
            .skip(1)
            .take(ANCESTOR_DEPTH)
            .map(Path::to_path_buf),
    );
    dirs
}

fn discover_settings_files(scope: OverheadScope<'_>) -> Vec<PathBuf> {
    let dirs = [scope.claude_dir.to_path_buf(), scope.project_dir.join(".claude")];
    dirs.iter()
        .flat_map(|dir| SETTINGS_FILE_NAMES.iter().map(move |name| dir.join(name)))
        .filter(|path| is_regular_file(path))
        .collect()
}

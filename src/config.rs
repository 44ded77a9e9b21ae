use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::input::StatusInput;

const DEFAULT_CHARS_PER_TOKEN: u64 = 125;
const DEFAULT_STDIN_TIMEOUT_MS: u64 = 500;
const DEFAULT_PREVIEW_CHARS: usize = 40;
pub const DEFAULT_FORMAT: &str = "default";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Calibration {
    pub system_prompt: u64,
    pub system_tools: u64,
    pub mcp: u64,
    pub memory_per_file: u64,
    pub settings_per_file: u64,
    pub message_overlap: u64,
    pub sanity_ceiling: u64,
    pub fallback_capacity: u64,
    pub large_transcript_bytes: u64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            system_prompt: 3_100,
            system_tools: 11_800,
            mcp: 10_900,
            memory_per_file: 1_600,
            settings_per_file: 500,
            message_overlap: 6_000,
            sanity_ceiling: 400_000,
            fallback_capacity: 200_000,
            large_transcript_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub format: String,
    pub color: bool,
    pub message_preview_chars: usize,
    pub chars_per_token: u64,
    pub stdin_timeout_ms: u64,
    pub calibration: Calibration,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            format: DEFAULT_FORMAT.to_string(),
            color: true,
            message_preview_chars: DEFAULT_PREVIEW_CHARS,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            stdin_timeout_ms: DEFAULT_STDIN_TIMEOUT_MS,
            calibration: Calibration::default(),
        }
    }
}

impl StatusConfig {
    pub fn load() -> Result<Self> {
        let mut cfg = Self::load_from(&config_path())?;
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env_overrides();
        cfg
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut parsed: StatusConfig = serde_json::from_str(&raw)
            .with_context(|| format!("invalid JSON in {}", path.display()))?;
        parsed.normalize();
        Ok(parsed)
    }

    pub fn stdin_timeout(&self) -> Duration {
        Duration::from_millis(self.stdin_timeout_ms)
    }

    fn apply_env_overrides(&mut self) {
        self.chars_per_token = env_u64("CLAUDE_STATUSLINE_CHARS_PER_TOKEN", self.chars_per_token);
        self.stdin_timeout_ms =
            env_u64("CLAUDE_STATUSLINE_STDIN_TIMEOUT_MS", self.stdin_timeout_ms);
        if let Some(format) = env_string("CLAUDE_STATUSLINE_FORMAT") {
            self.format = format;
        }
        if env::var_os("NO_COLOR").is_some_and(|value| !value.is_empty()) {
            self.color = false;
        }
    }

    fn normalize(&mut self) -> bool {
        let mut changed = false;

        let trimmed = self.format.trim();
        if trimmed.is_empty() {
            self.format = DEFAULT_FORMAT.to_string();
            changed = true;
        } else if trimmed != self.format {
            self.format = trimmed.to_string();
            changed = true;
        }
        if self.chars_per_token == 0 {
            self.chars_per_token = DEFAULT_CHARS_PER_TOKEN;
            changed = true;
        }
        if self.message_preview_chars == 0 {
            self.message_preview_chars = DEFAULT_PREVIEW_CHARS;
            changed = true;
        }
        if self.calibration.fallback_capacity == 0 {
            self.calibration.fallback_capacity = Calibration::default().fallback_capacity;
            changed = true;
        }
        if self.calibration.large_transcript_bytes == 0 {
            self.calibration.large_transcript_bytes =
                Calibration::default().large_transcript_bytes;
            changed = true;
        }

        changed
    }
}

#[derive(Debug, Clone)]
pub struct Environment {
    pub home_dir: PathBuf,
    pub claude_dir: PathBuf,
    pub search_root: PathBuf,
    pub working_dir: PathBuf,
    pub project_dir: PathBuf,
    pub now: i64,
}

impl Environment {
    pub fn resolve(input: &StatusInput) -> Self {
        let home_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let claude_dir = claude_home(&home_dir);
        let working_dir = input
            .working_dir()
            .map(PathBuf::from)
            .or_else(|| env_string("PWD").map(PathBuf::from))
            .or_else(|| env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let project_dir = env_string("CLAUDE_PROJECT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| working_dir.clone());

        Self {
            search_root: claude_dir.join("projects"),
            home_dir,
            claude_dir,
            working_dir,
            project_dir,
            now: Utc::now().timestamp(),
        }
    }

    pub fn rooted(home_dir: &Path, working_dir: &Path, now: i64) -> Self {
        let claude_dir = home_dir.join(".claude");
        Self {
            search_root: claude_dir.join("projects"),
            home_dir: home_dir.to_path_buf(),
            claude_dir,
            working_dir: working_dir.to_path_buf(),
            project_dir: working_dir.to_path_buf(),
            now,
        }
    }

    pub fn project_name(&self) -> String {
        self.working_dir
            .file_name()
            .and_then(|name| name.to_str())
            .map(ToString::to_string)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "unknown-project".to_string())
    }
}

pub fn claude_home(home_dir: &Path) -> PathBuf {
    env_string("CLAUDE_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| home_dir.join(".claude"))
}

pub fn config_path() -> PathBuf {
    if let Some(custom) = env_string("CLAUDE_STATUSLINE_CONFIG") {
        return PathBuf::from(custom);
    }
    let home_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    claude_home(&home_dir).join("statusline-config.json")
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn env_string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::platform::{file_mod_time, is_regular_file, parse_timestamp};

const READ_CHUNK_BYTES: u64 = 64 * 1024;

const FILTERED_MARKERS: [&str; 6] = [
    "<local-command-stdout>",
    "<local-command-stderr>",
    "<command-name>",
    "<command-message>",
    "<system-reminder>",
    "<tool_use_error>",
];

const AUTO_RESPONSE_PREFIXES: [&str; 4] = [
    "[Request interrupted by user",
    "Caveat: The messages below were generated by the user while running local commands",
    "This session is being continued from a previous conversation",
    "No response requested.",
];

/// Lines of a seekable source, last line first.
///
/// Reads fixed-size chunks backwards from the end. Each byte is scanned for
/// a newline once; a line spanning several chunks is kept as segments and
/// joined only when complete. With a scan limit, reading stops that many
/// bytes before the end and the cut-off line is dropped.
pub struct ReverseLines<R> {
    reader: R,
    position: u64,
    floor: u64,
    chunk_bytes: u64,
    chunk: Vec<u8>,
    cursor: usize,
    segments: Vec<Vec<u8>>,
    finished: bool,
}

impl<R: Read + Seek> ReverseLines<R> {
    pub fn new(reader: R) -> io::Result<Self> {
        Self::with_chunk_size(reader, READ_CHUNK_BYTES)
    }

    pub fn with_chunk_size(mut reader: R, chunk_bytes: u64) -> io::Result<Self> {
        let position = reader.seek(SeekFrom::End(0))?;
        Ok(Self {
            reader,
            position,
            floor: 0,
            chunk_bytes: chunk_bytes.max(1),
            chunk: Vec::new(),
            cursor: 0,
            segments: Vec::new(),
            finished: false,
        })
    }

    pub fn with_scan_limit(mut self, max_bytes: u64) -> Self {
        self.floor = self.position.saturating_sub(max_bytes);
        self
    }

    fn read_previous_chunk(&mut self) -> io::Result<()> {
        let len = (self.position - self.floor).min(self.chunk_bytes);
        let start = self.position - len;
        self.reader.seek(SeekFrom::Start(start))?;
        let mut chunk = vec![0u8; len as usize];
        self.reader.read_exact(&mut chunk)?;
        self.cursor = chunk.len();
        self.chunk = chunk;
        self.position = start;
        Ok(())
    }

    fn take_line(&mut self, start: usize) -> String {
        let mut bytes = self.chunk[start..self.cursor].to_vec();
        for segment in self.segments.drain(..).rev() {
            bytes.extend_from_slice(&segment);
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl<R: Read + Seek> Iterator for ReverseLines<R> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished {
                return None;
            }
            if let Some(newline) = self.chunk[..self.cursor]
                .iter()
                .rposition(|byte| *byte == b'\n')
            {
                let line = self.take_line(newline + 1);
                self.cursor = newline;
                return Some(line);
            }
            if self.cursor > 0 {
                self.chunk.truncate(self.cursor);
                self.segments.push(std::mem::take(&mut self.chunk));
                self.cursor = 0;
            }
            if self.position == self.floor {
                self.finished = true;
                if self.floor > 0 {
                    debug!(floor = self.floor, "reverse scan limit reached");
                    return None;
                }
                if self.segments.is_empty() {
                    return None;
                }
                return Some(self.take_line(0));
            }
            if let Err(err) = self.read_previous_chunk() {
                debug!(error = %err, "reverse transcript read failed");
                self.finished = true;
                return None;
            }
        }
    }
}

/// Parsed transcript records, most recent first, reading at most
/// `scan_limit` bytes back from the end. Blank and malformed lines are
/// skipped.
pub fn records_newest_first(
    path: &Path,
    scan_limit: u64,
) -> Result<impl Iterator<Item = Value>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open transcript {}", path.display()))?;
    let lines = ReverseLines::new(file)
        .with_context(|| format!("failed to seek transcript {}", path.display()))?
        .with_scan_limit(scan_limit);
    Ok(lines.filter_map(|line| {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        serde_json::from_str::<Value>(trimmed).ok()
    }))
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MessageOrigin {
    HumanTranscript,
    FileMtime,
    None,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LastMessage {
    pub timestamp: i64,
    pub text: String,
    pub origin: MessageOrigin,
}

impl LastMessage {
    pub fn none() -> Self {
        Self {
            timestamp: 0,
            text: String::new(),
            origin: MessageOrigin::None,
        }
    }

    pub fn elapsed_seconds(&self, now: i64) -> i64 {
        match self.origin {
            MessageOrigin::None => 0,
            _ => now.saturating_sub(self.timestamp).max(0),
        }
    }
}

pub fn extract_last_message(transcript: Option<&Path>, scan_limit: u64) -> LastMessage {
    let Some(path) = transcript.filter(|path| is_regular_file(path)) else {
        return LastMessage::none();
    };

    match records_newest_first(path, scan_limit) {
        Ok(mut records) => {
            if let Some((record, text)) =
                records.find_map(|record| human_text(&record).map(|text| (record, text)))
            {
                let timestamp = record
                    .get("timestamp")
                    .and_then(Value::as_str)
                    .map(parse_timestamp)
                    .filter(|ts| *ts > 0)
                    .unwrap_or_else(|| file_mod_time(path));
                return LastMessage {
                    timestamp,
                    text,
                    origin: MessageOrigin::HumanTranscript,
                };
            }
        }
        Err(err) => debug!(error = %err, "transcript scan failed"),
    }

    LastMessage {
        timestamp: file_mod_time(path),
        text: String::new(),
        origin: MessageOrigin::FileMtime,
    }
}

pub fn human_text(record: &Value) -> Option<String> {
    if record.get("type").and_then(Value::as_str) != Some("user") {
        return None;
    }
    let message = record.get("message")?;
    if message.get("role").and_then(Value::as_str) != Some("user") {
        return None;
    }

    let text = match message.get("content")? {
        Value::String(text) => text.as_str(),
        Value::Array(blocks) => blocks
            .iter()
            .find(|block| block.get("type").and_then(Value::as_str) == Some("text"))
            .and_then(|block| block.get("text"))
            .and_then(Value::as_str)
            .unwrap_or_default(),
        _ => return None,
    };

    let text = text.trim();
    if is_filtered(text) {
        return None;
    }
    Some(text.to_string())
}

fn is_filtered(text: &str) -> bool {
    text.is_empty()
        || FILTERED_MARKERS.iter().any(|marker| text.contains(marker))
        || AUTO_RESPONSE_PREFIXES
            .iter()
            .any(|prefix| text.starts_with(prefix))
}

pub fn format_elapsed(elapsed: i64) -> String {
    let secs = elapsed.max(0);
    if secs < 10 {
        "<10s".to_string()
    } else if secs < 60 {
        format!("{secs}s")
    } else if secs < 300 {
        let minutes = secs / 60;
        let seconds = secs % 60;
        if seconds == 0 {
            format!("{minutes}m")
        } else {
            format!("{minutes}m{seconds}s")
        }
    } else if secs < 3_600 {
        format!("{}m", secs / 60)
    } else if secs < 86_400 {
        format!("{}h", secs / 3_600)
    } else {
        format!("{}d", secs / 86_400)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Recent,
    Stale,
}

impl Freshness {
    pub fn for_elapsed(elapsed: i64) -> Self {
        match elapsed.max(0) {
            0..300 => Self::Fresh,
            300..3_600 => Self::Recent,
            _ => Self::Stale,
        }
    }
}

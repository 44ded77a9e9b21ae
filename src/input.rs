use std::io::{self, IsTerminal, Read};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

const MAX_PAYLOAD_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum InputError {
    #[error("no payload within {0:?}")]
    Timeout(Duration),
    #[error("failed to read payload: {0}")]
    Io(#[from] io::Error),
    #[error("payload is not a JSON object: {0}")]
    Malformed(String),
    #[error("payload is empty")]
    Empty,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusInput {
    pub session_id: Option<String>,
    pub model_id: Option<String>,
    pub model_display_name: Option<String>,
    pub transcript_path: Option<String>,
    pub cwd: Option<String>,
    pub workspace_dir: Option<String>,
    pub output_style: Option<String>,
    pub current_tokens: Option<u64>,
    pub expected_total_tokens: Option<u64>,
    pub min_tokens_for_perf_hint: Option<u64>,
}

impl StatusInput {
    pub fn from_value(value: &Value) -> Self {
        Self {
            session_id: str_at(value, &["session_id"]),
            model_id: str_at(value, &["model", "id"]),
            model_display_name: str_at(value, &["model", "display_name"]),
            transcript_path: str_at(value, &["transcript_path"]),
            cwd: str_at(value, &["cwd"]),
            workspace_dir: str_at(value, &["workspace", "current_dir"]),
            output_style: str_at(value, &["output_style", "name"]),
            current_tokens: uint_at(value, &["current_tokens"]),
            expected_total_tokens: uint_at(value, &["expected_total_tokens"]),
            min_tokens_for_perf_hint: uint_at(value, &["min_tokens_for_perf_hint"]),
        }
    }

    pub fn display_model(&self) -> &str {
        self.model_display_name
            .as_deref()
            .or(self.model_id.as_deref())
            .unwrap_or("Claude")
    }

    pub fn model_key(&self) -> &str {
        self.model_id
            .as_deref()
            .or(self.model_display_name.as_deref())
            .unwrap_or("")
    }

    pub fn working_dir(&self) -> Option<&str> {
        self.workspace_dir.as_deref().or(self.cwd.as_deref())
    }
}

pub fn parse_payload(raw: &str) -> Result<StatusInput, InputError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(InputError::Empty);
    }
    let value: Value =
        serde_json::from_str(trimmed).map_err(|err| InputError::Malformed(err.to_string()))?;
    if !value.is_object() {
        return Err(InputError::Malformed("top-level value is not an object".to_string()));
    }
    Ok(StatusInput::from_value(&value))
}

/// An interactive stdin means no host is piping data, so nothing is read.
pub fn read_stdin_payload(timeout: Duration) -> Result<Option<String>, InputError> {
    if io::stdin().is_terminal() {
        return Ok(None);
    }
    read_payload(io::stdin(), timeout).map(Some)
}

/// On timeout the reader thread is left blocked; the process exits soon
/// after rendering anyway.
pub fn read_payload<R>(reader: R, timeout: Duration) -> Result<String, InputError>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = String::new();
        let result = reader
            .take(MAX_PAYLOAD_BYTES)
            .read_to_string(&mut buf)
            .map(|_| buf);
        let _ = tx.send(result);
    });

    match rx.recv_timeout(timeout) {
        Ok(result) => Ok(result?),
        Err(_) => Err(InputError::Timeout(timeout)),
    }
}

pub fn load_input(timeout: Duration) -> StatusInput {
    let raw = match read_stdin_payload(timeout) {
        Ok(Some(raw)) => raw,
        Ok(None) => return StatusInput::default(),
        Err(err) => {
            debug!(error = %err, "stdin payload unavailable");
            return StatusInput::default();
        }
    };
    parse_payload(&raw).unwrap_or_else(|err| {
        debug!(error = %err, "ignoring stdin payload");
        StatusInput::default()
    })
}

fn str_at(value: &Value, path: &[&str]) -> Option<String> {
    let mut cursor = value;
    for key in path {
        cursor = cursor.get(*key)?;
    }
    cursor
        .as_str()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn uint_at(value: &Value, path: &[&str]) -> Option<u64> {
    let mut cursor = value;
    for key in path {
        cursor = cursor.get(*key)?;
    }
    cursor
        .as_u64()
        .or_else(|| cursor.as_i64().and_then(|n| (n >= 0).then_some(n as u64)))
        .or_else(|| {
            cursor
                .as_f64()
                .filter(|n| n.is_finite() && *n >= 0.0)
                .map(|n| n as u64)
        })
        .or_else(|| cursor.as_str().and_then(|s| s.trim().parse::<u64>().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Instant;

    struct StalledReader;

    impl Read for StalledReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            thread::sleep(Duration::from_secs(5));
            Ok(0)
        }
    }

    #[test]
    fn stalled_reader_times_out() {
        let timeout = Duration::from_millis(50);
        let started = Instant::now();
        let result = read_payload(StalledReader, timeout);
        assert!(matches!(result, Err(InputError::Timeout(t)) if t == timeout));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn payload_read_is_capped() {
        let mut oversized = r#"{"cwd":"/work/app"}"#.to_string();
        oversized.push_str(&" ".repeat(2 * 1024 * 1024));
        let raw = read_payload(Cursor::new(oversized), Duration::from_secs(5)).expect("payload");
        assert_eq!(raw.len() as u64, MAX_PAYLOAD_BYTES);
        let input = parse_payload(&raw).expect("parse");
        assert_eq!(input.cwd.as_deref(), Some("/work/app"));
    }

    #[test]
    fn parses_recognized_fields() {
        let input = parse_payload(
            r#"{
                "session_id": "abc-123",
                "transcript_path": "/tmp/abc-123.jsonl",
                "cwd": "/work/app",
                "workspace": {"current_dir": "/work/app/sub"},
                "model": {"id": "claude-opus-4-1", "display_name": "Opus"},
                "output_style": {"name": "Explanatory"},
                "current_tokens": 129000,
                "expected_total_tokens": "200000",
                "min_tokens_for_perf_hint": 150000.0
            }"#,
        )
        .expect("payload");

        assert_eq!(input.session_id.as_deref(), Some("abc-123"));
        assert_eq!(input.transcript_path.as_deref(), Some("/tmp/abc-123.jsonl"));
        assert_eq!(input.working_dir(), Some("/work/app/sub"));
        assert_eq!(input.model_key(), "claude-opus-4-1");
        assert_eq!(input.display_model(), "Opus");
        assert_eq!(input.output_style.as_deref(), Some("Explanatory"));
        assert_eq!(input.current_tokens, Some(129_000));
        assert_eq!(input.expected_total_tokens, Some(200_000));
        assert_eq!(input.min_tokens_for_perf_hint, Some(150_000));
    }

    #[test]
    fn absent_fields_fall_back_to_defaults() {
        let input = parse_payload(r#"{"cwd":"/work/app"}"#).expect("payload");
        assert_eq!(input.display_model(), "Claude");
        assert_eq!(input.model_key(), "");
        assert_eq!(input.working_dir(), Some("/work/app"));
        assert_eq!(input.current_tokens, None);
    }

    #[test]
    fn mistyped_fields_read_as_absent() {
        let input = parse_payload(
            r#"{"session_id":42,"current_tokens":-5,"model":"sonnet","transcript_path":"  "}"#,
        )
        .expect("payload");
        assert_eq!(input, StatusInput::default());
    }

    #[test]
    fn malformed_and_empty_payloads_are_errors() {
        assert!(matches!(parse_payload("   "), Err(InputError::Empty)));
        assert!(matches!(parse_payload("{oops"), Err(InputError::Malformed(_))));
        assert!(matches!(parse_payload("[1,2]"), Err(InputError::Malformed(_))));
    }
}

use crossterm::style::{Color, Stylize};
use tracing::debug;

use crate::estimate::ContextEstimate;
use crate::transcript::{Freshness, format_elapsed};
use crate::util::{format_signed_tokens, format_tokens, single_line, truncate};

const DEFAULT_TEMPLATE: &str = "{model} | {project} | {context} | {elapsed} | {message}";

const TEMPLATES: [(&str, &str); 4] = [
    ("default", DEFAULT_TEMPLATE),
    ("compact", "{model} {context} {elapsed}"),
    ("minimal", "{context}"),
    (
        "verbose",
        "{model} | {project} | {style} | {context} {tokens}/{capacity} ({remaining} left) | {elapsed} | {message}",
    ),
];

#[derive(Debug, Clone)]
pub struct StatusLine {
    pub model: String,
    pub project: String,
    pub output_style: Option<String>,
    pub session_id: Option<String>,
    pub estimate: Option<ContextEstimate>,
    pub perf_hint: bool,
    pub elapsed: i64,
    pub message: String,
}

#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    pub color: bool,
    pub preview_chars: usize,
}

pub fn resolve_template(format: &str) -> &str {
    if format.contains('{') {
        return format;
    }
    TEMPLATES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(format))
        .map(|(_, template)| *template)
        .unwrap_or_else(|| {
            debug!(format, "unknown format name; using default");
            DEFAULT_TEMPLATE
        })
}

pub fn template_names() -> impl Iterator<Item = &'static str> {
    TEMPLATES.iter().map(|(name, _)| *name)
}

pub fn render(template: &str, line: &StatusLine, options: RenderOptions) -> String {
    substitute(template, |key| segment(key, line, options))
}

fn segment(key: &str, line: &StatusLine, options: RenderOptions) -> Option<String> {
    let estimate = line.estimate.as_ref();
    let value = match key {
        "model" => paint(&line.model, Color::Cyan, options.color),
        "project" => paint(&line.project, Color::Blue, options.color),
        "style" => line
            .output_style
            .clone()
            .unwrap_or_else(|| "default".to_string()),
        "session" => line
            .session_id
            .as_deref()
            .map(|id| id.chars().take(8).collect())
            .unwrap_or_else(|| "n/a".to_string()),
        "context" => context_segment(estimate, line.perf_hint, options.color),
        "percent" => estimate.map_or_else(not_available, |e| format!("{}%", e.percent)),
        "tokens" => estimate.map_or_else(not_available, |e| format_tokens(e.consumed_tokens)),
        "capacity" => estimate.map_or_else(not_available, |e| format_tokens(e.capacity)),
        "remaining" => estimate.map_or_else(not_available, |e| format_signed_tokens(e.remaining)),
        "elapsed" => paint(
            &format_elapsed(line.elapsed),
            freshness_color(Freshness::for_elapsed(line.elapsed)),
            options.color,
        ),
        "message" => message_segment(&line.message, options),
        _ => return None,
    };
    Some(value)
}

fn context_segment(estimate: Option<&ContextEstimate>, perf_hint: bool, color: bool) -> String {
    let Some(estimate) = estimate else {
        return paint("ctx n/a", Color::DarkGrey, color);
    };
    let marker = if perf_hint { "!" } else { "" };
    paint(
        &format!("ctx {}%{marker}", estimate.percent),
        context_color(estimate.percent),
        color,
    )
}

fn message_segment(message: &str, options: RenderOptions) -> String {
    let flattened = single_line(message);
    if flattened.is_empty() {
        return paint("no msg", Color::DarkGrey, options.color);
    }
    format!("\"{}\"", truncate(&flattened, options.preview_chars))
}

fn context_color(percent: u64) -> Color {
    match percent {
        0..50 => Color::Green,
        50..80 => Color::Yellow,
        _ => Color::Red,
    }
}

fn freshness_color(freshness: Freshness) -> Color {
    match freshness {
        Freshness::Fresh => Color::Green,
        Freshness::Recent => Color::Yellow,
        Freshness::Stale => Color::DarkGrey,
    }
}

fn paint(text: &str, color: Color, enabled: bool) -> String {
    if enabled {
        text.with(color).to_string()
    } else {
        text.to_string()
    }
}

fn not_available() -> String {
    "n/a".to_string()
}

/// Replaces `{name}` placeholders; unknown names and stray braces are kept
/// verbatim.
fn substitute(template: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(template.len() + 64);
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if is_placeholder_name(&after[..close]) => {
                let key = &after[..close];
                match lookup(key) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

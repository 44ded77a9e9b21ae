use std::io::{self, Write};
use std::path::Path;

use anyhow::Result;
use chrono::{Local, TimeZone};

use crate::config::{self, Environment, StatusConfig};
use crate::estimate::{ContextEstimate, EstimateRequest, TokenEstimator, matching_rule};
use crate::input::{self, StatusInput};
use crate::overhead::{Overhead, OverheadScope, compute_overhead};
use crate::session::{ResolvedTranscript, SessionResolver};
use crate::transcript::{LastMessage, MessageOrigin, extract_last_message};
use crate::ui::{self, RenderOptions, StatusLine};
use crate::util::{format_signed_tokens, format_tokens, truncate};

#[derive(Debug, Clone, Default)]
pub struct RenderOverrides {
    pub format: Option<String>,
    pub no_color: bool,
    pub chars_per_token: Option<u64>,
    pub transcript: Option<String>,
    pub session_id: Option<String>,
}

impl RenderOverrides {
    pub fn apply(&self, config: &mut StatusConfig, input: &mut StatusInput) {
        if let Some(format) = &self.format {
            config.format = format.clone();
        }
        if self.no_color {
            config.color = false;
        }
        if let Some(divisor) = self.chars_per_token.filter(|d| *d > 0) {
            config.chars_per_token = divisor;
        }
        if let Some(path) = &self.transcript {
            input.transcript_path = Some(path.clone());
        }
        if let Some(id) = &self.session_id {
            input.session_id = Some(id.clone());
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub transcript: Option<ResolvedTranscript>,
    pub overhead: Overhead,
    pub estimate: Option<ContextEstimate>,
    pub last_message: LastMessage,
    pub elapsed: i64,
}

pub fn collect_report(config: &StatusConfig, input: &StatusInput, env: &Environment) -> StatusReport {
    let resolver = SessionResolver::new(&env.search_root);
    let transcript = resolver.resolve(
        input.session_id.as_deref(),
        input.transcript_path.as_deref().map(Path::new),
        &env.working_dir,
    );
    let transcript_path = transcript.as_ref().map(|resolved| resolved.path.as_path());

    let overhead = compute_overhead(OverheadScope::from(env), &config.calibration);
    let estimate = TokenEstimator::new(&config.calibration, config.chars_per_token).estimate(
        EstimateRequest {
            authoritative_tokens: input.current_tokens,
            reported_capacity: input.expected_total_tokens,
            model_id: input.model_key(),
            transcript: transcript_path,
            overhead: &overhead,
        },
    );

    let last_message =
        extract_last_message(transcript_path, config.calibration.large_transcript_bytes);
    let elapsed = last_message.elapsed_seconds(env.now);

    StatusReport {
        transcript,
        overhead,
        estimate,
        last_message,
        elapsed,
    }
}

pub fn render_status(config: &StatusConfig, input: &StatusInput, env: &Environment) -> String {
    let report = collect_report(config, input, env);
    let perf_hint = match (&report.estimate, input.min_tokens_for_perf_hint) {
        (Some(estimate), Some(threshold)) if threshold > 0 => {
            estimate.consumed_tokens >= threshold
        }
        _ => false,
    };

    let line = StatusLine {
        model: input.display_model().to_string(),
        project: env.project_name(),
        output_style: input.output_style.clone(),
        session_id: input.session_id.clone(),
        estimate: report.estimate,
        perf_hint,
        elapsed: report.elapsed,
        message: report.last_message.text,
    };
    ui::render(
        ui::resolve_template(&config.format),
        &line,
        RenderOptions {
            color: config.color,
            preview_chars: config.message_preview_chars,
        },
    )
}

pub fn print_status_line(mut config: StatusConfig, overrides: &RenderOverrides) -> Result<()> {
    let mut input = input::load_input(config.stdin_timeout());
    overrides.apply(&mut config, &mut input);
    let env = Environment::resolve(&input);
    let line = render_status(&config, &input, &env);

    let mut out = io::stdout().lock();
    writeln!(out, "{line}")?;
    out.flush()?;
    Ok(())
}

pub fn doctor(mut config: StatusConfig, overrides: &RenderOverrides) -> Result<u8> {
    let mut input = input::load_input(config.stdin_timeout());
    overrides.apply(&mut config, &mut input);
    let env = Environment::resolve(&input);
    let report = collect_report(&config, &input, &env);
    let mut issues = 0u8;

    println!("claude-statusline doctor");
    println!("config: {}", config::config_path().display());
    println!(
        "format: {} (named: {})",
        config.format,
        ui::template_names().collect::<Vec<_>>().join(", ")
    );
    println!("home: {}", env.home_dir.display());
    println!("claude_dir: {}", env.claude_dir.display());
    println!("working_dir: {}", env.working_dir.display());
    println!("project_dir: {}", env.project_dir.display());

    if env.search_root.is_dir() {
        println!("[OK] transcript root {}", env.search_root.display());
    } else {
        issues += 1;
        println!("[WARN] transcript root {} not found", env.search_root.display());
    }

    match &report.transcript {
        Some(resolved) => println!(
            "[OK] transcript: {} ({})",
            resolved.path.display(),
            resolved.source.label()
        ),
        None => {
            issues += 1;
            println!("[WARN] no transcript resolved");
        }
    }

    print_overhead(&report.overhead);

    let model_key = input.model_key();
    let family = matching_rule(model_key).map_or("default", |rule| rule.family);
    println!("model: {} (capacity family: {family})", input.display_model());
    match &report.estimate {
        Some(estimate) => println!(
            "context: {}/{} ({}%, {} left, {:?})",
            format_tokens(estimate.consumed_tokens),
            format_tokens(estimate.capacity),
            estimate.percent,
            format_signed_tokens(estimate.remaining),
            estimate.source
        ),
        None => println!("context: n/a"),
    }

    print_last_message(&report.last_message, report.elapsed);

    if issues == 0 {
        println!("Doctor: healthy");
        Ok(0)
    } else {
        println!("Doctor: {issues} issue(s) found");
        Ok(1)
    }
}

fn print_overhead(overhead: &Overhead) {
    println!("overhead: {} tokens", format_tokens(overhead.total()));
    println!("  system prompt: {}", overhead.system_prompt);
    println!("  system tools: {}", overhead.system_tools);
    println!(
        "  mcp: {} ({} match(es))",
        overhead.mcp, overhead.mcp_matches
    );
    println!("  memory: {}", overhead.memory);
    for path in &overhead.memory_files {
        println!("    - {}", path.display());
    }
    println!("  settings: {}", overhead.settings);
    for path in &overhead.settings_files {
        println!("    - {}", path.display());
    }
}

fn print_last_message(message: &LastMessage, elapsed: i64) {
    let when = Local
        .timestamp_opt(message.timestamp, 0)
        .single()
        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "n/a".to_string());
    match message.origin {
        MessageOrigin::HumanTranscript => println!(
            "last message: {when} ({elapsed}s ago) \"{}\"",
            truncate(&message.text, 60)
        ),
        MessageOrigin::FileMtime => {
            println!("last message: none in transcript; file modified {when}")
        }
        MessageOrigin::None => println!("last message: n/a"),
    }
}

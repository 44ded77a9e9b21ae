use clap::{Args, Parser, Subcommand};

use crate::app::RenderOverrides;

#[derive(Parser, Debug)]
#[command(
    name = "claude-statusline",
    version,
    about = "Print a one-line context usage and last-message summary for Claude Code"
)]
pub struct Cli {
    #[command(flatten)]
    pub render: RenderArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Args, Debug)]
pub struct RenderArgs {
    /// Format name (default, compact, minimal, verbose) or a `{placeholder}` template.
    #[arg(short, long, global = true)]
    pub format: Option<String>,

    /// Disable ANSI colors.
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Bytes per token for the transcript approximation.
    #[arg(long, value_name = "BYTES", global = true)]
    pub chars_per_token: Option<u64>,

    /// Transcript file to use instead of the payload's `transcript_path`.
    #[arg(long, value_name = "PATH", global = true)]
    pub transcript: Option<String>,

    /// Session id to look up when no transcript path is known.
    #[arg(long, global = true)]
    pub session_id: Option<String>,
}

impl RenderArgs {
    pub fn overrides(&self) -> RenderOverrides {
        RenderOverrides {
            format: self.format.clone(),
            no_color: self.no_color,
            chars_per_token: self.chars_per_token,
            transcript: self.transcript.clone(),
            session_id: self.session_id.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Explain how the line was computed: transcript choice, overhead, estimate.
    Doctor,
}

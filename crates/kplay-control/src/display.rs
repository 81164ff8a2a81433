//! Console projection of the playback state.
//!
//! Everything goes to stderr; stdout may be carrying audio.

use std::io::{self, Write};

use crossterm::QueueableCommand;
use crossterm::style::Print;
use crossterm::terminal::{Clear, ClearType};

use crate::keymap::{KEY_BINDINGS, is_balance};
use crate::state::{PlaybackState, TransportState};

/// Receives the state after every change the actor makes
pub trait StatusView {
    fn refresh(&mut self, state: &PlaybackState);
}

/// One-line status rendering, e.g.
/// `L:1.00 R:0.80 | pitch 1.00 | tempo 1.00 |  42% | normal | PLAYING`
pub fn format_status(state: &PlaybackState, channels: usize) -> String {
    let gains = state.effective_gains(channels);
    let volume = match gains.as_slice() {
        [left, right] => format!("L:{left:.2} R:{right:.2}"),
        [mono] => format!("vol:{mono:.2}"),
        _ => String::new(),
    };
    let muted = if state.muted { " MUTED" } else { "" };
    let transport = match state.transport {
        TransportState::Playing => "PLAYING",
        TransportState::Stopped => "STOPPED",
    };
    format!(
        "{volume}{muted} | pitch {:.2} | tempo {:.2} | {:>3.0}% | {} | {transport}",
        state.pitch,
        state.tempo,
        state.progress * 100.0,
        state.mode
    )
}

/// Key help banner, without balance keys for mono streams
pub fn key_help(channels: usize) -> String {
    let mut help = String::from("Keys:\n");
    for (key, command, text) in KEY_BINDINGS {
        if channels < 2 && is_balance(*command) {
            continue;
        }
        help.push_str(&format!("  {key}  {text}\n"));
    }
    help
}

/// Status line rewritten in place on stderr
pub struct ConsoleStatus {
    channels: usize,
    quiet: bool,
}

impl ConsoleStatus {
    pub fn new(channels: usize, quiet: bool) -> Self {
        Self { channels, quiet }
    }

    /// Print the key help banner unless quiet
    pub fn print_help(&self) {
        if !self.quiet {
            eprint!("{}", key_help(self.channels).replace('\n', "\r\n"));
        }
    }

    fn draw(&self, line: &str) -> io::Result<()> {
        let mut stderr = io::stderr().lock();
        stderr
            .queue(Print('\r'))?
            .queue(Print(line))?
            .queue(Clear(ClearType::UntilNewLine))?;
        stderr.flush()
    }

    /// End the status line so later output starts on a fresh row
    pub fn finish(&self) {
        if !self.quiet {
            eprint!("\r\n");
        }
    }
}

impl StatusView for ConsoleStatus {
    fn refresh(&mut self, state: &PlaybackState) {
        if self.quiet {
            return;
        }
        if let Err(err) = self.draw(&format_status(state, self.channels)) {
            tracing::debug!("Status line not drawn: {}", err);
        }
    }
}

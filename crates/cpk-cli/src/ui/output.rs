//! [`Reporter`] that renders to the terminal.
//!
//! Status lines go to stdout. Transfer and extraction progress is drawn on a
//! single stderr line, and only when stderr is a terminal.

use std::io::{IsTerminal, Write};
use std::sync::{Mutex, PoisonError};

use cpk_core::Reporter;
use crossterm::style::{Print, Stylize};
use crossterm::terminal::{Clear, ClearType};
use crossterm::{cursor, queue};

use super::theme::Theme;

/// Terminal progress and status output.
#[derive(Debug)]
pub struct TerminalReporter {
    theme: Theme,
    quiet: bool,
    interactive: bool,
    progress_line: Mutex<bool>,
}

impl TerminalReporter {
    /// Reporter for the current terminal. `quiet` keeps only failures and
    /// warnings.
    pub fn new(quiet: bool) -> Self {
        Self {
            theme: Theme::default(),
            quiet,
            interactive: std::io::stderr().is_terminal(),
            progress_line: Mutex::new(false),
        }
    }

    fn draw_progress(&self, text: &str) {
        if self.quiet || !self.interactive {
            return;
        }
        let mut drawn = self.progress_line.lock().unwrap_or_else(PoisonError::into_inner);
        let mut err = std::io::stderr();
        let _ = queue!(
            err,
            cursor::MoveToColumn(0),
            Clear(ClearType::CurrentLine),
            Print(text.with(self.theme.secondary))
        );
        let _ = err.flush();
        *drawn = true;
    }

    fn clear_progress(&self) {
        let mut drawn = self.progress_line.lock().unwrap_or_else(PoisonError::into_inner);
        if !*drawn {
            return;
        }
        let mut err = std::io::stderr();
        let _ = queue!(err, cursor::MoveToColumn(0), Clear(ClearType::CurrentLine));
        let _ = err.flush();
        *drawn = false;
    }

    /// Status line with a colored marker.
    fn line(&self, marker: &str, color: crossterm::style::Color, text: &str) {
        self.clear_progress();
        println!("  {} {text}", marker.with(color).bold());
    }
}

#[allow(clippy::cast_precision_loss)]
fn percent(current: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (current as f64 / total as f64) * 100.0
}

impl Reporter for TerminalReporter {
    fn fetching(&self, pack: &str, current: u64, total: Option<u64>) {
        let text = match total {
            Some(total) => format!("  downloading {pack} {:>5.1}%", percent(current, total)),
            None => format!("  downloading {pack} {} KiB", current / 1024),
        };
        self.draw_progress(&text);
    }

    fn extracting(&self, pack: &str, current: u64, total: u64) {
        self.draw_progress(&format!("  extracting {pack} {current}/{total}"));
    }

    fn installed(&self, pack: &str, location: &str) {
        if self.quiet {
            return;
        }
        self.clear_progress();
        println!(
            "  {} {} {}",
            "+".with(self.theme.success).bold(),
            pack.with(self.theme.pack),
            location.with(self.theme.secondary)
        );
    }

    fn removed(&self, pack: &str) {
        if self.quiet {
            return;
        }
        self.clear_progress();
        println!(
            "  {} {}",
            "-".with(self.theme.warning).bold(),
            pack.with(self.theme.pack)
        );
    }

    fn failed(&self, reference: &str, reason: &str) {
        self.clear_progress();
        eprintln!(
            "  {} {reference}: {}",
            "x".with(self.theme.error).bold(),
            reason.with(self.theme.error)
        );
    }

    fn info(&self, msg: &str) {
        if !self.quiet {
            self.line("i", self.theme.secondary, msg);
        }
    }

    fn warning(&self, msg: &str) {
        self.line("!", self.theme.warning, msg);
    }

    fn summary(&self, succeeded: usize, failed: usize, action: &str) {
        if self.quiet && failed == 0 {
            return;
        }
        self.clear_progress();
        let noun = if succeeded == 1 { "pack" } else { "packs" };
        let msg = if failed > 0 {
            format!("{succeeded} {noun} {action}, {failed} failed")
        } else {
            format!("{succeeded} {noun} {action}")
        };
        println!();
        println!("  {}", msg.with(self.theme.secondary));
    }
}

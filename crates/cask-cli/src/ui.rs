//! Terminal output.

use std::io::{IsTerminal, Write};
use std::sync::Mutex;

use cask_core::Reporter;
use cask_core::installer::format_size;
use cask_schema::Token;
use crossterm::style::{Color, Stylize};

/// Colors shared by every message.
#[derive(Debug, Clone)]
pub struct Theme {
    pub section: Color,
    pub token: Color,
    pub success: Color,
    pub warning: Color,
    pub error: Color,
    pub secondary: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            section: Color::Blue,
            token: Color::Cyan,
            success: Color::Green,
            warning: Color::Yellow,
            error: Color::Red,
            secondary: Color::DarkGrey,
        }
    }
}

/// Reports engine progress on the terminal.
///
/// Regular output goes to stdout, warnings and errors to stderr. Download
/// progress redraws a single stderr line when stderr is a terminal.
#[derive(Debug)]
pub struct ConsoleReporter {
    theme: Theme,
    progress: Mutex<bool>,
    interactive: bool,
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self {
            theme: Theme::default(),
            progress: Mutex::new(false),
            interactive: std::io::stderr().is_terminal(),
        }
    }

    /// Terminate a progress line before printing anything else.
    fn end_progress(&self) {
        if let Ok(mut active) = self.progress.lock()
            && *active
        {
            eprintln!();
            *active = false;
        }
    }
}

impl Reporter for ConsoleReporter {
    fn section(&self, title: &str) {
        self.end_progress();
        println!("{} {}", "==>".with(self.theme.section).bold(), title.bold());
    }

    fn downloading(&self, token: &Token, current: u64, total: Option<u64>) {
        if !self.interactive {
            return;
        }
        let amount = match total {
            Some(total) => format!("{} / {}", format_size(current), format_size(total)),
            None => format_size(current),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = write!(
            stderr,
            "\r  {} {}",
            token.as_str().with(self.theme.token),
            amount.with(self.theme.secondary)
        );
        let _ = stderr.flush();
        if let Ok(mut active) = self.progress.lock() {
            *active = true;
        }
    }

    fn caveats(&self, token: &Token, text: &str) {
        self.end_progress();
        println!(
            "{} {}",
            "==>".with(self.theme.warning).bold(),
            format!("Caveats for {token}").bold()
        );
        println!("{}", text.trim_end());
    }

    fn info(&self, msg: &str) {
        self.end_progress();
        println!("{msg}");
    }

    fn success(&self, msg: &str) {
        self.end_progress();
        println!("{} {msg}", "🍺".with(self.theme.success));
    }

    fn warning(&self, msg: &str) {
        self.end_progress();
        eprintln!("{} {msg}", "Warning:".with(self.theme.warning).bold());
    }

    fn error(&self, msg: &str) {
        self.end_progress();
        eprintln!("{} {msg}", "Error:".with(self.theme.error).bold());
    }
}

/// Print a failed command's error chain on one line.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {err:#}", "Error:".with(Theme::default().error).bold());
}

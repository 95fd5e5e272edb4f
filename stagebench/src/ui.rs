//! Console output for the commands.
//!
//! Report lines go through [`Progress::println`] so they land above the bar
//! instead of tearing it.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use is_terminal::IsTerminal;

/// How user-facing output should look.
#[derive(Debug, Clone, Copy)]
pub struct UiOptions {
    pub verbose: bool,
    pub color: bool,
    pub interactive: bool,
}

impl UiOptions {
    pub fn detect(verbose: bool, no_color: bool) -> Self {
        let interactive = std::io::stdout().is_terminal();
        let color = !no_color && interactive && std::env::var_os("NO_COLOR").is_none();
        if !color {
            colored::control::set_override(false);
        }
        Self {
            verbose,
            color,
            interactive,
        }
    }
}

/// File progress bar with a status message; inert when not interactive.
pub struct Progress {
    bar: Option<ProgressBar>,
}

impl Progress {
    pub fn new(len: usize, options: &UiOptions) -> Self {
        if !options.interactive || len == 0 {
            return Self { bar: None };
        }
        let bar = ProgressBar::new(len as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("|{bar:40.cyan/blue}| {pos}/{len} {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        bar.enable_steady_tick(Duration::from_millis(200));
        Self { bar: Some(bar) }
    }

    pub fn set_status(&self, status: impl Into<String>) {
        if let Some(bar) = &self.bar {
            bar.set_message(status.into());
        }
    }

    pub fn inc(&self) {
        if let Some(bar) = &self.bar {
            bar.inc(1);
        }
    }

    /// Print a (possibly multi-line) block without its trailing newline.
    pub fn println(&self, text: &str) {
        let text = text.trim_end_matches('\n');
        if text.is_empty() {
            return;
        }
        match &self.bar {
            Some(bar) => bar.println(text),
            None => println!("{text}"),
        }
    }

    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}

/// Split an `--args` string into separate arguments.
pub fn split_args(args: &str) -> Vec<String> {
    args.split_whitespace().map(str::to_string).collect()
}

//! Duration extraction from SUT output.
//!
//! A line contributes samples when the configured pattern matches at its
//! start. Every whitespace-separated token on such a line that parses as a
//! float becomes one sample, in line order then token order.

use regex::Regex;

/// One timing measurement in milliseconds.
pub type DurationSample = f64;

/// Lazy iterator over the samples in one output text.
///
/// Create a fresh one with [`extract`] to iterate again.
#[derive(Debug, Clone)]
pub struct Timings<'a> {
    lines: std::str::Split<'a, char>,
    pattern: &'a Regex,
    tokens: Option<std::str::SplitWhitespace<'a>>,
}

impl Iterator for Timings<'_> {
    type Item = DurationSample;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(tokens) = self.tokens.as_mut() {
                if let Some(sample) = tokens.find_map(|token| token.parse::<f64>().ok()) {
                    return Some(sample);
                }
                self.tokens = None;
            }

            let line = self.lines.next()?;
            if matches_at_start(self.pattern, line) {
                self.tokens = Some(line.split_whitespace());
            }
        }
    }
}

/// Scan `output` for timing lines selected by `pattern`.
pub fn extract<'a>(output: &'a str, pattern: &'a Regex) -> Timings<'a> {
    Timings {
        lines: output.split('\n'),
        pattern,
        tokens: None,
    }
}

/// Anchored at position 0 but free to stop before the end of the line.
fn matches_at_start(pattern: &Regex, line: &str) -> bool {
    pattern.find_at(line, 0).is_some_and(|m| m.start() == 0)
}

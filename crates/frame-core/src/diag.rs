//! Per-cycle log lines shown on the panel when a cycle fails.

use core::fmt::{self, Write};

use heapless::{Deque, String};

/// Characters per line; 57 glyphs of the 9x15 font fit inside the border.
pub const DIAG_LINE_LEN: usize = 57;
pub const DIAG_LINES: usize = 24;

pub type DiagLine = String<DIAG_LINE_LEN>;

/// Bounded log of the current cycle. Oldest lines are dropped when full and
/// long lines are truncated.
#[derive(Default)]
pub struct DiagnosticLog {
    lines: Deque<DiagLine, DIAG_LINES>,
    dropped: usize,
}

impl DiagnosticLog {
    pub const fn new() -> Self {
        Self {
            lines: Deque::new(),
            dropped: 0,
        }
    }

    pub fn record(&mut self, args: fmt::Arguments<'_>) {
        let mut line = Truncating(DiagLine::new());
        let _ = line.write_fmt(args);
        if self.lines.is_full() {
            self.lines.pop_front();
            self.dropped += 1;
        }
        let _ = self.lines.push_back(line.0);
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(|line| line.as_str())
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// What fits on a screen of `rows` text rows: the newest lines, led by a
    /// note counting the older ones that had to go.
    pub fn screen(&self, rows: usize) -> (Option<DiagLine>, impl Iterator<Item = &str>) {
        let fits = if self.dropped + self.lines.len() > rows {
            rows.saturating_sub(1)
        } else {
            rows
        };
        let skipped = self.lines.len().saturating_sub(fits);
        let hidden = self.dropped + skipped;
        let note = (hidden > 0 && rows > 0).then(|| {
            let mut note = Truncating(DiagLine::new());
            let _ = write!(note, "({hidden} earlier lines not shown)");
            note.0
        });
        (note, self.lines().skip(skipped))
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.dropped = 0;
    }
}

struct Truncating(DiagLine);

impl Write for Truncating {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            if c == '\n' || self.0.push(c).is_err() {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_most_recent_lines() {
        let mut log = DiagnosticLog::new();
        for i in 0..DIAG_LINES + 3 {
            log.record(format_args!("line {i}"));
        }
        assert_eq!(log.len(), DIAG_LINES);
        assert_eq!(log.dropped, 3);
        assert_eq!(log.lines().next(), Some("line 3"));
        assert_eq!(log.lines().last(), Some("line 26"));
    }

    #[test]
    fn long_lines_are_truncated() {
        let mut log = DiagnosticLog::new();
        let long = "x".repeat(DIAG_LINE_LEN * 2);
        log.record(format_args!("{long}"));
        assert_eq!(log.lines().next().map(str::len), Some(DIAG_LINE_LEN));
    }

    #[test]
    fn screen_keeps_the_newest_lines() {
        let mut log = DiagnosticLog::new();
        for i in 0..5 {
            log.record(format_args!("line {i}"));
        }

        let (note, lines) = log.screen(10);
        assert_eq!(note, None);
        assert_eq!(lines.count(), 5);

        let (note, lines) = log.screen(3);
        assert_eq!(note.as_deref(), Some("(3 earlier lines not shown)"));
        assert_eq!(lines.collect::<Vec<_>>(), ["line 3", "line 4"]);
    }

    #[test]
    fn screen_counts_lines_pushed_out_of_the_log() {
        let mut log = DiagnosticLog::new();
        for i in 0..DIAG_LINES + 2 {
            log.record(format_args!("line {i}"));
        }

        let (note, lines) = log.screen(DIAG_LINES);
        let lines: Vec<_> = lines.collect();
        assert_eq!(note.as_deref(), Some("(3 earlier lines not shown)"));
        assert_eq!(lines.len(), DIAG_LINES - 1);
        assert_eq!(lines.last(), Some(&"line 25"));
    }

    #[test]
    fn clear_empties_the_log() {
        let mut log = DiagnosticLog::new();
        log.record(format_args!("hello"));
        log.clear();
        assert!(log.is_empty());
    }
}

//! Terminal rendering for playback: the song header, the single-line
//! progress bar and queue position reports.

use std::io::{self, Stdout, Write};

use crossterm::{
    queue,
    style::Print,
    terminal::{Clear, ClearType},
};
use log::warn;

use crate::playback::{QueueEvent, QueueObserver};

pub const SCREEN_WIDTH: usize = 80;

const CONTROL_LINES: [&str; 2] = [
    "Space: Play/Pause  S: Stop  R: Restart  G: Prev  H: Next  Q/X: Exit",
    "A/a: -30s/-5s   D/d: +30s/+5s   0-9: Jump to %",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Playing,
    Paused,
    Stopped,
}

impl PlaybackStatus {
    fn icon(self) -> &'static str {
        match self {
            PlaybackStatus::Playing => "(>)  ",
            PlaybackStatus::Paused => "(||) ",
            PlaybackStatus::Stopped => "([]) ",
        }
    }
}

/// Receives render updates from the poll activity of a session.
pub trait ProgressDisplay {
    fn show_header(&mut self, title: &str);

    fn show_progress(&mut self, status: PlaybackStatus, position_ms: u64, duration_ms: u64);

    /// Called once when the session returns.
    fn finish(&mut self);
}

/// `m:ss`, minutes unpadded.
pub fn format_time(ms: u64) -> String {
    let seconds = ms / 1000;
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

/// `(>)  0:42====v---- 3:10`, padded to `width`. `None` while the duration
/// is unknown.
pub fn progress_line(
    status: PlaybackStatus,
    position_ms: u64,
    duration_ms: u64,
    width: usize,
) -> Option<String> {
    if duration_ms == 0 {
        return None;
    }

    let position_ms = position_ms.min(duration_ms);
    let position = format_time(position_ms);
    let duration = format_time(duration_ms);
    let icon = status.icon();

    let bar_width = width
        .saturating_sub(icon.len() + position.len() + duration.len())
        .max(1);
    let filled = ((bar_width as u128 * position_ms as u128 / duration_ms as u128) as usize)
        .min(bar_width - 1);

    Some(format!(
        "{icon}{position}{}v{}{duration}",
        "=".repeat(filled),
        "-".repeat(bar_width - filled - 1)
    ))
}

/// Word wraps `title` to `width`, preceded by a rule line.
pub fn title_lines(title: &str, width: usize) -> Vec<String> {
    let mut lines = vec!["-".repeat(width)];
    if title.chars().count() <= width {
        lines.push(title.to_string());
        return lines;
    }

    let mut current = String::new();
    for word in title.split_whitespace() {
        if current.is_empty() {
            current = word.to_string();
        } else if current.chars().count() + 1 + word.chars().count() <= width {
            current.push(' ');
            current.push_str(word);
        } else {
            lines.push(std::mem::take(&mut current));
            current = word.to_string();
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn center(line: &str, width: usize) -> String {
    format!("{line:^width$}")
}

/// Writes to stdout. Lines end in `\r\n` since raw mode is usually active.
pub struct TerminalProgress {
    out: Stdout,
    width: usize,
}

impl TerminalProgress {
    pub fn new() -> Self {
        Self {
            out: io::stdout(),
            width: SCREEN_WIDTH,
        }
    }

    fn write_lines(&mut self, lines: &[String]) -> io::Result<()> {
        for line in lines {
            queue!(self.out, Print(line), Print("\r\n"))?;
        }
        self.out.flush()
    }
}

impl Default for TerminalProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressDisplay for TerminalProgress {
    fn show_header(&mut self, title: &str) {
        let mut lines: Vec<String> = title_lines(title, self.width)
            .iter()
            .map(|line| center(line, self.width))
            .collect();
        lines.push(String::new());
        lines.extend(CONTROL_LINES.iter().map(|line| center(line, self.width)));
        lines.push(String::new());

        if let Err(err) = self.write_lines(&lines) {
            warn!("TerminalProgress: failed to draw header: {}", err);
        }
    }

    fn show_progress(&mut self, status: PlaybackStatus, position_ms: u64, duration_ms: u64) {
        let Some(line) = progress_line(status, position_ms, duration_ms, self.width) else {
            return;
        };
        let result = queue!(
            self.out,
            Print("\r"),
            Print(line),
            Clear(ClearType::UntilNewLine)
        )
        .and_then(|_| self.out.flush());
        if let Err(err) = result {
            warn!("TerminalProgress: failed to draw progress: {}", err);
        }
    }

    fn finish(&mut self) {
        if let Err(err) = self.write_lines(&[String::new()]) {
            warn!("TerminalProgress: failed to finish: {}", err);
        }
    }
}

/// Prints queue positions as `[i/n]` lines.
pub struct TerminalQueueReport;

impl QueueObserver for TerminalQueueReport {
    fn on_queue_event(&mut self, event: &QueueEvent) {
        let line = match event {
            QueueEvent::Started { index, len, title } => {
                format!("[{}/{}] {}", index + 1, len, title)
            }
            QueueEvent::Unavailable { index, len, uid } => {
                format!("[{}/{}] Song {} is no longer available, skipping", index + 1, len, uid)
            }
            QueueEvent::NavigatedAway => "Left the queue".to_string(),
            QueueEvent::Finished { len } => format!("Queue finished ({} songs)", len),
            QueueEvent::Aborted => "Queue aborted".to_string(),
        };
        let mut out = io::stdout();
        if let Err(err) = queue!(out, Print(line), Print("\r\n")).and_then(|_| out.flush()) {
            warn!("TerminalQueueReport: failed to print: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0), "0:00");
        assert_eq!(format_time(42_999), "0:42");
        assert_eq!(format_time(190_000), "3:10");
        assert_eq!(format_time(3_600_000), "60:00");
    }

    #[test]
    fn test_progress_line_layout() {
        let line = progress_line(PlaybackStatus::Playing, 0, 190_000, 80).unwrap();
        assert_eq!(line.len(), 80);
        assert!(line.starts_with("(>)  0:00v---"));
        assert!(line.ends_with("-3:10"));

        let line = progress_line(PlaybackStatus::Paused, 95_000, 190_000, 80).unwrap();
        assert!(line.starts_with("(||) 1:35===="));
        let bar = &line[9..line.len() - 4];
        assert_eq!(bar.find('v'), Some(bar.len() / 2));
    }

    #[test]
    fn test_progress_marker_stays_inside_bar_at_end() {
        let line = progress_line(PlaybackStatus::Stopped, 190_000, 190_000, 80).unwrap();
        assert_eq!(line.len(), 80);
        assert!(line.starts_with("([]) "));
        assert!(line.ends_with("v3:10"));
    }

    #[test]
    fn test_unknown_duration_draws_nothing() {
        assert!(progress_line(PlaybackStatus::Playing, 10, 0, 80).is_none());
    }

    #[test]
    fn test_title_wrapping() {
        assert_eq!(title_lines("Short", 10), vec!["-".repeat(10), "Short".to_string()]);
        assert_eq!(
            title_lines("one two three four", 9),
            vec![
                "-".repeat(9),
                "one two".to_string(),
                "three".to_string(),
                "four".to_string()
            ]
        );
    }
}

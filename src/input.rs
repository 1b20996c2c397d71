//! Keyboard input for playback sessions.

use std::{io, time::Duration};

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal,
};
use log::warn;

use crate::protocol::InputEvent;

/// Blocking source of playback key events.
///
/// `poll_event` waits at most `timeout` so the caller can notice when the
/// session ended without a key press. Implementations move between threads
/// with the control activity of each session.
pub trait InputSource: Send {
    fn poll_event(&mut self, timeout: Duration) -> io::Result<Option<InputEvent>>;
}

pub fn map_key(key: KeyEvent) -> Option<InputEvent> {
    if key.kind == KeyEventKind::Release {
        return None;
    }

    match (key.code, key.modifiers) {
        (KeyCode::Char('c'), KeyModifiers::CONTROL) => Some(InputEvent::Abort),
        (_, modifiers) if modifiers.contains(KeyModifiers::CONTROL) => None,
        (KeyCode::Char(' '), _) => Some(InputEvent::PlayPause),
        (KeyCode::Char('s' | 'S'), _) => Some(InputEvent::Stop),
        (KeyCode::Char('r' | 'R'), _) => Some(InputEvent::Restart),
        (KeyCode::Char('g' | 'G'), _) => Some(InputEvent::Prev),
        (KeyCode::Char('h' | 'H'), _) => Some(InputEvent::Next),
        (KeyCode::Char('a'), _) => Some(InputEvent::SeekSmallBack),
        (KeyCode::Char('A'), _) => Some(InputEvent::SeekBigBack),
        (KeyCode::Char('d'), _) => Some(InputEvent::SeekSmallFwd),
        (KeyCode::Char('D'), _) => Some(InputEvent::SeekBigFwd),
        (KeyCode::Char(digit @ '0'..='9'), _) => {
            Some(InputEvent::JumpToDecile(digit as u8 - b'0'))
        }
        (KeyCode::Char('q' | 'Q'), _) => Some(InputEvent::Skip),
        (KeyCode::Char('x' | 'X'), _) => Some(InputEvent::Abort),
        _ => None,
    }
}

/// Reads keys from the controlling terminal in raw mode.
///
/// Raw mode is enabled on construction and restored on drop.
pub struct TerminalInput {
    _raw_mode: RawModeGuard,
}

impl TerminalInput {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            _raw_mode: RawModeGuard::enable()?,
        })
    }
}

impl InputSource for TerminalInput {
    fn poll_event(&mut self, timeout: Duration) -> io::Result<Option<InputEvent>> {
        if !event::poll(timeout)? {
            return Ok(None);
        }
        match event::read()? {
            Event::Key(key) => Ok(map_key(key)),
            _ => Ok(None),
        }
    }
}

struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(err) = terminal::disable_raw_mode() {
            warn!("TerminalInput: failed to restore terminal mode: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn test_key_map() {
        assert_eq!(map_key(key(KeyCode::Char(' '))), Some(InputEvent::PlayPause));
        assert_eq!(map_key(key(KeyCode::Char('s'))), Some(InputEvent::Stop));
        assert_eq!(map_key(key(KeyCode::Char('r'))), Some(InputEvent::Restart));
        assert_eq!(map_key(key(KeyCode::Char('g'))), Some(InputEvent::Prev));
        assert_eq!(map_key(key(KeyCode::Char('h'))), Some(InputEvent::Next));
        assert_eq!(map_key(key(KeyCode::Char('q'))), Some(InputEvent::Skip));
        assert_eq!(map_key(key(KeyCode::Char('x'))), Some(InputEvent::Abort));
        assert_eq!(map_key(key(KeyCode::Char('X'))), Some(InputEvent::Abort));
        assert_eq!(map_key(key(KeyCode::Char('H'))), Some(InputEvent::Next));
        assert_eq!(map_key(key(KeyCode::Char('z'))), None);
        assert_eq!(map_key(key(KeyCode::Enter)), None);
    }

    #[test]
    fn test_shifted_seek_keys_are_big_steps() {
        let shifted = |c| KeyEvent::new(KeyCode::Char(c), KeyModifiers::SHIFT);
        assert_eq!(map_key(key(KeyCode::Char('a'))), Some(InputEvent::SeekSmallBack));
        assert_eq!(map_key(shifted('A')), Some(InputEvent::SeekBigBack));
        assert_eq!(map_key(key(KeyCode::Char('d'))), Some(InputEvent::SeekSmallFwd));
        assert_eq!(map_key(shifted('D')), Some(InputEvent::SeekBigFwd));
    }

    #[test]
    fn test_digits_jump_to_deciles() {
        assert_eq!(map_key(key(KeyCode::Char('0'))), Some(InputEvent::JumpToDecile(0)));
        assert_eq!(map_key(key(KeyCode::Char('7'))), Some(InputEvent::JumpToDecile(7)));
        assert_eq!(map_key(key(KeyCode::Char('9'))), Some(InputEvent::JumpToDecile(9)));
    }

    #[test]
    fn test_ctrl_c_aborts_and_other_ctrl_keys_are_ignored() {
        let ctrl = |c| KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL);
        assert_eq!(map_key(ctrl('c')), Some(InputEvent::Abort));
        assert_eq!(map_key(ctrl('s')), None);
    }

    #[test]
    fn test_key_release_is_ignored() {
        let mut release = key(KeyCode::Char(' '));
        release.kind = KeyEventKind::Release;
        assert_eq!(map_key(release), None);
    }
}

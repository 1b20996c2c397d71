//! Shared records and messages exchanged between the timeline, the playback
//! session and the navigation coordinator.

use std::{fmt, path::PathBuf};

use chrono::{DateTime, Utc};
use log::warn;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::error::InvalidUid;

/// Length of every song/playlist identifier.
pub const UID_LEN: usize = 16;

const UID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Validated 16 character alphanumeric identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SongUid(String);

impl SongUid {
    pub fn parse(value: &str) -> Result<Self, InvalidUid> {
        if is_valid_uid(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(InvalidUid(value.to_string()))
        }
    }

    /// Generates a fresh random identifier.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let uid = (0..UID_LEN)
            .map(|_| UID_ALPHABET[rng.gen_range(0..UID_ALPHABET.len())] as char)
            .collect();
        Self(uid)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SongUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SongUid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// `StdRng` seeded from the OS, falling back to the clock if that fails.
pub fn seeded_rng() -> StdRng {
    let mut seed = [0u8; 32];
    if let Err(err) = getrandom::fill(&mut seed) {
        warn!("Failed to read OS randomness ({}). Seeding from clock", err);
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();
        return StdRng::seed_from_u64(nanos as u64);
    }
    StdRng::from_seed(seed)
}

pub fn is_valid_uid(value: &str) -> bool {
    value.len() == UID_LEN && value.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Catalog record for a playable song.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongRef {
    pub uid: SongUid,
    pub title: String,
    /// Known duration, 0 when the catalog never measured it.
    pub duration_ms: u64,
    /// Path as stored in the catalog, possibly relative to the library root.
    pub path: PathBuf,
}

/// One persisted row of the playback timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEntry {
    pub position: i64,
    /// Raw stored value; entries are never rewritten when songs disappear.
    pub song_uid: String,
    pub added_at: DateTime<Utc>,
}

/// Closed vocabulary of key events understood by a playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    PlayPause,
    Stop,
    Restart,
    Prev,
    Next,
    SeekSmallBack,
    SeekBigBack,
    SeekSmallFwd,
    SeekBigFwd,
    /// Jump to `decile * 10%` of the duration. Values above 9 are clamped.
    JumpToDecile(u8),
    Skip,
    Abort,
}

/// Why a playback session returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// Song finished on its own.
    Ended,
    /// User asked to move on to the next queue item.
    Skip,
    /// User asked to stop the whole queue.
    Abort,
    /// User pressed previous/next and the timeline cursor already moved to
    /// `target`.
    Navigate { target: SongUid },
}

/// Messages from the control activity to the poll activity of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    TogglePlayPause,
    Stop,
    Restart,
    SeekBy(i64),
    JumpToDecile(u8),
    /// Terminal request; nothing after it is read.
    Exit(ExitReason),
}

/// Per-song result handed back by a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub exit: ExitReason,
    /// Backend position at exit, 0 when the song ended naturally.
    pub last_known_position_ms: u64,
    pub listens_logged: u32,
    pub loop_iterations: u32,
}

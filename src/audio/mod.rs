//! Audio output used by playback sessions.

pub(crate) mod cpal_backend;
pub(crate) mod decoder;

use std::path::Path;

use crate::error::BackendError;

pub use cpal_backend::CpalBackend;
pub use decoder::probe_duration_ms;

/// Opaque player driven by a playback session.
///
/// Positions and durations are in milliseconds of source time. A backend is
/// only ever driven from the thread that owns the session, so it does not
/// need to be `Send`.
pub trait PlaybackBackend {
    /// Loads `source` and starts playing at `start_offset_ms`.
    fn play(&mut self, source: &Path, start_offset_ms: u64) -> Result<(), BackendError>;

    fn pause(&mut self) -> Result<(), BackendError>;

    fn resume(&mut self) -> Result<(), BackendError>;

    /// Stops output. A later `play` reloads from the start.
    fn stop(&mut self) -> Result<(), BackendError>;

    fn seek_to(&mut self, position_ms: u64) -> Result<(), BackendError>;

    /// Relative seek clamped at 0 and at the end of the source.
    fn seek_by(&mut self, delta_ms: i64) -> Result<(), BackendError> {
        let target = self.position_ms().saturating_add_signed(delta_ms);
        let duration = self.duration_ms();
        let target = if duration > 0 {
            target.min(duration)
        } else {
            target
        };
        self.seek_to(target)
    }

    fn position_ms(&self) -> u64;

    /// Duration of the loaded source, 0 when unknown.
    fn duration_ms(&self) -> u64;

    /// True once the source played to its end without being stopped.
    fn has_ended_naturally(&self) -> bool;
}

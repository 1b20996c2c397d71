//! Error types shared by the timeline, playback and navigation layers.

use thiserror::Error;

/// Identifier that does not have the 16 character alphanumeric shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid uid format: {0:?}")]
pub struct InvalidUid(pub String);

/// Timeline storage errors.
#[derive(Debug, Error)]
pub enum TimelineError {
    #[error(transparent)]
    InvalidUid(#[from] InvalidUid),

    /// Underlying SQLite failure; the enclosing transaction was rolled back
    #[error("Timeline storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Catalog lookup failed while scanning for a resolvable entry
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

/// Song catalog and playlist lookup errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Catalog storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error(transparent)]
    InvalidUid(#[from] InvalidUid),

    #[error("Playlist not found: {0}")]
    PlaylistNotFound(String),
}

/// Faults reported by a playback backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Output device error: {0}")]
    Device(String),

    #[error("Output stream error: {0}")]
    Stream(String),

    /// Control call issued before anything was loaded
    #[error("No source loaded")]
    NotLoaded,
}

/// Errors that terminate a single playback session.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("Playback backend failed: {0}")]
    Backend(#[from] BackendError),

    #[error("Control thread failed: {0}")]
    ControlThread(String),
}

/// Errors surfaced by the navigation coordinator to its caller.
#[derive(Debug, Error)]
pub enum NavigationError {
    #[error(transparent)]
    Timeline(#[from] TimelineError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Configuration load/save errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config edit error: {0}")]
    Edit(#[from] toml_edit::TomlError),

    #[error("No config directory available")]
    NoConfigDir,
}

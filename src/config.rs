//! Persistent application configuration model and defaults.

use std::path::PathBuf;

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Where songs and the database live.
    pub library: LibraryConfig,
    #[serde(default)]
    /// Session timing and navigation preferences.
    pub playback: PlaybackConfig,
    #[serde(default)]
    /// Timeline retention.
    pub timeline: TimelineConfig,
}

/// Library location preferences.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LibraryConfig {
    /// Root folder that relative song paths are resolved against.
    #[serde(default)]
    pub folder: String,
    /// SQLite file. Empty means `<data dir>/spear/library.db`.
    #[serde(default)]
    pub database_path: String,
}

/// What becomes the "current" song after one finishes on its own.
#[derive(Debug, Clone, Copy, serde::Deserialize, serde::Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum NextSongMode {
    /// Uniform pick across the whole catalog.
    #[default]
    Random,
    /// Title-sorted successor of the current song, wrapping around.
    #[serde(alias = "alphabetical")]
    Alpha,
    /// Follow the timeline forward.
    History,
    /// Follow the timeline backward.
    #[serde(rename = "history_r", alias = "history_reverse")]
    HistoryReverse,
}

impl NextSongMode {
    /// Parses the short names accepted on the command line.
    pub fn from_arg(arg: &str) -> Option<Self> {
        match arg.trim().to_ascii_lowercase().as_str() {
            "r" | "random" => Some(Self::Random),
            "a" | "alpha" | "alphabetical" => Some(Self::Alpha),
            "h" | "history" => Some(Self::History),
            "hr" | "history_r" | "history-reverse" => Some(Self::HistoryReverse),
            _ => None,
        }
    }

    pub fn as_config_str(self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::Alpha => "alpha",
            Self::History => "history",
            Self::HistoryReverse => "history_r",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Random => "Random",
            Self::Alpha => "Alphabetical",
            Self::History => "History (forward)",
            Self::HistoryReverse => "History (reverse)",
        }
    }
}

/// Playback session tuning.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_input_poll_ms")]
    pub input_poll_ms: u64,
    #[serde(default = "default_seek_small_ms")]
    pub seek_small_ms: u64,
    #[serde(default = "default_seek_big_ms")]
    pub seek_big_ms: u64,
    /// Fraction of the duration that counts as one listen.
    #[serde(default = "default_listen_threshold")]
    pub listen_threshold: f64,
    #[serde(default)]
    pub next_song_mode: NextSongMode,
}

/// Timeline retention preferences.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct TimelineConfig {
    /// Entries kept behind the cursor before the oldest are pruned.
    #[serde(default = "default_max_past_entries")]
    pub max_past_entries: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            input_poll_ms: default_input_poll_ms(),
            seek_small_ms: default_seek_small_ms(),
            seek_big_ms: default_seek_big_ms(),
            listen_threshold: default_listen_threshold(),
            next_song_mode: NextSongMode::Random,
        }
    }
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            max_past_entries: default_max_past_entries(),
        }
    }
}

impl LibraryConfig {
    /// Resolves a stored song path against the library folder.
    pub fn resolve_song_path(&self, stored: &std::path::Path) -> PathBuf {
        if stored.is_absolute() || self.folder.is_empty() {
            stored.to_path_buf()
        } else {
            PathBuf::from(&self.folder).join(stored)
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_input_poll_ms() -> u64 {
    50
}

fn default_seek_small_ms() -> u64 {
    5_000
}

fn default_seek_big_ms() -> u64 {
    30_000
}

fn default_listen_threshold() -> f64 {
    0.7
}

pub fn default_max_past_entries() -> usize {
    crate::timeline::DEFAULT_MAX_PAST_ENTRIES
}

/// Clamps out-of-range values loaded from disk.
pub fn sanitize_config(config: Config) -> Config {
    let mut config = config;
    config.playback.poll_interval_ms = config.playback.poll_interval_ms.clamp(10, 1_000);
    config.playback.input_poll_ms = config.playback.input_poll_ms.clamp(5, 500);
    if config.playback.seek_small_ms == 0 {
        config.playback.seek_small_ms = default_seek_small_ms();
    }
    if config.playback.seek_big_ms == 0 {
        config.playback.seek_big_ms = default_seek_big_ms();
    }
    let threshold = config.playback.listen_threshold;
    if !threshold.is_finite() || threshold <= 0.0 || threshold > 1.0 {
        config.playback.listen_threshold = default_listen_threshold();
    }
    if config.timeline.max_past_entries == 0 {
        config.timeline.max_past_entries = default_max_past_entries();
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_yields_defaults() {
        let config: Config = toml::from_str("").expect("empty config should parse");
        assert_eq!(config, Config::default());
        assert_eq!(config.playback.poll_interval_ms, 100);
        assert_eq!(config.timeline.max_past_entries, 100);
        assert_eq!(config.playback.next_song_mode, NextSongMode::Random);
    }

    #[test]
    fn test_next_song_mode_names_round_trip_through_toml() {
        let config: Config = toml::from_str(
            r#"
            [playback]
            next_song_mode = "history_r"
            "#,
        )
        .expect("config should parse");
        assert_eq!(config.playback.next_song_mode, NextSongMode::HistoryReverse);

        let serialized = toml::to_string(&config).expect("config should serialize");
        assert!(serialized.contains("next_song_mode = \"history_r\""));
    }

    #[test]
    fn test_mode_aliases_from_arguments() {
        assert_eq!(NextSongMode::from_arg("r"), Some(NextSongMode::Random));
        assert_eq!(NextSongMode::from_arg("ALPHA"), Some(NextSongMode::Alpha));
        assert_eq!(NextSongMode::from_arg("h"), Some(NextSongMode::History));
        assert_eq!(
            NextSongMode::from_arg("hr"),
            Some(NextSongMode::HistoryReverse)
        );
        assert_eq!(NextSongMode::from_arg("shuffle"), None);
    }

    #[test]
    fn test_sanitize_clamps_invalid_values() {
        let mut config = Config::default();
        config.playback.poll_interval_ms = 0;
        config.playback.listen_threshold = 3.5;
        config.playback.seek_big_ms = 0;
        config.timeline.max_past_entries = 0;

        let sanitized = sanitize_config(config);
        assert_eq!(sanitized.playback.poll_interval_ms, 10);
        assert_eq!(sanitized.playback.listen_threshold, 0.7);
        assert_eq!(sanitized.playback.seek_big_ms, 30_000);
        assert_eq!(sanitized.timeline.max_past_entries, 100);
    }

    #[test]
    fn test_relative_song_paths_resolve_against_library_folder() {
        let library = LibraryConfig {
            folder: "/music".to_string(),
            database_path: String::new(),
        };
        assert_eq!(
            library.resolve_song_path(std::path::Path::new("a.mp3")),
            PathBuf::from("/music/a.mp3")
        );
        assert_eq!(
            library.resolve_song_path(std::path::Path::new("/elsewhere/b.mp3")),
            PathBuf::from("/elsewhere/b.mp3")
        );
    }
}

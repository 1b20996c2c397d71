//! Library collaborators consumed by the playback engine.
//!
//! The engine only sees the traits below; the SQLite types are what the
//! binary wires in.

pub mod listen_log;
pub mod playlists;
pub mod song_catalog;

use crate::{
    error::CatalogError,
    protocol::{SongRef, SongUid},
};

pub use listen_log::SqliteListenLog;
pub use playlists::SqlitePlaylists;
pub use song_catalog::SqliteSongCatalog;

/// Read access to the songs that can currently be played.
pub trait SongCatalog: Send + Sync {
    /// Looks up a stored reference. Malformed or deleted uids resolve to `None`.
    fn resolve(&self, uid: &str) -> Result<Option<SongRef>, CatalogError>;

    /// Uniform pick across the catalog, `None` when it is empty.
    fn random_song_uid(&self) -> Result<Option<SongUid>, CatalogError>;

    /// Title-ordered successor of `current`, wrapping to the first title.
    /// Returns the first title when `current` is `None` or unknown.
    fn alphabetical_successor(
        &self,
        current: Option<&SongUid>,
    ) -> Result<Option<SongUid>, CatalogError>;
}

/// Sink for "this song was listened to" events.
pub trait ListenLogger: Send + Sync {
    fn record_listen(&self, song_uid: &SongUid) -> Result<(), CatalogError>;
}

/// Source of the ordered song list of a named playlist.
pub trait PlaylistSource {
    fn playlist_song_uids(&self, playlist_uid: &str) -> Result<Vec<SongUid>, CatalogError>;
}

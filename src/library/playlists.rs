//! Minimal playlist storage: enough to create a playlist, fill it and walk it.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};

use super::PlaylistSource;
use crate::{
    error::CatalogError,
    protocol::{seeded_rng, SongUid},
};

/// Named playlist summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistInfo {
    pub uid: SongUid,
    pub name: String,
    pub song_count: usize,
}

pub struct SqlitePlaylists {
    conn: Mutex<Connection>,
}

impl SqlitePlaylists {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create_playlist(&self, name: &str) -> Result<SongUid, CatalogError> {
        let uid = SongUid::generate(&mut seeded_rng());
        self.lock().execute(
            "INSERT INTO playlists (uid, name, created_at) VALUES (?1, ?2, ?3)",
            params![uid.as_str(), name, Utc::now()],
        )?;
        debug!("Playlists: created {} ({})", name, uid);
        Ok(uid)
    }

    pub fn all_playlists(&self) -> Result<Vec<PlaylistInfo>, CatalogError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT p.uid, p.name, COUNT(i.id)
             FROM playlists p LEFT JOIN playlist_items i ON i.playlist_uid = p.uid
             GROUP BY p.uid ORDER BY p.name ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut playlists = Vec::new();
        for row in rows {
            let (uid, name, song_count) = row?;
            playlists.push(PlaylistInfo {
                uid: SongUid::parse(&uid)?,
                name,
                song_count: song_count.max(0) as usize,
            });
        }
        Ok(playlists)
    }

    /// Accepts either a playlist uid or its exact name.
    pub fn find_playlist(&self, uid_or_name: &str) -> Result<Option<SongUid>, CatalogError> {
        let uid: Option<String> = self
            .lock()
            .query_row(
                "SELECT uid FROM playlists WHERE uid = ?1 OR name = ?1 LIMIT 1",
                params![uid_or_name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(uid.map(|uid| SongUid::parse(&uid)).transpose()?)
    }

    /// Appends a song at the end of a playlist.
    pub fn add_song(&self, playlist_uid: &SongUid, song_uid: &SongUid) -> Result<(), CatalogError> {
        let conn = self.lock();
        ensure_playlist_exists(&conn, playlist_uid.as_str())?;
        let next_position: i64 = conn.query_row(
            "SELECT COALESCE(MAX(position), 0) + 1 FROM playlist_items WHERE playlist_uid = ?1",
            params![playlist_uid.as_str()],
            |row| row.get(0),
        )?;
        conn.execute(
            "INSERT INTO playlist_items (playlist_uid, song_uid, position, added_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                playlist_uid.as_str(),
                song_uid.as_str(),
                next_position,
                Utc::now()
            ],
        )?;
        Ok(())
    }

    /// Moves the item at 1-based `from` to 1-based `to`.
    ///
    /// Returns `Ok(false)` when either position is out of range so callers can
    /// report a soft error.
    pub fn move_song(
        &self,
        playlist_uid: &SongUid,
        from: usize,
        to: usize,
    ) -> Result<bool, CatalogError> {
        let mut conn = self.lock();
        ensure_playlist_exists(&conn, playlist_uid.as_str())?;
        let tx = conn.transaction()?;
        let ids = {
            let mut stmt = tx.prepare(
                "SELECT id FROM playlist_items WHERE playlist_uid = ?1 ORDER BY position ASC",
            )?;
            let ids = stmt
                .query_map(params![playlist_uid.as_str()], |row| row.get::<_, i64>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };

        if from == 0 || to == 0 || from > ids.len() || to > ids.len() {
            return Ok(false);
        }

        let mut ids = ids;
        let moved = ids.remove(from - 1);
        ids.insert(to - 1, moved);
        for (index, id) in ids.iter().enumerate() {
            tx.execute(
                "UPDATE playlist_items SET position = ?1 WHERE id = ?2",
                params![index as i64 + 1, id],
            )?;
        }
        tx.commit()?;
        Ok(true)
    }
}

fn ensure_playlist_exists(conn: &Connection, playlist_uid: &str) -> Result<(), CatalogError> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM playlists WHERE uid = ?1",
            params![playlist_uid],
            |_| Ok(()),
        )
        .optional()?;
    match exists {
        Some(()) => Ok(()),
        None => Err(CatalogError::PlaylistNotFound(playlist_uid.to_string())),
    }
}

impl PlaylistSource for SqlitePlaylists {
    fn playlist_song_uids(&self, playlist_uid: &str) -> Result<Vec<SongUid>, CatalogError> {
        let conn = self.lock();
        ensure_playlist_exists(&conn, playlist_uid)?;
        let mut stmt = conn.prepare(
            "SELECT song_uid FROM playlist_items WHERE playlist_uid = ?1 ORDER BY position ASC",
        )?;
        let rows = stmt.query_map(params![playlist_uid], |row| row.get::<_, String>(0))?;

        let mut uids = Vec::new();
        for row in rows {
            uids.push(SongUid::parse(&row?)?);
        }
        Ok(uids)
    }
}

use std::{
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use chrono::Utc;
use log::debug;
use rusqlite::{params, Connection, OptionalExtension};

use super::SongCatalog;
use crate::{
    error::CatalogError,
    protocol::{is_valid_uid, seeded_rng, SongRef, SongUid},
};

/// `songs` table backed catalog.
pub struct SqliteSongCatalog {
    conn: Mutex<Connection>,
}

impl SqliteSongCatalog {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a song and returns its fresh uid.
    pub fn add_song(
        &self,
        title: &str,
        path: &Path,
        duration_ms: u64,
        url: Option<&str>,
    ) -> Result<SongUid, CatalogError> {
        let mut rng = seeded_rng();

        let conn = self.lock();
        let now = Utc::now();
        loop {
            let uid = SongUid::generate(&mut rng);
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO songs (uid, title, url, duration_ms, add_date, path, last_modified)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?5)",
                params![
                    uid.as_str(),
                    title,
                    url,
                    duration_ms as i64,
                    now,
                    path.to_string_lossy().into_owned()
                ],
            )?;
            if inserted == 1 {
                debug!("SongCatalog: added {} ({})", title, uid);
                return Ok(uid);
            }
        }
    }

    pub fn remove_song(&self, uid: &str) -> Result<bool, CatalogError> {
        let removed = self
            .lock()
            .execute("DELETE FROM songs WHERE uid = ?1", params![uid])?;
        Ok(removed > 0)
    }

    /// All songs sorted by title; the order used for 1-based song numbers.
    pub fn songs_alphabetically(&self) -> Result<Vec<SongRef>, CatalogError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT uid, title, duration_ms, path FROM songs ORDER BY title ASC, uid ASC",
        )?;
        let rows = stmt.query_map([], row_to_song_parts)?;

        let mut songs = Vec::new();
        for row in rows {
            let (uid, title, duration_ms, path) = row?;
            songs.push(SongRef {
                uid: SongUid::parse(&uid)?,
                title,
                duration_ms,
                path,
            });
        }
        Ok(songs)
    }
}

fn row_to_song_parts(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, u64, PathBuf)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get::<_, i64>(2)?.max(0) as u64,
        PathBuf::from(row.get::<_, String>(3)?),
    ))
}

impl SongCatalog for SqliteSongCatalog {
    fn resolve(&self, uid: &str) -> Result<Option<SongRef>, CatalogError> {
        if !is_valid_uid(uid) {
            return Ok(None);
        }
        let conn = self.lock();
        let parts = conn
            .query_row(
                "SELECT uid, title, duration_ms, path FROM songs WHERE uid = ?1",
                params![uid],
                row_to_song_parts,
            )
            .optional()?;

        match parts {
            Some((uid, title, duration_ms, path)) => Ok(Some(SongRef {
                uid: SongUid::parse(&uid)?,
                title,
                duration_ms,
                path,
            })),
            None => Ok(None),
        }
    }

    fn random_song_uid(&self) -> Result<Option<SongUid>, CatalogError> {
        let uid: Option<String> = self
            .lock()
            .query_row(
                "SELECT uid FROM songs ORDER BY RANDOM() LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(uid.map(|uid| SongUid::parse(&uid)).transpose()?)
    }

    fn alphabetical_successor(
        &self,
        current: Option<&SongUid>,
    ) -> Result<Option<SongUid>, CatalogError> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT uid FROM songs ORDER BY title ASC, uid ASC")?;
        let uids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let Some(first) = uids.first() else {
            return Ok(None);
        };
        let next = current
            .and_then(|current| uids.iter().position(|uid| uid == current.as_str()))
            .map(|index| &uids[(index + 1) % uids.len()])
            .unwrap_or(first);
        Ok(Some(SongUid::parse(next)?))
    }
}

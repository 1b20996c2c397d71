use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use log::debug;
use rusqlite::{params, Connection};

use super::ListenLogger;
use crate::{error::CatalogError, protocol::SongUid};

/// Appends to `listen_history`. A listen is only recorded once a session has
/// played enough of a song, so this table is distinct from the timeline.
pub struct SqliteListenLog {
    conn: Mutex<Connection>,
}

impl SqliteListenLog {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn listen_count(&self, song_uid: &SongUid) -> Result<u64, CatalogError> {
        let count: i64 = self
            .conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .query_row(
                "SELECT COUNT(*) FROM listen_history WHERE song_uid = ?1",
                params![song_uid.as_str()],
                |row| row.get(0),
            )?;
        Ok(count.max(0) as u64)
    }
}

impl ListenLogger for SqliteListenLog {
    fn record_listen(&self, song_uid: &SongUid) -> Result<(), CatalogError> {
        self.conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .execute(
                "INSERT INTO listen_history (song_uid, listened_at) VALUES (?1, ?2)",
                params![song_uid.as_str(), Utc::now()],
            )?;
        debug!("ListenLog: recorded listen for {}", song_uid);
        Ok(())
    }
}

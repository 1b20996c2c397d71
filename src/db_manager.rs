use rusqlite::Connection;
use std::{path::Path, time::Duration};

use log::debug;

/// Opens SQLite connections and keeps the schema current.
///
/// Each component (timeline, catalog, listen log) gets its own connection to
/// the same file so none of them can hold another's lock while calling out.
pub struct DbManager {
    conn: Connection,
}

impl DbManager {
    /// Opens (creating if needed) the database file. The parent directory
    /// must already exist.
    pub fn open(db_path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let journal_mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "foreign_keys", true)?;

        let db_manager = Self { conn };
        db_manager.initialize_schema()?;
        db_manager.migrate()?;
        debug!(
            "DbManager: opened {} (journal_mode={})",
            db_path.display(),
            journal_mode
        );
        Ok(db_manager)
    }

    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", true)?;
        let db_manager = Self { conn };
        db_manager.initialize_schema()?;
        db_manager.migrate()?;
        Ok(db_manager)
    }

    #[cfg(test)]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }

    fn initialize_schema(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS songs (
                uid TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                url TEXT,
                duration_ms INTEGER NOT NULL DEFAULT 0,
                add_date TEXT NOT NULL,
                path TEXT NOT NULL,
                last_modified TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_title ON songs(title);

            CREATE TABLE IF NOT EXISTS playback_timeline (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                song_uid TEXT NOT NULL,
                position INTEGER NOT NULL,
                added_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_timeline_position ON playback_timeline(position);

            CREATE TABLE IF NOT EXISTS playback_cursor (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                position INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS listen_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                song_uid TEXT NOT NULL,
                listened_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_song_uid ON listen_history(song_uid);

            CREATE TABLE IF NOT EXISTS playlists (
                uid TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS playlist_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                playlist_uid TEXT NOT NULL,
                song_uid TEXT NOT NULL,
                position INTEGER NOT NULL,
                added_at TEXT NOT NULL,
                FOREIGN KEY (playlist_uid) REFERENCES playlists(uid) ON DELETE CASCADE
            );",
        )
    }

    fn migrate(&self) -> Result<(), rusqlite::Error> {
        // Older databases predate resume offsets
        let mut stmt = self.conn.prepare("PRAGMA table_info(playback_cursor)")?;
        let columns = stmt.query_map([], |row| row.get::<_, String>(1))?;
        let mut has_resume_ms = false;
        for col in columns {
            if col? == "resume_ms" {
                has_resume_ms = true;
                break;
            }
        }

        if !has_resume_ms {
            self.conn.execute(
                "ALTER TABLE playback_cursor ADD COLUMN resume_ms INTEGER NOT NULL DEFAULT 0",
                [],
            )?;
        }

        self.conn.execute(
            "INSERT OR IGNORE INTO playback_cursor (id, position, resume_ms) VALUES (1, -1, 0)",
            [],
        )?;
        Ok(())
    }
}

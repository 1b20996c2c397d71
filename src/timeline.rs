//! Persisted playback timeline.
//!
//! The timeline is an ordered log of song references with a single cursor
//! marking the current song. Entries after the cursor form the "future" and
//! are discarded whenever something new is recorded. Entries before it are
//! the history that previous/next navigation walks.
//!
//! Every public operation takes the connection lock and runs inside one
//! SQLite transaction, so the cursor and the entries never disagree on disk.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use log::{debug, info};
use rand::seq::SliceRandom;
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::{
    error::TimelineError,
    library::{PlaylistSource, SongCatalog},
    protocol::{seeded_rng, SongUid, TimelineEntry},
};

pub const DEFAULT_MAX_PAST_ENTRIES: usize = 100;

pub struct TimelineStore {
    conn: Mutex<Connection>,
    catalog: Arc<dyn SongCatalog>,
    max_past_entries: usize,
}

impl TimelineStore {
    /// `conn` must already carry the schema (see `DbManager`). The catalog is
    /// consulted during navigation to skip entries whose song disappeared.
    pub fn new(conn: Connection, catalog: Arc<dyn SongCatalog>, max_past_entries: usize) -> Self {
        Self {
            conn: Mutex::new(conn),
            catalog,
            max_past_entries: max_past_entries.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records `uid` right after the cursor, dropping any future entries, and
    /// moves the cursor onto it. Returns the resulting cursor.
    pub fn append_song(&self, uid: &str) -> Result<i64, TimelineError> {
        let uid = SongUid::parse(uid)?;

        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let cursor = read_cursor(&tx)?;
        discard_future(&tx, cursor)?;
        let position = cursor + 1;
        insert_entry(&tx, &uid, position)?;
        move_cursor(&tx, position)?;
        let cursor = prune_history(&tx, position, self.max_past_entries)?;
        tx.commit()?;

        debug!("TimelineStore: appended {} at position {}", uid, cursor);
        Ok(cursor)
    }

    /// Records a whole queue after the cursor and moves the cursor onto its
    /// first item. All uids are validated before anything is written; an
    /// empty list changes nothing. Returns the resulting cursor.
    pub fn append_song_list<S: AsRef<str>>(&self, uids: &[S]) -> Result<i64, TimelineError> {
        let uids = uids
            .iter()
            .map(|uid| SongUid::parse(uid.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut conn = self.lock();
        if uids.is_empty() {
            return read_cursor(&conn);
        }

        let tx = conn.transaction()?;
        let cursor = read_cursor(&tx)?;
        discard_future(&tx, cursor)?;
        let first = cursor + 1;
        for (offset, uid) in uids.iter().enumerate() {
            insert_entry(&tx, uid, first + offset as i64)?;
        }
        move_cursor(&tx, first)?;
        let cursor = prune_history(&tx, first, self.max_past_entries)?;
        tx.commit()?;

        debug!(
            "TimelineStore: appended {} queued songs starting at position {}",
            uids.len(),
            cursor
        );
        Ok(cursor)
    }

    /// Loads a playlist and records it like an ad-hoc queue. Returns the
    /// songs that were recorded, in order.
    pub fn append_playlist(
        &self,
        playlist_uid: &str,
        source: &dyn PlaylistSource,
    ) -> Result<Vec<SongUid>, TimelineError> {
        let uids = source.playlist_song_uids(playlist_uid)?;
        self.append_song_list(&uids)?;
        Ok(uids)
    }

    /// Moves the cursor to the nearest earlier entry whose song still
    /// resolves. Returns `None` without moving when there is none.
    pub fn skip_back(&self) -> Result<Option<SongUid>, TimelineError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let cursor = read_cursor(&tx)?;
        if cursor <= 0 {
            return Ok(None);
        }

        let candidates = {
            let mut stmt = tx.prepare(
                "SELECT position, song_uid FROM playback_timeline
                 WHERE position < ?1 ORDER BY position DESC",
            )?;
            let rows = stmt
                .query_map(params![cursor], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let Some((position, uid)) = self.first_resolvable(candidates)? else {
            debug!("TimelineStore: nothing resolvable before position {}", cursor);
            return Ok(None);
        };
        move_cursor(&tx, position)?;
        tx.commit()?;

        debug!("TimelineStore: skipped back to {} at position {}", uid, position);
        Ok(Some(uid))
    }

    /// Moves the cursor to the nearest later entry whose song still
    /// resolves, optionally shuffling the future first.
    ///
    /// When there is no future at all a random catalog song is recorded
    /// after the cursor and played instead, so forward navigation never runs
    /// dry while the catalog has songs.
    pub fn skip_forward(&self, shuffle: bool) -> Result<Option<SongUid>, TimelineError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let cursor = read_cursor(&tx)?;

        let future = {
            let mut stmt = tx.prepare(
                "SELECT id, position, song_uid FROM playback_timeline
                 WHERE position > ?1 ORDER BY position ASC",
            )?;
            let rows = stmt
                .query_map(params![cursor], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        if future.is_empty() {
            let Some(uid) = self.catalog.random_song_uid()? else {
                debug!("TimelineStore: catalog is empty, nothing to skip forward to");
                return Ok(None);
            };
            insert_entry(&tx, &uid, cursor + 1)?;
            move_cursor(&tx, cursor + 1)?;
            let position = prune_history(&tx, cursor + 1, self.max_past_entries)?;
            tx.commit()?;
            info!(
                "TimelineStore: future exhausted, picked {} at position {}",
                uid, position
            );
            return Ok(Some(uid));
        }

        let candidates = if shuffle {
            let mut uids: Vec<String> = future.iter().map(|(_, _, uid)| uid.clone()).collect();
            uids.shuffle(&mut seeded_rng());
            for ((id, _, _), uid) in future.iter().zip(uids.iter()) {
                tx.execute(
                    "UPDATE playback_timeline SET song_uid = ?1 WHERE id = ?2",
                    params![uid, id],
                )?;
            }
            future
                .iter()
                .map(|(_, position, _)| *position)
                .zip(uids)
                .collect::<Vec<_>>()
        } else {
            future
                .into_iter()
                .map(|(_, position, uid)| (position, uid))
                .collect()
        };

        let Some((position, uid)) = self.first_resolvable(candidates)? else {
            debug!("TimelineStore: nothing resolvable after position {}", cursor);
            // Keep the shuffle even when nothing in it resolves
            tx.commit()?;
            return Ok(None);
        };
        move_cursor(&tx, position)?;
        tx.commit()?;

        debug!(
            "TimelineStore: skipped forward to {} at position {}",
            uid, position
        );
        Ok(Some(uid))
    }

    /// Unchecked `cursor += 1`, used while walking a queue that was appended
    /// in one go.
    pub fn advance_cursor(&self) -> Result<i64, TimelineError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let position = read_cursor(&tx)? + 1;
        move_cursor(&tx, position)?;
        tx.commit()?;
        Ok(position)
    }

    /// Current cursor, -1 when the timeline is empty.
    pub fn cursor(&self) -> Result<i64, TimelineError> {
        read_cursor(&self.lock())
    }

    /// Stored reference at the cursor. The raw value is returned; it may no
    /// longer resolve in the catalog.
    pub fn current_song_uid(&self) -> Result<Option<String>, TimelineError> {
        let conn = self.lock();
        let cursor = read_cursor(&conn)?;
        if cursor < 0 {
            return Ok(None);
        }
        Ok(conn
            .query_row(
                "SELECT song_uid FROM playback_timeline WHERE position = ?1",
                params![cursor],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn resume_offset_ms(&self) -> Result<u64, TimelineError> {
        let resume_ms: i64 = self.lock().query_row(
            "SELECT resume_ms FROM playback_cursor WHERE id = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(resume_ms.max(0) as u64)
    }

    pub fn set_resume_offset_ms(&self, offset_ms: u64) -> Result<(), TimelineError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE playback_cursor SET resume_ms = ?1 WHERE id = 1",
            params![offset_ms as i64],
        )?;
        tx.commit()?;
        debug!("TimelineStore: resume offset set to {} ms", offset_ms);
        Ok(())
    }

    /// Every stored entry in ascending position order.
    pub fn timeline_window(&self) -> Result<Vec<TimelineEntry>, TimelineError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT position, song_uid, added_at FROM playback_timeline ORDER BY position ASC",
        )?;
        let entries = stmt
            .query_map([], |row| {
                Ok(TimelineEntry {
                    position: row.get(0)?,
                    song_uid: row.get(1)?,
                    added_at: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn clear(&self) -> Result<(), TimelineError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM playback_timeline", [])?;
        move_cursor(&tx, -1)?;
        tx.commit()?;
        info!("TimelineStore: cleared");
        Ok(())
    }

    fn first_resolvable(
        &self,
        candidates: Vec<(i64, String)>,
    ) -> Result<Option<(i64, SongUid)>, TimelineError> {
        for (position, uid) in candidates {
            if let Some(song) = self.catalog.resolve(&uid)? {
                return Ok(Some((position, song.uid)));
            }
            debug!(
                "TimelineStore: skipping unresolvable {} at position {}",
                uid, position
            );
        }
        Ok(None)
    }
}

fn read_cursor(conn: &Connection) -> Result<i64, TimelineError> {
    Ok(conn.query_row(
        "SELECT position FROM playback_cursor WHERE id = 1",
        [],
        |row| row.get(0),
    )?)
}

/// Any cursor move invalidates the saved resume offset.
fn move_cursor(tx: &Transaction<'_>, position: i64) -> Result<(), TimelineError> {
    tx.execute(
        "UPDATE playback_cursor SET position = ?1, resume_ms = 0 WHERE id = 1",
        params![position],
    )?;
    Ok(())
}

fn discard_future(tx: &Transaction<'_>, cursor: i64) -> Result<(), TimelineError> {
    let removed = tx.execute(
        "DELETE FROM playback_timeline WHERE position > ?1",
        params![cursor],
    )?;
    if removed > 0 {
        debug!("TimelineStore: discarded {} future entries", removed);
    }
    Ok(())
}

fn insert_entry(tx: &Transaction<'_>, uid: &SongUid, position: i64) -> Result<(), TimelineError> {
    tx.execute(
        "INSERT INTO playback_timeline (song_uid, position, added_at) VALUES (?1, ?2, ?3)",
        params![uid.as_str(), position, Utc::now()],
    )?;
    Ok(())
}

/// Drops the oldest history beyond `max_past` and renumbers the remaining
/// rows to `0..n`. The cursor stays on the same row, which matters when the
/// same song appears more than once. Returns the cursor after renumbering.
fn prune_history(
    tx: &Transaction<'_>,
    cursor: i64,
    max_past: usize,
) -> Result<i64, TimelineError> {
    let past: i64 = tx.query_row(
        "SELECT COUNT(*) FROM playback_timeline WHERE position < ?1",
        params![cursor],
        |row| row.get(0),
    )?;
    let excess = past - max_past as i64;
    if excess <= 0 {
        return Ok(cursor);
    }

    let cursor_id: Option<i64> = tx
        .query_row(
            "SELECT id FROM playback_timeline WHERE position = ?1",
            params![cursor],
            |row| row.get(0),
        )
        .optional()?;

    tx.execute(
        "DELETE FROM playback_timeline WHERE id IN (
            SELECT id FROM playback_timeline ORDER BY position ASC LIMIT ?1
        )",
        params![excess],
    )?;

    let ids = {
        let mut stmt = tx.prepare("SELECT id FROM playback_timeline ORDER BY position ASC")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        ids
    };

    let mut new_cursor = cursor - excess;
    for (index, id) in ids.iter().enumerate() {
        tx.execute(
            "UPDATE playback_timeline SET position = ?1 WHERE id = ?2",
            params![index as i64, id],
        )?;
        if Some(*id) == cursor_id {
            new_cursor = index as i64;
        }
    }
    tx.execute(
        "UPDATE playback_cursor SET position = ?1 WHERE id = 1",
        params![new_cursor],
    )?;

    debug!(
        "TimelineStore: pruned {} old entries, cursor renumbered {} -> {}",
        excess, cursor, new_cursor
    );
    Ok(new_cursor)
}

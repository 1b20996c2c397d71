//! Sequencing of playback sessions.
//!
//! The coordinator owns the backend and the input source, starts one session
//! at a time and decides what happens after each exit: persist a resume
//! offset, advance within a queue, follow a previous/next navigation or pick
//! the next "current" song.
//!
//! Navigation chains are an explicit state machine so any number of
//! previous/next hops runs in constant stack.

use std::sync::Arc;

use log::{debug, info, warn};
use rand::seq::SliceRandom;

use crate::{
    audio::PlaybackBackend,
    config::{LibraryConfig, NextSongMode},
    error::{NavigationError, PlaybackError},
    input::InputSource,
    library::{ListenLogger, PlaylistSource, SongCatalog},
    protocol::{seeded_rng, ExitReason, SessionOutcome, SongRef, SongUid},
    terminal_ui::ProgressDisplay,
    timeline::TimelineStore,
};

use super::session::{PlaybackSession, SessionContext, SessionOptions};

/// Progress of a queue walk, reported to a `QueueObserver`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    /// Item `index` (0-based) of `len` is about to play.
    Started {
        index: usize,
        len: usize,
        title: String,
    },
    /// Item `index` no longer resolves and is skipped.
    Unavailable { index: usize, len: usize, uid: String },
    /// Navigation left the range of the queue; the walk is abandoned.
    NavigatedAway,
    Finished { len: usize },
    Aborted,
}

pub trait QueueObserver {
    fn on_queue_event(&mut self, event: &QueueEvent);
}

/// How `play_chain` treats its first song and the exits that follow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainOptions {
    /// The song is already at the timeline cursor; do not record it again.
    pub from_timeline: bool,
    /// Return right after the first navigation without playing its target.
    pub single_step: bool,
    /// Where the first song starts. Later songs in the chain start at 0.
    pub start_offset_ms: u64,
    /// A queue walker advances the cursor itself after natural ends.
    pub in_queue: bool,
    /// Repeat the first song until the user leaves it.
    pub loop_enabled: bool,
}

/// How a chain of sessions finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainExit {
    Ended,
    Skipped,
    Aborted,
    /// Single-step mode only: the cursor is on `target`, which has not
    /// been started.
    Navigated(SongUid),
    /// The requested song, or the target of a navigation, does not resolve.
    Unavailable(String),
}

/// How a queue walk finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEnd {
    Finished,
    Aborted,
    NavigatedAway,
}

enum ChainState {
    Playing {
        song: SongRef,
        start_offset_ms: u64,
        loop_enabled: bool,
    },
    NavigatePending {
        target: SongUid,
    },
    Exited(ChainExit),
}

/// Everything the coordinator drives. Built once per run of the binary.
pub struct CoordinatorParts {
    pub timeline: Arc<TimelineStore>,
    pub catalog: Arc<dyn SongCatalog>,
    pub listen_log: Arc<dyn ListenLogger>,
    pub backend: Box<dyn PlaybackBackend>,
    pub input: Box<dyn InputSource>,
    pub display: Box<dyn ProgressDisplay>,
    pub observer: Box<dyn QueueObserver>,
    pub options: SessionOptions,
    pub next_song_mode: NextSongMode,
    pub library: LibraryConfig,
}

pub struct NavigationCoordinator {
    timeline: Arc<TimelineStore>,
    catalog: Arc<dyn SongCatalog>,
    listen_log: Arc<dyn ListenLogger>,
    backend: Box<dyn PlaybackBackend>,
    // Lent to each session's control thread and handed back when it ends
    input: Option<Box<dyn InputSource>>,
    display: Box<dyn ProgressDisplay>,
    observer: Box<dyn QueueObserver>,
    options: SessionOptions,
    next_song_mode: NextSongMode,
    library: LibraryConfig,
}

impl NavigationCoordinator {
    pub fn new(parts: CoordinatorParts) -> Self {
        Self {
            timeline: parts.timeline,
            catalog: parts.catalog,
            listen_log: parts.listen_log,
            backend: parts.backend,
            input: Some(parts.input),
            display: parts.display,
            observer: parts.observer,
            options: parts.options,
            next_song_mode: parts.next_song_mode,
            library: parts.library,
        }
    }

    #[cfg(test)]
    pub fn set_next_song_mode(&mut self, mode: NextSongMode) {
        self.next_song_mode = mode;
    }

    /// Records `uid` in the timeline and plays it, following any
    /// previous/next navigation from there.
    pub fn play_single(&mut self, uid: &SongUid) -> Result<ChainExit, NavigationError> {
        let Some(song) = self.catalog.resolve(uid.as_str())? else {
            warn!("NavigationCoordinator: {} is not in the library", uid);
            return Ok(ChainExit::Unavailable(uid.to_string()));
        };
        self.play_chain(song, ChainOptions::default())
    }

    /// Like `play_single` but repeats the song until the user leaves it.
    pub fn play_looped(&mut self, uid: &SongUid) -> Result<ChainExit, NavigationError> {
        let Some(song) = self.catalog.resolve(uid.as_str())? else {
            warn!("NavigationCoordinator: {} is not in the library", uid);
            return Ok(ChainExit::Unavailable(uid.to_string()));
        };
        self.play_chain(
            song,
            ChainOptions {
                loop_enabled: true,
                ..ChainOptions::default()
            },
        )
    }

    /// Plays the song at the timeline cursor from its saved resume offset.
    /// Returns `None` when the timeline is empty.
    pub fn resume_current(&mut self) -> Result<Option<ChainExit>, NavigationError> {
        let Some(uid) = self.timeline.current_song_uid()? else {
            return Ok(None);
        };
        let Some(song) = self.catalog.resolve(&uid)? else {
            warn!("NavigationCoordinator: current song {} is gone", uid);
            return Ok(Some(ChainExit::Unavailable(uid)));
        };
        let start_offset_ms = self.timeline.resume_offset_ms()?;
        info!(
            "NavigationCoordinator: resuming {} at {} ms",
            song.uid, start_offset_ms
        );
        self.play_chain(
            song,
            ChainOptions {
                from_timeline: true,
                start_offset_ms,
                ..ChainOptions::default()
            },
        )
        .map(Some)
    }

    /// Plays an ad-hoc queue, optionally shuffled first.
    pub fn play_queue(
        &mut self,
        mut uids: Vec<SongUid>,
        shuffle: bool,
    ) -> Result<QueueEnd, NavigationError> {
        if uids.is_empty() {
            debug!("NavigationCoordinator: empty queue, nothing to play");
            return Ok(QueueEnd::Finished);
        }
        if shuffle {
            uids.shuffle(&mut seeded_rng());
        }
        let base = self.timeline.append_song_list(&uids)?;
        self.walk_queue(&uids, base)
    }

    /// Plays a stored playlist as a queue.
    pub fn play_playlist(
        &mut self,
        playlist_uid: &str,
        source: &dyn PlaylistSource,
        shuffle: bool,
    ) -> Result<QueueEnd, NavigationError> {
        let uids = if shuffle {
            let mut uids = source.playlist_song_uids(playlist_uid)?;
            uids.shuffle(&mut seeded_rng());
            self.timeline.append_song_list(&uids)?;
            uids
        } else {
            self.timeline.append_playlist(playlist_uid, source)?
        };

        // Nothing was walked, so nothing was aborted either
        if uids.is_empty() {
            debug!("NavigationCoordinator: playlist {} is empty", playlist_uid);
            self.pick_next_current()?;
            return Ok(QueueEnd::Finished);
        }
        let base = self.timeline.cursor()?;
        self.walk_queue(&uids, base)
    }

    /// Applies the configured next-song mode. Returns the new current song.
    pub fn pick_next_current(&self) -> Result<Option<SongUid>, NavigationError> {
        let picked = match self.next_song_mode {
            NextSongMode::History => self.timeline.skip_forward(false)?,
            NextSongMode::HistoryReverse => self.timeline.skip_back()?,
            NextSongMode::Random => self.append_pick(self.catalog.random_song_uid()?)?,
            NextSongMode::Alpha => {
                let current = self
                    .timeline
                    .current_song_uid()?
                    .and_then(|uid| SongUid::parse(&uid).ok());
                let next = self.catalog.alphabetical_successor(current.as_ref())?;
                self.append_pick(next)?
            }
        };
        match &picked {
            Some(uid) => debug!(
                "NavigationCoordinator: next current song is {} ({})",
                uid,
                self.next_song_mode.label()
            ),
            None => debug!("NavigationCoordinator: no next current song"),
        }
        Ok(picked)
    }

    fn append_pick(&self, uid: Option<SongUid>) -> Result<Option<SongUid>, NavigationError> {
        if let Some(uid) = &uid {
            self.timeline.append_song(uid.as_str())?;
        }
        Ok(uid)
    }

    /// Plays `song` and keeps following previous/next navigation until a
    /// session ends any other way.
    pub fn play_chain(
        &mut self,
        song: SongRef,
        options: ChainOptions,
    ) -> Result<ChainExit, NavigationError> {
        if !options.from_timeline {
            self.timeline.append_song(song.uid.as_str())?;
        }

        let mut state = ChainState::Playing {
            song,
            start_offset_ms: options.start_offset_ms,
            loop_enabled: options.loop_enabled,
        };
        loop {
            state = match state {
                ChainState::Playing {
                    song,
                    start_offset_ms,
                    loop_enabled,
                } => {
                    let outcome = self.play_song(song, start_offset_ms, loop_enabled)?;
                    self.after_session(outcome, options)?
                }
                ChainState::NavigatePending { target } => {
                    match self.catalog.resolve(target.as_str())? {
                        Some(song) => ChainState::Playing {
                            song,
                            start_offset_ms: 0,
                            loop_enabled: false,
                        },
                        None => {
                            warn!(
                                "NavigationCoordinator: navigation target {} vanished",
                                target
                            );
                            ChainState::Exited(ChainExit::Unavailable(target.to_string()))
                        }
                    }
                }
                ChainState::Exited(exit) => return Ok(exit),
            };
        }
    }

    fn after_session(
        &self,
        outcome: SessionOutcome,
        options: ChainOptions,
    ) -> Result<ChainState, NavigationError> {
        let state = match outcome.exit {
            ExitReason::Ended => {
                if !options.in_queue {
                    self.pick_next_current()?;
                }
                ChainState::Exited(ChainExit::Ended)
            }
            ExitReason::Skip => {
                self.timeline
                    .set_resume_offset_ms(outcome.last_known_position_ms)?;
                ChainState::Exited(ChainExit::Skipped)
            }
            ExitReason::Abort => {
                self.timeline
                    .set_resume_offset_ms(outcome.last_known_position_ms)?;
                ChainState::Exited(ChainExit::Aborted)
            }
            // The cursor already moved; its resume offset was reset with it
            ExitReason::Navigate { target } => {
                if options.single_step {
                    ChainState::Exited(ChainExit::Navigated(target))
                } else {
                    ChainState::NavigatePending { target }
                }
            }
        };
        Ok(state)
    }

    fn walk_queue(&mut self, uids: &[SongUid], base: i64) -> Result<QueueEnd, NavigationError> {
        let len = uids.len();
        info!(
            "NavigationCoordinator: walking a queue of {} songs from position {}",
            len, base
        );

        let mut index = 0;
        while index < len {
            let Some(song) = self.catalog.resolve(uids[index].as_str())? else {
                self.observer.on_queue_event(&QueueEvent::Unavailable {
                    index,
                    len,
                    uid: uids[index].to_string(),
                });
                // Keep the cursor in step with the queue
                if index + 1 < len {
                    self.timeline.advance_cursor()?;
                }
                index += 1;
                continue;
            };

            self.observer.on_queue_event(&QueueEvent::Started {
                index,
                len,
                title: song.title.clone(),
            });
            let exit = self.play_chain(
                song,
                ChainOptions {
                    from_timeline: true,
                    single_step: true,
                    in_queue: true,
                    ..ChainOptions::default()
                },
            )?;

            match exit {
                ChainExit::Navigated(_) => {
                    let landed = self.timeline.cursor()? - base;
                    if landed < 0 || landed >= len as i64 {
                        self.observer.on_queue_event(&QueueEvent::NavigatedAway);
                        return Ok(QueueEnd::NavigatedAway);
                    }
                    index = landed as usize;
                }
                ChainExit::Aborted => {
                    self.observer.on_queue_event(&QueueEvent::Aborted);
                    return Ok(QueueEnd::Aborted);
                }
                ChainExit::Ended | ChainExit::Skipped | ChainExit::Unavailable(_) => {
                    if index + 1 < len {
                        self.timeline.advance_cursor()?;
                    }
                    index += 1;
                }
            }
        }

        self.observer.on_queue_event(&QueueEvent::Finished { len });
        self.pick_next_current()?;
        Ok(QueueEnd::Finished)
    }

    fn play_song(
        &mut self,
        song: SongRef,
        start_offset_ms: u64,
        loop_enabled: bool,
    ) -> Result<SessionOutcome, NavigationError> {
        let input = self.input.take().ok_or_else(|| {
            PlaybackError::ControlThread("input source was lost by an earlier session".to_string())
        })?;
        let source = self.library.resolve_song_path(&song.path);

        let ctx = SessionContext {
            backend: self.backend.as_mut(),
            timeline: &self.timeline,
            listen_log: self.listen_log.as_ref(),
            display: self.display.as_mut(),
            options: &self.options,
        };
        let run = PlaybackSession::new(song, source)
            .with_start_offset(start_offset_ms)
            .with_loop(loop_enabled)
            .run(ctx, input);

        self.input = run.input;
        run.result.map_err(NavigationError::from)
    }
}

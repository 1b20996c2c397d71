//! One song from start to exit.
//!
//! A session runs two activities. The control activity is a spawned thread
//! that blocks on the input source and turns key presses into
//! `ControlMessage`s. Previous/next are resolved against the timeline right
//! there, so by the time the poll side sees a `Navigate` exit the cursor has
//! already moved. The poll activity runs on the calling thread, owns
//! `SessionState` and the backend, applies messages in order and renders
//! progress at a fixed interval.

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

use crate::{
    audio::PlaybackBackend,
    config::PlaybackConfig,
    error::{PlaybackError, TimelineError},
    input::InputSource,
    library::ListenLogger,
    protocol::{ControlMessage, ExitReason, InputEvent, SessionOutcome, SongRef, SongUid},
    terminal_ui::{PlaybackStatus, ProgressDisplay},
    timeline::TimelineStore,
};

/// Seeks never land closer than this to the end of the song.
const END_GUARD_MS: u64 = 1_000;
const MAX_DECILE_PERCENT: u64 = 95;

/// Timing and step sizes shared by every session of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub poll_interval: Duration,
    pub input_poll_timeout: Duration,
    pub seek_small_ms: u64,
    pub seek_big_ms: u64,
    /// Fraction of the duration that counts as one listen.
    pub listen_threshold: f64,
}

impl SessionOptions {
    pub fn from_config(config: &PlaybackConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            input_poll_timeout: Duration::from_millis(config.input_poll_ms),
            seek_small_ms: config.seek_small_ms,
            seek_big_ms: config.seek_big_ms,
            listen_threshold: config.listen_threshold,
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&PlaybackConfig::default())
    }
}

/// Collaborators a session borrows from its owner for the duration of a song.
pub struct SessionContext<'a> {
    pub backend: &'a mut dyn PlaybackBackend,
    pub timeline: &'a Arc<TimelineStore>,
    pub listen_log: &'a dyn ListenLogger,
    pub display: &'a mut dyn ProgressDisplay,
    pub options: &'a SessionOptions,
}

/// What a session hands back. The input source is returned whenever the
/// control thread could be joined, even when playback failed.
pub struct SessionRun {
    pub input: Option<Box<dyn InputSource>>,
    pub result: Result<SessionOutcome, PlaybackError>,
}

/// Mutable per-song state, written only by the poll activity.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub song_uid: SongUid,
    pub is_playing: bool,
    pub is_stopped: bool,
    pub loop_enabled: bool,
    pub loop_iteration: u32,
    pub cumulative_played_ms: u64,
    pub listen_log_count: u32,
    pub last_known_position_ms: u64,
    /// Start of the current uninterrupted stretch of playback.
    playing_since: Option<Instant>,
    listens_logged: u32,
    last_duration_ms: u64,
}

impl SessionState {
    fn new(song_uid: SongUid, loop_enabled: bool, start_offset_ms: u64) -> Self {
        Self {
            song_uid,
            is_playing: false,
            is_stopped: false,
            loop_enabled,
            loop_iteration: 0,
            cumulative_played_ms: 0,
            listen_log_count: 0,
            last_known_position_ms: start_offset_ms,
            playing_since: None,
            listens_logged: 0,
            last_duration_ms: 0,
        }
    }

    fn start_playing(&mut self, now: Instant) {
        self.is_playing = true;
        self.is_stopped = false;
        if self.playing_since.is_none() {
            self.playing_since = Some(now);
        }
    }

    /// Folds the running stretch into the cumulative total.
    fn accumulate(&mut self, now: Instant) {
        if let Some(since) = self.playing_since.take() {
            self.cumulative_played_ms += now.saturating_duration_since(since).as_millis() as u64;
        }
    }

    fn played_ms(&self, now: Instant) -> u64 {
        let running = self
            .playing_since
            .map(|since| now.saturating_duration_since(since).as_millis() as u64)
            .unwrap_or(0);
        self.cumulative_played_ms + running
    }

    fn status(&self) -> PlaybackStatus {
        if self.is_stopped {
            PlaybackStatus::Stopped
        } else if self.is_playing {
            PlaybackStatus::Playing
        } else {
            PlaybackStatus::Paused
        }
    }

    fn outcome(&self, exit: ExitReason, position_ms: u64) -> SessionOutcome {
        SessionOutcome {
            exit,
            last_known_position_ms: position_ms,
            listens_logged: self.listens_logged,
            loop_iterations: self.loop_iteration,
        }
    }
}

/// Target of a decile jump, kept short of the end of the song.
pub fn decile_target_ms(duration_ms: u64, decile: u8) -> u64 {
    let decile = decile.min(9) as u64;
    (duration_ms * decile / 10)
        .min(duration_ms * MAX_DECILE_PERCENT / 100)
        .min(duration_ms.saturating_sub(END_GUARD_MS))
}

/// Relative seek target clamped to `[0, duration - 1s]`.
pub fn seek_target_ms(position_ms: u64, delta_ms: i64, duration_ms: u64) -> u64 {
    position_ms
        .saturating_add_signed(delta_ms)
        .min(duration_ms.saturating_sub(END_GUARD_MS))
}

pub struct PlaybackSession {
    song: SongRef,
    source: PathBuf,
    start_offset_ms: u64,
    loop_enabled: bool,
}

impl PlaybackSession {
    /// `source` is the resolved file path of `song`.
    pub fn new(song: SongRef, source: PathBuf) -> Self {
        Self {
            song,
            source,
            start_offset_ms: 0,
            loop_enabled: false,
        }
    }

    pub fn with_start_offset(mut self, start_offset_ms: u64) -> Self {
        self.start_offset_ms = start_offset_ms;
        self
    }

    pub fn with_loop(mut self, loop_enabled: bool) -> Self {
        self.loop_enabled = loop_enabled;
        self
    }

    /// Plays the song until it ends or the user leaves it.
    pub fn run(self, mut ctx: SessionContext<'_>, input: Box<dyn InputSource>) -> SessionRun {
        info!(
            "PlaybackSession: starting {} ({}) at {} ms",
            self.song.title, self.song.uid, self.start_offset_ms
        );
        ctx.display.show_header(&self.song.title);

        if let Err(err) = ctx.backend.play(&self.source, self.start_offset_ms) {
            error!(
                "PlaybackSession: failed to start {}: {}",
                self.source.display(),
                err
            );
            ctx.display.finish();
            return SessionRun {
                input: Some(input),
                result: Err(err.into()),
            };
        }

        let (sender, mut receiver) = mpsc::unbounded_channel();
        let exit_flag = Arc::new(AtomicBool::new(false));

        let control = ControlActivity {
            input,
            timeline: ctx.timeline.clone(),
            sender,
            exit_flag: exit_flag.clone(),
            poll_timeout: ctx.options.input_poll_timeout,
            seek_small_ms: ctx.options.seek_small_ms,
            seek_big_ms: ctx.options.seek_big_ms,
        };
        let handle = match thread::Builder::new()
            .name("playback-control".to_string())
            .spawn(move || control.run())
        {
            Ok(handle) => handle,
            Err(err) => {
                error!("PlaybackSession: failed to spawn control thread: {}", err);
                if let Err(stop_err) = ctx.backend.stop() {
                    warn!("PlaybackSession: failed to stop backend: {}", stop_err);
                }
                ctx.display.finish();
                return SessionRun {
                    input: None,
                    result: Err(PlaybackError::ControlThread(err.to_string())),
                };
            }
        };

        let mut state = SessionState::new(
            self.song.uid.clone(),
            self.loop_enabled,
            self.start_offset_ms,
        );
        state.start_playing(Instant::now());

        let mut result = self.poll(&mut state, &mut receiver, &mut ctx);
        exit_flag.store(true, Ordering::SeqCst);

        let input = match handle.join() {
            Ok(input) => Some(input),
            Err(_) => {
                error!("PlaybackSession: control thread panicked");
                if result.is_ok() {
                    result = Err(PlaybackError::ControlThread(
                        "control thread panicked".to_string(),
                    ));
                }
                None
            }
        };

        // A navigation committed while the song was ending still wins
        if let Ok(outcome) = &mut result {
            if outcome.exit == ExitReason::Ended {
                while let Ok(message) = receiver.try_recv() {
                    if let ControlMessage::Exit(exit @ ExitReason::Navigate { .. }) = message {
                        debug!("PlaybackSession: late navigation {:?}", exit);
                        outcome.exit = exit;
                        outcome.last_known_position_ms = state.last_known_position_ms;
                    }
                }
            }
        }

        match &result {
            Ok(outcome) => info!(
                "PlaybackSession: {} exited with {:?} at {} ms",
                self.song.uid, outcome.exit, outcome.last_known_position_ms
            ),
            Err(err) => {
                if let Err(stop_err) = ctx.backend.stop() {
                    warn!("PlaybackSession: failed to stop backend: {}", stop_err);
                }
                error!("PlaybackSession: {} failed: {}", self.song.uid, err);
            }
        }
        ctx.display.finish();

        SessionRun { input, result }
    }

    fn poll(
        &self,
        state: &mut SessionState,
        receiver: &mut UnboundedReceiver<ControlMessage>,
        ctx: &mut SessionContext<'_>,
    ) -> Result<SessionOutcome, PlaybackError> {
        loop {
            loop {
                let message = match receiver.try_recv() {
                    Ok(message) => message,
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        warn!("PlaybackSession: control activity went away, aborting");
                        return self.exit_interrupted(state, ExitReason::Abort, ctx);
                    }
                };
                if let ControlMessage::Exit(exit) = message {
                    return self.exit_interrupted(state, exit, ctx);
                }
                self.apply(message, state, ctx)?;
            }

            let now = Instant::now();
            if !state.is_stopped && ctx.backend.has_ended_naturally() {
                state.accumulate(now);
                self.check_listen(state, now, ctx);

                if !state.loop_enabled {
                    // Kept for a navigation that lands after the end
                    state.last_known_position_ms = ctx.backend.position_ms();
                    ctx.backend.stop()?;
                    return Ok(state.outcome(ExitReason::Ended, 0));
                }

                state.loop_iteration += 1;
                state.cumulative_played_ms = 0;
                state.listen_log_count = 0;
                debug!(
                    "PlaybackSession: looping {} (iteration {})",
                    state.song_uid, state.loop_iteration
                );
                ctx.backend.play(&self.source, 0)?;
                state.start_playing(Instant::now());
            } else {
                self.check_listen(state, now, ctx);
            }

            if !state.is_stopped {
                state.last_known_position_ms = ctx.backend.position_ms();
            }
            let duration_ms = self.duration_ms(state, ctx);
            ctx.display
                .show_progress(state.status(), state.last_known_position_ms, duration_ms);

            thread::sleep(ctx.options.poll_interval);
        }
    }

    fn apply(
        &self,
        message: ControlMessage,
        state: &mut SessionState,
        ctx: &mut SessionContext<'_>,
    ) -> Result<(), PlaybackError> {
        let now = Instant::now();
        match message {
            ControlMessage::TogglePlayPause => {
                if state.is_stopped {
                    return Ok(());
                }
                if state.is_playing {
                    ctx.backend.pause()?;
                    state.accumulate(now);
                    state.is_playing = false;
                } else {
                    ctx.backend.resume()?;
                    state.start_playing(now);
                }
            }
            ControlMessage::Stop => {
                ctx.backend.stop()?;
                state.accumulate(now);
                state.is_playing = false;
                state.is_stopped = true;
                state.last_known_position_ms = 0;
            }
            ControlMessage::Restart => {
                if state.is_stopped {
                    ctx.backend.play(&self.source, 0)?;
                } else {
                    ctx.backend.seek_to(0)?;
                    if !state.is_playing {
                        ctx.backend.resume()?;
                    }
                }
                state.start_playing(now);
                state.last_known_position_ms = 0;
            }
            ControlMessage::SeekBy(delta_ms) => {
                if state.is_stopped {
                    return Ok(());
                }
                let duration_ms = self.duration_ms(state, ctx);
                if duration_ms == 0 {
                    ctx.backend.seek_by(delta_ms)?;
                } else {
                    let target =
                        seek_target_ms(ctx.backend.position_ms(), delta_ms, duration_ms);
                    ctx.backend.seek_to(target)?;
                }
            }
            ControlMessage::JumpToDecile(decile) => {
                let duration_ms = self.duration_ms(state, ctx);
                if state.is_stopped || duration_ms == 0 {
                    return Ok(());
                }
                ctx.backend.seek_to(decile_target_ms(duration_ms, decile))?;
            }
            ControlMessage::Exit(_) => {}
        }
        Ok(())
    }

    fn exit_interrupted(
        &self,
        state: &mut SessionState,
        exit: ExitReason,
        ctx: &mut SessionContext<'_>,
    ) -> Result<SessionOutcome, PlaybackError> {
        state.accumulate(Instant::now());
        let position_ms = ctx.backend.position_ms();
        ctx.backend.stop()?;
        state.last_known_position_ms = position_ms;
        Ok(state.outcome(exit, position_ms))
    }

    fn duration_ms(&self, state: &mut SessionState, ctx: &SessionContext<'_>) -> u64 {
        let reported = ctx.backend.duration_ms();
        if reported > 0 {
            state.last_duration_ms = reported;
        }
        if state.last_duration_ms > 0 {
            state.last_duration_ms
        } else {
            self.song.duration_ms
        }
    }

    /// Logs one listen each time the played time crosses the next multiple
    /// of the threshold.
    fn check_listen(&self, state: &mut SessionState, now: Instant, ctx: &mut SessionContext<'_>) {
        let duration_ms = self.duration_ms(state, ctx);
        if duration_ms == 0 {
            return;
        }
        let next_threshold =
            (state.listen_log_count + 1) as f64 * ctx.options.listen_threshold * duration_ms as f64;
        if (state.played_ms(now) as f64) < next_threshold {
            return;
        }

        state.listen_log_count += 1;
        match ctx.listen_log.record_listen(&state.song_uid) {
            Ok(()) => {
                state.listens_logged += 1;
                debug!("PlaybackSession: logged listen for {}", state.song_uid);
            }
            Err(err) => warn!(
                "PlaybackSession: failed to log listen for {}: {}",
                state.song_uid, err
            ),
        }
    }
}

/// Input side of a session, run on the `playback-control` thread.
struct ControlActivity {
    input: Box<dyn InputSource>,
    timeline: Arc<TimelineStore>,
    sender: UnboundedSender<ControlMessage>,
    exit_flag: Arc<AtomicBool>,
    poll_timeout: Duration,
    seek_small_ms: u64,
    seek_big_ms: u64,
}

impl ControlActivity {
    /// Returns the input source so the next song can reuse it.
    fn run(mut self) -> Box<dyn InputSource> {
        while !self.exit_flag.load(Ordering::SeqCst) {
            let event = match self.input.poll_event(self.poll_timeout) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(err) => {
                    error!("PlaybackSession: input failed, aborting: {}", err);
                    self.finish(ExitReason::Abort);
                    break;
                }
            };
            if self.exit_flag.load(Ordering::SeqCst) {
                break;
            }

            let Some(message) = self.translate(event) else {
                continue;
            };
            if let ControlMessage::Exit(exit) = message {
                self.finish(exit);
                break;
            }
            if self.sender.send(message).is_err() {
                break;
            }
        }
        self.input
    }

    fn translate(&self, event: InputEvent) -> Option<ControlMessage> {
        let seek_small = self.seek_small_ms as i64;
        let seek_big = self.seek_big_ms as i64;
        let message = match event {
            InputEvent::PlayPause => ControlMessage::TogglePlayPause,
            InputEvent::Stop => ControlMessage::Stop,
            InputEvent::Restart => ControlMessage::Restart,
            InputEvent::SeekSmallBack => ControlMessage::SeekBy(-seek_small),
            InputEvent::SeekBigBack => ControlMessage::SeekBy(-seek_big),
            InputEvent::SeekSmallFwd => ControlMessage::SeekBy(seek_small),
            InputEvent::SeekBigFwd => ControlMessage::SeekBy(seek_big),
            InputEvent::JumpToDecile(decile) => ControlMessage::JumpToDecile(decile.min(9)),
            InputEvent::Skip => ControlMessage::Exit(ExitReason::Skip),
            InputEvent::Abort => ControlMessage::Exit(ExitReason::Abort),
            InputEvent::Prev => self.navigate(self.timeline.skip_back(), "previous")?,
            InputEvent::Next => self.navigate(self.timeline.skip_forward(false), "next")?,
        };
        Some(message)
    }

    fn navigate(
        &self,
        target: Result<Option<SongUid>, TimelineError>,
        direction: &str,
    ) -> Option<ControlMessage> {
        match target {
            Ok(Some(target)) => {
                debug!("PlaybackSession: navigating {} to {}", direction, target);
                Some(ControlMessage::Exit(ExitReason::Navigate { target }))
            }
            Ok(None) => {
                debug!("PlaybackSession: no {} song, ignoring", direction);
                None
            }
            Err(err) => {
                warn!("PlaybackSession: {} navigation failed: {}", direction, err);
                None
            }
        }
    }

    fn finish(&self, exit: ExitReason) {
        self.exit_flag.store(true, Ordering::SeqCst);
        if self.sender.send(ControlMessage::Exit(exit)).is_err() {
            debug!("PlaybackSession: poll activity already gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db_manager::DbManager,
        test_support::{
            MemoryCatalog, RecordingDisplay, RecordingListenLog, ScriptedInput, SimBackend, Step,
        },
    };
    use std::path::Path;

    struct Harness {
        backend: SimBackend,
        timeline: Arc<TimelineStore>,
        listen_log: RecordingListenLog,
        display: RecordingDisplay,
        options: SessionOptions,
    }

    fn uid(c: char) -> String {
        c.to_string().repeat(16)
    }

    fn song(c: char, duration_ms: u64) -> SongRef {
        SongRef {
            uid: SongUid::parse(&uid(c)).unwrap(),
            title: format!("Song {c}"),
            duration_ms,
            path: PathBuf::from(format!("{c}.mp3")),
        }
    }

    fn fast_options() -> SessionOptions {
        SessionOptions {
            poll_interval: Duration::from_millis(5),
            input_poll_timeout: Duration::from_millis(5),
            ..SessionOptions::default()
        }
    }

    impl Harness {
        fn new(songs: &[SongRef]) -> Self {
            let catalog = Arc::new(MemoryCatalog::with_songs(songs));
            let backend = SimBackend::new();
            for song in songs {
                backend.set_duration(&song.path, song.duration_ms);
            }
            let conn = DbManager::new_in_memory().unwrap().into_connection();
            let timeline = Arc::new(TimelineStore::new(conn, catalog, 100));
            Self {
                backend,
                timeline,
                listen_log: RecordingListenLog::default(),
                display: RecordingDisplay::default(),
                options: fast_options(),
            }
        }

        fn run(&mut self, session: PlaybackSession, steps: Vec<Step>) -> SessionRun {
            let ctx = SessionContext {
                backend: &mut self.backend,
                timeline: &self.timeline,
                listen_log: &self.listen_log,
                display: &mut self.display,
                options: &self.options,
            };
            session.run(ctx, Box::new(ScriptedInput::new(steps)))
        }
    }

    fn session_for(song: &SongRef) -> PlaybackSession {
        PlaybackSession::new(song.clone(), song.path.clone())
    }

    #[test]
    fn test_natural_end_reports_zero_position_and_logs_listen() {
        let a = song('a', 100);
        let mut harness = Harness::new(&[a.clone()]);

        let run = harness.run(session_for(&a), vec![]);
        let outcome = run.result.unwrap();

        assert!(run.input.is_some());
        assert_eq!(outcome.exit, ExitReason::Ended);
        assert_eq!(outcome.last_known_position_ms, 0);
        assert_eq!(outcome.listens_logged, 1);
        assert_eq!(harness.listen_log.listens(), vec![a.uid.clone()]);
        assert!(harness.display.headers().contains(&a.title));
        assert!(harness.display.finished() >= 1);
    }

    #[test]
    fn test_skip_reports_backend_position() {
        let a = song('a', 600_000);
        let mut harness = Harness::new(&[a.clone()]);

        let run = harness.run(
            session_for(&a),
            vec![Step::Wait(Duration::from_millis(80)), Step::Key(InputEvent::Skip)],
        );
        let outcome = run.result.unwrap();

        assert_eq!(outcome.exit, ExitReason::Skip);
        let stopped_at = harness.backend.last_stop_position_ms().unwrap();
        assert!(outcome.last_known_position_ms >= 60);
        assert!(stopped_at.abs_diff(outcome.last_known_position_ms) <= 5);
        assert!(!harness.backend.is_playing());
        assert!(harness.listen_log.listens().is_empty());
    }

    #[test]
    fn test_abort_while_paused_keeps_exact_seek_position() {
        let a = song('a', 10_000);
        let mut harness = Harness::new(&[a.clone()]);

        let run = harness.run(
            session_for(&a),
            vec![
                Step::Key(InputEvent::PlayPause),
                Step::Key(InputEvent::SeekBigFwd),
                Step::Wait(Duration::from_millis(30)),
                Step::Key(InputEvent::Abort),
            ],
        );
        let outcome = run.result.unwrap();

        assert_eq!(outcome.exit, ExitReason::Abort);
        assert_eq!(outcome.last_known_position_ms, 9_000);
    }

    #[test]
    fn test_decile_jump_is_clamped_before_the_end() {
        let a = song('a', 5_000);
        let mut harness = Harness::new(&[a.clone()]);

        let run = harness.run(
            session_for(&a),
            vec![
                Step::Key(InputEvent::PlayPause),
                Step::Key(InputEvent::JumpToDecile(9)),
                Step::Wait(Duration::from_millis(30)),
                Step::Key(InputEvent::Skip),
            ],
        );
        assert_eq!(run.result.unwrap().last_known_position_ms, 4_000);
    }

    #[test]
    fn test_seek_targets() {
        assert_eq!(seek_target_ms(3_000, -5_000, 10_000), 0);
        assert_eq!(seek_target_ms(3_000, 5_000, 10_000), 8_000);
        assert_eq!(seek_target_ms(8_000, 30_000, 10_000), 9_000);
        assert_eq!(decile_target_ms(100_000, 5), 50_000);
        assert_eq!(decile_target_ms(100_000, 9), 90_000);
        assert_eq!(decile_target_ms(5_000, 9), 4_000);
        assert_eq!(decile_target_ms(100_000, 12), 90_000);
        assert_eq!(decile_target_ms(500, 5), 0);
    }

    #[test]
    fn test_toggle_is_ignored_while_stopped_and_restart_replays() {
        let a = song('a', 600_000);
        let mut harness = Harness::new(&[a.clone()]);

        let run = harness.run(
            session_for(&a),
            vec![
                Step::Key(InputEvent::Stop),
                Step::Key(InputEvent::PlayPause),
                Step::Wait(Duration::from_millis(30)),
                Step::Key(InputEvent::Restart),
                Step::Wait(Duration::from_millis(30)),
                Step::Key(InputEvent::Skip),
            ],
        );
        run.result.unwrap();

        let calls = harness.backend.calls();
        let resumes = calls.iter().filter(|call| call.as_str() == "resume").count();
        let plays = calls.iter().filter(|call| call.starts_with("play")).count();
        assert_eq!(resumes, 0, "{calls:?}");
        assert_eq!(plays, 2, "{calls:?}");
    }

    #[test]
    fn test_previous_key_moves_cursor_before_exit() {
        let a = song('a', 600_000);
        let b = song('b', 600_000);
        let mut harness = Harness::new(&[a.clone(), b.clone()]);
        harness.timeline.append_song(a.uid.as_str()).unwrap();
        harness.timeline.append_song(b.uid.as_str()).unwrap();

        let run = harness.run(
            session_for(&b),
            vec![Step::Wait(Duration::from_millis(40)), Step::Key(InputEvent::Prev)],
        );
        let outcome = run.result.unwrap();

        assert_eq!(outcome.exit, ExitReason::Navigate { target: a.uid.clone() });
        assert!(outcome.last_known_position_ms >= 20);
        assert_eq!(harness.timeline.cursor().unwrap(), 0);
    }

    #[test]
    fn test_navigation_without_target_is_a_no_op() {
        let a = song('a', 600_000);
        let mut harness = Harness::new(&[a.clone()]);
        harness.timeline.append_song(a.uid.as_str()).unwrap();

        let run = harness.run(
            session_for(&a),
            vec![Step::Key(InputEvent::Prev), Step::Key(InputEvent::Skip)],
        );

        assert_eq!(run.result.unwrap().exit, ExitReason::Skip);
        assert_eq!(harness.timeline.cursor().unwrap(), 0);
    }

    #[test]
    fn test_loop_mode_logs_again_on_later_iterations() {
        let a = song('a', 100);
        let mut harness = Harness::new(&[a.clone()]);

        let run = harness.run(
            session_for(&a).with_loop(true),
            vec![Step::Wait(Duration::from_millis(350)), Step::Key(InputEvent::Skip)],
        );
        let outcome = run.result.unwrap();

        assert_eq!(outcome.exit, ExitReason::Skip);
        assert!(outcome.loop_iterations >= 1);
        assert!(outcome.listens_logged >= 2, "{outcome:?}");
        assert_eq!(harness.listen_log.listens().len() as u32, outcome.listens_logged);
    }

    #[test]
    fn test_pause_time_does_not_count_towards_listen() {
        let a = song('a', 200);
        let mut harness = Harness::new(&[a.clone()]);

        let run = harness.run(
            session_for(&a),
            vec![
                Step::Key(InputEvent::PlayPause),
                Step::Wait(Duration::from_millis(250)),
                Step::Key(InputEvent::Skip),
            ],
        );

        assert_eq!(run.result.unwrap().listens_logged, 0);
        assert!(harness.listen_log.listens().is_empty());
    }

    #[test]
    fn test_listen_log_failure_does_not_stop_playback() {
        let a = song('a', 100);
        let mut harness = Harness::new(&[a.clone()]);
        harness.listen_log.fail_writes();

        let outcome = harness.run(session_for(&a), vec![]).result.unwrap();
        assert_eq!(outcome.exit, ExitReason::Ended);
        assert_eq!(outcome.listens_logged, 0);
    }

    #[test]
    fn test_backend_failure_returns_error_and_input() {
        let a = song('a', 1_000);
        let mut harness = Harness::new(&[a.clone()]);
        harness.backend.fail_on_play(Path::new("a.mp3"));

        let run = harness.run(session_for(&a), vec![]);
        assert!(matches!(run.result, Err(PlaybackError::Backend(_))));
        assert!(run.input.is_some());
    }

    #[test]
    fn test_start_offset_is_passed_to_backend() {
        let a = song('a', 600_000);
        let mut harness = Harness::new(&[a.clone()]);

        let run = harness.run(
            session_for(&a).with_start_offset(42_000),
            vec![Step::Key(InputEvent::PlayPause), Step::Key(InputEvent::Abort)],
        );
        let outcome = run.result.unwrap();
        assert!(harness.backend.calls()[0].starts_with("play a.mp3 @42000"));
        assert!(outcome.last_known_position_ms >= 42_000);
    }

    #[test]
    fn test_input_failure_aborts_the_session() {
        let a = song('a', 600_000);
        let mut harness = Harness::new(&[a.clone()]);

        let run = harness.run(
            session_for(&a),
            vec![Step::Wait(Duration::from_millis(20)), Step::Fail],
        );
        assert_eq!(run.result.unwrap().exit, ExitReason::Abort);
        assert!(run.input.is_some());
        assert!(harness.display.progress_updates() > 0);
    }

    #[test]
    fn test_navigation_reports_position_the_backend_stopped_at() {
        let a = song('a', 600_000);
        let b = song('b', 600_000);
        let mut harness = Harness::new(&[a.clone(), b.clone()]);
        harness.timeline.append_song(a.uid.as_str()).unwrap();
        harness.timeline.append_song(b.uid.as_str()).unwrap();

        // Paused first so the position cannot drift between reads
        let run = harness.run(
            session_for(&b),
            vec![
                Step::Wait(Duration::from_millis(40)),
                Step::Key(InputEvent::PlayPause),
                Step::Wait(Duration::from_millis(20)),
                Step::Key(InputEvent::Prev),
            ],
        );
        let outcome = run.result.unwrap();

        assert_eq!(outcome.exit, ExitReason::Navigate { target: a.uid.clone() });
        assert!(outcome.last_known_position_ms > 0);
        assert_eq!(
            Some(outcome.last_known_position_ms),
            harness.backend.last_stop_position_ms()
        );
    }

    #[test]
    fn test_next_pressed_as_the_song_ends_wins_over_natural_end() {
        let a = song('a', 40);
        let b = song('b', 600_000);
        let mut harness = Harness::new(&[a.clone(), b.clone()]);
        harness.timeline.append_song(a.uid.as_str()).unwrap();
        harness.timeline.append_song(b.uid.as_str()).unwrap();
        harness.timeline.skip_back().unwrap();
        harness
            .backend
            .hold_end_until_cursor_moves(harness.timeline.clone());

        let run = harness.run(
            session_for(&a),
            vec![Step::Wait(Duration::from_millis(80)), Step::Key(InputEvent::Next)],
        );
        let outcome = run.result.unwrap();

        assert_eq!(outcome.exit, ExitReason::Navigate { target: b.uid.clone() });
        assert_eq!(outcome.last_known_position_ms, 40);
        assert_eq!(harness.timeline.cursor().unwrap(), 1);
        assert_eq!(harness.timeline.timeline_window().unwrap().len(), 2);
    }
}

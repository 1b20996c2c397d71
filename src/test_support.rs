//! In-memory fakes for the playback engine's collaborators.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
    thread,
    time::{Duration, Instant},
};

use rand::seq::SliceRandom;

use crate::{
    audio::PlaybackBackend,
    error::{BackendError, CatalogError},
    input::InputSource,
    library::{ListenLogger, PlaylistSource, SongCatalog},
    playback::{QueueEvent, QueueObserver},
    protocol::{seeded_rng, InputEvent, SongRef, SongUid},
    terminal_ui::{PlaybackStatus, ProgressDisplay},
    timeline::TimelineStore,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct MemoryCatalog {
    songs: Mutex<Vec<SongRef>>,
}

impl MemoryCatalog {
    pub fn with_songs(songs: &[SongRef]) -> Self {
        Self {
            songs: Mutex::new(songs.to_vec()),
        }
    }

    /// Songs titled after their uid, unknown duration.
    pub fn with_uids(uids: &[String]) -> Self {
        let songs = uids
            .iter()
            .map(|uid| SongRef {
                uid: SongUid::parse(uid).expect("test uid"),
                title: uid.clone(),
                duration_ms: 0,
                path: PathBuf::from(format!("{uid}.mp3")),
            })
            .collect::<Vec<_>>();
        Self::with_songs(&songs)
    }

    pub fn remove(&self, uid: &str) {
        lock(&self.songs).retain(|song| song.uid.as_str() != uid);
    }
}

impl SongCatalog for MemoryCatalog {
    fn resolve(&self, uid: &str) -> Result<Option<SongRef>, CatalogError> {
        Ok(lock(&self.songs)
            .iter()
            .find(|song| song.uid.as_str() == uid)
            .cloned())
    }

    fn random_song_uid(&self) -> Result<Option<SongUid>, CatalogError> {
        Ok(lock(&self.songs)
            .choose(&mut seeded_rng())
            .map(|song| song.uid.clone()))
    }

    fn alphabetical_successor(
        &self,
        current: Option<&SongUid>,
    ) -> Result<Option<SongUid>, CatalogError> {
        let mut songs = lock(&self.songs).clone();
        songs.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.uid.cmp(&b.uid)));
        let Some(first) = songs.first() else {
            return Ok(None);
        };
        let next = current
            .and_then(|current| songs.iter().position(|song| &song.uid == current))
            .map(|index| &songs[(index + 1) % songs.len()])
            .unwrap_or(first);
        Ok(Some(next.uid.clone()))
    }
}

#[derive(Default)]
pub struct MemoryPlaylists {
    playlists: Mutex<HashMap<String, Vec<SongUid>>>,
}

impl MemoryPlaylists {
    pub fn insert(&self, playlist_uid: &str, song_uids: &[String]) {
        let songs = song_uids
            .iter()
            .map(|uid| SongUid::parse(uid).expect("test uid"))
            .collect();
        lock(&self.playlists).insert(playlist_uid.to_string(), songs);
    }
}

impl PlaylistSource for MemoryPlaylists {
    fn playlist_song_uids(&self, playlist_uid: &str) -> Result<Vec<SongUid>, CatalogError> {
        lock(&self.playlists)
            .get(playlist_uid)
            .cloned()
            .ok_or_else(|| CatalogError::PlaylistNotFound(playlist_uid.to_string()))
    }
}

#[derive(Default, Clone)]
pub struct RecordingListenLog {
    listens: Arc<Mutex<Vec<SongUid>>>,
    failing: Arc<Mutex<bool>>,
}

impl RecordingListenLog {
    pub fn listens(&self) -> Vec<SongUid> {
        lock(&self.listens).clone()
    }

    pub fn fail_writes(&self) {
        *lock(&self.failing) = true;
    }
}

impl ListenLogger for RecordingListenLog {
    fn record_listen(&self, song_uid: &SongUid) -> Result<(), CatalogError> {
        if *lock(&self.failing) {
            return Err(CatalogError::Storage(rusqlite::Error::QueryReturnedNoRows));
        }
        lock(&self.listens).push(song_uid.clone());
        Ok(())
    }
}

#[derive(Default)]
struct DisplayLog {
    headers: Vec<String>,
    progress: Vec<(PlaybackStatus, u64, u64)>,
    finished: usize,
}

/// Progress display that only records what it was asked to draw.
#[derive(Default, Clone)]
pub struct RecordingDisplay {
    log: Arc<Mutex<DisplayLog>>,
}

impl RecordingDisplay {
    pub fn headers(&self) -> Vec<String> {
        lock(&self.log).headers.clone()
    }

    pub fn finished(&self) -> usize {
        lock(&self.log).finished
    }

    pub fn progress_updates(&self) -> usize {
        lock(&self.log).progress.len()
    }
}

impl ProgressDisplay for RecordingDisplay {
    fn show_header(&mut self, title: &str) {
        lock(&self.log).headers.push(title.to_string());
    }

    fn show_progress(&mut self, status: PlaybackStatus, position_ms: u64, duration_ms: u64) {
        lock(&self.log)
            .progress
            .push((status, position_ms, duration_ms));
    }

    fn finish(&mut self) {
        lock(&self.log).finished += 1;
    }
}

#[derive(Default, Clone)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<QueueEvent>>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<QueueEvent> {
        lock(&self.events).clone()
    }

    /// Indices of the queue items that were started, in order.
    pub fn started_indices(&self) -> Vec<usize> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                QueueEvent::Started { index, .. } => Some(index),
                _ => None,
            })
            .collect()
    }
}

impl QueueObserver for RecordingObserver {
    fn on_queue_event(&mut self, event: &QueueEvent) {
        lock(&self.events).push(event.clone());
    }
}

#[derive(Debug, Clone)]
pub enum Step {
    /// Nothing happens for this long, measured from when the step is reached.
    Wait(Duration),
    Key(InputEvent),
    /// The input device fails.
    Fail,
}

/// Replays a fixed script of key presses. Once the script runs out it only
/// ever times out.
pub struct ScriptedInput {
    steps: VecDeque<Step>,
    wait_until: Option<Instant>,
}

impl ScriptedInput {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into(),
            wait_until: None,
        }
    }
}

impl InputSource for ScriptedInput {
    fn poll_event(&mut self, timeout: Duration) -> io::Result<Option<InputEvent>> {
        loop {
            match self.steps.front().cloned() {
                None => {
                    thread::sleep(timeout);
                    return Ok(None);
                }
                Some(Step::Key(event)) => {
                    self.steps.pop_front();
                    return Ok(Some(event));
                }
                Some(Step::Fail) => {
                    self.steps.pop_front();
                    return Err(io::Error::new(io::ErrorKind::BrokenPipe, "input closed"));
                }
                Some(Step::Wait(duration)) => {
                    let now = Instant::now();
                    let deadline = *self.wait_until.get_or_insert(now + duration);
                    if now >= deadline {
                        self.steps.pop_front();
                        self.wait_until = None;
                        continue;
                    }
                    thread::sleep(timeout.min(deadline - now));
                    return Ok(None);
                }
            }
        }
    }
}

#[derive(Default)]
struct SimState {
    durations: HashMap<PathBuf, u64>,
    failing: HashSet<PathBuf>,
    loaded: Option<PathBuf>,
    duration_ms: u64,
    base_ms: u64,
    playing_since: Option<Instant>,
    active: bool,
    calls: Vec<String>,
    last_stop_position_ms: Option<u64>,
    end_gate: Option<EndGate>,
}

/// Holds back the first natural end until the timeline cursor leaves
/// `cursor`, so a key press can land right as the song finishes.
struct EndGate {
    timeline: Arc<TimelineStore>,
    cursor: i64,
}

impl EndGate {
    fn wait(self) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if self.timeline.cursor().unwrap() != self.cursor {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        panic!("cursor never left position {}", self.cursor);
    }
}

impl SimState {
    fn position_ms(&self) -> u64 {
        if !self.active {
            return 0;
        }
        let running = self
            .playing_since
            .map(|since| since.elapsed().as_millis() as u64)
            .unwrap_or(0);
        let position = self.base_ms + running;
        if self.duration_ms > 0 {
            position.min(self.duration_ms)
        } else {
            position
        }
    }
}

/// Backend that plays in wall-clock time without producing sound. Clones
/// share state so tests can inspect a backend owned by someone else.
#[derive(Default, Clone)]
pub struct SimBackend {
    state: Arc<Mutex<SimState>>,
}

impl SimBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_duration(&self, source: &Path, duration_ms: u64) {
        lock(&self.state)
            .durations
            .insert(source.to_path_buf(), duration_ms);
    }

    pub fn fail_on_play(&self, source: &Path) {
        lock(&self.state).failing.insert(source.to_path_buf());
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }

    /// Sources passed to `play`, in order.
    pub fn played_sources(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|call| call.strip_prefix("play "))
            .filter_map(|rest| rest.split(" @").next())
            .map(str::to_string)
            .collect()
    }

    pub fn last_stop_position_ms(&self) -> Option<u64> {
        lock(&self.state).last_stop_position_ms
    }

    /// The first time the song ends naturally, reports it only after the
    /// timeline cursor has moved away from where it is now.
    pub fn hold_end_until_cursor_moves(&self, timeline: Arc<TimelineStore>) {
        let cursor = timeline.cursor().unwrap();
        lock(&self.state).end_gate = Some(EndGate { timeline, cursor });
    }

    pub fn is_playing(&self) -> bool {
        let state = lock(&self.state);
        state.active && state.playing_since.is_some()
    }
}

impl PlaybackBackend for SimBackend {
    fn play(&mut self, source: &Path, start_offset_ms: u64) -> Result<(), BackendError> {
        let mut state = lock(&self.state);
        state
            .calls
            .push(format!("play {} @{}", source.display(), start_offset_ms));
        if state.failing.contains(source) {
            return Err(BackendError::Decode(format!(
                "simulated failure for {}",
                source.display()
            )));
        }
        state.duration_ms = state.durations.get(source).copied().unwrap_or(0);
        state.loaded = Some(source.to_path_buf());
        state.base_ms = start_offset_ms;
        state.playing_since = Some(Instant::now());
        state.active = true;
        Ok(())
    }

    fn pause(&mut self) -> Result<(), BackendError> {
        let mut state = lock(&self.state);
        state.calls.push("pause".to_string());
        if !state.active {
            return Err(BackendError::NotLoaded);
        }
        state.base_ms = state.position_ms();
        state.playing_since = None;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), BackendError> {
        let mut state = lock(&self.state);
        state.calls.push("resume".to_string());
        if !state.active {
            return Err(BackendError::NotLoaded);
        }
        if state.playing_since.is_none() {
            state.playing_since = Some(Instant::now());
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        let mut state = lock(&self.state);
        state.calls.push("stop".to_string());
        state.last_stop_position_ms = Some(state.position_ms());
        state.active = false;
        state.playing_since = None;
        state.base_ms = 0;
        Ok(())
    }

    fn seek_to(&mut self, position_ms: u64) -> Result<(), BackendError> {
        let mut state = lock(&self.state);
        state.calls.push(format!("seek {}", position_ms));
        if state.loaded.is_none() {
            return Err(BackendError::NotLoaded);
        }
        state.base_ms = if state.duration_ms > 0 {
            position_ms.min(state.duration_ms)
        } else {
            position_ms
        };
        if state.playing_since.is_some() {
            state.playing_since = Some(Instant::now());
        }
        Ok(())
    }

    fn position_ms(&self) -> u64 {
        lock(&self.state).position_ms()
    }

    fn duration_ms(&self) -> u64 {
        lock(&self.state).duration_ms
    }

    fn has_ended_naturally(&self) -> bool {
        let gate = {
            let mut state = lock(&self.state);
            let ended =
                state.active && state.duration_ms > 0 && state.position_ms() >= state.duration_ms;
            if !ended {
                return false;
            }
            state.end_gate.take()
        };
        if let Some(gate) = gate {
            gate.wait();
        }
        true
    }
}

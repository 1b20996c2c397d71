mod audio;
mod config;
mod config_persistence;
mod db_manager;
mod error;
mod input;
mod library;
mod playback;
mod protocol;
mod terminal_ui;
#[cfg(test)]
mod test_support;
mod timeline;

use std::{
    error::Error,
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{Parser, Subcommand};
use log::{info, warn};

use audio::{probe_duration_ms, CpalBackend};
use config::{Config, NextSongMode};
use config_persistence::{
    default_config_path, default_database_path, load_or_create_config, persist_config_file,
};
use db_manager::DbManager;
use error::NavigationError;
use input::TerminalInput;
use library::{ListenLogger, SongCatalog, SqliteListenLog, SqlitePlaylists, SqliteSongCatalog};
use playback::{ChainExit, CoordinatorParts, NavigationCoordinator, QueueEnd, SessionOptions};
use protocol::SongUid;
use terminal_ui::{format_time, TerminalProgress, TerminalQueueReport};
use timeline::TimelineStore;

#[derive(Parser)]
#[command(
    name = "spear",
    version,
    about = "Terminal music player with a persistent playback timeline"
)]
struct Cli {
    /// Config file to use instead of the platform default.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

/// Songs are addressed by their number in `list` or by uid.
#[derive(Subcommand)]
enum Command {
    /// Register an audio file in the library.
    Add {
        path: PathBuf,
        #[arg(long)]
        title: Option<String>,
    },
    /// Numbered, title-sorted library listing.
    List,
    /// Forget a song. Timeline entries pointing at it are kept.
    Remove { song: String },
    Play { song: String },
    /// Repeat a song until skipped.
    Loop { song: String },
    Queue {
        #[arg(required = true)]
        songs: Vec<String>,
        #[arg(long)]
        shuffle: bool,
    },
    /// Queue the whole library in random order.
    ShuffleAll,
    Playlists,
    PlaylistCreate { name: String },
    PlaylistAdd { playlist: String, song: String },
    /// Move a playlist item between 1-based positions.
    PlaylistMove {
        playlist: String,
        from: usize,
        to: usize,
    },
    PlaylistPlay {
        playlist: String,
        #[arg(long)]
        shuffle: bool,
    },
    /// Continue the current song where it was left.
    Resume,
    Status,
    Timeline,
    /// Show or set what plays after a song ends: random, alpha, history, history_r.
    Mode { mode: Option<String> },
    ClearTimeline,
}

/// Open handles on the library database, one connection per component.
struct Library {
    config: Config,
    config_path: PathBuf,
    catalog: Arc<SqliteSongCatalog>,
    timeline: Arc<TimelineStore>,
    listen_log: Arc<SqliteListenLog>,
    playlists: SqlitePlaylists,
}

impl Library {
    fn open(config_path: PathBuf) -> Result<Self, Box<dyn Error>> {
        let config = load_or_create_config(&config_path)?;

        let db_path = if config.library.database_path.is_empty() {
            default_database_path()?
        } else {
            PathBuf::from(&config.library.database_path)
        };
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        info!("Using database {}", db_path.display());

        let catalog = Arc::new(SqliteSongCatalog::new(
            DbManager::open(&db_path)?.into_connection(),
        ));
        let timeline = Arc::new(TimelineStore::new(
            DbManager::open(&db_path)?.into_connection(),
            catalog.clone(),
            config.timeline.max_past_entries,
        ));
        let listen_log = Arc::new(SqliteListenLog::new(
            DbManager::open(&db_path)?.into_connection(),
        ));
        let playlists = SqlitePlaylists::new(DbManager::open(&db_path)?.into_connection());

        Ok(Self {
            config,
            config_path,
            catalog,
            timeline,
            listen_log,
            playlists,
        })
    }

    /// `n` from the listing or a literal uid.
    fn song_arg(&self, arg: &str) -> Result<SongUid, Box<dyn Error>> {
        if let Ok(uid) = SongUid::parse(arg) {
            return Ok(uid);
        }
        let number = arg
            .parse::<usize>()
            .map_err(|_| format!("{} is neither a song number nor a uid", arg))?;
        let songs = self.catalog.songs_alphabetically()?;
        let song = number
            .checked_sub(1)
            .and_then(|index| songs.get(index))
            .ok_or_else(|| format!("no song number {} (library has {})", number, songs.len()))?;
        Ok(song.uid.clone())
    }

    fn playlist_arg(&self, arg: &str) -> Result<SongUid, Box<dyn Error>> {
        self.playlists
            .find_playlist(arg)?
            .ok_or_else(|| format!("no playlist named {}", arg).into())
    }

    fn title_of(&self, uid: &str) -> Result<String, Box<dyn Error>> {
        Ok(self
            .catalog
            .resolve(uid)?
            .map(|song| song.title)
            .unwrap_or_else(|| "<unavailable>".to_string()))
    }

    /// Runs `f` against a coordinator holding the audio device and the
    /// terminal. Both are released before this returns.
    fn with_coordinator<T>(
        &self,
        f: impl FnOnce(&mut NavigationCoordinator) -> Result<T, NavigationError>,
    ) -> Result<T, Box<dyn Error>> {
        let catalog: Arc<dyn SongCatalog> = self.catalog.clone();
        let listen_log: Arc<dyn ListenLogger> = self.listen_log.clone();
        let backend = CpalBackend::new()?;
        let input = TerminalInput::new()?;

        let mut coordinator = NavigationCoordinator::new(CoordinatorParts {
            timeline: self.timeline.clone(),
            catalog,
            listen_log,
            backend: Box::new(backend),
            input: Box::new(input),
            display: Box::new(TerminalProgress::new()),
            observer: Box::new(TerminalQueueReport),
            options: SessionOptions::from_config(&self.config.playback),
            next_song_mode: self.config.playback.next_song_mode,
            library: self.config.library.clone(),
        });
        let result = f(&mut coordinator);
        drop(coordinator);
        Ok(result?)
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let mut clog = colog::default_builder();
    clog.filter(
        None,
        if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        },
    );
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let mut library = Library::open(config_path)?;

    match cli.command {
        Command::Add { path, title } => add_song(&library, &path, title)?,
        Command::List => {
            for (index, song) in library.catalog.songs_alphabetically()?.iter().enumerate() {
                println!(
                    "{:>4}  {:<50} {:>6}  {}",
                    index + 1,
                    song.title,
                    format_time(song.duration_ms),
                    song.uid
                );
            }
        }
        Command::Remove { song } => {
            let uid = library.song_arg(&song)?;
            if library.catalog.remove_song(uid.as_str())? {
                println!("Removed {}", uid);
            } else {
                println!("{} is not in the library", uid);
            }
        }
        Command::Play { song } => {
            let uid = library.song_arg(&song)?;
            let exit = library.with_coordinator(|c| c.play_single(&uid))?;
            report_chain_exit(&exit);
        }
        Command::Loop { song } => {
            let uid = library.song_arg(&song)?;
            let exit = library.with_coordinator(|c| c.play_looped(&uid))?;
            report_chain_exit(&exit);
        }
        Command::Queue { songs, shuffle } => {
            let uids = songs
                .iter()
                .map(|song| library.song_arg(song))
                .collect::<Result<Vec<_>, _>>()?;
            let end = library.with_coordinator(|c| c.play_queue(uids, shuffle))?;
            report_queue_end(end);
        }
        Command::ShuffleAll => {
            let uids: Vec<SongUid> = library
                .catalog
                .songs_alphabetically()?
                .into_iter()
                .map(|song| song.uid)
                .collect();
            let end = library.with_coordinator(|c| c.play_queue(uids, true))?;
            report_queue_end(end);
        }
        Command::Playlists => {
            for playlist in library.playlists.all_playlists()? {
                println!(
                    "{}  {:<40} {} songs",
                    playlist.uid, playlist.name, playlist.song_count
                );
            }
        }
        Command::PlaylistCreate { name } => {
            let uid = library.playlists.create_playlist(&name)?;
            println!("Created playlist {} ({})", name, uid);
        }
        Command::PlaylistAdd { playlist, song } => {
            let playlist_uid = library.playlist_arg(&playlist)?;
            let song_uid = library.song_arg(&song)?;
            library.playlists.add_song(&playlist_uid, &song_uid)?;
            println!("Added {} to {}", library.title_of(song_uid.as_str())?, playlist);
        }
        Command::PlaylistMove { playlist, from, to } => {
            let playlist_uid = library.playlist_arg(&playlist)?;
            if library.playlists.move_song(&playlist_uid, from, to)? {
                println!("Moved item {} to {}", from, to);
            } else {
                warn!("Positions {} and {} must both be within the playlist", from, to);
            }
        }
        Command::PlaylistPlay { playlist, shuffle } => {
            let playlist_uid = library.playlist_arg(&playlist)?;
            let playlists = &library.playlists;
            let end = library.with_coordinator(|c| {
                c.play_playlist(playlist_uid.as_str(), playlists, shuffle)
            })?;
            report_queue_end(end);
        }
        Command::Resume => match library.with_coordinator(|c| c.resume_current())? {
            Some(exit) => report_chain_exit(&exit),
            None => println!("Nothing to resume, the timeline is empty"),
        },
        Command::Status => print_status(&library)?,
        Command::Timeline => print_timeline(&library)?,
        Command::Mode { mode } => match mode {
            None => println!(
                "Next song mode: {}",
                library.config.playback.next_song_mode.label()
            ),
            Some(arg) => {
                let mode = NextSongMode::from_arg(&arg).ok_or_else(|| {
                    format!(
                        "unknown mode {}, expected random, alpha, history or history_r",
                        arg
                    )
                })?;
                library.config.playback.next_song_mode = mode;
                persist_config_file(&library.config, &library.config_path)?;
                println!("Next song mode: {}", mode.label());
            }
        },
        Command::ClearTimeline => {
            library.timeline.clear()?;
            println!("Timeline cleared");
        }
    }

    Ok(())
}

fn add_song(library: &Library, path: &Path, title: Option<String>) -> Result<(), Box<dyn Error>> {
    let absolute = std::fs::canonicalize(path)?;
    let duration_ms = match probe_duration_ms(&absolute) {
        Ok(duration_ms) => duration_ms,
        Err(err) => {
            warn!(
                "Could not read the duration of {} ({}). Storing it as unknown",
                absolute.display(),
                err
            );
            0
        }
    };
    let title = title.unwrap_or_else(|| {
        absolute
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| absolute.display().to_string())
    });

    // Paths under the library folder are stored relative to it
    let folder = Path::new(&library.config.library.folder);
    let stored = if library.config.library.folder.is_empty() {
        absolute.as_path()
    } else {
        absolute.strip_prefix(folder).unwrap_or(absolute.as_path())
    };

    let uid = library.catalog.add_song(&title, stored, duration_ms, None)?;
    println!("Added {} ({}, {})", title, format_time(duration_ms), uid);
    Ok(())
}

fn print_status(library: &Library) -> Result<(), Box<dyn Error>> {
    let mode = library.config.playback.next_song_mode;
    match library.timeline.current_song_uid()? {
        None => println!("Timeline is empty"),
        Some(uid) => {
            println!("Current: {} ({})", library.title_of(&uid)?, uid);
            println!("Position: {}", library.timeline.cursor()?);
            println!(
                "Resume at: {}",
                format_time(library.timeline.resume_offset_ms()?)
            );
            if let Ok(song_uid) = SongUid::parse(&uid) {
                println!("Listens: {}", library.listen_log.listen_count(&song_uid)?);
            }
        }
    }
    println!("Next song mode: {}", mode.label());
    Ok(())
}

fn print_timeline(library: &Library) -> Result<(), Box<dyn Error>> {
    let cursor = library.timeline.cursor()?;
    let entries = library.timeline.timeline_window()?;
    if entries.is_empty() {
        println!("Timeline is empty");
        return Ok(());
    }
    for entry in entries {
        let marker = if entry.position == cursor { ">" } else { " " };
        println!(
            "{} {:>4}  {:<50} {}",
            marker,
            entry.position,
            library.title_of(&entry.song_uid)?,
            entry.added_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

fn report_chain_exit(exit: &ChainExit) {
    match exit {
        ChainExit::Ended => info!("Playback finished"),
        ChainExit::Skipped => info!("Skipped"),
        ChainExit::Aborted => info!("Stopped"),
        ChainExit::Navigated(uid) => info!("Moved to {}", uid),
        ChainExit::Unavailable(uid) => warn!("Song {} is not available", uid),
    }
}

fn report_queue_end(end: QueueEnd) {
    match end {
        QueueEnd::Finished => info!("Queue finished"),
        QueueEnd::Aborted => info!("Queue stopped"),
        QueueEnd::NavigatedAway => info!("Left the queue"),
    }
}

//! Loading and comment-preserving persistence of `config.toml`.

use std::path::{Path, PathBuf};

use log::{info, warn};
use toml_edit::{value, DocumentMut, Item, Table};

use crate::{
    config::{sanitize_config, Config},
    error::ConfigError,
};

const APP_DIR_NAME: &str = "spear";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default location of the config file under the platform config dir.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
    Ok(config_dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Default SQLite location under the platform data dir.
pub fn default_database_path() -> Result<PathBuf, ConfigError> {
    let data_dir = dirs::data_dir().ok_or(ConfigError::NoConfigDir)?;
    Ok(data_dir.join(APP_DIR_NAME).join("library.db"))
}

/// Reads the config at `path`, writing a default one first if it is missing.
pub fn load_or_create_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        info!(
            "Config file not found. Creating default config. path={}",
            path.display()
        );
        std::fs::write(path, toml::to_string(&Config::default())?)?;
    }

    let config_content = std::fs::read_to_string(path)?;
    let config = toml::from_str::<Config>(&config_content)?;
    Ok(sanitize_config(config))
}

fn set_table_value_preserving_decor(table: &mut Table, key: &str, item: Item) {
    let existing_value_decor = table
        .get(key)
        .and_then(|current| current.as_value().map(|value| value.decor().clone()));
    table[key] = item;
    if let Some(existing_value_decor) = existing_value_decor {
        if let Some(next_value) = table[key].as_value_mut() {
            *next_value.decor_mut() = existing_value_decor;
        }
    }
}

fn set_table_scalar_if_changed<T, F>(
    table: &mut Table,
    key: &str,
    previous_value: T,
    next_value: T,
    to_item: F,
) where
    T: PartialEq,
    F: FnOnce(T) -> Item,
{
    if table.contains_key(key) && previous_value == next_value {
        return;
    }
    set_table_value_preserving_decor(table, key, to_item(next_value));
}

fn ensure_section_table<'a>(document: &'a mut DocumentMut, key: &str) -> &'a mut Table {
    let root = document.as_table_mut();
    let should_replace = !matches!(root.get(key), Some(item) if item.is_table());
    if should_replace {
        root.insert(key, Item::Table(Table::new()));
    }
    root[key]
        .as_table_mut()
        .expect("section was just ensured to be a table")
}

fn write_config_to_document(document: &mut DocumentMut, previous: &Config, config: &Config) {
    {
        let library = ensure_section_table(document, "library");
        set_table_scalar_if_changed(
            library,
            "folder",
            previous.library.folder.clone(),
            config.library.folder.clone(),
            value,
        );
        set_table_scalar_if_changed(
            library,
            "database_path",
            previous.library.database_path.clone(),
            config.library.database_path.clone(),
            value,
        );
    }

    {
        let playback = ensure_section_table(document, "playback");
        set_table_scalar_if_changed(
            playback,
            "poll_interval_ms",
            previous.playback.poll_interval_ms,
            config.playback.poll_interval_ms,
            |v| value(v as i64),
        );
        set_table_scalar_if_changed(
            playback,
            "input_poll_ms",
            previous.playback.input_poll_ms,
            config.playback.input_poll_ms,
            |v| value(v as i64),
        );
        set_table_scalar_if_changed(
            playback,
            "seek_small_ms",
            previous.playback.seek_small_ms,
            config.playback.seek_small_ms,
            |v| value(v as i64),
        );
        set_table_scalar_if_changed(
            playback,
            "seek_big_ms",
            previous.playback.seek_big_ms,
            config.playback.seek_big_ms,
            |v| value(v as i64),
        );
        set_table_scalar_if_changed(
            playback,
            "listen_threshold",
            previous.playback.listen_threshold,
            config.playback.listen_threshold,
            value,
        );
        set_table_scalar_if_changed(
            playback,
            "next_song_mode",
            previous.playback.next_song_mode,
            config.playback.next_song_mode,
            |mode| value(mode.as_config_str()),
        );
    }

    {
        let timeline = ensure_section_table(document, "timeline");
        set_table_scalar_if_changed(
            timeline,
            "max_past_entries",
            previous.timeline.max_past_entries,
            config.timeline.max_past_entries,
            |v| value(v as i64),
        );
    }
}

/// Rewrites `existing_text` with the values of `config`, keeping comments and
/// formatting of untouched keys.
pub fn serialize_config_with_preserved_comments(
    existing_text: &str,
    config: &Config,
) -> Result<String, ConfigError> {
    let previous = toml::from_str::<Config>(existing_text)?;
    let mut document = existing_text.parse::<DocumentMut>()?;
    write_config_to_document(&mut document, &previous, config);
    Ok(document.to_string())
}

pub fn persist_config_file(config: &Config, path: &Path) -> Result<(), ConfigError> {
    let existing_text = std::fs::read_to_string(path).ok();
    let config_text = match existing_text {
        Some(existing_text) => {
            match serialize_config_with_preserved_comments(&existing_text, config) {
                Ok(updated_text) => updated_text,
                Err(err) => {
                    warn!(
                        "Failed to preserve config comments for {} ({}). Falling back to plain serialization.",
                        path.display(),
                        err
                    );
                    toml::to_string(config)?
                }
            }
        }
        None => toml::to_string(config)?,
    };

    std::fs::write(path, config_text)?;
    Ok(())
}

//! XDG Base Directory paths for ferry.
//!
//! | Purpose | XDG Variable | Default |
//! |---------|--------------|---------|
//! | Data | `$XDG_DATA_HOME` | `~/.local/share` |
//! | Config | `$XDG_CONFIG_HOME` | `~/.config` |
//!
//! Snapshots go under `$XDG_DATA_HOME/ferry/snapshots`; the config file is
//! `$XDG_CONFIG_HOME/ferry/config.toml`.

use std::path::PathBuf;

use directories::BaseDirs;

/// `$HOME`, or `/tmp` when unset.
pub fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

/// `$XDG_DATA_HOME` or `~/.local/share`.
pub fn xdg_data_home() -> PathBuf {
    BaseDirs::new()
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| home_dir().join(".local").join("share"))
}

/// `$XDG_CONFIG_HOME` or `~/.config`.
pub fn xdg_config_home() -> PathBuf {
    BaseDirs::new()
        .map(|d| d.config_dir().to_path_buf())
        .unwrap_or_else(|| home_dir().join(".config"))
}

pub fn data_dir() -> PathBuf {
    xdg_data_home().join("ferry")
}

pub fn config_dir() -> PathBuf {
    xdg_config_home().join("ferry")
}

/// Where [`SnapshotStore::default_location`](crate::state::SnapshotStore::default_location) keeps files.
pub fn snapshot_dir() -> PathBuf {
    data_dir().join("snapshots")
}

/// Readline history for the interactive driver.
pub fn history_file() -> PathBuf {
    data_dir().join("history")
}

use std::path::{Path, PathBuf};

pub const PREFS_DIR: &str = ".ide";
pub const PREFS_FILE_NAME: &str = "preferences.json";

#[must_use]
pub fn prefs_root(config_dir: &Path) -> PathBuf {
    config_dir.join(PREFS_DIR)
}

#[must_use]
pub fn prefs_file(config_dir: &Path) -> PathBuf {
    prefs_root(config_dir).join(PREFS_FILE_NAME)
}

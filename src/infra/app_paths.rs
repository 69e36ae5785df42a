//! Usage: Resolve on-disk locations owned by the helper (`<user data dir>/git-credential-keeper/...`).

use crate::infra::settings::Settings;
use crate::shared::error::{AppResult, SYSTEM_ERROR};
use std::path::PathBuf;

const DATA_DIR_NAME: &str = "git-credential-keeper";
const ENCRYPTED_STORE_DIR_NAME: &str = "store";

/// `$XDG_DATA_HOME` (or `~/.local/share`) on Linux, `~/Library/Application Support` on macOS,
/// `%APPDATA%` on Windows; the helper's own directory below it.
pub(crate) fn data_dir() -> AppResult<PathBuf> {
    let base = dirs::data_dir()
        .ok_or_else(|| format!("{SYSTEM_ERROR}: unable to resolve the user data directory"))?;
    Ok(base.join(DATA_DIR_NAME))
}

/// Root of the encrypted-file store; `GCM_ENCRYPTED_STORE_PATH` overrides the default.
pub(crate) fn encrypted_store_dir(settings: &Settings) -> AppResult<PathBuf> {
    match settings.encrypted_store_path() {
        Some(path) => Ok(path),
        None => Ok(data_dir()?.join(ENCRYPTED_STORE_DIR_NAME)),
    }
}

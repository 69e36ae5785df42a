//! Usage: Launch the user's default browser for the authorization code flow.

use crate::shared::error::AppResult;
use std::process::Command;

pub trait BrowserLauncher: Send + Sync {
    fn open(&self, url: &str) -> AppResult<()>;

    /// Whether a browser could plausibly be shown to the user right now.
    fn is_available(&self) -> bool {
        true
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> AppResult<()> {
        open_browser(url)
    }

    fn is_available(&self) -> bool {
        has_desktop_session()
    }
}

#[cfg(any(target_os = "windows", target_os = "macos"))]
fn has_desktop_session() -> bool {
    true
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn has_desktop_session() -> bool {
    ["DISPLAY", "WAYLAND_DISPLAY"]
        .iter()
        .any(|name| std::env::var_os(name).is_some_and(|v| !v.is_empty()))
}

fn open_browser(url: &str) -> AppResult<()> {
    build_open_browser_command(url)
        .ok_or_else(|| "UNSUPPORTED: opening a browser is not supported on this platform".to_string())?
        .spawn()
        .map_err(|e| format!("SYSTEM_ERROR: failed to open browser: {e}"))?;
    Ok(())
}

#[cfg(target_os = "windows")]
fn build_open_browser_command(url: &str) -> Option<Command> {
    let mut cmd = Command::new("rundll32.exe");
    // `explorer <url>` opens File Explorer for some URL shapes.
    cmd.arg("url.dll,FileProtocolHandler").arg(url);
    Some(cmd)
}

#[cfg(target_os = "macos")]
fn build_open_browser_command(url: &str) -> Option<Command> {
    let mut cmd = Command::new("open");
    cmd.arg(url);
    Some(cmd)
}

#[cfg(all(unix, not(target_os = "macos")))]
fn build_open_browser_command(url: &str) -> Option<Command> {
    let mut cmd = Command::new("xdg-open");
    cmd.arg(url);
    Some(cmd)
}

#[cfg(not(any(unix, target_os = "windows")))]
fn build_open_browser_command(_url: &str) -> Option<Command> {
    None
}

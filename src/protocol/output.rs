//! Usage: Git credential protocol response writer.

use crate::credential::Credential;
use crate::shared::error::{AppResult, INVALID_INPUT, SYSTEM_ERROR};
use std::io::Write;

fn check_value(key: &str, value: &str) -> AppResult<()> {
    if value.contains(|c: char| c == '\n' || c == '\0') {
        return Err(format!("{INVALID_INPUT}: credential {key} contains a newline or NUL").into());
    }
    Ok(())
}

/// `username=`, `password=`, optional `password_expiry_utc=`, then the terminating blank line.
pub fn write_credential(out: &mut dyn Write, credential: &Credential) -> AppResult<()> {
    let mut response = String::new();
    if let Some(account) = credential.account.as_deref().filter(|a| !a.is_empty()) {
        check_value("username", account)?;
        response.push_str(&format!("username={account}\n"));
    }
    check_value("password", &credential.secret)?;
    response.push_str(&format!("password={}\n", credential.secret));
    if let Some(expires_at) = credential.expires_at {
        response.push_str(&format!("password_expiry_utc={expires_at}\n"));
    }
    response.push('\n');

    out.write_all(response.as_bytes())
        .and_then(|()| out.flush())
        .map_err(|e| format!("{SYSTEM_ERROR}: failed to write credential response: {e}").into())
}

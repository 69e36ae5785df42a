//! Usage: Read `credential.*` entries from git config, scoped to the remote URL when known.

use std::collections::HashMap;
use std::process::Command;

const CREDENTIAL_SECTION: &str = "credential";

/// Collect `credential.<name>` values that apply to `remote_url` (or all of them when the URL
/// is unknown). Names are lower-cased; later entries win, matching git's last-one-wins rule.
pub(crate) fn read_credential_section(remote_url: Option<&str>) -> HashMap<String, String> {
    let mut cmd = Command::new("git");
    cmd.arg("config").arg("--null");
    match remote_url {
        Some(url) => {
            cmd.arg("--get-urlmatch").arg(CREDENTIAL_SECTION).arg(url);
        }
        None => {
            cmd.arg("--get-regexp").arg(r"^credential\.");
        }
    }

    let output = match cmd.output() {
        Ok(output) => output,
        Err(err) => {
            tracing::debug!(error = %err, "git config unavailable; using environment only");
            return HashMap::new();
        }
    };

    // Exit status 1 means "no matching keys", which is not worth a log line.
    if !output.status.success() {
        if output.status.code() != Some(1) {
            tracing::debug!(
                status = ?output.status.code(),
                "git config returned an error; ignoring"
            );
        }
        return HashMap::new();
    }

    parse_null_terminated(&String::from_utf8_lossy(&output.stdout))
}

/// Parse `git config --null` output: `key\nvalue\0` records.
pub(crate) fn parse_null_terminated(raw: &str) -> HashMap<String, String> {
    let mut values = HashMap::new();
    for record in raw.split('\0') {
        if record.is_empty() {
            continue;
        }
        let (key, value) = record.split_once('\n').unwrap_or((record, ""));
        let key = key.trim().to_ascii_lowercase();
        let Some(name) = key
            .strip_prefix(CREDENTIAL_SECTION)
            .and_then(|rest| rest.strip_prefix('.'))
        else {
            continue;
        };
        // `credential.<url>.<name>` entries only reach us through --get-regexp; keep the
        // trailing variable name so URL-scoped and global spellings land on the same key.
        let name = name.rsplit('.').next().unwrap_or(name);
        values.insert(name.to_string(), value.to_string());
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_records_and_lowercases_names() {
        let raw = "credential.helper\nkeeper\0credential.gitHubAuthModes\noauth,pat\0";
        let values = parse_null_terminated(raw);
        assert_eq!(values.get("helper").map(String::as_str), Some("keeper"));
        assert_eq!(
            values.get("githubauthmodes").map(String::as_str),
            Some("oauth,pat")
        );
    }

    #[test]
    fn url_scoped_entries_use_variable_name() {
        let raw = "credential.https://example.com.provider\ngeneric\0";
        let values = parse_null_terminated(raw);
        assert_eq!(values.get("provider").map(String::as_str), Some("generic"));
    }

    #[test]
    fn later_entries_win_and_foreign_sections_are_skipped() {
        let raw = "credential.namespace\nfirst\0user.name\nalice\0credential.namespace\nsecond\0";
        let values = parse_null_terminated(raw);
        assert_eq!(values.len(), 1);
        assert_eq!(values.get("namespace").map(String::as_str), Some("second"));
    }

    #[test]
    fn key_without_value_is_empty_string() {
        let values = parse_null_terminated("credential.interactive\0");
        assert_eq!(values.get("interactive").map(String::as_str), Some(""));
    }
}

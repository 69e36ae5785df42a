//! Usage: OS keyring backend (macOS Keychain, Windows Credential Manager, Secret Service).
//!
//! The native APIs address a secret by `(service, account)` and cannot enumerate accounts, so
//! account-less lookups go through a small per-service index entry listing known accounts.
//!
//! The index is shared by every helper process with no lock. Updates re-read after writing and
//! retry until the change is visible, and a keyed `get` puts a missing account back. Entries
//! themselves never depend on the index; only account-less lookups do.

use super::{CredentialStore, SecretStoreKey};
use crate::credential::{Credential, StoredSecret};
use crate::shared::error::{AppResult, STORE_BACKEND_ERROR, SYSTEM_ERROR};
use std::time::Duration;

const ACCOUNT_INDEX_USER: &str = "git-credential-keeper.accounts";
const INDEX_UPDATE_ATTEMPTS: u32 = 5;
/// Pause between writing the index and checking it, scaled by the attempt number.
const INDEX_SETTLE_DELAY: Duration = Duration::from_millis(25);

/// Storage for one service's account list.
trait AccountIndex {
    fn load(&self) -> AppResult<Vec<String>>;
    fn save(&self, accounts: &[String]) -> AppResult<()>;
}

struct KeyringAccountIndex<'a> {
    service: &'a str,
}

impl AccountIndex for KeyringAccountIndex<'_> {
    fn load(&self) -> AppResult<Vec<String>> {
        KeyringStore::read_index(self.service)
    }

    fn save(&self, accounts: &[String]) -> AppResult<()> {
        KeyringStore::write_index(self.service, accounts)
    }
}

/// Add (`present = true`) or drop `account`, then confirm the change survived concurrent
/// writers. Gives up with a warning after `INDEX_UPDATE_ATTEMPTS`.
fn update_index(
    index: &dyn AccountIndex,
    account: &str,
    present: bool,
    settle: Duration,
) -> AppResult<()> {
    for attempt in 1..=INDEX_UPDATE_ATTEMPTS {
        let mut accounts = index.load()?;
        if !set_membership(&mut accounts, account, present) {
            return Ok(());
        }
        index.save(&accounts)?;

        if !settle.is_zero() {
            std::thread::sleep(settle * attempt);
        }
        let listed = index.load()?.iter().any(|a| a == account);
        if listed == present {
            return Ok(());
        }
        tracing::debug!(attempt, "account index changed by another process; retrying");
    }
    tracing::warn!(
        "account index did not settle; account-less lookups may miss this entry until it is stored again"
    );
    Ok(())
}

/// Returns true when `accounts` changed.
fn set_membership(accounts: &mut Vec<String>, account: &str, present: bool) -> bool {
    let listed = accounts.iter().any(|a| a == account);
    match (listed, present) {
        (false, true) => {
            accounts.push(account.to_string());
            true
        }
        (true, false) => {
            accounts.retain(|a| a != account);
            true
        }
        _ => false,
    }
}

#[derive(Debug, Default)]
pub struct KeyringStore;

impl KeyringStore {
    pub fn new() -> Self {
        Self
    }

    fn entry(service: &str, account: &str) -> AppResult<keyring::Entry> {
        keyring::Entry::new(service, account).map_err(|e| backend_error("open entry", &e))
    }

    fn read(service: &str, account: &str) -> AppResult<Option<String>> {
        match Self::entry(service, account)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(backend_error("read entry", &e)),
        }
    }

    fn delete(service: &str, account: &str) -> AppResult<bool> {
        match Self::entry(service, account)?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(backend_error("delete entry", &e)),
        }
    }

    fn read_index(service: &str) -> AppResult<Vec<String>> {
        let Some(raw) = Self::read(service, ACCOUNT_INDEX_USER)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str::<Vec<String>>(&raw) {
            Ok(accounts) => Ok(accounts),
            Err(e) => {
                tracing::warn!(service = service, error = %e, "keyring account index unreadable; ignoring");
                Ok(Vec::new())
            }
        }
    }

    fn write_index(service: &str, accounts: &[String]) -> AppResult<()> {
        if accounts.is_empty() {
            Self::delete(service, ACCOUNT_INDEX_USER)?;
            return Ok(());
        }
        let raw = serde_json::to_string(accounts)
            .map_err(|e| format!("{SYSTEM_ERROR}: failed to encode account index: {e}"))?;
        Self::entry(service, ACCOUNT_INDEX_USER)?
            .set_password(&raw)
            .map_err(|e| backend_error("write account index", &e))
    }

    fn resolve_account(key: &SecretStoreKey) -> AppResult<Option<String>> {
        let service = key.service_name();
        if let Some(account) = key.account() {
            return Ok(Some(account.to_string()));
        }
        for account in Self::read_index(&service)? {
            if Self::read(&service, &account)?.is_some() {
                return Ok(Some(account));
            }
        }
        Ok(None)
    }
}

impl CredentialStore for KeyringStore {
    fn backend_name(&self) -> &'static str {
        "keyring"
    }

    fn get(&self, key: &SecretStoreKey) -> AppResult<Option<Credential>> {
        let service = key.service_name();
        let Some(account) = Self::resolve_account(key)? else {
            return Ok(None);
        };
        let Some(raw) = Self::read(&service, &account)? else {
            return Ok(None);
        };
        if key.account().is_some() {
            // A concurrent index write may have dropped this account.
            let index = KeyringAccountIndex { service: &service };
            if let Err(err) = update_index(&index, &account, true, Duration::ZERO) {
                tracing::warn!(error = %err, "failed to repair keyring account index");
            }
        }
        Ok(Some(StoredSecret::decode(Some(account), &raw)))
    }

    fn add_or_update(&self, key: &SecretStoreKey, credential: &Credential) -> AppResult<()> {
        let service = key.service_name();
        let account = key
            .account()
            .unwrap_or_else(|| credential.account_or_empty())
            .to_string();
        let encoded = StoredSecret::encode(credential)?;
        Self::entry(&service, &account)?
            .set_password(&encoded)
            .map_err(|e| backend_error("write entry", &e))?;

        let index = KeyringAccountIndex { service: &service };
        update_index(&index, &account, true, INDEX_SETTLE_DELAY)
    }

    fn remove(&self, key: &SecretStoreKey) -> AppResult<bool> {
        let service = key.service_name();
        let Some(account) = Self::resolve_account(key)? else {
            return Ok(false);
        };
        let removed = Self::delete(&service, &account)?;

        let index = KeyringAccountIndex { service: &service };
        update_index(&index, &account, false, INDEX_SETTLE_DELAY)?;
        Ok(removed)
    }
}

fn backend_error(action: &str, err: &keyring::Error) -> crate::shared::error::AppError {
    let detail = match err {
        keyring::Error::PlatformFailure(inner) => format!("platform failure: {inner}"),
        keyring::Error::NoStorageAccess(inner) => format!("no storage access: {inner}"),
        keyring::Error::BadEncoding(_) => "stored value is not valid UTF-8".to_string(),
        keyring::Error::TooLong(attr, max) => format!("attribute '{attr}' longer than {max}"),
        keyring::Error::Invalid(attr, reason) => format!("invalid '{attr}': {reason}"),
        other => other.to_string(),
    };
    format!("{STORE_BACKEND_ERROR}: keyring {action} failed: {detail}").into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn backend_error_keeps_native_detail() {
        let err = backend_error(
            "read entry",
            &keyring::Error::Invalid("service".to_string(), "empty".to_string()),
        );
        assert!(err.is(STORE_BACKEND_ERROR));
        assert!(err.message().contains("invalid 'service': empty"));
    }

    #[test]
    fn backend_name_is_stable() {
        assert_eq!(KeyringStore::new().backend_name(), "keyring");
    }

    /// In-memory index where another writer overwrites the list right after our first save,
    /// the way a second helper process working from a stale read would.
    struct RacingIndex {
        accounts: Mutex<Vec<String>>,
        rival: Mutex<Option<Vec<String>>>,
        saves: Mutex<u32>,
    }

    impl RacingIndex {
        fn new(initial: &[&str], rival: &[&str]) -> Self {
            Self {
                accounts: Mutex::new(initial.iter().map(|a| a.to_string()).collect()),
                rival: Mutex::new(Some(rival.iter().map(|a| a.to_string()).collect())),
                saves: Mutex::new(0),
            }
        }

        fn accounts(&self) -> Vec<String> {
            self.accounts.lock().expect("lock").clone()
        }
    }

    impl AccountIndex for RacingIndex {
        fn load(&self) -> AppResult<Vec<String>> {
            Ok(self.accounts())
        }

        fn save(&self, accounts: &[String]) -> AppResult<()> {
            *self.saves.lock().expect("lock") += 1;
            let rival = self.rival.lock().expect("lock").take();
            *self.accounts.lock().expect("lock") = rival.unwrap_or_else(|| accounts.to_vec());
            Ok(())
        }
    }

    #[test]
    fn concurrent_add_for_another_account_keeps_both() {
        let index = RacingIndex::new(&[], &["bob"]);
        update_index(&index, "alice", true, Duration::ZERO).expect("update");
        assert_eq!(index.accounts(), ["bob", "alice"]);
        assert_eq!(*index.saves.lock().expect("lock"), 2);
    }

    #[test]
    fn removal_survives_a_stale_rewrite() {
        let index = RacingIndex::new(&["alice", "bob"], &["alice", "bob", "carol"]);
        update_index(&index, "alice", false, Duration::ZERO).expect("update");
        assert_eq!(index.accounts(), ["bob", "carol"]);
    }

    #[test]
    fn unchanged_index_is_not_rewritten() {
        let index = RacingIndex::new(&["alice"], &[]);
        update_index(&index, "alice", true, Duration::ZERO).expect("update");
        update_index(&index, "nobody", false, Duration::ZERO).expect("update");
        assert_eq!(*index.saves.lock().expect("lock"), 0);
        assert_eq!(index.accounts(), ["alice"]);
    }

    #[test]
    fn membership_edits_report_changes() {
        let mut accounts = vec!["alice".to_string()];
        assert!(!set_membership(&mut accounts, "alice", true));
        assert!(set_membership(&mut accounts, "bob", true));
        assert!(set_membership(&mut accounts, "alice", false));
        assert_eq!(accounts, ["bob"]);
    }
}

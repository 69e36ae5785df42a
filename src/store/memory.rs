//! Usage: In-process credential store used by tests and dry runs.

use super::{CredentialStore, SecretStoreKey};
use crate::credential::Credential;
use crate::shared::error::AppResult;
use crate::shared::mutex_ext::MutexExt;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    // (service name, account) -> credential; BTreeMap keeps "first account" deterministic.
    entries: Mutex<BTreeMap<(String, String), Credential>>,
    writes: AtomicUsize,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `add_or_update` and successful `remove` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.lock_or_recover().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn find_account(&self, key: &SecretStoreKey) -> Option<(String, String)> {
        let service = key.service_name();
        let entries = self.entries.lock_or_recover();
        match key.account() {
            Some(account) => {
                let k = (service, account.to_string());
                entries.contains_key(&k).then_some(k)
            }
            None => entries.keys().find(|(s, _)| *s == service).cloned(),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &SecretStoreKey) -> AppResult<Option<Credential>> {
        let Some(k) = self.find_account(key) else {
            return Ok(None);
        };
        Ok(self.entries.lock_or_recover().get(&k).cloned())
    }

    fn add_or_update(&self, key: &SecretStoreKey, credential: &Credential) -> AppResult<()> {
        let account = key
            .account()
            .unwrap_or_else(|| credential.account_or_empty())
            .to_string();
        self.entries
            .lock_or_recover()
            .insert((key.service_name(), account), credential.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove(&self, key: &SecretStoreKey) -> AppResult<bool> {
        let Some(k) = self.find_account(key) else {
            return Ok(false);
        };
        let removed = self.entries.lock_or_recover().remove(&k).is_some();
        if removed {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(removed)
    }
}

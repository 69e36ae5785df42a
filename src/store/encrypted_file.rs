//! Usage: AES-256-GCM encrypted file store for headless or keyring-less environments.
//!
//! Layout under the store root:
//! - `<sha256(service \n account)>.json` per entry: `{version, service, account, nonce, ciphertext}`
//!   where `ciphertext` carries the GCM tag and is bound to `version`, `service` and `account`
//!   as associated data;
//! - `.salt` (passphrase mode, PBKDF2-HMAC-SHA256) or `.key` (machine key mode), both 0600 on
//!   unix.

use super::{CredentialStore, SecretStoreKey};
use crate::credential::{Credential, StoredSecret};
use crate::shared::error::{AppResult, STORE_BACKEND_ERROR, SYSTEM_ERROR};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;
const SALT_SIZE: usize = 16;
const PASSPHRASE_ROUNDS: u32 = 100_000;
const ENTRY_VERSION: u32 = 1;
const ENTRY_EXTENSION: &str = "json";
const SALT_FILE: &str = ".salt";
const KEY_FILE: &str = ".key";

pub(crate) struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    pub(crate) fn new(key: &[u8]) -> AppResult<Self> {
        if key.len() != KEY_SIZE {
            return Err(format!(
                "{STORE_BACKEND_ERROR}: encryption key must be {KEY_SIZE} bytes, got {}",
                key.len()
            )
            .into());
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| format!("{STORE_BACKEND_ERROR}: invalid encryption key: {e:?}"))?;
        Ok(Self { cipher })
    }

    /// Returns `(nonce, ciphertext_with_tag)`; a fresh random nonce per call.
    pub(crate) fn encrypt(
        &self,
        plaintext: &[u8],
        aad: &[u8],
    ) -> AppResult<([u8; NONCE_SIZE], Vec<u8>)> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let payload = Payload {
            msg: plaintext,
            aad,
        };
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), payload)
            .map_err(|e| format!("{STORE_BACKEND_ERROR}: failed to encrypt secret: {e:?}"))?;
        Ok((nonce_bytes, ciphertext))
    }

    pub(crate) fn decrypt(&self, nonce: &[u8], ciphertext: &[u8], aad: &[u8]) -> AppResult<Vec<u8>> {
        if nonce.len() != NONCE_SIZE {
            return Err(format!("{STORE_BACKEND_ERROR}: stored nonce has wrong length").into());
        }
        let payload = Payload {
            msg: ciphertext,
            aad,
        };
        self.cipher
            .decrypt(Nonce::from_slice(nonce), payload)
            .map_err(|_| {
                format!(
                    "{STORE_BACKEND_ERROR}: failed to decrypt secret (wrong passphrase or tampered entry)"
                )
                .into()
            })
    }
}

pub(crate) fn derive_passphrase_key(passphrase: &str, salt: &[u8]) -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PASSPHRASE_ROUNDS, &mut key);
    key
}

/// Associated data tying a ciphertext to the entry it was written for.
fn entry_aad(version: u32, service: &str, account: &str) -> Vec<u8> {
    format!("{version}\n{service}\n{account}").into_bytes()
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryFile {
    version: u32,
    service: String,
    account: String,
    nonce: String,
    ciphertext: String,
}

pub struct EncryptedFileStore {
    root: PathBuf,
    cipher: SecretCipher,
}

impl EncryptedFileStore {
    /// Open (creating if needed) a store rooted at `root`; with no passphrase a random machine
    /// key file is generated on first use.
    pub fn open(root: impl Into<PathBuf>, passphrase: Option<&str>) -> AppResult<Self> {
        let root = root.into();
        create_private_dir(&root)?;

        let key = match passphrase {
            Some(passphrase) => {
                let salt = read_or_create_random(&root.join(SALT_FILE), SALT_SIZE)?;
                derive_passphrase_key(passphrase, &salt).to_vec()
            }
            None => read_or_create_random(&root.join(KEY_FILE), KEY_SIZE)?,
        };

        Ok(Self {
            cipher: SecretCipher::new(&key)?,
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, service: &str, account: &str) -> PathBuf {
        let digest = Sha256::new()
            .chain_update(service.as_bytes())
            .chain_update(b"\n")
            .chain_update(account.as_bytes())
            .finalize();
        let name: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        self.root.join(format!("{name}.{ENTRY_EXTENSION}"))
    }

    fn read_entry(&self, path: &Path) -> AppResult<Option<EntryFile>> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(format!(
                    "{STORE_BACKEND_ERROR}: failed to read {}: {e}",
                    path.display()
                )
                .into())
            }
        };
        let entry: EntryFile = serde_json::from_str(&raw).map_err(|e| {
            format!(
                "{STORE_BACKEND_ERROR}: corrupt store entry {}: {e}",
                path.display()
            )
        })?;
        Ok(Some(entry))
    }

    fn decrypt_entry(&self, entry: &EntryFile) -> AppResult<Credential> {
        let nonce = STANDARD
            .decode(&entry.nonce)
            .map_err(|e| format!("{STORE_BACKEND_ERROR}: corrupt nonce: {e}"))?;
        let ciphertext = STANDARD
            .decode(&entry.ciphertext)
            .map_err(|e| format!("{STORE_BACKEND_ERROR}: corrupt ciphertext: {e}"))?;
        let aad = entry_aad(entry.version, &entry.service, &entry.account);
        let plaintext = self.cipher.decrypt(&nonce, &ciphertext, &aad)?;
        let plaintext = String::from_utf8(plaintext)
            .map_err(|_| format!("{STORE_BACKEND_ERROR}: decrypted secret is not UTF-8"))?;
        Ok(StoredSecret::decode(Some(entry.account.clone()), &plaintext))
    }

    /// Entries for `service`, sorted by file name for a stable "first" match.
    fn entries_for_service(&self, service: &str) -> AppResult<Vec<(PathBuf, EntryFile)>> {
        let dir = match fs::read_dir(&self.root) {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(format!("{STORE_BACKEND_ERROR}: failed to list store: {e}").into())
            }
        };

        let mut paths: Vec<PathBuf> = dir
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXTENSION))
            .collect();
        paths.sort();

        let mut matches = Vec::new();
        for path in paths {
            match self.read_entry(&path) {
                Ok(Some(entry)) if entry.service == service => matches.push((path, entry)),
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable store entry");
                }
            }
        }
        Ok(matches)
    }

    fn find(&self, key: &SecretStoreKey) -> AppResult<Option<(PathBuf, EntryFile)>> {
        let service = key.service_name();
        match key.account() {
            Some(account) => {
                let path = self.entry_path(&service, account);
                Ok(self.read_entry(&path)?.map(|entry| (path, entry)))
            }
            None => Ok(self.entries_for_service(&service)?.into_iter().next()),
        }
    }
}

impl CredentialStore for EncryptedFileStore {
    fn backend_name(&self) -> &'static str {
        "file"
    }

    fn get(&self, key: &SecretStoreKey) -> AppResult<Option<Credential>> {
        match self.find(key)? {
            Some((_, entry)) => Ok(Some(self.decrypt_entry(&entry)?)),
            None => Ok(None),
        }
    }

    fn add_or_update(&self, key: &SecretStoreKey, credential: &Credential) -> AppResult<()> {
        let service = key.service_name();
        let account = key
            .account()
            .unwrap_or_else(|| credential.account_or_empty())
            .to_string();
        let plaintext = StoredSecret::encode(credential)?;
        let aad = entry_aad(ENTRY_VERSION, &service, &account);
        let (nonce, ciphertext) = self.cipher.encrypt(plaintext.as_bytes(), &aad)?;

        let entry = EntryFile {
            version: ENTRY_VERSION,
            service: service.clone(),
            account: account.clone(),
            nonce: STANDARD.encode(nonce),
            ciphertext: STANDARD.encode(ciphertext),
        };
        let content = serde_json::to_vec_pretty(&entry)
            .map_err(|e| format!("{SYSTEM_ERROR}: failed to encode store entry: {e}"))?;
        write_private_atomic(&self.entry_path(&service, &account), &content)
    }

    fn remove(&self, key: &SecretStoreKey) -> AppResult<bool> {
        let Some((path, _)) = self.find(key)? else {
            return Ok(false);
        };
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(format!(
                "{STORE_BACKEND_ERROR}: failed to remove {}: {e}",
                path.display()
            )
            .into()),
        }
    }
}

fn create_private_dir(path: &Path) -> AppResult<()> {
    fs::create_dir_all(path).map_err(|e| {
        format!(
            "{STORE_BACKEND_ERROR}: failed to create {}: {e}",
            path.display()
        )
    })?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700)).map_err(|e| {
            format!(
                "{STORE_BACKEND_ERROR}: failed to restrict {}: {e}",
                path.display()
            )
        })?;
    }
    Ok(())
}

fn read_or_create_random(path: &Path, len: usize) -> AppResult<Vec<u8>> {
    match fs::read(path) {
        Ok(bytes) if bytes.len() == len => return Ok(bytes),
        Ok(_) => {
            return Err(format!(
                "{STORE_BACKEND_ERROR}: {} has an unexpected length",
                path.display()
            )
            .into())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(format!(
                "{STORE_BACKEND_ERROR}: failed to read {}: {e}",
                path.display()
            )
            .into())
        }
    }

    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    write_private_atomic(path, &bytes)?;
    Ok(bytes)
}

/// Write via a sibling temp file and rename so readers never see a partial entry.
fn write_private_atomic(path: &Path, content: &[u8]) -> AppResult<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("entry");
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", std::process::id()));

    {
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp).map_err(|e| {
            format!(
                "{STORE_BACKEND_ERROR}: failed to create {}: {e}",
                tmp.display()
            )
        })?;
        std::io::Write::write_all(&mut file, content).map_err(|e| {
            format!(
                "{STORE_BACKEND_ERROR}: failed to write {}: {e}",
                tmp.display()
            )
        })?;
        file.sync_all().map_err(|e| {
            format!(
                "{STORE_BACKEND_ERROR}: failed to flush {}: {e}",
                tmp.display()
            )
        })?;
    }

    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        format!(
            "{STORE_BACKEND_ERROR}: failed to replace {}: {e}",
            path.display()
        )
        .into()
    })
}

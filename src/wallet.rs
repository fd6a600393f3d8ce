//! Wallet management module
//!
//! [`KeyStore`] indexes encrypted JSON keystore files by the account they
//! claim, and caches decrypted keys by account and passphrase. Decryption
//! runs on the blocking pool and only once per (account, passphrase) even
//! under concurrent lookups.

use crate::committer::LocalKeySigner;
use crate::uniquify::Uniquify;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use parking_lot::RwLock;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Keystore and key cache errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum WalletError {
    #[error("no keystore or file for account {account:?}")]
    NoKeyStore { account: Address },

    #[error("private key decryption failed for account {account:?}")]
    KeyDecrypt { account: Address },

    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("failed to read {path}: {message}")]
    Io { path: PathBuf, message: String },
}

/// The part of a keystore file needed to index it
#[derive(Debug, Deserialize)]
struct KeyFileHeader {
    #[serde(default)]
    address: String,
}

fn parse_wallet_file(path: &Path) -> Result<Address, String> {
    let data = std::fs::read(path).map_err(|e| e.to_string())?;
    let header: KeyFileHeader = serde_json::from_slice(&data).map_err(|e| e.to_string())?;
    if header.address.is_empty() {
        return Err("missing address".to_string());
    }
    header
        .address
        .trim_start_matches("0x")
        .parse::<Address>()
        .map_err(|_| format!("wrong (not hex) address {}", header.address))
}

/// Cache key for a decrypted key: SHA-256 of `address || "-" || passphrase`
fn cache_key(account: Address, passphrase: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(account.as_bytes());
    hasher.update(b"-");
    hasher.update(passphrase.as_bytes());
    hex::encode(hasher.finalize())
}

/// Directory-backed keystore with a decrypted-key cache
#[derive(Debug, Default)]
pub struct KeyStore {
    paths: RwLock<BTreeSet<PathBuf>>,
    accounts: RwLock<HashMap<Address, PathBuf>>,
    keys: RwLock<HashMap<String, LocalWallet>>,
    guard: Uniquify,
}

impl KeyStore {
    /// Open a keystore over the given directories and index their files
    pub fn new<I, P>(paths: I) -> Result<Self, WalletError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let store = Self::default();
        for path in paths {
            store.add_path(path)?;
        }
        Ok(store)
    }

    /// Add a keystore directory and index its files
    pub fn add_path(&self, dir: impl AsRef<Path>) -> Result<(), WalletError> {
        let dir = dir.as_ref();
        let meta = std::fs::metadata(dir).map_err(|e| WalletError::Io {
            path: dir.to_path_buf(),
            message: e.to_string(),
        })?;
        if !meta.is_dir() {
            return Err(WalletError::NotADirectory(dir.to_path_buf()));
        }

        self.paths.write().insert(dir.to_path_buf());
        self.scan(dir);
        Ok(())
    }

    /// Stop indexing `dir`; accounts found only there are forgotten
    pub fn remove_path(&self, dir: impl AsRef<Path>) {
        let dir = dir.as_ref();
        self.paths.write().remove(dir);
        self.accounts
            .write()
            .retain(|_, file| file.parent() != Some(dir));
    }

    /// Indexed directories, sorted
    pub fn paths(&self) -> Vec<PathBuf> {
        self.paths.read().iter().cloned().collect()
    }

    /// Rescan every directory and return the known accounts, sorted
    pub fn accounts(&self) -> Vec<Address> {
        self.refresh();
        let mut accounts: Vec<_> = self.accounts.read().keys().copied().collect();
        accounts.sort();
        accounts
    }

    /// Rescan every directory
    pub fn refresh(&self) {
        for dir in self.paths() {
            self.scan(&dir);
        }
    }

    fn scan(&self, dir: &Path) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(keybase_path = %dir.display(), error = %err, "failed to lookup");
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            match parse_wallet_file(&path) {
                Ok(account) => {
                    let prev = self.accounts.write().insert(account, path.clone());
                    if prev.as_ref() != Some(&path) {
                        info!(account = ?account, path = %path.display(), "Found keystore wallet");
                    }
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Skipping keystore file");
                }
            }
        }
    }

    /// Decrypted key for `account`, from cache or from its keystore file
    pub async fn private_key(
        &self,
        account: Address,
        passphrase: &str,
    ) -> Result<LocalWallet, WalletError> {
        let key = cache_key(account, passphrase);
        self.guard
            .call(&key, || async {
                let cached = self.keys.read().get(&key).cloned();
                if let Some(wallet) = cached {
                    return Ok(wallet);
                }

                let path = self
                    .accounts
                    .read()
                    .get(&account)
                    .cloned()
                    .ok_or(WalletError::NoKeyStore { account })?;

                let secret = Zeroizing::new(passphrase.to_string());
                let wallet = tokio::task::spawn_blocking(move || {
                    LocalWallet::decrypt_keystore(&path, secret.as_bytes())
                })
                .await
                .map_err(|_| WalletError::KeyDecrypt { account })?
                .map_err(|err| {
                    debug!(account = ?account, error = %err, "keystore decryption failed");
                    WalletError::KeyDecrypt { account }
                })?;

                if wallet.address() != account {
                    warn!(
                        account = ?account,
                        decrypted = ?wallet.address(),
                        "keystore file holds a key for another account"
                    );
                    return Err(WalletError::KeyDecrypt { account });
                }

                self.keys.write().insert(key.clone(), wallet.clone());
                Ok(wallet)
            })
            .await
    }

    /// Cache a key reachable with an empty passphrase
    pub fn set_private_key(&self, account: Address, wallet: LocalWallet) {
        self.keys.write().insert(cache_key(account, ""), wallet);
    }

    /// Forget a cached key
    pub fn unset_key(&self, account: Address, passphrase: &str) {
        self.keys.write().remove(&cache_key(account, passphrase));
    }

    pub async fn signer(
        &self,
        account: Address,
        passphrase: &str,
    ) -> Result<LocalKeySigner, WalletError> {
        let wallet = self.private_key(account, passphrase).await?;
        Ok(LocalKeySigner::new(wallet))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::committer::TxSigner;
    use std::sync::Arc;

    fn write_keystore(dir: &Path, passphrase: &str) -> Address {
        let mut rng = ethers::core::rand::thread_rng();
        let (wallet, _uuid) =
            LocalWallet::new_keystore(dir, &mut rng, passphrase, Some("key.json")).unwrap();

        // Index by the geth-style address field
        let path = dir.join("key.json");
        let mut json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        json["address"] = serde_json::Value::String(hex::encode(wallet.address()));
        std::fs::write(&path, serde_json::to_vec(&json).unwrap()).unwrap();

        wallet.address()
    }

    #[test]
    fn test_add_path_requires_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        std::fs::write(&file, b"x").unwrap();

        let store = KeyStore::default();
        assert_eq!(
            store.add_path(&file),
            Err(WalletError::NotADirectory(file.clone()))
        );
        assert!(store.add_path(dir.path()).is_ok());
        assert_eq!(store.paths(), vec![dir.path().to_path_buf()]);
    }

    #[test]
    fn test_scan_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("junk.json"), b"{not json").unwrap();
        std::fs::write(dir.path().join("noaddr.json"), br#"{"version":3}"#).unwrap();
        std::fs::write(
            dir.path().join("good.json"),
            br#"{"address":"f39fd6e51aad88f6f4ce6ab8827279cfffb92266","version":3}"#,
        )
        .unwrap();

        let store = KeyStore::new([dir.path()]).unwrap();
        let expected: Address = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse().unwrap();
        assert_eq!(store.accounts(), vec![expected]);

        store.remove_path(dir.path());
        assert!(store.accounts().is_empty());
    }

    #[tokio::test]
    async fn test_private_key_decrypts_once() {
        let dir = tempfile::tempdir().unwrap();
        let account = write_keystore(dir.path(), "secret");
        let store = Arc::new(KeyStore::new([dir.path()]).unwrap());

        let wallet = store.private_key(account, "secret").await.unwrap();
        assert_eq!(wallet.address(), account);

        // Served from cache even after the file is gone
        std::fs::remove_file(dir.path().join("key.json")).unwrap();
        assert!(store.private_key(account, "secret").await.is_ok());

        store.unset_key(account, "secret");
        assert_eq!(
            store.private_key(account, "secret").await,
            Err(WalletError::KeyDecrypt { account })
        );
    }

    #[tokio::test]
    async fn test_private_key_errors() {
        let dir = tempfile::tempdir().unwrap();
        let account = write_keystore(dir.path(), "secret");
        let store = KeyStore::new([dir.path()]).unwrap();

        assert_eq!(
            store.private_key(account, "wrong").await,
            Err(WalletError::KeyDecrypt { account })
        );
        let unknown = Address::repeat_byte(0x42);
        assert_eq!(
            store.private_key(unknown, "secret").await,
            Err(WalletError::NoKeyStore { account: unknown })
        );
    }

    #[tokio::test]
    async fn test_signer_from_cached_key() {
        let store = KeyStore::default();
        let wallet = LocalWallet::new(&mut ethers::core::rand::thread_rng());
        let account = wallet.address();
        store.set_private_key(account, wallet);

        let signer = store.signer(account, "").await.unwrap();
        assert_eq!(signer.address(), account);
    }
}

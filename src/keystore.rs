//! Local cache of issuer public keys.
//!
//! Key material is persisted through a [`KeyStorage`] backend; the store
//! tracks the set of known ids, decodes PEM on demand and reconciles itself
//! against the authoritative id list published by a [`KeySource`].
//! Entries are never evicted.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::RwLock;

use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use tracing::{debug, info, warn};

use crate::error::KeyStoreError;
use crate::service::KeySource;

const KEY_FILE_SUFFIX: &str = ".pub.pem";

/// Persistence backend for key material.
pub trait KeyStorage: Send + Sync {
    fn read(&self, id: u64) -> Result<Option<String>, KeyStoreError>;
    fn write(&self, id: u64, pem: &str) -> Result<(), KeyStoreError>;
    fn list_ids(&self) -> Result<Vec<u64>, KeyStoreError>;
}

/// One `{id}.pub.pem` file per key in a directory.
#[derive(Debug, Clone)]
pub struct FileKeyStorage {
    dir: PathBuf,
}

impl FileKeyStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn key_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{}{}", id, KEY_FILE_SUFFIX))
    }
}

impl KeyStorage for FileKeyStorage {
    fn read(&self, id: u64) -> Result<Option<String>, KeyStoreError> {
        match std::fs::read_to_string(self.key_path(id)) {
            Ok(pem) => Ok(Some(pem)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, id: u64, pem: &str) -> Result<(), KeyStoreError> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.key_path(id), pem)?;
        Ok(())
    }

    fn list_ids(&self) -> Result<Vec<u64>, KeyStoreError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(id) = name
                .strip_suffix(KEY_FILE_SUFFIX)
                .and_then(|stem| stem.parse::<u64>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }
}

/// In-process storage, mainly for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryKeyStorage {
    keys: RwLock<BTreeMap<u64, String>>,
}

impl MemoryKeyStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStorage for MemoryKeyStorage {
    fn read(&self, id: u64) -> Result<Option<String>, KeyStoreError> {
        Ok(self
            .keys
            .read()
            .map(|keys| keys.get(&id).cloned())
            .unwrap_or_default())
    }

    fn write(&self, id: u64, pem: &str) -> Result<(), KeyStoreError> {
        let mut keys = self
            .keys
            .write()
            .map_err(|_| std::io::Error::other("key storage lock poisoned"))?;
        keys.insert(id, pem.to_string());
        Ok(())
    }

    fn list_ids(&self) -> Result<Vec<u64>, KeyStoreError> {
        Ok(self
            .keys
            .read()
            .map(|keys| keys.keys().copied().collect())
            .unwrap_or_default())
    }
}

/// Read access to candidate keys, as needed by signature verification.
pub trait KeyLookup {
    /// Known key ids in ascending order.
    fn candidate_ids(&self) -> Vec<u64>;

    /// `Ok(None)` when `id` is not a known key.
    fn lookup(&self, id: u64) -> Result<Option<RsaPublicKey>, KeyStoreError>;
}

/// Decode an RSA public key from SPKI (`PUBLIC KEY`) or PKCS#1
/// (`RSA PUBLIC KEY`) PEM.
pub fn decode_public_key(id: u64, pem: &str) -> Result<RsaPublicKey, KeyStoreError> {
    let pem = pem.trim();
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| KeyStoreError::MalformedKey {
            id,
            reason: e.to_string(),
        })
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Ids registered during this pass, ascending.
    pub added: Vec<u64>,
    /// Ids whose fetch failed; retried on the next pass.
    pub failed: Vec<u64>,
}

pub struct KeyStore {
    storage: Box<dyn KeyStorage>,
    ids: RwLock<BTreeSet<u64>>,
    decoded: RwLock<HashMap<u64, RsaPublicKey>>,
}

impl KeyStore {
    /// Open a store over `storage`, loading the ids it already holds.
    pub fn open(storage: impl KeyStorage + 'static) -> Result<Self, KeyStoreError> {
        let ids: BTreeSet<u64> = storage.list_ids()?.into_iter().collect();
        debug!(count = ids.len(), "Key store opened");

        Ok(Self {
            storage: Box::new(storage),
            ids: RwLock::new(ids),
            decoded: RwLock::new(HashMap::new()),
        })
    }

    pub fn known_ids(&self) -> Vec<u64> {
        self.ids
            .read()
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.ids.read().map(|ids| ids.contains(&id)).unwrap_or(false)
    }

    /// Persist `pem` under `id` and record the id. Registering an id twice
    /// keeps a single entry.
    pub fn register(&self, id: u64, pem: &str) -> Result<(), KeyStoreError> {
        self.storage.write(id, pem)?;

        if let Ok(mut decoded) = self.decoded.write() {
            decoded.remove(&id);
        }
        if let Ok(mut ids) = self.ids.write() {
            ids.insert(id);
        }
        Ok(())
    }

    /// Ids in `authoritative` that are not cached locally, ascending.
    pub fn missing_ids(&self, authoritative: &[u64]) -> Vec<u64> {
        let known = self.ids.read().map(|ids| ids.clone()).unwrap_or_default();
        let wanted: BTreeSet<u64> = authoritative.iter().copied().collect();
        wanted.difference(&known).copied().collect()
    }

    /// Fetch every authoritative key that is not cached yet.
    ///
    /// Failing to list ids fails the pass. An id whose fetch fails or whose
    /// body is not a public key is logged and reported in
    /// [`SyncReport::failed`]; nothing is stored for it, so it is fetched
    /// again on the next pass.
    pub async fn reconcile(&self, source: &dyn KeySource) -> Result<SyncReport, KeyStoreError> {
        let authoritative = source
            .list_key_ids()
            .await
            .map_err(|e| KeyStoreError::FetchFailed(e.to_string()))?;

        let missing = self.missing_ids(&authoritative);
        let mut report = SyncReport::default();

        for id in missing {
            let result = match source.fetch_key(id).await {
                Ok(pem) => decode_public_key(id, &pem).and_then(|_| self.register(id, &pem)),
                Err(e) => Err(KeyStoreError::FetchFailed(e.to_string())),
            };

            match result {
                Ok(()) => {
                    debug!(key_id = id, "Key registered");
                    report.added.push(id);
                }
                Err(e) => {
                    warn!(key_id = id, error = %e, "Key fetch failed, will retry on next sync");
                    report.failed.push(id);
                }
            }
        }

        info!(
            added = report.added.len(),
            failed = report.failed.len(),
            known = self.known_ids().len(),
            "Key sync complete"
        );
        Ok(report)
    }
}

impl KeyLookup for KeyStore {
    fn candidate_ids(&self) -> Vec<u64> {
        self.known_ids()
    }

    fn lookup(&self, id: u64) -> Result<Option<RsaPublicKey>, KeyStoreError> {
        if !self.contains(id) {
            return Ok(None);
        }

        if let Some(key) = self
            .decoded
            .read()
            .ok()
            .and_then(|decoded| decoded.get(&id).cloned())
        {
            return Ok(Some(key));
        }

        let pem = self
            .storage
            .read(id)?
            .ok_or(KeyStoreError::KeyUnavailable(id))?;
        let key = decode_public_key(id, &pem)?;

        if let Ok(mut decoded) = self.decoded.write() {
            decoded.insert(id, key.clone());
        }
        Ok(Some(key))
    }
}

//! Shared issuer keys, payload builders and stub collaborators.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha2::{Digest, Sha512};
use tokio::sync::Notify;

use digital_id_validator::{
    build_assertion, Collaborators, CredentialValidator, FixedClock, ImageService, KeySource,
    KeyStorage, KeyStore, KeyStoreError, MemoryKeyStorage, OnlineValidation, ServiceError,
    ValidationService, ValidatorConfig,
};

pub const GROUP1: &str = "SMITH÷JOHN PAUL÷1985 03'04÷20200115÷20300115÷USA÷NY÷S123456789÷D";
pub const GROUP2: &str = "1÷÷5-11÷BRO÷÷÷12 Elm St;Apt 3;Albany;NY;12207";

pub const INVALID_ID_MESSAGE: &str = "This ID could not be validated";
pub const SERVER_ERROR_MESSAGE: &str = "The validation service is unavailable";

pub struct Issuer {
    pub private: RsaPrivateKey,
    pub pem: String,
}

impl Issuer {
    fn generate() -> Self {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let pem = private
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        Self { private, pem }
    }

    /// Hex signature over `group1 × group2`.
    pub fn sign(&self, group1: &str, group2: &str) -> String {
        let assertion = build_assertion(group1, group2);
        let digest = Sha512::digest(assertion.as_bytes());
        let signature = self
            .private
            .sign(Pkcs1v15Sign::new::<Sha512>(), &digest)
            .unwrap();
        hex::encode(signature)
    }
}

pub fn issuers() -> &'static [Issuer] {
    static ISSUERS: OnceLock<Vec<Issuer>> = OnceLock::new();
    ISSUERS.get_or_init(|| (0..3).map(|_| Issuer::generate()).collect())
}

/// A 12-group primary payload.
pub fn primary_payload(group1: &str, group2: &str, signature_hex: &str) -> String {
    let mut groups = vec![String::new(); 12];
    groups[0] = "DL01".to_string();
    groups[1] = group1.to_string();
    groups[2] = group2.to_string();
    groups[3] = "unused".to_string();
    groups[10] = signature_hex.to_string();
    groups[11] = "¶".to_string();
    groups.join("×")
}

pub fn signed_payload(issuer: &Issuer) -> String {
    primary_payload(GROUP1, GROUP2, &issuer.sign(GROUP1, GROUP2))
}

pub fn config() -> ValidatorConfig {
    ValidatorConfig {
        server_error_message: SERVER_ERROR_MESSAGE.to_string(),
        invalid_id_error_message: INVALID_ID_MESSAGE.to_string(),
        online_validation_endpoint: "https://ids.example.com/validate/".to_string(),
        fetch_profile_image_endpoint: "https://ids.example.com/image/".to_string(),
        sync_keys_endpoint: "https://ids.example.com/keys".to_string(),
        request_timeout_secs: 5,
    }
}

pub fn noon() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 14)
        .unwrap()
        .and_hms_opt(12, 15, 0)
        .unwrap()
}

/// Key store holding the three fixture issuers under ids 1, 2 and 3.
pub fn store_with_issuers() -> Arc<KeyStore> {
    let store = KeyStore::open(MemoryKeyStorage::new()).unwrap();
    for (id, issuer) in (1u64..).zip(issuers()) {
        store.register(id, &issuer.pem).unwrap();
    }
    Arc::new(store)
}

/// Storage that counts reads, to observe when key material is consulted.
#[derive(Default)]
pub struct CountingStorage {
    inner: MemoryKeyStorage,
    pub reads: Arc<AtomicUsize>,
}

impl KeyStorage for CountingStorage {
    fn read(&self, id: u64) -> Result<Option<String>, KeyStoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read(id)
    }

    fn write(&self, id: u64, pem: &str) -> Result<(), KeyStoreError> {
        self.inner.write(id, pem)
    }

    fn list_ids(&self) -> Result<Vec<u64>, KeyStoreError> {
        self.inner.list_ids()
    }
}

pub enum OnlineReply {
    Valid(Option<String>),
    Rejected,
    Unavailable,
}

/// Scriptable stand-in for every collaborator.
pub struct StubServices {
    pub keys: Mutex<HashMap<u64, String>>,
    pub list_fails: bool,
    /// Ids whose next fetch fails once.
    pub flaky: Mutex<HashSet<u64>>,
    pub reply: OnlineReply,
    /// When set, `validate` waits for `release` after signalling `entered`.
    pub gate: Option<(Arc<Notify>, Arc<Notify>)>,
    pub image: Option<Vec<u8>>,
    pub validate_calls: AtomicUsize,
}

impl StubServices {
    pub fn new(reply: OnlineReply) -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
            list_fails: false,
            flaky: Mutex::new(HashSet::new()),
            reply,
            gate: None,
            image: Some(vec![0xFF, 0xD8, 0xFF, 0xE0]),
            validate_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_keys(self, keys: impl IntoIterator<Item = (u64, String)>) -> Self {
        self.keys.lock().unwrap().extend(keys);
        self
    }

    pub fn into_collaborators(self) -> (Arc<Self>, Collaborators) {
        let stub = Arc::new(self);
        let collaborators = Collaborators {
            keys: stub.clone(),
            validation: stub.clone(),
            images: stub.clone(),
        };
        (stub, collaborators)
    }
}

#[async_trait]
impl KeySource for StubServices {
    async fn list_key_ids(&self) -> Result<Vec<u64>, ServiceError> {
        if self.list_fails {
            return Err(ServiceError::Unavailable("connection refused".to_string()));
        }
        let mut ids: Vec<u64> = self.keys.lock().unwrap().keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn fetch_key(&self, id: u64) -> Result<String, ServiceError> {
        if self.flaky.lock().unwrap().remove(&id) {
            return Err(ServiceError::Unavailable(format!("timeout fetching {}", id)));
        }
        self.keys
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| ServiceError::Unavailable(format!("no key {}", id)))
    }
}

#[async_trait]
impl ValidationService for StubServices {
    async fn validate(&self, _assertion_hash: &str) -> Result<OnlineValidation, ServiceError> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.notified().await;
        }
        match &self.reply {
            OnlineReply::Valid(serial) => Ok(OnlineValidation {
                serial_number: serial.clone(),
            }),
            OnlineReply::Rejected => Err(ServiceError::Rejected),
            OnlineReply::Unavailable => Err(ServiceError::Unavailable("HTTP 500".to_string())),
        }
    }
}

#[async_trait]
impl ImageService for StubServices {
    async fn fetch_image(
        &self,
        _serial_number: &str,
        progress: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<Vec<u8>, ServiceError> {
        progress(0.5);
        match &self.image {
            Some(bytes) => {
                progress(1.0);
                Ok(bytes.clone())
            }
            None => Err(ServiceError::Unavailable("image missing".to_string())),
        }
    }
}

pub fn validator(
    store: Arc<KeyStore>,
    services: Collaborators,
    clock: Arc<FixedClock>,
) -> Arc<CredentialValidator> {
    Arc::new(CredentialValidator::new(config(), store, services, clock))
}

pub fn offline_validator(store: Arc<KeyStore>, clock: Arc<FixedClock>) -> Arc<CredentialValidator> {
    let (_, services) = StubServices::new(OnlineReply::Unavailable).into_collaborators();
    validator(store, services, clock)
}

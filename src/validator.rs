//! Credential validation session.
//!
//! [`CredentialValidator`] sequences parsing, signature verification and
//! record building for primary codes, and the watermark check for secondary
//! codes. It also drives the asynchronous collaborator paths: key sync,
//! online validation and the profile image download.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::config::ValidatorConfig;
use crate::error::{KeyStoreError, ParseError, ServiceError};
use crate::events::{EventBus, ValidatorEvent};
use crate::keystore::{FileKeyStorage, KeyLookup, KeyStore, SyncReport};
use crate::payload::{self, ParsedScan, PrimaryPayload, RawScan, Symbology};
use crate::record::{self, CustomerRecord};
use crate::service::{HttpServiceClient, ImageService, KeySource, ValidationService};
use crate::signature::{build_assertion, verify_assertion, Verification};
use crate::watermark::{
    assertion_hash, derive_expected, Clock, SystemClock, WatermarkOutcome, WatermarkState,
};

/// Two-tier result of one scan. `None` means the scan does not apply to the
/// current verification flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOutcome {
    pub primary: Option<bool>,
    pub secondary: Option<bool>,
}

impl ScanOutcome {
    pub const INCONCLUSIVE: Self = Self::new(None, None);

    pub const fn new(primary: Option<bool>, secondary: Option<bool>) -> Self {
        Self { primary, secondary }
    }

    const fn rejected() -> Self {
        Self::new(Some(false), Some(false))
    }
}

/// Answer of the online validation path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnlineVerdict {
    pub valid: bool,
    /// Configured user-facing message when `valid` is false.
    pub reason: Option<String>,
    pub serial_number: Option<String>,
}

/// External services the validator talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub keys: Arc<dyn KeySource>,
    pub validation: Arc<dyn ValidationService>,
    pub images: Arc<dyn ImageService>,
}

impl Collaborators {
    pub fn http(client: HttpServiceClient) -> Self {
        let client = Arc::new(client);
        Self {
            keys: client.clone(),
            validation: client.clone(),
            images: client,
        }
    }
}

#[derive(Debug, Default)]
struct Session {
    watermark: WatermarkState,
    customer: Option<CustomerRecord>,
}

/// Single-request latch; released on drop.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct CredentialValidator {
    config: ValidatorConfig,
    key_store: Arc<KeyStore>,
    services: Collaborators,
    clock: Arc<dyn Clock>,
    session: Mutex<Session>,
    online_in_flight: AtomicBool,
    image_in_flight: AtomicBool,
    events: EventBus,
}

impl CredentialValidator {
    pub fn new(
        config: ValidatorConfig,
        key_store: Arc<KeyStore>,
        services: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            key_store,
            services,
            clock,
            session: Mutex::new(Session::default()),
            online_in_flight: AtomicBool::new(false),
            image_in_flight: AtomicBool::new(false),
            events: EventBus::new(),
        }
    }

    /// Validator over an on-disk key store in `keys_dir` with HTTP
    /// collaborators and the host clock.
    pub fn with_http(config: ValidatorConfig, keys_dir: impl Into<PathBuf>) -> crate::Result<Self> {
        config.validate()?;
        let client = HttpServiceClient::new(&config)?;
        let key_store = KeyStore::open(FileKeyStorage::new(keys_dir))?;

        Ok(Self::new(
            config,
            Arc::new(key_store),
            Collaborators::http(client),
            Arc::new(SystemClock),
        ))
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn key_store(&self) -> &Arc<KeyStore> {
        &self.key_store
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ValidatorEvent> {
        self.events.subscribe()
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record built by the last successful primary verification.
    pub fn customer_record(&self) -> Option<CustomerRecord> {
        self.session().customer.clone()
    }

    /// Assertion hash of the primary code awaiting its secondary check.
    pub fn pending_assertion_hash(&self) -> Option<String> {
        self.session().watermark.assertion_hash().map(str::to_string)
    }

    pub fn is_primary_verified(&self) -> bool {
        self.session().watermark.is_pending()
    }

    /// Process one decoded barcode.
    ///
    /// `wants_online_check` routes confirmation through
    /// [`online_validate`](Self::online_validate) instead of the secondary
    /// watermark code.
    pub fn submit(&self, scan: &RawScan, wants_online_check: bool) -> ScanOutcome {
        if scan.symbology != Symbology::Qr {
            return ScanOutcome::INCONCLUSIVE;
        }

        match payload::parse(&scan.text) {
            Ok(ParsedScan::Primary(primary)) => self.submit_primary(&primary),
            Ok(ParsedScan::Secondary(value)) => self.submit_secondary(&value, wants_online_check),
            Ok(ParsedScan::Inconclusive) => ScanOutcome::INCONCLUSIVE,
            Err(ParseError::BadHex(reason)) => {
                debug!(%reason, "Primary code carries an undecodable signature");
                ScanOutcome::rejected()
            }
            Err(e) => {
                debug!(error = %e, "Scan is not a well-formed primary code");
                ScanOutcome::INCONCLUSIVE
            }
        }
    }

    fn submit_primary(&self, primary: &PrimaryPayload) -> ScanOutcome {
        let assertion = build_assertion(primary.group1(), primary.group2());
        let candidates = self.key_store.candidate_ids();

        let verification = match verify_assertion(
            assertion.as_bytes(),
            primary.signature(),
            &candidates,
            self.key_store.as_ref(),
        ) {
            Ok(verification) => verification,
            Err(e) => {
                warn!(error = %e, "Signature verification could not be attempted");
                return ScanOutcome::INCONCLUSIVE;
            }
        };

        let Verification::Verified { key_id } = verification else {
            info!(candidates = candidates.len(), "Primary code signature not recognised");
            return ScanOutcome::rejected();
        };

        let customer = match record::build(primary.group1_fields(), primary.group2_fields()) {
            Ok(customer) => customer,
            Err(e) => {
                warn!(key_id, error = %e, "Verified primary code has unusable fields");
                return ScanOutcome::INCONCLUSIVE;
            }
        };

        let hash = assertion_hash(&assertion);
        let expected = derive_expected(&hash, self.clock.now_local());

        let mut session = self.session();
        session.watermark.arm(hash, expected);
        session.customer = Some(customer);

        info!(key_id, "Primary code verified");
        ScanOutcome::new(Some(true), None)
    }

    fn submit_secondary(&self, value: &str, wants_online_check: bool) -> ScanOutcome {
        if wants_online_check {
            return ScanOutcome::INCONCLUSIVE;
        }

        let scanned = value.parse::<i64>().ok();
        match self.session().watermark.check(scanned) {
            None => ScanOutcome::INCONCLUSIVE,
            Some(WatermarkOutcome::MatchConfirmed) => {
                info!("Secondary watermark confirmed");
                ScanOutcome::new(Some(true), Some(true))
            }
            Some(WatermarkOutcome::MismatchDetected) => {
                info!("Secondary watermark mismatch");
                ScanOutcome::new(Some(true), Some(false))
            }
        }
    }

    /// Ask the online validation service about `assertion_hash`.
    ///
    /// Returns `None` without contacting the service when another online
    /// validation is still outstanding. On success, a profile image download
    /// is started for the reported serial number.
    pub async fn online_validate(self: &Arc<Self>, assertion_hash: &str) -> Option<OnlineVerdict> {
        let Some(_in_flight) = InFlight::acquire(&self.online_in_flight) else {
            debug!("Online validation already in flight, dropping request");
            return None;
        };

        let verdict = match self.services.validation.validate(assertion_hash).await {
            Ok(response) => {
                if let Some(serial) = response.serial_number.clone() {
                    self.spawn_profile_image(serial).await;
                }
                OnlineVerdict {
                    valid: true,
                    reason: None,
                    serial_number: response.serial_number,
                }
            }
            Err(ServiceError::Rejected) => OnlineVerdict {
                valid: false,
                reason: Some(self.config.invalid_id_error_message.clone()),
                serial_number: None,
            },
            Err(e) => {
                warn!(error = %e, "Online validation unavailable");
                self.events
                    .publish(ValidatorEvent::ServiceAvailabilityChanged(false));
                OnlineVerdict {
                    valid: false,
                    reason: Some(self.config.server_error_message.clone()),
                    serial_number: None,
                }
            }
        };

        Some(verdict)
    }

    async fn spawn_profile_image(self: &Arc<Self>, serial: String) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let this = Arc::clone(self);
                handle.spawn(async move {
                    this.fetch_profile_image(&serial).await;
                });
            }
            Err(_) => {
                self.fetch_profile_image(&serial).await;
            }
        }
    }

    /// Download the profile image for `serial_number`, publishing progress
    /// and the final image as events.
    ///
    /// Returns `false` when a download was already in flight and this
    /// request was dropped.
    pub async fn fetch_profile_image(&self, serial_number: &str) -> bool {
        let Some(_in_flight) = InFlight::acquire(&self.image_in_flight) else {
            debug!("Profile image download already in flight, dropping request");
            return false;
        };

        let events = self.events.clone();
        let progress = move |fraction: f64| {
            events.publish(ValidatorEvent::DownloadProgress(fraction));
        };

        let image = match self.services.images.fetch_image(serial_number, &progress).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(error = %e, "Profile image download failed");
                None
            }
        };

        self.events.publish(ValidatorEvent::ProfileImage(image));
        true
    }

    /// Reconcile the key store with the key distribution service.
    pub async fn sync_keys(&self) -> Result<SyncReport, KeyStoreError> {
        let result = self.key_store.reconcile(self.services.keys.as_ref()).await;

        let available = result.is_ok();
        if let Err(ref e) = result {
            warn!(error = %e, "Key sync failed");
        }
        self.events
            .publish(ValidatorEvent::ServiceAvailabilityChanged(available));

        result
    }
}

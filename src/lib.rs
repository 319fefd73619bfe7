//! Digital ID Validator Library
//!
//! Validates signed digital ID barcodes: parses the delimiter-encoded
//! primary code, verifies its RSA signature against cached issuer keys,
//! builds the customer record and checks the time-windowed watermark
//! carried by the secondary code.

pub mod codes;
pub mod config;
pub mod error;
pub mod events;
pub mod keystore;
pub mod payload;
pub mod record;
pub mod service;
pub mod signature;
pub mod validator;
pub mod watermark;

pub use codes::{EyeColor, Gender};
pub use config::ValidatorConfig;
pub use error::{ConfigError, KeyStoreError, ParseError, Result, ServiceError, ValidationError};
pub use events::{EventBus, ValidatorEvent};
pub use keystore::{FileKeyStorage, KeyLookup, KeyStorage, KeyStore, MemoryKeyStorage, SyncReport};
pub use payload::{parse, ParsedScan, PrimaryPayload, RawScan, Symbology};
pub use record::{Address, CustomerRecord};
pub use service::{
    HttpServiceClient, ImageService, KeySource, OnlineValidation, ValidationService,
};
pub use signature::{build_assertion, verify_assertion, Verification};
pub use validator::{Collaborators, CredentialValidator, OnlineVerdict, ScanOutcome};
pub use watermark::{Clock, FixedClock, SystemClock, WatermarkOutcome, WatermarkState};

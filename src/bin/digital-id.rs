use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use digital_id_validator::keystore::KeyLookup;
use digital_id_validator::watermark::{assertion_hash, derive_expected};
use digital_id_validator::{
    build_assertion, parse, record, verify_assertion, CredentialValidator, FileKeyStorage, KeyStore,
    ParsedScan, ValidatorConfig, Verification,
};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "digital-id")]
#[command(about = "Validate signed digital ID barcode payloads")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a scanned payload without verifying its signature
    Parse {
        /// File containing the decoded barcode text
        payload: PathBuf,
    },
    /// Verify a primary payload against the cached issuer keys
    Verify {
        /// File containing the decoded barcode text
        payload: PathBuf,

        /// Directory holding `{id}.pub.pem` issuer keys
        #[arg(long)]
        keys: PathBuf,

        /// Output result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Compute the expected secondary watermark for an assertion hash
    Watermark {
        /// MD5 assertion hash as printed by `verify`
        hash: String,

        /// Local time to evaluate at (YYYY-MM-DDTHH:MM:SS); defaults to now
        #[arg(long)]
        at: Option<NaiveDateTime>,
    },
    /// Fetch issuer keys that are missing from the local key directory
    SyncKeys {
        /// Path to the JSON configuration file
        #[arg(long)]
        config: PathBuf,

        /// Directory holding `{id}.pub.pem` issuer keys
        #[arg(long)]
        keys: PathBuf,
    },
}

#[derive(Serialize)]
struct VerifyReport {
    valid: bool,
    key_id: Option<u64>,
    assertion_hash: String,
    customer: Option<record::CustomerRecord>,
    error: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.quiet {
        tracing::Level::ERROR
    } else if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Parse { payload } => parse_command(&payload),
        Commands::Verify {
            payload,
            keys,
            json,
        } => verify_command(&payload, &keys, json),
        Commands::Watermark { hash, at } => watermark_command(&hash, at),
        Commands::SyncKeys { config, keys } => sync_keys_command(&config, &keys).await,
    }
}

fn read_payload(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read payload {}", path.display()))?;
    Ok(text.trim_end_matches(['\r', '\n']).to_string())
}

fn parse_command(path: &Path) -> Result<()> {
    println!("Parsing payload: {}", path.display());
    let text = read_payload(path)?;

    match parse(&text) {
        Ok(ParsedScan::Primary(primary)) => {
            println!("[OK] Primary code parsed");
            println!("  Groups:       {}", primary.groups().len());
            println!("  Family name:  {}", primary.group1_fields()[0]);
            println!("  Given names:  {}", primary.group1_fields()[1]);
            println!("  Identifier:   {}", primary.group1_fields()[7]);
            println!("  Signature:    {} bytes", primary.signature().len());
            Ok(())
        }
        Ok(ParsedScan::Secondary(value)) => {
            println!("[OK] Secondary code parsed");
            println!("  Watermark:    {}", value);
            Ok(())
        }
        Ok(ParsedScan::Inconclusive) => {
            println!("[FAILED] Payload is neither a primary nor a secondary code");
            Err(anyhow::anyhow!("Unrecognised payload format"))
        }
        Err(e) => {
            println!("[FAILED] {}", e);
            Err(e).context("Failed to parse payload")
        }
    }
}

fn verify_command(payload_path: &Path, keys_dir: &Path, json_output: bool) -> Result<()> {
    let text = read_payload(payload_path)?;

    let primary = match parse(&text).context("Failed to parse payload")? {
        ParsedScan::Primary(primary) => primary,
        _ => return Err(anyhow::anyhow!("Payload is not a primary code")),
    };

    let store = KeyStore::open(FileKeyStorage::new(keys_dir)).context("Failed to open key store")?;
    let assertion = build_assertion(primary.group1(), primary.group2());
    let hash = assertion_hash(&assertion);

    let verification = verify_assertion(
        assertion.as_bytes(),
        primary.signature(),
        &store.candidate_ids(),
        &store,
    )
    .context("Signature verification could not be attempted")?;

    let mut report = VerifyReport {
        valid: false,
        key_id: None,
        assertion_hash: hash,
        customer: None,
        error: None,
    };

    match verification {
        Verification::Verified { key_id } => {
            report.key_id = Some(key_id);
            match record::build(primary.group1_fields(), primary.group2_fields()) {
                Ok(customer) => {
                    report.valid = true;
                    report.customer = Some(customer);
                }
                Err(e) => report.error = Some(format!("Unusable credential fields: {}", e)),
            }
        }
        Verification::NoMatch => {
            report.error = Some("Signature does not match any cached issuer key".to_string());
        }
    }

    if json_output {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialize result")?;
        println!("{}", json);
    } else {
        print_verify_report(&report);
    }

    if report.valid {
        Ok(())
    } else {
        Err(anyhow::anyhow!("Validation failed"))
    }
}

fn print_verify_report(report: &VerifyReport) {
    match report.key_id {
        Some(id) => println!("[OK] Signature verified with key {}", id),
        None => println!("[FAILED] Signature verification"),
    }

    if let Some(ref customer) = report.customer {
        println!();
        println!("Customer:");
        println!("  Name:         {} {}", customer.given_names, customer.family_name);
        println!("  Identifier:   {}", customer.identifier);
        println!("  Born:         {}", customer.date_of_birth);
        println!("  Issued:       {}", customer.date_of_issue);
        println!("  Expires:      {}", customer.date_of_expiration);
        println!("  Issuer:       {} / {}", customer.issuing_country, customer.issuing_jurisdiction);
        println!("  Class:        {}", customer.class_restrictions);
        println!("  Gender:       {}", customer.gender);
        println!("  Height:       {}", customer.height);
        println!("  Eye color:    {}", customer.eye_color);
        println!("  Address:      {}", customer.address.line1);
        if let Some(ref line2) = customer.address.line2 {
            println!("                {}", line2);
        }
        println!(
            "                {}, {} {}",
            customer.address.city, customer.address.jurisdiction, customer.address.postal_code
        );
    }

    println!();
    println!("Assertion hash: {}", report.assertion_hash);
    if report.valid {
        println!("[OK] Validation complete");
    } else {
        println!(
            "[FAILED] Validation failed: {}",
            report.error.as_deref().unwrap_or_default()
        );
    }
}

fn watermark_command(hash: &str, at: Option<NaiveDateTime>) -> Result<()> {
    let now = at.unwrap_or_else(|| chrono::Local::now().naive_local());
    println!("{}", derive_expected(hash, now));
    Ok(())
}

async fn sync_keys_command(config_path: &Path, keys_dir: &Path) -> Result<()> {
    let config = ValidatorConfig::from_file(config_path).context("Failed to load configuration")?;
    println!("[..] Syncing keys from {}", config.sync_keys_endpoint);

    let validator =
        CredentialValidator::with_http(config, keys_dir).context("Failed to set up validator")?;
    let report = validator.sync_keys().await.context("Key sync failed")?;

    println!("[OK] {} key(s) added", report.added.len());
    if !report.failed.is_empty() {
        println!("[FAILED] {} key(s) could not be fetched: {:?}", report.failed.len(), report.failed);
    }
    println!("  Known keys: {:?}", validator.key_store().known_ids());
    Ok(())
}

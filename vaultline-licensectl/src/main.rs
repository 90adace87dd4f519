//! Vaultline license inspection tool
//!
//! Verifies license keys, entitlement tokens and air-gap license files
//! without contacting the licensing server.
//!
//! Usage:
//!   vaultline-licensectl verify-key <KEY>
//!   vaultline-licensectl inspect-bundle license.json --revocations revoked.json

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{Level, debug};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use vaultline_license::{LicenseConfig, SigningScheme};
use vaultline_licensectl::{BundleCheck, Report};

#[derive(Parser, Debug)]
#[command(name = "vaultline-licensectl")]
#[command(about = "Inspect Vaultline license keys, entitlement tokens and air-gap files")]
struct Args {
    /// Licensing config file supplying public keys
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify a license key and print its claims
    VerifyKey {
        key: String,
        #[arg(long, value_enum)]
        scheme: Option<Scheme>,
        /// Hex-encoded Ed25519 public key
        #[arg(long)]
        public_key: Option<String>,
        /// Shared secret for HMAC-signed keys
        #[arg(long)]
        secret: Option<String>,
    },
    /// Verify an entitlement token and print its grant
    VerifyToken {
        token: String,
        /// Hex-encoded Ed25519 public key
        #[arg(long)]
        public_key: Option<String>,
    },
    /// Verify an air-gap license file
    InspectBundle {
        file: PathBuf,
        /// Signed revocation list to check against
        #[arg(long)]
        revocations: Option<PathBuf>,
        /// Hex-encoded Ed25519 public key
        #[arg(long)]
        public_key: Option<String>,
        /// Fingerprint to check a hardware binding against
        #[arg(long)]
        hardware_id: Option<String>,
    },
    /// Print this machine's hardware fingerprint
    Fingerprint,
    /// Print the tier policy
    Tiers,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Scheme {
    Ed25519,
    Hmac,
}

impl From<Scheme> for SigningScheme {
    fn from(scheme: Scheme) -> Self {
        match scheme {
            Scheme::Ed25519 => SigningScheme::Ed25519,
            Scheme::Hmac => SigningScheme::Hmac,
        }
    }
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::WARN };
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let mut config = match &args.config {
        Some(path) => LicenseConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => LicenseConfig::default(),
    };
    let now = Utc::now();

    let valid = match args.command {
        Command::VerifyKey {
            key,
            scheme,
            public_key,
            secret,
        } => {
            if let Some(scheme) = scheme {
                config.signing_scheme = scheme.into();
            }
            if let Some(public_key) = public_key {
                config.license_public_key = public_key;
            }
            if secret.is_some() {
                config.license_hmac_secret = secret;
            }
            emit(&vaultline_licensectl::verify_key(&key, &config, now)?, args.json)?
        }
        Command::VerifyToken { token, public_key } => {
            if let Some(public_key) = public_key {
                config.entitlement_public_key = public_key;
            }
            emit(&vaultline_licensectl::verify_token(&token, &config, now)?, args.json)?
        }
        Command::InspectBundle {
            file,
            revocations,
            public_key,
            hardware_id,
        } => {
            if let Some(public_key) = public_key {
                config.entitlement_public_key = public_key;
            }
            let bundle = read(&file)?;
            let revocations = revocations.as_deref().map(read).transpose()?;
            let check = BundleCheck {
                revocations: revocations.as_deref(),
                hardware_id: hardware_id.as_deref(),
            };
            emit(
                &vaultline_licensectl::inspect_bundle(&bundle, &check, &config, now)?,
                args.json,
            )?
        }
        Command::Fingerprint => emit(&vaultline_licensectl::fingerprint()?, args.json)?,
        Command::Tiers => emit(&vaultline_licensectl::tier_table(), args.json)?,
    };

    Ok(if valid { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

fn read(path: &Path) -> Result<Vec<u8>> {
    debug!("Reading {:?}", path);
    fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn emit(report: &impl Report, json: bool) -> Result<bool> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("{report}");
    }
    Ok(report.is_valid())
}

//! Step-up adapter command line.
//!
//! Runs the two protocol phases outside a federation host, for operators
//! testing a gateway integration, and checks a configuration before it is
//! deployed.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use stepup_adapter::saml::{AuthenticationClaim, ProofData, ResponseVerifier};
use stepup_adapter::signing::{self, FileCertificateStore, Thumbprint};
use stepup_adapter::{Completion, StepUpConfig, StepUpController};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "stepup-adapter")]
#[command(about = "Second factor step-up authentication against a SAML gateway")]
struct Args {
    /// Path to the JSON configuration
    #[arg(
        long,
        default_value = "/etc/stepup-adapter/stepup.json",
        env = "STEPUP_CONFIG"
    )]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, env = "STEPUP_VERBOSE")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Issue a signed request and print the auto-post form
    Begin {
        /// User identifier from the primary identity claim
        #[arg(long)]
        user: String,

        /// URL the gateway returns the browser to
        #[arg(long)]
        callback_url: String,

        /// Locale of the rendered page
        #[arg(long, default_value_t = 1033)]
        lcid: u32,
    },

    /// Verify a gateway postback and print the resulting claims
    Complete {
        /// Request id printed by `begin`
        #[arg(long)]
        request_id: String,

        /// File holding the form-encoded postback (stdin when omitted)
        #[arg(long)]
        proof: Option<PathBuf>,
    },

    /// Validate the configuration and load every certificate it names
    Check,

    /// Print the thumbprint of a PEM certificate
    Thumbprint {
        /// PEM file
        certificate: PathBuf,
    },
}

#[derive(Serialize)]
struct BeginOutput<'a> {
    request_id: &'a str,
    title: &'a str,
    html: String,
}

#[derive(Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum CompleteOutput {
    Accepted { claims: Vec<AuthenticationClaim> },
    Rejected { html: String },
}

fn load_config(args: &Args) -> Result<Arc<StepUpConfig>> {
    let config = StepUpConfig::from_file(&args.config)?;
    config.validate().map_err(|e| anyhow!(e))?;
    info!(path = ?args.config, "Configuration loaded");
    Ok(Arc::new(config))
}

fn store_for(config: &StepUpConfig) -> Result<Arc<FileCertificateStore>> {
    let sp = config
        .local_sp
        .as_ref()
        .ok_or_else(|| anyhow!("local_sp section is missing"))?;
    Ok(Arc::new(FileCertificateStore::new(&sp.certificate_store)))
}

fn read_proof(path: Option<&PathBuf>) -> Result<ProofData> {
    let body = match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read proof data: {:?}", path))?,
        None => {
            let mut body = String::new();
            std::io::stdin()
                .read_to_string(&mut body)
                .context("Failed to read proof data from stdin")?;
            body
        }
    };
    Ok(ProofData::from_form_body(body.trim())?)
}

fn run(args: &Args) -> Result<bool> {
    match args.command {
        Command::Begin {
            ref user,
            ref callback_url,
            lcid,
        } => {
            let config = load_config(args)?;
            let store = store_for(&config)?;
            let mut controller = StepUpController::new(config, store);

            let identity = AuthenticationClaim::new("user", user.as_str());
            let presentation = controller.begin(&identity, callback_url);
            let request_id = controller
                .request_id()
                .ok_or_else(|| anyhow!("step-up request could not be issued, see log"))?;

            let output = BeginOutput {
                request_id,
                title: presentation.page_title(lcid),
                html: presentation.form_html(lcid),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(true)
        }

        Command::Complete {
            ref request_id,
            ref proof,
        } => {
            let config = load_config(args)?;
            let store = store_for(&config)?;
            let proof = read_proof(proof.as_ref())?;

            let mut controller = StepUpController::resume(config, store, request_id.as_str());
            let (accepted, output) = match controller.complete(&proof) {
                Completion::Accepted(claims) => (true, CompleteOutput::Accepted { claims }),
                Completion::Rejected(presentation) => (
                    false,
                    CompleteOutput::Rejected {
                        html: presentation.form_html(1033),
                    },
                ),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(accepted)
        }

        Command::Check => {
            let config = load_config(args)?;
            let sp = config
                .local_sp
                .as_ref()
                .ok_or_else(|| anyhow!("local_sp section is missing"))?;
            let store = store_for(&config)?;
            let certificate = signing::resolve(store.as_ref(), &sp.signing_certificate)?;
            info!(thumbprint = %certificate.thumbprint, "Signing certificate usable");

            ResponseVerifier::from_config(&config)?;
            info!("Gateway certificates loaded");
            println!("configuration OK");
            Ok(true)
        }

        Command::Thumbprint { ref certificate } => {
            let pem = std::fs::read(certificate)
                .with_context(|| format!("Failed to read certificate: {:?}", certificate))?;
            let block = x509_parser::pem::Pem::iter_from_buffer(&pem)
                .filter_map(|block| block.ok())
                .find(|block| block.label == "CERTIFICATE")
                .ok_or_else(|| anyhow!("no certificate in {:?}", certificate))?;
            println!("{}", Thumbprint::of_der(&block.contents));
            Ok(true)
        }
    }
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("{}={}", env!("CARGO_CRATE_NAME"), log_level))
        .with_writer(std::io::stderr)
        .json()
        .init();

    if !run(&args)? {
        std::process::exit(1);
    }
    Ok(())
}

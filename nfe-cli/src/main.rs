use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use nfe_core::{
    api::SefazClient,
    config::{Config, EnvironmentType},
    document::{AccessKey, parse::parse_document_file, schema::XsdSchemaValidator},
    pipeline::{StatusReport, ValidationMode, ValidationOptions, ValidationPipeline, ValidationReport},
    tls::TrustStoreBuilder,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nfe-validator")]
#[command(about = "Validate Brazilian NF-e documents: XSD, parsing, access key and SEFAZ status")]
struct Cli {
    /// Log verbosity on stderr (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SefazArgs {
    /// SEFAZ environment: production or homolog.
    #[arg(long, default_value = "production")]
    env: EnvironmentType,
    /// Directory holding the `.env.<env>` file.
    #[arg(long, default_value = ".")]
    config_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a document and print the JSON report.
    Validate {
        xml: PathBuf,
        xsd: PathBuf,
        /// Only check the document against the XSD.
        #[arg(long, conflicts_with = "skip_sefaz")]
        xsd_only: bool,
        /// Check XSD, parse and access key without querying SEFAZ.
        #[arg(long)]
        skip_sefaz: bool,
        /// Finish without error when the document has no derivable access key.
        #[arg(long)]
        allow_missing_key: bool,
        #[command(flatten)]
        sefaz: SefazArgs,
    },
    /// Query SEFAZ for the status of an access key.
    Status {
        key: String,
        #[command(flatten)]
        sefaz: SefazArgs,
    },
    /// Print the access key of a document after checking its digit.
    Key { xml: PathBuf },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Validate {
            xml,
            xsd,
            xsd_only,
            skip_sefaz,
            allow_missing_key,
            sefaz,
        } => {
            let mode = if xsd_only {
                ValidationMode::SchemaOnly
            } else if skip_sefaz {
                ValidationMode::Offline
            } else {
                ValidationMode::Full
            };
            let options = ValidationOptions::new(mode).require_access_key(!allow_missing_key);
            validate(&xml, &xsd, options, &sefaz)?;
        }
        Commands::Status { key, sefaz } => {
            let key = AccessKey::parse(&key).with_context(|| format!("invalid access key '{key}'"))?;
            let config = load_config(&sefaz)?;
            let trust = TrustStoreBuilder::from_config(&config)
                .build()
                .context("failed to build the trust store")?;
            let client = SefazClient::from_config(&config, &trust)?;
            let status = client.query_status(&key)?;
            print_json(&KeyStatus {
                access_key: key.as_str(),
                remote: StatusReport::from(&status),
            })?;
        }
        Commands::Key { xml } => {
            let parsed = parse_document_file(&xml)?;
            let Some(key) = parsed.access_key() else {
                bail!("no access key in infNFe/@Id ('{}')", parsed.identifier());
            };
            key.validate()
                .with_context(|| format!("access key {key} is invalid"))?;
            println!("{key}");
        }
    }

    Ok(())
}

fn validate(xml: &Path, xsd: &Path, options: ValidationOptions, sefaz: &SefazArgs) -> Result<()> {
    let document = match std::fs::read(xml) {
        Ok(document) => document,
        Err(e) => {
            print_json(&ValidationReport::from_error(format!(
                "failed to read XML file {}: {e}",
                xml.display()
            )))?;
            bail!("failed to read XML file {}", xml.display());
        }
    };

    tracing::debug!(xml = %xml.display(), mode = ?options.mode(), "validating document");
    let pipeline = if options.mode().queries_remote() {
        let config = load_config(sefaz)?;
        ValidationPipeline::connect(XsdSchemaValidator, xsd, &config)
            .context("failed to set up the SEFAZ client")?
    } else {
        ValidationPipeline::new(XsdSchemaValidator, xsd)
    };

    let result = pipeline.validate(&document, options);
    print_json(&result.report())
}

fn load_config(args: &SefazArgs) -> Result<Config> {
    Config::load(args.env, &args.config_dir).with_context(|| {
        format!(
            "failed to load {} configuration from {}",
            args.env.as_str(),
            args.config_dir.display()
        )
    })
}

#[derive(Serialize)]
struct KeyStatus<'a> {
    #[serde(rename = "chave_acesso")]
    access_key: &'a str,
    #[serde(rename = "sefaz")]
    remote: StatusReport,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use anyhow::{anyhow, Context};
use certchain::{
    codec::{BundleFormat, InputFormat},
    config::{load, Config, LogFormat, DEFAULT_CONFIG_DIR},
    error::ChainError,
    services::{
        logger::LogAppender,
        resolution::{
            BuildBundleRequest, InputType, ResolveChainRequest, Upload, VerifyKeyPairRequest,
        },
        ChainResolutionService,
    },
};
use clap::{crate_version, Parser, Subcommand};
use serde_json::{json, Value};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Resolve, complete and re-encode X.509 certificate chains
#[derive(Debug, Parser)]
#[command(name = "certchain", version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve the chain served by a host or stored in a file
    Resolve {
        #[arg(long, value_enum, default_value_t = InputType::Auto)]
        input_type: InputType,

        /// `https://host[:port][/path]` or a bare host
        #[arg(long)]
        url: Option<String>,

        /// Overrides the port in `--url`
        #[arg(long)]
        port: Option<u16>,

        #[arg(long)]
        file: Option<PathBuf>,

        #[arg(long, value_enum, default_value_t = InputFormat::Auto)]
        format: InputFormat,

        #[arg(long)]
        password: Option<String>,
    },

    /// Download the issuer of a certificate through its AIA extension
    FetchMissing {
        #[arg(long)]
        certificate: PathBuf,
    },

    /// Package PEM certificates as a PEM, PKCS7 or PKCS12 bundle
    Bundle {
        /// PEM files, leaf first. Can be repeated.
        #[arg(long = "certificate", required = true)]
        certificates: Vec<PathBuf>,

        #[arg(long, value_enum, default_value_t = BundleFormat::Pem)]
        format: BundleFormat,

        /// Export password, required for pkcs12
        #[arg(long)]
        password: Option<String>,

        #[arg(long)]
        private_key: Option<PathBuf>,

        #[arg(long)]
        alias: Option<String>,

        /// Also write the decoded bundle to this file
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Check that a private key belongs to a certificate
    VerifyKey {
        #[arg(long)]
        certificate: PathBuf,

        #[arg(long)]
        private_key: PathBuf,

        #[arg(long)]
        password: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(value) => {
            println!("{value:#}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            println!("{:#}", error_payload(&err));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<Value, anyhow::Error> {
    // Loads configuration from command-line, YAML or HCL sources
    let config = Arc::new(load(&cli.config, DEFAULT_CONFIG_DIR)?);

    setup_logging(&config)?;
    let _span = tracing::info_span!("certchain", service = %config.service_name).entered();

    tracing::debug!(version = crate_version!(), "certchain starting");

    let service = ChainResolutionService::from_config(config)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(execute(&service, cli.command))
}

async fn execute(
    service: &ChainResolutionService,
    command: Command,
) -> Result<Value, anyhow::Error> {
    let value = match command {
        Command::Resolve {
            input_type,
            url,
            port,
            file,
            format,
            password,
        } => {
            let certificate_file = match file {
                Some(path) => Some(read_upload(&path).await?),
                None => None,
            };

            let response = service
                .resolve_chain(ResolveChainRequest {
                    input_type,
                    url,
                    port,
                    certificate_file,
                    format,
                    password,
                })
                .await?;
            serde_json::to_value(response)?
        }
        Command::FetchMissing { certificate } => {
            let upload = read_upload(&certificate).await?;
            serde_json::to_value(service.fetch_missing(&upload.content).await?)?
        }
        Command::Bundle {
            certificates,
            format,
            password,
            private_key,
            alias,
            output,
        } => {
            let mut pems = Vec::with_capacity(certificates.len());
            for path in &certificates {
                let upload = read_upload(path).await?;
                let pem = String::from_utf8(upload.content.to_vec())
                    .map_err(|_| anyhow!("{} is not a PEM file", path.display()))?;
                pems.push(pem);
            }

            let private_key = match private_key {
                Some(path) => Some(read_upload(&path).await?),
                None => None,
            };

            let response = service.build_bundle(BuildBundleRequest {
                certificates: pems,
                format,
                password,
                private_key,
                alias,
            })?;

            if let Some(output) = output {
                let bundle = openssl::base64::decode_block(&response.content)?;
                tokio::fs::write(&output, bundle)
                    .await
                    .with_context(|| format!("unable to write {}", output.display()))?;
                tracing::info!(path = %output.display(), "bundle written");
            }

            serde_json::to_value(response)?
        }
        Command::VerifyKey {
            certificate,
            private_key,
            password,
        } => {
            let response = service.verify_key_pair(VerifyKeyPairRequest {
                certificate: read_upload(&certificate).await?,
                private_key: read_upload(&private_key).await?,
                password,
            })?;
            serde_json::to_value(response)?
        }
    };

    Ok(value)
}

async fn read_upload(path: &Path) -> Result<Upload, anyhow::Error> {
    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("unable to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned());

    Ok(Upload::new(filename, content))
}

/// `{ error, message, status }` for a failed command
fn error_payload(err: &anyhow::Error) -> Value {
    match err.downcast_ref::<ChainError>() {
        Some(chain_error) => json!({
            "error": chain_error.kind(),
            "message": chain_error.to_string(),
            "status": chain_error.status_code(),
        }),
        None => json!({
            "error": "internal",
            "message": format!("{err:#}"),
            "status": 500,
        }),
    }
}

fn setup_logging(config: &Config) -> Result<(), anyhow::Error> {
    let appender = LogAppender::new(&config.logging)?;
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from(&config.logging.level).into())
        .from_env_lossy();

    // Creates a tracing/logging subscriber based on the configuration provided
    let initialized = if config.logging.format == LogFormat::Json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(appender)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(config.logging.path.is_none())
            .with_writer(appender)
            .try_init()
    };

    initialized.map_err(|err| anyhow!(err))
}

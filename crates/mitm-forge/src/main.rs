use std::io::{self, Write};
use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use mitm_forge::{ForgeConfig, ForgeryEngine, KeyAlgorithm};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitClass {
    Ok,
    ConfigInvalid,
    InitFailed,
    ForgeFailed,
}

impl ExitClass {
    fn code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::ConfigInvalid => 20,
            Self::InitFailed => 21,
            Self::ForgeFailed => 22,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::ConfigInvalid => "config_invalid",
            Self::InitFailed => "init_failed",
            Self::ForgeFailed => "forge_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RunOutcome {
    class: ExitClass,
    detail: Option<String>,
}

impl RunOutcome {
    fn ok() -> Self {
        Self {
            class: ExitClass::Ok,
            detail: None,
        }
    }

    fn error(class: ExitClass, detail: impl Into<String>) -> Self {
        Self {
            class,
            detail: Some(detail.into()),
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "mitm-forge", version, about = "Forge TLS server certificates for interception")]
struct Cli {
    /// JSON configuration file; flags below override its values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
    /// rsa:<bits> or ecc:<curve>, used for keys created on first run.
    #[arg(long, global = true)]
    keyspec: Option<KeyAlgorithm>,
    /// Do not tag certificates with the forged-certificate extension.
    #[arg(long, global = true)]
    no_mark: bool,
    #[arg(long, global = true)]
    crl_uri: Option<String>,
    #[arg(long, global = true)]
    ocsp_uri: Option<String>,
    /// Log every forged certificate at debug level.
    #[arg(long, global = true)]
    dump_certs: bool,
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create or load the persisted keys and root certificate, then print the root PEM.
    Init,
    /// Forge a server certificate for one destination and print it as PEM.
    Forge {
        #[arg(long)]
        hostname: Option<String>,
        #[arg(long)]
        address: Ipv4Addr,
        /// Also print the root certificate after the leaf.
        #[arg(long)]
        chain: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let outcome = run(cli);
    if let Some(detail) = &outcome.detail {
        tracing::error!(exit_class = outcome.class.label(), "{detail}");
        eprintln!("mitm-forge: {detail}");
    }
    std::process::exit(outcome.class.code());
}

fn init_tracing(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> RunOutcome {
    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(detail) => return RunOutcome::error(ExitClass::ConfigInvalid, detail),
    };
    let engine = match ForgeryEngine::initialize(config) {
        Ok(engine) => engine,
        Err(error) => return RunOutcome::error(ExitClass::InitFailed, error.to_string()),
    };

    let mut output = String::new();
    let outcome = match cli.command {
        Command::Init => {
            output.push_str(engine.forged_root_certificate().pem());
            RunOutcome::ok()
        }
        Command::Forge {
            hostname,
            address,
            chain,
        } => match engine.forge_certificate_for_server(hostname.as_deref(), address) {
            Ok(certificate) => {
                output.push_str(certificate.pem());
                if chain {
                    output.push_str(engine.forged_root_certificate().pem());
                }
                RunOutcome::ok()
            }
            Err(error) => RunOutcome::error(ExitClass::ForgeFailed, error.to_string()),
        },
    };
    engine.shutdown();

    if !output.is_empty() {
        let mut stdout = io::stdout().lock();
        if let Err(error) = stdout.write_all(output.as_bytes()).and_then(|()| stdout.flush()) {
            return RunOutcome::error(
                ExitClass::ForgeFailed,
                format!("failed to write certificate: {error}"),
            );
        }
    }
    outcome
}

fn build_config(cli: &Cli) -> Result<ForgeConfig, String> {
    let mut config = match &cli.config {
        Some(path) => ForgeConfig::from_json_file(path).map_err(|error| error.to_string())?,
        None => ForgeConfig::default(),
    };
    if let Some(config_dir) = &cli.config_dir {
        config.config_dir = config_dir.clone();
    }
    if let Some(keyspec) = cli.keyspec {
        config.keyspec = keyspec;
    }
    if cli.no_mark {
        config.mark_forged_certificates = false;
    }
    if let Some(crl_uri) = &cli.crl_uri {
        config.crl_uri = Some(crl_uri.clone());
    }
    if let Some(ocsp_uri) = &cli.ocsp_uri {
        config.ocsp_responder_uri = Some(ocsp_uri.clone());
    }
    if cli.dump_certs {
        config.dump_certificates = true;
    }
    config.validate().map_err(|error| error.to_string())?;
    Ok(config)
}

//! sealbox: passphrase encryption of files and folders
//!
//! Commands:
//!   encrypt <paths..>       - bundle, scrub and encrypt with a generated passphrase
//!   encrypt-hsm <paths..>   - same, passphrase drawn from a PKCS#11 token
//!   decrypt <paths..>       - decrypt `.age` files, extracting bundles in place
//!   passphrase [--words N]  - print a fresh wordlist passphrase
//!   config show             - display the effective configuration

mod terminal;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use sealbox_core::config::SealConfig;
use sealbox_engine::{Outcome, Request, SealService};
use sealbox_secrets::PassphraseGenerator;

use crate::terminal::TerminalHost;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "sealbox",
    version,
    about = "Encrypt files and folders with generated passphrases",
    long_about = "sealbox: bundle, sanitize and passphrase-encrypt files and folders with age"
)]
struct Cli {
    /// Path to config.toml
    #[arg(
        long,
        short = 'c',
        env = "SEALBOX_CONFIG",
        default_value = "~/.config/sealbox/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "SEALBOX_LOG")]
    log: Option<String>,

    /// Log format; overrides the config file
    #[arg(long, env = "SEALBOX_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt files and folders into one `.age` artifact
    Encrypt {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Encrypt using a passphrase from the hardware token's TRNG
    #[command(name = "encrypt-hsm")]
    EncryptHsm {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Decrypt `.age` files
    Decrypt {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Generate and print a wordlist passphrase
    Passphrase {
        /// Number of words (default from config)
        #[arg(long, short = 'w')]
        words: Option<usize>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let config_path = expand_tilde(&cli.config, home.as_deref());
    let (config, from_file) = load_config(&config_path).await?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = match cli.log_format {
        Some(f) => f,
        None if config.log.format.eq_ignore_ascii_case("json") => LogFormat::Json,
        None => LogFormat::Text,
    };
    init_logging(&level, &format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        from_file,
        "sealbox starting"
    );

    match cli.command {
        Commands::Encrypt { paths } => cmd_run(config, Request::Encrypt(absolutize(&paths)?)).await,
        Commands::EncryptHsm { paths } => {
            cmd_run(config, Request::EncryptWithHsm(absolutize(&paths)?)).await
        }
        Commands::Decrypt { paths } => cmd_run(config, Request::Decrypt(absolutize(&paths)?)).await,
        Commands::Passphrase { words } => cmd_passphrase(&config, words),
        Commands::Config { action: ConfigAction::Show } => {
            cmd_config_show(&config, &config_path, from_file)
        }
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

async fn load_config(path: &Path) -> Result<(SealConfig, bool)> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("parsing config: {}", path.display()))?;
        Ok((config, true))
    } else {
        Ok((SealConfig::default(), false))
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
    let layer = fmt::layer().with_writer(std::io::stderr);

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(layer.json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
    }
}

/// `~/x` → `$HOME/x`
fn expand_tilde(path: &Path, home: Option<&Path>) -> PathBuf {
    match (path.strip_prefix("~"), home) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

fn absolutize(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    paths
        .iter()
        .map(|p| std::path::absolute(p).with_context(|| format!("resolving {}", p.display())))
        .collect()
}

// ── `sealbox encrypt | encrypt-hsm | decrypt` ────────────────────────────────

async fn cmd_run(config: SealConfig, request: Request) -> Result<()> {
    let host = Arc::new(TerminalHost::new(config.tools.clipboard.clone()));
    let service = Arc::new(SealService::new(config, host.clone(), host));

    let outcome = service
        .spawn(request)
        .await
        .context("worker task failed")??;

    match outcome {
        Outcome::Encrypted(report) => {
            println!("{}", report.destination.display());
            Ok(())
        }
        Outcome::Decrypted(report) => {
            for output in &report.outputs {
                println!("{}", output.display());
            }
            if report.failed > 0 {
                anyhow::bail!(
                    "{} of {} file(s) failed",
                    report.failed,
                    report.failed + report.succeeded
                );
            }
            Ok(())
        }
        Outcome::Cancelled => {
            eprintln!("cancelled");
            Ok(())
        }
    }
}

// ── `sealbox passphrase` ──────────────────────────────────────────────────────

fn cmd_passphrase(config: &SealConfig, words: Option<usize>) -> Result<()> {
    let generator = PassphraseGenerator::new(words.unwrap_or(config.passphrase.words))
        .context("invalid word count")?;
    let passphrase = generator.generate();
    eprintln!(
        "# {} words, ~{:.0} bits of entropy",
        generator.word_count(),
        generator.entropy_bits()
    );
    println!("{}", passphrase.expose_secret());
    Ok(())
}

// ── `sealbox config show` ─────────────────────────────────────────────────────

fn cmd_config_show(config: &SealConfig, config_path: &Path, from_file: bool) -> Result<()> {
    if from_file {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

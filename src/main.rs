mod prompt;
mod store;

use crate::prompt::{prompt_new_password, prompt_password_hidden};
use crate::store::{load_record, save_record};
use anyhow::anyhow;
use clap::{Parser, Subcommand, ValueEnum};
use otpkeep::config::{config_path, save_settings};
use otpkeep::{
    Authenticator, CopyOutcome, HashAlgorithm, OtpEngine, Record, Settings, SystemClipboard,
    Variant, to_uri,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "otpkeep", version, about = "One-time-password records on disk")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new record file
    ///
    /// Examples:
    ///   otpkeep new github.xml --name "GitHub (octocat)"
    ///   otpkeep new bank.xml --name Bank --kind hotp --counter 4
    New {
        /// Record file to create
        file: PathBuf,
        /// Display name
        #[arg(long)]
        name: String,
        /// Base32 secret (prompted when omitted)
        #[arg(long)]
        secret: Option<String>,
        #[arg(long, value_enum, default_value_t = KindArg::Totp)]
        kind: KindArg,
        #[arg(long)]
        issuer: Option<String>,
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=9))]
        digits: Option<u32>,
        /// Seconds per code
        #[arg(long)]
        period: Option<u64>,
        #[arg(long, value_enum)]
        algorithm: Option<AlgorithmArg>,
        /// Initial counter (hotp)
        #[arg(long)]
        counter: Option<u64>,
        /// Serial number (battlenet)
        #[arg(long)]
        serial: Option<String>,
        /// Device id (steam)
        #[arg(long)]
        device_id: Option<String>,
        /// Session data (steam)
        #[arg(long)]
        data: Option<String>,
        /// Encrypt the secret with a password
        #[arg(long)]
        protect: bool,
    },

    /// Show record fields
    Show {
        file: PathBuf,
        /// Show as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the current code
    Code { file: PathBuf },

    /// Copy the current code to the clipboard
    Clip {
        file: PathBuf,
        /// Retry while another application holds the clipboard
        #[arg(long)]
        retry: bool,
    },

    /// Print the otpauth:// URI
    Uri {
        file: PathBuf,
        /// Leave out parameters other apps reject
        #[arg(long)]
        compat: bool,
    },

    /// Change name, position or flags
    Set {
        file: PathBuf,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        index: Option<i32>,
        #[arg(long)]
        auto_refresh: Option<bool>,
        #[arg(long)]
        allow_copy: Option<bool>,
        #[arg(long)]
        copy_on_code: Option<bool>,
        #[arg(long)]
        hide_serial: Option<bool>,
    },

    /// Set or remove the secret password
    Protect {
        file: PathBuf,
        /// Store the secret unencrypted
        #[arg(long)]
        remove: bool,
    },

    /// Show or change the settings file
    ///
    /// Example:
    ///   otpkeep config --clipboard-attempts 5 --uri-compat true
    Config {
        #[arg(long)]
        clipboard_attempts: Option<u32>,
        /// Pause between clearing and writing the clipboard (ms)
        #[arg(long)]
        clipboard_settle_ms: Option<u64>,
        /// Wait before each clipboard retry, multiplied by the attempt (ms)
        #[arg(long)]
        clipboard_backoff_ms: Option<u64>,
        #[arg(long)]
        uri_compat: Option<bool>,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum KindArg {
    Totp,
    Hotp,
    Battlenet,
    Steam,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum AlgorithmArg {
    Sha1,
    Sha256,
    Sha512,
}

impl From<AlgorithmArg> for HashAlgorithm {
    fn from(a: AlgorithmArg) -> Self {
        match a {
            AlgorithmArg::Sha1 => HashAlgorithm::Sha1,
            AlgorithmArg::Sha256 => HashAlgorithm::Sha256,
            AlgorithmArg::Sha512 => HashAlgorithm::Sha512,
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::load()?;

    match cli.command {
        Commands::New {
            file,
            name,
            secret,
            kind,
            issuer,
            digits,
            period,
            algorithm,
            counter,
            serial,
            device_id,
            data,
            protect,
        } => {
            let variant = match kind {
                KindArg::Totp => Variant::Totp,
                KindArg::Hotp => Variant::Hotp {
                    counter: counter.unwrap_or(0),
                },
                KindArg::Battlenet => Variant::BattleNet {
                    serial: serial.unwrap_or_default(),
                },
                KindArg::Steam => Variant::Steam {
                    device_id: device_id.unwrap_or_default(),
                    steam_data: data.unwrap_or_default(),
                },
            };
            let secret = match secret {
                Some(s) => s,
                None => prompt_password_hidden("Secret (base32): ")?,
            };

            let mut auth = Authenticator::from_base32(variant, secret.trim())?;
            if let Some(issuer) = issuer {
                auth.set_issuer(issuer);
            }
            if let Some(digits) = digits {
                auth.set_digits(digits);
            }
            if let Some(period) = period {
                auth.set_period(period);
            }
            if let Some(algorithm) = algorithm {
                auth.set_algorithm(algorithm.into());
            }
            if protect {
                let password = prompt_new_password()?;
                auth.protect(Some(password.as_str()))?;
            }

            cmd_new(&file, &name, auth)?
        }
        Commands::Show { file, json } => cmd_show(&file, json)?,
        Commands::Code { file } => cmd_code(&file)?,
        Commands::Clip { file, retry } => cmd_clip(&file, retry, &settings)?,
        Commands::Uri { file, compat } => cmd_uri(&file, compat || settings.uri_compat)?,
        Commands::Set {
            file,
            name,
            index,
            auto_refresh,
            allow_copy,
            copy_on_code,
            hide_serial,
        } => {
            let (mut record, _) = load_record(&file, None)?;
            if let Some(name) = name {
                record.set_name(name);
            }
            if let Some(index) = index {
                record.set_index(index);
            }
            if let Some(v) = auto_refresh {
                record.set_auto_refresh(v);
            }
            if let Some(v) = allow_copy {
                record.set_allow_copy(v);
            }
            if let Some(v) = copy_on_code {
                record.set_copy_on_code(v);
            }
            if let Some(v) = hide_serial {
                record.set_hide_serial(v);
            }
            save_record(&file, &record)?;
            println!("Updated {}", file.display());
        }
        Commands::Protect { file, remove } => cmd_protect(&file, remove)?,
        Commands::Config {
            clipboard_attempts,
            clipboard_settle_ms,
            clipboard_backoff_ms,
            uri_compat,
        } => {
            let mut settings = settings;
            let mut changed = false;
            if let Some(v) = clipboard_attempts {
                settings.clipboard_attempts = v;
                changed = true;
            }
            if let Some(v) = clipboard_settle_ms {
                settings.clipboard_settle_ms = v;
                changed = true;
            }
            if let Some(v) = clipboard_backoff_ms {
                settings.clipboard_backoff_ms = v;
                changed = true;
            }
            if let Some(v) = uri_compat {
                settings.uri_compat = v;
                changed = true;
            }
            cmd_config(&settings, changed)?
        }
    }

    Ok(())
}

fn cmd_new(path: &Path, name: &str, auth: Authenticator) -> anyhow::Result<()> {
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }
    let record = Record::with_authenticator(name, auth);
    save_record(path, &record)?;
    println!("Saved record {}", path.display());
    Ok(())
}

#[derive(Serialize)]
struct RecordView<'a> {
    id: String,
    index: i32,
    name: &'a str,
    created: String,
    kind: Option<&'static str>,
    issuer: Option<&'a str>,
    algorithm: Option<&'static str>,
    digits: Option<u32>,
    period: Option<u64>,
    counter: Option<u64>,
    serial: Option<&'a str>,
    locked: bool,
    auto_refresh: bool,
    allow_copy: bool,
    copy_on_code: bool,
    hide_serial: bool,
}

fn cmd_show(path: &Path, json: bool) -> anyhow::Result<()> {
    let (record, _) = load_record(path, None)?;
    let auth = record.authenticator();

    let view = RecordView {
        id: record.id().to_string(),
        index: record.index(),
        name: record.name(),
        created: record.created().format(&Rfc3339)?,
        kind: auth.map(|a| a.tag()),
        issuer: auth.map(|a| a.issuer()),
        algorithm: auth.map(|a| a.hash_algorithm().name()),
        digits: auth.map(|a| a.code_digits()),
        period: auth.map(|a| a.period()),
        counter: auth.and_then(|a| a.counter()),
        serial: auth.and_then(|a| a.serial()),
        locked: auth.is_some_and(|a| a.is_locked()),
        auto_refresh: record.auto_refresh(),
        allow_copy: record.allow_copy(),
        copy_on_code: record.copy_on_code(),
        hide_serial: record.hide_serial(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!("Name:     {}", view.name);
    println!("Id:       {}", view.id);
    println!("Created:  {}", view.created);
    match auth {
        Some(auth) => {
            println!("Type:     {}", auth.tag());
            if !auth.issuer().is_empty() {
                println!("Issuer:   {}", auth.issuer());
            }
            println!(
                "Code:     {} digits, {}, {}s",
                auth.code_digits(),
                auth.hash_algorithm(),
                auth.period()
            );
            if let Some(counter) = auth.counter() {
                println!("Counter:  {counter}");
            }
            if let Some(serial) = auth.serial() {
                if record.hide_serial() {
                    println!("Serial:   (hidden)");
                } else {
                    println!("Serial:   {serial}");
                }
            }
            if auth.is_locked() {
                println!("Secret:   locked");
            }
        }
        None => println!("Type:     not set"),
    }
    println!(
        "Flags:    auto-refresh={} allow-copy={} copy-on-code={}",
        view.auto_refresh, view.allow_copy, view.copy_on_code
    );
    Ok(())
}

fn cmd_code(path: &Path) -> anyhow::Result<()> {
    let mut record = open_unlocked(path)?;
    let code = record
        .current_code()?
        .ok_or_else(|| anyhow!("No authenticator in {}", path.display()))?;
    persist_counter(path, &record)?;
    println!("{code}");
    Ok(())
}

fn cmd_clip(path: &Path, retry: bool, settings: &Settings) -> anyhow::Result<()> {
    let mut record = open_unlocked(path)?;
    let code = record
        .current_code()?
        .ok_or_else(|| anyhow!("No authenticator in {}", path.display()))?;
    persist_counter(path, &record)?;

    let outcome =
        record.copy_code_to_buffer(Some(code), &mut SystemClipboard, &settings.copy_options(retry));
    match outcome {
        CopyOutcome::Copied => println!("OTP code copied to clipboard."),
        CopyOutcome::Busy(Some(owner)) => eprintln!("Clipboard is in use by {owner}."),
        CopyOutcome::Busy(None) | CopyOutcome::Dropped => eprintln!("Clipboard is in use."),
        CopyOutcome::WriteFailed => eprintln!("Could not write to the clipboard."),
        CopyOutcome::NoCode => eprintln!("No code available."),
    }
    Ok(())
}

fn cmd_uri(path: &Path, compat: bool) -> anyhow::Result<()> {
    let record = open_unlocked(path)?;
    println!("{}", to_uri(&record, compat)?);
    Ok(())
}

fn cmd_protect(path: &Path, remove: bool) -> anyhow::Result<()> {
    let mut record = open_unlocked(path)?;
    let auth = record
        .authenticator_mut()
        .ok_or_else(|| anyhow!("No authenticator in {}", path.display()))?;
    if remove {
        auth.protect(None)?;
    } else {
        let password = prompt_new_password()?;
        auth.protect(Some(password.as_str()))?;
    }
    save_record(path, &record)?;
    println!("Updated {}", path.display());
    Ok(())
}

fn cmd_config(settings: &Settings, changed: bool) -> anyhow::Result<()> {
    let path = config_path().ok_or_else(|| anyhow!("No config directory on this system"))?;
    if changed {
        save_settings(settings, &path)?;
        println!("Saved {}", path.display());
    }
    println!("{}", serde_json::to_string_pretty(settings)?);
    Ok(())
}

/// Loads a record and prompts for the password when its secret is sealed.
/// Records normalized from a legacy layout are written back.
fn open_unlocked(path: &Path) -> anyhow::Result<Record> {
    let (mut record, mut changed) = load_record(path, None)?;
    if record.authenticator().is_some_and(|a| a.is_locked()) {
        let password = prompt_password_hidden("Password: ")?;
        changed |= record.unlock(&password)?;
    }
    if changed {
        save_record(path, &record)?;
    }
    Ok(record)
}

fn persist_counter(path: &Path, record: &Record) -> anyhow::Result<()> {
    if record.authenticator().and_then(|a| a.counter()).is_some() {
        save_record(path, record)?;
    }
    Ok(())
}
